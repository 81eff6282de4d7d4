use crate::db::Requester;
use crate::error::PollError;
use crate::startup::AppState;
use axum::{
    extract::{Extension, FromRequestParts},
    http::{HeaderMap, header::AUTHORIZATION, request::Parts},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    pub exp: u64,
}

/// HS256 keys. Tokens are issued elsewhere; `issue` exists for tooling and
/// tests.
#[derive(Clone)]
pub struct JwtKeys {
    encoding: Arc<EncodingKey>,
    decoding: Arc<DecodingKey>,
}

impl JwtKeys {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding: Arc::new(EncodingKey::from_secret(secret)),
            decoding: Arc::new(DecodingKey::from_secret(secret)),
        }
    }

    pub fn issue(&self, user_id: Uuid, role: Role, ttl: Duration) -> Result<String, PollError> {
        let claims = Claims {
            sub: user_id,
            role,
            exp: (Utc::now() + ttl).timestamp().max(0) as u64,
        };
        Ok(encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?)
    }

    pub fn verify(&self, token: &str) -> Result<AuthUser, PollError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))?;
        Ok(AuthUser {
            user_id: data.claims.sub,
            role: data.claims.role,
        })
    }
}

/// A caller with a verified token. Rejects with 401 otherwise.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: Role,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn requester(&self) -> Requester {
        Requester {
            user_id: self.user_id,
            is_admin: self.is_admin(),
        }
    }
}

/// Like `AuthUser`, but anonymous callers (or unverifiable tokens) are
/// treated as no user at all.
#[derive(Debug, Clone, Copy)]
pub struct OptionalAuthUser(pub Option<AuthUser>);

impl OptionalAuthUser {
    pub fn requester(&self) -> Option<Requester> {
        self.0.as_ref().map(AuthUser::requester)
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

async fn app_state<S: Send + Sync>(parts: &mut Parts, state: &S) -> Result<AppState, PollError> {
    let Extension(app_state) = Extension::<AppState>::from_request_parts(parts, state)
        .await
        .map_err(|e| PollError::ServiceUnavailable(e.to_string()))?;
    Ok(app_state)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = PollError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = app_state(parts, state).await?;
        let token = bearer_token(&parts.headers).ok_or(PollError::Unauthorized)?;
        app_state.jwt.verify(token)
    }
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for OptionalAuthUser
where
    S: Send + Sync,
{
    type Rejection = PollError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Some(token) = bearer_token(&parts.headers).map(str::to_owned) else {
            return Ok(Self(None));
        };
        let app_state = app_state(parts, state).await?;
        match app_state.jwt.verify(&token) {
            Ok(user) => Ok(Self(Some(user))),
            Err(_) => {
                debug!("ignoring unverifiable bearer token on optional route");
                Ok(Self(None))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn issued_tokens_verify_with_the_same_secret() {
        let keys = JwtKeys::new(b"secret");
        let user = Uuid::new_v4();
        let token = keys.issue(user, Role::Admin, Duration::minutes(5)).unwrap();

        let verified = keys.verify(&token).unwrap();
        assert_eq!(verified.user_id, user);
        assert!(verified.requester().is_admin);
    }

    #[test]
    fn foreign_and_expired_tokens_are_unauthorized() {
        let keys = JwtKeys::new(b"secret");
        let other = JwtKeys::new(b"another secret");
        let token = other.issue(Uuid::new_v4(), Role::User, Duration::minutes(5)).unwrap();
        assert!(matches!(keys.verify(&token), Err(PollError::Unauthorized)));

        let expired = keys.issue(Uuid::new_v4(), Role::User, Duration::hours(-1)).unwrap();
        assert!(matches!(keys.verify(&expired), Err(PollError::Unauthorized)));
    }

    #[test]
    fn bearer_prefix_is_required() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Token abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(bearer_token(&headers), Some("abc"));
    }
}
