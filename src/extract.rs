//! Wrappers over axum's `Json`, `Path` and `Query` whose rejections are
//! `PollError::Validation`, so malformed input gets the same JSON error body
//! as every other failure.

use crate::error::PollError;
use axum::{
    extract::{
        FromRequest, FromRequestParts, Request,
        rejection::{JsonRejection, PathRejection, QueryRejection},
    },
    http::request::Parts,
};

pub struct ApiJson<T>(pub T);

pub struct ApiPath<T>(pub T);

pub struct ApiQuery<T>(pub T);

#[axum::async_trait]
impl<T, S> FromRequest<S> for ApiJson<T>
where
    axum::Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = PollError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let axum::Json(value) = axum::Json::<T>::from_request(req, state).await?;
        Ok(Self(value))
    }
}

#[axum::async_trait]
impl<T, S> FromRequestParts<S> for ApiPath<T>
where
    axum::extract::Path<T>: FromRequestParts<S, Rejection = PathRejection>,
    S: Send + Sync,
{
    type Rejection = PollError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let axum::extract::Path(value) = axum::extract::Path::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

#[axum::async_trait]
impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    axum::extract::Query<T>: FromRequestParts<S, Rejection = QueryRejection>,
    S: Send + Sync,
{
    type Rejection = PollError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let axum::extract::Query(value) =
            axum::extract::Query::<T>::from_request_parts(parts, state).await?;
        Ok(Self(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Page {
        page: u32,
    }

    #[tokio::test]
    async fn bad_query_is_a_validation_error() {
        let (mut parts, _) = axum::http::Request::builder()
            .uri("/api/polls?page=first")
            .body(())
            .unwrap()
            .into_parts();
        let err = ApiQuery::<Page>::from_request_parts(&mut parts, &())
            .await
            .err()
            .unwrap();
        match err {
            PollError::Validation(errors) => assert!(errors.has_field("query")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn good_query_passes_through() {
        let (mut parts, _) = axum::http::Request::builder()
            .uri("/api/polls?page=3")
            .body(())
            .unwrap()
            .into_parts();
        let ApiQuery(page) = ApiQuery::<Page>::from_request_parts(&mut parts, &())
            .await
            .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(page.page, 3);
    }

    #[tokio::test]
    async fn unparsable_json_is_a_validation_error() {
        let request = axum::http::Request::builder()
            .header("content-type", "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let err = ApiJson::<serde_json::Value>::from_request(request, &())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, PollError::Validation(_)));
    }
}
