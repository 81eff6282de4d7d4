use crate::auth::AuthUser;
use crate::db::{PageRequest, Vote, VoteMetadata};
use crate::error::PollError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::polls::PageQuery;
use crate::startup::AppState;
use crate::validation::validate_cast_request;
use axum::{
    extract::{ConnectInfo, Extension, FromRequestParts, Json},
    http::{HeaderMap, StatusCode, header::USER_AGENT, request::Parts},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::net::SocketAddr;
use uuid::Uuid;

const DEFAULT_LEDGER_PAGE_SIZE: u32 = 50;
const DEFAULT_PAGE_SIZE: u32 = 10;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastVoteRequest {
    pub poll_id: Option<Uuid>,
    pub option_index: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VoteHistoryEntry {
    #[serde(flatten)]
    pub vote: Vote,
    pub poll_title: String,
    pub selected_option: Option<String>,
    pub results: Vec<crate::db::PollResult>,
}

/// Client address and agent recorded with each vote.
pub struct ClientMeta(pub VoteMetadata);

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .next()
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .map(str::to_owned)
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for ClientMeta
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ip_address = forwarded_for(&parts.headers)
            .or_else(|| {
                parts
                    .extensions
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip().to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());
        let user_agent = parts
            .headers
            .get(USER_AGENT)
            .and_then(|ua| ua.to_str().ok())
            .unwrap_or_default()
            .to_string();

        Ok(ClientMeta(VoteMetadata {
            ip_address,
            user_agent,
        }))
    }
}

/// Cast a vote on a poll option
pub async fn cast_vote(
    Extension(app_state): Extension<AppState>,
    user: AuthUser,
    ClientMeta(metadata): ClientMeta,
    ApiJson(payload): ApiJson<CastVoteRequest>,
) -> Result<impl IntoResponse, PollError> {
    let (poll_id, option_index) = validate_cast_request(&payload)?;
    let receipt = app_state
        .votes
        .cast_vote(poll_id, user.user_id, option_index, metadata)
        .await?;

    Ok((StatusCode::CREATED, Json(receipt)))
}

/// Retract a vote (owner, or an admin at any time)
pub async fn retract_vote(
    Extension(app_state): Extension<AppState>,
    user: AuthUser,
    ApiPath(vote_id): ApiPath<Uuid>,
) -> Result<impl IntoResponse, PollError> {
    app_state.votes.retract_vote(vote_id, user.requester()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// The caller's votes, newest first, with the current results of each poll
pub async fn my_votes(
    Extension(app_state): Extension<AppState>,
    user: AuthUser,
    ApiQuery(params): ApiQuery<PageQuery>,
) -> Result<impl IntoResponse, PollError> {
    let page = app_state
        .store
        .votes_by_user(
            user.user_id,
            PageRequest::new(params.page, params.limit, DEFAULT_PAGE_SIZE),
        )
        .await?;
    let pagination = page.pagination();

    let mut votes = Vec::with_capacity(page.items.len());
    for vote in page.items {
        let Some(poll) = app_state.store.get_poll(vote.poll_id).await? else {
            continue;
        };
        let selected_option = usize::try_from(vote.option_index)
            .ok()
            .and_then(|slot| poll.options.get(slot))
            .map(|option| option.text.clone());
        votes.push(VoteHistoryEntry {
            vote,
            selected_option,
            results: poll.compute_results(),
            poll_title: poll.title,
        });
    }

    Ok(Json(json!({ "votes": votes, "pagination": pagination })))
}

/// A poll's ledger (creator or admin)
pub async fn poll_votes(
    Extension(app_state): Extension<AppState>,
    user: AuthUser,
    ApiPath(poll_id): ApiPath<Uuid>,
    ApiQuery(params): ApiQuery<PageQuery>,
) -> Result<impl IntoResponse, PollError> {
    let poll = app_state
        .store
        .get_poll(poll_id)
        .await?
        .ok_or(PollError::NotFound("Poll"))?;
    if !poll.is_managed_by(&user.requester()) {
        return Err(PollError::Forbidden("Only the poll creator or an admin may view its votes"));
    }

    let page = app_state
        .store
        .votes_for_poll(
            poll_id,
            PageRequest::new(params.page, params.limit, DEFAULT_LEDGER_PAGE_SIZE),
        )
        .await?;
    let pagination = page.pagination();

    Ok(Json(json!({
        "votes": page.items,
        "pagination": pagination,
        "results": poll.compute_results(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn first_forwarded_hop_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static(" 203.0.113.7 , 10.0.0.1"),
        );
        assert_eq!(forwarded_for(&headers).as_deref(), Some("203.0.113.7"));

        headers.insert("x-forwarded-for", HeaderValue::from_static(""));
        assert_eq!(forwarded_for(&headers), None);
    }

    #[tokio::test]
    async fn metadata_falls_back_to_unknown() {
        let (mut parts, _) = axum::http::Request::new(()).into_parts();
        let ClientMeta(meta) = ClientMeta::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(meta.ip_address, "unknown");
        assert_eq!(meta.user_agent, "");
    }
}
