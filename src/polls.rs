use crate::auth::{AuthUser, OptionalAuthUser};
use crate::db::{Category, PageRequest, Poll, PollQuery, PollResult, PollStatus, Requester};
use crate::error::PollError;
use crate::extract::{ApiJson, ApiPath, ApiQuery};
use crate::startup::AppState;
use crate::validation::{ValidationErrors, validate_new_poll, validate_poll_patch};
use axum::{
    extract::{Extension, Json},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: u32 = 10;

// Request/Response DTOs
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OptionInput {
    Text(String),
    Detailed { text: String },
}

impl OptionInput {
    pub fn into_text(self) -> String {
        match self {
            OptionInput::Text(text) | OptionInput::Detailed { text } => text,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePollRequest {
    pub title: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub options: Vec<OptionInput>,
    pub is_public: Option<bool>,
    pub allow_multiple_votes: Option<bool>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub category: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Keeps an explicit `null` apart from an absent field: absent is `None`,
/// `null` is `Some(None)`.
fn nullable<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Partial update; `description` and `endDate` are cleared by `null`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePollRequest {
    pub title: Option<String>,
    #[serde(default, deserialize_with = "nullable")]
    pub description: Option<Option<String>>,
    pub options: Option<Vec<OptionInput>>,
    pub is_public: Option<bool>,
    pub allow_multiple_votes: Option<bool>,
    #[serde(default, deserialize_with = "nullable")]
    pub end_date: Option<Option<DateTime<Utc>>>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub category: Option<String>,
    pub status: Option<PollStatus>,
    pub search: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollView {
    #[serde(flatten)]
    pub poll: Poll,
    pub results: Vec<PollResult>,
    pub is_currently_active: bool,
    pub is_expired: bool,
    pub has_voted: bool,
}

impl PollView {
    fn new(poll: Poll, has_voted: bool) -> Self {
        let now = Utc::now();
        Self {
            results: poll.compute_results(),
            is_currently_active: poll.is_currently_active(now),
            is_expired: poll.is_expired(now),
            has_voted,
            poll,
        }
    }
}

fn parse_category(raw: Option<&str>) -> Result<Option<Category>, PollError> {
    match raw.map(str::trim).filter(|c| !c.is_empty()) {
        None => Ok(None),
        Some(c) if c.eq_ignore_ascii_case("all") => Ok(None),
        Some(c) => c
            .parse()
            .map(Some)
            .map_err(|e: String| ValidationErrors::single("category", e).into()),
    }
}

async fn has_voted(
    app_state: &AppState,
    poll_id: Uuid,
    requester: Option<Requester>,
) -> Result<bool, PollError> {
    match requester {
        Some(r) => Ok(app_state
            .store
            .existing_vote(poll_id, r.user_id)
            .await?
            .is_some()),
        None => Ok(false),
    }
}

/// Loads a poll the caller may manage, or fails with 404/403.
async fn managed_poll(app_state: &AppState, poll_id: Uuid, user: &AuthUser) -> Result<Poll, PollError> {
    let poll = app_state
        .store
        .get_poll(poll_id)
        .await?
        .ok_or(PollError::NotFound("Poll"))?;
    if !poll.is_managed_by(&user.requester()) {
        return Err(PollError::Forbidden("Only the poll creator or an admin may do this"));
    }
    Ok(poll)
}

/// Create a new poll (authenticated users only)
pub async fn create_poll(
    Extension(app_state): Extension<AppState>,
    user: AuthUser,
    ApiJson(payload): ApiJson<CreatePollRequest>,
) -> Result<impl IntoResponse, PollError> {
    let now = Utc::now();
    let new_poll = validate_new_poll(payload, user.user_id, now)?;
    let poll = app_state.store.create_poll(new_poll, now).await?;

    info!("poll {} created by {}", poll.id, user.user_id);
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Poll created successfully",
            "poll": PollView::new(poll, false),
        })),
    ))
}

/// Public polls, newest first
pub async fn list_polls(
    Extension(app_state): Extension<AppState>,
    user: OptionalAuthUser,
    ApiQuery(params): ApiQuery<ListQuery>,
) -> Result<impl IntoResponse, PollError> {
    let requester = user.requester();
    let query = PollQuery {
        page: PageRequest::new(params.page, params.limit, DEFAULT_PAGE_SIZE),
        category: parse_category(params.category.as_deref())?,
        status: params.status.unwrap_or_default(),
        search: params
            .search
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        creator_id: None,
        public_only: !requester.is_some_and(|r| r.is_admin),
    };

    let page = app_state.store.list_polls(&query, Utc::now()).await?;
    let pagination = page.pagination();

    let mut polls = Vec::with_capacity(page.items.len());
    for poll in page.items {
        let voted = has_voted(&app_state, poll.id, requester).await?;
        polls.push(PollView::new(poll, voted));
    }

    Ok(Json(json!({ "polls": polls, "pagination": pagination })))
}

/// The caller's own polls, active or not
pub async fn my_polls(
    Extension(app_state): Extension<AppState>,
    user: AuthUser,
    ApiQuery(params): ApiQuery<PageQuery>,
) -> Result<impl IntoResponse, PollError> {
    let query = PollQuery {
        page: PageRequest::new(params.page, params.limit, DEFAULT_PAGE_SIZE),
        category: None,
        status: PollStatus::All,
        search: None,
        creator_id: Some(user.user_id),
        public_only: false,
    };

    let page = app_state.store.list_polls(&query, Utc::now()).await?;
    let pagination = page.pagination();
    let polls: Vec<PollView> = page
        .items
        .into_iter()
        .map(|poll| PollView::new(poll, false))
        .collect();

    Ok(Json(json!({ "polls": polls, "pagination": pagination })))
}

/// Get a specific poll with its results
pub async fn get_poll(
    Extension(app_state): Extension<AppState>,
    user: OptionalAuthUser,
    ApiPath(poll_id): ApiPath<Uuid>,
) -> Result<impl IntoResponse, PollError> {
    let requester = user.requester();
    let poll = app_state
        .store
        .get_poll(poll_id)
        .await?
        .ok_or(PollError::NotFound("Poll"))?;

    if !poll.is_visible_to(requester.as_ref()) {
        return Err(PollError::Forbidden("This poll is private"));
    }

    let voted = has_voted(&app_state, poll_id, requester).await?;
    Ok(Json(json!({ "poll": PollView::new(poll, voted) })))
}

pub async fn update_poll(
    Extension(app_state): Extension<AppState>,
    user: AuthUser,
    ApiPath(poll_id): ApiPath<Uuid>,
    ApiJson(payload): ApiJson<UpdatePollRequest>,
) -> Result<impl IntoResponse, PollError> {
    managed_poll(&app_state, poll_id, &user).await?;
    let patch = validate_poll_patch(payload)?;
    let poll = app_state
        .store
        .update_poll(poll_id, patch, Utc::now())
        .await?;

    info!("poll {} updated by {}", poll_id, user.user_id);
    Ok(Json(json!({
        "message": "Poll updated successfully",
        "poll": PollView::new(poll, false),
    })))
}

/// Delete a poll together with its votes
pub async fn delete_poll(
    Extension(app_state): Extension<AppState>,
    user: AuthUser,
    ApiPath(poll_id): ApiPath<Uuid>,
) -> Result<impl IntoResponse, PollError> {
    managed_poll(&app_state, poll_id, &user).await?;
    if !app_state.store.delete_poll(poll_id).await? {
        return Err(PollError::NotFound("Poll"));
    }

    info!("poll {} deleted by {}", poll_id, user.user_id);
    Ok(StatusCode::NO_CONTENT)
}
