use crate::auth::JwtKeys;
use crate::config::Config;
use crate::db::VoteStore;
use crate::error::PollError;
use crate::sse::{LiveUpdates, poll_updates_sse};
use crate::vote_service::VoteService;
use crate::{polls, votes};
use axum::{
    Json, Router,
    extract::Extension,
    http::{
        Method, StatusCode,
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    },
    response::IntoResponse,
    routing::{delete, get, post},
};
use serde_json::json;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn VoteStore>,
    pub votes: VoteService,
    pub live: LiveUpdates,
    pub jwt: JwtKeys,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(store: Arc<dyn VoteStore>, config: Config) -> Self {
        let live = LiveUpdates::new(config.live_channel_capacity);
        AppState {
            votes: VoteService::new(store.clone(), live.clone()),
            jwt: JwtKeys::new(config.jwt_secret.as_bytes()),
            config: Arc::new(config),
            store,
            live,
        }
    }

    /// Periodically checks the storage backend until the handle is aborted.
    pub fn spawn_health_monitor(&self) -> JoinHandle<()> {
        let store = self.store.clone();
        let period = self.config.db_health_check;
        tokio::spawn(async move {
            let mut interval = interval(period);
            loop {
                interval.tick().await;
                match store.health_check().await {
                    Ok(stats) => debug!("storage health check ok: {}", stats),
                    Err(e) => error!("Storage health check failed: {}", e),
                }
            }
        })
    }
}

async fn health(Extension(app_state): Extension<AppState>) -> Result<impl IntoResponse, PollError> {
    let storage = app_state.store.health_check().await?;
    Ok(Json(json!({ "status": "ok", "storage": storage })))
}

async fn handler_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "Not found" })))
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/polls", get(polls::list_polls).post(polls::create_poll))
        .route("/api/polls/mine", get(polls::my_polls))
        .route(
            "/api/polls/:id",
            get(polls::get_poll)
                .patch(polls::update_poll)
                .delete(polls::delete_poll),
        )
        .route("/api/polls/:id/live", get(poll_updates_sse))
        .route("/api/votes", post(votes::cast_vote))
        .route("/api/votes/mine", get(votes::my_votes))
        .route("/api/votes/:id", delete(votes::retract_vote))
        .route("/api/votes/poll/:poll_id", get(votes::poll_votes))
        .fallback(handler_404)
        .layer(Extension(app_state))
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::mirror_request())
                .allow_credentials(true)
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PATCH,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([CONTENT_TYPE, ACCEPT, AUTHORIZATION]),
        )
        .layer(TraceLayer::new_for_http())
}
