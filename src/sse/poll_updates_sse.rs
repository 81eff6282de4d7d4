use crate::auth::OptionalAuthUser;
use crate::error::PollError;
use crate::extract::ApiPath;
use crate::sse::models::ResultSnapshot;
use crate::startup::AppState;
use axum::{
    extract::Extension,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::Stream;
use serde_json::json;
use std::convert::Infallible;
use tracing::{debug, warn};
use uuid::Uuid;

fn snapshot_event(name: &'static str, snapshot: &ResultSnapshot) -> Event {
    Event::default()
        .event(name)
        .json_data(snapshot)
        .unwrap_or_else(|e| {
            warn!("failed to encode snapshot for {}: {}", snapshot.topic, e);
            error_event(&PollError::ServiceUnavailable(e.to_string()))
        })
}

fn error_event(error: &PollError) -> Event {
    Event::default()
        .event("error")
        .data(json!({"error": error.message()}).to_string())
}

/// Streams `poll-{id}`: an `init` snapshot of the current results, then a
/// `vote_update` snapshot after every tally change.
pub async fn poll_updates_sse(
    Extension(app_state): Extension<AppState>,
    user: OptionalAuthUser,
    ApiPath(poll_id): ApiPath<Uuid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Subscribe before reading so no change between the read and the
    // subscription is lost; the version floor drops what `init` covers.
    let mut subscription = app_state.live.subscribe(poll_id);
    let requester = user.requester();
    let store = app_state.store.clone();

    let stream = async_stream::stream! {
        let init = match store.get_poll(poll_id).await {
            Ok(Some(poll)) if poll.is_visible_to(requester.as_ref()) => Some(ResultSnapshot::of(&poll)),
            Ok(Some(_)) => {
                yield Ok(error_event(&PollError::Forbidden("This poll is private")));
                None
            }
            Ok(None) => {
                yield Ok(error_event(&PollError::NotFound("Poll")));
                None
            }
            Err(e) => {
                yield Ok(error_event(&e));
                None
            }
        };

        if let Some(init) = init {
            subscription.seen(init.version);
            yield Ok(snapshot_event("init", &init));

            while let Some(snapshot) = subscription.recv().await {
                yield Ok(snapshot_event("vote_update", &snapshot));
            }
            debug!("live stream for {} ended", subscription.topic());
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(app_state.config.sse_keepalive)
            .text("keep-alive"),
    )
}
