use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::db::models::{Poll, PollResult};

/// Per-poll topic, rendered as `poll-{id}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Topic(pub Uuid);

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "poll-{}", self.0)
    }
}

/// Results plus counters, published after every tally change.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSnapshot {
    pub poll_id: Uuid,
    pub topic: String,
    pub results: Vec<PollResult>,
    pub total_votes: i64,
    pub unique_voters: i64,
    pub version: i64,
    pub published_at: DateTime<Utc>,
}

impl ResultSnapshot {
    pub fn of(poll: &Poll) -> Self {
        Self {
            poll_id: poll.id,
            topic: Topic(poll.id).to_string(),
            results: poll.compute_results(),
            total_votes: poll.total_votes,
            unique_voters: poll.unique_voters,
            version: poll.version,
            published_at: Utc::now(),
        }
    }
}
