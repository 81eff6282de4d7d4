use crate::db::{NewVote, Poll, PollResult, Requester, Vote, VoteMetadata, VoteStore};
use crate::error::PollError;
use crate::sse::{LiveUpdates, ResultSnapshot};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct CastReceipt {
    pub vote: Vote,
    pub results: Vec<PollResult>,
}

/// Applies votes and retractions against the store and publishes one
/// snapshot per successful tally change.
#[derive(Clone)]
pub struct VoteService {
    store: Arc<dyn VoteStore>,
    live: LiveUpdates,
}

impl VoteService {
    pub fn new(store: Arc<dyn VoteStore>, live: LiveUpdates) -> Self {
        Self { store, live }
    }

    pub async fn cast_vote(
        &self,
        poll_id: Uuid,
        user_id: Uuid,
        option_index: i64,
        metadata: VoteMetadata,
    ) -> Result<CastReceipt, PollError> {
        let outcome = self
            .store
            .cast_vote(
                NewVote {
                    poll_id,
                    user_id,
                    option_index,
                    metadata,
                },
                Utc::now(),
            )
            .await?;

        info!(
            "vote {} cast on poll {} option {} by {}",
            outcome.vote.id, poll_id, outcome.vote.option_index, user_id
        );
        self.publish(&outcome.poll);

        Ok(CastReceipt {
            results: outcome.poll.compute_results(),
            vote: outcome.vote,
        })
    }

    pub async fn retract_vote(&self, vote_id: Uuid, requester: Requester) -> Result<Vote, PollError> {
        let outcome = self
            .store
            .retract_vote(vote_id, requester, Utc::now())
            .await?;

        info!(
            "vote {} on poll {} retracted by {}{}",
            vote_id,
            outcome.poll.id,
            requester.user_id,
            if requester.is_admin { " (admin)" } else { "" }
        );
        self.publish(&outcome.poll);

        Ok(outcome.vote)
    }

    fn publish(&self, poll: &Poll) {
        self.live.publish(ResultSnapshot::of(poll));
    }
}
