use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::models::{NewPoll, NewVote, Page, PageRequest, Poll, PollPatch, PollQuery, Requester, Vote};
use crate::error::PollError;

/// Outcome of a committed cast: the ledger entry and the poll as it stood
/// right after the tally update.
#[derive(Debug, Clone)]
pub struct CastOutcome {
    pub vote: Vote,
    pub poll: Poll,
}

#[derive(Debug, Clone)]
pub struct RetractOutcome {
    pub vote: Vote,
    pub poll: Poll,
}

/// Poll Store and Vote Ledger behind one seam.
///
/// `cast_vote` and `retract_vote` are each a single atomic unit per poll:
/// the duplicate check, the ledger write and the tally update either all
/// commit or none do, including when the caller's future is dropped.
#[async_trait]
pub trait VoteStore: Send + Sync + 'static {
    async fn create_poll(&self, poll: NewPoll, now: DateTime<Utc>) -> Result<Poll, PollError>;

    async fn get_poll(&self, poll_id: Uuid) -> Result<Option<Poll>, PollError>;

    async fn list_polls(&self, query: &PollQuery, now: DateTime<Utc>) -> Result<Page<Poll>, PollError>;

    async fn update_poll(
        &self,
        poll_id: Uuid,
        patch: PollPatch,
        now: DateTime<Utc>,
    ) -> Result<Poll, PollError>;

    /// Removes the poll and every vote cast on it.
    async fn delete_poll(&self, poll_id: Uuid) -> Result<bool, PollError>;

    async fn cast_vote(&self, vote: NewVote, now: DateTime<Utc>) -> Result<CastOutcome, PollError>;

    async fn retract_vote(
        &self,
        vote_id: Uuid,
        requester: Requester,
        now: DateTime<Utc>,
    ) -> Result<RetractOutcome, PollError>;

    async fn get_vote(&self, vote_id: Uuid) -> Result<Option<Vote>, PollError>;

    /// Most recent valid vote by `user_id` on the poll.
    async fn existing_vote(&self, poll_id: Uuid, user_id: Uuid) -> Result<Option<Vote>, PollError>;

    async fn votes_by_user(&self, user_id: Uuid, page: PageRequest) -> Result<Page<Vote>, PollError>;

    async fn votes_for_poll(&self, poll_id: Uuid, page: PageRequest) -> Result<Page<Vote>, PollError>;

    /// Short human readable status, or the failure.
    async fn health_check(&self) -> Result<String, PollError>;

    async fn close(&self) {}
}
