use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::db::connection::{DbPool, get_pool_stats, ping};
use crate::db::models::{NewPoll, NewVote, Page, PageRequest, Poll, PollPatch, PollQuery, Requester, Vote};
use crate::db::repositories::{poll_repository, vote_repository};
use crate::db::store::{CastOutcome, RetractOutcome, VoteStore};
use crate::error::PollError;

/// Postgres backed store. Owns the connection pool for the life of the
/// process.
#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
}

impl PgStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl VoteStore for PgStore {
    async fn create_poll(&self, poll: NewPoll, now: DateTime<Utc>) -> Result<Poll, PollError> {
        let poll = Poll::from_new(poll, now);
        poll_repository::create_poll(&self.pool, &poll).await?;
        Ok(poll)
    }

    async fn get_poll(&self, poll_id: Uuid) -> Result<Option<Poll>, PollError> {
        let mut conn = self.pool.acquire().await?;
        Ok(poll_repository::get_poll(&mut conn, poll_id).await?)
    }

    async fn list_polls(&self, query: &PollQuery, now: DateTime<Utc>) -> Result<Page<Poll>, PollError> {
        let (items, total) = poll_repository::list_polls(&self.pool, query, now).await?;
        Ok(Page {
            items,
            total,
            request: query.page,
        })
    }

    async fn update_poll(
        &self,
        poll_id: Uuid,
        patch: PollPatch,
        now: DateTime<Utc>,
    ) -> Result<Poll, PollError> {
        poll_repository::update_poll(&self.pool, poll_id, patch, now).await
    }

    async fn delete_poll(&self, poll_id: Uuid) -> Result<bool, PollError> {
        Ok(poll_repository::delete_poll(&self.pool, poll_id).await?)
    }

    async fn cast_vote(&self, vote: NewVote, now: DateTime<Utc>) -> Result<CastOutcome, PollError> {
        vote_repository::cast_vote(&self.pool, vote, now).await
    }

    async fn retract_vote(
        &self,
        vote_id: Uuid,
        requester: Requester,
        now: DateTime<Utc>,
    ) -> Result<RetractOutcome, PollError> {
        vote_repository::retract_vote(&self.pool, vote_id, requester, now).await
    }

    async fn get_vote(&self, vote_id: Uuid) -> Result<Option<Vote>, PollError> {
        let mut conn = self.pool.acquire().await?;
        Ok(vote_repository::get_vote(&mut conn, vote_id).await?)
    }

    async fn existing_vote(&self, poll_id: Uuid, user_id: Uuid) -> Result<Option<Vote>, PollError> {
        let mut conn = self.pool.acquire().await?;
        Ok(vote_repository::existing_vote(&mut conn, poll_id, user_id).await?)
    }

    async fn votes_by_user(&self, user_id: Uuid, page: PageRequest) -> Result<Page<Vote>, PollError> {
        let (items, total) = vote_repository::votes_by_user(&self.pool, user_id, page).await?;
        Ok(Page {
            items,
            total,
            request: page,
        })
    }

    async fn votes_for_poll(&self, poll_id: Uuid, page: PageRequest) -> Result<Page<Vote>, PollError> {
        let (items, total) = vote_repository::votes_for_poll(&self.pool, poll_id, page).await?;
        Ok(Page {
            items,
            total,
            request: page,
        })
    }

    async fn health_check(&self) -> Result<String, PollError> {
        ping(&self.pool).await?;
        Ok(get_pool_stats(&self.pool))
    }

    async fn close(&self) {
        info!("closing database pool ({})", get_pool_stats(&self.pool));
        self.pool.close().await;
    }
}
