use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::models::{
    NewPoll, NewVote, Page, PageRequest, Poll, PollPatch, PollQuery, Requester, Vote, check_cast,
    check_retract,
};
use crate::db::store::{CastOutcome, RetractOutcome, VoteStore};
use crate::error::PollError;

/// A poll together with its ledger. Everything that changes tallies happens
/// while holding this record's lock.
struct PollRecord {
    poll: Poll,
    ledger: Vec<Vote>,
    deleted: bool,
}

impl PollRecord {
    fn existing_vote(&self, user_id: Uuid) -> Option<&Vote> {
        self.ledger
            .iter()
            .rev()
            .find(|v| v.user_id == user_id && v.is_valid)
    }

    fn record(&mut self, vote: Vote) {
        self.ledger.push(vote);
    }

    fn remove(&mut self, vote_id: Uuid) -> Option<Vote> {
        let pos = self.ledger.iter().position(|v| v.id == vote_id)?;
        Some(self.ledger.remove(pos))
    }
}

/// Process-local store, used when no database is configured and in tests.
#[derive(Default)]
pub struct MemoryStore {
    polls: RwLock<HashMap<Uuid, Arc<Mutex<PollRecord>>>>,
    vote_index: RwLock<HashMap<Uuid, Uuid>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a fully formed poll as-is; no validation happens here.
    pub fn insert_poll(&self, poll: Poll) {
        let record = PollRecord {
            poll,
            ledger: Vec::new(),
            deleted: false,
        };
        let id = record.poll.id;
        self.polls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(Mutex::new(record)));
    }

    fn record(&self, poll_id: Uuid) -> Option<Arc<Mutex<PollRecord>>> {
        self.polls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&poll_id)
            .cloned()
    }

    fn all_records(&self) -> Vec<Arc<Mutex<PollRecord>>> {
        self.polls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    fn poll_for_vote(&self, vote_id: Uuid) -> Option<Uuid> {
        self.vote_index
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&vote_id)
            .copied()
    }

    async fn collect_votes(&self, keep: impl Fn(&Vote) -> bool) -> Vec<Vote> {
        let mut votes = Vec::new();
        for record in self.all_records() {
            let record = record.lock().await;
            if record.deleted {
                continue;
            }
            votes.extend(record.ledger.iter().filter(|v| keep(v)).cloned());
        }
        votes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        votes
    }
}

#[async_trait]
impl VoteStore for MemoryStore {
    async fn create_poll(&self, poll: NewPoll, now: DateTime<Utc>) -> Result<Poll, PollError> {
        let poll = Poll::from_new(poll, now);
        self.insert_poll(poll.clone());
        Ok(poll)
    }

    async fn get_poll(&self, poll_id: Uuid) -> Result<Option<Poll>, PollError> {
        let Some(record) = self.record(poll_id) else {
            return Ok(None);
        };
        let record = record.lock().await;
        Ok((!record.deleted).then(|| record.poll.clone()))
    }

    async fn list_polls(&self, query: &PollQuery, now: DateTime<Utc>) -> Result<Page<Poll>, PollError> {
        let mut polls = Vec::new();
        for record in self.all_records() {
            let record = record.lock().await;
            if !record.deleted && query.matches(&record.poll, now) {
                polls.push(record.poll.clone());
            }
        }
        polls.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(Page::from_sorted(polls, query.page))
    }

    async fn update_poll(
        &self,
        poll_id: Uuid,
        patch: PollPatch,
        now: DateTime<Utc>,
    ) -> Result<Poll, PollError> {
        let record = self.record(poll_id).ok_or(PollError::NotFound("Poll"))?;
        let mut record = record.lock().await;
        if record.deleted {
            return Err(PollError::NotFound("Poll"));
        }
        let mut updated = record.poll.clone();
        updated.apply_patch(patch, now)?;
        record.poll = updated.clone();
        Ok(updated)
    }

    async fn delete_poll(&self, poll_id: Uuid) -> Result<bool, PollError> {
        let Some(record) = self.record(poll_id) else {
            return Ok(false);
        };
        let mut record = record.lock().await;
        if record.deleted {
            return Ok(false);
        }
        record.deleted = true;
        let vote_ids: Vec<Uuid> = record.ledger.drain(..).map(|v| v.id).collect();
        {
            let mut index = self.vote_index.write().unwrap_or_else(PoisonError::into_inner);
            for id in vote_ids {
                index.remove(&id);
            }
        }
        self.polls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&poll_id);
        Ok(true)
    }

    async fn cast_vote(&self, vote: NewVote, now: DateTime<Utc>) -> Result<CastOutcome, PollError> {
        let record = self.record(vote.poll_id).ok_or(PollError::NotFound("Poll"))?;
        // The lock is the only await point; nothing below can be cancelled
        // halfway.
        let mut record = record.lock().await;
        if record.deleted {
            return Err(PollError::NotFound("Poll"));
        }

        let prior = record.existing_vote(vote.user_id);
        let first_vote = prior.is_none();
        let slot = check_cast(&record.poll, vote.option_index, prior, now)?;

        let entry = Vote {
            id: Uuid::new_v4(),
            poll_id: vote.poll_id,
            user_id: vote.user_id,
            option_index: slot as i32,
            ip_address: vote.metadata.ip_address,
            user_agent: vote.metadata.user_agent,
            is_valid: true,
            created_at: now,
        };
        record.poll.increment_option(slot, entry.voter(), first_vote)?;
        record.poll.updated_at = now;
        record.record(entry.clone());
        self.vote_index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(entry.id, entry.poll_id);

        Ok(CastOutcome {
            vote: entry,
            poll: record.poll.clone(),
        })
    }

    async fn retract_vote(
        &self,
        vote_id: Uuid,
        requester: Requester,
        now: DateTime<Utc>,
    ) -> Result<RetractOutcome, PollError> {
        let poll_id = self.poll_for_vote(vote_id).ok_or(PollError::NotFound("Vote"))?;
        let record = self.record(poll_id).ok_or(PollError::NotFound("Poll"))?;
        let mut record = record.lock().await;
        if record.deleted {
            return Err(PollError::NotFound("Poll"));
        }
        let vote = record
            .ledger
            .iter()
            .find(|v| v.id == vote_id)
            .cloned()
            .ok_or(PollError::NotFound("Vote"))?;

        let slot = check_retract(&record.poll, &vote, &requester, now)?;
        let last_vote = !record
            .ledger
            .iter()
            .any(|v| v.user_id == vote.user_id && v.id != vote.id && v.is_valid);

        record.poll.decrement_option(slot, &vote.voter(), last_vote)?;
        record.poll.updated_at = now;
        record.remove(vote.id);
        self.vote_index
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&vote.id);

        Ok(RetractOutcome {
            vote,
            poll: record.poll.clone(),
        })
    }

    async fn get_vote(&self, vote_id: Uuid) -> Result<Option<Vote>, PollError> {
        let Some(poll_id) = self.poll_for_vote(vote_id) else {
            return Ok(None);
        };
        let Some(record) = self.record(poll_id) else {
            return Ok(None);
        };
        let record = record.lock().await;
        Ok(record.ledger.iter().find(|v| v.id == vote_id).cloned())
    }

    async fn existing_vote(&self, poll_id: Uuid, user_id: Uuid) -> Result<Option<Vote>, PollError> {
        let Some(record) = self.record(poll_id) else {
            return Ok(None);
        };
        let record = record.lock().await;
        Ok(record.existing_vote(user_id).cloned())
    }

    async fn votes_by_user(&self, user_id: Uuid, page: PageRequest) -> Result<Page<Vote>, PollError> {
        let votes = self.collect_votes(|v| v.user_id == user_id).await;
        Ok(Page::from_sorted(votes, page))
    }

    async fn votes_for_poll(&self, poll_id: Uuid, page: PageRequest) -> Result<Page<Vote>, PollError> {
        let Some(record) = self.record(poll_id) else {
            return Ok(Page::from_sorted(Vec::new(), page));
        };
        let mut votes = record.lock().await.ledger.clone();
        votes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(Page::from_sorted(votes, page))
    }

    async fn health_check(&self) -> Result<String, PollError> {
        let polls = self.polls.read().unwrap_or_else(PoisonError::into_inner).len();
        let votes = self.vote_index.read().unwrap_or_else(PoisonError::into_inner).len();
        Ok(format!("memory store: polls={polls}, votes={votes}"))
    }
}
