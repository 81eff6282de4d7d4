use serde::{Deserialize, Serialize};
use sqlx::types::chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::PollError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    #[default]
    General,
    Politics,
    Entertainment,
    Sports,
    Technology,
    Education,
    Business,
    Other,
}

impl Category {
    pub const ALL: [Category; 8] = [
        Category::General,
        Category::Politics,
        Category::Entertainment,
        Category::Sports,
        Category::Technology,
        Category::Education,
        Category::Business,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::General => "general",
            Category::Politics => "politics",
            Category::Entertainment => "entertainment",
            Category::Sports => "sports",
            Category::Technology => "technology",
            Category::Education => "education",
            Category::Business => "business",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown category: {s}"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Voter {
    pub user_id: Uuid,
    pub voted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollOption {
    pub text: String,
    pub votes: i64,
    /// Who voted for this option; never sent to clients.
    #[serde(skip_serializing, default)]
    pub voters: Vec<Voter>,
}

impl PollOption {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            votes: 0,
            voters: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Poll {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub options: Vec<PollOption>,
    pub creator_id: Uuid,
    pub is_active: bool,
    pub is_public: bool,
    pub allow_multiple_votes: bool,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub total_votes: i64,
    pub unique_voters: i64,
    pub category: Category,
    pub tags: Vec<String>,
    /// Bumped on every tally change; orders live snapshots.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-option view of the tallies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollResult {
    pub text: String,
    pub vote_count: i64,
    pub percentage: f64,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

impl Poll {
    pub fn from_new(new_poll: NewPoll, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: new_poll.title,
            description: new_poll.description,
            options: new_poll.options.into_iter().map(PollOption::new).collect(),
            creator_id: new_poll.creator_id,
            is_active: true,
            is_public: new_poll.is_public,
            allow_multiple_votes: new_poll.allow_multiple_votes,
            start_date: new_poll.start_date,
            end_date: new_poll.end_date,
            total_votes: 0,
            unique_voters: 0,
            category: new_poll.category,
            tags: new_poll.tags,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_currently_active(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.start_date <= now && self.end_date.is_none_or(|end| end > now)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.end_date.is_some_and(|end| end < now)
    }

    pub fn compute_results(&self) -> Vec<PollResult> {
        self.options
            .iter()
            .map(|option| PollResult {
                text: option.text.clone(),
                vote_count: option.votes,
                percentage: if self.total_votes > 0 {
                    round2(option.votes as f64 / self.total_votes as f64 * 100.0)
                } else {
                    0.0
                },
            })
            .collect()
    }

    /// Maps a client supplied index onto an option slot.
    pub fn option_slot(&self, option_index: i64) -> Result<usize, PollError> {
        usize::try_from(option_index)
            .ok()
            .filter(|slot| *slot < self.options.len())
            .ok_or(PollError::InvalidOption)
    }

    pub fn increment_option(
        &mut self,
        slot: usize,
        voter: Voter,
        first_vote: bool,
    ) -> Result<(), PollError> {
        let option = self
            .options
            .get_mut(slot)
            .ok_or(PollError::InvalidOption)?;
        option.votes += 1;
        option.voters.push(voter);
        self.total_votes += 1;
        if first_vote {
            self.unique_voters += 1;
        }
        self.version += 1;
        Ok(())
    }

    /// Reverses one counted vote. `last_vote` is true when the voter has no
    /// other valid vote left on this poll.
    pub fn decrement_option(
        &mut self,
        slot: usize,
        voter: &Voter,
        last_vote: bool,
    ) -> Result<(), PollError> {
        let total_votes = self.total_votes;
        let option = self
            .options
            .get_mut(slot)
            .ok_or(PollError::InvalidOption)?;
        if option.votes <= 0 || total_votes <= 0 {
            return Err(PollError::ServiceUnavailable(format!(
                "tally underflow on poll {} option {}",
                self.id, slot
            )));
        }
        option.votes -= 1;
        if let Some(pos) = option.voters.iter().position(|v| v == voter) {
            option.voters.remove(pos);
        } else if let Some(pos) = option.voters.iter().position(|v| v.user_id == voter.user_id) {
            option.voters.remove(pos);
        }
        self.total_votes -= 1;
        if last_vote && self.unique_voters > 0 {
            self.unique_voters -= 1;
        }
        self.version += 1;
        Ok(())
    }

    pub fn tallies_consistent(&self) -> bool {
        self.total_votes == self.options.iter().map(|o| o.votes).sum::<i64>()
            && self.unique_voters <= self.total_votes
            && self.unique_voters >= 0
    }

    pub fn is_managed_by(&self, requester: &Requester) -> bool {
        requester.is_admin || requester.user_id == self.creator_id
    }

    pub fn is_visible_to(&self, requester: Option<&Requester>) -> bool {
        self.is_public || requester.is_some_and(|r| self.is_managed_by(r))
    }

    /// Applies a metadata update. Options and the voting rule are frozen
    /// once any vote has been counted.
    pub fn apply_patch(&mut self, patch: PollPatch, now: DateTime<Utc>) -> Result<(), PollError> {
        if self.total_votes > 0 && (patch.options.is_some() || patch.allow_multiple_votes.is_some())
        {
            return Err(crate::validation::ValidationErrors::single(
                "options",
                "Cannot modify options or voting rules after votes have been cast",
            )
            .into());
        }
        if let Some(title) = patch.title {
            self.title = title;
        }
        if let Some(description) = patch.description {
            self.description = description;
        }
        if let Some(options) = patch.options {
            self.options = options.into_iter().map(PollOption::new).collect();
        }
        if let Some(is_public) = patch.is_public {
            self.is_public = is_public;
        }
        if let Some(allow) = patch.allow_multiple_votes {
            self.allow_multiple_votes = allow;
        }
        if let Some(end_date) = patch.end_date {
            self.end_date = end_date;
        }
        if let Some(category) = patch.category {
            self.category = category;
        }
        if let Some(tags) = patch.tags {
            self.tags = tags;
        }
        if let Some(is_active) = patch.is_active {
            self.is_active = is_active;
        }
        self.updated_at = now;
        crate::validation::validate_poll(self)?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub id: Uuid,
    pub poll_id: Uuid,
    pub user_id: Uuid,
    pub option_index: i32,
    pub ip_address: String,
    pub user_agent: String,
    pub is_valid: bool,
    pub created_at: DateTime<Utc>,
}

impl Vote {
    pub fn voter(&self) -> Voter {
        Voter {
            user_id: self.user_id,
            voted_at: self.created_at,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct VoteMetadata {
    pub ip_address: String,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct NewVote {
    pub poll_id: Uuid,
    pub user_id: Uuid,
    pub option_index: i64,
    pub metadata: VoteMetadata,
}

/// Verified identity behind a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub user_id: Uuid,
    pub is_admin: bool,
}

#[derive(Debug, Clone)]
pub struct NewPoll {
    pub title: String,
    pub description: Option<String>,
    pub options: Vec<String>,
    pub creator_id: Uuid,
    pub is_public: bool,
    pub allow_multiple_votes: bool,
    pub start_date: DateTime<Utc>,
    pub end_date: Option<DateTime<Utc>>,
    pub category: Category,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct PollPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub options: Option<Vec<String>>,
    pub is_public: Option<bool>,
    pub allow_multiple_votes: Option<bool>,
    pub end_date: Option<Option<DateTime<Utc>>>,
    pub category: Option<Category>,
    pub tags: Option<Vec<String>>,
    pub is_active: Option<bool>,
}

/// Cast preconditions: the poll is open, the option exists and the voter
/// has not already used their single vote. Returns the option slot.
pub fn check_cast(
    poll: &Poll,
    option_index: i64,
    prior_vote: Option<&Vote>,
    now: DateTime<Utc>,
) -> Result<usize, PollError> {
    if !poll.is_currently_active(now) {
        return Err(PollError::PollInactive);
    }
    let slot = poll.option_slot(option_index)?;
    if prior_vote.is_some() && !poll.allow_multiple_votes {
        return Err(PollError::AlreadyVoted);
    }
    Ok(slot)
}

/// Ownership and window checks for a retraction. Admins bypass both the
/// ownership rule and a closed voting window.
pub fn check_retract(
    poll: &Poll,
    vote: &Vote,
    requester: &Requester,
    now: DateTime<Utc>,
) -> Result<usize, PollError> {
    if vote.user_id != requester.user_id && !requester.is_admin {
        return Err(PollError::Forbidden("You can only delete your own votes"));
    }
    if !poll.is_currently_active(now) && !requester.is_admin {
        return Err(PollError::PollInactive);
    }
    poll.option_slot(vote.option_index as i64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollStatus {
    #[default]
    Active,
    All,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub const MAX_LIMIT: u32 = 100;

    pub fn new(page: Option<u32>, limit: Option<u32>, default_limit: u32) -> Self {
        Self {
            page: page.unwrap_or(1).max(1),
            limit: limit.unwrap_or(default_limit).clamp(1, Self::MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page - 1) * u64::from(self.limit)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Pagination {
    pub current: u32,
    pub pages: u64,
    pub total: u64,
}

#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub request: PageRequest,
}

impl<T> Page<T> {
    /// Slices an already filtered and sorted collection.
    pub fn from_sorted(all: Vec<T>, request: PageRequest) -> Self {
        let total = all.len() as u64;
        let items = all
            .into_iter()
            .skip(request.offset() as usize)
            .take(request.limit as usize)
            .collect();
        Self {
            items,
            total,
            request,
        }
    }

    pub fn pagination(&self) -> Pagination {
        Pagination {
            current: self.request.page,
            pages: self.total.div_ceil(u64::from(self.request.limit)),
            total: self.total,
        }
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            items: self.items.into_iter().map(f).collect(),
            total: self.total,
            request: self.request,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PollQuery {
    pub page: PageRequest,
    pub category: Option<Category>,
    pub status: PollStatus,
    pub search: Option<String>,
    pub creator_id: Option<Uuid>,
    pub public_only: bool,
}

impl PollQuery {
    pub fn matches(&self, poll: &Poll, now: DateTime<Utc>) -> bool {
        if self.public_only && !poll.is_public {
            return false;
        }
        if self.creator_id.is_some_and(|creator| creator != poll.creator_id) {
            return false;
        }
        if self.status == PollStatus::Active
            && !(poll.is_active && poll.end_date.is_none_or(|end| end > now))
        {
            return false;
        }
        if self.category.is_some_and(|category| category != poll.category) {
            return false;
        }
        if let Some(needle) = self.search.as_deref() {
            let needle = needle.to_lowercase();
            let in_title = poll.title.to_lowercase().contains(&needle);
            let in_description = poll
                .description
                .as_deref()
                .is_some_and(|d| d.to_lowercase().contains(&needle));
            if !in_title && !in_description {
                return false;
            }
        }
        true
    }
}
