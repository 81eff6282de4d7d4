//! Field validation for poll and vote payloads.
//!
//! Every check records its violation and keeps going, so a caller gets the
//! complete list of problems in one response.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::db::models::{Category, NewPoll, Poll, PollPatch};
use crate::polls::{CreatePollRequest, OptionInput, UpdatePollRequest};
use crate::votes::CastVoteRequest;

pub const TITLE_MAX_CHARS: usize = 200;
pub const DESCRIPTION_MAX_CHARS: usize = 1000;
pub const OPTION_TEXT_MAX_CHARS: usize = 200;
pub const MIN_OPTIONS: usize = 2;
pub const MAX_OPTIONS: usize = 10;
pub const TAG_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldViolation {
    pub field: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationErrors(Vec<FieldViolation>);

impl ValidationErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut errors = Self::new();
        errors.add(field, message);
        errors
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldViolation {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn violations(&self) -> &[FieldViolation] {
        &self.0
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.0.iter().any(|v| v.field == field)
    }

    /// Returns `value` when nothing was recorded, otherwise every violation.
    pub fn finish<T>(self, value: T) -> Result<T, ValidationErrors> {
        if self.is_empty() { Ok(value) } else { Err(self) }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|v| format!("{}: {}", v.field, v.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

pub fn validate_new_poll(
    req: CreatePollRequest,
    creator_id: Uuid,
    now: DateTime<Utc>,
) -> Result<NewPoll, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    let title = check_title(req.title.as_deref(), &mut errors);
    let description = check_description(req.description.as_deref(), &mut errors);
    let options = check_options(req.options, &mut errors);
    let start_date = req.start_date.unwrap_or(now);
    check_window(start_date, req.end_date, &mut errors);
    let category = check_category(req.category.as_deref(), &mut errors);
    let tags = check_tags(req.tags, &mut errors);

    errors.finish(NewPoll {
        title,
        description,
        options,
        creator_id,
        is_public: req.is_public.unwrap_or(true),
        allow_multiple_votes: req.allow_multiple_votes.unwrap_or(false),
        start_date,
        end_date: req.end_date,
        category,
        tags,
    })
}

/// Field-level checks for a partial update. Cross-field rules (the voting
/// window, option edits after votes) are checked against the stored poll.
pub fn validate_poll_patch(req: UpdatePollRequest) -> Result<PollPatch, ValidationErrors> {
    let mut errors = ValidationErrors::new();

    let title = req
        .title
        .as_deref()
        .map(|title| check_title(Some(title), &mut errors));
    let description = req
        .description
        .map(|description| check_description(description.as_deref(), &mut errors));
    let options = req.options.map(|options| check_options(options, &mut errors));
    let category = req
        .category
        .as_deref()
        .map(|category| check_category(Some(category), &mut errors));
    let tags = req.tags.map(|tags| check_tags(tags, &mut errors));

    errors.finish(PollPatch {
        title,
        description,
        options,
        is_public: req.is_public,
        allow_multiple_votes: req.allow_multiple_votes,
        end_date: req.end_date,
        category,
        tags,
        is_active: req.is_active,
    })
}

/// Whole-record invariants that must hold after any metadata change.
pub fn validate_poll(poll: &Poll) -> Result<(), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    check_window(poll.start_date, poll.end_date, &mut errors);
    if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&poll.options.len()) {
        errors.add(
            "options",
            format!("Poll must have between {MIN_OPTIONS} and {MAX_OPTIONS} options"),
        );
    }
    errors.finish(())
}

pub fn validate_cast_request(req: &CastVoteRequest) -> Result<(Uuid, i64), ValidationErrors> {
    let mut errors = ValidationErrors::new();
    if req.poll_id.is_none() {
        errors.add("pollId", "Poll ID is required");
    }
    if req.option_index.is_none() {
        errors.add("optionIndex", "Option index is required");
    }
    match (req.poll_id, req.option_index) {
        (Some(poll_id), Some(option_index)) => errors.finish((poll_id, option_index)),
        _ => Err(errors),
    }
}

fn check_title(title: Option<&str>, errors: &mut ValidationErrors) -> String {
    let title = title.map(str::trim).unwrap_or_default();
    if title.is_empty() {
        errors.add("title", "Poll title is required");
    } else if title.chars().count() > TITLE_MAX_CHARS {
        errors.add(
            "title",
            format!("Poll title cannot exceed {TITLE_MAX_CHARS} characters"),
        );
    }
    title.to_string()
}

fn check_description(description: Option<&str>, errors: &mut ValidationErrors) -> Option<String> {
    let description = description.map(str::trim).filter(|d| !d.is_empty())?;
    if description.chars().count() > DESCRIPTION_MAX_CHARS {
        errors.add(
            "description",
            format!("Poll description cannot exceed {DESCRIPTION_MAX_CHARS} characters"),
        );
    }
    Some(description.to_string())
}

fn check_options(options: Vec<OptionInput>, errors: &mut ValidationErrors) -> Vec<String> {
    if !(MIN_OPTIONS..=MAX_OPTIONS).contains(&options.len()) {
        errors.add(
            "options",
            format!("Poll must have between {MIN_OPTIONS} and {MAX_OPTIONS} options"),
        );
    }

    options
        .into_iter()
        .enumerate()
        .map(|(index, option)| {
            let text = option.into_text().trim().to_string();
            if text.is_empty() {
                errors.add(format!("options[{index}]"), "Option text is required");
            } else if text.chars().count() > OPTION_TEXT_MAX_CHARS {
                errors.add(
                    format!("options[{index}]"),
                    format!("Option text cannot exceed {OPTION_TEXT_MAX_CHARS} characters"),
                );
            }
            text
        })
        .collect()
}

fn check_window(
    start_date: DateTime<Utc>,
    end_date: Option<DateTime<Utc>>,
    errors: &mut ValidationErrors,
) {
    if end_date.is_some_and(|end| end <= start_date) {
        errors.add("endDate", "End date must be after start date");
    }
}

fn check_category(category: Option<&str>, errors: &mut ValidationErrors) -> Category {
    match category {
        None => Category::default(),
        Some(raw) => raw.parse().unwrap_or_else(|_| {
            errors.add("category", format!("Unknown category '{raw}'"));
            Category::default()
        }),
    }
}

fn check_tags(tags: Vec<String>, errors: &mut ValidationErrors) -> Vec<String> {
    let mut cleaned: Vec<String> = Vec::with_capacity(tags.len());
    for (index, tag) in tags.into_iter().enumerate() {
        let tag = tag.trim();
        if tag.is_empty() {
            errors.add(format!("tags[{index}]"), "Tag cannot be empty");
        } else if tag.chars().count() > TAG_MAX_CHARS {
            errors.add(
                format!("tags[{index}]"),
                format!("Tag cannot exceed {TAG_MAX_CHARS} characters"),
            );
        } else if !cleaned.iter().any(|t| t == tag) {
            cleaned.push(tag.to_string());
        }
    }
    cleaned
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn request(options: &[&str]) -> CreatePollRequest {
        CreatePollRequest {
            title: Some("Best editor?".to_string()),
            description: None,
            options: options
                .iter()
                .map(|o| OptionInput::Text(o.to_string()))
                .collect(),
            is_public: None,
            allow_multiple_votes: None,
            start_date: None,
            end_date: None,
            category: None,
            tags: Vec::new(),
        }
    }

    #[test]
    fn accepts_minimal_poll_with_defaults() {
        let now = Utc::now();
        let poll = validate_new_poll(request(&["vim", "emacs"]), Uuid::new_v4(), now).unwrap();
        assert_eq!(poll.options, vec!["vim", "emacs"]);
        assert!(poll.is_public);
        assert!(!poll.allow_multiple_votes);
        assert_eq!(poll.start_date, now);
        assert_eq!(poll.category, Category::General);
    }

    #[test]
    fn reports_every_violation_at_once() {
        let mut req = request(&["only one"]);
        req.title = Some("   ".to_string());
        req.category = Some("gardening".to_string());
        req.tags = vec!["x".repeat(51)];
        let now = Utc::now();
        req.end_date = Some(now - Duration::hours(1));

        let errors = validate_new_poll(req, Uuid::new_v4(), now).unwrap_err();
        for field in ["title", "options", "category", "tags[0]", "endDate"] {
            assert!(errors.has_field(field), "missing violation for {field}: {errors}");
        }
        assert_eq!(errors.violations().len(), 5);
    }

    #[test]
    fn rejects_too_many_and_overlong_options() {
        let long = "o".repeat(201);
        let mut options: Vec<&str> = vec!["a"; 10];
        options.push(&long);
        let errors = validate_new_poll(request(&options), Uuid::new_v4(), Utc::now()).unwrap_err();
        assert!(errors.has_field("options"));
        assert!(errors.has_field("options[10]"));
    }

    #[test]
    fn tags_are_trimmed_and_deduplicated() {
        let mut req = request(&["a", "b"]);
        req.tags = vec![" rust ".to_string(), "rust".to_string(), "async".to_string()];
        let poll = validate_new_poll(req, Uuid::new_v4(), Utc::now()).unwrap();
        assert_eq!(poll.tags, vec!["rust", "async"]);
    }

    #[test]
    fn cast_request_lists_missing_fields() {
        let errors = validate_cast_request(&CastVoteRequest {
            poll_id: None,
            option_index: None,
        })
        .unwrap_err();
        assert!(errors.has_field("pollId"));
        assert!(errors.has_field("optionIndex"));
    }

    #[test]
    fn patch_validates_only_present_fields() {
        let patch = validate_poll_patch(UpdatePollRequest {
            title: Some("  Renamed ".to_string()),
            ..UpdatePollRequest::default()
        })
        .unwrap();
        assert_eq!(patch.title.as_deref(), Some("Renamed"));
        assert!(patch.options.is_none());

        let errors = validate_poll_patch(UpdatePollRequest {
            category: Some("nope".to_string()),
            ..UpdatePollRequest::default()
        })
        .unwrap_err();
        assert!(errors.has_field("category"));
    }
}
