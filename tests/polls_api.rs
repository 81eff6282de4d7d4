mod common;

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{Method, StatusCode};
use chrono::{DateTime, Utc};
use common::{setup_app, setup_app_with};
use live_polls::auth::Role;
use live_polls::db::{
    CastOutcome, MemoryStore, NewPoll, NewVote, Page, PageRequest, Poll, PollPatch, PollQuery,
    Requester, RetractOutcome, Vote, VoteStore,
};
use live_polls::error::PollError;
use serde_json::json;
use uuid::Uuid;

/// Polls work, but every ledger lookup fails.
struct LedgerDown(Arc<MemoryStore>);

#[async_trait]
impl VoteStore for LedgerDown {
    async fn create_poll(&self, poll: NewPoll, now: DateTime<Utc>) -> Result<Poll, PollError> {
        self.0.create_poll(poll, now).await
    }

    async fn get_poll(&self, poll_id: Uuid) -> Result<Option<Poll>, PollError> {
        self.0.get_poll(poll_id).await
    }

    async fn list_polls(&self, query: &PollQuery, now: DateTime<Utc>) -> Result<Page<Poll>, PollError> {
        self.0.list_polls(query, now).await
    }

    async fn update_poll(
        &self,
        poll_id: Uuid,
        patch: PollPatch,
        now: DateTime<Utc>,
    ) -> Result<Poll, PollError> {
        self.0.update_poll(poll_id, patch, now).await
    }

    async fn delete_poll(&self, poll_id: Uuid) -> Result<bool, PollError> {
        self.0.delete_poll(poll_id).await
    }

    async fn cast_vote(&self, vote: NewVote, now: DateTime<Utc>) -> Result<CastOutcome, PollError> {
        self.0.cast_vote(vote, now).await
    }

    async fn retract_vote(
        &self,
        vote_id: Uuid,
        requester: Requester,
        now: DateTime<Utc>,
    ) -> Result<RetractOutcome, PollError> {
        self.0.retract_vote(vote_id, requester, now).await
    }

    async fn get_vote(&self, vote_id: Uuid) -> Result<Option<Vote>, PollError> {
        self.0.get_vote(vote_id).await
    }

    async fn existing_vote(&self, _poll_id: Uuid, _user_id: Uuid) -> Result<Option<Vote>, PollError> {
        Err(PollError::ServiceUnavailable("ledger offline".into()))
    }

    async fn votes_by_user(&self, user_id: Uuid, page: PageRequest) -> Result<Page<Vote>, PollError> {
        self.0.votes_by_user(user_id, page).await
    }

    async fn votes_for_poll(&self, poll_id: Uuid, page: PageRequest) -> Result<Page<Vote>, PollError> {
        self.0.votes_for_poll(poll_id, page).await
    }

    async fn health_check(&self) -> Result<String, PollError> {
        self.0.health_check().await
    }
}

#[tokio::test]
async fn create_reports_every_violation() {
    let app = setup_app();
    let token = app.token(Uuid::new_v4(), Role::User);

    let (status, body) = app
        .send(
            Method::POST,
            "/api/polls",
            Some(&token),
            Some(json!({
                "title": "",
                "options": ["only one"],
                "category": "gardening",
            })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let fields: Vec<&str> = body["violations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v["field"].as_str().unwrap())
        .collect();
    assert!(fields.contains(&"title"));
    assert!(fields.contains(&"options"));
    assert!(fields.contains(&"category"));
}

#[tokio::test]
async fn listing_filters_and_paginates() {
    let app = setup_app();
    let token = app.token(Uuid::new_v4(), Role::User);
    for _ in 0..3 {
        app.create_poll(&token, false).await;
    }
    app.send(
        Method::POST,
        "/api/polls",
        Some(&token),
        Some(json!({
            "title": "Hidden",
            "options": ["a", "b"],
            "isPublic": false,
        })),
    )
    .await;

    let (status, body) = app
        .send(Method::GET, "/api/polls?page=1&limit=2", None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["polls"].as_array().unwrap().len(), 2);
    assert_eq!(body["pagination"]["total"], 3);
    assert_eq!(body["pagination"]["pages"], 2);

    let (_, body) = app
        .send(Method::GET, "/api/polls?category=sports", None, None)
        .await;
    assert_eq!(body["pagination"]["total"], 0);

    let (_, body) = app
        .send(Method::GET, "/api/polls?search=EDITOR", None, None)
        .await;
    assert_eq!(body["pagination"]["total"], 3);

    let (_, body) = app.send(Method::GET, "/api/polls/mine", Some(&token), None).await;
    assert_eq!(body["pagination"]["total"], 4);
}

#[tokio::test]
async fn private_polls_are_hidden_from_strangers() {
    let app = setup_app();
    let owner_id = Uuid::new_v4();
    let owner = app.token(owner_id, Role::User);
    let (_, body) = app
        .send(
            Method::POST,
            "/api/polls",
            Some(&owner),
            Some(json!({ "title": "Secret", "options": ["x", "y"], "isPublic": false })),
        )
        .await;
    let uri = format!("/api/polls/{}", body["poll"]["id"].as_str().unwrap());

    let (status, _) = app.send(Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let stranger = app.token(Uuid::new_v4(), Role::User);
    let (status, _) = app.send(Method::GET, &uri, Some(&stranger), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.send(Method::GET, &uri, Some(&owner), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["poll"]["isCurrentlyActive"], true);
    assert_eq!(body["poll"]["hasVoted"], false);

    let admin = app.token(Uuid::new_v4(), Role::Admin);
    let (status, _) = app.send(Method::GET, &uri, Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn options_freeze_once_votes_exist() {
    let app = setup_app();
    let owner = app.token(Uuid::new_v4(), Role::User);
    let poll_id = app.create_poll(&owner, false).await;
    let uri = format!("/api/polls/{poll_id}");

    let (status, body) = app
        .send(
            Method::PATCH,
            &uri,
            Some(&owner),
            Some(json!({ "options": ["vim", "emacs", "nano"] })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["poll"]["options"].as_array().unwrap().len(), 3);

    let voter = app.token(Uuid::new_v4(), Role::User);
    app.send(
        Method::POST,
        "/api/votes",
        Some(&voter),
        Some(json!({ "pollId": poll_id, "optionIndex": 2 })),
    )
    .await;

    let (status, _) = app
        .send(Method::PATCH, &uri, Some(&owner), Some(json!({ "options": ["a", "b"] })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = app
        .send(Method::PATCH, &uri, Some(&owner), Some(json!({ "title": "Best text editor" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["poll"]["title"], "Best text editor");
    assert_eq!(body["poll"]["totalVotes"], 1);

    let (status, _) = app
        .send(Method::PATCH, &uri, Some(&voter), Some(json!({ "title": "Mine now" })))
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn closing_a_poll_blocks_votes() {
    let app = setup_app();
    let owner = app.token(Uuid::new_v4(), Role::User);
    let poll_id = app.create_poll(&owner, false).await;

    let (status, _) = app
        .send(
            Method::PATCH,
            &format!("/api/polls/{poll_id}"),
            Some(&owner),
            Some(json!({ "isActive": false })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let voter = app.token(Uuid::new_v4(), Role::User);
    let (status, body) = app
        .send(
            Method::POST,
            "/api/votes",
            Some(&voter),
            Some(json!({ "pollId": poll_id, "optionIndex": 0 })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Poll is not currently active");
}

#[tokio::test]
async fn delete_cascades_to_votes() {
    let app = setup_app();
    let owner = app.token(Uuid::new_v4(), Role::User);
    let poll_id = app.create_poll(&owner, false).await;
    let voter = app.token(Uuid::new_v4(), Role::User);
    let (_, body) = app
        .send(
            Method::POST,
            "/api/votes",
            Some(&voter),
            Some(json!({ "pollId": poll_id, "optionIndex": 0 })),
        )
        .await;
    let vote_id = body["vote"]["id"].as_str().unwrap().to_string();

    let uri = format!("/api/polls/{poll_id}");
    let (status, _) = app.send(Method::DELETE, &uri, Some(&voter), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app.send(Method::DELETE, &uri, Some(&owner), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = app.send(Method::GET, &uri, None, None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = app
        .send(Method::DELETE, &format!("/api/votes/{vote_id}"), Some(&voter), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_reports_storage() {
    let app = setup_app();
    let (status, body) = app.send(Method::GET, "/health", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn ledger_failure_is_not_reported_as_not_voted() {
    let app = setup_app_with(|store| Arc::new(LedgerDown(store)));
    let owner = app.token(Uuid::new_v4(), Role::User);
    let poll_id = app.create_poll(&owner, false).await;

    for uri in [format!("/api/polls/{poll_id}"), "/api/polls".to_string()] {
        let (status, body) = app.send(Method::GET, &uri, Some(&owner), None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "{uri}");
        assert_eq!(body["error"], "Service unavailable");
        assert!(!body.to_string().contains("ledger offline"));
    }

    // anonymous callers never touch the ledger
    let (status, body) = app
        .send(Method::GET, &format!("/api/polls/{poll_id}"), None, None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["poll"]["hasVoted"], false);
}

#[tokio::test]
async fn patch_null_clears_optional_fields() {
    let app = setup_app();
    let owner = app.token(Uuid::new_v4(), Role::User);
    let end_date = (Utc::now() + chrono::Duration::days(7)).to_rfc3339();

    let (status, body) = app
        .send(
            Method::POST,
            "/api/polls",
            Some(&owner),
            Some(json!({
                "title": "Lunch spot",
                "description": "Friday team lunch",
                "options": ["tacos", "ramen"],
                "endDate": end_date,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let uri = format!("/api/polls/{}", body["poll"]["id"].as_str().unwrap());

    let (status, body) = app
        .send(Method::PATCH, &uri, Some(&owner), Some(json!({ "title": "Lunch place" })))
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["poll"]["endDate"].is_string());
    assert_eq!(body["poll"]["description"], "Friday team lunch");

    let (status, body) = app
        .send(
            Method::PATCH,
            &uri,
            Some(&owner),
            Some(json!({ "endDate": null, "description": null })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["poll"]["endDate"].is_null());
    assert!(body["poll"]["description"].is_null());
    assert_eq!(body["poll"]["title"], "Lunch place");
}
