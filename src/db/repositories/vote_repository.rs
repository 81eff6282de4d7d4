use crate::db::connection::DbPool;
use crate::db::models::{NewVote, PageRequest, Requester, Vote, check_cast, check_retract};
use crate::db::repositories::poll_repository::{lock_poll, save_tallies};
use crate::db::store::{CastOutcome, RetractOutcome};
use crate::error::PollError;
use sqlx::types::chrono::{DateTime, Utc};
use sqlx::{Error, PgConnection, Row};
use tracing::warn;
use uuid::Uuid;

const VOTE_COLUMNS: &str =
    "id, poll_id, user_id, option_index, ip_address, user_agent, is_valid, created_at";

const UNIQUE_VIOLATION: &str = "23505";

/// Appends a ledger entry. `exclusive` marks entries of single-vote polls,
/// which the partial unique index limits to one valid entry per user.
pub async fn record(conn: &mut PgConnection, vote: &Vote, exclusive: bool) -> Result<(), PollError> {
    let inserted = sqlx::query(
        "INSERT INTO votes (id, poll_id, user_id, option_index, ip_address, user_agent, is_valid, \
         exclusive, created_at) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(vote.id)
    .bind(vote.poll_id)
    .bind(vote.user_id)
    .bind(vote.option_index)
    .bind(&vote.ip_address)
    .bind(&vote.user_agent)
    .bind(vote.is_valid)
    .bind(exclusive)
    .bind(vote.created_at)
    .execute(conn)
    .await;

    match inserted {
        Ok(_) => Ok(()),
        Err(Error::Database(db_err)) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            warn!(
                "duplicate vote rejected at write time for poll {} user {}",
                vote.poll_id, vote.user_id
            );
            Err(PollError::AlreadyVoted)
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn existing_vote(
    conn: &mut PgConnection,
    poll_id: Uuid,
    user_id: Uuid,
) -> Result<Option<Vote>, Error> {
    let sql = format!(
        "SELECT {VOTE_COLUMNS} FROM votes WHERE poll_id = $1 AND user_id = $2 AND is_valid \
         ORDER BY created_at DESC LIMIT 1"
    );
    sqlx::query_as::<_, Vote>(&sql)
        .bind(poll_id)
        .bind(user_id)
        .fetch_optional(conn)
        .await
}

pub async fn get_vote(conn: &mut PgConnection, vote_id: Uuid) -> Result<Option<Vote>, Error> {
    let sql = format!("SELECT {VOTE_COLUMNS} FROM votes WHERE id = $1");
    sqlx::query_as::<_, Vote>(&sql)
        .bind(vote_id)
        .fetch_optional(conn)
        .await
}

pub async fn remove(conn: &mut PgConnection, vote_id: Uuid) -> Result<bool, Error> {
    let result = sqlx::query("DELETE FROM votes WHERE id = $1")
        .bind(vote_id)
        .execute(conn)
        .await?;

    Ok(result.rows_affected() > 0)
}

async fn has_other_valid_vote(
    conn: &mut PgConnection,
    poll_id: Uuid,
    user_id: Uuid,
    except: Uuid,
) -> Result<bool, Error> {
    let row = sqlx::query(
        "SELECT EXISTS (SELECT 1 FROM votes WHERE poll_id = $1 AND user_id = $2 AND id <> $3 \
         AND is_valid)",
    )
    .bind(poll_id)
    .bind(user_id)
    .bind(except)
    .fetch_one(conn)
    .await?;

    Ok(row.get(0))
}

pub async fn votes_by_user(
    pool: &DbPool,
    user_id: Uuid,
    page: PageRequest,
) -> Result<(Vec<Vote>, u64), Error> {
    list_votes(pool, "user_id", user_id, page).await
}

pub async fn votes_for_poll(
    pool: &DbPool,
    poll_id: Uuid,
    page: PageRequest,
) -> Result<(Vec<Vote>, u64), Error> {
    list_votes(pool, "poll_id", poll_id, page).await
}

async fn list_votes(
    pool: &DbPool,
    column: &'static str,
    id: Uuid,
    page: PageRequest,
) -> Result<(Vec<Vote>, u64), Error> {
    let total: i64 = sqlx::query(&format!("SELECT COUNT(*) FROM votes WHERE {column} = $1"))
        .bind(id)
        .fetch_one(pool)
        .await?
        .get(0);

    let sql = format!(
        "SELECT {VOTE_COLUMNS} FROM votes WHERE {column} = $1 \
         ORDER BY created_at DESC LIMIT $2 OFFSET $3"
    );
    let votes = sqlx::query_as::<_, Vote>(&sql)
        .bind(id)
        .bind(i64::from(page.limit))
        .bind(page.offset() as i64)
        .fetch_all(pool)
        .await?;

    Ok((votes, total.max(0) as u64))
}

/// Check, ledger write and tally update in one transaction, serialised per
/// poll by the row lock. Any early return drops `tx`, which rolls back.
pub async fn cast_vote(
    pool: &DbPool,
    new_vote: NewVote,
    now: DateTime<Utc>,
) -> Result<CastOutcome, PollError> {
    let mut tx = pool.begin().await?;

    let mut poll = lock_poll(&mut tx, new_vote.poll_id)
        .await?
        .ok_or(PollError::NotFound("Poll"))?;

    let prior = existing_vote(&mut tx, poll.id, new_vote.user_id).await?;
    let first_vote = prior.is_none();
    let slot = check_cast(&poll, new_vote.option_index, prior.as_ref(), now)?;

    let vote = Vote {
        id: Uuid::new_v4(),
        poll_id: poll.id,
        user_id: new_vote.user_id,
        option_index: slot as i32,
        ip_address: new_vote.metadata.ip_address,
        user_agent: new_vote.metadata.user_agent,
        is_valid: true,
        created_at: now,
    };
    record(&mut tx, &vote, !poll.allow_multiple_votes).await?;

    poll.increment_option(slot, vote.voter(), first_vote)?;
    poll.updated_at = now;
    save_tallies(&mut tx, &poll, slot).await?;

    tx.commit().await?;
    Ok(CastOutcome { vote, poll })
}

pub async fn retract_vote(
    pool: &DbPool,
    vote_id: Uuid,
    requester: Requester,
    now: DateTime<Utc>,
) -> Result<RetractOutcome, PollError> {
    let mut tx = pool.begin().await?;

    let poll_id = get_vote(&mut tx, vote_id)
        .await?
        .ok_or(PollError::NotFound("Vote"))?
        .poll_id;
    let mut poll = lock_poll(&mut tx, poll_id)
        .await?
        .ok_or(PollError::NotFound("Poll"))?;
    // Re-read under the poll lock: a concurrent retraction may have removed it.
    let vote = get_vote(&mut tx, vote_id)
        .await?
        .ok_or(PollError::NotFound("Vote"))?;

    let slot = check_retract(&poll, &vote, &requester, now)?;
    let last_vote = !has_other_valid_vote(&mut tx, poll.id, vote.user_id, vote.id).await?;

    poll.decrement_option(slot, &vote.voter(), last_vote)?;
    poll.updated_at = now;
    save_tallies(&mut tx, &poll, slot).await?;
    remove(&mut tx, vote.id).await?;

    tx.commit().await?;
    Ok(RetractOutcome { vote, poll })
}
