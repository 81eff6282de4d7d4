use crate::db::connection::DbPool;
use crate::db::models::{Poll, PollOption, PollPatch, PollQuery, PollStatus, Voter};
use crate::error::PollError;
use sqlx::types::chrono::{DateTime, Utc};
use sqlx::{Error, PgConnection, Postgres, QueryBuilder, Row};
use uuid::Uuid;

const POLL_COLUMNS: &str = "id, title, description, creator_id, is_active, is_public, \
    allow_multiple_votes, start_date, end_date, total_votes, unique_voters, category, tags, \
    version, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct PollRow {
    id: Uuid,
    title: String,
    description: Option<String>,
    creator_id: Uuid,
    is_active: bool,
    is_public: bool,
    allow_multiple_votes: bool,
    start_date: DateTime<Utc>,
    end_date: Option<DateTime<Utc>>,
    total_votes: i64,
    unique_voters: i64,
    category: String,
    tags: Vec<String>,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PollRow {
    fn into_poll(self, options: Vec<PollOption>) -> Poll {
        Poll {
            id: self.id,
            title: self.title,
            description: self.description,
            options,
            creator_id: self.creator_id,
            is_active: self.is_active,
            is_public: self.is_public,
            allow_multiple_votes: self.allow_multiple_votes,
            start_date: self.start_date,
            end_date: self.end_date,
            total_votes: self.total_votes,
            unique_voters: self.unique_voters,
            category: self.category.parse().unwrap_or_default(),
            tags: self.tags,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

pub async fn create_poll(pool: &DbPool, poll: &Poll) -> Result<(), Error> {
    let mut tx = pool.begin().await?;

    sqlx::query(
        "INSERT INTO polls (id, title, description, creator_id, is_active, is_public, \
         allow_multiple_votes, start_date, end_date, total_votes, unique_voters, category, tags, \
         version, created_at, updated_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)",
    )
    .bind(poll.id)
    .bind(&poll.title)
    .bind(&poll.description)
    .bind(poll.creator_id)
    .bind(poll.is_active)
    .bind(poll.is_public)
    .bind(poll.allow_multiple_votes)
    .bind(poll.start_date)
    .bind(poll.end_date)
    .bind(poll.total_votes)
    .bind(poll.unique_voters)
    .bind(poll.category.as_str())
    .bind(&poll.tags)
    .bind(poll.version)
    .bind(poll.created_at)
    .bind(poll.updated_at)
    .execute(&mut *tx)
    .await?;

    insert_options(&mut tx, poll.id, &poll.options).await?;

    tx.commit().await?;
    Ok(())
}

async fn insert_options(
    conn: &mut PgConnection,
    poll_id: Uuid,
    options: &[PollOption],
) -> Result<(), Error> {
    for (position, option) in options.iter().enumerate() {
        sqlx::query(
            "INSERT INTO poll_options (poll_id, position, option_text, votes) VALUES ($1, $2, $3, $4)",
        )
        .bind(poll_id)
        .bind(position as i32)
        .bind(&option.text)
        .bind(option.votes)
        .execute(&mut *conn)
        .await?;
    }
    Ok(())
}

pub async fn get_poll(conn: &mut PgConnection, poll_id: Uuid) -> Result<Option<Poll>, Error> {
    fetch_poll(conn, poll_id, false).await
}

/// Loads the poll holding its row lock until the transaction ends. Every
/// tally change on a poll serialises on this lock.
pub async fn lock_poll(conn: &mut PgConnection, poll_id: Uuid) -> Result<Option<Poll>, Error> {
    fetch_poll(conn, poll_id, true).await
}

async fn fetch_poll(
    conn: &mut PgConnection,
    poll_id: Uuid,
    for_update: bool,
) -> Result<Option<Poll>, Error> {
    let sql = format!(
        "SELECT {POLL_COLUMNS} FROM polls WHERE id = $1{}",
        if for_update { " FOR UPDATE" } else { "" }
    );
    let row = sqlx::query_as::<_, PollRow>(&sql)
        .bind(poll_id)
        .fetch_optional(&mut *conn)
        .await?;

    match row {
        Some(row) => {
            let options = get_poll_options(conn, poll_id).await?;
            Ok(Some(row.into_poll(options)))
        }
        None => Ok(None),
    }
}

/// Options in display order, with their voters taken from the valid ledger
/// entries.
pub async fn get_poll_options(conn: &mut PgConnection, poll_id: Uuid) -> Result<Vec<PollOption>, Error> {
    let rows = sqlx::query(
        "SELECT position, option_text, votes FROM poll_options WHERE poll_id = $1 ORDER BY position",
    )
    .bind(poll_id)
    .fetch_all(&mut *conn)
    .await?;

    let mut options: Vec<PollOption> = rows
        .into_iter()
        .map(|r| PollOption {
            text: r.get("option_text"),
            votes: r.get("votes"),
            voters: Vec::new(),
        })
        .collect();

    let voters = sqlx::query(
        "SELECT option_index, user_id, created_at FROM votes \
         WHERE poll_id = $1 AND is_valid ORDER BY created_at",
    )
    .bind(poll_id)
    .fetch_all(&mut *conn)
    .await?;

    for row in voters {
        let index: i32 = row.get("option_index");
        if let Some(option) = usize::try_from(index).ok().and_then(|i| options.get_mut(i)) {
            option.voters.push(Voter {
                user_id: row.get("user_id"),
                voted_at: row.get("created_at"),
            });
        }
    }

    Ok(options)
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, query: &PollQuery, now: DateTime<Utc>) {
    builder.push(" WHERE TRUE");
    if query.public_only {
        builder.push(" AND is_public");
    }
    if let Some(creator_id) = query.creator_id {
        builder.push(" AND creator_id = ").push_bind(creator_id);
    }
    if query.status == PollStatus::Active {
        builder
            .push(" AND is_active AND (end_date IS NULL OR end_date > ")
            .push_bind(now)
            .push(")");
    }
    if let Some(category) = query.category {
        builder.push(" AND category = ").push_bind(category.as_str());
    }
    if let Some(search) = query.search.as_deref() {
        let pattern = format!("%{}%", escape_like(search));
        builder
            .push(" AND (title ILIKE ")
            .push_bind(pattern.clone())
            .push(" OR description ILIKE ")
            .push_bind(pattern)
            .push(")");
    }
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

pub async fn list_polls(
    pool: &DbPool,
    query: &PollQuery,
    now: DateTime<Utc>,
) -> Result<(Vec<Poll>, u64), Error> {
    let mut count = QueryBuilder::new("SELECT COUNT(*) FROM polls");
    push_filters(&mut count, query, now);
    let total: i64 = count.build().fetch_one(pool).await?.get(0);

    let mut select = QueryBuilder::new(format!("SELECT {POLL_COLUMNS} FROM polls"));
    push_filters(&mut select, query, now);
    select
        .push(" ORDER BY created_at DESC LIMIT ")
        .push_bind(i64::from(query.page.limit))
        .push(" OFFSET ")
        .push_bind(query.page.offset() as i64);
    let rows = select.build_query_as::<PollRow>().fetch_all(pool).await?;

    let mut conn = pool.acquire().await?;
    let mut polls = Vec::with_capacity(rows.len());
    for row in rows {
        let options = get_poll_options(&mut conn, row.id).await?;
        polls.push(row.into_poll(options));
    }

    Ok((polls, total.max(0) as u64))
}

/// Writes the counters of one option plus the poll totals.
pub async fn save_tallies(conn: &mut PgConnection, poll: &Poll, slot: usize) -> Result<(), Error> {
    let option = poll.options.get(slot).ok_or(Error::RowNotFound)?;

    sqlx::query("UPDATE poll_options SET votes = $3 WHERE poll_id = $1 AND position = $2")
        .bind(poll.id)
        .bind(slot as i32)
        .bind(option.votes)
        .execute(&mut *conn)
        .await?;

    sqlx::query(
        "UPDATE polls SET total_votes = $2, unique_voters = $3, version = $4, updated_at = $5 \
         WHERE id = $1",
    )
    .bind(poll.id)
    .bind(poll.total_votes)
    .bind(poll.unique_voters)
    .bind(poll.version)
    .bind(poll.updated_at)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

pub async fn update_poll(
    pool: &DbPool,
    poll_id: Uuid,
    patch: PollPatch,
    now: DateTime<Utc>,
) -> Result<Poll, PollError> {
    let mut tx = pool.begin().await?;

    let mut poll = lock_poll(&mut tx, poll_id)
        .await?
        .ok_or(PollError::NotFound("Poll"))?;
    let replace_options = patch.options.is_some();
    poll.apply_patch(patch, now)?;

    sqlx::query(
        "UPDATE polls SET title = $2, description = $3, is_active = $4, is_public = $5, \
         allow_multiple_votes = $6, end_date = $7, category = $8, tags = $9, updated_at = $10 \
         WHERE id = $1",
    )
    .bind(poll.id)
    .bind(&poll.title)
    .bind(&poll.description)
    .bind(poll.is_active)
    .bind(poll.is_public)
    .bind(poll.allow_multiple_votes)
    .bind(poll.end_date)
    .bind(poll.category.as_str())
    .bind(&poll.tags)
    .bind(poll.updated_at)
    .execute(&mut *tx)
    .await?;

    if replace_options {
        sqlx::query("DELETE FROM poll_options WHERE poll_id = $1")
            .bind(poll.id)
            .execute(&mut *tx)
            .await?;
        insert_options(&mut tx, poll.id, &poll.options).await?;
    }

    tx.commit().await?;
    Ok(poll)
}

/// Deletes the poll; options and votes go with it through the cascades.
pub async fn delete_poll(pool: &DbPool, poll_id: Uuid) -> Result<bool, Error> {
    let result = sqlx::query("DELETE FROM polls WHERE id = $1")
        .bind(poll_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected() > 0)
}
