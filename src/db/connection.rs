use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::info;

pub type DbPool = Pool<Postgres>;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS polls (
        id UUID PRIMARY KEY,
        title VARCHAR(200) NOT NULL,
        description VARCHAR(1000),
        creator_id UUID NOT NULL,
        is_active BOOLEAN NOT NULL DEFAULT TRUE,
        is_public BOOLEAN NOT NULL DEFAULT TRUE,
        allow_multiple_votes BOOLEAN NOT NULL DEFAULT FALSE,
        start_date TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP,
        end_date TIMESTAMP WITH TIME ZONE,
        total_votes BIGINT NOT NULL DEFAULT 0 CHECK (total_votes >= 0),
        unique_voters BIGINT NOT NULL DEFAULT 0 CHECK (unique_voters >= 0),
        category VARCHAR(32) NOT NULL DEFAULT 'general',
        tags TEXT[] NOT NULL DEFAULT '{}',
        version BIGINT NOT NULL DEFAULT 0,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP,
        updated_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP,
        CHECK (end_date IS NULL OR end_date > start_date)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS poll_options (
        poll_id UUID NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
        position INT NOT NULL,
        option_text VARCHAR(200) NOT NULL,
        votes BIGINT NOT NULL DEFAULT 0 CHECK (votes >= 0),
        PRIMARY KEY (poll_id, position)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS votes (
        id UUID PRIMARY KEY,
        poll_id UUID NOT NULL REFERENCES polls(id) ON DELETE CASCADE,
        user_id UUID NOT NULL,
        option_index INT NOT NULL CHECK (option_index >= 0),
        ip_address VARCHAR(64) NOT NULL,
        user_agent TEXT NOT NULL DEFAULT '',
        is_valid BOOLEAN NOT NULL DEFAULT TRUE,
        exclusive BOOLEAN NOT NULL DEFAULT TRUE,
        created_at TIMESTAMP WITH TIME ZONE NOT NULL DEFAULT CURRENT_TIMESTAMP
    )
    "#,
    // At most one counted vote per (poll, user) on single-vote polls.
    r#"
    CREATE UNIQUE INDEX IF NOT EXISTS idx_votes_single_active
        ON votes(poll_id, user_id) WHERE is_valid AND exclusive
    "#,
    "CREATE INDEX IF NOT EXISTS idx_polls_creator_id ON polls(creator_id)",
    "CREATE INDEX IF NOT EXISTS idx_polls_listing ON polls(is_active, is_public, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_polls_category ON polls(category)",
    "CREATE INDEX IF NOT EXISTS idx_polls_end_date ON polls(end_date)",
    "CREATE INDEX IF NOT EXISTS idx_votes_poll_created ON votes(poll_id, created_at DESC)",
    "CREATE INDEX IF NOT EXISTS idx_votes_user_created ON votes(user_id, created_at DESC)",
];

pub async fn init_db(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(Duration::from_secs(5))
        .max_lifetime(Duration::from_secs(30 * 60))
        .idle_timeout(Duration::from_secs(10 * 60))
        .test_before_acquire(true)
        .connect(database_url)
        .await?;

    for statement in SCHEMA {
        sqlx::query(statement).execute(&pool).await?;
    }

    info!("database schema ready ({})", get_pool_stats(&pool));
    Ok(pool)
}

pub fn get_pool_stats(pool: &DbPool) -> String {
    let size = pool.size() as usize;
    let num_idle = pool.num_idle();
    format!(
        "Pool stats: size={}, idle={}, in_use={}",
        size,
        num_idle,
        size.saturating_sub(num_idle)
    )
}

/// Round-trips a trivial query through the pool.
pub async fn ping(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;
    Ok(())
}
