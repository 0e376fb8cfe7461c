use sqlx::PgPool;

use crate::config::PostgresConfig;

/// Run database migrations, creating the sends table if it does not exist.
///
/// # Errors
///
/// Returns a [`sqlx::Error`] if any DDL statement fails.
pub async fn run_migrations(pool: &PgPool, config: &PostgresConfig) -> Result<(), sqlx::Error> {
    let sends_table = config.sends_table();

    // `blob_key` is UNIQUE: a blob is owned by exactly one record.
    let create_sends = format!(
        "CREATE TABLE IF NOT EXISTS {sends_table} (
            id TEXT PRIMARY KEY,
            blob_key TEXT NOT NULL UNIQUE,
            kind TEXT NOT NULL DEFAULT 'file',
            filename TEXT,
            content_type TEXT,
            password_hash TEXT,
            size_bytes BIGINT NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL,
            last_claimed_at TIMESTAMPTZ,
            expires_at TIMESTAMPTZ NOT NULL,
            max_downloads INTEGER NOT NULL CHECK (max_downloads > 0),
            downloads_remaining INTEGER NOT NULL
                CHECK (downloads_remaining >= 0 AND downloads_remaining <= max_downloads),
            state TEXT NOT NULL
                CHECK (state IN ('active', 'exhausted', 'expired', 'deleted'))
        )"
    );

    // Serves the sweeper's candidate scans.
    let create_state_expiry_idx = format!(
        "CREATE INDEX IF NOT EXISTS {} ON {sends_table} (state, expires_at)",
        config.index_name("state_expires_at")
    );

    sqlx::query(&format!("CREATE SCHEMA IF NOT EXISTS {}", config.schema))
        .execute(pool)
        .await?;
    sqlx::query(&create_sends).execute(pool).await?;
    sqlx::query(&create_state_expiry_idx).execute(pool).await?;

    Ok(())
}
