use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use ephemera_core::{
    BlobKey, SendCondition, SendFilter, SendId, SendKind, SendMutation, SendRecord, SendState,
};
use ephemera_store::error::RepositoryError;
use ephemera_store::repository::SendRepository;

use crate::config::PostgresConfig;
use crate::migrations;

const COLUMNS: &str = "id, blob_key, kind, filename, content_type, password_hash, size_bytes, \
                       created_at, last_claimed_at, expires_at, max_downloads, \
                       downloads_remaining, state";

/// Build `PgConnectOptions` from a [`PostgresConfig`], applying SSL settings
/// when configured.
fn build_connect_options(
    config: &PostgresConfig,
) -> Result<sqlx::postgres::PgConnectOptions, RepositoryError> {
    let mut options: sqlx::postgres::PgConnectOptions = config
        .url
        .parse()
        .map_err(|e: sqlx::Error| RepositoryError::Connection(e.to_string()))?;

    if let Some(ref mode) = config.ssl_mode {
        let ssl_mode = match mode.as_str() {
            "disable" => sqlx::postgres::PgSslMode::Disable,
            "allow" => sqlx::postgres::PgSslMode::Allow,
            "prefer" => sqlx::postgres::PgSslMode::Prefer,
            "require" => sqlx::postgres::PgSslMode::Require,
            "verify-ca" => sqlx::postgres::PgSslMode::VerifyCa,
            "verify-full" => sqlx::postgres::PgSslMode::VerifyFull,
            other => {
                return Err(RepositoryError::Connection(format!(
                    "unknown ssl_mode: {other}"
                )));
            }
        };
        options = options.ssl_mode(ssl_mode);
    }

    if let Some(ref path) = config.ssl_root_cert {
        options = options.ssl_root_cert(path);
    }

    Ok(options)
}

fn backend(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Backend(e.to_string())
}

/// Raw row as stored in the sends table.
#[derive(sqlx::FromRow)]
struct SendRow {
    id: String,
    blob_key: String,
    kind: String,
    filename: Option<String>,
    content_type: Option<String>,
    password_hash: Option<String>,
    size_bytes: i64,
    created_at: DateTime<Utc>,
    last_claimed_at: Option<DateTime<Utc>>,
    expires_at: DateTime<Utc>,
    max_downloads: i32,
    downloads_remaining: i32,
    state: String,
}

impl TryFrom<SendRow> for SendRecord {
    type Error = RepositoryError;

    fn try_from(row: SendRow) -> Result<Self, Self::Error> {
        let serde_err = |e: &dyn std::fmt::Display| RepositoryError::Serialization(e.to_string());
        Ok(Self {
            id: SendId::new(row.id),
            blob_key: BlobKey::new(row.blob_key),
            kind: row.kind.parse::<SendKind>().map_err(|e| serde_err(&e))?,
            filename: row.filename,
            content_type: row.content_type,
            password_hash: row.password_hash,
            size_bytes: u64::try_from(row.size_bytes).map_err(|e| serde_err(&e))?,
            created_at: row.created_at,
            last_claimed_at: row.last_claimed_at,
            expires_at: row.expires_at,
            max_downloads: u32::try_from(row.max_downloads).map_err(|e| serde_err(&e))?,
            downloads_remaining: u32::try_from(row.downloads_remaining)
                .map_err(|e| serde_err(&e))?,
            state: row.state.parse::<SendState>().map_err(|e| serde_err(&e))?,
        })
    }
}

fn to_i32(value: u32, field: &str) -> Result<i32, RepositoryError> {
    i32::try_from(value)
        .map_err(|_| RepositoryError::Serialization(format!("{field} out of range: {value}")))
}

/// PostgreSQL-backed implementation of [`SendRepository`].
///
/// `conditional_update` is a single `UPDATE ... WHERE <predicate> RETURNING`
/// statement. Under `READ COMMITTED`, a concurrent writer on the same row
/// blocks until the first commits and then re-checks the predicate against
/// the new row version, so two claims can never both take the last slot.
pub struct PostgresSendRepository {
    pool: PgPool,
    config: Arc<PostgresConfig>,
}

impl PostgresSendRepository {
    /// Connect, create the pool, and run migrations.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Connection`] if the config is invalid or
    /// pool creation fails, or [`RepositoryError::Backend`] if migrations fail.
    pub async fn new(config: PostgresConfig) -> Result<Self, RepositoryError> {
        config.validate()?;
        let connect_options = build_connect_options(&config)?;
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect_with(connect_options)
            .await
            .map_err(|e| RepositoryError::Connection(e.to_string()))?;

        Self::from_pool(pool, config).await
    }

    /// Create a repository from an existing pool. Runs migrations.
    ///
    /// # Errors
    ///
    /// Returns [`RepositoryError::Backend`] if migrations fail.
    pub async fn from_pool(pool: PgPool, config: PostgresConfig) -> Result<Self, RepositoryError> {
        config.validate()?;
        migrations::run_migrations(&pool, &config)
            .await
            .map_err(backend)?;

        tracing::info!(table = %config.sends_table(), "postgres send repository ready");

        Ok(Self {
            pool,
            config: Arc::new(config),
        })
    }

    /// Build the `SET` clause for a mutation. `$5` is the claim timestamp
    /// for a consume and the target state for a transition.
    fn set_clause(mutation: SendMutation) -> &'static str {
        match mutation {
            SendMutation::ConsumeDownload { .. } => {
                "downloads_remaining = downloads_remaining - 1, \
                 last_claimed_at = $5, \
                 state = CASE WHEN downloads_remaining - 1 = 0 \
                         THEN 'exhausted' ELSE state END"
            }
            SendMutation::Transition(_) => "state = $5",
        }
    }
}

#[async_trait]
impl SendRepository for PostgresSendRepository {
    async fn insert(&self, record: &SendRecord) -> Result<(), RepositoryError> {
        let table = self.config.sends_table();
        let query = format!(
            "INSERT INTO {table} ({COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
             ON CONFLICT (id) DO NOTHING"
        );

        let size_bytes = i64::try_from(record.size_bytes)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        let result = sqlx::query(&query)
            .bind(record.id.as_str())
            .bind(record.blob_key.as_str())
            .bind(record.kind.as_str())
            .bind(record.filename.as_deref())
            .bind(record.content_type.as_deref())
            .bind(record.password_hash.as_deref())
            .bind(size_bytes)
            .bind(record.created_at)
            .bind(record.last_claimed_at)
            .bind(record.expires_at)
            .bind(to_i32(record.max_downloads, "max_downloads")?)
            .bind(to_i32(record.downloads_remaining, "downloads_remaining")?)
            .bind(record.state.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::DuplicateId(record.id.to_string()));
        }
        Ok(())
    }

    async fn get(&self, id: &SendId) -> Result<Option<SendRecord>, RepositoryError> {
        let table = self.config.sends_table();
        let query = format!("SELECT {COLUMNS} FROM {table} WHERE id = $1");

        let row: Option<SendRow> = sqlx::query_as(&query)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        row.map(SendRecord::try_from).transpose()
    }

    async fn conditional_update(
        &self,
        id: &SendId,
        condition: &SendCondition,
        mutation: SendMutation,
    ) -> Result<Option<SendRecord>, RepositoryError> {
        mutation.validate()?;

        // Intersect the caller's expected states with the mutation's legal
        // source states so illegal edges affect zero rows.
        let states: Vec<String> = condition
            .states
            .iter()
            .filter(|s| mutation.applicable_states().contains(s))
            .map(|s| s.as_str().to_owned())
            .collect();
        if states.is_empty() {
            return Ok(None);
        }

        let downloads_floor = condition
            .downloads_remaining_above
            .map(|n| to_i32(n, "downloads_remaining_above"))
            .transpose()?;
        let table = self.config.sends_table();
        let set_clause = Self::set_clause(mutation);
        let query = format!(
            "UPDATE {table} SET {set_clause} \
             WHERE id = $1 \
               AND state = ANY($2) \
               AND ($3::INTEGER IS NULL OR downloads_remaining > $3) \
               AND ($4::TIMESTAMPTZ IS NULL OR expires_at > $4) \
             RETURNING {COLUMNS}"
        );

        let stmt = sqlx::query_as::<_, SendRow>(&query)
            .bind(id.as_str())
            .bind(&states)
            .bind(downloads_floor)
            .bind(condition.expires_after);
        let stmt = match mutation {
            SendMutation::ConsumeDownload { at } => stmt.bind(at),
            SendMutation::Transition(target) => stmt.bind(target.as_str()),
        };

        let row = stmt.fetch_optional(&self.pool).await.map_err(backend)?;
        row.map(SendRecord::try_from).transpose()
    }

    async fn query(&self, filter: &SendFilter) -> Result<Vec<SendRecord>, RepositoryError> {
        let table = self.config.sends_table();
        let query = format!(
            "SELECT {COLUMNS} FROM {table} \
             WHERE (cardinality($1::TEXT[]) = 0 OR state = ANY($1)) \
               AND ($2::TIMESTAMPTZ IS NULL OR expires_at <= $2) \
               AND ($4::TIMESTAMPTZ IS NULL OR (expires_at, id) > ($4, $5)) \
             ORDER BY expires_at, id \
             LIMIT $3"
        );

        let states: Vec<String> = filter
            .states
            .iter()
            .map(|s| s.as_str().to_owned())
            .collect();
        let limit = filter
            .limit
            .map(|n| i64::try_from(n).unwrap_or(i64::MAX));

        let rows: Vec<SendRow> = sqlx::query_as(&query)
            .bind(&states)
            .bind(filter.expires_at_or_before)
            .bind(limit)
            .bind(filter.after.as_ref().map(|(at, _)| *at))
            .bind(filter.after.as_ref().map(|(_, id)| id.as_str()))
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        rows.into_iter().map(SendRecord::try_from).collect()
    }

    async fn remove(&self, id: &SendId) -> Result<bool, RepositoryError> {
        let table = self.config.sends_table();
        let query = format!("DELETE FROM {table} WHERE id = $1");

        let result = sqlx::query(&query)
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend)?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consume_sets_exhausted_when_last() {
        let clause =
            PostgresSendRepository::set_clause(SendMutation::ConsumeDownload { at: Utc::now() });
        assert!(clause.contains("downloads_remaining - 1"));
        assert!(clause.contains("last_claimed_at = $5"));
        assert!(clause.contains("'exhausted'"));
    }

    #[test]
    fn transition_binds_target_state() {
        let clause =
            PostgresSendRepository::set_clause(SendMutation::Transition(SendState::Expired));
        assert_eq!(clause, "state = $5");
    }

    #[test]
    fn every_documented_ssl_mode_is_accepted() {
        for mode in ["disable", "allow", "prefer", "require", "verify-ca", "verify-full"] {
            let config = PostgresConfig {
                ssl_mode: Some(mode.into()),
                ..PostgresConfig::default()
            };
            assert!(build_connect_options(&config).is_ok(), "{mode} should parse");
        }
    }

    #[test]
    fn bad_ssl_mode_is_a_connection_error() {
        let config = PostgresConfig {
            ssl_mode: Some("sometimes".into()),
            ..PostgresConfig::default()
        };
        let err = build_connect_options(&config).unwrap_err();
        assert!(matches!(err, RepositoryError::Connection(_)));
    }

    #[test]
    fn row_conversion_rejects_unknown_state() {
        let row = SendRow {
            id: "s".into(),
            blob_key: "b".into(),
            kind: "file".into(),
            filename: None,
            content_type: None,
            password_hash: None,
            size_bytes: 1,
            created_at: Utc::now(),
            last_claimed_at: None,
            expires_at: Utc::now(),
            max_downloads: 1,
            downloads_remaining: 1,
            state: "zombie".into(),
        };
        let err = SendRecord::try_from(row).unwrap_err();
        assert!(matches!(err, RepositoryError::Serialization(_)));
    }
}

#[cfg(all(test, feature = "integration"))]
mod integration_tests {
    use super::*;

    fn test_config() -> PostgresConfig {
        PostgresConfig {
            url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgres://localhost:5432/ephemera_test".to_string()),
            table_prefix: format!("test_{}_", uuid::Uuid::new_v4().simple()),
            ..PostgresConfig::default()
        }
    }

    #[tokio::test]
    async fn repository_conformance() {
        let repo = PostgresSendRepository::new(test_config())
            .await
            .expect("pool creation should succeed");
        ephemera_store::testing::run_repository_conformance_tests(&repo)
            .await
            .expect("conformance tests should pass");
    }
}
