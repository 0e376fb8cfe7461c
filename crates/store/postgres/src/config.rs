use ephemera_store::RepositoryError;

/// Connection and naming settings for [`PostgresSendRepository`](crate::PostgresSendRepository).
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub pool_size: u32,
    /// Schema holding the sends table.
    pub schema: String,
    /// Prepended to `sends`, so several deployments can share a schema.
    pub table_prefix: String,
    /// One of `disable`, `allow`, `prefer`, `require`, `verify-ca`, `verify-full`.
    pub ssl_mode: Option<String>,
    pub ssl_root_cert: Option<String>,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/ephemera".to_owned(),
            pool_size: 10,
            schema: "public".to_owned(),
            table_prefix: "ephemera_".to_owned(),
            ssl_mode: None,
            ssl_root_cert: None,
        }
    }
}

impl PostgresConfig {
    /// `schema.prefix_sends`, safe to splice into SQL after [`validate`](Self::validate).
    pub(crate) fn sends_table(&self) -> String {
        format!("{}.{}sends", self.schema, self.table_prefix)
    }

    /// Name for an index on the sends table.
    pub(crate) fn index_name(&self, suffix: &str) -> String {
        format!("{}sends_{suffix}_idx", self.table_prefix)
    }

    /// Schema and prefix end up in DDL and DML unquoted, so both must be
    /// plain identifiers.
    pub fn validate(&self) -> Result<(), RepositoryError> {
        if !is_identifier(&self.schema) {
            return Err(RepositoryError::Connection(format!(
                "invalid schema name: {:?}",
                self.schema
            )));
        }
        if !self.table_prefix.is_empty() && !is_identifier(&self.table_prefix) {
            return Err(RepositoryError::Connection(format!(
                "invalid table prefix: {:?}",
                self.table_prefix
            )));
        }
        if self.pool_size == 0 {
            return Err(RepositoryError::Connection(
                "pool_size must be at least 1".to_owned(),
            ));
        }
        Ok(())
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
