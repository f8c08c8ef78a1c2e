use std::{str::FromStr, sync::Arc};

use async_trait::async_trait;
use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use time::Duration;
use tokio::sync::OnceCell;

use crate::{
    backend::{SessionBackend, WriteOutcome},
    config::HybridSessionConfig,
    error::{Error, Result},
};

/// Oldest SQLite with `INSERT … ON CONFLICT DO UPDATE`.
const MIN_SQLITE_VERSION: (u32, u32, u32) = (3, 24, 0);

const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS hybrid_sessions (
        session_id TEXT PRIMARY KEY NOT NULL,
        expiry INTEGER NOT NULL,
        data BLOB NOT NULL
    )
"#;

const SELECT_SQL: &str =
    "SELECT data FROM hybrid_sessions WHERE session_id = ? AND expiry >= ?";

const UPSERT_SQL: &str = r#"
    INSERT INTO hybrid_sessions (session_id, expiry, data) VALUES (?, ?, ?)
    ON CONFLICT(session_id) DO UPDATE SET expiry = excluded.expiry, data = excluded.data
"#;

const DELETE_SQL: &str = "DELETE FROM hybrid_sessions WHERE session_id = ?";

const DELETE_EXPIRED_SQL: &str = "DELETE FROM hybrid_sessions WHERE expiry < ?";

/// Server-side session records in SQLite, keyed by session id.
///
/// Clones share the pool and the one-time engine check, so a single instance
/// can be built at startup and cloned into every request.
#[derive(Debug, Clone)]
pub struct DatabaseBackend {
    pool: SqlitePool,
    config: HybridSessionConfig,
    engine: Arc<OnceCell<String>>,
}

impl DatabaseBackend {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            config: HybridSessionConfig::default(),
            engine: Arc::new(OnceCell::new()),
        }
    }

    /// Connect to a record store by URL. Only `sqlite:` URLs are supported.
    pub async fn connect(url: &str) -> Result<Self> {
        if !url.starts_with("sqlite:") {
            let scheme = url.split(':').next().unwrap_or(url);
            return Err(Error::UnsupportedEngine(scheme.to_owned()));
        }

        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);

        // Every connection to an in-memory database sees its own database.
        let pool = if url.contains(":memory:") || url.contains("mode=memory") {
            SqlitePoolOptions::new()
                .min_connections(1)
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new().connect_with(options).await?
        };

        tracing::debug!(url, "session record store connected");
        Ok(Self::new(pool))
    }

    #[must_use]
    pub fn with_config(mut self, config: HybridSessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Create the session table if it does not exist yet.
    pub async fn create_table(&self) -> Result<()> {
        sqlx::query(CREATE_TABLE_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Run [`gc`](SessionBackend::gc) every `period` until the task is dropped.
    pub async fn continuously_gc(self, period: std::time::Duration) {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            match self.gc(self.config.lifetime).await {
                Ok(removed) => tracing::debug!(removed, "expired sessions removed"),
                Err(err) => tracing::warn!(err = %err, "session gc failed"),
            }
        }
    }

    async fn verify_engine(&self) -> Result<()> {
        let version = self
            .engine
            .get_or_try_init(|| async {
                let version: String = sqlx::query_scalar("SELECT sqlite_version()")
                    .fetch_one(&self.pool)
                    .await?;

                if !supports_upsert(&version) {
                    return Err(Error::UnsupportedEngine(format!("SQLite {version}")));
                }

                Ok::<_, Error>(version)
            })
            .await?;

        tracing::trace!(version = %version, "session record store engine verified");
        Ok(())
    }

    fn now(&self) -> i64 {
        i64::try_from(self.config.clock.unix_now()).unwrap_or(i64::MAX)
    }
}

fn supports_upsert(version: &str) -> bool {
    let mut parts = version
        .split('.')
        .map(|part| part.trim().parse::<u32>().ok());

    let (Some(Some(major)), Some(Some(minor))) = (parts.next(), parts.next()) else {
        return false;
    };
    let patch = parts.next().flatten().unwrap_or(0);

    (major, minor, patch) >= MIN_SQLITE_VERSION
}

#[async_trait]
impl SessionBackend for DatabaseBackend {
    fn kind(&self) -> &'static str {
        "database"
    }

    async fn open(&self, _session_name: &str) -> Result<()> {
        self.verify_engine().await
    }

    async fn close(&self) {}

    async fn read(&self, session_id: &str) -> Result<Option<Vec<u8>>> {
        let row = sqlx::query(SELECT_SQL)
            .bind(session_id)
            .bind(self.now())
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| row.try_get::<Vec<u8>, _>("data")).transpose()?)
    }

    async fn write(&self, session_id: &str, payload: &[u8]) -> Result<WriteOutcome> {
        let expiry = i64::try_from(self.config.expiry_from_now()).unwrap_or(i64::MAX);

        sqlx::query(UPSERT_SQL)
            .bind(session_id)
            .bind(expiry)
            .bind(payload)
            .execute(&self.pool)
            .await?;

        Ok(WriteOutcome::Persisted)
    }

    async fn destroy(&self, session_id: &str) -> Result<()> {
        sqlx::query(DELETE_SQL)
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // Expiry is stamped at write time, so `max_age` does not change the filter.
    async fn gc(&self, _max_age: Duration) -> Result<u64> {
        let result = sqlx::query(DELETE_EXPIRED_SQL)
            .bind(self.now())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}
