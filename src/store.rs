use async_trait::async_trait;
use tower_sessions_core::{
    SessionStore,
    session::{Id, Record},
    session_store,
};

use crate::{
    coordinator::{HybridCoordinator, WriteStatus},
    format,
};

/// A [`SessionStore`] persisting records through a [`HybridCoordinator`].
///
/// The coordinator is request-scoped, so one store serves one request.
#[derive(Debug)]
pub struct HybridStore {
    coordinator: HybridCoordinator,
}

impl HybridStore {
    pub fn new(coordinator: HybridCoordinator) -> Self {
        Self { coordinator }
    }

    pub fn coordinator(&self) -> &HybridCoordinator {
        &self.coordinator
    }

    async fn persist_record(&self, record: &Record) -> session_store::Result<()> {
        let payload = format::encode_record(record)?;
        let session_id = record.id.to_string();

        match self.coordinator.write(&session_id, &payload).await? {
            WriteStatus::Persisted { backend } => {
                tracing::trace!(backend, bytes = payload.len(), "session record persisted");
            }
            WriteStatus::Dropped => {}
        }

        Ok(())
    }
}

#[async_trait]
impl SessionStore for HybridStore {
    async fn create(&self, record: &mut Record) -> session_store::Result<()> {
        self.persist_record(record).await
    }

    async fn save(&self, record: &Record) -> session_store::Result<()> {
        self.persist_record(record).await
    }

    async fn load(&self, session_id: &Id) -> session_store::Result<Option<Record>> {
        let payload = self.coordinator.read(&session_id.to_string()).await?;
        if payload.is_empty() {
            return Ok(None);
        }

        match format::decode_record(&payload) {
            Ok(record) if record.id == *session_id => Ok(Some(record)),
            Ok(_) => {
                tracing::warn!("stored session record belongs to another session id");
                Ok(None)
            }
            Err(err) => {
                tracing::warn!(err = %err, "stored session record decode failed");
                Ok(None)
            }
        }
    }

    async fn delete(&self, session_id: &Id) -> session_store::Result<()> {
        self.coordinator.destroy(&session_id.to_string()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use time::{Duration, OffsetDateTime};
    use tower_cookies::Cookie;

    use super::*;
    use crate::{
        HybridSessionConfig, MAX_COOKIE_PAYLOAD_BYTES,
        backend::SessionBackend,
        clock::ManualClock,
        controller::{CookieController, MemoryCookies},
        cookie::CookieBackend,
        database::DatabaseBackend,
    };

    const NOW: i64 = 1_700_000_000;

    fn record(value: serde_json::Value) -> Record {
        let mut data = HashMap::new();
        data.insert("foo".to_string(), value);
        Record {
            id: Id::default(),
            data,
            expiry_date: OffsetDateTime::from_unix_timestamp(NOW + 600)
                .expect("timestamp is valid"),
        }
    }

    async fn open_store(
        cookies: MemoryCookies,
        database: &DatabaseBackend,
        config: &HybridSessionConfig,
    ) -> HybridStore {
        let coordinator = HybridCoordinator::new(config)
            .with_backend(CookieBackend::new(cookies, config.clone()))
            .with_backend(database.clone());
        coordinator.open(config.name()).await.expect("backends open");
        HybridStore::new(coordinator)
    }

    async fn fixture() -> (HybridSessionConfig, DatabaseBackend) {
        let config = HybridSessionConfig::default()
            .with_secret("s3cr3t")
            .with_lifetime(Duration::minutes(10))
            .with_clock(ManualClock::at_unix(NOW));
        let database = DatabaseBackend::connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite connects")
            .with_config(config.clone());
        database.create_table().await.expect("table is created");
        (config, database)
    }

    #[tokio::test]
    async fn small_records_live_in_the_cookie() {
        let (config, database) = fixture().await;
        let cookies = MemoryCookies::new();
        let record = record(serde_json::json!(42));

        let store = open_store(cookies.clone(), &database, &config).await;
        store.save(&record).await.expect("save succeeds");

        assert!(cookies.outgoing_cookie("id_data").is_some());
        assert_eq!(
            database
                .read(&record.id.to_string())
                .await
                .expect("read succeeds"),
            None
        );

        let store = open_store(cookies.next_request(), &database, &config).await;
        let loaded = store
            .load(&record.id)
            .await
            .expect("load succeeds")
            .expect("record is present");
        assert_eq!(loaded.data, record.data);
    }

    #[tokio::test]
    async fn large_records_fall_back_to_the_database() {
        let (config, database) = fixture().await;
        let cookies = MemoryCookies::new();
        let record = record(serde_json::json!("x".repeat(MAX_COOKIE_PAYLOAD_BYTES)));

        let store = open_store(cookies.clone(), &database, &config).await;
        store.save(&record).await.expect("save succeeds");

        assert!(cookies.outgoing_cookie("id_data").is_none());

        let store = open_store(cookies.next_request(), &database, &config).await;
        let loaded = store
            .load(&record.id)
            .await
            .expect("load succeeds")
            .expect("record is present");
        assert_eq!(loaded.data, record.data);
    }

    #[tokio::test]
    async fn record_under_another_id_is_not_loaded() {
        let (config, database) = fixture().await;
        let record = record(serde_json::json!(1));
        let payload = format::encode_record(&record).expect("record encodes");
        let other = Id::default();
        database
            .write(&other.to_string(), &payload)
            .await
            .expect("write succeeds");

        let store = open_store(MemoryCookies::new(), &database, &config).await;

        assert!(store.load(&other).await.expect("load succeeds").is_none());
    }

    #[tokio::test]
    async fn delete_clears_cookie_and_row() {
        let (config, database) = fixture().await;
        let record = record(serde_json::json!("x".repeat(MAX_COOKIE_PAYLOAD_BYTES)));
        let incoming = MemoryCookies::with_incoming([Cookie::new("id_data", "stale")]);

        let store = open_store(incoming.clone(), &database, &config).await;
        store.save(&record).await.expect("save succeeds");
        store.delete(&record.id).await.expect("delete succeeds");

        assert!(incoming.removes("id_data"));
        assert!(incoming.get("id_data").is_none());
        assert!(store.load(&record.id).await.expect("load succeeds").is_none());
    }
}
