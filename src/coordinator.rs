use time::Duration;

use crate::{
    backend::{SessionBackend, WriteOutcome},
    config::HybridSessionConfig,
    error::{Error, Result},
};

/// Result of [`HybridCoordinator::write`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Persisted { backend: &'static str },
    /// Every backend deferred and the payload was not stored anywhere.
    Dropped,
}

impl WriteStatus {
    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Persisted { .. })
    }
}

/// Fans session operations out over an ordered list of backends.
///
/// Reads return the first non-empty payload and writes stop at the first backend
/// that persists. `open`, `close`, `destroy` and `gc` reach every backend.
#[derive(Debug)]
pub struct HybridCoordinator {
    backends: Vec<Box<dyn SessionBackend>>,
    strict_writes: bool,
}

impl HybridCoordinator {
    pub fn new(config: &HybridSessionConfig) -> Self {
        Self {
            backends: Vec::new(),
            strict_writes: config.strict_writes,
        }
    }

    /// Append a backend; earlier backends take priority.
    #[must_use]
    pub fn with_backend<B: SessionBackend + 'static>(mut self, backend: B) -> Self {
        self.backends.push(Box::new(backend));
        self
    }

    pub fn backend_kinds(&self) -> Vec<&'static str> {
        self.backends.iter().map(|backend| backend.kind()).collect()
    }

    /// Open every backend in order. The first failure aborts the request.
    pub async fn open(&self, session_name: &str) -> Result<()> {
        for backend in &self.backends {
            if let Err(err) = backend.open(session_name).await {
                tracing::error!(backend = backend.kind(), err = %err, "session backend failed to open");
                return Err(err);
            }
        }
        Ok(())
    }

    pub async fn close(&self) {
        for backend in &self.backends {
            backend.close().await;
        }
    }

    /// The first non-empty payload, or an empty one when no backend has the session.
    pub async fn read(&self, session_id: &str) -> Result<Vec<u8>> {
        for backend in &self.backends {
            match backend.read(session_id).await? {
                Some(payload) if !payload.is_empty() => {
                    tracing::debug!(backend = backend.kind(), session_id, "session read");
                    return Ok(payload);
                }
                _ => {}
            }
        }
        Ok(Vec::new())
    }

    pub async fn write(&self, session_id: &str, payload: &[u8]) -> Result<WriteStatus> {
        for backend in &self.backends {
            match backend.write(session_id, payload).await? {
                WriteOutcome::Persisted => {
                    tracing::debug!(backend = backend.kind(), session_id, "session written");
                    return Ok(WriteStatus::Persisted {
                        backend: backend.kind(),
                    });
                }
                WriteOutcome::Deferred(reason) => {
                    tracing::debug!(
                        backend = backend.kind(),
                        session_id,
                        reason = %reason,
                        "session backend deferred write"
                    );
                }
            }
        }

        if self.strict_writes {
            return Err(Error::AllBackendsDeferred);
        }

        tracing::warn!(session_id, "no session backend accepted the write, data dropped");
        Ok(WriteStatus::Dropped)
    }

    /// Destroy the session in every backend, returning the first failure once all ran.
    pub async fn destroy(&self, session_id: &str) -> Result<()> {
        let mut first_err = None;
        for backend in &self.backends {
            if let Err(err) = backend.destroy(session_id).await {
                tracing::warn!(backend = backend.kind(), err = %err, "session destroy failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Collect expired sessions in every backend, returning the total removed.
    pub async fn gc(&self, max_age: Duration) -> Result<u64> {
        let mut removed = 0;
        let mut first_err = None;
        for backend in &self.backends {
            match backend.gc(max_age).await {
                Ok(count) => removed += count,
                Err(err) => {
                    tracing::warn!(backend = backend.kind(), err = %err, "session gc failed");
                    first_err.get_or_insert(err);
                }
            }
        }
        first_err.map_or(Ok(removed), Err)
    }
}
