use std::fmt::{self, Debug};

use async_trait::async_trait;
use time::Duration;

use crate::error::Result;

/// Why a backend declined a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    NoSecret,
    PayloadTooLarge { len: usize },
    HeadersSent,
}

impl fmt::Display for DeferReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoSecret => f.write_str("no secret configured"),
            Self::PayloadTooLarge { len } => write!(f, "payload of {len} bytes is too large"),
            Self::HeadersSent => f.write_str("response headers already sent"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Persisted,
    /// Try the next backend.
    Deferred(DeferReason),
}

/// One storage strategy for session payloads.
///
/// Soft failures (missing data, expired data, tokens that fail to authenticate)
/// are absorbed here: `read` returns `Ok(None)` and `write` returns
/// [`WriteOutcome::Deferred`]. An `Err` is a hard failure. From `open` it is
/// fatal for the request.
#[async_trait]
pub trait SessionBackend: Debug + Send + Sync {
    /// Short name used in logs.
    fn kind(&self) -> &'static str;

    async fn open(&self, session_name: &str) -> Result<()>;

    async fn close(&self);

    async fn read(&self, session_id: &str) -> Result<Option<Vec<u8>>>;

    async fn write(&self, session_id: &str, payload: &[u8]) -> Result<WriteOutcome>;

    async fn destroy(&self, session_id: &str) -> Result<()>;

    /// Remove expired records, returning how many were removed.
    async fn gc(&self, max_age: Duration) -> Result<u64>;
}

