//! Time sources used to stamp and check record expiry.

use std::{
    fmt::Debug,
    sync::{
        Arc,
        atomic::{AtomicI64, Ordering},
    },
};

use time::{Duration, OffsetDateTime};

pub trait Clock: Debug + Send + Sync + 'static {
    fn now(&self) -> OffsetDateTime;

    /// Seconds since the unix epoch, clamped at zero.
    fn unix_now(&self) -> u64 {
        self.now().unix_timestamp().max(0) as u64
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same instant, so a test can hand one copy to the session
/// layer and keep another to advance time between requests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    unix: Arc<AtomicI64>,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            unix: Arc::new(AtomicI64::new(start.unix_timestamp())),
        }
    }

    pub fn at_unix(seconds: i64) -> Self {
        Self {
            unix: Arc::new(AtomicI64::new(seconds)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.unix.fetch_add(by.whole_seconds(), Ordering::AcqRel);
    }

    pub fn set_unix(&self, seconds: i64) {
        self.unix.store(seconds, Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(self.unix.load(Ordering::Acquire))
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
    }
}
