use tower_sessions_core::session_store;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A cookie token failed to authenticate. Only surfaced under
    /// [`DecodeFailurePolicy::Strict`](crate::DecodeFailurePolicy::Strict).
    #[error("session token failed authentication")]
    Authentication,

    #[error("unsupported record store engine: {0}")]
    UnsupportedEngine(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("no session backend accepted the write")]
    AllBackendsDeferred,

    #[error("failed to encode session record: {0}")]
    Encode(String),

    #[error("failed to decode session record: {0}")]
    Decode(String),

    #[error("{0} lock is poisoned")]
    LockPoisoned(&'static str),
}

impl From<Error> for session_store::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Encode(msg) => session_store::Error::Encode(msg),
            Error::Decode(msg) => session_store::Error::Decode(msg),
            other => session_store::Error::Backend(other.to_string()),
        }
    }
}
