//! Hybrid session persistence for `tower-sessions`.
//!
//! This crate provides a layer that inserts `tower_sessions_core::Session` into request
//! extensions and persists the session record through an ordered list of backends:
//!
//! 1. an encrypted cookie sent next to the session id cookie, used while the serialized record
//!    is smaller than [`MAX_COOKIE_PAYLOAD_BYTES`];
//! 2. a SQLite table, used for everything the cookie declines.
//!
//! Reads return the first backend that has the session; writes stop at the first backend that
//! accepts them. See [`HybridCoordinator`] for the full protocol.
//!
//! # Security
//! Cookie payloads are sealed with a key derived from the configured secret and the session id
//! (PBKDF2-HMAC-SHA256). The default token format is AES-256-GCM. The `legacy-compat` feature
//! adds [`TokenFormat::LegacyCbc`] (AES-256-CBC with an HMAC over the ciphertext only), which
//! exists to read tokens from older deployments and should not be chosen for new ones.
//!
//! Without a secret the cookie backend is disabled and every session lives in the database.

mod backend;
mod clock;
mod config;
mod controller;
mod cookie;
mod coordinator;
pub mod crypto;
mod database;
mod error;
pub mod format;
pub mod layer;
mod store;

pub use tower_cookies::cookie::SameSite;
pub use tower_sessions_core::{Session, session::Expiry, session_store};

pub use crate::backend::{DeferReason, SessionBackend, WriteOutcome};
pub use crate::clock::{Clock, ManualClock, SystemClock};
pub use crate::config::{
    COOKIE_SUFFIX, DEFAULT_COOKIE_NAME, DEFAULT_SECRET_ENV, DecodeFailurePolicy,
    HybridSessionConfig, MAX_COOKIE_PAYLOAD_BYTES, Secret,
};
pub use crate::controller::{CookieController, MemoryCookies};
pub use crate::cookie::CookieBackend;
pub use crate::coordinator::{HybridCoordinator, WriteStatus};
pub use crate::crypto::{AuthenticationFailure, SessionCrypto, TokenFormat};
pub use crate::database::DatabaseBackend;
pub use crate::error::{Error, Result};
pub use crate::layer::HybridSessionManagerLayer;
pub use crate::store::HybridStore;
