//! Helpers for the byte layouts stored by the backends.
//!
//! This is primarily useful for testing and debugging.
//!
//! Two layers are involved:
//! - the session [`Record`] is serialized into a versioned JSON envelope; those bytes are the
//!   opaque payload every backend stores;
//! - on the cookie path the payload is prefixed with a 10-digit, zero-padded unix expiry before
//!   encryption.

use serde::{Deserialize, Serialize};
use tower_sessions_core::session::Record;

use crate::error::{Error, Result};

const VERSION: u8 = 1;

/// Width of the ASCII expiry prefix in a cookie plaintext.
pub const EXPIRY_DIGITS: usize = 10;

/// Largest expiry representable in [`EXPIRY_DIGITS`] digits.
pub const MAX_EXPIRY: u64 = 9_999_999_999;

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    v: u8,
    record: Record,
}

/// Encode a session [`Record`] into payload bytes.
pub fn encode_record(record: &Record) -> Result<Vec<u8>> {
    let envelope = Envelope {
        v: VERSION,
        record: record.clone(),
    };

    serde_json::to_vec(&envelope).map_err(|err| Error::Encode(err.to_string()))
}

/// Decode payload bytes into a session [`Record`].
pub fn decode_record(payload: &[u8]) -> Result<Record> {
    let envelope: Envelope =
        serde_json::from_slice(payload).map_err(|err| Error::Decode(err.to_string()))?;

    if envelope.v != VERSION {
        return Err(Error::Decode(format!(
            "Unsupported session payload version: {}",
            envelope.v
        )));
    }

    Ok(envelope.record)
}

/// Build the cookie plaintext `zero_pad(expiry, 10) || payload`.
///
/// Expiries past [`MAX_EXPIRY`] are clamped so the prefix stays fixed-width.
pub fn encode_cookie_plaintext(expiry: u64, payload: &[u8]) -> Vec<u8> {
    let expiry = expiry.min(MAX_EXPIRY);
    let mut plaintext = Vec::with_capacity(EXPIRY_DIGITS + payload.len());
    plaintext.extend_from_slice(format!("{expiry:0width$}", width = EXPIRY_DIGITS).as_bytes());
    plaintext.extend_from_slice(payload);
    plaintext
}

/// Split a cookie plaintext into its expiry and payload.
///
/// Returns `None` when the prefix is short or contains anything but ASCII digits.
pub fn decode_cookie_plaintext(plaintext: &[u8]) -> Option<(u64, &[u8])> {
    if plaintext.len() < EXPIRY_DIGITS {
        return None;
    }

    let (prefix, payload) = plaintext.split_at(EXPIRY_DIGITS);
    if !prefix.iter().all(u8::is_ascii_digit) {
        return None;
    }

    let expiry = std::str::from_utf8(prefix).ok()?.parse().ok()?;
    Some((expiry, payload))
}
