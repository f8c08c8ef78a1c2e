//! Per-session key derivation and authenticated encryption of cookie payloads.
//!
//! A [`SessionCrypto`] stretches the process secret with the session id as salt
//! (PBKDF2-HMAC-SHA256) and seals payloads into a base64 token. Two token
//! layouts exist:
//!
//! - [`TokenFormat::Aead`]: `base64(nonce || ciphertext || tag)` under
//!   AES-256-GCM. The tag covers the nonce and every ciphertext byte.
//! - [`TokenFormat::LegacyCbc`] (`legacy-compat` feature):
//!   `base64(IV || HMAC-SHA256(ciphertext) || ciphertext)` under AES-256-CBC
//!   with zero-byte padding. The MAC does not cover the IV, so flipping IV bits
//!   corrupts the first recovered block without failing authentication.
//!   Trailing zero bytes of the plaintext are trimmed on decrypt.

use std::fmt;

use base64::{Engine as _, engine::general_purpose::STANDARD};
use sha2::Sha256;

use crate::error::{Error, Result};

/// AES-256 key length.
pub const KEY_SIZE: usize = 32;

/// HMAC-SHA256 output length.
pub const MAC_SIZE: usize = 32;

/// PBKDF2 rounds applied to the secret for every session id.
pub const PBKDF2_ITERATIONS: u32 = 1000;

/// Layout of a sealed cookie token.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TokenFormat {
    /// AES-256-GCM with a random 12-byte nonce.
    #[default]
    Aead,
    /// AES-256-CBC with zero padding and an HMAC-SHA256 over the ciphertext.
    #[cfg(feature = "legacy-compat")]
    LegacyCbc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("session token failed authentication")]
pub struct AuthenticationFailure;

/// A key derived for one session id, able to seal and open tokens in one [`TokenFormat`].
pub struct SessionCrypto {
    key: [u8; KEY_SIZE],
    salt: Vec<u8>,
    format: TokenFormat,
}

impl fmt::Debug for SessionCrypto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCrypto")
            .field("salt", &String::from_utf8_lossy(&self.salt))
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

impl SessionCrypto {
    pub fn new(secret: &[u8], salt: &[u8], format: TokenFormat) -> Self {
        let mut key = [0u8; KEY_SIZE];
        pbkdf2::pbkdf2_hmac::<Sha256>(secret, salt, PBKDF2_ITERATIONS, &mut key);

        Self {
            key,
            salt: salt.to_vec(),
            format,
        }
    }

    /// The salt the key was derived from. A caller holding a cached instance
    /// compares this against the current session id before reuse.
    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn format(&self) -> TokenFormat {
        self.format
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let sealed = match self.format {
            TokenFormat::Aead => aead::seal(&self.key, plaintext),
            #[cfg(feature = "legacy-compat")]
            TokenFormat::LegacyCbc => legacy::seal(&self.key, plaintext),
        }
        .ok_or_else(|| Error::Encode("session payload encryption failed".into()))?;

        Ok(STANDARD.encode(sealed))
    }

    pub fn decrypt(&self, token: &str) -> Result<Vec<u8>, AuthenticationFailure> {
        let sealed = STANDARD
            .decode(token.as_bytes())
            .map_err(|_| AuthenticationFailure)?;

        match self.format {
            TokenFormat::Aead => aead::open(&self.key, &sealed),
            #[cfg(feature = "legacy-compat")]
            TokenFormat::LegacyCbc => legacy::open(&self.key, &sealed),
        }
        .ok_or(AuthenticationFailure)
    }
}

mod aead {
    use aes_gcm::{
        Aes256Gcm, Nonce,
        aead::{Aead, KeyInit, OsRng, rand_core::RngCore},
    };

    pub(super) const NONCE_SIZE: usize = 12;
    const TAG_SIZE: usize = 16;

    pub(super) fn seal(key: &[u8], plaintext: &[u8]) -> Option<Vec<u8>> {
        let cipher = <Aes256Gcm as KeyInit>::new_from_slice(key).ok()?;

        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = cipher.encrypt(Nonce::from_slice(&nonce), plaintext).ok()?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Some(sealed)
    }

    pub(super) fn open(key: &[u8], sealed: &[u8]) -> Option<Vec<u8>> {
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return None;
        }

        let cipher = <Aes256Gcm as KeyInit>::new_from_slice(key).ok()?;
        let (nonce, ciphertext) = sealed.split_at(NONCE_SIZE);
        cipher.decrypt(Nonce::from_slice(nonce), ciphertext).ok()
    }
}

#[cfg(feature = "legacy-compat")]
mod legacy {
    use aes_gcm::aead::{OsRng, rand_core::RngCore};
    use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit, block_padding::NoPadding};
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    use super::MAC_SIZE;

    type HmacSha256 = Hmac<Sha256>;
    type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
    type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

    pub(super) const IV_SIZE: usize = 16;
    const BLOCK_SIZE: usize = 16;

    pub(super) fn seal(key: &[u8], plaintext: &[u8]) -> Option<Vec<u8>> {
        let mut iv = [0u8; IV_SIZE];
        OsRng.fill_bytes(&mut iv);

        let mut padded = plaintext.to_vec();
        let partial = padded.len() % BLOCK_SIZE;
        if partial != 0 {
            padded.resize(padded.len() + BLOCK_SIZE - partial, 0);
        }

        let ciphertext = if padded.is_empty() {
            Vec::new()
        } else {
            Aes256CbcEnc::new_from_slices(key, &iv)
                .ok()?
                .encrypt_padded_vec_mut::<NoPadding>(&padded)
        };

        let mut mac = <HmacSha256 as Mac>::new_from_slice(key).ok()?;
        mac.update(&ciphertext);
        let tag = mac.finalize().into_bytes();

        let mut sealed = Vec::with_capacity(IV_SIZE + MAC_SIZE + ciphertext.len());
        sealed.extend_from_slice(&iv);
        sealed.extend_from_slice(&tag);
        sealed.extend_from_slice(&ciphertext);
        Some(sealed)
    }

    pub(super) fn open(key: &[u8], sealed: &[u8]) -> Option<Vec<u8>> {
        if sealed.len() < IV_SIZE + MAC_SIZE {
            return None;
        }

        let (iv, rest) = sealed.split_at(IV_SIZE);
        let (tag, ciphertext) = rest.split_at(MAC_SIZE);

        // Decrypt before checking the MAC so a malformed body and a forged tag
        // take the same path.
        let plaintext = decrypt_blocks(key, iv, ciphertext);

        let mut mac = <HmacSha256 as Mac>::new_from_slice(key).ok()?;
        mac.update(ciphertext);
        let verified = mac.verify_slice(tag).is_ok();

        match (verified, plaintext) {
            (true, Some(mut plaintext)) => {
                let trimmed = plaintext
                    .iter()
                    .rposition(|byte| *byte != 0)
                    .map_or(0, |last| last + 1);
                plaintext.truncate(trimmed);
                Some(plaintext)
            }
            _ => None,
        }
    }

    fn decrypt_blocks(key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Option<Vec<u8>> {
        if ciphertext.len() % BLOCK_SIZE != 0 {
            return None;
        }
        if ciphertext.is_empty() {
            return Some(Vec::new());
        }

        Aes256CbcDec::new_from_slices(key, iv)
            .ok()?
            .decrypt_padded_vec_mut::<NoPadding>(ciphertext)
            .ok()
    }
}
