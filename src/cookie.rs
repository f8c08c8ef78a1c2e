use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use time::Duration;

use crate::{
    backend::{DeferReason, SessionBackend, WriteOutcome},
    config::{DecodeFailurePolicy, HybridSessionConfig, MAX_COOKIE_PAYLOAD_BYTES, Secret},
    controller::CookieController,
    crypto::{SessionCrypto, TokenFormat},
    error::{Error, Result},
    format,
};

/// Stores the session payload in an encrypted cookie next to the session id cookie.
///
/// One instance serves one request. `open` captures the inbound data cookie and
/// immediately force-expires it, so a stale value is never replayed if the
/// request ends before `write` runs.
#[derive(Debug)]
pub struct CookieBackend<C: CookieController> {
    cookies: C,
    config: HybridSessionConfig,
    state: Mutex<CookieState>,
}

#[derive(Debug, Default)]
struct CookieState {
    secret: Option<Secret>,
    cookie_name: Option<String>,
    incoming: Option<String>,
    crypto: Option<SessionCrypto>,
}

impl CookieState {
    /// The cached crypto for `session_id`, re-deriving the key when the salt changed.
    fn crypto(&mut self, secret: &Secret, session_id: &str, format: TokenFormat) -> &SessionCrypto {
        let crypto = match self.crypto.take() {
            Some(crypto) if crypto.salt() == session_id.as_bytes() => crypto,
            _ => SessionCrypto::new(secret.expose(), session_id.as_bytes(), format),
        };
        self.crypto.insert(crypto)
    }
}

impl<C: CookieController> CookieBackend<C> {
    pub fn new(cookies: C, config: HybridSessionConfig) -> Self {
        Self {
            cookies,
            config,
            state: Mutex::new(CookieState::default()),
        }
    }

    /// Whether `open` found a secret for this request.
    pub fn is_enabled(&self) -> bool {
        self.lock().is_ok_and(|state| state.secret.is_some())
    }

    fn lock(&self) -> Result<MutexGuard<'_, CookieState>> {
        self.state
            .lock()
            .map_err(|_| Error::LockPoisoned("cookie backend"))
    }

    fn cookie_name(&self, state: &CookieState) -> String {
        state
            .cookie_name
            .clone()
            .unwrap_or_else(|| self.config.data_cookie_name(&self.config.name))
    }

    fn rejected(&self, session_id: &str, reason: &str) -> Result<Option<Vec<u8>>> {
        match self.config.decode_failure {
            DecodeFailurePolicy::FailOpen => {
                tracing::warn!(session_id, reason, "session data cookie rejected");
                Ok(None)
            }
            DecodeFailurePolicy::Strict => Err(Error::Authentication),
        }
    }
}

#[async_trait]
impl<C: CookieController> SessionBackend for CookieBackend<C> {
    fn kind(&self) -> &'static str {
        "cookie"
    }

    async fn open(&self, session_name: &str) -> Result<()> {
        let name = self.config.data_cookie_name(session_name);

        let secret = self.config.resolve_secret();
        if secret.is_none() {
            tracing::warn!(
                env = %self.config.secret_env,
                "no session secret configured, cookie backend disabled"
            );
        }

        let incoming = self
            .cookies
            .get(&name)
            .map(|cookie| cookie.value().to_owned())
            .filter(|value| !value.is_empty());
        self.cookies.remove(self.config.removal_cookie(name.clone()));

        let mut state = self.lock()?;
        *state = CookieState {
            secret,
            cookie_name: Some(name),
            incoming,
            crypto: None,
        };

        Ok(())
    }

    async fn close(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        *state = CookieState::default();
    }

    async fn read(&self, session_id: &str) -> Result<Option<Vec<u8>>> {
        let mut state = self.lock()?;
        let (Some(secret), Some(token)) = (state.secret.clone(), state.incoming.clone()) else {
            return Ok(None);
        };

        let crypto = state.crypto(&secret, session_id, self.config.token_format);
        let Ok(plaintext) = crypto.decrypt(&token) else {
            return self.rejected(session_id, "authentication failed");
        };

        let Some((expiry, payload)) = format::decode_cookie_plaintext(&plaintext) else {
            return self.rejected(session_id, "malformed expiry prefix");
        };

        if expiry <= self.config.clock.unix_now() {
            tracing::debug!(session_id, expiry, "session data cookie expired");
            return Ok(None);
        }

        Ok(Some(payload.to_vec()))
    }

    async fn write(&self, session_id: &str, payload: &[u8]) -> Result<WriteOutcome> {
        let mut state = self.lock()?;
        let Some(secret) = state.secret.clone() else {
            return Ok(WriteOutcome::Deferred(DeferReason::NoSecret));
        };

        if payload.len() >= MAX_COOKIE_PAYLOAD_BYTES {
            return Ok(WriteOutcome::Deferred(DeferReason::PayloadTooLarge {
                len: payload.len(),
            }));
        }

        if self.cookies.headers_sent() {
            return Ok(WriteOutcome::Deferred(DeferReason::HeadersSent));
        }

        let plaintext = format::encode_cookie_plaintext(self.config.expiry_from_now(), payload);
        let token = state
            .crypto(&secret, session_id, self.config.token_format)
            .encrypt(&plaintext)?;

        let name = self.cookie_name(&state);
        self.cookies.add(self.config.build_cookie(name, token.clone()));
        state.incoming = Some(token);

        Ok(WriteOutcome::Persisted)
    }

    async fn destroy(&self, _session_id: &str) -> Result<()> {
        let mut state = self.lock()?;
        let name = self.cookie_name(&state);
        self.cookies.remove(self.config.removal_cookie(name));
        state.incoming = None;

        Ok(())
    }

    // Cookies expire client-side; there is nothing to collect.
    async fn gc(&self, _max_age: Duration) -> Result<u64> {
        Ok(0)
    }
}
