use std::{borrow::Cow, fmt, sync::Arc};

use time::Duration;
use tower_cookies::Cookie;

use crate::{
    SameSite,
    clock::{Clock, SystemClock},
    crypto::TokenFormat,
};

/// Suffix appended to the session cookie name for the encrypted data cookie.
pub const COOKIE_SUFFIX: &str = "_data";

/// Environment variable consulted when no secret is configured.
pub const DEFAULT_SECRET_ENV: &str = "SESSION_HYBRID_SECRET";

pub const DEFAULT_COOKIE_NAME: &str = "id";

/// Payloads must be strictly shorter than this to travel in the cookie.
pub const MAX_COOKIE_PAYLOAD_BYTES: usize = 1024;

/// What the cookie backend does with a data cookie that fails to decrypt.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecodeFailurePolicy {
    /// Treat the session as absent and fall through to the next backend.
    #[default]
    FailOpen,
    /// Surface [`Error::Authentication`](crate::Error::Authentication) to the caller.
    Strict,
}

/// Process-wide secret. Never printed.
#[derive(Clone)]
pub struct Secret(Arc<[u8]>);

impl Secret {
    pub fn new(bytes: impl AsRef<[u8]>) -> Self {
        Self(Arc::from(bytes.as_ref()))
    }

    pub fn expose(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([redacted])")
    }
}

#[derive(Debug, Clone)]
pub struct HybridSessionConfig {
    pub(crate) name: Cow<'static, str>,
    pub(crate) http_only: bool,
    pub(crate) same_site: SameSite,
    pub(crate) secure: bool,
    pub(crate) path: Cow<'static, str>,
    pub(crate) domain: Option<Cow<'static, str>>,
    pub(crate) lifetime: Duration,
    pub(crate) secret: Option<Secret>,
    pub(crate) secret_env: Cow<'static, str>,
    pub(crate) token_format: TokenFormat,
    pub(crate) decode_failure: DecodeFailurePolicy,
    pub(crate) strict_writes: bool,
    pub(crate) clock: Arc<dyn Clock>,
}

impl Default for HybridSessionConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_COOKIE_NAME.into(),
            http_only: true,
            same_site: SameSite::Strict,
            secure: true,
            path: "/".into(),
            domain: None,
            lifetime: Duration::seconds(1440),
            secret: None,
            secret_env: DEFAULT_SECRET_ENV.into(),
            token_format: TokenFormat::default(),
            decode_failure: DecodeFailurePolicy::default(),
            strict_writes: false,
            clock: Arc::new(SystemClock),
        }
    }
}

impl HybridSessionConfig {
    #[must_use]
    pub fn with_name<N: Into<Cow<'static, str>>>(mut self, name: N) -> Self {
        self.name = name.into();
        self
    }

    #[must_use]
    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = http_only;
        self
    }

    #[must_use]
    pub fn with_same_site(mut self, same_site: SameSite) -> Self {
        self.same_site = same_site;
        self
    }

    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub fn with_path<P: Into<Cow<'static, str>>>(mut self, path: P) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn with_domain<D: Into<Cow<'static, str>>>(mut self, domain: D) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn without_domain(mut self) -> Self {
        self.domain = None;
        self
    }

    /// How long a written record stays readable, for both backends and both cookies.
    #[must_use]
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    #[must_use]
    pub fn with_secret(mut self, secret: impl AsRef<[u8]>) -> Self {
        self.secret = Some(Secret::new(secret));
        self
    }

    #[must_use]
    pub fn without_secret(mut self) -> Self {
        self.secret = None;
        self
    }

    /// Environment variable read when no secret was configured.
    #[must_use]
    pub fn with_secret_env<E: Into<Cow<'static, str>>>(mut self, var: E) -> Self {
        self.secret_env = var.into();
        self
    }

    #[must_use]
    pub fn with_token_format(mut self, token_format: TokenFormat) -> Self {
        self.token_format = token_format;
        self
    }

    #[must_use]
    pub fn with_decode_failure(mut self, policy: DecodeFailurePolicy) -> Self {
        self.decode_failure = policy;
        self
    }

    /// Turn a write that no backend accepted into
    /// [`Error::AllBackendsDeferred`](crate::Error::AllBackendsDeferred) instead of dropping it.
    #[must_use]
    pub fn with_strict_writes(mut self, strict_writes: bool) -> Self {
        self.strict_writes = strict_writes;
        self
    }

    #[must_use]
    pub fn with_clock<C: Clock>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    pub fn data_cookie_name(&self, session_name: &str) -> String {
        format!("{session_name}{COOKIE_SUFFIX}")
    }

    /// The configured secret, or the one found in the fallback environment variable.
    pub(crate) fn resolve_secret(&self) -> Option<Secret> {
        if let Some(secret) = &self.secret {
            return Some(secret.clone());
        }

        std::env::var_os(&*self.secret_env)
            .filter(|value| !value.is_empty())
            .map(|value| Secret::new(value.as_encoded_bytes()))
    }

    /// Expiry stamped on a record written now.
    pub(crate) fn expiry_from_now(&self) -> u64 {
        let now = self.clock.unix_now();
        now.saturating_add(self.lifetime.whole_seconds().max(0) as u64)
    }

    pub(crate) fn build_cookie(&self, name: String, value: String) -> Cookie<'static> {
        let mut cookie_builder = Cookie::build((name, value))
            .http_only(self.http_only)
            .same_site(self.same_site)
            .secure(self.secure)
            .path(self.path.clone())
            .max_age(std::cmp::max(self.lifetime, Duration::ZERO));

        if let Some(domain) = self.domain.clone() {
            cookie_builder = cookie_builder.domain(domain);
        }

        cookie_builder.build()
    }

    pub(crate) fn removal_cookie(&self, name: String) -> Cookie<'static> {
        let mut cookie = Cookie::new(name, "");
        cookie.set_path(self.path.clone());
        if let Some(domain) = self.domain.clone() {
            cookie.set_domain(domain);
        }
        cookie
    }
}
