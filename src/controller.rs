use std::{
    fmt::Debug,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
};

use time::Duration;
use tower_cookies::{Cookie, Cookies, cookie::CookieJar};

/// Access to the host's request and response cookies.
pub trait CookieController: Debug + Clone + Send + Sync + 'static {
    /// The inbound cookie with this name.
    fn get(&self, name: &str) -> Option<Cookie<'static>>;

    /// Set a cookie on the outbound response.
    fn add(&self, cookie: Cookie<'static>);

    /// Force-expire a cookie on the outbound response.
    fn remove(&self, cookie: Cookie<'static>);

    /// Whether response headers are already finalized, after which cookies can no
    /// longer be set.
    fn headers_sent(&self) -> bool {
        false
    }
}

// `CookieManager` materializes the jar into `Set-Cookie` headers only after the
// inner service has returned, so headers are never finalized while a session is
// being persisted.
impl CookieController for Cookies {
    fn get(&self, name: &str) -> Option<Cookie<'static>> {
        Cookies::get(self, name).map(Cookie::into_owned)
    }

    fn add(&self, cookie: Cookie<'static>) {
        Cookies::add(self, cookie);
    }

    fn remove(&self, cookie: Cookie<'static>) {
        Cookies::remove(self, cookie);
    }
}

/// In-memory cookie jar for driving backends outside of a tower service.
#[derive(Debug, Clone, Default)]
pub struct MemoryCookies {
    jar: Arc<Mutex<CookieJar>>,
    headers_sent: Arc<AtomicBool>,
}

impl MemoryCookies {
    pub fn new() -> Self {
        Self::default()
    }

    /// A jar whose inbound cookies are `cookies`.
    pub fn with_incoming(cookies: impl IntoIterator<Item = Cookie<'static>>) -> Self {
        let mut jar = CookieJar::new();
        for cookie in cookies {
            jar.add_original(cookie);
        }

        Self {
            jar: Arc::new(Mutex::new(jar)),
            headers_sent: Arc::default(),
        }
    }

    /// Simulate the response having started.
    pub fn mark_headers_sent(&self) {
        self.headers_sent.store(true, Ordering::Release);
    }

    /// Cookies set or removed on the outbound response.
    pub fn outgoing(&self) -> Vec<Cookie<'static>> {
        let jar = self.jar.lock().unwrap_or_else(PoisonError::into_inner);
        jar.delta().cloned().collect()
    }

    pub fn outgoing_cookie(&self, name: &str) -> Option<Cookie<'static>> {
        self.outgoing()
            .into_iter()
            .find(|cookie| cookie.name() == name)
    }

    /// Whether the outbound response force-expires `name`.
    pub fn removes(&self, name: &str) -> bool {
        self.outgoing_cookie(name)
            .is_some_and(|cookie| cookie.max_age() == Some(Duration::ZERO))
    }

    /// The jar a browser would send on its next request after this response.
    pub fn next_request(&self) -> Self {
        let jar = self.jar.lock().unwrap_or_else(PoisonError::into_inner);
        let carried: Vec<Cookie<'static>> = jar
            .iter()
            .filter(|cookie| cookie.max_age() != Some(Duration::ZERO))
            .map(|cookie| Cookie::new(cookie.name().to_owned(), cookie.value().to_owned()))
            .collect();
        Self::with_incoming(carried)
    }
}

impl CookieController for MemoryCookies {
    fn get(&self, name: &str) -> Option<Cookie<'static>> {
        let jar = self.jar.lock().unwrap_or_else(PoisonError::into_inner);
        jar.get(name).cloned()
    }

    fn add(&self, cookie: Cookie<'static>) {
        let mut jar = self.jar.lock().unwrap_or_else(PoisonError::into_inner);
        jar.add(cookie);
    }

    fn remove(&self, cookie: Cookie<'static>) {
        let mut jar = self.jar.lock().unwrap_or_else(PoisonError::into_inner);
        jar.remove(cookie);
    }

    fn headers_sent(&self) -> bool {
        self.headers_sent.load(Ordering::Acquire)
    }
}
