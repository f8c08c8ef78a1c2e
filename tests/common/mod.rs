#![allow(dead_code)]

// Shared helpers for integration tests.
//
// These helpers use `tower_cookies::Cookie` parsing/encoding to match what the middleware emits
// in `Set-Cookie` and what browsers send back in `Cookie`.
use std::{collections::BTreeMap, convert::Infallible};

use axum::body::Body;
use http::{HeaderMap, Request, Response, header};
use http_body_util::BodyExt as _;
use time::Duration;
use tower_cookies::Cookie;
use tower_sessions_hybrid_store::{
    DatabaseBackend, HybridSessionConfig, HybridSessionManagerLayer, Session,
};

pub const SECRET: &str = "s3cr3t";

// Never set in the test environment, so layers built with it have no fallback secret.
pub const UNSET_SECRET_ENV: &str = "TOWER_SESSIONS_HYBRID_TEST_UNSET";

pub async fn body_string(body: Body) -> String {
    // Collect an Axum body into a UTF-8 string for assertions.
    let bytes = body
        .collect()
        .await
        .expect("body collects successfully")
        .to_bytes();
    String::from_utf8_lossy(&bytes).into_owned()
}

pub async fn handler(req: Request<Body>) -> Result<Response<Body>, Infallible> {
    // Basic handler used by many tests: write a single key into the session.
    let session = req
        .extensions()
        .get::<Session>()
        .cloned()
        .expect("request includes Session extension");

    session
        .insert("foo", 42)
        .await
        .expect("session insert succeeds");

    Ok(Response::new(Body::empty()))
}

pub async fn noop_handler(_: Request<Body>) -> Result<Response<Body>, Infallible> {
    // Handler that does not access the session at all.
    Ok(Response::new(Body::empty()))
}

pub async fn database() -> DatabaseBackend {
    let database = DatabaseBackend::connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite connects");
    database.create_table().await.expect("table is created");
    database
}

pub fn secret_config() -> HybridSessionConfig {
    HybridSessionConfig::default()
        .with_secret(SECRET)
        .with_secret_env(UNSET_SECRET_ENV)
}

pub async fn make_layer(config: HybridSessionConfig) -> HybridSessionManagerLayer {
    // Fresh in-memory record store per layer so tests never share rows.
    HybridSessionManagerLayer::new(database().await).with_config(config)
}

pub fn set_cookies(headers: &HeaderMap) -> Vec<Cookie<'static>> {
    // Parse every `Set-Cookie` header; the layer emits one for the id and one for the data.
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|value| {
            let value = value.to_str().expect("set-cookie header is valid utf-8");
            Cookie::parse_encoded(value)
                .expect("set-cookie parses successfully")
                .into_owned()
        })
        .collect()
}

pub fn find_cookie(headers: &HeaderMap, name: &str) -> Option<Cookie<'static>> {
    set_cookies(headers)
        .into_iter()
        .find(|cookie| cookie.name() == name)
}

pub fn get_cookie(headers: &HeaderMap, name: &str) -> Cookie<'static> {
    find_cookie(headers, name).expect("response sets the named cookie")
}

pub fn cookie_header_value(cookies: &[Cookie<'static>]) -> String {
    // Encode live cookies for a `Cookie` request header, the way a browser replays them.
    cookies
        .iter()
        .filter(|cookie| !cookie.value().is_empty())
        .map(|cookie| cookie.stripped().encoded().to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub fn tamper_cookie_value(cookie: &mut Cookie<'_>) {
    // Swap one character in the middle of the token, away from base64 padding.
    let mut value: Vec<char> = cookie.value().chars().collect();
    let middle = value.len() / 2;
    value[middle] = if value[middle] == 'A' { 'B' } else { 'A' };
    cookie.set_value(value.into_iter().collect::<String>());
}

/// Replays cookies across requests the way a browser would: later `Set-Cookie` headers replace
/// earlier ones and removal cookies drop the entry.
#[derive(Debug, Default)]
pub struct Browser {
    cookies: BTreeMap<String, Cookie<'static>>,
}

impl Browser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn absorb(&mut self, headers: &HeaderMap) {
        for cookie in set_cookies(headers) {
            if cookie.value().is_empty() || cookie.max_age() == Some(Duration::ZERO) {
                self.cookies.remove(cookie.name());
            } else {
                self.cookies.insert(cookie.name().to_owned(), cookie);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Cookie<'static>> {
        self.cookies.get(name)
    }

    pub fn set(&mut self, cookie: Cookie<'static>) {
        self.cookies.insert(cookie.name().to_owned(), cookie);
    }

    pub fn forget(&mut self, name: &str) {
        self.cookies.remove(name);
    }

    pub fn cookie_header(&self) -> String {
        cookie_header_value(&self.cookies.values().cloned().collect::<Vec<_>>())
    }

    pub fn request(&self, uri: &str) -> Request<Body> {
        let mut builder = Request::builder().uri(uri);
        if !self.cookies.is_empty() {
            builder = builder.header(header::COOKIE, self.cookie_header());
        }
        builder.body(Body::empty()).expect("request builds successfully")
    }
}
