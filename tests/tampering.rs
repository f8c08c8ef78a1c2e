// Tests for how the layer treats data cookies that fail authentication.
mod common;

use axum::{Router, http::StatusCode, routing::get};
use common::Browser;
use tower::ServiceExt as _;
use tower_sessions_hybrid_store::{DecodeFailurePolicy, HybridSessionConfig, Session};

fn routes() -> Router {
    Router::new()
        .route(
            "/set-user",
            get(|session: Session| async move {
                session
                    .insert("user", "alice")
                    .await
                    .expect("session insert succeeds");
            }),
        )
        .route(
            "/get-user",
            get(|session: Session| async move {
                match session.get::<String>("user").await {
                    Ok(user) => (StatusCode::OK, user.unwrap_or_else(|| "none".to_string())),
                    Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, "error".to_string()),
                }
            }),
        )
}

async fn tampered_get_user(config: HybridSessionConfig) -> (StatusCode, String) {
    let app = routes().layer(common::make_layer(config).await);
    let mut browser = Browser::new();

    let res = app
        .clone()
        .oneshot(browser.request("/set-user"))
        .await
        .expect("service call succeeds");
    browser.absorb(res.headers());

    let mut data_cookie = browser
        .get("id_data")
        .cloned()
        .expect("data cookie is set");
    common::tamper_cookie_value(&mut data_cookie);
    browser.set(data_cookie);

    let res = app
        .oneshot(browser.request("/get-user"))
        .await
        .expect("service call succeeds");
    let status = res.status();
    (status, common::body_string(res.into_body()).await)
}

#[tokio::test]
async fn untampered_cookie_is_read() {
    let app = routes().layer(common::make_layer(common::secret_config()).await);
    let mut browser = Browser::new();

    let res = app
        .clone()
        .oneshot(browser.request("/set-user"))
        .await
        .expect("service call succeeds");
    browser.absorb(res.headers());

    let res = app
        .oneshot(browser.request("/get-user"))
        .await
        .expect("service call succeeds");

    assert_eq!(common::body_string(res.into_body()).await, "alice");
}

#[tokio::test]
async fn tampered_cookie_reads_as_absent() {
    let (status, body) = tampered_get_user(common::secret_config()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "none");
}

#[tokio::test]
async fn tampered_cookie_is_an_error_when_strict() {
    let config = common::secret_config().with_decode_failure(DecodeFailurePolicy::Strict);
    let (status, _) = tampered_get_user(config).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn rotated_secret_reads_as_absent() {
    // Exercise: a cookie sealed under one secret is presented to a layer with another.
    // Expectation: the layer cannot open it and treats the session as new.
    let database = common::database().await;
    let sealing = routes().layer(
        tower_sessions_hybrid_store::HybridSessionManagerLayer::new(database.clone())
            .with_config(common::secret_config()),
    );
    let rotated = routes().layer(
        tower_sessions_hybrid_store::HybridSessionManagerLayer::new(database)
            .with_config(common::secret_config().with_secret("rotated")),
    );
    let mut browser = Browser::new();

    let res = sealing
        .oneshot(browser.request("/set-user"))
        .await
        .expect("service call succeeds");
    browser.absorb(res.headers());

    let res = rotated
        .oneshot(browser.request("/get-user"))
        .await
        .expect("service call succeeds");

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(common::body_string(res.into_body()).await, "none");
}
