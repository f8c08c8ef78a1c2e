use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use http::{Request, Response};
use tower_cookies::{CookieManager, Cookies};
use tower_layer::Layer;
use tower_service::Service;
use tower_sessions_core::{
    Session,
    session::{Expiry, Id},
};

use crate::{
    config::HybridSessionConfig, coordinator::HybridCoordinator, cookie::CookieBackend,
    database::DatabaseBackend, store::HybridStore,
};

#[derive(Debug, Clone)]
pub struct HybridSessionManagerLayer {
    config: HybridSessionConfig,
    database: DatabaseBackend,
}

impl HybridSessionManagerLayer {
    pub fn new(database: DatabaseBackend) -> Self {
        let config = HybridSessionConfig::default();
        Self {
            database: database.with_config(config.clone()),
            config,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: HybridSessionConfig) -> Self {
        self.database = self.database.with_config(config.clone());
        self.config = config;
        self
    }

    /// The record store, configured like the layer. Useful for scheduling
    /// [`continuously_gc`](DatabaseBackend::continuously_gc).
    pub fn database(&self) -> &DatabaseBackend {
        &self.database
    }
}

#[derive(Debug, Clone)]
pub struct HybridSessionManager<S> {
    inner: S,
    config: HybridSessionConfig,
    database: DatabaseBackend,
}

impl<S> Layer<S> for HybridSessionManagerLayer {
    type Service = CookieManager<HybridSessionManager<S>>;

    fn layer(&self, inner: S) -> Self::Service {
        CookieManager::new(HybridSessionManager {
            inner,
            config: self.config.clone(),
            database: self.database.clone(),
        })
    }
}

fn internal_error<B: Default>() -> Response<B> {
    let mut res = Response::default();
    *res.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
    res
}

/// Persist the session after the handler ran and refresh or clear the id cookie.
async fn finish_session(
    session: &Session,
    cookies: &Cookies,
    config: &HybridSessionConfig,
    had_id_cookie: bool,
) -> Result<(), tower_sessions_core::session::Error> {
    if session.is_empty().await {
        if had_id_cookie {
            cookies.remove(config.removal_cookie(config.name.to_string()));
        }
        return Ok(());
    }

    // The data cookie was force-expired at open, so every live session is written
    // back, modified or not.
    session.save().await?;

    if let Some(id) = session.id() {
        cookies.add(config.build_cookie(config.name.to_string(), id.to_string()));
    }

    Ok(())
}

impl<ReqBody, ResBody, S> Service<Request<ReqBody>> for HybridSessionManager<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    S::Error: Send,
    ReqBody: Send + 'static,
    ResBody: Default + Send,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<ReqBody>) -> Self::Future {
        let config = self.config.clone();
        let database = self.database.clone();

        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let Some(cookies) = req.extensions().get::<Cookies>().cloned() else {
                return Ok(internal_error());
            };

            let id_cookie = cookies.get(&config.name);
            let session_id = id_cookie
                .as_ref()
                .and_then(|cookie| cookie.value().parse::<Id>().ok());
            if id_cookie.is_some() && session_id.is_none() {
                tracing::warn!("session id cookie is malformed");
            }

            let coordinator = HybridCoordinator::new(&config)
                .with_backend(CookieBackend::new(cookies.clone(), config.clone()))
                .with_backend(database);
            if let Err(err) = coordinator.open(&config.name).await {
                tracing::error!(err = %err, "session backends failed to open");
                return Ok(internal_error());
            }

            let store = Arc::new(HybridStore::new(coordinator));
            let session = Session::new(
                session_id,
                store.clone(),
                Some(Expiry::OnInactivity(config.lifetime)),
            );
            req.extensions_mut().insert(session.clone());

            let res = match inner.call(req).await {
                Ok(res) => res,
                Err(err) => {
                    store.coordinator().close().await;
                    return Err(err);
                }
            };

            let finished = finish_session(&session, &cookies, &config, id_cookie.is_some()).await;
            store.coordinator().close().await;

            if let Err(err) = finished {
                tracing::error!(err = %err, "hybrid session save failed");
                return Ok(internal_error());
            }

            Ok(res)
        })
    }
}
