//! Identity resolution: the ordered resolver chain and the
//! authorization gate.
//!
//! Resolvers run in configured order with strict short-circuit: the
//! first attached identity stops the chain, and an explicit rejection
//! ends the request immediately. Each resolver is a pure function of
//! `(request, credential)` returning attach, skip, or reject;
//! recoverable conditions (missing credential, prefix mismatch,
//! non-JWS shape) are "skip", never errors.

pub mod jwt;
pub mod preshared;

pub use jwt::SignedTokenResolver;
pub use preshared::PreSharedTokenResolver;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context as TaskContext, Poll};

use async_trait::async_trait;
use axum::extract::Request;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use tower::{Layer, Service};
use tracing::debug;

use gantry_core::{bearer_token, Consumer};

use crate::error::HttpError;
use crate::request::context;

/// Outcome of a single resolver.
#[derive(Debug)]
pub enum Resolution {
    /// The resolver established an identity; the chain stops here.
    Attached(Consumer),
    /// The resolver declined; the next resolver runs.
    Skip,
}

/// A single authentication strategy in the chain.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Short name for log records.
    fn name(&self) -> &'static str;

    /// Inspects the request and the extracted bearer credential.
    ///
    /// # Errors
    ///
    /// Returns an [`HttpError`] to reject the request outright (e.g.
    /// an unknown pre-shared token under a strict policy, or a signed
    /// token with a bad signature).
    async fn resolve(&self, parts: &Parts, token: Option<&str>) -> Result<Resolution, HttpError>;
}

fn extract_token(parts: &Parts) -> Option<String> {
    bearer_token(
        parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok()),
        parts.uri.query(),
    )
}

// ---------------------------------------------------------------------------
// AuthChainLayer
// ---------------------------------------------------------------------------

/// Tower layer running the ordered resolver chain.
#[derive(Clone)]
pub struct AuthChainLayer {
    resolvers: Arc<Vec<Arc<dyn IdentityResolver>>>,
}

impl AuthChainLayer {
    #[must_use]
    pub fn new(resolvers: Vec<Arc<dyn IdentityResolver>>) -> Self {
        Self {
            resolvers: Arc::new(resolvers),
        }
    }
}

impl<S> Layer<S> for AuthChainLayer {
    type Service = AuthChainService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthChainService {
            inner,
            resolvers: Arc::clone(&self.resolvers),
        }
    }
}

/// Service wrapper applied by [`AuthChainLayer`].
#[derive(Clone)]
pub struct AuthChainService<S> {
    inner: S,
    resolvers: Arc<Vec<Arc<dyn IdentityResolver>>>,
}

impl<S> Service<Request> for AuthChainService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let resolvers = Arc::clone(&self.resolvers);

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let token = extract_token(&parts);

            let ctx = match context::try_current() {
                Ok(ctx) => ctx,
                Err(err) => return Ok(HttpError::from(err).into_response()),
            };

            for resolver in resolvers.iter() {
                // Strict short-circuit: an attached identity ends the chain.
                if ctx.consumer().is_some() {
                    break;
                }
                match resolver.resolve(&parts, token.as_deref()).await {
                    Ok(Resolution::Attached(consumer)) => {
                        let name = consumer.display_name().to_string();
                        if let Err(err) = ctx.attach_consumer(consumer) {
                            return Ok(HttpError::from(err).into_response());
                        }
                        debug!(consumer = %name, resolver = resolver.name(), "consumer identity attached");
                        break;
                    }
                    Ok(Resolution::Skip) => {}
                    Err(err) => return Ok(err.into_response()),
                }
            }

            inner.call(Request::from_parts(parts, body)).await
        })
    }
}

// ---------------------------------------------------------------------------
// AuthGateLayer
// ---------------------------------------------------------------------------

/// Post-chain policy gate for unresolved bearer credentials.
///
/// A request that presented a bearer credential but gained no identity
/// is rejected with 401 -- unless unknown-bearer forwarding is enabled,
/// in which case it continues unauthenticated. Requests without any
/// credential always pass (anonymous; downstream authorization
/// decides further).
#[derive(Debug, Clone, Copy)]
pub struct AuthGateLayer {
    forward_unknown_bearer: bool,
}

impl AuthGateLayer {
    #[must_use]
    pub fn new(forward_unknown_bearer: bool) -> Self {
        Self {
            forward_unknown_bearer,
        }
    }
}

impl<S> Layer<S> for AuthGateLayer {
    type Service = AuthGateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthGateService {
            inner,
            forward_unknown_bearer: self.forward_unknown_bearer,
        }
    }
}

/// Service wrapper applied by [`AuthGateLayer`].
#[derive(Debug, Clone)]
pub struct AuthGateService<S> {
    inner: S,
    forward_unknown_bearer: bool,
}

impl<S> Service<Request> for AuthGateService<S>
where
    S: Service<Request, Response = Response> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Error: Send,
{
    type Response = Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut TaskContext<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let forward_unknown_bearer = self.forward_unknown_bearer;

        Box::pin(async move {
            if !forward_unknown_bearer {
                let (parts, body) = req.into_parts();
                if extract_token(&parts).is_some() {
                    match context::current_consumer() {
                        Ok(Some(_)) => {}
                        Ok(None) => return Ok(HttpError::unauthorized().into_response()),
                        Err(err) => return Ok(HttpError::from(err).into_response()),
                    }
                }
                return inner.call(Request::from_parts(parts, body)).await;
            }
            inner.call(req).await
        })
    }
}
