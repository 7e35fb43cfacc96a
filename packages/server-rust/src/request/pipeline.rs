//! Pipeline composition: assembles the per-request stages in their
//! fixed order around the application's routes.
//!
//! Stage order (outermost to innermost): transport layers (trust
//! proxy, request id, tracing) -> context store -> identity resolver
//! chain -> authorization gate -> request logger -> body limit ->
//! schema validation -> routes / no-route fallback.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Request};
use axum::http::Method;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Router};
use tracing::warn;

use crate::config::MicroserviceConfig;
use crate::error::HttpError;
use crate::network::middleware::build_http_layers;
use crate::request::auth::jwt::KeyError;
use crate::request::auth::{
    AuthChainLayer, AuthGateLayer, IdentityResolver, PreSharedTokenResolver, SignedTokenResolver,
};
use crate::request::context::{self, ContextLayer};
use crate::request::logger::RequestLogLayer;
use crate::request::validate::{SchemaValidator, ValidationLayer};

/// Chassis state available to the fallback handler.
#[derive(Debug)]
pub(crate) struct PipelineState {
    pub log_404: bool,
}

/// Fallback for unmatched routes.
///
/// `OPTIONS` passes through untouched (preflight compatibility);
/// everything else becomes the distinguished not-found error. Route
/// misses are not access-logged unless the log-404 policy is on.
async fn no_route(
    Extension(state): Extension<Arc<PipelineState>>,
    req: Request,
) -> Response {
    if req.method() == Method::OPTIONS {
        return ().into_response();
    }
    let path = req
        .uri()
        .path_and_query()
        .map_or_else(|| req.uri().path().to_string(), ToString::to_string);
    if !state.log_404 {
        if let Ok(ctx) = context::try_current() {
            ctx.set_suppress_logging(true);
        }
    }
    HttpError::not_found(&path).into_response()
}

/// Builds the resolver chain from the configuration: pre-shared
/// tokens first (higher-trust internal callers), then signed tokens.
/// Each resolver is enabled only when its configuration is present.
fn build_resolvers(
    config: &MicroserviceConfig,
) -> Result<Vec<Arc<dyn IdentityResolver>>, KeyError> {
    let mut resolvers: Vec<Arc<dyn IdentityResolver>> = Vec::new();
    if !config.app_keys.is_empty() {
        resolvers.push(Arc::new(PreSharedTokenResolver::new(
            config.app_keys.clone(),
            config.forward_unknown_bearer,
        )));
    }
    if let Some(path) = &config.jwt_public_key {
        resolvers.push(Arc::new(SignedTokenResolver::from_pem_file(path)?));
    }
    Ok(resolvers)
}

/// Wraps the application routes with the full pipeline.
///
/// # Errors
///
/// [`KeyError`] when the configured signed-token verification key
/// cannot be loaded.
pub(crate) fn build_router(
    config: &MicroserviceConfig,
    routes: Router,
    validator: Option<Arc<dyn SchemaValidator>>,
) -> Result<Router, KeyError> {
    let resolvers = build_resolvers(config)?;
    let state = Arc::new(PipelineState {
        log_404: config.log_404,
    });

    let mut router = routes.fallback(no_route);

    match (&config.open_api, validator) {
        (Some(open_api), Some(validator)) => {
            router = router.layer(ValidationLayer::new(
                validator,
                open_api.validate_response,
                config.max_upload_size,
            ));
        }
        (Some(_), None) => {
            warn!("OpenAPI configuration present but no schema validator was supplied; validation stage not installed");
        }
        _ => {}
    }

    // `Router::layer` wraps everything added so far, so later layers
    // are outermost. Innermost-first here yields the documented order.
    Ok(router
        .layer(DefaultBodyLimit::max(config.max_upload_size))
        .layer(RequestLogLayer)
        .layer(AuthGateLayer::new(config.forward_unknown_bearer))
        .layer(AuthChainLayer::new(resolvers))
        .layer(ContextLayer)
        .layer(Extension(state))
        .layer(build_http_layers(config.trust_proxy.trusts_upstream())))
}
