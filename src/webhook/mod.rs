//! Mutating admission webhook
//!
//! This module wires the admission pipeline together: the router exposes
//! `/mutate` for admission reviews plus unconditional `/health` and
//! `/ready` probes, and the server module terminates TLS in front of it.
//!
//! The pipeline fails open by design. Once an admission review passes
//! validation, the response always allows the pod; a patch is attached
//! when the mutator decided one is needed.

pub mod handler;
pub mod mutator;
pub mod server;

use std::sync::Arc;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use tower::timeout::TimeoutLayer;
use tower::{BoxError, ServiceBuilder};

use crate::config::Config;
use crate::credentials::SecretStore;
use crate::resolver::{ArchResolver, ResolverOptions};
use crate::Result;
use mutator::Mutator;

/// Bound on one request end to end, from the first body byte read to the
/// response write. Slow-drip clients are cut off here, before the body
/// cap is ever reached.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state for webhook handlers
pub struct WebhookState {
    /// The pod mutator all admission requests are routed through
    pub mutator: Mutator,
}

impl WebhookState {
    /// Build the webhook state from configuration
    ///
    /// `store` provides pull-secret access; in production this is a
    /// [`crate::credentials::KubeSecretStore`] over the cluster client.
    pub fn new(store: Box<dyn SecretStore>, config: &Config) -> Result<Self> {
        let resolver = ArchResolver::new(
            store,
            ResolverOptions {
                default_arch: config.default_arch.clone(),
                cache_ttl: config.cache_timeout,
                ..Default::default()
            },
        )?;

        Ok(Self {
            mutator: Mutator::new(resolver, config.strategy),
        })
    }
}

/// Create the webhook router with all endpoints
///
/// - `POST /mutate` - pod admission reviews (body capped at 1 MiB)
/// - `GET /health` - liveness, always 200
/// - `GET /ready` - readiness, always 200
///
/// Every route runs under a 30 s request timeout; the timeout spans body
/// extraction, so it bounds clients that trickle bytes as well as slow
/// registry lookups.
pub fn webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate", post(handler::mutate_handler))
        .route("/health", get(handler::health))
        .route("/ready", get(handler::ready))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(middleware_error))
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
                .layer(DefaultBodyLimit::max(crate::MAX_REQUEST_BODY_BYTES)),
        )
        .with_state(state)
}

/// Map middleware failures onto responses
///
/// The only error the stack produces is the request timeout elapsing.
async fn middleware_error(err: BoxError) -> (StatusCode, String) {
    if err.is::<tower::timeout::error::Elapsed>() {
        (StatusCode::REQUEST_TIMEOUT, "request timed out".to_string())
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("middleware error: {err}"),
        )
    }
}
