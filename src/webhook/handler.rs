//! Admission request handling
//!
//! The handler owns the request lifecycle: read the capped body, decode
//! and validate the admission-review envelope, hand the request to the
//! mutator, and encode the response. Validation failures are client
//! errors; everything after the validation gate fails open and produces
//! `allowed: true`, with `intersect-strict` denials as the single
//! deliberate exception.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use futures::FutureExt;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::DynamicObject;
use tracing::{debug, error, warn};

use crate::webhook::mutator::MutationOutcome;
use crate::webhook::WebhookState;
use crate::ADMISSION_API_VERSION;

/// Upper bound on running the mutator for one request
///
/// The router's timeout layer bounds the request transport; this deadline
/// converts an overlong mutation into the fail-open path instead of a
/// timeout response.
const PROCESS_DEADLINE: Duration = Duration::from_secs(30);

/// Handle a mutating admission review POSTed to `/mutate`
pub async fn mutate_handler(State(state): State<Arc<WebhookState>>, body: Bytes) -> Response {
    if body.is_empty() {
        return bad_request("request body is empty");
    }

    let review: AdmissionReview<DynamicObject> = match serde_json::from_slice(&body) {
        Ok(review) => review,
        Err(e) => {
            debug!(error = %e, "undecodable admission review");
            return bad_request(format!("failed to decode admission review: {e}"));
        }
    };

    if review.types.api_version.is_empty() {
        return bad_request("apiVersion is required");
    }
    if review.types.api_version != ADMISSION_API_VERSION {
        return bad_request(format!(
            "unsupported apiVersion: {}",
            review.types.api_version
        ));
    }

    let types = review.types.clone();
    let Some(mut request) = review.request else {
        return bad_request("admission request is missing");
    };
    // The envelope's TypeMeta travels with the request so the response
    // review carries the right apiVersion
    request.types = types;

    if request.uid.is_empty() {
        return bad_request("admission request uid is empty");
    }

    let outcome = process(&state, &request).await;

    let mut response = AdmissionResponse::from(&request);
    match outcome {
        MutationOutcome::Patch(patch) if !patch.0.is_empty() => {
            response = match response.with_patch(patch) {
                Ok(with_patch) => with_patch,
                Err(e) => {
                    error!(uid = %request.uid, error = %e, "failed to serialize patch, allowing unchanged");
                    AdmissionResponse::from(&request)
                }
            };
        }
        MutationOutcome::Patch(_) | MutationOutcome::Unchanged => {}
        MutationOutcome::Deny(reason) => {
            response = response.deny(reason);
        }
    }

    match serde_json::to_vec(&response.into_review()) {
        Ok(encoded) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            encoded,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode admission response");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("failed to encode admission response: {e}"),
            )
                .into_response()
        }
    }
}

/// Run the mutator under a panic boundary and a processing deadline
///
/// A panic inside the mutator is a programming error, not grounds for
/// blocking a pod: it is absorbed into the empty mutation.
async fn process(state: &WebhookState, request: &AdmissionRequest<DynamicObject>) -> MutationOutcome {
    let mutation = AssertUnwindSafe(state.mutator.mutate(request)).catch_unwind();
    match tokio::time::timeout(PROCESS_DEADLINE, mutation).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(_)) => {
            error!(uid = %request.uid, "mutator panicked, allowing admission unchanged");
            MutationOutcome::Unchanged
        }
        Err(_) => {
            warn!(uid = %request.uid, "mutation deadline exceeded, allowing admission unchanged");
            MutationOutcome::Unchanged
        }
    }
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, message.into()).into_response()
}

/// Liveness endpoint
pub async fn health() -> &'static str {
    "OK"
}

/// Readiness endpoint
pub async fn ready() -> &'static str {
    "Ready"
}
