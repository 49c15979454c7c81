//! Response handling for failed downstream calls.
//!
//! # Responsibilities
//! - Map call errors to appropriate HTTP status codes
//! - Render a JSON error body
//! - Advertise `Retry-After` while a breaker is open
//!
//! # Design Decisions
//! - Downstream bodies are never echoed back to the client
//! - Cancelled calls have no natural status; they render as 503

use axum::response::{IntoResponse, Response};
use axum::Json;
use http::header::RETRY_AFTER;
use http::{HeaderValue, StatusCode};
use serde::Serialize;

use crate::call::error::CallError;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for CallError {
    fn into_response(self) -> Response {
        let status = self.http_status().unwrap_or(StatusCode::SERVICE_UNAVAILABLE);
        let retry_after = self.retry_after();

        let mut response = (
            status,
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response();

        if let Some(wait) = retry_after {
            // Whole seconds, rounded up so clients never retry early.
            let secs = wait.as_secs() + u64::from(wait.subsec_nanos() > 0);
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use crate::call::outcome::FailureCause;

    #[test]
    fn test_circuit_open_sets_retry_after() {
        let response = CallError::CircuitOpen {
            dependency: "auth".into(),
            retry_after: Some(Duration::from_millis(2_500)),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(response.headers().get(RETRY_AFTER).unwrap(), "3");
    }

    #[test]
    fn test_not_found_passes_through() {
        let response = CallError::PermanentFailure(FailureCause::Status {
            status: StatusCode::NOT_FOUND,
            body: "User not found".into(),
        })
        .into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get(RETRY_AFTER).is_none());
    }

    #[test]
    fn test_deadline_is_gateway_timeout() {
        assert_eq!(
            CallError::DeadlineExceeded.into_response().status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }
}
