//! Rejection responses.
//!
//! Every stage that short-circuits does so with a [`ShieldError`]. The body is
//! always `{"error": {"code": ..., "message": ...}}`; messages never carry
//! detection internals.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// The rejection taxonomy of the stage chain.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ShieldError {
    /// Deadline exceeded before downstream answered.
    #[error("request timed out")]
    Timeout,

    /// Body not fully received within the slow-client deadline.
    #[error("request body not received in time")]
    SlowClient,

    /// The client key already holds its full share of open requests.
    #[error("too many concurrent requests")]
    Overloaded,

    /// A list or the body exceeded a configured ceiling.
    #[error("payload too large: limit is {limit} {unit}")]
    PayloadTooLarge { limit: usize, unit: &'static str },

    /// Pattern match, malformed payload, or a stage that could not decide.
    #[error("invalid request")]
    InvalidRequest,

    /// Downstream failed without producing a response.
    #[error("internal error")]
    Internal,

    /// The upstream application could not be reached.
    #[error("upstream unavailable")]
    BadGateway,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Serialize)]
struct ErrorDetail<'a> {
    code: &'a str,
    message: String,
}

impl ShieldError {
    pub fn status(&self) -> StatusCode {
        match self {
            ShieldError::Timeout | ShieldError::SlowClient => StatusCode::REQUEST_TIMEOUT,
            ShieldError::Overloaded => StatusCode::TOO_MANY_REQUESTS,
            ShieldError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            ShieldError::InvalidRequest => StatusCode::BAD_REQUEST,
            ShieldError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            ShieldError::BadGateway => StatusCode::BAD_GATEWAY,
        }
    }

    /// Machine-readable code sent to the client.
    pub fn code(&self) -> &'static str {
        match self {
            ShieldError::Timeout => "REQUEST_TIMEOUT",
            ShieldError::SlowClient => "SLOW_CLIENT",
            ShieldError::Overloaded => "TOO_MANY_CONCURRENT_REQUESTS",
            ShieldError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            ShieldError::InvalidRequest => "INVALID_REQUEST",
            ShieldError::Internal => "INTERNAL_ERROR",
            ShieldError::BadGateway => "BAD_GATEWAY",
        }
    }

    /// Label used for the rejection counter.
    pub fn reason(&self) -> &'static str {
        match self {
            ShieldError::Timeout => "timeout",
            ShieldError::SlowClient => "slow_client",
            ShieldError::Overloaded => "overloaded",
            ShieldError::PayloadTooLarge { .. } => "payload_too_large",
            ShieldError::InvalidRequest => "invalid_request",
            ShieldError::Internal => "internal",
            ShieldError::BadGateway => "bad_gateway",
        }
    }

    fn message(&self) -> String {
        match self {
            ShieldError::Timeout => "The request took too long to process.".to_string(),
            ShieldError::SlowClient => "The request was not received in time.".to_string(),
            ShieldError::Overloaded => {
                "Too many concurrent requests. Please retry shortly.".to_string()
            }
            ShieldError::PayloadTooLarge { limit, unit } => {
                format!("Payload too large. The limit is {limit} {unit}.")
            }
            ShieldError::InvalidRequest => "Invalid request.".to_string(),
            ShieldError::Internal => "Internal error.".to_string(),
            ShieldError::BadGateway => "The application is unavailable.".to_string(),
        }
    }
}

impl IntoResponse for ShieldError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code(),
                message: self.message(),
            },
        };
        let mut response = (self.status(), Json(body)).into_response();

        match self {
            ShieldError::SlowClient => {
                response
                    .headers_mut()
                    .insert(header::CONNECTION, HeaderValue::from_static("close"));
            }
            ShieldError::Overloaded => {
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from_static("1"));
            }
            _ => {}
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    async fn body_of(err: ShieldError) -> (StatusCode, Value, Response) {
        let response = err.into_response();
        let status = response.status();
        let (parts, body) = response.into_parts();
        let bytes = to_bytes(body, 4096).await.unwrap();
        (
            status,
            serde_json::from_slice(&bytes).unwrap(),
            Response::from_parts(parts, axum::body::Body::empty()),
        )
    }

    #[tokio::test]
    async fn statuses_follow_taxonomy() {
        assert_eq!(ShieldError::Timeout.status(), StatusCode::REQUEST_TIMEOUT);
        assert_eq!(ShieldError::Overloaded.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ShieldError::InvalidRequest.status(), StatusCode::BAD_REQUEST);
        assert!(ShieldError::PayloadTooLarge { limit: 1, unit: "items" }
            .status()
            .is_client_error());
    }

    #[tokio::test]
    async fn body_carries_code_and_message() {
        let (status, body, _) = body_of(ShieldError::PayloadTooLarge {
            limit: 100,
            unit: "array items",
        })
        .await;
        assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(body["error"]["code"], "PAYLOAD_TOO_LARGE");
        assert!(body["error"]["message"].as_str().unwrap().contains("100"));
    }

    #[tokio::test]
    async fn slow_client_closes_connection() {
        let (_, _, response) = body_of(ShieldError::SlowClient).await;
        assert_eq!(response.headers()[header::CONNECTION], "close");
    }

    #[tokio::test]
    async fn overload_suggests_retry() {
        let (_, body, response) = body_of(ShieldError::Overloaded).await;
        assert_eq!(body["error"]["code"], "TOO_MANY_CONCURRENT_REQUESTS");
        assert_eq!(response.headers()[header::RETRY_AFTER], "1");
    }
}
