//! Slow-client (slowloris) defense for request bodies.
//!
//! Header reads are bounded by hyper's `header_read_timeout` on each
//! connection. This module bounds the body: it must arrive in full within the
//! same deadline, and within the byte cap.

use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReceiveError {
    #[error("body not received within {0:?}")]
    Deadline(Duration),

    #[error("body exceeds {0} bytes")]
    TooLarge(usize),

    #[error("failed to read body: {0}")]
    Read(String),
}

/// Declared `Content-Length`, if any.
pub fn declared_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

/// Buffer `body` completely, failing if it takes longer than `deadline` or
/// grows past `max_bytes`. The timer is dropped as soon as the body is in.
pub async fn receive_body(
    body: Body,
    deadline: Duration,
    max_bytes: usize,
) -> Result<Bytes, ReceiveError> {
    let collect = Limited::new(body, max_bytes).collect();
    match tokio::time::timeout(deadline, collect).await {
        Err(_) => Err(ReceiveError::Deadline(deadline)),
        Ok(Err(e)) if e.downcast_ref::<LengthLimitError>().is_some() => {
            Err(ReceiveError::TooLarge(max_bytes))
        }
        Ok(Err(e)) => Err(ReceiveError::Read(e.to_string())),
        Ok(Ok(collected)) => Ok(collected.to_bytes()),
    }
}
