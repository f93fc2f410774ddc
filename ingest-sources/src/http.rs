use std::time::{Duration, Instant};

use ingest::error::{ErrorKind, IngestError, IngestResult};
use ingest::ingest_error;
use ingest::metrics::SOURCE_LABEL;
use metrics::{counter, histogram};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::metrics::{
    INGEST_SOURCE_REQUEST_DURATION_SECONDS, INGEST_SOURCE_REQUESTS_TOTAL, STATUS_LABEL,
};

/// Timeout of a single source request, reporting APIs can take long for large pages.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Maximum number of body characters kept in error details.
const MAX_ERROR_BODY_CHARS: usize = 512;

/// Builds the HTTP client shared by every request of a connector.
pub(crate) fn build_client() -> Client {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_default()
}

/// A response whose body has been read completely.
#[derive(Debug)]
pub(crate) struct RawResponse {
    pub status: StatusCode,
    pub body: String,
}

impl RawResponse {
    /// Deserializes the body of a successful response.
    pub fn json<T: DeserializeOwned>(&self) -> IngestResult<T> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

/// Sends `request` and reads the whole body.
///
/// Only transport failures are errors here, the status is left to the caller since every API
/// encodes its failures differently.
pub(crate) async fn send(source: &'static str, request: RequestBuilder) -> IngestResult<RawResponse> {
    let started = Instant::now();

    let response = match request.send().await {
        Ok(response) => response,
        Err(err) => {
            counter!(INGEST_SOURCE_REQUESTS_TOTAL, SOURCE_LABEL => source, STATUS_LABEL => "transport")
                .increment(1);
            return Err(transport_error(source, err));
        }
    };

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|err| transport_error(source, err))?;

    counter!(INGEST_SOURCE_REQUESTS_TOTAL, SOURCE_LABEL => source, STATUS_LABEL => status_class(status))
        .increment(1);
    histogram!(INGEST_SOURCE_REQUEST_DURATION_SECONDS, SOURCE_LABEL => source)
        .record(started.elapsed().as_secs_f64());
    debug!(source, %status, bytes = body.len(), "source responded");

    Ok(RawResponse { status, body })
}

fn status_class(status: StatusCode) -> &'static str {
    match status.as_u16() {
        200..=299 => "2xx",
        300..=399 => "3xx",
        400..=499 => "4xx",
        _ => "5xx",
    }
}

/// Classifies an unsuccessful HTTP status.
///
/// Throttling and server side failures are transient, rejected credentials are an
/// authentication problem and any other client error means the request itself is wrong.
pub(crate) fn status_error_kind(status: StatusCode) -> ErrorKind {
    match status {
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::SourceRateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ErrorKind::AuthenticationError,
        StatusCode::REQUEST_TIMEOUT => ErrorKind::SourceRequestFailed,
        status if status.is_server_error() => ErrorKind::SourceRequestFailed,
        _ => ErrorKind::SourceRequestRejected,
    }
}

/// Builds the error of an unsuccessful response of kind `kind`.
pub(crate) fn response_error(
    source: &'static str,
    kind: ErrorKind,
    response: &RawResponse,
) -> IngestError {
    ingest_error!(
        kind,
        "Source request failed",
        format!(
            "{source} responded with {}: {}",
            response.status,
            truncate(&response.body)
        )
    )
}

fn transport_error(source: &'static str, err: reqwest::Error) -> IngestError {
    let kind = if err.is_decode() {
        ErrorKind::DeserializationError
    } else {
        ErrorKind::SourceConnectionFailed
    };

    ingest_error!(
        kind,
        "Source request could not be completed",
        format!("request to {source} failed: {err}"),
        source: err
    )
}

fn truncate(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_BODY_CHARS) {
        Some((end, _)) => &body[..end],
        None => body,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(
            status_error_kind(StatusCode::TOO_MANY_REQUESTS),
            ErrorKind::SourceRateLimited
        );
        assert_eq!(
            status_error_kind(StatusCode::BAD_GATEWAY),
            ErrorKind::SourceRequestFailed
        );
        assert_eq!(
            status_error_kind(StatusCode::SERVICE_UNAVAILABLE),
            ErrorKind::SourceRequestFailed
        );
        assert_eq!(
            status_error_kind(StatusCode::UNAUTHORIZED),
            ErrorKind::AuthenticationError
        );
        assert_eq!(
            status_error_kind(StatusCode::BAD_REQUEST),
            ErrorKind::SourceRequestRejected
        );
        assert_eq!(
            status_error_kind(StatusCode::NOT_FOUND),
            ErrorKind::SourceRequestRejected
        );
    }

    #[test]
    fn test_error_detail_is_truncated() {
        let response = RawResponse {
            status: StatusCode::BAD_REQUEST,
            body: "x".repeat(2_000),
        };

        let err = response_error("test", ErrorKind::SourceRequestRejected, &response);

        assert_eq!(err.kind(), ErrorKind::SourceRequestRejected);
        assert!(err.detail().unwrap().len() < 600);
    }
}
