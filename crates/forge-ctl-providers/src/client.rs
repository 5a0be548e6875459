// forge-ctl-providers/src/client.rs
// ============================================================================
// Module: HTTP Provider Client Helper
// Description: Shared client construction and response classification for
//              every HTTP-backed external collaborator.
// Purpose: Keep the transient/permanent failure classification in one place
//          so every provider applies the same fail-closed rule.
// Dependencies: reqwest
// ============================================================================

//! ## Overview
//! Every provider in this crate issues bounded JSON HTTP calls against a
//! configured base URL and classifies failures into transient (timeout,
//! 5xx, 429) or permanent (4xx other than 429) before handing the result to
//! its collaborator-specific error type. None of these clients follow
//! redirects; a collaborator endpoint that needs one is misconfigured.

use std::time::Duration;

use reqwest::Client;
use reqwest::StatusCode;
use reqwest::redirect::Policy;
use serde::Deserialize;

/// Shared configuration for an HTTP-backed collaborator client.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpProviderConfig {
    /// Base URL of the collaborator endpoint.
    pub base_url: String,
    /// Bearer token presented on every request, if the endpoint requires one.
    pub bearer_token: Option<String>,
    /// Per-call timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Maximum response body size accepted, in bytes.
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
}

const fn default_timeout_ms() -> u64 {
    60_000
}

const fn default_max_response_bytes() -> usize {
    4 * 1024 * 1024
}

/// Classification of an HTTP response or transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Safe to retry with backoff: timeout, 5xx, or 429.
    Transient,
    /// Fails the action immediately: authorization or bad request.
    Permanent,
}

/// Builds a `reqwest::Client` per this crate's shared policy: bounded
/// timeout, no redirect following.
///
/// # Errors
///
/// Returns the underlying `reqwest::Error` when the client cannot be built.
pub fn build_client(config: &HttpProviderConfig) -> Result<Client, reqwest::Error> {
    Client::builder().timeout(Duration::from_millis(config.timeout_ms)).redirect(Policy::none()).build()
}

/// Classifies an HTTP status code into the transient/permanent split: 5xx
/// and 429 are transient, every other 4xx is permanent.
#[must_use]
pub fn classify_status(status: StatusCode) -> Classification {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Classification::Transient
    } else {
        Classification::Permanent
    }
}

/// Classifies a transport-level `reqwest::Error`: timeouts are transient,
/// everything else (malformed URL, TLS failure, connect refused) is treated
/// as permanent since retrying will not change the outcome.
#[must_use]
pub fn classify_transport_error(error: &reqwest::Error) -> Classification {
    if error.is_timeout() || error.is_connect() {
        Classification::Transient
    } else {
        Classification::Permanent
    }
}

/// Reads a response body while enforcing `max_bytes`. Returns `Ok(None)`
/// when the body exceeds the limit rather than buffering it fully.
///
/// # Errors
///
/// Returns the underlying `reqwest::Error` on a transport failure.
pub async fn read_body_limited(response: reqwest::Response, max_bytes: usize) -> Result<Option<bytes::Bytes>, reqwest::Error> {
    let limit = u64::try_from(max_bytes).unwrap_or(u64::MAX);
    if let Some(expected) = response.content_length() {
        if expected > limit {
            return Ok(None);
        }
    }
    let body = response.bytes().await?;
    if body.len() > max_bytes { Ok(None) } else { Ok(Some(body)) }
}

/// Outcome of [`parse_json_limited`].
#[derive(Debug, thiserror::Error)]
pub enum JsonReadError {
    /// The body exceeded the configured `max_response_bytes`.
    #[error("response body exceeded the configured size limit")]
    TooLarge,
    /// The body could not be read off the wire.
    #[error("transport error reading response body: {0}")]
    Transport(reqwest::Error),
    /// The body was read but did not deserialize as the expected type.
    #[error("malformed response body: {0}")]
    Malformed(serde_json::Error),
}

/// Reads and deserializes a JSON response body, enforcing `max_bytes` via
/// [`read_body_limited`] rather than buffering an unbounded body.
///
/// # Errors
///
/// Returns [`JsonReadError`] on an oversized body, a transport failure, or
/// malformed JSON.
pub async fn parse_json_limited<T>(response: reqwest::Response, max_bytes: usize) -> Result<T, JsonReadError>
where
    T: serde::de::DeserializeOwned,
{
    let body = read_body_limited(response, max_bytes).await.map_err(JsonReadError::Transport)?.ok_or(JsonReadError::TooLarge)?;
    serde_json::from_slice(&body).map_err(JsonReadError::Malformed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_errors_and_rate_limits_are_transient() {
        assert_eq!(classify_status(StatusCode::INTERNAL_SERVER_ERROR), Classification::Transient);
        assert_eq!(classify_status(StatusCode::BAD_GATEWAY), Classification::Transient);
        assert_eq!(classify_status(StatusCode::TOO_MANY_REQUESTS), Classification::Transient);
    }

    #[test]
    fn other_client_errors_are_permanent() {
        assert_eq!(classify_status(StatusCode::BAD_REQUEST), Classification::Permanent);
        assert_eq!(classify_status(StatusCode::UNAUTHORIZED), Classification::Permanent);
        assert_eq!(classify_status(StatusCode::NOT_FOUND), Classification::Permanent);
    }

    #[test]
    fn provider_config_deserializes_with_defaults() {
        let config: HttpProviderConfig = serde_json::from_str(r#"{"base_url":"https://worker.internal"}"#).expect("parse");
        assert_eq!(config.timeout_ms, default_timeout_ms());
        assert_eq!(config.max_response_bytes, default_max_response_bytes());
        assert!(config.bearer_token.is_none());
    }
}
