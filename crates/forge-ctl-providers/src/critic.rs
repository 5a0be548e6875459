// forge-ctl-providers/src/critic.rs
// ============================================================================
// Module: HTTP Critic Client
// Description: CriticClient implementation that POSTs a diff for review.
// Purpose: Plug a remote verdict-rendering service into the dispatch loop.
// Dependencies: forge-ctl-core, reqwest
// ============================================================================

//! ## Overview
//! The critic endpoint returns `{verdict: "approve"}` or
//! `{verdict: "request_changes", feedback: [...]}`; feedback accepts either
//! the structured item list or a raw string list per
//! [`forge_ctl_core::CriticFeedback`]'s untagged representation.

use async_trait::async_trait;
use forge_ctl_core::CriticClient;
use forge_ctl_core::CriticError;
use forge_ctl_core::CriticFeedback;
use forge_ctl_core::CriticVerdict;
use forge_ctl_core::FileChange;
use forge_ctl_core::Ticket;
use forge_ctl_core::TraceId;
use reqwest::Client;
use serde::Deserialize;
use serde::Serialize;

use crate::client::Classification;
use crate::client::HttpProviderConfig;
use crate::client::build_client;
use crate::client::classify_status;
use crate::client::classify_transport_error;
use crate::client::parse_json_limited;

/// HTTP-backed [`CriticClient`].
pub struct HttpCriticClient {
    config: HttpProviderConfig,
    client: Client,
}

impl HttpCriticClient {
    /// Builds a new critic client over `config`.
    ///
    /// # Errors
    ///
    /// Returns [`CriticError::Permanent`] when the HTTP client cannot be
    /// constructed.
    pub fn new(config: HttpProviderConfig) -> Result<Self, CriticError> {
        let client = build_client(&config).map_err(|err| CriticError::Permanent(err.to_string()))?;
        Ok(Self { config, client })
    }
}

#[derive(Serialize)]
struct EvaluateBody<'a> {
    ticket: &'a Ticket,
    changes: &'a [FileChange],
    trace_id: &'a TraceId,
}

#[derive(Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
enum VerdictWire {
    Approve,
    RequestChanges {
        #[serde(default = "empty_feedback")]
        feedback: CriticFeedback,
    },
}

fn empty_feedback() -> CriticFeedback {
    CriticFeedback::Structured(Vec::new())
}

#[async_trait]
impl CriticClient for HttpCriticClient {
    async fn evaluate(&self, ticket: &Ticket, changes: &[FileChange], trace_id: &TraceId) -> Result<CriticVerdict, CriticError> {
        let mut request = self.client.post(format!("{}/evaluate", self.config.base_url)).json(&EvaluateBody { ticket, changes, trace_id });
        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|err| match classify_transport_error(&err) {
            Classification::Transient => CriticError::Transient(err.to_string()),
            Classification::Permanent => CriticError::Permanent(err.to_string()),
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(match classify_status(status) {
                Classification::Transient => CriticError::Transient(format!("critic endpoint returned {status}")),
                Classification::Permanent => CriticError::Permanent(format!("critic endpoint returned {status}")),
            });
        }
        let wire: VerdictWire =
            parse_json_limited(response, self.config.max_response_bytes).await.map_err(|err| CriticError::Permanent(format!("critic response: {err}")))?;
        Ok(match wire {
            VerdictWire::Approve => CriticVerdict::Approve,
            VerdictWire::RequestChanges { feedback } => CriticVerdict::RequestChanges(feedback),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn approve_verdict_needs_no_feedback_field() {
        let wire: VerdictWire = serde_json::from_str(r#"{"verdict":"approve"}"#).expect("parse");
        assert!(matches!(wire, VerdictWire::Approve));
    }

    #[test]
    fn request_changes_defaults_to_empty_feedback_when_omitted() {
        let wire: VerdictWire = serde_json::from_str(r#"{"verdict":"request_changes"}"#).expect("parse");
        let VerdictWire::RequestChanges { feedback } = wire else {
            panic!("expected request_changes");
        };
        assert!(matches!(feedback, CriticFeedback::Structured(items) if items.is_empty()));
    }

    #[test]
    fn request_changes_accepts_raw_string_feedback() {
        let wire: VerdictWire = serde_json::from_str(r#"{"verdict":"request_changes","feedback":["missing tests"]}"#).expect("parse");
        let VerdictWire::RequestChanges { feedback } = wire else {
            panic!("expected request_changes");
        };
        assert_eq!(feedback.into_structured().len(), 1);
    }
}
