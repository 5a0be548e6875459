// forge-ctl-providers/src/model_adapter.rs
// ============================================================================
// Module: HTTP Model Adapter
// Description: ModelAdapter implementation backed by an HTTP dialogue/spec/
//              ticket-generation endpoint.
// Purpose: Plug a remote language-model service into the Session Engine.
// Dependencies: forge-ctl-core, reqwest
// ============================================================================

//! ## Overview
//! One base URL, three routes: `/dialogue`, `/spec`, `/tickets`. Responses
//! are parsed into the domain reply types; a malformed dialogue response is
//! handled by the session engine, not here — this adapter only classifies
//! transport and status failures.

use async_trait::async_trait;
use forge_ctl_core::DialogueReply;
use forge_ctl_core::DialogueRequest;
use forge_ctl_core::ModelAdapter;
use forge_ctl_core::ModelAdapterError;
use forge_ctl_core::ProjectType;
use forge_ctl_core::Session;
use forge_ctl_core::TicketDraft;
use reqwest::Client;
use serde::Serialize;

use crate::client::Classification;
use crate::client::HttpProviderConfig;
use crate::client::build_client;
use crate::client::classify_status;
use crate::client::classify_transport_error;
use crate::client::parse_json_limited;
use crate::wire::DialogueRequestWire;
use crate::wire::TicketDraftWire;

/// HTTP-backed [`ModelAdapter`].
pub struct HttpModelAdapter {
    config: HttpProviderConfig,
    client: Client,
}

impl HttpModelAdapter {
    /// Builds a new adapter over `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ModelAdapterError::Permanent`] when the HTTP client cannot
    /// be constructed.
    pub fn new(config: HttpProviderConfig) -> Result<Self, ModelAdapterError> {
        let client = build_client(&config).map_err(|err| ModelAdapterError::Permanent(err.to_string()))?;
        Ok(Self { config, client })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let request = self.client.post(format!("{}{path}", self.config.base_url));
        match &self.config.bearer_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[derive(Serialize)]
struct GenerateSpecBody<'a> {
    session: &'a Session,
}

#[derive(Serialize)]
struct GenerateTicketsBody<'a> {
    project_type: ProjectType,
    spec: &'a str,
}

#[async_trait]
impl ModelAdapter for HttpModelAdapter {
    async fn dialogue_turn(&self, request: DialogueRequest) -> Result<DialogueReply, ModelAdapterError> {
        let wire = DialogueRequestWire::from_request(&request);
        let response = self.request("/dialogue").json(&wire).send().await.map_err(|err| match classify_transport_error(&err) {
            Classification::Transient => ModelAdapterError::Transient(err.to_string()),
            Classification::Permanent => ModelAdapterError::Permanent(err.to_string()),
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(match classify_status(status) {
                Classification::Transient => ModelAdapterError::Transient(format!("dialogue endpoint returned {status}")),
                Classification::Permanent => ModelAdapterError::Permanent(format!("dialogue endpoint returned {status}")),
            });
        }
        parse_json_limited::<DialogueReply>(response, self.config.max_response_bytes)
            .await
            .map_err(|err| ModelAdapterError::Permanent(format!("dialogue response: {err}")))
    }

    async fn generate_spec(&self, session: &Session) -> Result<String, ModelAdapterError> {
        let response = self
            .request("/spec")
            .json(&GenerateSpecBody { session })
            .send()
            .await
            .map_err(|err| match classify_transport_error(&err) {
                Classification::Transient => ModelAdapterError::Transient(err.to_string()),
                Classification::Permanent => ModelAdapterError::Permanent(err.to_string()),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(match classify_status(status) {
                Classification::Transient => ModelAdapterError::Transient(format!("spec endpoint returned {status}")),
                Classification::Permanent => ModelAdapterError::Permanent(format!("spec endpoint returned {status}")),
            });
        }
        let body = crate::client::read_body_limited(response, self.config.max_response_bytes)
            .await
            .map_err(|err| ModelAdapterError::Permanent(err.to_string()))?
            .ok_or_else(|| ModelAdapterError::Permanent("spec response exceeded the configured size limit".to_owned()))?;
        String::from_utf8(body.to_vec()).map_err(|err| ModelAdapterError::Permanent(format!("spec response was not valid UTF-8: {err}")))
    }

    async fn generate_tickets(&self, project_type: ProjectType, spec: &str) -> Result<Vec<TicketDraft>, ModelAdapterError> {
        let response = self
            .request("/tickets")
            .json(&GenerateTicketsBody { project_type, spec })
            .send()
            .await
            .map_err(|err| match classify_transport_error(&err) {
                Classification::Transient => ModelAdapterError::Transient(err.to_string()),
                Classification::Permanent => ModelAdapterError::Permanent(err.to_string()),
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(match classify_status(status) {
                Classification::Transient => ModelAdapterError::Transient(format!("tickets endpoint returned {status}")),
                Classification::Permanent => ModelAdapterError::Permanent(format!("tickets endpoint returned {status}")),
            });
        }
        let wire: Vec<TicketDraftWire> = parse_json_limited(response, self.config.max_response_bytes)
            .await
            .map_err(|err| ModelAdapterError::Permanent(format!("tickets response: {err}")))?;
        Ok(wire.into_iter().map(TicketDraftWire::into_draft).collect())
    }
}
