// forge-ctl-providers/src/retrieval.rs
// ============================================================================
// Module: HTTP Retrieval Client
// Description: RetrievalClient implementation over a repository-chunking and
//              vector-search service.
// Purpose: Resolve candidate files and snippets for a ticket before dispatch.
// Dependencies: forge-ctl-core, reqwest
// ============================================================================

//! ## Overview
//! Retrieval is explicitly best-effort from the dispatch loop's perspective:
//! a failure here degrades to dispatch without context rather than blocking
//! the ticket, but this client still distinguishes transient from permanent
//! failures so the caller can log accordingly.

use async_trait::async_trait;
use forge_ctl_core::RetrievalClient;
use forge_ctl_core::RetrievalError;
use forge_ctl_core::RetrievedContext;
use forge_ctl_core::Ticket;
use reqwest::Client;
use serde::Deserialize;
use serde::Serialize;

use crate::client::HttpProviderConfig;
use crate::client::build_client;
use crate::client::parse_json_limited;

/// HTTP-backed [`RetrievalClient`].
pub struct HttpRetrievalClient {
    config: HttpProviderConfig,
    client: Client,
}

impl HttpRetrievalClient {
    /// Builds a new retrieval client over `config`.
    ///
    /// # Errors
    ///
    /// Returns [`RetrievalError::Failed`] when the HTTP client cannot be
    /// constructed.
    pub fn new(config: HttpProviderConfig) -> Result<Self, RetrievalError> {
        let client = build_client(&config).map_err(|err| RetrievalError::Failed(err.to_string()))?;
        Ok(Self { config, client })
    }
}

#[derive(Serialize)]
struct RetrieveBody<'a> {
    ticket: &'a Ticket,
}

#[derive(Deserialize)]
struct RetrievedContextWire {
    #[serde(default)]
    candidate_files: Vec<String>,
    #[serde(default)]
    snippets: Vec<(String, String)>,
}

#[async_trait]
impl RetrievalClient for HttpRetrievalClient {
    async fn retrieve(&self, ticket: &Ticket) -> Result<RetrievedContext, RetrievalError> {
        let mut request = self.client.post(format!("{}/retrieve", self.config.base_url)).json(&RetrieveBody { ticket });
        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|err| RetrievalError::Failed(err.to_string()))?;
        if !response.status().is_success() {
            return Err(RetrievalError::Failed(format!("retrieval endpoint returned {}", response.status())));
        }
        let wire: RetrievedContextWire =
            parse_json_limited(response, self.config.max_response_bytes).await.map_err(|err| RetrievalError::Failed(format!("retrieval response: {err}")))?;
        Ok(RetrievedContext { candidate_files: wire.candidate_files, snippets: wire.snippets })
    }
}
