// forge-ctl-providers/src/deploy.rs
// ============================================================================
// Module: HTTP Deploy Client
// Description: DeployClient implementation that enqueues a deploy over HTTP.
// Purpose: Hand an approved pull request off to a remote deploy executor.
// Dependencies: forge-ctl-core, reqwest
// ============================================================================

//! ## Overview
//! Enqueueing only; deploy completion arrives later as an inbound
//! notification routed by the HTTP boundary, not through this client.

use async_trait::async_trait;
use forge_ctl_core::DeployClient;
use forge_ctl_core::DeployError;
use forge_ctl_core::TicketId;
use forge_ctl_core::TraceId;
use reqwest::Client;
use serde::Serialize;

use crate::client::HttpProviderConfig;
use crate::client::build_client;

/// HTTP-backed [`DeployClient`].
pub struct HttpDeployClient {
    config: HttpProviderConfig,
    client: Client,
}

impl HttpDeployClient {
    /// Builds a new deploy client over `config`.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::EnqueueFailed`] when the HTTP client cannot be
    /// constructed.
    pub fn new(config: HttpProviderConfig) -> Result<Self, DeployError> {
        let client = build_client(&config).map_err(|err| DeployError::EnqueueFailed(err.to_string()))?;
        Ok(Self { config, client })
    }
}

#[derive(Serialize)]
struct EnqueueDeployBody<'a> {
    ticket_id: &'a TicketId,
    pull_request_url: &'a str,
    trace_id: &'a TraceId,
}

#[async_trait]
impl DeployClient for HttpDeployClient {
    async fn enqueue_deploy(&self, ticket: &TicketId, pull_request_url: &str, trace_id: &TraceId) -> Result<(), DeployError> {
        let mut request = self
            .client
            .post(format!("{}/deploy", self.config.base_url))
            .json(&EnqueueDeployBody { ticket_id: ticket, pull_request_url, trace_id });
        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|err| DeployError::EnqueueFailed(err.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(DeployError::EnqueueFailed(format!("deploy endpoint returned {}", response.status())))
        }
    }
}
