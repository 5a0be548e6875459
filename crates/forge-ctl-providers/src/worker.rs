// forge-ctl-providers/src/worker.rs
// ============================================================================
// Module: HTTP Worker Dispatcher
// Description: WorkerDispatcher implementation that POSTs a work unit to a
//              worker-launch endpoint.
// Purpose: Hand tickets off to an external worker fleet over HTTP.
// Dependencies: forge-ctl-core, reqwest
// ============================================================================

//! ## Overview
//! This dispatcher only covers the handoff: a 2xx response means the worker
//! accepted the unit and will report back later through the ticket
//! completion HTTP route, not through this client.

use async_trait::async_trait;
use forge_ctl_core::WorkUnit;
use forge_ctl_core::WorkerDispatcher;
use forge_ctl_core::WorkerError;
use reqwest::Client;

use crate::client::HttpProviderConfig;
use crate::client::build_client;

/// HTTP-backed [`WorkerDispatcher`].
pub struct HttpWorkerDispatcher {
    config: HttpProviderConfig,
    client: Client,
}

impl HttpWorkerDispatcher {
    /// Builds a new dispatcher over `config`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::HandoffFailed`] when the HTTP client cannot be
    /// constructed.
    pub fn new(config: HttpProviderConfig) -> Result<Self, WorkerError> {
        let client = build_client(&config).map_err(|err| WorkerError::HandoffFailed(err.to_string()))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl WorkerDispatcher for HttpWorkerDispatcher {
    async fn dispatch(&self, unit: &WorkUnit) -> Result<(), WorkerError> {
        let mut request = self.client.post(format!("{}/dispatch", self.config.base_url)).json(unit);
        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|err| WorkerError::HandoffFailed(err.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(WorkerError::HandoffFailed(format!("worker endpoint returned {}", response.status())))
        }
    }
}
