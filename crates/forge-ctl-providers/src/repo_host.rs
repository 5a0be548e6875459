// forge-ctl-providers/src/repo_host.rs
// ============================================================================
// Module: HTTP Repository Host Client
// Description: RepoHostClient implementation that opens a pull request via
//              a repository host's HTTP API.
// Purpose: Plug a remote repository host into the dispatch loop's approve
//          path.
// Dependencies: forge-ctl-core, reqwest
// ============================================================================

//! ## Overview
//! A thin wrapper over a repository host's "open pull request" endpoint.
//! Credentials and the target repository are carried in `base_url` and
//! `bearer_token`; this provider does not itself choose a repository.

use async_trait::async_trait;
use forge_ctl_core::RepoHostClient;
use forge_ctl_core::RepoHostError;
use forge_ctl_core::Ticket;
use forge_ctl_core::TraceId;
use reqwest::Client;
use serde::Deserialize;
use serde::Serialize;

use crate::client::HttpProviderConfig;
use crate::client::build_client;
use crate::client::parse_json_limited;

/// HTTP-backed [`RepoHostClient`].
pub struct HttpRepoHostClient {
    config: HttpProviderConfig,
    client: Client,
}

impl HttpRepoHostClient {
    /// Builds a new repository host client over `config`.
    ///
    /// # Errors
    ///
    /// Returns [`RepoHostError::Failed`] when the HTTP client cannot be
    /// constructed.
    pub fn new(config: HttpProviderConfig) -> Result<Self, RepoHostError> {
        let client = build_client(&config).map_err(|err| RepoHostError::Failed(err.to_string()))?;
        Ok(Self { config, client })
    }
}

#[derive(Serialize)]
struct OpenPullRequestBody<'a> {
    ticket: &'a Ticket,
    branch_name: &'a str,
    trace_id: &'a TraceId,
}

#[derive(Deserialize)]
struct OpenPullRequestResponse {
    pull_request_url: String,
}

#[async_trait]
impl RepoHostClient for HttpRepoHostClient {
    async fn open_pull_request(&self, ticket: &Ticket, branch_name: &str, trace_id: &TraceId) -> Result<String, RepoHostError> {
        let mut request = self
            .client
            .post(format!("{}/pulls", self.config.base_url))
            .json(&OpenPullRequestBody { ticket, branch_name, trace_id });
        if let Some(token) = &self.config.bearer_token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await.map_err(|err| RepoHostError::Failed(err.to_string()))?;
        if !response.status().is_success() {
            return Err(RepoHostError::Failed(format!("repository host returned {}", response.status())));
        }
        let parsed: OpenPullRequestResponse =
            parse_json_limited(response, self.config.max_response_bytes).await.map_err(|err| RepoHostError::Failed(format!("pull request response: {err}")))?;
        Ok(parsed.pull_request_url)
    }
}
