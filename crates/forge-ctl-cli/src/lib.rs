// forge-ctl-cli/src/lib.rs
// ============================================================================
// Module: Forge CLI Library
// Description: Assembly of the control-plane binary from configuration:
//              store, bus, collaborator providers, engines, and the
//              dispatch loop's background tasks.
// Purpose: Keep `main` a thin exit-code mapper over a testable assembly
//          function, split from the binary so assembly can be unit tested
//          without a real listener.
// Dependencies: forge-ctl-{core,config,bus,providers,server,store-sqlite}
// ============================================================================

//! ## Overview
//! Startup has two failure classes: configuration/assembly failures that
//! happen before any listener binds ([`StartupError`]), and failures while
//! the server is already serving traffic ([`RuntimeError`]). The binary
//! maps the former to exit code 1 and the latter to exit code 2, clean
//! shutdown to 0.

use std::sync::Arc;

use forge_ctl_bus::InProcessBus;
use forge_ctl_config::CollaboratorEndpoint;
use forge_ctl_config::ConfigError;
use forge_ctl_config::ForgeConfig;
use forge_ctl_config::StoreConfig;
use forge_ctl_core::Clock;
use forge_ctl_core::DispatchLoop;
use forge_ctl_core::SessionEngine;
use forge_ctl_core::SystemClock;
use forge_ctl_core::TicketEngine;
use forge_ctl_providers::HttpCriticClient;
use forge_ctl_providers::HttpDeployClient;
use forge_ctl_providers::HttpModelAdapter;
use forge_ctl_providers::HttpProviderConfig;
use forge_ctl_providers::HttpRepoHostClient;
use forge_ctl_providers::HttpRetrievalClient;
use forge_ctl_providers::HttpWorkerDispatcher;
use forge_ctl_server::AppState;
use forge_ctl_store_sqlite::SqliteStore;
use forge_ctl_store_sqlite::SqliteStoreConfig;

/// Response bodies from collaborator endpoints are capped at this size;
/// matches [`forge_ctl_providers`]'s own default, which is not itself
/// public to construct against.
const MAX_COLLABORATOR_RESPONSE_BYTES: usize = 4 * 1024 * 1024;

/// Failures that occur before any listener binds.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// Configuration could not be loaded or failed validation.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// A collaborator endpoint is missing or its client could not be built.
    #[error("collaborator provider error: {0}")]
    Provider(String),
    /// The persistence store could not be opened.
    #[error("store error: {0}")]
    Store(String),
    /// The configured listener address could not be bound.
    #[error("listener bind error: {0}")]
    Bind(String),
}

/// Failures that occur after the server has started serving traffic.
#[derive(Debug, thiserror::Error)]
#[error("runtime error: {0}")]
pub struct RuntimeError(pub String);

/// The fully assembled running system: the router to serve and the
/// background task handles the caller owns for the process lifetime.
pub struct Assembled {
    /// The complete `/api/*` and `/ws` router, ready to serve.
    pub router: axum::Router,
    /// Handle to the periodic dispatch-tick task.
    pub tick_task: tokio::task::JoinHandle<()>,
    /// Handle to the periodic lease-reaper task.
    pub reap_task: tokio::task::JoinHandle<()>,
}

/// Builds every collaborator, engine, and background task from `config`,
/// returning a router ready to serve and the background tasks' handles.
///
/// # Errors
///
/// Returns [`StartupError`] when the store cannot be opened or a required
/// collaborator endpoint is missing or fails to construct its client.
pub fn assemble(config: &ForgeConfig) -> Result<Assembled, StartupError> {
    let StoreConfig::Sqlite { path, busy_timeout_ms } = &config.store;
    let store = Arc::new(
        SqliteStore::open(&SqliteStoreConfig { path: path.clone(), busy_timeout_ms: *busy_timeout_ms, journal_mode: Default::default() })
            .map_err(|err| StartupError::Store(err.to_string()))?,
    );

    let bus = Arc::new(InProcessBus::default());

    let model_adapter = Arc::new(
        HttpModelAdapter::new(provider_config(required_endpoint(&config.collaborators.model_adapter, "collaborators.model_adapter")?))
            .map_err(|err| StartupError::Provider(err.to_string()))?,
    );
    let worker = Arc::new(
        HttpWorkerDispatcher::new(provider_config(required_endpoint(&config.collaborators.worker, "collaborators.worker")?))
            .map_err(|err| StartupError::Provider(err.to_string()))?,
    );
    let critic = Arc::new(
        HttpCriticClient::new(provider_config(required_endpoint(&config.collaborators.critic, "collaborators.critic")?))
            .map_err(|err| StartupError::Provider(err.to_string()))?,
    );
    let repo_host = Arc::new(
        HttpRepoHostClient::new(provider_config(required_endpoint(&config.collaborators.repo_host, "collaborators.repo_host")?))
            .map_err(|err| StartupError::Provider(err.to_string()))?,
    );
    let deploy = Arc::new(
        HttpDeployClient::new(provider_config(required_endpoint(&config.collaborators.deploy, "collaborators.deploy")?))
            .map_err(|err| StartupError::Provider(err.to_string()))?,
    );
    let retrieval = Arc::new(
        HttpRetrievalClient::new(provider_config(required_endpoint(&config.collaborators.retrieval, "collaborators.retrieval")?))
            .map_err(|err| StartupError::Provider(err.to_string()))?,
    );

    // Every collaborator is erased to its trait object before an engine
    // touches it, so the engines below are monomorphized once, over the
    // `Dyn*` aliases `forge-ctl-server::state` defines, matching `AppState`'s
    // field types exactly rather than a store-specific instantiation.
    let store_dyn = store.clone() as Arc<forge_ctl_server::DynStore>;
    let bus_dyn = bus.clone() as Arc<forge_ctl_server::DynBus>;
    let model_adapter_dyn = model_adapter as Arc<forge_ctl_server::DynModel>;
    let worker_dyn = worker as Arc<forge_ctl_server::DynWorker>;
    let critic_dyn = critic as Arc<forge_ctl_server::DynCritic>;
    let repo_host_dyn = repo_host as Arc<forge_ctl_server::DynRepoHost>;
    let retrieval_dyn = retrieval as Arc<forge_ctl_server::DynRetrieval>;
    let deploy_dyn = deploy as Arc<forge_ctl_server::DynDeploy>;

    let sessions = Arc::new(SessionEngine::new(store_dyn.clone(), model_adapter_dyn, bus_dyn.clone(), SystemClock));
    let tickets = Arc::new(TicketEngine::new(store_dyn.clone(), bus_dyn.clone(), SystemClock));
    let dispatch = Arc::new(DispatchLoop::new(
        store_dyn.clone(),
        tickets.clone(),
        worker_dyn,
        critic_dyn,
        repo_host_dyn,
        retrieval_dyn,
        deploy_dyn,
        SystemClock,
        config.dispatch.parallelism_ceiling,
    ));

    let state = AppState {
        store: store_dyn,
        bus: bus_dyn,
        realtime: bus,
        sessions,
        tickets,
        dispatch: dispatch.clone(),
        signing_key: Arc::from(config.signing_key.as_str()),
    };

    let tick_interval = std::time::Duration::from_secs(config.dispatch.tick_interval_secs);
    let reap_interval = std::time::Duration::from_secs(config.dispatch.reap_interval_secs);
    let tick_dispatch = dispatch;
    let tick_task = tokio::spawn(async move {
        let worker_identity = forge_ctl_core::AssigneeId::new("dispatch-loop");
        let mut interval = tokio::time::interval(tick_interval);
        loop {
            interval.tick().await;
            match tick_dispatch.tick(&worker_identity).await {
                Ok(report) => tracing::debug!(dispatched = report.dispatched, handoff_failed = report.handoff_failed, "dispatch tick complete"),
                Err(err) => tracing::error!(error = %err, "dispatch tick failed"),
            }
        }
    });
    let reap_tickets = tickets_for_reaper(&state);
    let reap_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(reap_interval);
        loop {
            interval.tick().await;
            match reap_tickets.run_reaper().await {
                Ok(reaped) if !reaped.is_empty() => tracing::info!(count = reaped.len(), "reaper pass reclaimed expired leases"),
                Ok(_) => {}
                Err(err) => tracing::error!(error = %err, "reaper pass failed"),
            }
        }
    });

    let router = forge_ctl_server::build_router(state);
    Ok(Assembled { router, tick_task, reap_task })
}

fn tickets_for_reaper(state: &AppState) -> Arc<forge_ctl_server::Tickets> {
    state.tickets.clone()
}

fn provider_config(endpoint: &CollaboratorEndpoint) -> HttpProviderConfig {
    HttpProviderConfig {
        base_url: endpoint.base_url.clone(),
        bearer_token: endpoint.bearer_token.clone(),
        timeout_ms: endpoint.timeout_ms,
        max_response_bytes: MAX_COLLABORATOR_RESPONSE_BYTES,
    }
}

fn required_endpoint<'a>(endpoint: &'a Option<CollaboratorEndpoint>, field: &str) -> Result<&'a CollaboratorEndpoint, StartupError> {
    endpoint.as_ref().ok_or_else(|| StartupError::Provider(format!("{field} is required to run the dispatch loop")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_endpoint_reports_the_missing_field() {
        let err = required_endpoint(&None, "collaborators.critic").expect_err("missing endpoint");
        assert!(err.to_string().contains("collaborators.critic"));
    }
}
