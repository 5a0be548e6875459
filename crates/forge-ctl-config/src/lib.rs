// forge-ctl-config/src/lib.rs
// ============================================================================
// Module: Forge Config Library
// Description: Public API surface for loading and validating the control
//              plane's configuration.
// Purpose: Resolve a TOML file plus environment secrets into a validated
//          ForgeConfig before the server or CLI does anything else.
// Dependencies: forge-ctl-core, serde, toml
// ============================================================================

//! ## Overview
//! Configuration loading is fail-closed: [`ForgeConfig::load`] either
//! returns a fully validated configuration or a [`ConfigError`], never a
//! partially-populated struct. Secrets (the bearer signing key and every
//! collaborator credential) are read from environment variables, never from
//! the TOML file itself, so a config file can be committed to version
//! control without leaking anything.

mod config;

pub use config::CONFIG_ENV_VAR;
pub use config::CRITIC_TOKEN_ENV_VAR;
pub use config::CollaboratorEndpoint;
pub use config::CollaboratorsConfig;
pub use config::ConfigError;
pub use config::DEPLOY_TOKEN_ENV_VAR;
pub use config::DispatchConfig;
pub use config::ForgeConfig;
pub use config::MODEL_ADAPTER_TOKEN_ENV_VAR;
pub use config::REPO_HOST_TOKEN_ENV_VAR;
pub use config::RETRIEVAL_TOKEN_ENV_VAR;
pub use config::SIGNING_KEY_ENV_VAR;
pub use config::ServerConfig;
pub use config::StoreConfig;
pub use config::TenantOverride;
pub use config::WORKER_TOKEN_ENV_VAR;
