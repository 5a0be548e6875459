// forge-ctl-config/src/config.rs
// ============================================================================
// Module: Forge Config
// Description: Canonical configuration model, environment overrides, and
//              fail-closed validation for the control plane binary.
// Purpose: Provide one place that resolves `forge-ctl.toml` plus environment
//          secrets into a validated `ForgeConfig` before any listener binds.
// Dependencies: forge-ctl-core, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with environment-variable
//! overrides for secrets that should never be committed to disk (the bearer
//! signing key, model-adapter and repository-host credentials). Validation
//! runs once at startup and fails closed: there is no path from malformed or
//! incomplete configuration to a running listener.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use forge_ctl_core::TenantId;
use serde::Deserialize;
use thiserror::Error;

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "forge-ctl.toml";
/// Environment variable used to override the config file path.
pub const CONFIG_ENV_VAR: &str = "FORGE_CTL_CONFIG";
/// Maximum configuration file size in bytes.
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

/// Environment variable carrying the bearer-token signing key.
pub const SIGNING_KEY_ENV_VAR: &str = "FORGE_CTL_SIGNING_KEY";
/// Environment variable carrying the model-adapter bearer token.
pub const MODEL_ADAPTER_TOKEN_ENV_VAR: &str = "FORGE_CTL_MODEL_ADAPTER_TOKEN";
/// Environment variable carrying the repository-host bearer token.
pub const REPO_HOST_TOKEN_ENV_VAR: &str = "FORGE_CTL_REPO_HOST_TOKEN";
/// Environment variable carrying the worker-dispatch bearer token.
pub const WORKER_TOKEN_ENV_VAR: &str = "FORGE_CTL_WORKER_TOKEN";
/// Environment variable carrying the critic bearer token.
pub const CRITIC_TOKEN_ENV_VAR: &str = "FORGE_CTL_CRITIC_TOKEN";
/// Environment variable carrying the deploy-service bearer token.
pub const DEPLOY_TOKEN_ENV_VAR: &str = "FORGE_CTL_DEPLOY_TOKEN";
/// Environment variable carrying the retrieval-service bearer token.
pub const RETRIEVAL_TOKEN_ENV_VAR: &str = "FORGE_CTL_RETRIEVAL_TOKEN";

/// Errors raised loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read config file: {0}")]
    Io(String),
    /// The config file exceeded [`MAX_CONFIG_FILE_SIZE`] or was not UTF-8.
    #[error("config file is invalid: {0}")]
    Invalid(String),
    /// The config file's TOML could not be parsed.
    #[error("failed to parse config file: {0}")]
    Parse(String),
    /// A required value was missing or a value failed a consistency check.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

/// The control plane's top-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ForgeConfig {
    /// HTTP/WebSocket server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Persistence backend configuration.
    pub store: StoreConfig,
    /// External collaborator endpoint configuration.
    #[serde(default)]
    pub collaborators: CollaboratorsConfig,
    /// Dispatch loop tuning.
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Per-tenant overrides, keyed by tenant id.
    #[serde(default)]
    pub tenants: HashMap<TenantId, TenantOverride>,

    /// The bearer-token signing key, populated from [`SIGNING_KEY_ENV_VAR`]
    /// rather than the TOML file.
    #[serde(skip)]
    pub signing_key: String,
}

impl ForgeConfig {
    /// Loads configuration from `path` (or the default resolution rules
    /// when `None`: the `FORGE_CTL_CONFIG` environment variable, falling
    /// back to `./forge-ctl.toml`), applies environment-variable secret
    /// overrides, and validates the result.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when the file cannot be read or parsed, a
    /// required secret environment variable is unset, or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path);
        let metadata = fs::metadata(&resolved).map_err(|err| ConfigError::Io(format!("{}: {err}", resolved.display())))?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        let content = std::str::from_utf8(&bytes).map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        let mut config: Self = toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.signing_key = required_env(SIGNING_KEY_ENV_VAR)?;
        if let Some(model_adapter) = &mut self.collaborators.model_adapter {
            model_adapter.bearer_token = optional_env(MODEL_ADAPTER_TOKEN_ENV_VAR);
        }
        if let Some(worker) = &mut self.collaborators.worker {
            worker.bearer_token = optional_env(WORKER_TOKEN_ENV_VAR);
        }
        if let Some(critic) = &mut self.collaborators.critic {
            critic.bearer_token = optional_env(CRITIC_TOKEN_ENV_VAR);
        }
        if let Some(repo_host) = &mut self.collaborators.repo_host {
            repo_host.bearer_token = optional_env(REPO_HOST_TOKEN_ENV_VAR);
        }
        if let Some(deploy) = &mut self.collaborators.deploy {
            deploy.bearer_token = optional_env(DEPLOY_TOKEN_ENV_VAR);
        }
        if let Some(retrieval) = &mut self.collaborators.retrieval {
            retrieval.bearer_token = optional_env(RETRIEVAL_TOKEN_ENV_VAR);
        }
        Ok(())
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.signing_key.trim().is_empty() {
            return Err(ConfigError::Validation(format!("{SIGNING_KEY_ENV_VAR} must be set and non-empty")));
        }
        self.server.validate()?;
        self.store.validate()?;
        self.collaborators.validate()?;
        self.dispatch.validate()?;
        for (tenant, over) in &self.tenants {
            over.validate().map_err(|msg| ConfigError::Validation(format!("tenants.{tenant}: {msg}")))?;
        }
        Ok(())
    }

    /// Returns the effective retry ceiling for `tenant`, falling back to the
    /// global default when no override is configured.
    #[must_use]
    pub fn retry_ceiling_for(&self, tenant: &TenantId) -> u32 {
        self.tenants.get(tenant).and_then(|over| over.retry_ceiling).unwrap_or(self.dispatch.default_retry_ceiling)
    }

    /// Returns the effective model name for `tenant`, falling back to the
    /// global default when no override is configured.
    #[must_use]
    pub fn model_name_for(&self, tenant: &TenantId) -> Option<&str> {
        self.tenants.get(tenant).and_then(|over| over.model_name.as_deref()).or(self.collaborators.default_model_name.as_deref())
    }
}

/// HTTP/WebSocket server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// TCP port the HTTP/WebSocket server listens on.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Bind address; loopback by default.
    #[serde(default = "default_bind_host")]
    pub host: String,
    /// Interval between WebSocket `ping` frames, in seconds.
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: default_port(), host: default_bind_host(), ping_interval_secs: default_ping_interval_secs() }
    }
}

impl ServerConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::Validation("server.port must be non-zero".to_string()));
        }
        if self.ping_interval_secs == 0 {
            return Err(ConfigError::Validation("server.ping_interval_secs must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Persistence backend selection and connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// SQLite file-backed store.
    Sqlite {
        /// Path to the SQLite database file.
        path: PathBuf,
        /// Busy-timeout in milliseconds before a locked write fails.
        #[serde(default = "default_busy_timeout_ms")]
        busy_timeout_ms: u64,
    },
}

impl StoreConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Sqlite { path, busy_timeout_ms } => {
                if path.as_os_str().is_empty() {
                    return Err(ConfigError::Validation("store.path must be set".to_string()));
                }
                if *busy_timeout_ms == 0 {
                    return Err(ConfigError::Validation("store.busy_timeout_ms must be non-zero".to_string()));
                }
                Ok(())
            }
        }
    }
}

/// One external collaborator's HTTP endpoint configuration. The bearer
/// token is always populated from an environment variable, never from the
/// TOML file, so credentials never land on disk via this struct.
#[derive(Debug, Clone, Deserialize)]
pub struct CollaboratorEndpoint {
    /// Base URL of the collaborator's HTTP API.
    pub base_url: String,
    /// Bearer token, overwritten from the environment after load.
    #[serde(default, skip_deserializing)]
    pub bearer_token: Option<String>,
    /// Per-call timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl CollaboratorEndpoint {
    fn validate(&self, field: &str) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::Validation(format!("{field}.base_url must be set")));
        }
        if !(self.base_url.starts_with("https://") || self.base_url.starts_with("http://")) {
            return Err(ConfigError::Validation(format!("{field}.base_url must include http:// or https://")));
        }
        if self.timeout_ms == 0 {
            return Err(ConfigError::Validation(format!("{field}.timeout_ms must be non-zero")));
        }
        Ok(())
    }
}

/// External collaborator configuration. `model_adapter` and `worker` are
/// required for the control plane to do anything useful; `critic`,
/// `repo_host`, and `deploy` are required once a session reaches the build
/// phase; `retrieval` is optional by design (spec: best-effort).
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CollaboratorsConfig {
    /// Dialogue/spec/ticket-generation model adapter endpoint.
    #[serde(default)]
    pub model_adapter: Option<CollaboratorEndpoint>,
    /// Worker-dispatch endpoint.
    #[serde(default)]
    pub worker: Option<CollaboratorEndpoint>,
    /// Critic endpoint.
    #[serde(default)]
    pub critic: Option<CollaboratorEndpoint>,
    /// Repository-host endpoint.
    #[serde(default)]
    pub repo_host: Option<CollaboratorEndpoint>,
    /// Deploy-service endpoint.
    #[serde(default)]
    pub deploy: Option<CollaboratorEndpoint>,
    /// Retrieval-service endpoint; optional, failures degrade gracefully.
    #[serde(default)]
    pub retrieval: Option<CollaboratorEndpoint>,
    /// Default model name passed to the model adapter absent a per-tenant
    /// override.
    #[serde(default)]
    pub default_model_name: Option<String>,
}

impl CollaboratorsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(endpoint) = &self.model_adapter {
            endpoint.validate("collaborators.model_adapter")?;
        } else {
            return Err(ConfigError::Validation("collaborators.model_adapter is required".to_string()));
        }
        if let Some(endpoint) = &self.worker {
            endpoint.validate("collaborators.worker")?;
        } else {
            return Err(ConfigError::Validation("collaborators.worker is required".to_string()));
        }
        for (field, endpoint) in [
            ("collaborators.critic", &self.critic),
            ("collaborators.repo_host", &self.repo_host),
            ("collaborators.deploy", &self.deploy),
            ("collaborators.retrieval", &self.retrieval),
        ] {
            if let Some(endpoint) = endpoint {
                endpoint.validate(field)?;
            }
        }
        Ok(())
    }
}

/// Dispatch loop tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Maximum number of tickets claimed per tick.
    #[serde(default = "default_parallelism_ceiling")]
    pub parallelism_ceiling: usize,
    /// Interval between dispatch ticks, in seconds.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Interval between reaper passes, in seconds.
    #[serde(default = "default_reap_interval_secs")]
    pub reap_interval_secs: u64,
    /// Default retry ceiling absent a per-tenant override.
    #[serde(default = "default_retry_ceiling")]
    pub default_retry_ceiling: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            parallelism_ceiling: default_parallelism_ceiling(),
            tick_interval_secs: default_tick_interval_secs(),
            reap_interval_secs: default_reap_interval_secs(),
            default_retry_ceiling: default_retry_ceiling(),
        }
    }
}

impl DispatchConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.parallelism_ceiling == 0 {
            return Err(ConfigError::Validation("dispatch.parallelism_ceiling must be non-zero".to_string()));
        }
        if self.tick_interval_secs == 0 {
            return Err(ConfigError::Validation("dispatch.tick_interval_secs must be non-zero".to_string()));
        }
        if self.reap_interval_secs == 0 {
            return Err(ConfigError::Validation("dispatch.reap_interval_secs must be non-zero".to_string()));
        }
        Ok(())
    }
}

/// Per-tenant configuration override.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TenantOverride {
    /// Model name override for this tenant's dialogue and ticket generation.
    #[serde(default)]
    pub model_name: Option<String>,
    /// Retry ceiling override for this tenant's tickets.
    #[serde(default)]
    pub retry_ceiling: Option<u32>,
}

impl TenantOverride {
    fn validate(&self) -> Result<(), String> {
        if let Some(name) = &self.model_name {
            if name.trim().is_empty() {
                return Err("model_name must be non-empty when set".to_string());
            }
        }
        if self.retry_ceiling == Some(0) {
            return Err("retry_ceiling must be non-zero when set".to_string());
        }
        Ok(())
    }
}

fn resolve_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(from_env) = env::var(CONFIG_ENV_VAR) {
        return PathBuf::from(from_env);
    }
    PathBuf::from(DEFAULT_CONFIG_NAME)
}

fn required_env(var: &str) -> Result<String, ConfigError> {
    env::var(var).map_err(|_| ConfigError::Validation(format!("{var} must be set")))
}

fn optional_env(var: &str) -> Option<String> {
    env::var(var).ok()
}

const fn default_port() -> u16 {
    8080
}

fn default_bind_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_ping_interval_secs() -> u64 {
    30
}

const fn default_busy_timeout_ms() -> u64 {
    5000
}

const fn default_timeout_ms() -> u64 {
    60_000
}

const fn default_parallelism_ceiling() -> usize {
    4
}

const fn default_tick_interval_secs() -> u64 {
    5
}

const fn default_reap_interval_secs() -> u64 {
    60
}

const fn default_retry_ceiling() -> u32 {
    3
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;
    use std::sync::Mutex;
    use std::sync::OnceLock;

    use super::*;

    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    fn write_config(dir: &tempfile::TempDir, contents: &str) -> PathBuf {
        let path = dir.path().join("forge-ctl.toml");
        let mut file = fs::File::create(&path).expect("create config file");
        file.write_all(contents.as_bytes()).expect("write config file");
        path
    }

    #[test]
    fn load_fails_closed_without_signing_key() {
        let _guard = env_lock().lock().expect("lock");
        unsafe {
            env::remove_var(SIGNING_KEY_ENV_VAR);
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(
            &dir,
            r#"
                [store]
                backend = "sqlite"
                path = "forge-ctl.db"

                [collaborators.model_adapter]
                base_url = "https://model.example"

                [collaborators.worker]
                base_url = "https://worker.example"
            "#,
        );
        let result = ForgeConfig::load(Some(&path));
        assert!(matches!(result, Err(ConfigError::Validation(_))));
    }

    #[test]
    fn load_succeeds_with_signing_key_and_required_collaborators() {
        let _guard = env_lock().lock().expect("lock");
        unsafe {
            env::set_var(SIGNING_KEY_ENV_VAR, "test-signing-key");
        }
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_config(
            &dir,
            r#"
                [store]
                backend = "sqlite"
                path = "forge-ctl.db"

                [collaborators.model_adapter]
                base_url = "https://model.example"

                [collaborators.worker]
                base_url = "https://worker.example"

                [tenants.acme]
                retry_ceiling = 5
            "#,
        );
        let config = ForgeConfig::load(Some(&path)).expect("load config");
        assert_eq!(config.server.port, default_port());
        assert_eq!(config.retry_ceiling_for(&TenantId::new("acme")), 5);
        assert_eq!(config.retry_ceiling_for(&TenantId::new("other")), config.dispatch.default_retry_ceiling);
        unsafe {
            env::remove_var(SIGNING_KEY_ENV_VAR);
        }
    }
}
