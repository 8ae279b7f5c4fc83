use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    /// Emit per-call RPC traces (target `rpc_trace`)
    pub enable_tracing: bool,
    pub cluster_file: String,
    /// Directory for the ledger and event log files
    pub data_dir: String,
    #[serde(default)]
    pub rpc: RpcConfig,
    #[serde(default)]
    pub timeout: TimeoutConfig,
    #[serde(default)]
    pub participant: ParticipantConfig,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RpcConfig {
    pub timeout_ms: u64,
}

impl Default for RpcConfig {
    fn default() -> Self {
        Self { timeout_ms: 3000 }
    }
}

impl RpcConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Failure detector settings, shared by coordinator and participants
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TimeoutConfig {
    /// Age after which an unresolved transaction is aborted
    pub threshold_ms: u64,
    /// How often the timeout sweep runs
    pub sweep_interval_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            threshold_ms: 3000,
            sweep_interval_ms: 3000,
        }
    }
}

impl TimeoutConfig {
    pub fn threshold(&self) -> Duration {
        Duration::from_millis(self.threshold_ms)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ParticipantConfig {
    /// Refuse a prepare while another transaction is pending on the account
    pub exclusive_prepare: bool,
    /// Run `recover()` against the coordinator log at startup
    pub recover_on_start: bool,
    /// Balance used when the account is absent from the ledger
    pub initial_balance: rust_decimal::Decimal,
}

impl Default for ParticipantConfig {
    fn default() -> Self {
        Self {
            exclusive_prepare: true,
            recover_on_start: false,
            initial_balance: rust_decimal::Decimal::ZERO,
        }
    }
}

impl AppConfig {
    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = format!("config/{}.yaml", env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path))?;
        Self::from_yaml(&content).with_context(|| format!("Failed to parse {}", config_path))
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}
