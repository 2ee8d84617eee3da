//! Service configuration, loadable from YAML.
//!
//! ```yaml
//! providers:
//!   - { name: alchemy, url: "https://eth-mainnet.example.com/v2/KEY" }
//!   - { name: infura,  url: "https://mainnet.example.io/v3/KEY" }
//!   - { name: ankr,    url: "https://rpc.example.org/eth" }
//! contracts:
//!   - address: "0x5FbDB2315678afecb367f032d93F642f64180aa3"
//!     abi: marketplace
//!     events:
//!       - name: Purchase
//!       - name: EditionMinted
//!         filters: { artist: "0x70997970C51812dc3A010C7d01b50e0d17dc79C8" }
//! poll_interval_ms: 5000
//! log_source: range
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use alloy_json_abi::JsonAbi;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use chainquorum_core::error::RegistryError;
use chainquorum_core::provider::ProviderEndpoint;
use chainquorum_core::retry::RetryConfig;
use chainquorum_http::HttpClientConfig;

use crate::contract::{ContractDescriptor, EventSpec};
use crate::events::marketplace_abi;
use crate::source::LogSourceKind;

/// Configuration and construction errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid ABI: {0}")]
    Abi(String),

    #[error("invalid contract address '{address}': {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("contract {contract} has no events configured")]
    NoEvents { contract: String },

    #[error("event '{event}' not found in the ABI of {contract}")]
    UnknownEvent { contract: String, event: String },

    #[error("event '{event}' is overloaded in the ABI of {contract}")]
    AmbiguousEvent { contract: String, event: String },

    #[error("anonymous event '{event}' is not supported")]
    AnonymousEvent { event: String },

    #[error("invalid filter on {event}.{arg}: {reason}")]
    InvalidFilter {
        event: String,
        arg: String,
        reason: String,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// One JSON-RPC provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    pub url: String,
}

/// Built-in ABIs selectable by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuiltinAbi {
    Marketplace,
}

/// Where a contract's ABI comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AbiSource {
    /// `abi: marketplace`
    Builtin(BuiltinAbi),
    /// `abi: { path: ./abi/market.json }`, relative to the config file.
    File { path: PathBuf },
    /// `abi: [ {"type": "event", ...} ]`
    Inline(Vec<Value>),
}

impl AbiSource {
    pub fn load(&self, base_dir: &Path) -> Result<JsonAbi, ConfigError> {
        match self {
            AbiSource::Builtin(BuiltinAbi::Marketplace) => {
                marketplace_abi().map_err(|e| ConfigError::Abi(e.to_string()))
            }
            AbiSource::File { path } => {
                let path = base_dir.join(path);
                let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
                    path: path.clone(),
                    source,
                })?;
                serde_json::from_str(&text)
                    .map_err(|e| ConfigError::Abi(format!("{}: {e}", path.display())))
            }
            AbiSource::Inline(items) => serde_json::from_value(Value::Array(items.clone()))
                .map_err(|e| ConfigError::Abi(e.to_string())),
        }
    }
}

/// One watched contract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractConfig {
    pub address: String,
    pub abi: AbiSource,
    pub events: Vec<EventSpec>,
}

/// Log level per component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: crate name → level
    #[serde(default)]
    pub components: BTreeMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: BTreeMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// `EnvFilter` directive string: `"info,chainquorum_core=debug"`.
    pub fn directives(&self) -> String {
        let mut directives = self.level.clone();
        for (component, level) in &self.components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Top-level service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub providers: Vec<ProviderConfig>,
    pub contracts: Vec<ContractConfig>,
    /// Delay between ticks in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Per-provider request timeout in milliseconds.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Agreement threshold; `None` means `ceil(providers / 2)`.
    #[serde(default)]
    pub quorum: Option<usize>,
    /// Accept a lone answer when fewer than `quorum` providers respond.
    #[serde(default)]
    pub lenient_quorum: bool,
    #[serde(default)]
    pub log_source: LogSourceKind,
    /// Extra delay after consecutive failed ticks.
    #[serde(default = "default_backoff")]
    pub backoff: RetryConfig,
    /// Emit an alert every this many consecutive failed ticks.
    #[serde(default = "default_alert_after")]
    pub alert_after: u32,
    /// Retry policy for `get_receipt_with_retry`.
    #[serde(default)]
    pub receipt_retry: RetryConfig,
    /// Stop the service on the first decode error (development setting).
    #[serde(default)]
    pub fail_fast_on_decode_error: bool,
    #[serde(default)]
    pub http: HttpClientConfig,
    #[serde(default)]
    pub log: LogConfig,
}

fn default_poll_interval_ms() -> u64 {
    5_000
}
fn default_request_timeout_ms() -> u64 {
    5_000
}
fn default_alert_after() -> u32 {
    5
}
fn default_backoff() -> RetryConfig {
    RetryConfig {
        max_retries: u32::MAX,
        initial_backoff_ms: 1_000,
        max_backoff_ms: 60_000,
        multiplier: 2.0,
    }
}

impl ServiceConfig {
    /// Parse and validate YAML text.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&text)
    }

    /// Structural checks that do not need ABIs or network access.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            return Err(RegistryError::Empty.into());
        }
        let mut names = HashSet::new();
        for p in &self.providers {
            if !names.insert(p.name.as_str()) {
                return Err(RegistryError::DuplicateProvider(p.name.as_str().into()).into());
            }
        }
        if self.contracts.is_empty() {
            return Err(ConfigError::Invalid("at least one contract is required".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be > 0".into()));
        }
        if self.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("request_timeout_ms must be > 0".into()));
        }
        if let Some(q) = self.quorum {
            if q == 0 || q > self.providers.len() {
                return Err(ConfigError::Invalid(format!(
                    "quorum must be between 1 and {} (number of providers), got {q}",
                    self.providers.len()
                )));
            }
        }
        if self.alert_after == 0 {
            return Err(ConfigError::Invalid("alert_after must be > 0".into()));
        }
        Ok(())
    }

    /// Parsed provider endpoints, in configuration order.
    pub fn endpoints(&self) -> Result<Vec<ProviderEndpoint>, ConfigError> {
        self.providers
            .iter()
            .map(|p| ProviderEndpoint::new(p.name.as_str(), &p.url).map_err(ConfigError::from))
            .collect()
    }

    /// Load ABIs and build contract descriptors. Relative ABI paths resolve
    /// against `base_dir`.
    pub fn contract_descriptors(&self, base_dir: &Path) -> Result<Vec<ContractDescriptor>, ConfigError> {
        self.contracts
            .iter()
            .map(|c| ContractDescriptor::new(&c.address, c.abi.load(base_dir)?, c.events.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
providers:
  - { name: p1, url: "https://one.example.com/v2/KEY" }
  - { name: p2, url: "https://two.example.com" }
  - { name: p3, url: "http://127.0.0.1:8545" }
contracts:
  - address: "0x5FbDB2315678afecb367f032d93F642f64180aa3"
    abi: marketplace
    events:
      - name: Purchase
      - name: EditionMinted
        filters:
          releaseId: [1, 2]
"#;

    #[test]
    fn defaults_apply() {
        let cfg = ServiceConfig::from_yaml_str(YAML).unwrap();
        assert_eq!(cfg.poll_interval_ms, 5_000);
        assert_eq!(cfg.request_timeout_ms, 5_000);
        assert_eq!(cfg.quorum, None);
        assert!(!cfg.lenient_quorum);
        assert_eq!(cfg.log_source, LogSourceKind::Range);
        assert_eq!(cfg.alert_after, 5);
        assert!(!cfg.fail_fast_on_decode_error);
        assert_eq!(cfg.log.level, "info");
    }

    #[test]
    fn builds_descriptors_from_builtin_abi() {
        let cfg = ServiceConfig::from_yaml_str(YAML).unwrap();
        let contracts = cfg.contract_descriptors(Path::new(".")).unwrap();
        assert_eq!(contracts[0].targets().len(), 2);
        assert_eq!(cfg.endpoints().unwrap().len(), 3);
    }

    #[test]
    fn inline_abi_and_filter_source() {
        let yaml = r#"
providers: [{ name: a, url: "http://localhost:8545" }]
contracts:
  - address: "0x5FbDB2315678afecb367f032d93F642f64180aa3"
    abi:
      - type: event
        name: Ping
        anonymous: false
        inputs: [{ name: n, type: uint256, indexed: false }]
    events: [{ name: Ping }]
log_source: filter
quorum: 1
"#;
        let cfg = ServiceConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(cfg.log_source, LogSourceKind::Filter);
        assert!(matches!(cfg.contracts[0].abi, AbiSource::Inline(_)));
        assert!(cfg.contract_descriptors(Path::new(".")).is_ok());
    }

    #[test]
    fn rejects_bad_quorum_and_duplicates() {
        let bad_quorum = YAML.replace("contracts:", "quorum: 4\ncontracts:");
        assert!(matches!(
            ServiceConfig::from_yaml_str(&bad_quorum),
            Err(ConfigError::Invalid(_))
        ));

        let dup = YAML.replace("name: p2", "name: p1");
        assert!(matches!(
            ServiceConfig::from_yaml_str(&dup),
            Err(ConfigError::Registry(RegistryError::DuplicateProvider(_)))
        ));
    }

    #[test]
    fn log_directives() {
        let mut log = LogConfig::default();
        log.components.insert("chainquorum-core".into(), "debug".into());
        assert_eq!(log.directives(), "info,chainquorum_core=debug");
    }

    #[test]
    fn example_config_parses() {
        let text = include_str!("../../../config/marketplace.example.yaml");
        let cfg = ServiceConfig::from_yaml_str(text).unwrap();
        assert_eq!(cfg.providers.len(), 3);
        assert_eq!(cfg.backoff.max_backoff_ms, 60_000);
        assert_eq!(cfg.http.connect_timeout_ms, 5_000);
        let contracts = cfg.contract_descriptors(Path::new(".")).unwrap();
        assert_eq!(contracts[0].targets().len(), 3);
    }
}
