//! Typed configuration for an lndev run.
//!
//! Every section is optional in YAML; missing sections fall back to the
//! defaults below.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

use crate::LEDGER_ALIAS;

/// Extra option value rendered into a generated config file
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum OptionValue {
    Bool(bool),
    Number(i64),
    String(String),
}

/// Top-level configuration
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub network: NetworkConfig,
    pub binaries: BinaryConfig,
    pub ledger: LedgerConfig,
    pub node: NodeConfig,
    pub timing: TimingConfig,
    pub funding: FundingConfig,
    pub activity: ActivityConfig,
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.validate_network()?;

        if self.funding.channel_min > self.funding.channel_max {
            return Err(ValidationError::InvalidFunding(format!(
                "channel_min ({}) must not exceed channel_max ({})",
                self.funding.channel_min, self.funding.channel_max
            )));
        }
        if self.funding.deposit_amount == 0 {
            return Err(ValidationError::InvalidFunding(
                "deposit_amount must be positive".to_string(),
            ));
        }

        if self.activity.min_amount == 0 {
            return Err(ValidationError::InvalidActivity(
                "min_amount must be at least 1".to_string(),
            ));
        }
        if self.activity.min_amount > self.activity.max_amount {
            return Err(ValidationError::InvalidActivity(format!(
                "min_amount ({}) must not exceed max_amount ({})",
                self.activity.min_amount, self.activity.max_amount
            )));
        }

        if self.node.wallet_passphrase.len() < 8 {
            return Err(ValidationError::InvalidNode(
                "wallet_passphrase must be at least 8 characters".to_string(),
            ));
        }

        if self.timing.poll_interval.is_zero() {
            return Err(ValidationError::InvalidTiming(
                "poll_interval must be non-zero".to_string(),
            ));
        }

        Ok(())
    }

    fn validate_network(&self) -> Result<(), ValidationError> {
        let network = &self.network;
        if network.nodes < 2 {
            return Err(ValidationError::InvalidNetwork(format!(
                "at least 2 nodes are required, got {}",
                network.nodes
            )));
        }
        if network.max_connections_per_node < 1 {
            return Err(ValidationError::InvalidNetwork(
                "max_connections_per_node must be at least 1".to_string(),
            ));
        }

        // Highest port used is the REST port of the last node
        let highest = u32::from(network.base_port) + crate::REST_PORT_OFFSET as u32 + network.nodes as u32;
        if highest > u32::from(u16::MAX) {
            return Err(ValidationError::InvalidNetwork(format!(
                "base_port {} leaves no room for {} nodes",
                network.base_port, network.nodes
            )));
        }

        if let Some(aliases) = &network.aliases {
            if aliases.len() < network.nodes {
                return Err(ValidationError::InvalidNetwork(format!(
                    "{} aliases given for {} nodes",
                    aliases.len(),
                    network.nodes
                )));
            }
            let mut seen = HashSet::new();
            for alias in aliases {
                if alias.trim().is_empty() {
                    return Err(ValidationError::InvalidNetwork("aliases cannot be empty".to_string()));
                }
                if alias == LEDGER_ALIAS {
                    return Err(ValidationError::InvalidNetwork(format!(
                        "alias '{}' is reserved for the ledger",
                        LEDGER_ALIAS
                    )));
                }
                if !seen.insert(alias.as_str()) {
                    return Err(ValidationError::InvalidNetwork(format!("duplicate alias '{}'", alias)));
                }
            }
        }

        Ok(())
    }
}

/// General run settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct GeneralConfig {
    /// Work directory holding every node and ledger data dir; `~` is expanded
    pub workdir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
    /// Master seed for topology, channel amounts and activity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Keep the work directory on teardown
    pub keep_workdir: bool,
}

/// Node set and topology settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    pub nodes: usize,
    pub max_connections_per_node: usize,
    pub base_port: u16,
    /// Explicit aliases; generated from the seed when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aliases: Option<Vec<String>>,
}

/// External binaries, as shorthand names or explicit paths
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BinaryConfig {
    pub bitcoind: String,
    pub bitcoin_cli: String,
    pub lnd: String,
}

/// Ledger (bitcoind regtest) settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LedgerConfig {
    pub rpc_user: String,
    pub rpc_password: String,
    pub zmq_block_port: u16,
    pub zmq_tx_port: u16,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub bitcoind_options: BTreeMap<String, OptionValue>,
}

/// Per-node (lnd) settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct NodeConfig {
    pub wallet_passphrase: String,
    /// Verify the node's self-signed TLS certificate
    pub tls_verify: bool,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub lnd_options: BTreeMap<String, OptionValue>,
}

/// Readiness timeouts and settle delays
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TimingConfig {
    #[serde(with = "humantime_serde")]
    pub ledger_ready_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub node_ready_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    #[serde(with = "humantime_serde")]
    pub launch_stagger: Duration,
    #[serde(with = "humantime_serde")]
    pub connect_settle: Duration,
    #[serde(with = "humantime_serde")]
    pub stage_settle: Duration,
    #[serde(with = "humantime_serde")]
    pub fund_settle: Duration,
    #[serde(with = "humantime_serde")]
    pub channel_settle: Duration,
    /// How long teardown waits for a stopped process to exit before killing it
    #[serde(with = "humantime_serde")]
    pub shutdown_grace: Duration,
}

/// Funding amounts in base units, and ledger progression block counts
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct FundingConfig {
    pub deposit_amount: u64,
    pub channel_min: u64,
    pub channel_max: u64,
    pub sync_blocks: u32,
    pub connect_blocks: u32,
    pub fund_blocks: u32,
    pub channel_blocks: u32,
}

/// Synthetic payment traffic settings
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ActivityConfig {
    pub payments: usize,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    pub min_amount: u64,
    pub max_amount: u64,
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid network configuration: {0}")]
    InvalidNetwork(String),
    #[error("Invalid funding configuration: {0}")]
    InvalidFunding(String),
    #[error("Invalid activity configuration: {0}")]
    InvalidActivity(String),
    #[error("Invalid node configuration: {0}")]
    InvalidNode(String),
    #[error("Invalid timing configuration: {0}")]
    InvalidTiming(String),
}

/// Default implementations
impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            workdir: PathBuf::from("~/.lndev"),
            log_level: Some("info".to_string()),
            seed: None,
            keep_workdir: false,
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            nodes: 3,
            max_connections_per_node: 2,
            base_port: crate::BASE_PORT,
            aliases: None,
        }
    }
}

impl Default for BinaryConfig {
    fn default() -> Self {
        Self {
            bitcoind: "bitcoind".to_string(),
            bitcoin_cli: "bitcoin-cli".to_string(),
            lnd: "lnd".to_string(),
        }
    }
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rpc_user: "lndev".to_string(),
            rpc_password: "lndev".to_string(),
            zmq_block_port: 28332,
            zmq_tx_port: 28333,
            bitcoind_options: BTreeMap::new(),
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            wallet_passphrase: "password".to_string(),
            tls_verify: false,
            lnd_options: BTreeMap::new(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            ledger_ready_timeout: Duration::from_secs(30),
            node_ready_timeout: Duration::from_secs(60),
            poll_interval: Duration::from_millis(500),
            launch_stagger: Duration::from_millis(500),
            connect_settle: Duration::from_millis(1200),
            stage_settle: Duration::from_secs(2),
            fund_settle: Duration::from_secs(2),
            channel_settle: Duration::from_secs(2),
            shutdown_grace: Duration::from_secs(10),
        }
    }
}

impl Default for FundingConfig {
    fn default() -> Self {
        Self {
            deposit_amount: 100_000_000,
            channel_min: 100_000,
            channel_max: 149_999,
            sync_blocks: 10,
            connect_blocks: 1,
            fund_blocks: 10,
            channel_blocks: 10,
        }
    }
}

impl Default for ActivityConfig {
    fn default() -> Self {
        Self {
            payments: 0,
            interval: Duration::from_secs(2),
            min_amount: 1,
            max_amount: 12_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = serde_yaml::from_str("{}").unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.network.nodes, 3);
        assert_eq!(config.network.base_port, 10000);
        assert_eq!(config.funding.channel_min, 100_000);
        assert_eq!(config.funding.channel_max, 149_999);
        assert_eq!(config.activity.max_amount, 12_000);
        assert_eq!(config.timing.connect_settle, Duration::from_millis(1200));
        assert_eq!(config.node.wallet_passphrase, "password");
    }

    #[test]
    fn test_full_config_parsing() {
        let yaml = r#"
general:
  workdir: "/tmp/lndev-test"
  seed: 7
network:
  nodes: 4
  max_connections_per_node: 3
  aliases: ["Alice", "Bob", "Carol", "Dave"]
timing:
  poll_interval: 250ms
  stage_settle: 5s
activity:
  payments: 20
  interval: 1s
node:
  lnd_options:
    debuglevel: debug
    accept-keysend: true
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.general.seed, Some(7));
        assert_eq!(config.network.max_connections_per_node, 3);
        assert_eq!(config.timing.poll_interval, Duration::from_millis(250));
        assert_eq!(config.timing.stage_settle, Duration::from_secs(5));
        assert_eq!(config.activity.payments, 20);
        assert_eq!(
            config.node.lnd_options.get("accept-keysend"),
            Some(&OptionValue::Bool(true))
        );
        // Unspecified timing fields keep their defaults
        assert_eq!(config.timing.launch_stagger, Duration::from_millis(500));
        assert_eq!(config.timing.shutdown_grace, Duration::from_secs(10));
    }

    #[test]
    fn test_network_validation() {
        let mut config = Config::default();
        config.network.nodes = 1;
        assert!(matches!(config.validate(), Err(ValidationError::InvalidNetwork(_))));

        let mut config = Config::default();
        config.network.max_connections_per_node = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.network.aliases = Some(vec!["Alice".to_string(), "Bob".to_string()]);
        assert!(config.validate().is_err(), "fewer aliases than nodes");

        let mut config = Config::default();
        config.network.aliases = Some(vec!["Alice".into(), "Bob".into(), "Alice".into()]);
        assert!(config.validate().is_err(), "duplicate alias");

        let mut config = Config::default();
        config.network.aliases = Some(vec!["Alice".into(), "Bob".into(), LEDGER_ALIAS.into()]);
        assert!(config.validate().is_err(), "reserved alias");

        let mut config = Config::default();
        config.network.base_port = 65000;
        config.network.nodes = 600;
        assert!(config.validate().is_err(), "port overflow");
    }

    #[test]
    fn test_amount_validation() {
        let mut config = Config::default();
        config.funding.channel_min = 200_000;
        assert!(matches!(config.validate(), Err(ValidationError::InvalidFunding(_))));

        let mut config = Config::default();
        config.activity.min_amount = 0;
        assert!(matches!(config.validate(), Err(ValidationError::InvalidActivity(_))));

        let mut config = Config::default();
        config.activity.min_amount = 50;
        config.activity.max_amount = 10;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.node.wallet_passphrase = "short".to_string();
        assert!(matches!(config.validate(), Err(ValidationError::InvalidNode(_))));
    }
}
