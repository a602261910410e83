//! # Node Registry
//!
//! Defines the node set of a run: one [`NodeIdentity`] per simulated
//! payment node, with its alias, port layout and credential paths.
//!
//! ## Port layout
//!
//! Node `i` (1-based) is assigned:
//!
//! - RPC port `base_port + i`
//! - P2P listen port `base_port + 1000 + i`
//! - REST port `base_port + 2000 + i`
//!
//! ## File locations
//!
//! ```text
//! <workdir>/
//! |-- bitcoin/bitcoin.conf     # ledger config and datadir
//! |-- user1/lnd.conf           # node 1 config
//! |-- user1/data/...           # node 1 chain data, admin.macaroon
//! |-- user1/tls.cert
//! \-- node_registry.json       # every node plus the ledger, for a console
//! ```
//!
//! The registry file lets an external console find each node and the
//! command line that drives it:
//!
//! ```json
//! {
//!   "nodes": [
//!     {
//!       "alias": "Okafor",
//!       "rpc_address": "localhost:10001",
//!       "listen_address": "127.0.0.1:11001",
//!       "console_command": "lncli --rpcserver=localhost:10001 --macaroonpath=..."
//!     }
//!   ],
//!   "ledger": { "alias": "Regtest", "console_command": "bitcoin-cli -conf=..." }
//! }
//! ```

use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::{LEDGER_ALIAS, LISTEN_PORT_OFFSET, REST_PORT_OFFSET};

/// Surnames used when no explicit alias list is configured
const SURNAMES: &[&str] = &[
    "Okafor", "Lindqvist", "Moreau", "Tanaka", "Novak", "Castillo", "Haddad", "Kowalski", "Mensah",
    "Fischer", "Oliveira", "Nakamura", "Petrov", "Duarte", "Byrne", "Sato", "Ivanova", "Rossi",
    "Mwangi", "Larsen", "Kaur", "Dubois", "Hoang", "Schmidt", "Alvarez", "Eriksen", "Yilmaz",
    "Fontaine", "Adeyemi", "Marsh", "Quinn", "Varga",
];

/// Identity and addressing of one simulated payment node
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeIdentity {
    /// Unique display name
    pub alias: String,
    /// 1-based position in the node set
    pub index: usize,
    pub rpc_address: String,
    /// P2P address peers dial during the connect handshake
    pub listen_address: String,
    pub rest_address: String,
    pub node_dir: PathBuf,
    /// Admin macaroon used to authenticate control-plane calls
    pub credential: PathBuf,
    pub tls_cert: PathBuf,
    /// Remote identity key, learned during the connect stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_identity: Option<String>,
}

impl NodeIdentity {
    /// Builds the identity of node `index` under `workdir`
    pub fn new(alias: &str, index: usize, base_port: u16, workdir: &Path) -> Self {
        let port = |offset: u16| u32::from(base_port) + u32::from(offset) + index as u32;
        let node_dir = workdir.join(format!("user{}", index));
        Self {
            alias: alias.to_string(),
            index,
            rpc_address: format!("localhost:{}", port(0)),
            listen_address: format!("127.0.0.1:{}", port(LISTEN_PORT_OFFSET)),
            rest_address: format!("localhost:{}", port(REST_PORT_OFFSET)),
            credential: node_dir.join("data/chain/bitcoin/regtest/admin.macaroon"),
            tls_cert: node_dir.join("tls.cert"),
            node_dir,
            remote_identity: None,
        }
    }

    /// Returns true if this is the reserved ledger-control pseudo-node
    pub fn is_ledger_pseudo_node(&self) -> bool {
        self.alias == LEDGER_ALIAS
    }

    pub fn config_path(&self) -> PathBuf {
        self.node_dir.join("lnd.conf")
    }

    /// Command line an operator console uses to drive this node
    pub fn console_command(&self) -> String {
        format!(
            "lncli --rpcserver={} --macaroonpath={}",
            self.rpc_address,
            self.credential.display()
        )
    }
}

/// The node set of one run
#[derive(Debug, Clone)]
pub struct NodeRegistry {
    workdir: PathBuf,
    nodes: Vec<NodeIdentity>,
}

impl NodeRegistry {
    /// Builds the node set from configuration, drawing aliases from `rng` when none are configured
    pub fn from_config<R: Rng + ?Sized>(config: &Config, workdir: &Path, rng: &mut R) -> Self {
        let count = config.network.nodes;
        let aliases = match &config.network.aliases {
            Some(list) => list.iter().take(count).cloned().collect(),
            None => generate_aliases(count, rng),
        };

        let nodes = aliases
            .iter()
            .enumerate()
            .map(|(i, alias)| NodeIdentity::new(alias, i + 1, config.network.base_port, workdir))
            .collect();

        Self {
            workdir: workdir.to_path_buf(),
            nodes,
        }
    }

    pub fn nodes(&self) -> &[NodeIdentity] {
        &self.nodes
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn ledger_dir(&self) -> PathBuf {
        self.workdir.join("bitcoin")
    }

    pub fn ledger_config_path(&self) -> PathBuf {
        self.ledger_dir().join("bitcoin.conf")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.workdir.join("node_registry.json")
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Writes `node_registry.json` for an external console
    pub fn write_registry(&self, bitcoin_cli: &str) -> color_eyre::eyre::Result<PathBuf> {
        let entries: Vec<RegistryEntry> = self
            .nodes
            .iter()
            .map(|node| RegistryEntry {
                alias: node.alias.clone(),
                rpc_address: Some(node.rpc_address.clone()),
                listen_address: Some(node.listen_address.clone()),
                rest_address: Some(node.rest_address.clone()),
                credential: Some(node.credential.clone()),
                console_command: node.console_command(),
            })
            .collect();

        let ledger = RegistryEntry {
            alias: LEDGER_ALIAS.to_string(),
            rpc_address: None,
            listen_address: None,
            rest_address: None,
            credential: None,
            console_command: format!("{} -conf={}", bitcoin_cli, self.ledger_config_path().display()),
        };

        let path = self.registry_path();
        let json = serde_json::to_string_pretty(&RegistryFile { nodes: entries, ledger })?;
        std::fs::write(&path, json)
            .map_err(|e| color_eyre::eyre::eyre!("Failed to write registry {:?}: {}", path, e))?;
        Ok(path)
    }
}

#[derive(Serialize)]
struct RegistryFile {
    nodes: Vec<RegistryEntry>,
    ledger: RegistryEntry,
}

#[derive(Serialize)]
struct RegistryEntry {
    alias: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    rpc_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    listen_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rest_address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    credential: Option<PathBuf>,
    console_command: String,
}

/// Draws `count` unique aliases from the built-in surname list.
///
/// Once the list is exhausted, or on collision, the 1-based node index is
/// appended to keep aliases unique.
pub fn generate_aliases<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Vec<String> {
    let mut pool: Vec<&str> = SURNAMES.to_vec();
    pool.shuffle(rng);

    let mut seen = HashSet::new();
    (0..count)
        .map(|i| {
            let base = pool[i % pool.len()];
            let alias = if seen.contains(base) || base == LEDGER_ALIAS {
                format!("{}{}", base, i + 1)
            } else {
                base.to_string()
            };
            seen.insert(alias.clone());
            alias
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_port_layout() {
        let node = NodeIdentity::new("Alice", 3, 10000, Path::new("/tmp/lndev"));
        assert_eq!(node.rpc_address, "localhost:10003");
        assert_eq!(node.listen_address, "127.0.0.1:11003");
        assert_eq!(node.rest_address, "localhost:12003");
        assert_eq!(node.node_dir, PathBuf::from("/tmp/lndev/user3"));
        assert_eq!(
            node.credential,
            PathBuf::from("/tmp/lndev/user3/data/chain/bitcoin/regtest/admin.macaroon")
        );
        assert_eq!(node.config_path(), PathBuf::from("/tmp/lndev/user3/lnd.conf"));
        assert!(node.console_command().starts_with("lncli --rpcserver=localhost:10003 --macaroonpath="));
        assert!(!node.is_ledger_pseudo_node());
    }

    #[test]
    fn test_generated_aliases_are_unique() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let aliases = generate_aliases(80, &mut rng);
        let unique: HashSet<_> = aliases.iter().collect();
        assert_eq!(unique.len(), 80);
        assert!(aliases.iter().all(|a| a != LEDGER_ALIAS));
    }

    #[test]
    fn test_generated_aliases_are_reproducible() {
        let a = generate_aliases(5, &mut ChaCha8Rng::seed_from_u64(42));
        let b = generate_aliases(5, &mut ChaCha8Rng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[test]
    fn test_registry_uses_configured_aliases() {
        let mut config = Config::default();
        config.network.nodes = 2;
        config.network.aliases = Some(vec!["Alice".into(), "Bob".into(), "Carol".into()]);

        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let registry = NodeRegistry::from_config(&config, Path::new("/tmp/x"), &mut rng);
        let aliases: Vec<_> = registry.nodes().iter().map(|n| n.alias.as_str()).collect();
        assert_eq!(aliases, vec!["Alice", "Bob"]);
        assert_eq!(registry.nodes()[1].index, 2);
    }

    #[test]
    fn test_write_registry() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.network.aliases = Some(vec!["Alice".into(), "Bob".into(), "Carol".into()]);
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let registry = NodeRegistry::from_config(&config, dir.path(), &mut rng);

        let path = registry.write_registry("bitcoin-cli").unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        let json: serde_json::Value = serde_json::from_str(&content).unwrap();

        assert_eq!(json["nodes"].as_array().unwrap().len(), 3);
        assert_eq!(json["nodes"][0]["alias"], "Alice");
        assert_eq!(json["nodes"][0]["rpc_address"], "localhost:10001");
        assert_eq!(json["ledger"]["alias"], LEDGER_ALIAS);
        assert!(json["ledger"]["console_command"]
            .as_str()
            .unwrap()
            .starts_with("bitcoin-cli -conf="));
        assert!(json["ledger"].get("rpc_address").is_none());
    }
}
