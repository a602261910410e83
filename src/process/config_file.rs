//! Ledger and node config file generation.
//!
//! Each lnd node gets an `lnd.conf` pointing at its own data, log and
//! credential paths and at the shared bitcoind regtest backend. The ledger
//! gets a single `bitcoin.conf`. User-supplied options from the config are
//! merged over the built-in defaults and appended to the relevant section.

use color_eyre::eyre::WrapErr;
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::{Config, OptionValue};
use crate::registry::{NodeIdentity, NodeRegistry};
use crate::utils::options::{merge_options, options_to_lines};

fn default_node_options() -> BTreeMap<String, OptionValue> {
    let mut options = BTreeMap::new();
    options.insert("debuglevel".to_string(), OptionValue::String("info".to_string()));
    options.insert("debughtlc".to_string(), OptionValue::Bool(true));
    options
}

/// Render the `lnd.conf` for one node
pub fn render_node_config(node: &NodeIdentity, config: &Config) -> String {
    let ledger = &config.ledger;
    let options = merge_options(&default_node_options(), &config.node.lnd_options);

    let mut lines = vec![
        "[Application Options]".to_string(),
        format!("datadir={}", node.node_dir.join("data").display()),
        format!("logdir={}", node.node_dir.join("log").display()),
        format!("tlscertpath={}", node.tls_cert.display()),
        format!("tlskeypath={}", node.node_dir.join("tls.key").display()),
        format!("rpclisten={}", node.rpc_address),
        format!("listen={}", node.listen_address),
        format!("restlisten={}", node.rest_address),
        format!("alias={}", node.alias),
        format!("adminmacaroonpath={}", node.credential.display()),
    ];
    lines.extend(options_to_lines(&options));

    lines.push(String::new());
    lines.push("[Bitcoin]".to_string());
    lines.push("bitcoin.regtest=1".to_string());
    lines.push("bitcoin.active=1".to_string());
    lines.push("bitcoin.node=bitcoind".to_string());

    lines.push(String::new());
    lines.push("[Bitcoind]".to_string());
    lines.push(format!("bitcoind.rpcuser={}", ledger.rpc_user));
    lines.push(format!("bitcoind.rpcpass={}", ledger.rpc_password));
    lines.push(format!("bitcoind.zmqpubrawblock=tcp://127.0.0.1:{}", ledger.zmq_block_port));
    lines.push(format!("bitcoind.zmqpubrawtx=tcp://127.0.0.1:{}", ledger.zmq_tx_port));

    let mut rendered = lines.join("\n");
    rendered.push('\n');
    rendered
}

/// Render the `bitcoin.conf` for the ledger.
///
/// The ledger runs in the foreground (`daemon=0`) so the launcher keeps its
/// process handle for teardown.
pub fn render_ledger_config(ledger_dir: &Path, config: &Config) -> String {
    let ledger = &config.ledger;

    let mut lines = vec![
        "server=1".to_string(),
        "txindex=1".to_string(),
        "daemon=0".to_string(),
        "regtest=1".to_string(),
        "maxconnections=10".to_string(),
        format!("rpcuser={}", ledger.rpc_user),
        format!("rpcpassword={}", ledger.rpc_password),
        "minrelaytxfee=0.00000000".to_string(),
        "incrementalrelayfee=0.00000010".to_string(),
        "fallbackfee=0.00010000".to_string(),
        format!("zmqpubrawblock=tcp://127.0.0.1:{}", ledger.zmq_block_port),
        format!("zmqpubrawtx=tcp://127.0.0.1:{}", ledger.zmq_tx_port),
        format!("datadir={}", ledger_dir.display()),
    ];
    lines.extend(options_to_lines(&ledger.bitcoind_options));

    let mut rendered = lines.join("\n");
    rendered.push('\n');
    rendered
}

/// Create every node and ledger directory and write their config files
pub fn write_config_files(registry: &NodeRegistry, config: &Config) -> color_eyre::eyre::Result<()> {
    let ledger_dir = registry.ledger_dir();
    std::fs::create_dir_all(&ledger_dir)
        .wrap_err_with(|| format!("Failed to create ledger directory '{}'", ledger_dir.display()))?;
    let ledger_conf = registry.ledger_config_path();
    std::fs::write(&ledger_conf, render_ledger_config(&ledger_dir, config))
        .wrap_err_with(|| format!("Failed to write '{}'", ledger_conf.display()))?;
    log::debug!("Wrote ledger config {:?}", ledger_conf);

    for node in registry.nodes() {
        std::fs::create_dir_all(&node.node_dir)
            .wrap_err_with(|| format!("Failed to create node directory '{}'", node.node_dir.display()))?;
        let path = node.config_path();
        std::fs::write(&path, render_node_config(node, config))
            .wrap_err_with(|| format!("Failed to write '{}'", path.display()))?;
        log::debug!("Wrote config for {} at {:?}", node.alias, path);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_node_config_contains_required_fields() {
        let node = NodeIdentity::new("Alice", 1, 10000, Path::new("/tmp/lndev"));
        let rendered = render_node_config(&node, &Config::default());

        assert!(rendered.contains("listen=127.0.0.1:11001"));
        assert!(rendered.contains("rpclisten=localhost:10001"));
        assert!(rendered.contains("restlisten=localhost:12001"));
        assert!(rendered.contains("alias=Alice"));
        assert!(rendered.contains(
            "adminmacaroonpath=/tmp/lndev/user1/data/chain/bitcoin/regtest/admin.macaroon"
        ));
        assert!(rendered.contains("tlscertpath=/tmp/lndev/user1/tls.cert"));
        assert!(rendered.contains("bitcoind.rpcuser=lndev"));
        assert!(rendered.contains("bitcoind.zmqpubrawblock=tcp://127.0.0.1:28332"));
        assert!(rendered.contains("debughtlc=1"));
    }

    #[test]
    fn test_node_config_user_options_override_defaults() {
        let mut config = Config::default();
        config
            .node
            .lnd_options
            .insert("debuglevel".to_string(), OptionValue::String("trace".to_string()));
        let node = NodeIdentity::new("Bob", 2, 10000, Path::new("/tmp/lndev"));
        let rendered = render_node_config(&node, &config);

        assert!(rendered.contains("debuglevel=trace"));
        assert!(!rendered.contains("debuglevel=info"));
    }

    #[test]
    fn test_ledger_config() {
        let mut config = Config::default();
        config
            .ledger
            .bitcoind_options
            .insert("rpcport".to_string(), OptionValue::Number(18443));
        let rendered = render_ledger_config(Path::new("/tmp/lndev/bitcoin"), &config);

        assert!(rendered.contains("regtest=1"));
        assert!(rendered.contains("daemon=0"));
        assert!(rendered.contains("rpcpassword=lndev"));
        assert!(rendered.contains("datadir=/tmp/lndev/bitcoin"));
        assert!(rendered.contains("rpcport=18443"));
    }

    #[test]
    fn test_write_config_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::default();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let registry = NodeRegistry::from_config(&config, dir.path(), &mut rng);

        write_config_files(&registry, &config).unwrap();

        assert!(registry.ledger_config_path().is_file());
        for node in registry.nodes() {
            let content = std::fs::read_to_string(node.config_path()).unwrap();
            assert!(content.contains(&format!("alias={}", node.alias)));
        }
    }
}
