//! Ledger control through `bitcoin-cli`.

use async_trait::async_trait;
use log::debug;
use std::path::PathBuf;
use tokio::process::Command;

use super::{format_coins, ControlError, LedgerControl};

/// Drives the regtest ledger by shelling out to `bitcoin-cli -conf=<conf>`
#[derive(Debug, Clone)]
pub struct BitcoinCli {
    program: PathBuf,
    config: PathBuf,
}

impl BitcoinCli {
    pub fn new(program: PathBuf, config: PathBuf) -> Self {
        Self { program, config }
    }

    /// Runs one `bitcoin-cli` command and returns its trimmed stdout
    async fn call(&self, args: &[&str]) -> Result<String, ControlError> {
        let program = self.program.display().to_string();
        debug!("{} {}", program, args.join(" "));

        let output = Command::new(&self.program)
            .arg(format!("-conf={}", self.config.display()))
            .args(args)
            .output()
            .await
            .map_err(|source| ControlError::Spawn {
                program: program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ControlError::Command {
                program,
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl LedgerControl for BitcoinCli {
    async fn is_ready(&self) -> bool {
        self.call(&["getblockchaininfo"]).await.is_ok()
    }

    async fn new_address(&self) -> Result<String, ControlError> {
        let address = self.call(&["getnewaddress"]).await?;
        if address.is_empty() {
            return Err(ControlError::Decode("empty address from getnewaddress".to_string()));
        }
        Ok(address)
    }

    async fn send_to_address(&self, address: &str, amount: u64) -> Result<(), ControlError> {
        let coins = format_coins(amount);
        self.call(&["sendtoaddress", address, &coins]).await?;
        Ok(())
    }

    async fn generate_blocks(&self, count: u32) -> Result<(), ControlError> {
        let address = self.new_address().await?;
        let count = count.to_string();
        self.call(&["generatetoaddress", &count, &address]).await?;
        Ok(())
    }

    async fn stop(&self) -> Result<(), ControlError> {
        self.call(&["stop"]).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    /// Fake bitcoin-cli that appends its arguments to a log and answers a few commands
    fn fake_cli(dir: &Path) -> PathBuf {
        let log = dir.join("calls.log");
        let path = dir.join("bitcoin-cli");
        let body = format!(
            r#"#!/bin/sh
echo "$@" >> {log}
case "$2" in
  getnewaddress) echo "bcrt1qfakeaddress" ;;
  getblockchaininfo) echo "{{}}" ;;
  fail) echo "boom" >&2; exit 3 ;;
  *) echo "ok" ;;
esac
"#,
            log = log.display()
        );
        std::fs::write(&path, body).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    #[tokio::test]
    async fn test_generate_blocks_uses_fresh_address() {
        let dir = tempfile::tempdir().unwrap();
        let cli = BitcoinCli::new(fake_cli(dir.path()), PathBuf::from("/tmp/bitcoin.conf"));

        assert!(cli.is_ready().await);
        cli.generate_blocks(10).await.unwrap();
        cli.send_to_address("bcrt1qdest", 100_000_000).await.unwrap();

        let calls = std::fs::read_to_string(dir.path().join("calls.log")).unwrap();
        let lines: Vec<_> = calls.lines().collect();
        assert_eq!(lines[0], "-conf=/tmp/bitcoin.conf getblockchaininfo");
        assert_eq!(lines[1], "-conf=/tmp/bitcoin.conf getnewaddress");
        assert_eq!(lines[2], "-conf=/tmp/bitcoin.conf generatetoaddress 10 bcrt1qfakeaddress");
        assert_eq!(lines[3], "-conf=/tmp/bitcoin.conf sendtoaddress bcrt1qdest 1.00000000");
    }

    #[tokio::test]
    async fn test_command_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let cli = BitcoinCli::new(fake_cli(dir.path()), PathBuf::from("/tmp/bitcoin.conf"));

        let err = cli.call(&["fail"]).await.unwrap_err();
        match err {
            ControlError::Command { stderr, .. } => assert_eq!(stderr, "boom"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program() {
        let cli = BitcoinCli::new(PathBuf::from("/nonexistent/bitcoin-cli"), PathBuf::from("/tmp/x.conf"));
        assert!(!cli.is_ready().await);
        assert!(matches!(cli.stop().await, Err(ControlError::Spawn { .. })));
    }
}
