//! Local process launcher.
//!
//! Spawns bitcoind and lnd as child processes of lndev, redirecting their
//! output into log files next to their data, and keeps every child handle
//! so teardown can reap whatever is still running. Children get a grace
//! period to finish a graceful stop before they are killed.

use async_trait::async_trait;
use log::{debug, info, warn};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use super::types::ProcessType;
use crate::control::{ControlError, ProcessLauncher};
use crate::registry::{NodeIdentity, NodeRegistry};
use crate::utils::binary::ResolvedBinaries;

struct ManagedChild {
    name: String,
    kind: ProcessType,
    child: Child,
}

/// Launches ledger and node processes on the local machine
pub struct LocalLauncher {
    binaries: ResolvedBinaries,
    ledger_dir: PathBuf,
    ledger_config: PathBuf,
    grace: Duration,
    children: Mutex<Vec<ManagedChild>>,
}

impl LocalLauncher {
    pub fn new(binaries: ResolvedBinaries, registry: &NodeRegistry) -> Self {
        Self {
            binaries,
            ledger_dir: registry.ledger_dir(),
            ledger_config: registry.ledger_config_path(),
            grace: Duration::from_secs(10),
            children: Mutex::new(Vec::new()),
        }
    }

    /// Sets how long [`ProcessLauncher::shutdown`] waits for each child to exit on its own
    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    async fn spawn(
        &self,
        name: &str,
        kind: ProcessType,
        program: &Path,
        args: &[String],
        log_dir: &Path,
    ) -> Result<(), ControlError> {
        let program_name = program.display().to_string();
        let spawn_err = |source| ControlError::Spawn {
            program: program_name.clone(),
            source,
        };

        std::fs::create_dir_all(log_dir).map_err(spawn_err)?;
        let stdout = File::create(log_dir.join(format!("{}.stdout.log", kind))).map_err(spawn_err)?;
        let stderr = File::create(log_dir.join(format!("{}.stderr.log", kind))).map_err(spawn_err)?;

        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(stderr))
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_err)?;

        info!("Started {} process '{}' (pid {:?})", kind, name, child.id());
        self.children.lock().await.push(ManagedChild {
            name: name.to_string(),
            kind,
            child,
        });
        Ok(())
    }

    /// Number of child processes still tracked
    pub async fn tracked(&self) -> usize {
        self.children.lock().await.len()
    }
}

#[async_trait]
impl ProcessLauncher for LocalLauncher {
    async fn launch_ledger(&self) -> Result<(), ControlError> {
        let args = vec![format!("-conf={}", self.ledger_config.display())];
        self.spawn(
            crate::LEDGER_ALIAS,
            ProcessType::Ledger,
            &self.binaries.bitcoind,
            &args,
            &self.ledger_dir,
        )
        .await
    }

    async fn launch_node(&self, node: &NodeIdentity) -> Result<(), ControlError> {
        let args = vec![format!("--configfile={}", node.config_path().display())];
        self.spawn(&node.alias, ProcessType::Node, &self.binaries.lnd, &args, &node.node_dir)
            .await
    }

    async fn shutdown(&self) {
        let mut children = self.children.lock().await;
        for mut managed in children.drain(..) {
            match tokio::time::timeout(self.grace, managed.child.wait()).await {
                Ok(Ok(status)) => {
                    debug!("{} process '{}' exited: {}", managed.kind, managed.name, status);
                }
                Ok(Err(e)) => {
                    warn!("Cannot wait on {} process '{}': {}", managed.kind, managed.name, e);
                }
                Err(_) => {
                    info!(
                        "Killing {} process '{}' after {:?} grace period",
                        managed.kind, managed.name, self.grace
                    );
                    if let Err(e) = managed.child.kill().await {
                        warn!("Failed to kill {} process '{}': {}", managed.kind, managed.name, e);
                    }
                }
            }
        }
    }
}
