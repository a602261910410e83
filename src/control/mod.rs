//! Control-plane abstraction.
//!
//! The orchestrator and the activity generator never talk to node or ledger
//! processes directly. They go through the traits in this module, which are
//! injected as trait objects:
//!
//! - [`NodeControl`]: per-node RPC surface (identity, wallet, peers, channels, payments)
//! - [`LedgerControl`]: ledger surface (addresses, transfers, block generation)
//! - [`ProcessLauncher`]: starts and reaps the external processes
//! - [`NodeConnector`]: hands out a [`NodeControl`] for a node identity
//!
//! Three implementations ship with the crate: [`rest`] talks to lnd's REST
//! gateway, [`cli`] drives `bitcoin-cli`, and [`memory`] simulates the whole
//! network in-process for dry runs and tests.

pub mod cli;
pub mod memory;
pub mod rest;

use async_trait::async_trait;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::registry::NodeIdentity;

/// Machine-readable tag attached to every failure reported on the status pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    LedgerLaunch,
    LedgerNotReady,
    NodeLaunch,
    NodeNotReady,
    WalletSeed,
    WalletInit,
    PeerIdentity,
    PeerConnect,
    DepositAddress,
    LedgerTransfer,
    BlockGeneration,
    ChannelOpen,
    Invoice,
    Payment,
    Shutdown,
}

impl ErrorKind {
    /// Returns the stable tag for this error kind
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::LedgerLaunch => "ledger-launch",
            ErrorKind::LedgerNotReady => "ledger-not-ready",
            ErrorKind::NodeLaunch => "node-launch",
            ErrorKind::NodeNotReady => "node-not-ready",
            ErrorKind::WalletSeed => "wallet-seed",
            ErrorKind::WalletInit => "wallet-init",
            ErrorKind::PeerIdentity => "peer-identity",
            ErrorKind::PeerConnect => "peer-connect",
            ErrorKind::DepositAddress => "deposit-address",
            ErrorKind::LedgerTransfer => "ledger-transfer",
            ErrorKind::BlockGeneration => "block-generation",
            ErrorKind::ChannelOpen => "channel-open",
            ErrorKind::Invoice => "invoice",
            ErrorKind::Payment => "payment",
            ErrorKind::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by control-plane operations
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Command {
        program: String,
        status: String,
        stderr: String,
    },

    #[error("request to {endpoint} failed: {message}")]
    Request { endpoint: String, message: String },

    #[error("credential file unavailable: {path}: {source}")]
    Credential {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("operation rejected: {0}")]
    Rejected(String),

    #[error("unexpected response: {0}")]
    Decode(String),

    #[error("not ready after {0:?}")]
    Timeout(Duration),
}

/// Coarse lifecycle state of a node process as seen through its RPC surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeReadiness {
    /// Not reachable
    Down,
    /// Reachable, waiting for a wallet to be created or unlocked
    AwaitingWallet,
    /// Wallet unlocked and full RPC surface available
    Active,
}

/// Per-node control surface
#[async_trait]
pub trait NodeControl: Send + Sync {
    /// Probes the node's current lifecycle state; never fails
    async fn readiness(&self) -> NodeReadiness;

    /// Returns the node's public identity key
    async fn get_identity(&self) -> Result<String, ControlError>;

    /// Requests a fresh wallet seed mnemonic
    async fn generate_seed(&self) -> Result<Vec<String>, ControlError>;

    /// Initializes the node wallet from a seed and passphrase
    async fn create_wallet(&self, seed: &[String], passphrase: &str) -> Result<(), ControlError>;

    /// Returns a new on-ledger deposit address
    async fn new_deposit_address(&self) -> Result<String, ControlError>;

    /// Opens a transport connection to a peer
    async fn connect_to_peer(&self, identity: &str, address: &str) -> Result<(), ControlError>;

    /// Opens a payment channel funded with `amount` base units
    async fn open_channel(&self, peer_identity: &str, amount: u64) -> Result<(), ControlError>;

    /// Creates a payment request and returns its reference
    async fn create_invoice(&self, amount: u64, memo: &str) -> Result<String, ControlError>;

    /// Pays a payment request
    async fn settle(&self, payment_request: &str) -> Result<(), ControlError>;

    /// Asks the node process to shut down
    async fn stop(&self) -> Result<(), ControlError>;
}

/// Ledger control surface
#[async_trait]
pub trait LedgerControl: Send + Sync {
    /// Probes whether the ledger answers RPC calls
    async fn is_ready(&self) -> bool;

    async fn new_address(&self) -> Result<String, ControlError>;

    /// Sends `amount` base units to `address`
    async fn send_to_address(&self, address: &str, amount: u64) -> Result<(), ControlError>;

    /// Mines `count` blocks to a fresh ledger address
    async fn generate_blocks(&self, count: u32) -> Result<(), ControlError>;

    async fn stop(&self) -> Result<(), ControlError>;
}

/// Starts and reaps the external node and ledger processes
#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    async fn launch_ledger(&self) -> Result<(), ControlError>;

    async fn launch_node(&self, node: &NodeIdentity) -> Result<(), ControlError>;

    /// Kills any child process still running
    async fn shutdown(&self);
}

/// Factory handing out node control handles
pub trait NodeConnector: Send + Sync {
    fn connect(&self, node: &NodeIdentity) -> Arc<dyn NodeControl>;
}

/// Every collaborator the orchestrator needs, bundled for injection
#[derive(Clone)]
pub struct ControlPlane {
    pub launcher: Arc<dyn ProcessLauncher>,
    pub ledger: Arc<dyn LedgerControl>,
    pub connector: Arc<dyn NodeConnector>,
}

/// A node identity paired with its control handle
#[derive(Clone)]
pub struct NodeHandle {
    pub identity: NodeIdentity,
    pub control: Arc<dyn NodeControl>,
}

impl NodeHandle {
    pub fn alias(&self) -> &str {
        &self.identity.alias
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}

/// Polls `probe` every `interval` until it returns true, giving up after `timeout`.
///
/// The probe runs at least once, even with a zero timeout.
pub async fn wait_until_ready<F, Fut>(mut probe: F, timeout: Duration, interval: Duration) -> Result<(), ControlError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if probe().await {
            return Ok(());
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Err(ControlError::Timeout(timeout));
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}

/// Converts base units into the ledger's decimal coin notation
pub fn format_coins(amount: u64) -> String {
    format!("{}.{:08}", amount / 100_000_000, amount % 100_000_000)
}
