//! In-process simulated network.
//!
//! [`MemoryNetwork`] stands in for bitcoind and every lnd process at once.
//! It implements all four control-plane traits, so a full provisioning run
//! (and the activity that follows it) can execute without spawning anything.
//! It backs `--dry-run` and the pipeline tests.
//!
//! Failures are injected per node and per operation with
//! [`MemoryNetwork::fail`]; the ledger has its own switches. Every effect the
//! pipeline has on the simulated network is recorded and can be inspected
//! afterwards.

use async_trait::async_trait;
use log::debug;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{
    ControlError, ControlPlane, LedgerControl, NodeConnector, NodeControl, NodeReadiness,
    ProcessLauncher,
};
use crate::registry::NodeIdentity;

const SEED_WORDS: &[&str] = &[
    "absorb", "acoustic", "bamboo", "cabin", "dawn", "eagle", "fabric", "galaxy", "harbor", "icon",
    "jungle", "kettle", "ladder", "magnet", "napkin", "orbit", "paddle", "quartz", "rabbit",
    "saddle", "tackle", "umbrella", "velvet", "walnut",
];

/// Node operations that can be made to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Launch,
    /// Readiness probes keep answering [`NodeReadiness::Down`] after launch
    Ready,
    Seed,
    CreateWallet,
    Identity,
    Connect,
    DepositAddress,
    OpenChannel,
    Invoice,
    Settle,
}

/// A channel opened on the simulated network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimChannel {
    pub opener: String,
    pub peer: String,
    pub amount: u64,
}

/// A settled payment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimPayment {
    pub payer: String,
    pub payee: String,
    pub amount: u64,
    pub memo: String,
}

#[derive(Debug)]
struct SimNode {
    readiness: NodeReadiness,
    identity: String,
    has_wallet: bool,
    balance: u64,
    addresses: HashSet<String>,
}

#[derive(Debug)]
struct SimInvoice {
    payee: String,
    amount: u64,
    memo: String,
    settled: bool,
}

#[derive(Debug)]
struct NetworkState {
    rng: ChaCha8Rng,
    nodes: BTreeMap<String, SimNode>,
    faults: HashSet<(String, Operation)>,
    fail_ledger_launch: bool,
    fail_ledger_ready: bool,
    fail_transfers: bool,
    ledger_running: bool,
    block_height: u64,
    invoice_counter: u64,
    invoices: BTreeMap<String, SimInvoice>,
    connections: Vec<(String, String)>,
    channels: Vec<SimChannel>,
    payments: Vec<SimPayment>,
    stopped: Vec<String>,
}

impl NetworkState {
    fn random_hex(&mut self, bytes: usize) -> String {
        let raw: Vec<u8> = (0..bytes).map(|_| self.rng.gen()).collect();
        hex::encode(raw)
    }

    fn is_faulted(&self, alias: &str, op: Operation) -> bool {
        self.faults.contains(&(alias.to_string(), op))
    }

    fn alias_for_identity(&self, identity: &str) -> Option<String> {
        self.nodes
            .iter()
            .find(|(_, node)| node.identity == identity)
            .map(|(alias, _)| alias.clone())
    }

    fn connected(&self, a: &str, b: &str) -> bool {
        self.connections
            .iter()
            .any(|(x, y)| (x == a && y == b) || (x == b && y == a))
    }
}

/// Shared handle to a simulated ledger plus node set
#[derive(Debug, Clone)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    /// Creates an empty network; `seed` drives identities, seeds and addresses
    pub fn new(seed: u64) -> Self {
        Self {
            state: Arc::new(Mutex::new(NetworkState {
                rng: ChaCha8Rng::seed_from_u64(seed),
                nodes: BTreeMap::new(),
                faults: HashSet::new(),
                fail_ledger_launch: false,
                fail_ledger_ready: false,
                fail_transfers: false,
                ledger_running: false,
                block_height: 0,
                invoice_counter: 0,
                invoices: BTreeMap::new(),
                connections: Vec::new(),
                channels: Vec::new(),
                payments: Vec::new(),
                stopped: Vec::new(),
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, NetworkState> {
        // State stays consistent between statements, so a poisoned lock is still usable
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Bundles this network as every collaborator of a [`ControlPlane`]
    pub fn control_plane(&self) -> ControlPlane {
        ControlPlane {
            launcher: Arc::new(self.clone()),
            ledger: Arc::new(self.clone()),
            connector: Arc::new(self.clone()),
        }
    }

    /// Makes `op` fail for the node called `alias`
    pub fn fail(&self, alias: &str, op: Operation) {
        self.state().faults.insert((alias.to_string(), op));
    }

    pub fn fail_ledger_launch(&self) {
        self.state().fail_ledger_launch = true;
    }

    /// Keeps the ledger unreachable after launch
    pub fn fail_ledger_ready(&self) {
        self.state().fail_ledger_ready = true;
    }

    pub fn fail_transfers(&self) {
        self.state().fail_transfers = true;
    }

    /// Peer connections as (initiator, acceptor) alias pairs, in order
    pub fn connections(&self) -> Vec<(String, String)> {
        self.state().connections.clone()
    }

    pub fn channels(&self) -> Vec<SimChannel> {
        self.state().channels.clone()
    }

    pub fn payments(&self) -> Vec<SimPayment> {
        self.state().payments.clone()
    }

    /// Number of invoices minted so far
    pub fn invoice_count(&self) -> usize {
        self.state().invoices.len()
    }

    pub fn block_height(&self) -> u64 {
        self.state().block_height
    }

    pub fn balance(&self, alias: &str) -> Option<u64> {
        self.state().nodes.get(alias).map(|node| node.balance)
    }

    pub fn identity_of(&self, alias: &str) -> Option<String> {
        self.state().nodes.get(alias).map(|node| node.identity.clone())
    }

    /// Aliases of launched nodes, sorted
    pub fn launched(&self) -> Vec<String> {
        self.state().nodes.keys().cloned().collect()
    }

    /// Aliases that received a stop command, in order
    pub fn stopped(&self) -> Vec<String> {
        self.state().stopped.clone()
    }

    pub fn is_ledger_running(&self) -> bool {
        self.state().ledger_running
    }
}

#[async_trait]
impl ProcessLauncher for MemoryNetwork {
    async fn launch_ledger(&self) -> Result<(), ControlError> {
        let mut state = self.state();
        if state.fail_ledger_launch {
            return Err(ControlError::Rejected("simulated ledger launch failure".to_string()));
        }
        state.ledger_running = true;
        Ok(())
    }

    async fn launch_node(&self, node: &NodeIdentity) -> Result<(), ControlError> {
        let mut state = self.state();
        if state.is_faulted(&node.alias, Operation::Launch) {
            return Err(ControlError::Rejected(format!("simulated launch failure for {}", node.alias)));
        }
        let identity = format!("02{}", state.random_hex(32));
        let readiness = if state.is_faulted(&node.alias, Operation::Ready) {
            NodeReadiness::Down
        } else {
            NodeReadiness::AwaitingWallet
        };
        debug!("Simulated node {} launched as {}", node.alias, identity);
        state.nodes.insert(
            node.alias.clone(),
            SimNode {
                readiness,
                identity,
                has_wallet: false,
                balance: 0,
                addresses: HashSet::new(),
            },
        );
        Ok(())
    }

    async fn shutdown(&self) {
        let mut state = self.state();
        state.ledger_running = false;
        for node in state.nodes.values_mut() {
            node.readiness = NodeReadiness::Down;
        }
    }
}

#[async_trait]
impl LedgerControl for MemoryNetwork {
    async fn is_ready(&self) -> bool {
        let state = self.state();
        state.ledger_running && !state.fail_ledger_ready
    }

    async fn new_address(&self) -> Result<String, ControlError> {
        let mut state = self.state();
        Ok(format!("bcrt1q{}", state.random_hex(20)))
    }

    async fn send_to_address(&self, address: &str, amount: u64) -> Result<(), ControlError> {
        let mut state = self.state();
        if state.fail_transfers {
            return Err(ControlError::Rejected("simulated transfer failure".to_string()));
        }
        if let Some(node) = state.nodes.values_mut().find(|n| n.addresses.contains(address)) {
            node.balance += amount;
        }
        Ok(())
    }

    async fn generate_blocks(&self, count: u32) -> Result<(), ControlError> {
        let mut state = self.state();
        if !state.ledger_running {
            return Err(ControlError::Rejected("ledger is not running".to_string()));
        }
        state.block_height += u64::from(count);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ControlError> {
        self.state().ledger_running = false;
        Ok(())
    }
}

impl NodeConnector for MemoryNetwork {
    fn connect(&self, node: &NodeIdentity) -> Arc<dyn NodeControl> {
        Arc::new(MemoryNode {
            alias: node.alias.clone(),
            network: self.clone(),
        })
    }
}

/// Control handle for one simulated node
pub struct MemoryNode {
    alias: String,
    network: MemoryNetwork,
}

impl MemoryNode {
    /// Locks the network and checks that this node is launched and `op` is not faulted
    fn guard(&self, op: Operation) -> Result<MutexGuard<'_, NetworkState>, ControlError> {
        let state = self.network.state();
        if state.is_faulted(&self.alias, op) {
            return Err(ControlError::Rejected(format!(
                "simulated {:?} failure for {}",
                op, self.alias
            )));
        }
        let running = matches!(
            state.nodes.get(&self.alias),
            Some(node) if node.readiness != NodeReadiness::Down
        );
        if !running {
            return Err(ControlError::Request {
                endpoint: self.alias.clone(),
                message: "node is not running".to_string(),
            });
        }
        Ok(state)
    }

    /// Like [`MemoryNode::guard`], additionally requiring an unlocked wallet
    fn guard_active(&self, op: Operation) -> Result<MutexGuard<'_, NetworkState>, ControlError> {
        let state = self.guard(op)?;
        let active = matches!(
            state.nodes.get(&self.alias),
            Some(node) if node.readiness == NodeReadiness::Active
        );
        if !active {
            return Err(ControlError::Rejected(format!("wallet of {} is locked", self.alias)));
        }
        Ok(state)
    }
}

#[async_trait]
impl NodeControl for MemoryNode {
    async fn readiness(&self) -> NodeReadiness {
        self.network
            .state()
            .nodes
            .get(&self.alias)
            .map(|node| node.readiness)
            .unwrap_or(NodeReadiness::Down)
    }

    async fn get_identity(&self) -> Result<String, ControlError> {
        let state = self.guard_active(Operation::Identity)?;
        state
            .nodes
            .get(&self.alias)
            .map(|node| node.identity.clone())
            .ok_or_else(|| ControlError::Decode(format!("unknown node {}", self.alias)))
    }

    async fn generate_seed(&self) -> Result<Vec<String>, ControlError> {
        let mut state = self.guard(Operation::Seed)?;
        let words = (0..24)
            .map(|_| SEED_WORDS[state.rng.gen_range(0..SEED_WORDS.len())].to_string())
            .collect();
        Ok(words)
    }

    async fn create_wallet(&self, seed: &[String], passphrase: &str) -> Result<(), ControlError> {
        let mut state = self.guard(Operation::CreateWallet)?;
        if seed.len() != 24 {
            return Err(ControlError::Rejected(format!("seed has {} words, want 24", seed.len())));
        }
        if passphrase.len() < 8 {
            return Err(ControlError::Rejected("passphrase must be at least 8 characters".to_string()));
        }
        let node = state
            .nodes
            .get_mut(&self.alias)
            .ok_or_else(|| ControlError::Decode(format!("unknown node {}", self.alias)))?;
        if node.has_wallet {
            return Err(ControlError::Rejected("wallet already exists".to_string()));
        }
        node.has_wallet = true;
        node.readiness = NodeReadiness::Active;
        Ok(())
    }

    async fn new_deposit_address(&self) -> Result<String, ControlError> {
        let mut state = self.guard_active(Operation::DepositAddress)?;
        let address = format!("2N{}", state.random_hex(16));
        if let Some(node) = state.nodes.get_mut(&self.alias) {
            node.addresses.insert(address.clone());
        }
        Ok(address)
    }

    async fn connect_to_peer(&self, identity: &str, address: &str) -> Result<(), ControlError> {
        let mut state = self.guard_active(Operation::Connect)?;
        let peer = state
            .alias_for_identity(identity)
            .ok_or_else(|| ControlError::Rejected(format!("no peer {} at {}", identity, address)))?;
        if peer == self.alias {
            return Err(ControlError::Rejected("cannot connect to self".to_string()));
        }
        if state.connected(&self.alias, &peer) {
            return Err(ControlError::Rejected(format!("already connected to {}", peer)));
        }
        state.connections.push((self.alias.clone(), peer));
        Ok(())
    }

    async fn open_channel(&self, peer_identity: &str, amount: u64) -> Result<(), ControlError> {
        let mut state = self.guard_active(Operation::OpenChannel)?;
        let peer = state
            .alias_for_identity(peer_identity)
            .ok_or_else(|| ControlError::Rejected(format!("unknown peer {}", peer_identity)))?;
        if !state.connected(&self.alias, &peer) {
            return Err(ControlError::Rejected(format!("not connected to {}", peer)));
        }
        let node = state
            .nodes
            .get_mut(&self.alias)
            .ok_or_else(|| ControlError::Decode(format!("unknown node {}", self.alias)))?;
        if node.balance < amount {
            return Err(ControlError::Rejected(format!(
                "insufficient funds: have {}, need {}",
                node.balance, amount
            )));
        }
        node.balance -= amount;
        state.channels.push(SimChannel {
            opener: self.alias.clone(),
            peer,
            amount,
        });
        Ok(())
    }

    async fn create_invoice(&self, amount: u64, memo: &str) -> Result<String, ControlError> {
        let mut state = self.guard_active(Operation::Invoice)?;
        state.invoice_counter += 1;
        let counter = state.invoice_counter;
        let request = format!("lnbcrt{}n1p{}{}", amount, counter, state.random_hex(8));
        state.invoices.insert(
            request.clone(),
            SimInvoice {
                payee: self.alias.clone(),
                amount,
                memo: memo.to_string(),
                settled: false,
            },
        );
        Ok(request)
    }

    async fn settle(&self, payment_request: &str) -> Result<(), ControlError> {
        let mut state = self.guard_active(Operation::Settle)?;
        let invoice = state
            .invoices
            .get_mut(payment_request)
            .ok_or_else(|| ControlError::Rejected("invoice not found".to_string()))?;
        if invoice.settled {
            return Err(ControlError::Rejected("invoice is already paid".to_string()));
        }
        if invoice.payee == self.alias {
            return Err(ControlError::Rejected("cannot pay own invoice".to_string()));
        }
        invoice.settled = true;
        let payment = SimPayment {
            payer: self.alias.clone(),
            payee: invoice.payee.clone(),
            amount: invoice.amount,
            memo: invoice.memo.clone(),
        };
        state.payments.push(payment);
        Ok(())
    }

    async fn stop(&self) -> Result<(), ControlError> {
        let mut state = self.network.state();
        if let Some(node) = state.nodes.get_mut(&self.alias) {
            node.readiness = NodeReadiness::Down;
        }
        state.stopped.push(self.alias.clone());
        Ok(())
    }
}
