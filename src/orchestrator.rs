//! Network provisioning orchestrator.
//!
//! Drives one run through its stages, strictly in order:
//!
//! 1. start the ledger and wait until it answers
//! 2. launch every node (staggered) and wait until each is reachable
//! 3. create each node's wallet, one node at a time
//! 4. propose a topology and perform the peer handshakes
//! 5. fund every node from the ledger
//! 6. open a channel along every realized edge
//!
//! Steps 2, 5 and 6 report per-item failures and carry on; steps 1, 3 and 4
//! abort the run. See [`Stage::failure_policy`]. Whatever happens, the
//! completion signal fires exactly once, after the last status line.

use log::{debug, info, warn};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::config::{Config, FundingConfig, TimingConfig};
use crate::control::{format_coins, wait_until_ready, ControlPlane, ErrorKind, NodeHandle, NodeReadiness};
use crate::registry::NodeIdentity;
use crate::status::{CompletionSignal, StatusSink};
use crate::topology::{ConnectionGraph, Edge, TopologyBuilder};

/// Lifecycle stage of a run, in pipeline order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    NotStarted,
    LedgerStarted,
    NodesLaunched,
    WalletsCreated,
    PeersConnected,
    NodesFunded,
    ChannelsOpened,
    ActivityRunning,
    Complete,
    Failed,
}

/// What a failing item does to the run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    /// Report the item, skip it, continue with the next one
    RecoverablePerItem,
    /// Report and abort every remaining stage
    FatalToRun,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::NotStarted => "not-started",
            Stage::LedgerStarted => "ledger-started",
            Stage::NodesLaunched => "nodes-launched",
            Stage::WalletsCreated => "wallets-created",
            Stage::PeersConnected => "peers-connected",
            Stage::NodesFunded => "nodes-funded",
            Stage::ChannelsOpened => "channels-opened",
            Stage::ActivityRunning => "activity-running",
            Stage::Complete => "complete",
            Stage::Failed => "failed",
        }
    }

    /// Failure policy of the step that advances a run into this stage.
    ///
    /// `None` for stages no pipeline step produces.
    pub fn failure_policy(&self) -> Option<FailurePolicy> {
        match self {
            Stage::LedgerStarted | Stage::WalletsCreated | Stage::PeersConnected => {
                Some(FailurePolicy::FatalToRun)
            }
            Stage::NodesLaunched | Stage::NodesFunded | Stage::ChannelsOpened => {
                Some(FailurePolicy::RecoverablePerItem)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure that aborted a run
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("stage {stage} failed [{kind}]: {message}")]
pub struct StageFailure {
    /// Stage the run was trying to reach
    pub stage: Stage,
    pub kind: ErrorKind,
    pub message: String,
}

impl StageFailure {
    fn new(stage: Stage, kind: ErrorKind, context: impl fmt::Display, err: impl fmt::Display) -> Self {
        Self {
            stage,
            kind,
            message: format!("{}: {}", context, err),
        }
    }
}

/// Per-item tallies of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub launched: usize,
    pub launch_failures: usize,
    pub funded: usize,
    pub fund_failures: usize,
    pub channels_opened: usize,
    pub channel_failures: usize,
}

/// Final state of a run, delivered with the completion signal
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub stage: Stage,
    /// Nodes that survived launch, in registry order
    pub nodes: Arc<[NodeHandle]>,
    pub graph: ConnectionGraph,
    pub failure: Option<StageFailure>,
    pub summary: RunSummary,
}

impl RunOutcome {
    /// An outcome with no nodes and no edges
    pub fn empty(stage: Stage) -> Self {
        Self {
            stage,
            nodes: Vec::new().into(),
            graph: ConnectionGraph::new(),
            failure: None,
            summary: RunSummary::default(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.stage == Stage::Complete
    }
}

/// Run parameters taken from the configuration
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub max_connections: usize,
    pub wallet_passphrase: String,
    pub timing: TimingConfig,
    pub funding: FundingConfig,
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_connections: config.network.max_connections_per_node,
            wallet_passphrase: config.node.wallet_passphrase.clone(),
            timing: config.timing.clone(),
            funding: config.funding.clone(),
        }
    }
}

/// Owns every piece of state of one run
pub struct Orchestrator {
    nodes: Vec<NodeIdentity>,
    plane: ControlPlane,
    settings: RunSettings,
    rng: ChaCha8Rng,
    stage: Stage,
    pool: Vec<NodeHandle>,
    graph: ConnectionGraph,
    summary: RunSummary,
}

impl Orchestrator {
    /// Prepares a run over `nodes`.
    ///
    /// # Arguments
    /// * `nodes` - The node set; a ledger pseudo-node entry is never launched
    /// * `plane` - Control-plane collaborators
    /// * `settings` - Timing, funding and topology parameters
    /// * `rng` - Random source for topology and channel amounts
    pub fn new(nodes: Vec<NodeIdentity>, plane: ControlPlane, settings: RunSettings, rng: ChaCha8Rng) -> Self {
        Self {
            nodes,
            plane,
            settings,
            rng,
            stage: Stage::NotStarted,
            pool: Vec::new(),
            graph: ConnectionGraph::new(),
            summary: RunSummary::default(),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Runs every stage once, then fires `done` with the outcome.
    ///
    /// Consumes the orchestrator, so the same node set cannot be run twice.
    pub async fn run(mut self, sink: StatusSink, done: CompletionSignal) {
        info!("Provisioning {} nodes", self.nodes.len());

        let failure = match self.execute(&sink).await {
            Ok(()) => {
                self.stage = Stage::Complete;
                sink.success(format!(
                    "Network ready: {} nodes, {} connections, {} channels",
                    self.pool.len(),
                    self.graph.len(),
                    self.summary.channels_opened
                ))
                .await;
                None
            }
            Err(failure) => {
                warn!("Run aborted: {}", failure);
                self.stage = Stage::Failed;
                sink.error(failure.kind, format!("Run aborted before {}", failure.stage), &failure.message)
                    .await;
                Some(failure)
            }
        };

        let outcome = RunOutcome {
            stage: self.stage,
            nodes: self.pool.into(),
            graph: self.graph,
            failure,
            summary: self.summary,
        };
        done.fire(sink, outcome);
    }

    /// Runs the orchestrator as a background task
    pub fn spawn(self, sink: StatusSink, done: CompletionSignal) -> JoinHandle<()> {
        tokio::spawn(self.run(sink, done))
    }

    async fn execute(&mut self, sink: &StatusSink) -> Result<(), StageFailure> {
        self.start_ledger(sink).await?;
        self.launch_nodes(sink).await;
        self.create_wallets(sink).await?;
        self.connect_peers(sink).await?;
        self.fund_nodes(sink).await;
        self.open_channels(sink).await;
        Ok(())
    }

    fn advance(&mut self, stage: Stage) {
        debug!("Stage {} -> {}", self.stage, stage);
        self.stage = stage;
    }

    /// Mines `blocks` blocks, then waits `settle`. A mining failure is reported but not fatal.
    async fn nudge(&self, sink: &StatusSink, blocks: u32, settle: Duration) {
        if blocks > 0 {
            if let Err(e) = self.plane.ledger.generate_blocks(blocks).await {
                sink.error(ErrorKind::BlockGeneration, format!("Generating {} blocks", blocks), e)
                    .await;
            }
        }
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }
    }

    async fn start_ledger(&mut self, sink: &StatusSink) -> Result<(), StageFailure> {
        let stage = Stage::LedgerStarted;
        sink.info("Starting ledger").await;

        self.plane
            .launcher
            .launch_ledger()
            .await
            .map_err(|e| StageFailure::new(stage, ErrorKind::LedgerLaunch, "Launching ledger", e))?;

        let ledger = Arc::clone(&self.plane.ledger);
        wait_until_ready(
            || {
                let ledger = Arc::clone(&ledger);
                async move { ledger.is_ready().await }
            },
            self.settings.timing.ledger_ready_timeout,
            self.settings.timing.poll_interval,
        )
        .await
        .map_err(|e| StageFailure::new(stage, ErrorKind::LedgerNotReady, "Waiting for ledger", e))?;

        sink.success("Ledger is ready").await;
        self.advance(stage);
        Ok(())
    }

    async fn launch_nodes(&mut self, sink: &StatusSink) {
        let candidates: Vec<NodeIdentity> = self
            .nodes
            .iter()
            .filter(|node| !node.is_ledger_pseudo_node())
            .cloned()
            .collect();
        sink.info(format!("Launching {} nodes", candidates.len())).await;

        let mut launched = Vec::new();
        for (i, node) in candidates.into_iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.settings.timing.launch_stagger).await;
            }
            match self.plane.launcher.launch_node(&node).await {
                Ok(()) => launched.push(node),
                Err(e) => {
                    self.summary.launch_failures += 1;
                    sink.error(ErrorKind::NodeLaunch, format!("Launching {}", node.alias), e)
                        .await;
                }
            }
        }

        for node in launched {
            let control = self.plane.connector.connect(&node);
            let probe = Arc::clone(&control);
            let ready = wait_until_ready(
                || {
                    let probe = Arc::clone(&probe);
                    async move { probe.readiness().await != NodeReadiness::Down }
                },
                self.settings.timing.node_ready_timeout,
                self.settings.timing.poll_interval,
            )
            .await;

            match ready {
                Ok(()) => {
                    sink.success(format!("{} is up at {}", node.alias, node.rpc_address)).await;
                    self.summary.launched += 1;
                    self.pool.push(NodeHandle { identity: node, control });
                }
                Err(e) => {
                    self.summary.launch_failures += 1;
                    sink.error(ErrorKind::NodeNotReady, format!("Waiting for {}", node.alias), e)
                        .await;
                }
            }
        }

        self.nudge(sink, self.settings.funding.sync_blocks, Duration::ZERO).await;
        self.advance(Stage::NodesLaunched);
    }

    async fn create_wallets(&mut self, sink: &StatusSink) -> Result<(), StageFailure> {
        let stage = Stage::WalletsCreated;
        sink.info(format!("Creating {} wallets", self.pool.len())).await;

        for handle in &self.pool {
            let alias = handle.alias();
            let seed = handle
                .control
                .generate_seed()
                .await
                .map_err(|e| StageFailure::new(stage, ErrorKind::WalletSeed, format!("Seed for {}", alias), e))?;

            handle
                .control
                .create_wallet(&seed, &self.settings.wallet_passphrase)
                .await
                .map_err(|e| StageFailure::new(stage, ErrorKind::WalletInit, format!("Wallet for {}", alias), e))?;

            let probe = Arc::clone(&handle.control);
            wait_until_ready(
                || {
                    let probe = Arc::clone(&probe);
                    async move { probe.readiness().await == NodeReadiness::Active }
                },
                self.settings.timing.node_ready_timeout,
                self.settings.timing.poll_interval,
            )
            .await
            .map_err(|e| StageFailure::new(stage, ErrorKind::WalletInit, format!("Unlocking {}", alias), e))?;

            sink.success(format!("Wallet created for {}", alias)).await;
        }

        self.advance(stage);
        Ok(())
    }

    fn position(&self, alias: &str, stage: Stage) -> Result<usize, StageFailure> {
        self.pool
            .iter()
            .position(|handle| handle.alias() == alias)
            .ok_or_else(|| StageFailure::new(stage, ErrorKind::PeerConnect, alias, "not in the node pool"))
    }

    async fn connect_peers(&mut self, sink: &StatusSink) -> Result<(), StageFailure> {
        let stage = Stage::PeersConnected;
        let aliases: Vec<String> = self.pool.iter().map(|h| h.alias().to_string()).collect();

        // A lone survivor has nobody to dial; funding still proceeds
        if aliases.len() < 2 {
            sink.info(format!("Connecting 0 peer pairs ({} nodes in the pool)", aliases.len()))
                .await;
            self.advance(stage);
            return Ok(());
        }

        let proposal = TopologyBuilder::new(self.settings.max_connections)
            .and_then(|builder| builder.propose(&aliases, &mut self.rng))
            .map_err(|e| StageFailure::new(stage, ErrorKind::PeerConnect, "Building topology", e))?;
        sink.info(format!("Connecting {} peer pairs", proposal.len())).await;

        for edge in proposal {
            let source = self.position(&edge.source, stage)?;
            let target = self.position(&edge.target, stage)?;
            let dialer = Arc::clone(&self.pool[source].control);
            let listener = Arc::clone(&self.pool[target].control);
            let address = self.pool[target].identity.listen_address.clone();

            let identity = listener.get_identity().await.map_err(|e| {
                StageFailure::new(stage, ErrorKind::PeerIdentity, format!("Identity of {}", edge.target), e)
            })?;

            dialer
                .connect_to_peer(&identity, &address)
                .await
                .map_err(|e| StageFailure::new(stage, ErrorKind::PeerConnect, format!("Connecting {}", edge), e))?;

            self.pool[target].identity.remote_identity = Some(identity.clone());
            let line = format!("Connected {}", edge);
            if !self.graph.record(edge, identity) {
                debug!("{} was already recorded", line);
                continue;
            }
            sink.success(line).await;
            self.nudge(sink, self.settings.funding.connect_blocks, self.settings.timing.connect_settle)
                .await;
        }

        tokio::time::sleep(self.settings.timing.stage_settle).await;
        self.advance(stage);
        Ok(())
    }

    async fn fund_nodes(&mut self, sink: &StatusSink) {
        let amount = self.settings.funding.deposit_amount;
        sink.info(format!("Funding {} nodes with {} each", self.pool.len(), format_coins(amount)))
            .await;

        let pool = self.pool.clone();
        for handle in &pool {
            let address = match handle.control.new_deposit_address().await {
                Ok(address) => address,
                Err(e) => {
                    self.summary.fund_failures += 1;
                    sink.error(ErrorKind::DepositAddress, format!("Deposit address for {}", handle.alias()), e)
                        .await;
                    continue;
                }
            };

            match self.plane.ledger.send_to_address(&address, amount).await {
                Ok(()) => {
                    self.summary.funded += 1;
                    sink.success(format!("Sent {} to {} ({})", format_coins(amount), handle.alias(), address))
                        .await;
                }
                Err(e) => {
                    self.summary.fund_failures += 1;
                    sink.error(ErrorKind::LedgerTransfer, format!("Funding {}", handle.alias()), e)
                        .await;
                }
            }
        }

        self.nudge(sink, self.settings.funding.fund_blocks, self.settings.timing.fund_settle)
            .await;
        self.advance(Stage::NodesFunded);
    }

    async fn open_channels(&mut self, sink: &StatusSink) {
        let edges: Vec<Edge> = self.graph.edges().to_vec();
        sink.info(format!("Opening {} channels", edges.len())).await;

        for edge in &edges {
            let amount = self
                .rng
                .gen_range(self.settings.funding.channel_min..=self.settings.funding.channel_max);

            let opener = match self.pool.iter().find(|h| h.alias() == edge.source) {
                Some(handle) => Arc::clone(&handle.control),
                None => continue,
            };
            let Some(peer_identity) = self.graph.identity(&edge.target).map(str::to_string) else {
                continue;
            };

            match opener.open_channel(&peer_identity, amount).await {
                Ok(()) => {
                    self.summary.channels_opened += 1;
                    sink.success(format!("Opened channel {} with {} units", edge, amount)).await;
                    self.nudge(sink, self.settings.funding.channel_blocks, self.settings.timing.channel_settle)
                        .await;
                }
                Err(e) => {
                    self.summary.channel_failures += 1;
                    sink.error(ErrorKind::ChannelOpen, format!("Channel {}", edge), e).await;
                }
            }
        }

        self.advance(Stage::ChannelsOpened);
    }
}

/// Stops every node and the ledger, then reaps remaining processes.
///
/// Returns the number of stop commands that failed; each failure is logged
/// tagged with [`ErrorKind::Shutdown`].
pub async fn teardown(plane: &ControlPlane, nodes: &[NodeHandle]) -> usize {
    let mut failures = 0;
    for handle in nodes {
        if let Err(e) = handle.control.stop().await {
            warn!("error[{}]: Failed to stop {}: {}", ErrorKind::Shutdown, handle.alias(), e);
            failures += 1;
        }
    }
    if let Err(e) = plane.ledger.stop().await {
        warn!("error[{}]: Failed to stop ledger: {}", ErrorKind::Shutdown, e);
        failures += 1;
    }
    plane.launcher.shutdown().await;
    info!("Teardown finished with {} failed stop commands", failures);
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::memory::{MemoryNetwork, Operation};
    use crate::registry::NodeRegistry;
    use crate::status::{pipeline, StatusLevel, StatusLine};
    use rand::SeedableRng;

    fn setup(nodes: usize, seed: u64) -> (Vec<NodeIdentity>, RunSettings) {
        let mut config = Config::default();
        config.network.nodes = nodes;
        config.network.max_connections_per_node = 2;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let registry = NodeRegistry::from_config(&config, std::path::Path::new("/tmp/lndev"), &mut rng);
        (registry.nodes().to_vec(), RunSettings::from_config(&config))
    }

    async fn run(network: &MemoryNetwork, nodes: Vec<NodeIdentity>, settings: RunSettings) -> (Vec<StatusLine>, RunOutcome) {
        let (sink, done, rx) = pipeline(8);
        let orchestrator = Orchestrator::new(nodes, network.control_plane(), settings, ChaCha8Rng::seed_from_u64(7));
        assert_eq!(orchestrator.stage(), Stage::NotStarted);
        let handle = orchestrator.spawn(sink, done);
        let (lines, outcome) = rx.drain().await;
        handle.await.unwrap();
        (lines, outcome.unwrap())
    }

    #[test]
    fn test_failure_policies() {
        assert_eq!(Stage::LedgerStarted.failure_policy(), Some(FailurePolicy::FatalToRun));
        assert_eq!(Stage::NodesLaunched.failure_policy(), Some(FailurePolicy::RecoverablePerItem));
        assert_eq!(Stage::WalletsCreated.failure_policy(), Some(FailurePolicy::FatalToRun));
        assert_eq!(Stage::PeersConnected.failure_policy(), Some(FailurePolicy::FatalToRun));
        assert_eq!(Stage::NodesFunded.failure_policy(), Some(FailurePolicy::RecoverablePerItem));
        assert_eq!(Stage::ChannelsOpened.failure_policy(), Some(FailurePolicy::RecoverablePerItem));
        assert_eq!(Stage::Complete.failure_policy(), None);
        assert!(Stage::LedgerStarted < Stage::ChannelsOpened);
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_run() {
        let network = MemoryNetwork::new(1);
        let (nodes, settings) = setup(4, 1);
        let (lines, outcome) = run(&network, nodes, settings).await;

        assert_eq!(outcome.stage, Stage::Complete);
        assert!(outcome.failure.is_none());
        assert_eq!(outcome.nodes.len(), 4);
        assert!(!outcome.graph.is_empty());
        assert_eq!(network.connections().len(), outcome.graph.len());
        assert_eq!(network.channels().len(), outcome.graph.len());
        assert_eq!(outcome.summary.funded, 4);
        assert!(lines.iter().all(|l| l.level != StatusLevel::Error));
        assert!(lines.last().unwrap().message.starts_with("Network ready"));

        for channel in network.channels() {
            assert!((100_000..=149_999).contains(&channel.amount));
        }
        for edge in outcome.graph.edges() {
            let target = outcome.nodes.iter().find(|h| h.alias() == edge.target).unwrap();
            assert_eq!(target.identity.remote_identity.as_deref(), outcome.graph.identity(&edge.target));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ledger_launch_failure_is_fatal() {
        let network = MemoryNetwork::new(2);
        network.fail_ledger_launch();
        let (nodes, settings) = setup(3, 2);
        let (lines, outcome) = run(&network, nodes, settings).await;

        assert_eq!(outcome.stage, Stage::Failed);
        assert_eq!(outcome.failure.unwrap().kind, ErrorKind::LedgerLaunch);
        assert!(network.launched().is_empty());
        assert_eq!(lines.last().unwrap().kind, Some(ErrorKind::LedgerLaunch));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unready_ledger_times_out() {
        let network = MemoryNetwork::new(3);
        network.fail_ledger_ready();
        let (nodes, settings) = setup(3, 3);
        let timeout = settings.timing.ledger_ready_timeout;

        let start = tokio::time::Instant::now();
        let (_, outcome) = run(&network, nodes, settings).await;
        assert_eq!(outcome.failure.unwrap().kind, ErrorKind::LedgerNotReady);
        assert!(start.elapsed() >= timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_node_that_never_comes_up_is_dropped() {
        let network = MemoryNetwork::new(4);
        let (nodes, settings) = setup(4, 4);
        let dropped = nodes[2].alias.clone();
        network.fail(&dropped, Operation::Ready);

        let (lines, outcome) = run(&network, nodes, settings).await;

        assert_eq!(outcome.stage, Stage::Complete);
        assert_eq!(outcome.nodes.len(), 3);
        assert!(outcome.nodes.iter().all(|h| h.alias() != dropped));
        assert_eq!(outcome.summary.launch_failures, 1);
        assert!(lines.iter().any(|l| l.kind == Some(ErrorKind::NodeNotReady)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_ledger_pseudo_node_is_not_launched() {
        let network = MemoryNetwork::new(5);
        let (mut nodes, settings) = setup(3, 5);
        nodes.push(NodeIdentity::new(crate::LEDGER_ALIAS, 4, 10000, std::path::Path::new("/tmp/lndev")));

        let (_, outcome) = run(&network, nodes, settings).await;
        assert_eq!(outcome.nodes.len(), 3);
        assert!(!network.launched().iter().any(|a| a == crate::LEDGER_ALIAS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_stops_everything() {
        let network = MemoryNetwork::new(6);
        let (nodes, settings) = setup(3, 6);
        let (_, outcome) = run(&network, nodes, settings).await;

        let failures = teardown(&network.control_plane(), &outcome.nodes).await;
        assert_eq!(failures, 0);
        assert_eq!(network.stopped().len(), 3);
        assert!(!network.is_ledger_running());
    }
}
