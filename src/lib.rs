//! # lndev - Ephemeral Lightning regtest networks
//!
//! This library provisions a throwaway payment-channel network for testing:
//! one bitcoind regtest ledger and several lnd nodes, wired into a random
//! peer topology, funded, connected by channels and optionally exercised with
//! synthetic payment traffic.
//!
//! ## Overview
//!
//! A run goes through a fixed sequence of stages, driven by the
//! [`orchestrator::Orchestrator`]:
//!
//! 1. start the ledger and wait until it answers RPC calls
//! 2. launch every node, staggered, and wait until each is reachable
//! 3. create every node's wallet
//! 4. build a random topology and perform the peer handshakes
//! 5. fund every node from the ledger
//! 6. open a channel along every realized connection
//!
//! Progress streams to a single observer through the [`status`] pipeline.
//! Once the run completes, the [`agent`] module can drive random payments
//! across the surviving node pool.
//!
//! ## Architecture
//!
//! - `config`: Typed configuration structures and validation
//! - `config_loader`: Configuration file loading and CLI overrides
//! - `registry`: Node identities, aliases, port layout, registry file
//! - `process`: Config file rendering and local process launching
//! - `control`: Control-plane traits, lnd REST and bitcoin-cli clients, in-memory network
//! - `status`: Progress line stream plus one-shot completion signal
//! - `topology`: Random topology builder and connection graph
//! - `agent`: Synthetic payment activity
//! - `orchestrator`: The staged provisioning pipeline and teardown
//! - `utils`: Binary resolution and option helpers
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use lndev::control::memory::MemoryNetwork;
//! use lndev::orchestrator::{Orchestrator, RunSettings};
//! use lndev::registry::NodeRegistry;
//! use lndev::{config::Config, status};
//! use rand::SeedableRng;
//! use rand_chacha::ChaCha8Rng;
//!
//! # async fn demo() {
//! let config = Config::default();
//! let mut rng = ChaCha8Rng::seed_from_u64(42);
//! let registry = NodeRegistry::from_config(&config, std::path::Path::new("/tmp/lndev"), &mut rng);
//!
//! let network = MemoryNetwork::new(42);
//! let (sink, done, mut updates) = status::pipeline(status::DEFAULT_CAPACITY);
//! Orchestrator::new(
//!     registry.nodes().to_vec(),
//!     network.control_plane(),
//!     RunSettings::from_config(&config),
//!     rng,
//! )
//! .spawn(sink, done);
//!
//! while let Some(update) = updates.recv().await {
//!     println!("{:?}", update);
//! }
//! # }
//! ```
//!
//! ## Configuration Format
//!
//! ```yaml
//! general:
//!   workdir: "~/.lndev"
//!   seed: 42
//!
//! network:
//!   nodes: 5
//!   max_connections_per_node: 2
//!
//! binaries:
//!   lnd: "~/go/bin/lnd"
//!
//! activity:
//!   payments: 100
//!   interval: "2s"
//! ```
//!
//! ## Error Handling
//!
//! Application-level functions return `color_eyre::Result` with context.
//! Control-plane operations return [`control::ControlError`], and every
//! failure reported on the status pipeline carries a [`control::ErrorKind`].

pub mod agent;
pub mod config;
pub mod config_loader;
pub mod control;
pub mod orchestrator;
pub mod process;
pub mod registry;
pub mod status;
pub mod topology;
pub mod utils;

/// First port of the per-node port layout
pub const BASE_PORT: u16 = 10000;

/// Offset of the P2P listen ports from the RPC ports
pub const LISTEN_PORT_OFFSET: u16 = 1000;

/// Offset of the REST ports from the RPC ports
pub const REST_PORT_OFFSET: u16 = 2000;

/// Reserved alias of the ledger-control pseudo-node in the registry file
pub const LEDGER_ALIAS: &str = "Regtest";
