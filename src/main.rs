use clap::Parser;
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use env_logger::Env;
use log::{info, warn, LevelFilter};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use lndev::agent::{ActivityGenerator, ActivityTask};
use lndev::config::Config;
use lndev::config_loader::{self, CliOverrides};
use lndev::control::cli::BitcoinCli;
use lndev::control::memory::MemoryNetwork;
use lndev::control::rest::RestConnector;
use lndev::control::ControlPlane;
use lndev::orchestrator::{teardown, Orchestrator, RunOutcome, RunSettings, Stage};
use lndev::process::{write_config_files, LocalLauncher};
use lndev::registry::NodeRegistry;
use lndev::status::{self, StatusLevel, StatusLine, StatusUpdate};
use lndev::utils::binary::resolve_binaries;

/// Spin up an ephemeral Lightning regtest network
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of lnd nodes
    #[arg(short, long)]
    nodes: Option<usize>,

    /// Maximum outgoing connections per node
    #[arg(short = 'k', long)]
    max_connections: Option<usize>,

    /// Number of random payments to send once the network is up
    #[arg(short, long)]
    payments: Option<usize>,

    /// Seed for topology, channel amounts and payments
    #[arg(long)]
    seed: Option<u64>,

    /// Directory holding node and ledger data
    #[arg(short, long)]
    workdir: Option<PathBuf>,

    /// Run against an in-memory simulated network instead of real processes
    #[arg(long)]
    dry_run: bool,

    /// Keep the work directory after teardown
    #[arg(long)]
    keep_workdir: bool,

    /// Tear down as soon as setup and activity finish instead of waiting for Ctrl-C
    #[arg(long)]
    no_wait: bool,
}

impl Args {
    fn overrides(&self) -> CliOverrides {
        CliOverrides {
            nodes: self.nodes,
            max_connections: self.max_connections,
            payments: self.payments,
            seed: self.seed,
            workdir: self.workdir.clone(),
            keep_workdir: self.keep_workdir,
        }
    }
}

/// Starts the logger before any configuration is read.
///
/// Records pass through at every level and `log::set_max_level` does the
/// gating, so the configured level can take effect once the config is
/// loaded. Returns whether `RUST_LOG` is set, in which case it wins.
fn init_logging() -> bool {
    let from_env = std::env::var_os("RUST_LOG").is_some();
    env_logger::Builder::from_env(Env::default().default_filter_or("trace")).init();
    if !from_env {
        log::set_max_level(LevelFilter::Info);
    }
    from_env
}

/// Parses `general.log_level`; unknown names keep the current level
fn configured_level(log_level: Option<&str>) -> Option<LevelFilter> {
    let level = log_level?;
    match level.parse::<LevelFilter>() {
        Ok(filter) => Some(filter),
        Err(_) => {
            warn!("Unknown log level '{}', keeping {}", level, log::max_level());
            None
        }
    }
}

/// Wipes and recreates the work directory
fn prepare_workdir(workdir: &Path) -> Result<()> {
    if workdir.exists() {
        info!("Cleaning up previous run in {:?}", workdir);
        fs::remove_dir_all(workdir)
            .wrap_err_with(|| format!("Failed to remove work directory '{}'", workdir.display()))?;
    }
    fs::create_dir_all(workdir)
        .wrap_err_with(|| format!("Failed to create work directory '{}'", workdir.display()))?;
    Ok(())
}

/// Builds the control plane that drives real bitcoind and lnd processes
fn process_plane(config: &Config, registry: &NodeRegistry) -> Result<ControlPlane> {
    let binaries = resolve_binaries(&config.binaries).wrap_err("Required binaries are missing")?;
    info!("Using bitcoind at {:?}", binaries.bitcoind);
    info!("Using lnd at {:?}", binaries.lnd);

    let ledger = BitcoinCli::new(binaries.bitcoin_cli.clone(), registry.ledger_config_path());
    Ok(ControlPlane {
        launcher: Arc::new(LocalLauncher::new(binaries, registry).with_grace(config.timing.shutdown_grace)),
        ledger: Arc::new(ledger),
        connector: Arc::new(RestConnector {
            tls_verify: config.node.tls_verify,
        }),
    })
}

fn print_line(line: &StatusLine) {
    let marker = match line.level {
        StatusLevel::Info => "  ",
        StatusLevel::Success => "ok",
        StatusLevel::Error => "!!",
    };
    println!("[{}] {} {}", line.at.format("%H:%M:%S"), marker, line);
}

/// Drains the status pipeline until the completion signal arrives
async fn observe(mut updates: status::StatusReceiver) -> Result<RunOutcome> {
    while let Some(update) = updates.recv().await {
        match update {
            StatusUpdate::Line(line) => print_line(&line),
            StatusUpdate::Complete(outcome) => return Ok(outcome),
        }
    }
    Err(eyre!("Run ended without a completion signal"))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let args = Args::parse();
    let level_from_env = init_logging();

    let mut config = config_loader::load_or_default(args.config.as_deref())?;
    config_loader::apply_overrides(&mut config, &args.overrides())?;

    if !level_from_env {
        if let Some(level) = configured_level(config.general.log_level.as_deref()) {
            log::set_max_level(level);
        }
    }

    let workdir = config_loader::resolve_workdir(&config.general.workdir)?;
    let seed = config.general.seed.unwrap_or_else(|| rand::thread_rng().gen());
    info!("Run seed: {} (pass --seed {} to reproduce)", seed, seed);

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let activity_rng = ChaCha8Rng::seed_from_u64(rng.gen());
    let registry = NodeRegistry::from_config(&config, &workdir, &mut rng);

    // Missing binaries abort before anything is written or started
    let plane = if args.dry_run {
        info!("Dry run: using an in-memory simulated network");
        MemoryNetwork::new(seed).control_plane()
    } else {
        process_plane(&config, &registry)?
    };

    prepare_workdir(&workdir)?;
    write_config_files(&registry, &config)?;
    let registry_file = registry.write_registry(&config.binaries.bitcoin_cli)?;
    info!("Node registry written to {:?}", registry_file);

    let (sink, done, updates) = status::pipeline(status::DEFAULT_CAPACITY);
    let run = Orchestrator::new(
        registry.nodes().to_vec(),
        plane.clone(),
        RunSettings::from_config(&config),
        rng,
    )
    .spawn(sink, done);

    let outcome = observe(updates).await?;
    run.await.wrap_err("Orchestrator task failed")?;

    info!(
        "Run finished in stage {}: {} nodes, {} connections, {} channels",
        outcome.stage,
        outcome.nodes.len(),
        outcome.graph.len(),
        outcome.summary.channels_opened
    );

    let mut interrupted = false;
    if outcome.is_complete() && config.activity.payments > 0 {
        match ActivityTask::from_outcome(&outcome, config.activity.payments) {
            Ok(task) => {
                info!("Stage: {}", Stage::ActivityRunning);
                let mut activity = ActivityGenerator::new(task, &config.activity, activity_rng).spawn();
                tokio::select! {
                    report = &mut activity => {
                        let report = report.wrap_err("Activity task failed")?;
                        println!(
                            "Activity: {} attempted, {} settled, {} skipped",
                            report.attempted,
                            report.settled,
                            report.skipped()
                        );
                    }
                    _ = tokio::signal::ctrl_c() => {
                        warn!("Interrupted, stopping activity");
                        activity.abort();
                        interrupted = true;
                    }
                }
            }
            Err(e) => warn!("Skipping activity: {}", e),
        }
    }

    if outcome.is_complete() && !args.no_wait && !interrupted {
        println!("Network is up. Node registry: {}", registry_file.display());
        println!("Press Ctrl-C to tear it down.");
        tokio::signal::ctrl_c()
            .await
            .wrap_err("Failed to listen for Ctrl-C")?;
    }

    info!("Tearing down");
    teardown(&plane, &outcome.nodes).await;

    if config.general.keep_workdir {
        info!("Keeping work directory {:?}", workdir);
    } else {
        fs::remove_dir_all(&workdir)
            .wrap_err_with(|| format!("Failed to remove work directory '{}'", workdir.display()))?;
    }

    match outcome.failure {
        Some(failure) => Err(eyre!(failure)),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let args = Args::parse_from(["lndev"]);

        assert!(args.config.is_none());
        assert!(args.nodes.is_none());
        assert!(!args.dry_run);
        assert!(!args.no_wait);
    }

    #[test]
    fn test_cli_overrides() {
        let args = Args::parse_from([
            "lndev",
            "--config", "net.yaml",
            "--nodes", "6",
            "-k", "3",
            "--payments", "50",
            "--seed", "42",
            "--workdir", "/tmp/net",
            "--dry-run",
            "--keep-workdir",
        ]);

        assert_eq!(args.config, Some(PathBuf::from("net.yaml")));
        assert!(args.dry_run);
        let overrides = args.overrides();
        assert_eq!(overrides.nodes, Some(6));
        assert_eq!(overrides.max_connections, Some(3));
        assert_eq!(overrides.payments, Some(50));
        assert_eq!(overrides.seed, Some(42));
        assert_eq!(overrides.workdir, Some(PathBuf::from("/tmp/net")));
        assert!(overrides.keep_workdir);
    }

    #[test]
    fn test_configured_level() {
        assert_eq!(configured_level(None), None);
        assert_eq!(configured_level(Some("debug")), Some(LevelFilter::Debug));
        assert_eq!(configured_level(Some("WARN")), Some(LevelFilter::Warn));
        assert_eq!(configured_level(Some("chatty")), None);
    }

    #[test]
    fn test_prepare_workdir_wipes_previous_run() {
        let dir = tempfile::tempdir().unwrap();
        let workdir = dir.path().join("net");
        fs::create_dir_all(workdir.join("user1")).unwrap();
        fs::write(workdir.join("user1/lnd.conf"), "stale").unwrap();

        prepare_workdir(&workdir).unwrap();
        assert!(workdir.is_dir());
        assert!(!workdir.join("user1").exists());
    }
}
