//! netclaimd - Network Device Observation Daemon
//!
//! Runs the discovery half of the agent against the real host: enumerates
//! network interfaces over rtnetlink, watches for link changes, and writes
//! every published device set to stdout as one JSON line per publication.
//!
//! No control plane is involved. The stdout publisher stands in for the
//! resource slice transport, which makes this binary useful for checking
//! what a node would advertise before wiring the agent into a cluster:
//!
//! ```sh
//! netclaimd | jq .
//! netclaimd --sysfs-root ./fake-sys --publish-interval 5
//! ```
//!
//! Logs go to stderr so the stdout stream stays machine-readable.

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use netclaim::{
    spawn_link_monitor, CloudInterface, CloudMetadata, DevicePublisher, DeviceWatcher,
    DriverConfig, Error, Netlink, NetworkDevice, RdmaNetlink, Result, SysfsReader,
    DEFAULT_DRIVER_NAME, LINK_EVENT_CHANNEL_CAPACITY, PUBLISH_INTERVAL, SYSFS_NET_ROOT,
};

// =============================================================================
// CLI Parsing
// =============================================================================

#[derive(Parser, Debug)]
#[command(
    name = "netclaimd",
    version,
    about = "Observe the network devices this node would publish"
)]
struct Cli {
    /// Driver name reported alongside the published devices.
    #[arg(long, default_value = DEFAULT_DRIVER_NAME)]
    driver_name: String,

    /// Node name reported alongside the published devices. Defaults to the
    /// hostname when unset.
    #[arg(long, env = "NODE_NAME")]
    node_name: Option<String>,

    /// Seconds between full republications.
    #[arg(long, default_value_t = PUBLISH_INTERVAL.as_secs())]
    publish_interval: u64,

    /// Root of the sysfs network class tree. Point at a fake tree to
    /// exercise the SR-IOV and RDMA attributes without hardware.
    #[arg(long, default_value = SYSFS_NET_ROOT)]
    sysfs_root: PathBuf,
}

/// Falls back to the kernel hostname the way kubelet does when no node
/// name override is configured.
fn default_node_name() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| String::from("localhost"))
}

// =============================================================================
// Observe-Mode Collaborators
// =============================================================================

/// Publisher that prints each device set as one JSON line on stdout.
///
/// One line per publication keeps the full-set replacement semantics
/// visible: every line is a complete snapshot, never a delta.
struct StdoutPublisher;

#[async_trait]
impl DevicePublisher for StdoutPublisher {
    async fn publish(&self, devices: Vec<NetworkDevice>) -> Result<()> {
        let line =
            serde_json::to_string(&devices).map_err(|e| Error::Serialization(e.to_string()))?;
        let mut out = std::io::stdout().lock();
        writeln!(out, "{line}")?;
        out.flush()?;
        debug!(devices = devices.len(), "Wrote device snapshot to stdout");
        Ok(())
    }

    fn registered(&self) -> bool {
        true
    }
}

/// No cloud provider: every interface is reported without provider
/// network metadata.
struct NoCloudMetadata;

#[async_trait]
impl CloudMetadata for NoCloudMetadata {
    async fn interfaces(&self) -> Vec<CloudInterface> {
        Vec::new()
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .finish();

    if tracing::subscriber::set_global_default(subscriber).is_err() {
        eprintln!("Failed to set tracing subscriber");
        return ExitCode::FAILURE;
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "netclaimd failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let node_name = cli.node_name.unwrap_or_else(default_node_name);

    let mut config = DriverConfig::default()
        .with_driver_name(cli.driver_name)
        .with_node_name(node_name)
        .with_publish_interval(Duration::from_secs(cli.publish_interval));
    config.sysfs_root = cli.sysfs_root;
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        driver = %config.driver_name,
        node = %config.node_name,
        interval_secs = config.publish_interval.as_secs(),
        "netclaimd starting in observe mode"
    );

    let (event_tx, event_rx) = mpsc::channel(LINK_EVENT_CHANNEL_CAPACITY);
    spawn_link_monitor(event_tx)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let sysfs = SysfsReader::with_root(&config.sysfs_root);
    let watcher = DeviceWatcher::new(
        config,
        Arc::new(Netlink::new()),
        sysfs.clone(),
        Arc::new(RdmaNetlink::with_sysfs(sysfs)),
        Arc::new(NoCloudMetadata),
        Arc::new(StdoutPublisher),
        event_rx,
        shutdown_rx,
    );
    let mut task = tokio::spawn(watcher.run());

    tokio::select! {
        // The watcher only returns on its own when the link event stream
        // closes underneath it.
        result = &mut task => {
            result.map_err(|e| Error::Internal(format!("device watcher task failed: {e}")))??;
            warn!("Device watcher stopped before shutdown was requested");
            return Ok(());
        }

        // Ctrl-C requests an orderly stop. Flip the shutdown flag and let
        // the watcher observe it at the top of its next turn.
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutdown signal received, stopping device discovery");
        }
    }

    let _ = shutdown_tx.send(true);
    task.await
        .map_err(|e| Error::Internal(format!("device watcher task failed: {e}")))??;

    info!("netclaimd stopped");
    Ok(())
}
