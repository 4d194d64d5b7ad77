//! Driver instance wiring.
//!
//! [`NetworkDriver`] owns the allocation store and the collaborators the
//! protocol handlers need. The handlers themselves live next to the
//! protocols they serve: claim preparation in [`crate::prepare`], sandbox
//! lifecycle in [`crate::sandbox`].

use std::sync::Arc;

use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::config::DriverConfig;
use crate::error::{Error, Result};
use crate::netdev::{DeviceMover, LinkOps, RdmaOps};
use crate::store::AllocationStore;
use crate::traits::{DevicePublisher, ResourceClaims};

/// Node-resident driver state shared by both protocol roles.
///
/// One instance serves a node; it is cheap to share behind an [`Arc`] and
/// all methods take `&self`.
pub struct NetworkDriver {
    pub(crate) config: DriverConfig,
    pub(crate) store: AllocationStore,
    pub(crate) claims: Arc<dyn ResourceClaims>,
    pub(crate) mover: DeviceMover,
    pub(crate) rdma: Arc<dyn RdmaOps>,
}

impl NetworkDriver {
    /// Creates a driver instance.
    ///
    /// # Arguments
    ///
    /// * `config` - Driver configuration, validated here
    /// * `claims` - Read access to the orchestrator's claim objects
    /// * `link` - Kernel link operations backend
    /// * `rdma` - RDMA companion device operations backend
    pub fn new(
        config: DriverConfig,
        claims: Arc<dyn ResourceClaims>,
        link: Arc<dyn LinkOps>,
        rdma: Arc<dyn RdmaOps>,
    ) -> Result<Self> {
        config.validate()?;
        info!(driver = %config.driver_name, node = %config.node_name, "Creating network driver");
        Ok(Self {
            config,
            store: AllocationStore::new(),
            claims,
            mover: DeviceMover::new(link),
            rdma,
        })
    }

    /// The allocation store backing both protocol roles.
    pub fn store(&self) -> &AllocationStore {
        &self.store
    }

    /// The active configuration.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// Waits until the publisher reports a completed registration handshake.
    ///
    /// Polls at the configured interval; gives up with [`Error::Timeout`]
    /// after the configured bound. Publishing before registration completes
    /// is dropped upstream, so callers run this before starting discovery.
    pub async fn await_registration(&self, publisher: &dyn DevicePublisher) -> Result<()> {
        let deadline = Instant::now() + self.config.registration_timeout;
        loop {
            if publisher.registered() {
                debug!(driver = %self.config.driver_name, "Plugin registration acknowledged");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout {
                    operation: "plugin registration".to_string(),
                    duration: self.config.registration_timeout,
                });
            }
            sleep(self.config.registration_poll_interval).await;
        }
    }
}
