//! Driver configuration.

use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{
    DEFAULT_DRIVER_NAME, LINK_EVENT_DEBOUNCE, PUBLISH_INTERVAL, REGISTRATION_POLL_INTERVAL,
    REGISTRATION_TIMEOUT, SYSFS_NET_ROOT,
};
use crate::error::{Error, Result};

/// Configuration for a driver instance.
///
/// Timing knobs default to the values in [`crate::constants`]; deployments
/// normally override only `driver_name` and `node_name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverConfig {
    /// Driver name matched against allocation configuration blobs.
    pub driver_name: String,

    /// Name of the node this agent runs on, as known to the orchestrator.
    pub node_name: String,

    /// Period of the discovery republish timer.
    pub publish_interval: Duration,

    /// Debounce window applied after a link-change notification.
    pub link_event_debounce: Duration,

    /// Interval between registration-status polls at startup.
    pub registration_poll_interval: Duration,

    /// Bound on waiting for registration before startup fails.
    pub registration_timeout: Duration,

    /// Root of the per-interface sysfs tree.
    pub sysfs_root: PathBuf,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            driver_name: DEFAULT_DRIVER_NAME.to_string(),
            node_name: String::new(),
            publish_interval: PUBLISH_INTERVAL,
            link_event_debounce: LINK_EVENT_DEBOUNCE,
            registration_poll_interval: REGISTRATION_POLL_INTERVAL,
            registration_timeout: REGISTRATION_TIMEOUT,
            sysfs_root: PathBuf::from(SYSFS_NET_ROOT),
        }
    }
}

impl DriverConfig {
    /// Sets the driver name.
    #[must_use]
    pub fn with_driver_name(mut self, name: impl Into<String>) -> Self {
        self.driver_name = name.into();
        self
    }

    /// Sets the node name.
    #[must_use]
    pub fn with_node_name(mut self, name: impl Into<String>) -> Self {
        self.node_name = name.into();
        self
    }

    /// Sets the discovery republish period.
    #[must_use]
    pub fn with_publish_interval(mut self, interval: Duration) -> Self {
        self.publish_interval = interval;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when the driver name is empty or a
    /// timing knob is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.driver_name.is_empty() {
            return Err(Error::InvalidConfig("driver_name must not be empty".into()));
        }
        if self.publish_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "publish_interval must be non-zero".into(),
            ));
        }
        if self.registration_poll_interval.is_zero()
            || self.registration_poll_interval > self.registration_timeout
        {
            return Err(Error::InvalidConfig(
                "registration_poll_interval must be non-zero and within registration_timeout"
                    .into(),
            ));
        }
        Ok(())
    }
}
