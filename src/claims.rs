//! Claim and allocation data model.
//!
//! These types mirror the orchestrator's view of a resource claim as far as
//! this driver consumes it: the allocation result binding devices to the
//! claim's requests, the driver-targeted opaque configuration blobs, and the
//! reservation list of workloads holding the claim. Transport collaborators
//! (see [`crate::traits::ResourceClaims`]) construct them from whatever wire
//! encoding they speak; everything here is transport-neutral.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Reference to a claim as supplied by the resource-manager protocol.
///
/// Carries the identity the caller believes in; [`ResourceClaim::uid`] of the
/// fetched object is checked against [`ClaimRef::uid`] to detect a claim that
/// was deleted and recreated under the same name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRef {
    /// Unique identifier of the claim object.
    pub uid: String,
    /// Namespace the claim lives in.
    pub namespace: String,
    /// Claim name within the namespace.
    pub name: String,
}

impl ClaimRef {
    pub fn new(
        uid: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            uid: uid.into(),
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

/// A claim object as fetched from the orchestrator's authoritative store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceClaim {
    pub uid: String,
    pub namespace: String,
    pub name: String,
    /// Allocation result, present once the orchestrator has allocated the
    /// claim. Prepare on a claim without it is a caller contract violation.
    #[serde(default)]
    pub allocation: Option<Allocation>,
    /// Workloads currently holding the claim.
    #[serde(default)]
    pub reserved_for: Vec<Reservation>,
}

/// The orchestrator's decision binding specific devices to a claim.
///
/// Immutable once stored; the store hands out clones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Allocation {
    /// Ordered device results, one per satisfied request.
    #[serde(default)]
    pub results: Vec<DeviceResult>,
    /// Ordered opaque configuration blobs, each tagged with the driver that
    /// must consume it and an optional request restriction.
    #[serde(default)]
    pub configs: Vec<DeviceConfig>,
}

/// One allocated device: which pool it came from, its device identifier, and
/// the request it satisfies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceResult {
    pub request: String,
    pub pool: String,
    pub device: String,
}

/// An opaque per-device configuration blob.
///
/// `requests` empty means the blob applies to every request in the claim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Driver name that must consume this blob.
    pub driver: String,
    /// Request names this blob restricts to; empty = unrestricted.
    #[serde(default)]
    pub requests: Vec<String>,
    /// Driver-defined parameters, parsed lazily by the consumer.
    #[serde(default)]
    pub parameters: serde_json::Value,
}

impl DeviceConfig {
    /// Whether this blob applies to the given request name.
    pub fn covers(&self, request: &str) -> bool {
        self.requests.is_empty() || self.requests.iter().any(|r| r == request)
    }
}

/// A workload (or other consumer) holding the claim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Consumer kind; only `"pods"` reservations map to sandbox lifecycles.
    pub resource: String,
    /// API group of the consumer kind; empty for the core workload type.
    #[serde(default)]
    pub api_group: String,
    pub name: String,
    pub uid: String,
}

impl Reservation {
    /// Whether this reservation names a workload whose sandbox lifecycle we
    /// coordinate. Anything else is logged and skipped by prepare.
    pub fn is_workload(&self) -> bool {
        self.resource == "pods" && self.api_group.is_empty()
    }
}

/// Parameters this driver understands inside an opaque configuration blob.
///
/// All fields are optional; an absent field means "leave as is". `address`
/// and `prefix` describe a single static address carried verbatim from the
/// claim — there is no address management behind this.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceParams {
    /// Interface name to use inside the workload namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Static address to assign after the move.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<IpAddr>,
    /// Prefix length for `address`; defaults by address family when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<u8>,
    /// MTU to set after the move.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtu: Option<u32>,
}

impl DeviceParams {
    /// Parses parameters out of an opaque blob's JSON value.
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone()).map_err(|e| Error::Serialization(e.to_string()))
    }

    /// Prefix length to use with `address`, falling back to the host-route
    /// length for the address family.
    pub fn effective_prefix(&self) -> Option<u8> {
        let address = self.address?;
        Some(self.prefix.unwrap_or(match address {
            IpAddr::V4(_) => 32,
            IpAddr::V6(_) => 128,
        }))
    }
}

impl Allocation {
    /// Configuration blobs addressed to `driver` that cover `request`, in
    /// stored order.
    pub fn configs_for<'a>(
        &'a self,
        driver: &'a str,
        request: &'a str,
    ) -> impl Iterator<Item = &'a DeviceConfig> {
        self.configs
            .iter()
            .filter(move |c| c.driver == driver && c.covers(request))
    }

    /// Whether a result from `request` is admitted for `driver`.
    ///
    /// A result is admitted unless at least one blob names the driver and
    /// none of the driver's blobs covers the request: restriction lists only
    /// exclude once the driver has expressed any interest at all.
    pub fn admits(&self, driver: &str, request: &str) -> bool {
        let mut ours = self.configs.iter().filter(|c| c.driver == driver);
        let any_ours = ours.clone().next().is_some();
        !any_ours || ours.any(|c| c.covers(request))
    }

    /// Parsed driver parameters for a result, taking the first covering blob
    /// addressed to `driver`. Absent blobs yield defaults.
    pub fn params_for(&self, driver: &str, request: &str) -> Result<DeviceParams> {
        match self.configs_for(driver, request).next() {
            Some(config) => DeviceParams::from_value(&config.parameters),
            None => Ok(DeviceParams::default()),
        }
    }
}

/// Devices reported back to the resource manager for one prepared claim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedClaim {
    pub devices: Vec<PreparedDevice>,
}

/// One prepared device in a prepare response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreparedDevice {
    pub pool: String,
    pub device: String,
    /// Requests this device satisfies.
    #[serde(default)]
    pub requests: Vec<String>,
}
