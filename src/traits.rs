//! Seams between the driver core and the cluster-facing machinery.
//!
//! The driver core never talks to an API server, a kubelet socket, or a
//! metadata endpoint directly. Those concerns sit behind the traits in
//! this module so the protocol logic stays testable with in-memory
//! implementations, and so transports can be swapped without touching
//! claim or sandbox semantics.
//!
//! Two of these traits are protocol roles served by the driver itself
//! ([`ResourcePlugin`] and [`SandboxHooks`]); the rest are collaborators
//! the driver consumes.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::claims::{ClaimRef, PreparedClaim, ResourceClaim};
use crate::discovery::NetworkDevice;
use crate::error::Result;
use crate::sandbox::PodSandbox;

// ============================================================================
// Protocol roles
// ============================================================================

/// Node-side resource plugin: prepares and unprepares device claims.
///
/// Both operations take a batch and isolate claims from each other: the
/// returned map carries one entry per requested claim uid, successful or
/// failed, and a failure never aborts the rest of the batch.
#[async_trait]
pub trait ResourcePlugin: Send + Sync {
    /// Prepares a batch of claims for use on this node.
    ///
    /// # Arguments
    ///
    /// * `claims` - References to the claims to prepare
    ///
    /// Returns per-claim outcomes keyed by claim uid. A successful entry
    /// lists the devices the workload may use.
    async fn prepare(&self, claims: &[ClaimRef]) -> HashMap<String, Result<PreparedClaim>>;

    /// Releases the node-side records for a batch of claims.
    ///
    /// # Arguments
    ///
    /// * `claims` - References to the claims to unprepare
    ///
    /// Unknown claims succeed; unpreparing is idempotent.
    async fn unprepare(&self, claims: &[ClaimRef]) -> HashMap<String, Result<()>>;
}

/// Hooks invoked on pod sandbox lifecycle transitions.
#[async_trait]
pub trait SandboxHooks: Send + Sync {
    /// Called after a sandbox has been created and its namespaces exist.
    ///
    /// # Arguments
    ///
    /// * `sandbox` - The sandbox that was created, including its namespace list
    async fn sandbox_created(&self, sandbox: &PodSandbox) -> Result<()>;

    /// Called when a sandbox is being stopped.
    ///
    /// # Arguments
    ///
    /// * `sandbox` - The sandbox being stopped
    async fn sandbox_stopped(&self, sandbox: &PodSandbox) -> Result<()>;
}

// ============================================================================
// Collaborators
// ============================================================================

/// Read access to resource claims in the cluster.
#[async_trait]
pub trait ResourceClaims: Send + Sync {
    /// Fetches a claim by namespace and name.
    ///
    /// Implementations report transport failures as
    /// [`Error::ClaimFetch`](crate::error::Error::ClaimFetch).
    async fn get(&self, namespace: &str, name: &str) -> Result<ResourceClaim>;
}

/// Sink for the node's published device inventory.
#[async_trait]
pub trait DevicePublisher: Send + Sync {
    /// Replaces the published device set with `devices`.
    ///
    /// Each call carries the complete inventory; consumers never see a
    /// partial update.
    async fn publish(&self, devices: Vec<NetworkDevice>) -> Result<()>;

    /// Whether the publisher has completed its registration handshake.
    fn registered(&self) -> bool;
}

/// One interface as reported by the cloud provider metadata service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudInterface {
    /// Primary IPv4 address.
    #[serde(default)]
    pub ip: String,
    /// IPv6 addresses, if any.
    #[serde(default)]
    pub ipv6: Vec<String>,
    /// Hardware address, used to correlate with local interfaces.
    pub mac: String,
    #[serde(default)]
    pub mtu: u32,
    /// Provider network the interface is attached to.
    #[serde(default)]
    pub network: String,
}

/// Cloud provider metadata about this node's interfaces.
///
/// Absence of a provider is not an error; the discovery loop treats an
/// empty answer as "no metadata".
#[async_trait]
pub trait CloudMetadata: Send + Sync {
    /// Returns provider metadata for the node's interfaces.
    async fn interfaces(&self) -> Vec<CloudInterface>;
}
