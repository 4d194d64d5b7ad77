//! # netclaim
//!
//! **Node Agent for Claim-Based Network Device Attachment**
//!
//! This crate implements the node-resident side of a dynamic network
//! device driver: it publishes the node's allocatable network interfaces,
//! records device allocations as claims are prepared, and physically moves
//! interfaces into workload network namespaces when their sandboxes start.
//! Cluster transports (resource-manager socket, runtime hook socket, API
//! server clients) stay behind traits so the core remains testable without
//! a cluster.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────────┐
//! │                             netclaim                               │
//! ├────────────────────────────────────────────────────────────────────┤
//! │   ResourcePlugin role              SandboxHooks role               │
//! │   prepare / unprepare              sandbox_created / stopped       │
//! │        │        │                       │          │               │
//! │        ▼        ▼                       ▼          ▼               │
//! │  ┌────────────────────────────────────────────────────────────┐    │
//! │  │                     AllocationStore                        │    │
//! │  │   claim uid → allocation      workload uid → allocation    │    │
//! │  └──────────────────────────────────┬─────────────────────────┘    │
//! │                                     │                              │
//! │  ┌──────────────────────────────────▼─────────────────────────┐    │
//! │  │                       DeviceMover                          │    │
//! │  │   down → rename → cross namespace → alias → rename → up    │    │
//! │  │   (rtnetlink on pinned threads, reverse-order rollback)    │    │
//! │  └────────────────────────────────────────────────────────────┘    │
//! ├────────────────────────────────────────────────────────────────────┤
//! │  DeviceWatcher:  enumerate → exclude → attribute → publish         │
//! │  (1 min timer + debounced kernel link events, full-set replace)    │
//! └────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # The Two Lifecycles
//!
//! A claim's node-side life and a workload's sandbox life are driven by
//! different callers over different connections, so the store keeps two
//! independently keyed views of the same allocation:
//!
//! ```text
//!   prepare ──► claim record ──────► unprepare (removes claim record)
//!      │
//!      └─────► workload record ────► sandbox_created (devices move in)
//!                    │
//!                    └─────────────► sandbox_stopped (devices move out,
//!                                    record evicted unconditionally)
//! ```
//!
//! # Key Properties
//!
//! - **Batch isolation**: preparing or unpreparing a batch reports one
//!   outcome per claim; one claim's failure never affects another's.
//! - **Abort on first attach failure**: devices move into a sandbox
//!   sequentially and a failed move aborts the sandbox start; devices
//!   already moved stay where they are for the stop path to reclaim.
//! - **Best-effort reclamation**: stopping a sandbox tries every device
//!   and always evicts the workload record, so a vanished namespace can
//!   never wedge the store.
//! - **Thread-pinned namespace work**: every `setns` happens on a
//!   dedicated scoped thread; no runtime worker ever changes namespace.
//! - **Full-set publication**: the published device inventory is always
//!   replaced wholesale, never patched.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use netclaim::{DriverConfig, Netlink, NetworkDriver, RdmaNetlink};
//!
//! #[tokio::main]
//! async fn main() -> netclaim::Result<()> {
//!     let config = DriverConfig::default().with_node_name("node-1");
//!     let driver = NetworkDriver::new(
//!         config,
//!         claims_client,                  // impl ResourceClaims
//!         Arc::new(Netlink::new()),
//!         Arc::new(RdmaNetlink::new()),
//!     )?;
//!     driver.await_registration(publisher.as_ref()).await?;
//!     // ... wire a DeviceWatcher and serve the protocol roles
//!     Ok(())
//! }
//! ```

pub mod claims;
pub mod config;
pub mod constants;
pub mod discovery;
pub mod driver;
pub mod error;
pub mod netdev;
pub mod prepare;
pub mod sandbox;
pub mod store;
pub mod traits;

// Re-exports
pub use claims::{
    Allocation, ClaimRef, DeviceConfig, DeviceParams, DeviceResult, PreparedClaim, PreparedDevice,
    Reservation, ResourceClaim,
};
pub use config::DriverConfig;
pub use constants::*;
pub use discovery::{is_dns1123_label, AttributeValue, DeviceWatcher, NetworkDevice};
pub use driver::NetworkDriver;
pub use error::{Error, Result};
pub use netdev::{
    spawn_link_monitor, DeviceMove, DeviceMover, HostInventory, LinkEvent, LinkInfo, LinkOps,
    MovedDevice, Netlink, NsContext, RdmaNetlink, RdmaOps, SysfsReader,
};
pub use sandbox::{PodSandbox, SandboxNamespace};
pub use store::AllocationStore;
pub use traits::{
    CloudInterface, CloudMetadata, DevicePublisher, ResourceClaims, ResourcePlugin, SandboxHooks,
};
