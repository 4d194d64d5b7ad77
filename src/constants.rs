//! # Network Driver Constants
//!
//! Defines the timing, naming, and buffer constants for the driver. These
//! constants are the **single source of truth** for protocol timing and
//! kernel-facing conventions throughout the codebase.
//!
//! ## Timing Model
//!
//! Discovery republishes on a coarse timer ([`PUBLISH_INTERVAL`]) and on
//! kernel link-change notifications, which are debounced by
//! [`LINK_EVENT_DEBOUNCE`] so a burst of events (interface flaps, driver
//! resets) produces one recomputation instead of one per event.
//!
//! ## Cross-References
//!
//! - [`crate::discovery`]: Uses the publish/debounce timing
//! - [`crate::driver`]: Uses the registration polling bounds
//! - [`crate::netdev`]: Uses the temporary-name prefix and sysfs root

use std::time::Duration;

// =============================================================================
// Identity
// =============================================================================

/// Default driver name used to match allocation results and device
/// configuration blobs against this driver.
///
/// Must be a valid orchestrator driver identifier (DNS-subdomain syntax);
/// deployments override it via configuration when running multiple driver
/// instances side by side.
pub const DEFAULT_DRIVER_NAME: &str = "netclaim.networking.k8s.io";

// =============================================================================
// Device Moves
// =============================================================================

/// Prefix for the temporary interface name used while a device migrates
/// between namespaces.
///
/// The full temporary name is this prefix plus the interface's kernel index
/// (`temp_4`). The kernel index is unique per namespace at any instant, so
/// the name cannot collide with another in-flight migration without needing
/// a global lock. The prefix deliberately fails DNS-label validation so a
/// half-migrated device is never re-published as an allocatable resource.
pub const TEMP_NAME_PREFIX: &str = "temp_";

/// Path of the calling thread's own network namespace.
///
/// Opened before a namespace switch so the thread can switch back, and used
/// as the file-descriptor target when moving a device back to the root
/// namespace during rollback.
pub const SELF_NETNS_PATH: &str = "/proc/self/ns/net";

// =============================================================================
// Discovery Timing
// =============================================================================

/// Period of the coarse discovery republish timer (1 minute).
///
/// Publishing is an idempotent full-set replace, so the timer only bounds
/// how stale the published set can get when no link events arrive (e.g.
/// attribute-only changes that do not generate notifications).
pub const PUBLISH_INTERVAL: Duration = Duration::from_secs(60);

/// Debounce window applied after a link-change notification (2 seconds).
///
/// Interface creation typically produces several netlink events back to back
/// (carrier, state, address); waiting out the window and draining the queue
/// collapses them into a single enumeration pass.
pub const LINK_EVENT_DEBOUNCE: Duration = Duration::from_secs(2);

/// Capacity of the link-event channel between the kernel notification
/// reader and the discovery loop.
///
/// Events carry no payload the loop acts on individually, so a small bound
/// suffices; a full channel drops events, which is harmless because any
/// retained event already forces a full recomputation.
pub const LINK_EVENT_CHANNEL_CAPACITY: usize = 16;

// =============================================================================
// Registration
// =============================================================================

/// Interval between registration-status polls during startup (1 second).
pub const REGISTRATION_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Upper bound on waiting for the orchestrator to acknowledge plugin
/// registration (30 seconds).
///
/// Publishing before registration completes would be silently dropped by
/// the orchestrator, so startup fails loudly instead when this elapses.
pub const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Kernel Interfaces
// =============================================================================

/// Root of the kernel's per-interface sysfs tree.
///
/// SR-IOV virtual-function counts and RDMA companion devices are read from
/// `<root>/<ifname>/device/...`; tests substitute a temporary directory.
pub const SYSFS_NET_ROOT: &str = "/sys/class/net";

/// Receive buffer size for rtnetlink sockets (64 KiB).
///
/// Large enough for a full link-dump datagram on hosts with hundreds of
/// interfaces; a truncated recv surfaces as a decode error, not silent loss.
pub const NETLINK_RECV_BUFFER: usize = 64 * 1024;
