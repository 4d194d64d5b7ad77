//! # Netdev Module - Kernel Device Plumbing
//!
//! Everything that touches kernel network devices lives here:
//!
//! - [`ops`]: the kernel device capability traits ([`LinkOps`],
//!   [`HostInventory`], [`RdmaOps`]) and the [`LinkInfo`] snapshot type
//! - [`mover`]: the namespace device-move algorithm with its rollback
//!   discipline
//! - [`netns`]: the pinned-thread namespace switch runner
//! - [`netlink`]: the production capability implementation over synchronous
//!   rtnetlink sockets, plus the link-change monitor
//! - [`sysfs`]: SR-IOV and RDMA companion readers
//! - [`rdma`]: best-effort RDMA companion device moves
//!
//! The mover and the discovery loop depend only on the traits in [`ops`];
//! the concrete kernel plumbing is swapped out wholesale in tests.

pub mod mover;
pub mod netlink;
pub mod netns;
pub mod ops;
pub mod rdma;
pub mod sysfs;

pub use mover::{DeviceMove, DeviceMover, MovedDevice};
pub use netlink::{spawn_link_monitor, Netlink};
pub use ops::{HostInventory, LinkEvent, LinkInfo, LinkOps, NsContext, RdmaOps};
pub use rdma::RdmaNetlink;
pub use sysfs::SysfsReader;
