//! RDMA companion device moves over the nldev netlink family.
//!
//! RDMA devices (`mlx5_0`, ...) live in their own namespace-aware registry
//! and do not follow their network interface through a namespace move; the
//! kernel exposes them over `NETLINK_RDMA` instead of rtnetlink. The
//! message family is small enough that the frames are built by hand here:
//! a 16-byte netlink header followed by type-length-value attributes.
//!
//! Callers treat every operation in this module as best effort.

use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

use netlink_packet_core::{NLM_F_ACK, NLM_F_DUMP, NLM_F_REQUEST};
use netlink_sys::{protocols::NETLINK_RDMA, Socket, SocketAddr};

use crate::constants::NETLINK_RECV_BUFFER;
use crate::error::{Error, Result};
use crate::netdev::netns::with_netns;
use crate::netdev::ops::RdmaOps;
use crate::netdev::sysfs::SysfsReader;

/// nldev client id; message types are `(client << 10) | command`.
const RDMA_NL_NLDEV: u16 = 5;
const RDMA_NLDEV_CMD_GET: u16 = 1;
const RDMA_NLDEV_CMD_SET: u16 = 2;

const RDMA_NLDEV_ATTR_DEV_INDEX: u16 = 1;
const RDMA_NLDEV_ATTR_DEV_NAME: u16 = 2;
const RDMA_NLDEV_NET_NS_FD: u16 = 98;

const NLMSG_ERROR: u16 = 2;
const NLMSG_DONE: u16 = 3;

/// Production [`RdmaOps`] backend: sysfs for interface association, nldev
/// netlink for namespace moves.
#[derive(Debug, Clone)]
pub struct RdmaNetlink {
    sysfs: SysfsReader,
}

impl Default for RdmaNetlink {
    fn default() -> Self {
        Self::new()
    }
}

impl RdmaNetlink {
    pub fn new() -> Self {
        Self {
            sysfs: SysfsReader::new(),
        }
    }

    /// Uses a non-default sysfs tree for the interface association lookup.
    pub fn with_sysfs(sysfs: SysfsReader) -> Self {
        Self { sysfs }
    }
}

impl RdmaOps for RdmaNetlink {
    fn device_for(&self, ifname: &str) -> Option<String> {
        self.sysfs.rdma_device(ifname)
    }

    fn move_to(&self, device: &str, ns: &Path) -> Result<()> {
        let target = File::open(ns).map_err(|e| Error::NamespaceSwitchFailed {
            path: ns.to_path_buf(),
            reason: e.to_string(),
        })?;
        move_device(device, target.as_raw_fd())
    }

    fn move_back(&self, device: &str, ns: &Path) -> Result<()> {
        // The device registry is namespaced too, so the lookup and the set
        // both have to run inside the namespace the device is in.
        with_netns(ns, |root_ns| move_device(device, root_ns.as_raw_fd()))
    }
}

/// Resolves `device` in the calling thread's namespace and retargets it at
/// the namespace behind `target_fd`.
fn move_device(device: &str, target_fd: RawFd) -> Result<()> {
    let mut socket = RdmaSocket::connect()?;
    let index = socket
        .device_index(device)
        .map_err(|e| Error::link_op("enumerate rdma devices for", device, e))?
        .ok_or_else(|| Error::LinkNotFound(device.to_string()))?;
    socket
        .set_netns(index, target_fd)
        .map_err(|e| Error::link_op("move rdma device", device, e))
}

struct RdmaSocket {
    socket: Socket,
    sequence: u32,
}

impl RdmaSocket {
    fn connect() -> Result<Self> {
        let mut socket = Socket::new(NETLINK_RDMA)?;
        socket.bind_auto()?;
        socket.connect(&SocketAddr::new(0, 0))?;
        Ok(Self {
            socket,
            sequence: 0,
        })
    }

    /// Looks up a device's nldev index by name via a device dump.
    fn device_index(&mut self, name: &str) -> io::Result<Option<u32>> {
        let responses = self.request(RDMA_NLDEV_CMD_GET, NLM_F_DUMP, &[])?;
        for payload in responses {
            let (index, dev_name) = parse_device_attrs(&payload);
            if dev_name.as_deref() == Some(name) {
                return Ok(index);
            }
        }
        Ok(None)
    }

    /// Moves a device into the namespace behind `fd`.
    fn set_netns(&mut self, index: u32, fd: RawFd) -> io::Result<()> {
        let mut attrs = Vec::with_capacity(16);
        push_u32_attr(&mut attrs, RDMA_NLDEV_ATTR_DEV_INDEX, index);
        push_u32_attr(&mut attrs, RDMA_NLDEV_NET_NS_FD, fd as u32);
        self.request(RDMA_NLDEV_CMD_SET, 0, &attrs).map(|_| ())
    }

    /// Sends one nldev request and collects the attribute payload of every
    /// data message, ending on the ack, done marker, or error.
    fn request(&mut self, command: u16, extra_flags: u16, attrs: &[u8]) -> io::Result<Vec<Vec<u8>>> {
        self.sequence += 1;
        let message_type = (RDMA_NL_NLDEV << 10) | command;
        let flags = NLM_F_REQUEST | NLM_F_ACK | extra_flags;

        let mut frame = Vec::with_capacity(16 + attrs.len());
        frame.extend_from_slice(&((16 + attrs.len()) as u32).to_ne_bytes());
        frame.extend_from_slice(&message_type.to_ne_bytes());
        frame.extend_from_slice(&flags.to_ne_bytes());
        frame.extend_from_slice(&self.sequence.to_ne_bytes());
        frame.extend_from_slice(&0u32.to_ne_bytes());
        frame.extend_from_slice(attrs);
        self.socket.send(&frame, 0)?;

        let mut responses = Vec::new();
        let mut buf = vec![0u8; NETLINK_RECV_BUFFER];
        loop {
            let len = self.socket.recv(&mut &mut buf[..], 0)?;
            let mut offset = 0;
            while offset + 16 <= len {
                let header = &buf[offset..];
                let msg_len = u32::from_ne_bytes([header[0], header[1], header[2], header[3]]) as usize;
                let msg_type = u16::from_ne_bytes([header[4], header[5]]);
                if msg_len < 16 || offset + msg_len > len {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        "truncated rdma netlink message",
                    ));
                }
                match msg_type {
                    NLMSG_DONE => return Ok(responses),
                    NLMSG_ERROR => {
                        if msg_len < 20 {
                            return Err(io::Error::new(
                                io::ErrorKind::InvalidData,
                                "short rdma netlink error message",
                            ));
                        }
                        let body = &buf[offset + 16..];
                        let code = i32::from_ne_bytes([body[0], body[1], body[2], body[3]]);
                        if code == 0 {
                            return Ok(responses);
                        }
                        return Err(io::Error::from_raw_os_error(-code));
                    }
                    _ => responses.push(buf[offset + 16..offset + msg_len].to_vec()),
                }
                offset += (msg_len + 3) & !3;
            }
        }
    }
}

fn push_u32_attr(buf: &mut Vec<u8>, kind: u16, value: u32) {
    buf.extend_from_slice(&8u16.to_ne_bytes());
    buf.extend_from_slice(&kind.to_ne_bytes());
    buf.extend_from_slice(&value.to_ne_bytes());
}

/// Extracts the device index and name attributes from one device message.
fn parse_device_attrs(payload: &[u8]) -> (Option<u32>, Option<String>) {
    let mut index = None;
    let mut name = None;
    let mut offset = 0;
    while offset + 4 <= payload.len() {
        let len = u16::from_ne_bytes([payload[offset], payload[offset + 1]]) as usize;
        let kind = u16::from_ne_bytes([payload[offset + 2], payload[offset + 3]]);
        if len < 4 || offset + len > payload.len() {
            break;
        }
        let value = &payload[offset + 4..offset + len];
        match kind {
            RDMA_NLDEV_ATTR_DEV_INDEX if value.len() >= 4 => {
                index = Some(u32::from_ne_bytes([value[0], value[1], value[2], value[3]]));
            }
            RDMA_NLDEV_ATTR_DEV_NAME => {
                name = Some(
                    String::from_utf8_lossy(value)
                        .trim_end_matches('\0')
                        .to_string(),
                );
            }
            _ => {}
        }
        offset += (len + 3) & !3;
    }
    (index, name)
}
