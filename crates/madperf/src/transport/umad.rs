// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Linux user MAD transport (`/dev/infiniband/umadN`).
//!
//! Each read/write on the device carries an `ib_user_mad` header followed by
//! the 256-byte MAD:
//!
//! ```text
//!  0  agent_id | status | timeout_ms | retries | length   (native endian u32)
//! 20  qpn (be32) | qkey (be32) | lid (be16) | sl | path_bits
//! 32  grh_present | gid_index | hop_limit | traffic_class | gid[16]
//! 52  flow_label (be32) | pkey_index (u16) | reserved[6]
//! 64  MAD
//! ```
//!
//! Without `IB_USER_MAD_ENABLE_PKEY` the kernel uses the 56-byte layout that
//! stops after `flow_label`.

use super::{AgentId, PollStatus, SendOptions, Transport, TransportError};
use crate::protocol::{Addressing, MgmtClass, SmpPacket, MAD_SIZE};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::Duration;

const UMAD_DEV_DIR: &str = "/dev/infiniband";
const UMAD_SYSFS_DIR: &str = "/sys/class/infiniband_mad";

// _IOWR(0x1b, 1, struct ib_user_mad_reg_req)
const IB_USER_MAD_REGISTER_AGENT: u32 = 0xC01C_1B01;
// _IOW(0x1b, 2, __u32)
const IB_USER_MAD_UNREGISTER_AGENT: u32 = 0x4004_1B02;
// _IO(0x1b, 4)
const IB_USER_MAD_ENABLE_PKEY: u32 = 0x0000_1B04;

const HDR_SIZE: usize = 64;
const HDR_SIZE_OLD: usize = 56;

const SMI_QPN: u8 = 0;

#[repr(C)]
struct IbUserMadRegReq {
    id: u32,
    method_mask: [u32; 4],
    qpn: u8,
    mgmt_class: u8,
    mgmt_class_version: u8,
    oui: [u8; 3],
    rmpp_version: u8,
}

/// Fields of a received `ib_user_mad` header the pipeline cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RecvHeader {
    agent_id: u32,
    status: u32,
    lid: u16,
}

fn encode_header(agent: AgentId, opts: SendOptions, lid: u16, hdr_size: usize) -> Vec<u8> {
    let mut buf = vec![0u8; hdr_size + MAD_SIZE];
    buf[0..4].copy_from_slice(&agent.to_ne_bytes());
    // status stays 0 on send
    buf[8..12].copy_from_slice(&opts.timeout_ms.to_ne_bytes());
    buf[12..16].copy_from_slice(&opts.retries.to_ne_bytes());
    buf[16..20].copy_from_slice(&((hdr_size + MAD_SIZE) as u32).to_ne_bytes());
    // qpn 0 (SMI), qkey 0
    buf[28..30].copy_from_slice(&lid.to_be_bytes());
    buf
}

fn decode_header(buf: &[u8]) -> RecvHeader {
    let u32_at = |off: usize| u32::from_ne_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
    RecvHeader {
        agent_id: u32_at(0),
        status: u32_at(4),
        lid: u16::from_be_bytes([buf[28], buf[29]]),
    }
}

/// Find the umad node serving `(device, port)` under a sysfs root.
///
/// `device = None` picks the first node (in name order) for `port`.
fn resolve_node(
    sysfs_root: &Path,
    device: Option<&str>,
    port: u8,
) -> io::Result<Option<(String, String)>> {
    let mut nodes: Vec<PathBuf> = std::fs::read_dir(sysfs_root)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with("umad"))
        })
        .collect();
    nodes.sort();

    for node in nodes {
        let Ok(ibdev) = std::fs::read_to_string(node.join("ibdev")) else {
            continue;
        };
        let Ok(node_port) = std::fs::read_to_string(node.join("port")) else {
            continue;
        };
        let ibdev = ibdev.trim();
        if node_port.trim().parse::<u8>().ok() != Some(port) {
            continue;
        }
        if device.is_some_and(|d| d != ibdev) {
            continue;
        }
        if let Some(name) = node.file_name().and_then(|n| n.to_str()) {
            return Ok(Some((name.to_string(), ibdev.to_string())));
        }
    }
    Ok(None)
}

/// Transport over a Linux umad character device.
pub struct UmadTransport {
    file: Option<File>,
    device: String,
    port: u8,
    hdr_size: usize,
    agents: Vec<(AgentId, MgmtClass)>,
}

impl UmadTransport {
    /// Open the umad node for `device` (or the first device) and `port`.
    pub fn open(device: Option<&str>, port: u8) -> Result<Self, TransportError> {
        let unavailable = |reason: String| TransportError::DeviceUnavailable {
            device: device.unwrap_or("<any>").to_string(),
            port,
            reason,
        };

        let (node, ibdev) = resolve_node(Path::new(UMAD_SYSFS_DIR), device, port)
            .map_err(|e| unavailable(format!("{}: {}", UMAD_SYSFS_DIR, e)))?
            .ok_or_else(|| unavailable("no matching umad device".to_string()))?;

        let dev_path = Path::new(UMAD_DEV_DIR).join(&node);
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&dev_path)
            .map_err(|e| unavailable(format!("{}: {}", dev_path.display(), e)))?;

        // SAFETY: ENABLE_PKEY takes no argument; fd is a valid open umad descriptor.
        let ret = unsafe { libc::ioctl(file.as_raw_fd(), IB_USER_MAD_ENABLE_PKEY as _) };
        let hdr_size = if ret < 0 {
            log::warn!(
                "[umad] ENABLE_PKEY failed on {} ({}), using legacy header",
                dev_path.display(),
                io::Error::last_os_error()
            );
            HDR_SIZE_OLD
        } else {
            HDR_SIZE
        };

        log::debug!(
            "[umad] opened {} ({} port {}), header {} bytes",
            dev_path.display(),
            ibdev,
            port,
            hdr_size
        );

        Ok(Self {
            file: Some(file),
            device: ibdev,
            port,
            hdr_size,
            agents: Vec::new(),
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn port(&self) -> u8 {
        self.port
    }

    fn file(&mut self) -> Result<&mut File, TransportError> {
        self.file.as_mut().ok_or(TransportError::Closed)
    }
}

impl Transport for UmadTransport {
    fn register(&mut self, class: MgmtClass) -> Result<AgentId, TransportError> {
        let fd = self.file()?.as_raw_fd();
        let mut req = IbUserMadRegReq {
            id: 0,
            method_mask: [0; 4],
            qpn: SMI_QPN,
            mgmt_class: class.code(),
            mgmt_class_version: 1,
            oui: [0; 3],
            rmpp_version: 0,
        };

        // SAFETY: req is a live, properly laid out ib_user_mad_reg_req the kernel fills in.
        let ret = unsafe {
            libc::ioctl(
                fd,
                IB_USER_MAD_REGISTER_AGENT as _,
                std::ptr::addr_of_mut!(req),
            )
        };
        if ret < 0 {
            return Err(TransportError::Register {
                class,
                source: io::Error::last_os_error(),
            });
        }

        log::debug!("[umad] registered agent {} for {}", req.id, class);
        self.agents.push((req.id, class));
        Ok(req.id)
    }

    fn send(
        &mut self,
        agent: AgentId,
        pkt: &SmpPacket,
        opts: SendOptions,
    ) -> Result<usize, TransportError> {
        let hdr_size = self.hdr_size;
        let mut buf = encode_header(agent, opts, pkt.addressing.destination_lid(), hdr_size);
        buf[hdr_size..].copy_from_slice(&pkt.encode());

        let file = self.file()?;
        let written = file.write(&buf).map_err(TransportError::Send)?;
        if written != buf.len() {
            return Err(TransportError::Send(io::Error::new(
                io::ErrorKind::WriteZero,
                format!("short write: {} of {} bytes", written, buf.len()),
            )));
        }
        Ok(MAD_SIZE)
    }

    fn poll(&mut self, timeout: Duration) -> Result<PollStatus, TransportError> {
        let fd = self.file()?.as_raw_fd();
        let timeout_ms: i32 = timeout.as_millis().try_into().unwrap_or(i32::MAX);
        let mut pollfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };

        loop {
            // SAFETY: poll_target points to our stack-allocated pollfd structure.
            let poll_target = std::ptr::addr_of_mut!(pollfd);
            let res = unsafe { libc::poll(poll_target, 1, timeout_ms) };
            if res == 0 {
                return Ok(PollStatus::TimedOut);
            }
            if res < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(TransportError::Poll(err));
            }
            return Ok(PollStatus::Ready);
        }
    }

    fn receive(&mut self) -> Result<(SmpPacket, usize), TransportError> {
        let hdr_size = self.hdr_size;
        let mut buf = vec![0u8; hdr_size + MAD_SIZE];
        let n = self
            .file()?
            .read(&mut buf)
            .map_err(|e| TransportError::Receive(e.to_string()))?;
        if n < hdr_size {
            return Err(TransportError::Receive(format!(
                "short read: {} bytes",
                n
            )));
        }

        let hdr = decode_header(&buf);
        if !self.agents.iter().any(|(id, _)| *id == hdr.agent_id) {
            return Err(TransportError::Receive(format!(
                "MAD for unknown agent {}",
                hdr.agent_id
            )));
        }

        let mad = &buf[hdr_size..n];
        if hdr.status == libc::ETIMEDOUT as u32 {
            let correlation = (mad.len() >= 16)
                .then(|| u32::from_be_bytes([mad[12], mad[13], mad[14], mad[15]]));
            return Err(TransportError::ReceiveTimeout { correlation });
        }
        if hdr.status != 0 {
            return Err(TransportError::Receive(format!(
                "umad status {}: {}",
                hdr.status,
                io::Error::from_raw_os_error(hdr.status as i32)
            )));
        }

        let mut pkt = SmpPacket::decode(mad)?;
        if let Addressing::Lid(_) = pkt.addressing {
            pkt.addressing = Addressing::Lid(hdr.lid);
        }
        Ok((pkt, mad.len()))
    }

    fn close(&mut self) {
        let Some(file) = self.file.take() else {
            return;
        };
        for (mut id, class) in self.agents.drain(..) {
            // SAFETY: id is a stack u32 holding an agent id returned by REGISTER_AGENT.
            let ret = unsafe {
                libc::ioctl(
                    file.as_raw_fd(),
                    IB_USER_MAD_UNREGISTER_AGENT as _,
                    std::ptr::addr_of_mut!(id),
                )
            };
            if ret < 0 {
                log::debug!(
                    "[umad] unregister agent {} ({}) failed: {}",
                    id,
                    class,
                    io::Error::last_os_error()
                );
            }
        }
        log::debug!("[umad] closed {} port {}", self.device, self.port);
    }

    fn describe(&self) -> String {
        format!("{} port {}", self.device, self.port)
    }
}

impl Drop for UmadTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_node(root: &Path, name: &str, ibdev: &str, port: u8) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).expect("mkdir");
        std::fs::write(dir.join("ibdev"), format!("{}\n", ibdev)).expect("ibdev");
        std::fs::write(dir.join("port"), format!("{}\n", port)).expect("port");
    }

    #[test]
    fn test_reg_req_layout() {
        assert_eq!(std::mem::size_of::<IbUserMadRegReq>(), 28);
        assert_eq!((IB_USER_MAD_REGISTER_AGENT >> 16) & 0x3fff, 28);
    }

    #[test]
    fn test_header_encoding() {
        let opts = SendOptions {
            timeout_ms: 200,
            retries: 3,
        };
        let buf = encode_header(7, opts, 0x00a0, HDR_SIZE);
        assert_eq!(buf.len(), HDR_SIZE + MAD_SIZE);
        assert_eq!(&buf[0..4], &7u32.to_ne_bytes());
        assert_eq!(&buf[4..8], &[0, 0, 0, 0]);
        assert_eq!(&buf[8..12], &200u32.to_ne_bytes());
        assert_eq!(&buf[12..16], &3u32.to_ne_bytes());
        assert_eq!(&buf[16..20], &320u32.to_ne_bytes());
        assert_eq!(&buf[20..28], &[0; 8]);
        assert_eq!(&buf[28..30], &[0x00, 0xa0]);

        let hdr = decode_header(&buf);
        assert_eq!(
            hdr,
            RecvHeader {
                agent_id: 7,
                status: 0,
                lid: 0xa0
            }
        );
    }

    #[test]
    fn test_legacy_header_size() {
        let buf = encode_header(1, SendOptions::default(), 0xffff, HDR_SIZE_OLD);
        assert_eq!(buf.len(), HDR_SIZE_OLD + MAD_SIZE);
        assert_eq!(&buf[16..20], &312u32.to_ne_bytes());
    }

    #[test]
    fn test_resolve_node() {
        let root = tempfile::tempdir().expect("tempdir");
        fake_node(root.path(), "umad0", "mlx5_0", 1);
        fake_node(root.path(), "umad1", "mlx5_1", 1);
        fake_node(root.path(), "umad2", "mlx5_1", 2);
        std::fs::create_dir_all(root.path().join("issm0")).expect("mkdir");

        let first = resolve_node(root.path(), None, 1).expect("scan");
        assert_eq!(first, Some(("umad0".into(), "mlx5_0".into())));

        let named = resolve_node(root.path(), Some("mlx5_1"), 2).expect("scan");
        assert_eq!(named, Some(("umad2".into(), "mlx5_1".into())));

        assert_eq!(resolve_node(root.path(), Some("mlx5_9"), 1).expect("scan"), None);
        assert_eq!(resolve_node(root.path(), None, 3).expect("scan"), None);
    }

    #[test]
    fn test_resolve_missing_root() {
        let root = tempfile::tempdir().expect("tempdir");
        assert!(resolve_node(&root.path().join("absent"), None, 1).is_err());
    }
}
