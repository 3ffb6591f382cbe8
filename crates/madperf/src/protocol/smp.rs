// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subnet Management Packet (SMP) encoder/decoder.
//!
//! Every SMP is a fixed 256-byte MAD. Multi-byte fields are big-endian.
//!
//! ```text
//!  0      base_version | mgmt_class | class_version | method
//!  4      status (16)             | hop_ptr | hop_cnt
//!  8      transaction id (64)  [high 32: transport, low 32: correlation]
//! 16      attr_id (16)            | reserved (16)
//! 20      attr_mod (32)
//! 24      m_key (64)
//! 32      dr_slid (16)            | dr_dlid (16)
//! 36      reserved (28 bytes)
//! 64      data (64 bytes)
//! 128     initial_path (64 bytes)
//! 192     return_path (64 bytes)
//! ```

use super::route::{DrPath, MAX_HOPS, MAX_PATH_LEN};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Size of a MAD on the wire.
pub const MAD_SIZE: usize = 256;

/// Size of the SMP data region.
pub const SMP_DATA_SIZE: usize = 64;

/// Byte written over the data region of outgoing requests.
pub const SENTINEL_FILL: u8 = 0xFF;

/// Permissive LID used as destination for directed-route SMPs.
pub const PERMISSIVE_LID: u16 = 0xFFFF;

/// Direction bit carried in the status field of directed-route SMPs.
pub const DR_DIRECTION_BIT: u16 = 0x8000;

/// Method code of a Get response.
pub const METHOD_GET_RESP: u8 = 0x81;

const BASE_VERSION: u8 = 1;
const CLASS_VERSION: u8 = 1;

const OFF_STATUS: usize = 4;
const OFF_HOP_PTR: usize = 6;
const OFF_HOP_CNT: usize = 7;
const OFF_TID_HIGH: usize = 8;
const OFF_TID_LOW: usize = 12;
const OFF_ATTR_ID: usize = 16;
const OFF_ATTR_MOD: usize = 20;
const OFF_MKEY: usize = 24;
const OFF_DR_SLID: usize = 32;
const OFF_DR_DLID: usize = 34;
const OFF_DATA: usize = 64;
const OFF_INITIAL_PATH: usize = 128;
const OFF_RETURN_PATH: usize = 192;

/// SMP decode errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("MAD truncated: {0} bytes, need {}", MAD_SIZE)]
    Truncated(usize),

    #[error("unsupported base version {0}")]
    BaseVersion(u8),

    #[error("not an SMP management class: 0x{0:02x}")]
    UnknownClass(u8),

    #[error("hop count {0} exceeds {}", MAX_HOPS)]
    HopCount(u8),
}

/// SMP management class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MgmtClass {
    /// LID-routed SMP (`IB_SMI_CLASS`).
    LidRouted,
    /// Directed-route SMP (`IB_SMI_DIRECT_CLASS`).
    DirectedRoute,
}

impl MgmtClass {
    pub const fn code(self) -> u8 {
        match self {
            Self::LidRouted => 0x01,
            Self::DirectedRoute => 0x81,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::LidRouted),
            0x81 => Some(Self::DirectedRoute),
            _ => None,
        }
    }
}

impl fmt::Display for MgmtClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LidRouted => write!(f, "IB_SMI_CLASS (0x{:02x})", self.code()),
            Self::DirectedRoute => write!(f, "IB_SMI_DIRECT_CLASS (0x{:02x})", self.code()),
        }
    }
}

/// Request method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Set,
}

impl Method {
    pub const fn code(self) -> u8 {
        match self {
            Self::Get => 1,
            Self::Set => 2,
        }
    }

    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Get),
            2 => Some(Self::Set),
            _ => None,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Get => write!(f, "GET ({})", self.code()),
            Self::Set => write!(f, "SET ({})", self.code()),
        }
    }
}

/// How an SMP reaches its target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Addressing {
    /// Explicit hop path from the local port.
    Directed(DrPath),
    /// Destination LID.
    Lid(u16),
}

impl Addressing {
    pub fn class(&self) -> MgmtClass {
        match self {
            Self::Directed(_) => MgmtClass::DirectedRoute,
            Self::Lid(_) => MgmtClass::LidRouted,
        }
    }

    /// LID the transport should address the MAD to.
    pub fn destination_lid(&self) -> u16 {
        match self {
            Self::Directed(_) => PERMISSIVE_LID,
            Self::Lid(lid) => *lid,
        }
    }
}

impl fmt::Display for Addressing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Directed(path) => write!(f, "DR path {}", path),
            Self::Lid(lid) => write!(f, "LID 0x{:x}", lid),
        }
    }
}

/// One SMP, request or reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmpPacket {
    /// Raw method code (replies carry `METHOD_GET_RESP`).
    pub method: u8,
    pub status: u16,
    pub hop_ptr: u8,
    /// Full-width correlation id; only the low 32 bits go on the wire.
    pub correlation_id: u64,
    pub attr_id: u16,
    pub attr_mod: u32,
    pub m_key: u64,
    pub addressing: Addressing,
    pub data: [u8; SMP_DATA_SIZE],
    pub return_path: [u8; MAX_PATH_LEN],
}

impl SmpPacket {
    /// Blank request for `addressing`, data region sentinel-filled.
    pub fn request(addressing: Addressing, method: Method, attr_id: u16, attr_mod: u32) -> Self {
        Self {
            method: method.code(),
            status: 0,
            hop_ptr: 0,
            correlation_id: 0,
            attr_id,
            attr_mod,
            m_key: 0,
            addressing,
            data: [SENTINEL_FILL; SMP_DATA_SIZE],
            return_path: [0; MAX_PATH_LEN],
        }
    }

    pub fn class(&self) -> MgmtClass {
        self.addressing.class()
    }

    /// Correlation id as carried on the wire.
    pub fn wire_id(&self) -> u32 {
        self.correlation_id as u32
    }

    /// Status with the directed-route direction bit masked off.
    pub fn status_code(&self) -> u16 {
        match self.addressing {
            Addressing::Directed(_) => self.status & !DR_DIRECTION_BIT,
            Addressing::Lid(_) => self.status,
        }
    }

    /// Serialize into a 256-byte MAD.
    pub fn encode(&self) -> [u8; MAD_SIZE] {
        let mut buf = [0u8; MAD_SIZE];

        buf[0] = BASE_VERSION;
        buf[1] = self.class().code();
        buf[2] = CLASS_VERSION;
        buf[3] = self.method;
        buf[OFF_STATUS..OFF_STATUS + 2].copy_from_slice(&self.status.to_be_bytes());
        buf[OFF_HOP_PTR] = self.hop_ptr;

        // High half of the TID belongs to the transport agent.
        buf[OFF_TID_HIGH..OFF_TID_LOW].copy_from_slice(&[0; 4]);
        buf[OFF_TID_LOW..OFF_TID_LOW + 4].copy_from_slice(&self.wire_id().to_be_bytes());

        buf[OFF_ATTR_ID..OFF_ATTR_ID + 2].copy_from_slice(&self.attr_id.to_be_bytes());
        buf[OFF_ATTR_MOD..OFF_ATTR_MOD + 4].copy_from_slice(&self.attr_mod.to_be_bytes());
        buf[OFF_MKEY..OFF_MKEY + 8].copy_from_slice(&self.m_key.to_be_bytes());

        if let Addressing::Directed(path) = &self.addressing {
            buf[OFF_HOP_CNT] = path.hop_cnt();
            buf[OFF_DR_SLID..OFF_DR_SLID + 2].copy_from_slice(&PERMISSIVE_LID.to_be_bytes());
            buf[OFF_DR_DLID..OFF_DR_DLID + 2].copy_from_slice(&PERMISSIVE_LID.to_be_bytes());
            let hops = path.hops();
            buf[OFF_INITIAL_PATH..OFF_INITIAL_PATH + hops.len()].copy_from_slice(hops);
        }

        buf[OFF_DATA..OFF_DATA + SMP_DATA_SIZE].copy_from_slice(&self.data);
        buf[OFF_RETURN_PATH..OFF_RETURN_PATH + MAX_PATH_LEN].copy_from_slice(&self.return_path);

        buf
    }

    /// Parse a MAD.
    ///
    /// LID-routed MADs do not carry their peer LID; it decodes as 0 and the
    /// transport fills it from its address header.
    pub fn decode(buf: &[u8]) -> Result<Self, DecodeError> {
        if buf.len() < MAD_SIZE {
            return Err(DecodeError::Truncated(buf.len()));
        }
        if buf[0] != BASE_VERSION {
            return Err(DecodeError::BaseVersion(buf[0]));
        }
        let class = MgmtClass::from_code(buf[1]).ok_or(DecodeError::UnknownClass(buf[1]))?;

        let addressing = match class {
            MgmtClass::DirectedRoute => {
                let hop_cnt = buf[OFF_HOP_CNT];
                if hop_cnt > MAX_HOPS {
                    return Err(DecodeError::HopCount(hop_cnt));
                }
                let end = OFF_INITIAL_PATH + hop_cnt as usize + 1;
                let path = DrPath::from_hops(&buf[OFF_INITIAL_PATH..end])
                    .map_err(|_| DecodeError::HopCount(hop_cnt))?;
                Addressing::Directed(path)
            }
            MgmtClass::LidRouted => Addressing::Lid(0),
        };

        let mut data = [0u8; SMP_DATA_SIZE];
        data.copy_from_slice(&buf[OFF_DATA..OFF_DATA + SMP_DATA_SIZE]);
        let mut return_path = [0u8; MAX_PATH_LEN];
        return_path.copy_from_slice(&buf[OFF_RETURN_PATH..OFF_RETURN_PATH + MAX_PATH_LEN]);

        Ok(Self {
            method: buf[3],
            status: read_u16(buf, OFF_STATUS),
            hop_ptr: buf[OFF_HOP_PTR],
            correlation_id: u64::from(read_u32(buf, OFF_TID_LOW)),
            attr_id: read_u16(buf, OFF_ATTR_ID),
            attr_mod: read_u32(buf, OFF_ATTR_MOD),
            m_key: u64::from_be_bytes(copy_array(buf, OFF_MKEY)),
            addressing,
            data,
            return_path,
        })
    }
}

fn copy_array<const N: usize>(buf: &[u8], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&buf[offset..offset + N]);
    out
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes(copy_array(buf, offset))
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes(copy_array(buf, offset))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directed(route: &str) -> Addressing {
        Addressing::Directed(DrPath::parse(route).expect("route"))
    }

    #[test]
    fn test_directed_layout() {
        let mut pkt = SmpPacket::request(directed("0,1,2,3,5"), Method::Get, 0x0010, 2);
        pkt.correlation_id = 0x0000_0007_1234_5678;
        let buf = pkt.encode();

        assert_eq!(buf.len(), MAD_SIZE);
        assert_eq!(&buf[0..4], &[0x01, 0x81, 0x01, 0x01]);
        assert_eq!(&buf[4..6], &[0x00, 0x00]); // status
        assert_eq!(buf[6], 0); // hop_ptr
        assert_eq!(buf[7], 4); // hop_cnt
        assert_eq!(&buf[8..12], &[0, 0, 0, 0]); // transport half of TID
        assert_eq!(&buf[12..16], &[0x12, 0x34, 0x56, 0x78]);
        assert_eq!(&buf[16..18], &[0x00, 0x10]);
        assert_eq!(&buf[20..24], &[0, 0, 0, 2]);
        assert_eq!(&buf[32..36], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert!(buf[36..64].iter().all(|&b| b == 0));
        assert!(buf[64..128].iter().all(|&b| b == SENTINEL_FILL));
        assert_eq!(&buf[128..133], &[0, 1, 2, 3, 5]);
        assert!(buf[133..256].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_lid_routed_layout() {
        let mut pkt = SmpPacket::request(Addressing::Lid(0xa0), Method::Set, 0x0015, 0x0102_0304);
        pkt.correlation_id = 0x123;
        let buf = pkt.encode();

        assert_eq!(&buf[0..4], &[0x01, 0x01, 0x01, 0x02]);
        assert_eq!(buf[7], 0);
        assert_eq!(&buf[12..16], &[0x00, 0x00, 0x01, 0x23]);
        assert_eq!(&buf[16..18], &[0x00, 0x15]);
        assert_eq!(&buf[20..24], &[0x01, 0x02, 0x03, 0x04]);
        assert_eq!(&buf[32..36], &[0, 0, 0, 0]);
        assert!(buf[128..192].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_decode_directed_reply() {
        let pkt = SmpPacket::request(directed("0,3"), Method::Get, 0x0011, 0);
        let mut buf = pkt.encode();
        buf[3] = METHOD_GET_RESP;
        buf[4..6].copy_from_slice(&(DR_DIRECTION_BIT | 0x0004).to_be_bytes());
        buf[64..72].copy_from_slice(b"switch-0");

        let reply = SmpPacket::decode(&buf).expect("decode");
        assert_eq!(reply.method, METHOD_GET_RESP);
        assert_eq!(reply.status, 0x8004);
        assert_eq!(reply.status_code(), 0x0004);
        assert_eq!(reply.addressing, directed("0,3"));
        assert_eq!(&reply.data[..8], b"switch-0");
        assert_eq!(reply.data[8], SENTINEL_FILL);
    }

    #[test]
    fn test_decode_keeps_only_low_tid_bits() {
        let mut pkt = SmpPacket::request(Addressing::Lid(3), Method::Get, 0x15, 0);
        pkt.correlation_id = 0xAAAA_BBBB_0000_0042;
        let mut buf = pkt.encode();
        // Kernel stamps its agent id in the high half.
        buf[8..12].copy_from_slice(&[0xde, 0xad, 0xbe, 0xef]);

        let reply = SmpPacket::decode(&buf).expect("decode");
        assert_eq!(reply.correlation_id, 0x42);
        assert_eq!(reply.wire_id(), pkt.wire_id());
        assert_eq!(reply.addressing, Addressing::Lid(0));
        assert_eq!(reply.status_code(), 0);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(
            SmpPacket::decode(&[0u8; 100]),
            Err(DecodeError::Truncated(100))
        );

        let mut buf = SmpPacket::request(Addressing::Lid(1), Method::Get, 1, 0).encode();
        buf[0] = 2;
        assert_eq!(SmpPacket::decode(&buf), Err(DecodeError::BaseVersion(2)));

        buf[0] = 1;
        buf[1] = 0x04;
        assert_eq!(SmpPacket::decode(&buf), Err(DecodeError::UnknownClass(0x04)));

        buf[1] = 0x81;
        buf[7] = 64;
        assert_eq!(SmpPacket::decode(&buf), Err(DecodeError::HopCount(64)));
    }

    #[test]
    fn test_addressing_destination() {
        assert_eq!(directed("0").destination_lid(), PERMISSIVE_LID);
        assert_eq!(Addressing::Lid(7).destination_lid(), 7);
        assert_eq!(directed("0").class(), MgmtClass::DirectedRoute);
        assert_eq!(Addressing::Lid(7).class(), MgmtClass::LidRouted);
    }

    #[test]
    fn test_codes() {
        assert_eq!(Method::from_code(1), Some(Method::Get));
        assert_eq!(Method::from_code(2), Some(Method::Set));
        assert_eq!(Method::from_code(3), None);
        assert_eq!(MgmtClass::from_code(0x81), Some(MgmtClass::DirectedRoute));
        assert_eq!(MgmtClass::from_code(0x01), Some(MgmtClass::LidRouted));
    }
}
