// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Query packet construction.
//!
//! [`PacketBuilder`] owns the correlation counter for a run. Every call to
//! [`PacketBuilder::build`] stamps the next id, so replies can be matched
//! back to exactly one request.

use crate::protocol::{Addressing, Method, SmpPacket};

/// First correlation id handed out by a fresh builder.
pub const CORRELATION_SEED: u64 = 0x123;

/// Fixed parameters of the query issued for the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub addressing: Addressing,
    pub method: Method,
    pub attr_id: u16,
    pub attr_mod: u32,
}

impl Query {
    pub fn new(addressing: Addressing, method: Method, attr_id: u16, attr_mod: u32) -> Self {
        Self {
            addressing,
            method,
            attr_id,
            attr_mod,
        }
    }
}

/// Builds SMP requests with monotonically increasing correlation ids.
#[derive(Debug)]
pub struct PacketBuilder {
    next_id: u64,
}

impl Default for PacketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketBuilder {
    pub fn new() -> Self {
        Self::with_seed(CORRELATION_SEED)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self { next_id: seed }
    }

    /// Build a request for `query`.
    ///
    /// The data region is left sentinel-filled; directed queries carry the
    /// route in the initial path, LID queries carry none.
    pub fn build(&mut self, query: &Query) -> SmpPacket {
        let mut pkt = SmpPacket::request(
            query.addressing.clone(),
            query.method,
            query.attr_id,
            query.attr_mod,
        );
        pkt.correlation_id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        pkt
    }

    /// Id the next `build` call will use.
    pub fn peek_id(&self) -> u64 {
        self.next_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{DrPath, PERMISSIVE_LID, SENTINEL_FILL};

    fn dr_query() -> Query {
        Query::new(
            Addressing::Directed(DrPath::parse("0,1,2").expect("route")),
            Method::Get,
            0x0010,
            0,
        )
    }

    #[test]
    fn test_ids_strictly_increase() {
        let mut builder = PacketBuilder::new();
        let lid = Query::new(Addressing::Lid(3), Method::Get, 0x15, 2);
        let dr = dr_query();

        let ids: Vec<u64> = (0..50)
            .map(|i| {
                let q = if i % 2 == 0 { &lid } else { &dr };
                builder.build(q).correlation_id
            })
            .collect();

        assert_eq!(ids[0], CORRELATION_SEED);
        assert!(ids.windows(2).all(|w| w[1] == w[0] + 1));
        assert_eq!(builder.peek_id(), CORRELATION_SEED + 50);
    }

    #[test]
    fn test_directed_packet() {
        let mut builder = PacketBuilder::new();
        let pkt = builder.build(&dr_query());
        let buf = pkt.encode();

        assert_eq!(pkt.addressing.destination_lid(), PERMISSIVE_LID);
        assert_eq!(buf[7], 2);
        assert_eq!(&buf[128..131], &[0, 1, 2]);
        assert_eq!(buf[131], 0);
        assert!(pkt.data.iter().all(|&b| b == SENTINEL_FILL));
    }

    #[test]
    fn test_lid_packet() {
        let mut builder = PacketBuilder::with_seed(1);
        let pkt = builder.build(&Query::new(Addressing::Lid(0xa0), Method::Set, 0x11, 7));

        assert_eq!(pkt.correlation_id, 1);
        assert_eq!(pkt.addressing.destination_lid(), 0xa0);
        assert_eq!(pkt.method, Method::Set.code());
        assert_eq!(pkt.attr_id, 0x11);
        assert_eq!(pkt.attr_mod, 7);
        assert!(pkt.data.iter().all(|&b| b == SENTINEL_FILL));
    }

    #[test]
    fn test_rebuild_keeps_addressing() {
        let mut builder = PacketBuilder::new();
        let query = dr_query();
        let first = builder.build(&query);
        let second = builder.build(&query);

        assert_ne!(first.correlation_id, second.correlation_id);
        assert_eq!(first.addressing, second.addressing);
        assert_eq!(first.method, second.method);
        assert_eq!(first.attr_id, second.attr_id);
        assert_eq!(first.attr_mod, second.attr_mod);
    }
}
