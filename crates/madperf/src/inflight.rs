// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-flight request table.
//!
//! One slot per pipeline position. A slot's request is rebuilt and re-sent
//! as soon as its reply arrives, so the number of outstanding requests stays
//! at the queue depth for the whole run.
//!
//! Replies are matched with a linear scan on the wire correlation id. Queue
//! depths are small (tens of slots) and a scan cannot confuse two ids the
//! way a truncated hash key could.

use crate::protocol::SmpPacket;
use crate::stats::StatsCollector;
use crate::transport::{AgentId, SendOptions, Transport, TransportError};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Table errors.
#[derive(Debug, Error)]
pub enum InFlightError {
    #[error("queue depth must be at least 1")]
    Empty,

    #[error("dangling reply: tid 0x{0:08x} matches no outstanding request")]
    DanglingReply(u32),

    #[error("slot {0} out of range")]
    NoSuchSlot(usize),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// One pipeline position.
#[derive(Debug, Clone)]
pub struct Slot {
    packet: SmpPacket,
    sent_at: Option<Instant>,
    outstanding: bool,
}

impl Slot {
    pub fn packet(&self) -> &SmpPacket {
        &self.packet
    }

    pub fn sent_at(&self) -> Option<Instant> {
        self.sent_at
    }

    pub fn is_outstanding(&self) -> bool {
        self.outstanding
    }
}

/// A reply matched to its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
    pub slot: usize,
    pub latency: Duration,
}

/// Fixed-size table of in-flight requests.
#[derive(Debug)]
pub struct InFlightTable {
    slots: Vec<Slot>,
}

impl InFlightTable {
    /// Create one slot per packet.
    pub fn new(packets: Vec<SmpPacket>) -> Result<Self, InFlightError> {
        if packets.is_empty() {
            return Err(InFlightError::Empty);
        }
        let slots = packets
            .into_iter()
            .map(|packet| Slot {
                packet,
                sent_at: None,
                outstanding: false,
            })
            .collect();
        Ok(Self { slots })
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn slot(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    /// Number of slots waiting for a reply.
    pub fn outstanding(&self) -> usize {
        self.slots.iter().filter(|s| s.outstanding).count()
    }

    /// Correlation ids currently held by the slots, in slot order.
    pub fn correlation_ids(&self) -> Vec<u64> {
        self.slots.iter().map(|s| s.packet.correlation_id).collect()
    }

    /// Transmit every slot's packet. The first failure aborts.
    pub fn send_all<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        agent: AgentId,
        opts: SendOptions,
        stats: &mut StatsCollector,
    ) -> Result<(), InFlightError> {
        for slot in &mut self.slots {
            let bytes = transport.send(agent, &slot.packet, opts)?;
            slot.sent_at = Some(Instant::now());
            slot.outstanding = true;
            stats.record_send(bytes);
        }
        log::debug!("[inflight] {} requests on the wire", self.slots.len());
        Ok(())
    }

    /// Match a reply by its wire id and release the slot.
    pub fn complete(
        &mut self,
        wire_id: u32,
        received_at: Instant,
    ) -> Result<Completion, InFlightError> {
        let index = self
            .find_outstanding(wire_id)
            .ok_or(InFlightError::DanglingReply(wire_id))?;
        let slot = &mut self.slots[index];
        let latency = slot
            .sent_at
            .map(|sent| received_at.saturating_duration_since(sent))
            .unwrap_or_default();
        slot.outstanding = false;
        Ok(Completion {
            slot: index,
            latency,
        })
    }

    /// Give up on a request the transport reported as timed out.
    ///
    /// The slot stays idle for the rest of the run.
    pub fn expire(&mut self, wire_id: u32) -> Option<usize> {
        let index = self.find_outstanding(wire_id)?;
        self.slots[index].outstanding = false;
        log::debug!("[inflight] slot {} lost (tid 0x{:08x})", index, wire_id);
        Some(index)
    }

    /// Install a rebuilt packet in `index` and transmit it.
    pub fn resend<T: Transport + ?Sized>(
        &mut self,
        index: usize,
        packet: SmpPacket,
        transport: &mut T,
        agent: AgentId,
        opts: SendOptions,
        stats: &mut StatsCollector,
    ) -> Result<(), InFlightError> {
        let slot = self
            .slots
            .get_mut(index)
            .ok_or(InFlightError::NoSuchSlot(index))?;
        slot.packet = packet;
        slot.outstanding = false;
        let bytes = transport.send(agent, &slot.packet, opts)?;
        slot.sent_at = Some(Instant::now());
        slot.outstanding = true;
        stats.record_send(bytes);
        Ok(())
    }

    fn find_outstanding(&self, wire_id: u32) -> Option<usize> {
        self.slots
            .iter()
            .position(|s| s.outstanding && s.packet.wire_id() == wire_id)
    }
}
