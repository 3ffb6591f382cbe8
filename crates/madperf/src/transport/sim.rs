// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Simulated MAD transport.
//!
//! Answers every request itself after a configurable delay, so the pipeline
//! can be exercised without an HCA. Requests can be dropped with a fixed
//! probability; a dropped request comes back as a transport timeout once
//! its retry budget would have expired, the way the kernel reports it.

use super::{AgentId, PollStatus, SendOptions, Transport, TransportError};
use crate::protocol::{
    Addressing, MgmtClass, SmpPacket, DR_DIRECTION_BIT, MAD_SIZE, METHOD_GET_RESP, SMP_DATA_SIZE,
};
use std::io;
use std::time::{Duration, Instant};

/// Configuration for the simulated responder.
#[derive(Debug, Clone)]
pub struct SimTransportConfig {
    /// Fixed request-to-reply delay.
    pub delay: Duration,
    /// Request loss probability (0.0 - 1.0).
    pub loss_rate: f64,
    /// Bytes written into the reply data region (truncated to 64).
    pub responder_payload: Option<Vec<u8>>,
    /// Status code carried by replies.
    pub reply_status: u16,
    /// PRNG seed for loss decisions.
    pub seed: u64,
}

impl Default for SimTransportConfig {
    fn default() -> Self {
        Self {
            delay: Duration::from_micros(50),
            loss_rate: 0.0,
            responder_payload: None,
            reply_status: 0,
            seed: 0x12345678_9ABCDEF0,
        }
    }
}

impl SimTransportConfig {
    /// Lossless responder with a fixed delay.
    pub fn echo(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    /// Set the reply payload.
    pub fn with_payload(mut self, payload: &[u8]) -> Self {
        self.responder_payload = Some(payload.to_vec());
        self
    }

    /// Set the loss probability.
    pub fn with_loss(mut self, loss_rate: f64) -> Self {
        self.loss_rate = loss_rate.clamp(0.0, 1.0);
        self
    }
}

/// Counters kept by the simulated responder.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SimTransportStats {
    pub sent: u64,
    pub delivered: u64,
    pub dropped: u64,
}

struct InTransit {
    mad: [u8; MAD_SIZE],
    deliver_at: Instant,
    lost: bool,
    correlation: u32,
    lid: u16,
}

/// In-process responder implementing [`Transport`].
pub struct SimTransport {
    config: SimTransportConfig,
    in_transit: Vec<InTransit>,
    agents: Vec<MgmtClass>,
    rng_state: u64,
    stats: SimTransportStats,
    closed: bool,
}

impl SimTransport {
    pub fn new(config: SimTransportConfig) -> Self {
        let rng_state = if config.seed == 0 { 1 } else { config.seed };
        Self {
            config,
            in_transit: Vec::new(),
            agents: Vec::new(),
            rng_state,
            stats: SimTransportStats::default(),
            closed: false,
        }
    }

    /// Responder with a fixed delay and no loss.
    pub fn echo(delay: Duration) -> Self {
        Self::new(SimTransportConfig::echo(delay))
    }

    pub fn stats(&self) -> &SimTransportStats {
        &self.stats
    }

    pub fn config(&self) -> &SimTransportConfig {
        &self.config
    }

    /// MADs sent but not yet received.
    pub fn in_transit(&self) -> usize {
        self.in_transit.len()
    }

    fn rand_f64(&mut self) -> f64 {
        // xorshift64
        let mut state = self.rng_state;
        state ^= state << 13;
        state ^= state >> 7;
        state ^= state << 17;
        self.rng_state = state;
        (state as f64) / (u64::MAX as f64)
    }

    fn reply_for(&self, pkt: &SmpPacket) -> [u8; MAD_SIZE] {
        let mut reply = pkt.clone();
        reply.method = METHOD_GET_RESP;
        reply.status = match reply.addressing {
            Addressing::Directed(_) => self.config.reply_status | DR_DIRECTION_BIT,
            Addressing::Lid(_) => self.config.reply_status,
        };
        if let Some(payload) = &self.config.responder_payload {
            let n = payload.len().min(SMP_DATA_SIZE);
            reply.data = [0; SMP_DATA_SIZE];
            reply.data[..n].copy_from_slice(&payload[..n]);
        }
        reply.encode()
    }

    fn next_ready(&self, now: Instant) -> Option<usize> {
        self.in_transit
            .iter()
            .enumerate()
            .filter(|(_, t)| t.deliver_at <= now)
            .min_by_key(|(_, t)| t.deliver_at)
            .map(|(i, _)| i)
    }
}

impl Transport for SimTransport {
    fn register(&mut self, class: MgmtClass) -> Result<AgentId, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.agents.push(class);
        let agent = (self.agents.len() - 1) as AgentId;
        log::debug!("[sim] registered agent {} for {}", agent, class);
        Ok(agent)
    }

    fn send(
        &mut self,
        agent: AgentId,
        pkt: &SmpPacket,
        opts: SendOptions,
    ) -> Result<usize, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        match self.agents.get(agent as usize) {
            Some(class) if *class == pkt.class() => {}
            _ => {
                return Err(TransportError::Send(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("agent {} not registered for {}", agent, pkt.class()),
                )))
            }
        }

        self.stats.sent += 1;
        let now = Instant::now();
        let lost = self.config.loss_rate > 0.0 && self.rand_f64() < self.config.loss_rate;

        let entry = if lost {
            self.stats.dropped += 1;
            let budget = u64::from(opts.timeout_ms) * (u64::from(opts.retries) + 1);
            InTransit {
                mad: pkt.encode(),
                deliver_at: now + Duration::from_millis(budget),
                lost: true,
                correlation: pkt.wire_id(),
                lid: pkt.addressing.destination_lid(),
            }
        } else {
            InTransit {
                mad: self.reply_for(pkt),
                deliver_at: now + self.config.delay,
                lost: false,
                correlation: pkt.wire_id(),
                lid: pkt.addressing.destination_lid(),
            }
        };
        self.in_transit.push(entry);

        Ok(MAD_SIZE)
    }

    fn poll(&mut self, timeout: Duration) -> Result<PollStatus, TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let now = Instant::now();
        if self.next_ready(now).is_some() {
            return Ok(PollStatus::Ready);
        }

        let deadline = now + timeout;
        match self.in_transit.iter().map(|t| t.deliver_at).min() {
            Some(next) if next <= deadline => {
                std::thread::sleep(next.saturating_duration_since(now));
                Ok(PollStatus::Ready)
            }
            _ => {
                std::thread::sleep(timeout);
                Ok(PollStatus::TimedOut)
            }
        }
    }

    fn receive(&mut self) -> Result<(SmpPacket, usize), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        let idx = self
            .next_ready(Instant::now())
            .ok_or_else(|| TransportError::Receive("no MAD pending".into()))?;
        let entry = self.in_transit.swap_remove(idx);

        if entry.lost {
            log::trace!("[sim] tid 0x{:08x} timed out", entry.correlation);
            return Err(TransportError::ReceiveTimeout {
                correlation: Some(entry.correlation),
            });
        }

        let mut pkt = SmpPacket::decode(&entry.mad)?;
        if let Addressing::Lid(_) = pkt.addressing {
            pkt.addressing = Addressing::Lid(entry.lid);
        }
        self.stats.delivered += 1;
        Ok((pkt, MAD_SIZE))
    }

    fn close(&mut self) {
        if !self.closed {
            log::debug!(
                "[sim] closing: sent={} delivered={} dropped={} in_transit={}",
                self.stats.sent,
                self.stats.delivered,
                self.stats.dropped,
                self.in_transit.len()
            );
        }
        self.closed = true;
        self.in_transit.clear();
        self.agents.clear();
    }

    fn describe(&self) -> String {
        format!("sim (delay {} us)", self.config.delay.as_micros())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{PacketBuilder, Query};
    use crate::protocol::{DrPath, Method};

    fn lid_query() -> Query {
        Query::new(Addressing::Lid(3), Method::Get, 0x15, 1)
    }

    #[test]
    fn test_echo_reply() {
        let mut transport = SimTransport::new(
            SimTransportConfig::echo(Duration::from_millis(1)).with_payload(b"node-a\0"),
        );
        let agent = transport.register(MgmtClass::LidRouted).expect("register");
        let mut builder = PacketBuilder::new();
        let req = builder.build(&lid_query());

        let sent = transport
            .send(agent, &req, SendOptions::default())
            .expect("send");
        assert_eq!(sent, MAD_SIZE);

        assert_eq!(
            transport.poll(Duration::from_secs(1)).expect("poll"),
            PollStatus::Ready
        );
        let (reply, len) = transport.receive().expect("receive");
        assert_eq!(len, MAD_SIZE);
        assert_eq!(reply.wire_id(), req.wire_id());
        assert_eq!(reply.method, METHOD_GET_RESP);
        assert_eq!(reply.addressing, Addressing::Lid(3));
        assert_eq!(&reply.data[..7], b"node-a\0");
        assert_eq!(transport.stats().delivered, 1);
    }

    #[test]
    fn test_directed_reply_sets_direction_bit() {
        let mut transport = SimTransport::echo(Duration::ZERO);
        let agent = transport
            .register(MgmtClass::DirectedRoute)
            .expect("register");
        let query = Query::new(
            Addressing::Directed(DrPath::parse("0,1").expect("route")),
            Method::Get,
            0x10,
            0,
        );
        let req = PacketBuilder::new().build(&query);
        transport
            .send(agent, &req, SendOptions::default())
            .expect("send");

        let (reply, _) = transport.receive().expect("receive");
        assert_eq!(reply.status, DR_DIRECTION_BIT);
        assert_eq!(reply.status_code(), 0);
        assert_eq!(reply.addressing, query.addressing);
    }

    #[test]
    fn test_poll_times_out_when_idle() {
        let mut transport = SimTransport::echo(Duration::ZERO);
        assert_eq!(
            transport.poll(Duration::from_millis(1)).expect("poll"),
            PollStatus::TimedOut
        );
        assert!(matches!(
            transport.receive(),
            Err(TransportError::Receive(_))
        ));
    }

    #[test]
    fn test_loss_surfaces_as_timeout() {
        let mut transport = SimTransport::new(SimTransportConfig::default().with_loss(1.0));
        let agent = transport.register(MgmtClass::LidRouted).expect("register");
        let req = PacketBuilder::new().build(&lid_query());
        let opts = SendOptions {
            timeout_ms: 1,
            retries: 0,
        };
        transport.send(agent, &req, opts).expect("send");

        assert_eq!(
            transport.poll(Duration::from_secs(1)).expect("poll"),
            PollStatus::Ready
        );
        match transport.receive() {
            Err(TransportError::ReceiveTimeout { correlation }) => {
                assert_eq!(correlation, Some(req.wire_id()));
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(transport.stats().dropped, 1);
    }

    #[test]
    fn test_send_requires_matching_agent() {
        let mut transport = SimTransport::echo(Duration::ZERO);
        let agent = transport
            .register(MgmtClass::DirectedRoute)
            .expect("register");
        let req = PacketBuilder::new().build(&lid_query());
        assert!(matches!(
            transport.send(agent, &req, SendOptions::default()),
            Err(TransportError::Send(_))
        ));
        assert!(matches!(
            transport.send(9, &req, SendOptions::default()),
            Err(TransportError::Send(_))
        ));
    }

    #[test]
    fn test_closed_transport_rejects_io() {
        let mut transport = SimTransport::echo(Duration::ZERO);
        let agent = transport.register(MgmtClass::LidRouted).expect("register");
        transport.close();
        let req = PacketBuilder::new().build(&lid_query());
        assert!(matches!(
            transport.send(agent, &req, SendOptions::default()),
            Err(TransportError::Closed)
        ));
        assert!(matches!(
            transport.poll(Duration::ZERO),
            Err(TransportError::Closed)
        ));
    }
}
