// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pipelined request/response engine.
//!
//! # Phases
//!
//! ```text
//! warm-up:   build queue_depth requests -> send_all
//! steady:    poll -> receive -> complete -> record -> rebuild -> resend
//!            (until run_time has elapsed)
//! ```
//!
//! The loop is single-threaded. Concurrency means `queue_depth` requests on
//! the wire at once, not threads. The deadline is checked between cycles
//! only; a request in flight when it expires is not collected.

use crate::builder::{PacketBuilder, Query};
use crate::error::{Error, Result};
use crate::inflight::InFlightTable;
use crate::protocol::SmpPacket;
use crate::stats::{StatsCollector, StatsReport};
use crate::transport::{AgentId, PollStatus, SendOptions, Transport, TransportError};
use std::time::{Duration, Instant};

/// Longest single wait on the transport.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Run parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Requests kept outstanding at once.
    pub queue_depth: usize,
    /// Wall-clock length of the steady-state phase.
    pub run_time: Duration,
    /// Transport timeout/retries handed to every send.
    pub send: SendOptions,
    /// Upper bound for one poll wait.
    pub poll_interval: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            queue_depth: 1,
            run_time: Duration::from_secs(1),
            send: SendOptions::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub stats: StatsReport,
    /// Time from warm-up to loop exit.
    pub elapsed: Duration,
    /// Last matched reply, if any.
    pub last_reply: Option<SmpPacket>,
    /// Requests still on the wire when the deadline hit.
    pub outstanding_at_exit: usize,
}

/// Drives the send/poll/receive/re-issue loop over a [`Transport`].
pub struct PipelineEngine<T: Transport> {
    transport: T,
    agent: AgentId,
    query: Query,
    builder: PacketBuilder,
    settings: EngineSettings,
}

impl<T: Transport> PipelineEngine<T> {
    /// Register an agent for the query's class on `transport`.
    pub fn new(mut transport: T, query: Query, settings: EngineSettings) -> Result<Self> {
        if settings.queue_depth == 0 {
            return Err(crate::inflight::InFlightError::Empty.into());
        }
        let agent = transport.register(query.addressing.class())?;
        Ok(Self {
            transport,
            agent,
            query,
            builder: PacketBuilder::new(),
            settings,
        })
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Give back the transport (e.g. to close it).
    pub fn into_transport(self) -> T {
        self.transport
    }

    /// Execute one run. Any fatal transport or protocol error aborts it.
    pub fn run(&mut self) -> Result<RunReport> {
        let EngineSettings {
            queue_depth,
            run_time,
            send,
            poll_interval,
        } = self.settings;

        let mut stats = StatsCollector::new();
        let packets = (0..queue_depth)
            .map(|_| self.builder.build(&self.query))
            .collect();
        let mut table = InFlightTable::new(packets)?;
        let mut last_reply = None;

        log::info!(
            "[engine] starting: {} {} attr 0x{:04x} mod 0x{:x}, depth {}, {:?}",
            self.query.method,
            self.query.addressing,
            self.query.attr_id,
            self.query.attr_mod,
            queue_depth,
            run_time
        );

        let start = Instant::now();
        table.send_all(&mut self.transport, self.agent, send, &mut stats)?;

        loop {
            let elapsed = start.elapsed();
            if elapsed >= run_time {
                break;
            }
            let wait = poll_interval.min(run_time - elapsed);

            if self.transport.poll(wait)? == PollStatus::TimedOut {
                continue;
            }

            let (reply, len) = match self.transport.receive() {
                Ok(received) => received,
                Err(TransportError::ReceiveTimeout { correlation }) => {
                    stats.record_timeout();
                    let slot = correlation.and_then(|id| table.expire(id));
                    log::debug!(
                        "[engine] timeout (tid {:?}, slot {:?}), {} outstanding",
                        correlation,
                        slot,
                        table.outstanding()
                    );
                    continue;
                }
                Err(e) => return Err(Error::Transport(e)),
            };
            let received_at = Instant::now();

            let done = table.complete(reply.wire_id(), received_at)?;
            stats.record_receive(len, done.latency.as_micros() as u64);

            if reply.status_code() != 0 {
                log::warn!(
                    "[engine] SMP status 0x{:04x} on tid 0x{:08x}",
                    reply.status_code(),
                    reply.wire_id()
                );
            }

            let next = self.builder.build(&self.query);
            table.resend(
                done.slot,
                next,
                &mut self.transport,
                self.agent,
                send,
                &mut stats,
            )?;
            last_reply = Some(reply);
        }

        let elapsed = start.elapsed();
        let report = stats.report();
        log::info!(
            "[engine] done in {:?}: sent={} received={} timeouts={} outstanding={}",
            elapsed,
            report.sent_total,
            report.received_total,
            report.timeout_total,
            table.outstanding()
        );

        Ok(RunReport {
            stats: report,
            elapsed,
            last_reply,
            outstanding_at_exit: table.outstanding(),
        })
    }
}
