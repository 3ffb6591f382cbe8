// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! InfiniBand SMP Query Latency Engine
//!
//! Keeps a fixed number of Subnet Management Packet queries in flight
//! against one target, re-issuing each as soon as its reply arrives, and
//! reports latency and throughput for the run.
//!
//! # Features
//!
//! - **Directed-route and LID-routed SMPs**: byte-exact 256-byte MAD codec
//! - **Pipelining**: configurable queue depth, linear-scan reply matching
//! - **Statistics**: min/max/average latency, bandwidth, packet rate
//! - **Transports**: Linux `umad` devices, or an in-process simulator
//!
//! # Quick Start
//!
//! ```bash
//! # NodeInfo over a two-hop directed route, 8 requests in flight, 5 s
//! madperf-probe -D 0,1,2 0x11 -N 8 -t 5
//!
//! # Same query against the simulated responder
//! madperf-probe --sim --sim-delay-us 500 -D 0,1,2 0x11 -N 8
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! mgmt_class = "directed-route"
//! target = "0,1,2"
//! attr_id = 0x11
//! queue_depth = 8
//! run_time_secs = 5
//!
//! [sim]
//! enabled = true
//! delay_us = 500
//! ```

pub mod builder;
pub mod config;
pub mod engine;
pub mod error;
pub mod inflight;
pub mod protocol;
pub mod stats;
pub mod transport;

pub use builder::{PacketBuilder, Query, CORRELATION_SEED};
pub use config::{ConfigError, RunConfig, SimSettings};
pub use engine::{EngineSettings, PipelineEngine, RunReport};
pub use error::{Error, Result};
pub use inflight::{Completion, InFlightError, InFlightTable};
pub use protocol::{Addressing, DrPath, Method, MgmtClass, RouteError, SmpPacket};
pub use stats::{StatsCollector, StatsReport};
pub use transport::{
    AgentId, PollStatus, SendOptions, SimTransport, SimTransportConfig, Transport, TransportError,
};

#[cfg(target_os = "linux")]
pub use transport::UmadTransport;
