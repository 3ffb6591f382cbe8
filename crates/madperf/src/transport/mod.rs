// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! MAD transports.
//!
//! The pipeline only needs a handful of primitives from the layer that
//! moves MADs on and off the fabric:
//!
//! ```ignore
//! pub trait Transport {
//!     fn register(&mut self, class: MgmtClass) -> Result<AgentId, TransportError>;
//!     fn send(&mut self, agent: AgentId, pkt: &SmpPacket, opts: SendOptions) -> Result<usize, TransportError>;
//!     fn poll(&mut self, timeout: Duration) -> Result<PollStatus, TransportError>;
//!     fn receive(&mut self) -> Result<(SmpPacket, usize), TransportError>;
//!     fn close(&mut self);
//! }
//! ```
//!
//! # Implementations
//!
//! - `UmadTransport` - Linux user MAD device (`/dev/infiniband/umadN`)
//! - `SimTransport` - in-process responder with delay/loss

pub mod sim;
#[cfg(target_os = "linux")]
pub mod umad;

pub use sim::{SimTransport, SimTransportConfig, SimTransportStats};
#[cfg(target_os = "linux")]
pub use umad::UmadTransport;

use crate::protocol::{DecodeError, MgmtClass, SmpPacket};
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Handle returned by [`Transport::register`].
pub type AgentId = u32;

/// Transport failures.
///
/// Only [`TransportError::ReceiveTimeout`] is recoverable for the pipeline.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("device unavailable ({device}:{port}): {reason}")]
    DeviceUnavailable {
        device: String,
        port: u8,
        reason: String,
    },

    #[error("agent registration failed for {class}: {source}")]
    Register {
        class: MgmtClass,
        #[source]
        source: io::Error,
    },

    #[error("send failed: {0}")]
    Send(#[source] io::Error),

    #[error("poll failed: {0}")]
    Poll(#[source] io::Error),

    #[error("request timed out on the transport (tid {})", fmt_tid(.correlation))]
    ReceiveTimeout { correlation: Option<u32> },

    #[error("receive failed: {0}")]
    Receive(String),

    #[error("malformed MAD: {0}")]
    Decode(#[from] DecodeError),

    #[error("transport closed")]
    Closed,
}

fn fmt_tid(correlation: &Option<u32>) -> String {
    match correlation {
        Some(id) => format!("0x{:08x}", id),
        None => "unknown".to_string(),
    }
}

/// Result of [`Transport::poll`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// A MAD (reply or timed-out request) can be received.
    Ready,
    /// Nothing arrived within the wait.
    TimedOut,
}

/// Per-send transport parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendOptions {
    /// Time the transport waits for a response before retrying.
    pub timeout_ms: u32,
    /// Transport-level retries before reporting a timeout.
    pub retries: u32,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            timeout_ms: 200,
            retries: 3,
        }
    }
}

/// MAD send/receive primitives used by the pipeline.
///
/// Opening a transport is implementation specific (constructor).
pub trait Transport {
    /// Register an agent for a management class.
    fn register(&mut self, class: MgmtClass) -> Result<AgentId, TransportError>;

    /// Transmit a request; returns the MAD byte length sent.
    fn send(
        &mut self,
        agent: AgentId,
        pkt: &SmpPacket,
        opts: SendOptions,
    ) -> Result<usize, TransportError>;

    /// Wait up to `timeout` for something to receive.
    fn poll(&mut self, timeout: Duration) -> Result<PollStatus, TransportError>;

    /// Take the next reply and its MAD byte length.
    ///
    /// A request that exhausted its retries surfaces as
    /// [`TransportError::ReceiveTimeout`].
    fn receive(&mut self) -> Result<(SmpPacket, usize), TransportError>;

    /// Release agents and the underlying device.
    fn close(&mut self);

    /// Human readable endpoint, for reports.
    fn describe(&self) -> String;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn register(&mut self, class: MgmtClass) -> Result<AgentId, TransportError> {
        (**self).register(class)
    }

    fn send(
        &mut self,
        agent: AgentId,
        pkt: &SmpPacket,
        opts: SendOptions,
    ) -> Result<usize, TransportError> {
        (**self).send(agent, pkt, opts)
    }

    fn poll(&mut self, timeout: Duration) -> Result<PollStatus, TransportError> {
        (**self).poll(timeout)
    }

    fn receive(&mut self) -> Result<(SmpPacket, usize), TransportError> {
        (**self).receive()
    }

    fn close(&mut self) {
        (**self).close();
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_display() {
        let known = TransportError::ReceiveTimeout {
            correlation: Some(0x124),
        };
        assert_eq!(
            known.to_string(),
            "request timed out on the transport (tid 0x00000124)"
        );
        let unknown = TransportError::ReceiveTimeout { correlation: None };
        assert!(unknown.to_string().ends_with("(tid unknown)"));
    }

    #[test]
    fn test_send_options_default() {
        let opts = SendOptions::default();
        assert_eq!(opts.timeout_ms, 200);
        assert_eq!(opts.retries, 3);
    }
}
