// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Crate-level error type.

use crate::config::ConfigError;
use crate::inflight::InFlightError;
use crate::protocol::RouteError;
use crate::transport::TransportError;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Every failure that ends a run.
#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid route: {0}")]
    Route(#[from] RouteError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("dangling reply: tid 0x{0:08x} matches no outstanding request")]
    DanglingReply(u32),

    #[error("internal error: slot {0} out of range")]
    Slot(usize),
}

impl From<InFlightError> for Error {
    fn from(e: InFlightError) -> Self {
        match e {
            InFlightError::Empty => {
                Self::Config(ConfigError::Invalid("queue depth must be at least 1".into()))
            }
            InFlightError::DanglingReply(id) => Self::DanglingReply(id),
            InFlightError::NoSuchSlot(i) => Self::Slot(i),
            InFlightError::Transport(e) => Self::Transport(e),
        }
    }
}
