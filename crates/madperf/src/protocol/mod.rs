// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! SMP wire format and directed-route paths.

pub mod route;
pub mod smp;

pub use route::{DrPath, RouteError, MAX_HOPS, MAX_PATH_LEN};
pub use smp::{
    Addressing, DecodeError, Method, MgmtClass, SmpPacket, DR_DIRECTION_BIT, MAD_SIZE,
    METHOD_GET_RESP, PERMISSIVE_LID, SENTINEL_FILL, SMP_DATA_SIZE,
};
