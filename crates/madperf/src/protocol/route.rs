// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Directed-route path parsing.
//!
//! A directed route is written as a comma-separated list of outgoing port
//! numbers, hop 0 first:
//!
//! ```text
//! 0,1,2,3,5   -> hop_cnt = 4, path = [0, 1, 2, 3, 5]
//! 0           -> hop_cnt = 0 (local query)
//! ```

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Maximum number of path entries carried in an SMP initial path.
pub const MAX_PATH_LEN: usize = 64;

/// Maximum hop count (`MAX_PATH_LEN - 1`).
pub const MAX_HOPS: u8 = (MAX_PATH_LEN - 1) as u8;

/// Errors produced while parsing or building a directed route.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteError {
    #[error("empty route")]
    Empty,

    #[error("empty hop at position {0}")]
    EmptyHop(usize),

    #[error("invalid hop '{token}' at position {position}")]
    InvalidHop { position: usize, token: String },

    #[error("route has {0} entries, at most {} allowed", MAX_PATH_LEN)]
    TooLong(usize),
}

/// Validated directed-route path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DrPath {
    path: Vec<u8>,
}

impl DrPath {
    /// Build a path from raw hop bytes (hop 0 first).
    pub fn from_hops(hops: &[u8]) -> Result<Self, RouteError> {
        if hops.is_empty() {
            return Err(RouteError::Empty);
        }
        if hops.len() > MAX_PATH_LEN {
            return Err(RouteError::TooLong(hops.len()));
        }
        Ok(Self {
            path: hops.to_vec(),
        })
    }

    /// Parse a comma-separated route string.
    pub fn parse(s: &str) -> Result<Self, RouteError> {
        if s.trim().is_empty() {
            return Err(RouteError::Empty);
        }

        let mut path = Vec::with_capacity(8);
        for (position, token) in s.split(',').enumerate() {
            let token = token.trim();
            if token.is_empty() {
                return Err(RouteError::EmptyHop(position));
            }
            if path.len() == MAX_PATH_LEN {
                return Err(RouteError::TooLong(s.split(',').count()));
            }
            let hop = token.parse::<u8>().map_err(|_| RouteError::InvalidHop {
                position,
                token: token.to_string(),
            })?;
            path.push(hop);
        }

        log::trace!("[route] parsed '{}' -> {:?}", s, path);
        Ok(Self { path })
    }

    /// Number of hops (path entries minus one).
    pub fn hop_cnt(&self) -> u8 {
        (self.path.len() - 1) as u8
    }

    /// Path entries `[0..=hop_cnt]`.
    pub fn hops(&self) -> &[u8] {
        &self.path
    }
}

impl FromStr for DrPath {
    type Err = RouteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for DrPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, hop) in self.path.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", hop)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_multi_hop() {
        let path = DrPath::parse("0,1,2,3,5").expect("parse");
        assert_eq!(path.hop_cnt(), 4);
        assert_eq!(path.hops(), &[0, 1, 2, 3, 5]);
    }

    #[test]
    fn test_parse_local() {
        let path = DrPath::parse("0").expect("parse");
        assert_eq!(path.hop_cnt(), 0);
        assert_eq!(path.hops(), &[0]);
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert_eq!(DrPath::parse(""), Err(RouteError::Empty));
        assert_eq!(DrPath::parse("  "), Err(RouteError::Empty));
    }

    #[test]
    fn test_parse_rejects_stray_commas() {
        assert_eq!(DrPath::parse(",0,1"), Err(RouteError::EmptyHop(0)));
        assert_eq!(DrPath::parse("0,1,"), Err(RouteError::EmptyHop(2)));
        assert_eq!(DrPath::parse("0,,1"), Err(RouteError::EmptyHop(1)));
    }

    #[test]
    fn test_parse_rejects_non_numeric() {
        let err = DrPath::parse("0,1,x,2").unwrap_err();
        assert_eq!(
            err,
            RouteError::InvalidHop {
                position: 2,
                token: "x".into()
            }
        );
    }

    #[test]
    fn test_parse_rejects_out_of_byte_range() {
        assert!(matches!(
            DrPath::parse("0,256"),
            Err(RouteError::InvalidHop { position: 1, .. })
        ));
        assert!(matches!(
            DrPath::parse("0,-1"),
            Err(RouteError::InvalidHop { position: 1, .. })
        ));
    }

    #[test]
    fn test_hop_limit() {
        let max = vec!["1"; MAX_PATH_LEN].join(",");
        let path = DrPath::parse(&max).expect("64 entries");
        assert_eq!(path.hop_cnt(), MAX_HOPS);

        let over = vec!["1"; MAX_PATH_LEN + 1].join(",");
        assert_eq!(
            DrPath::parse(&over),
            Err(RouteError::TooLong(MAX_PATH_LEN + 1))
        );
        assert_eq!(
            DrPath::from_hops(&[0u8; MAX_PATH_LEN + 1]),
            Err(RouteError::TooLong(MAX_PATH_LEN + 1))
        );
    }

    #[test]
    fn test_display_round_trips() {
        let path = DrPath::parse("0, 1,2").expect("parse");
        assert_eq!(path.to_string(), "0,1,2");
        assert_eq!("0,1,2".parse::<DrPath>().expect("parse"), path);
    }
}
