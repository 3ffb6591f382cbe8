// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Run configuration.
//!
//! Supports both programmatic and file-based configuration. The CLI fills a
//! [`RunConfig`] field by field; `--config` loads the same keys from TOML.

use crate::builder::Query;
use crate::engine::{EngineSettings, DEFAULT_POLL_INTERVAL};
use crate::protocol::{Addressing, DrPath, Method, MgmtClass, RouteError};
use crate::transport::{SendOptions, SimTransportConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid route: {0}")]
    Route(#[from] RouteError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Simulated transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimSettings {
    /// Use the simulated responder instead of a umad device.
    #[serde(default)]
    pub enabled: bool,

    /// Reply delay (microseconds).
    #[serde(default = "default_sim_delay_us")]
    pub delay_us: u64,

    /// Request loss probability (0.0 - 1.0).
    #[serde(default)]
    pub loss: f64,

    /// Reply payload, copied into the SMP data region.
    #[serde(default)]
    pub payload: Option<String>,
}

fn default_sim_delay_us() -> u64 {
    50
}

impl Default for SimSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            delay_us: default_sim_delay_us(),
            loss: 0.0,
            payload: None,
        }
    }
}

/// Complete description of one latency run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Addressing mode.
    #[serde(default = "default_class")]
    pub mgmt_class: MgmtClass,

    /// Destination LID, or a directed-route path such as `"0,1,2"`.
    #[serde(default)]
    pub target: String,

    /// SMP method code (1 = Get, 2 = Set).
    #[serde(default = "default_method")]
    pub method: u8,

    /// Attribute id; required.
    #[serde(default)]
    pub attr_id: Option<u16>,

    #[serde(default)]
    pub attr_mod: u32,

    /// Requests kept in flight.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Run length (seconds).
    #[serde(default = "default_run_time")]
    pub run_time_secs: u64,

    /// Transport retries per request.
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Transport timeout per attempt (milliseconds).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u32,

    /// HCA name; first device with `port` if unset.
    #[serde(default)]
    pub device: Option<String>,

    #[serde(default = "default_port")]
    pub port: u8,

    /// Print the reply payload as a string instead of a hex dump.
    #[serde(default)]
    pub string_output: bool,

    #[serde(default)]
    pub sim: SimSettings,
}

fn default_class() -> MgmtClass {
    MgmtClass::LidRouted
}

fn default_method() -> u8 {
    Method::Get.code()
}

fn default_queue_depth() -> usize {
    1
}

fn default_run_time() -> u64 {
    1
}

fn default_retries() -> u32 {
    3
}

fn default_timeout_ms() -> u32 {
    200
}

fn default_port() -> u8 {
    1
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            mgmt_class: default_class(),
            target: String::new(),
            method: default_method(),
            attr_id: None,
            attr_mod: 0,
            queue_depth: default_queue_depth(),
            run_time_secs: default_run_time(),
            retries: default_retries(),
            timeout_ms: default_timeout_ms(),
            device: None,
            port: default_port(),
            string_output: false,
            sim: SimSettings::default(),
        }
    }
}

impl RunConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Check everything that can be checked before a transport is opened.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if Method::from_code(self.method).is_none() {
            return Err(ConfigError::Invalid(format!(
                "method must be 1 (Get) or 2 (Set), got {}",
                self.method
            )));
        }
        if self.queue_depth == 0 {
            return Err(ConfigError::Invalid("queue depth must be at least 1".into()));
        }
        if self.run_time_secs == 0 {
            return Err(ConfigError::Invalid("run time must be at least 1 second".into()));
        }
        if !(0.0..=1.0).contains(&self.sim.loss) {
            return Err(ConfigError::Invalid(format!(
                "sim loss must be within 0.0..=1.0, got {}",
                self.sim.loss
            )));
        }
        self.addressing()?;
        if self.attr_id.is_none() {
            return Err(ConfigError::Invalid("no attribute id given".into()));
        }
        Ok(())
    }

    /// Resolve `target` for the configured class.
    pub fn addressing(&self) -> Result<Addressing, ConfigError> {
        if self.target.trim().is_empty() {
            return Err(ConfigError::Invalid("no destination given".into()));
        }
        match self.mgmt_class {
            MgmtClass::DirectedRoute => Ok(Addressing::Directed(DrPath::parse(&self.target)?)),
            MgmtClass::LidRouted => Ok(Addressing::Lid(parse_int(&self.target)?)),
        }
    }

    /// Query issued for the whole run.
    pub fn query(&self) -> Result<Query, ConfigError> {
        let method = Method::from_code(self.method)
            .ok_or_else(|| ConfigError::Invalid(format!("unknown method {}", self.method)))?;
        let attr_id = self
            .attr_id
            .ok_or_else(|| ConfigError::Invalid("no attribute id given".into()))?;
        Ok(Query::new(self.addressing()?, method, attr_id, self.attr_mod))
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            queue_depth: self.queue_depth,
            run_time: Duration::from_secs(self.run_time_secs),
            send: SendOptions {
                timeout_ms: self.timeout_ms,
                retries: self.retries,
            },
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn sim_config(&self) -> SimTransportConfig {
        let mut config = SimTransportConfig::echo(Duration::from_micros(self.sim.delay_us))
            .with_loss(self.sim.loss);
        if let Some(payload) = &self.sim.payload {
            config = config.with_payload(payload.as_bytes());
        }
        config
    }
}

/// Parse a decimal or `0x`-prefixed hexadecimal integer.
pub fn parse_int<T>(s: &str) -> Result<T, ConfigError>
where
    T: TryFrom<u64>,
{
    let s = s.trim();
    let value = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse::<u64>(),
    }
    .map_err(|_| ConfigError::Invalid(format!("'{}' is not an integer", s)))?;

    T::try_from(value).map_err(|_| ConfigError::Invalid(format!("{} is out of range", s)))
}
