//!
//! Execution context configuration.
//!
//! An execution context is described by a small TOML document, e.g.
//!
//! ```toml
//! type = "rt_preempt"
//! rate = 1000.0
//! priority = 80
//! policy = "fifo"
//! wait_offset_ns = -20000
//! lock_memory = true
//!
//! [properties]
//! name = "arm_controller_ec"
//! ```
//!
//! Every field is optional; missing values fall back to the defaults
//! below.  The `type` selects the wait strategy through the factory
//! registry.
//!

use std::{fs, path::Path};

use serde::Deserialize;
use tracing::debug;

use rtec_core::{ExecutionKind, Properties};

use crate::{
    error::{EcError, Result},
    profile::rate_to_period,
};

/// The default period of an execution context (in seconds)
pub const DEFAULT_PERIOD: f64 = 0.000001;

/// The default rate of an execution context (in Hz)
pub const DEFAULT_RATE: f64 = 1.0 / DEFAULT_PERIOD;

/// The default real-time priority of the worker
pub const DEFAULT_PRIORITY: i32 = 49;

/// The strategy used when no `type` is configured
pub const DEFAULT_TYPE: &str = "periodic";

/// Linux scheduling policy for the worker of a real-time execution context
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum SchedPolicy {
    /// `SCHED_FIFO`
    #[default]
    #[serde(rename = "fifo")]
    Fifo,
    /// `SCHED_RR`
    #[serde(rename = "rr")]
    RoundRobin,
    /// `SCHED_OTHER`, the standard time-sharing policy
    #[serde(rename = "other")]
    Other,
}

impl SchedPolicy {
    /// Whether this policy is a real-time policy with priorities 1..=99
    pub fn is_realtime(&self) -> bool {
        !matches!(self, SchedPolicy::Other)
    }
}

/// Configuration of a single execution context
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EcConfig {
    /// The name of the factory creating the wait strategy
    #[serde(rename = "type")]
    pub type_name: String,
    /// The rate (in Hz)
    pub rate: f64,
    /// Override of the timing model reported by the strategy
    pub kind: Option<String>,
    /// The scheduling priority of a real-time worker
    pub priority: i32,
    /// The scheduling policy of a real-time worker
    pub policy: SchedPolicy,
    /// Signed offset (in nanoseconds) applied to every absolute wake-up
    /// time of a real-time worker
    pub wait_offset_ns: i64,
    /// Whether a real-time worker locks the process memory
    pub lock_memory: bool,
    /// Extra properties copied into the profile
    pub properties: Properties,
}

impl Default for EcConfig {
    fn default() -> Self {
        Self {
            type_name: DEFAULT_TYPE.into(),
            rate: DEFAULT_RATE,
            kind: None,
            priority: DEFAULT_PRIORITY,
            policy: SchedPolicy::default(),
            wait_offset_ns: 0,
            lock_memory: false,
            properties: Properties::new(),
        }
    }
}

impl EcConfig {
    /// A default configuration for the given strategy
    pub fn with_type(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            ..Default::default()
        }
    }

    /// Set the rate (in Hz)
    pub fn rate(mut self, rate: f64) -> Self {
        self.rate = rate;
        self
    }

    /// Decode and validate a TOML document
    pub fn from_toml_str(document: &str) -> Result<Self> {
        let config: EcConfig = toml::from_str(document)?;
        config.validate()?;
        debug!(strategy = %config.type_name, rate = config.rate, "configuration loaded");
        Ok(config)
    }

    /// Read, decode and validate a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let document = fs::read_to_string(path)?;
        Self::from_toml_str(&document)
    }

    /// Check the values that cannot be checked while decoding
    pub fn validate(&self) -> Result<()> {
        rate_to_period(self.rate)?;
        self.execution_kind()?;
        Ok(())
    }

    /// The configured timing model override, if any
    pub fn execution_kind(&self) -> Result<Option<ExecutionKind>> {
        self.kind
            .as_deref()
            .map(|kind| {
                kind.parse::<ExecutionKind>()
                    .map_err(|_| EcError::BadParameter(format!("unknown execution kind '{}'", kind)))
            })
            .transpose()
    }
}
