//! Configuration structures for the latency probe.
//!
//! Supports TOML deserialization with sensible defaults for
//! simulation runs and explicit values for deployment.

use crate::net::{default_destination, WKP_UDP_INJECT};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv6Addr;
use std::path::PathBuf;
use std::time::Duration;

/// Smallest packet buffer able to carry a probe datagram plus compressed
/// UDP/IPv6 headers.
pub const MIN_BUFFER_SIZE: usize = 48;

/// Top-level probe configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Probe application settings.
    pub probe: ProbeSettings,

    /// Cooperative scheduler settings.
    pub scheduler: SchedulerConfig,

    /// Simulated host stack settings.
    pub stack: StackConfig,

    /// Trigger pulse generator.
    pub trigger: TriggerConfig,

    /// Latency metrics settings.
    pub metrics: MetricsConfig,
}

/// Probe application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeSettings {
    /// UDP port used as both source and destination.
    pub port: u16,

    /// Collector address.
    pub destination: Ipv6Addr,

    /// Priority class of the probe task.
    pub priority: TaskPriority,
}

impl Default for ProbeSettings {
    fn default() -> Self {
        Self {
            port: WKP_UDP_INJECT,
            destination: default_destination(),
            priority: TaskPriority::Coap,
        }
    }
}

/// Priority classes of the cooperative scheduler, most urgent first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// MAC reception notifications.
    MacRx,
    /// MAC transmit-done notifications.
    MacTxDone,
    /// Schedule management.
    Sixtop,
    /// Latency-sensitive request/response traffic.
    #[default]
    Coap,
    /// Routing maintenance.
    Rpl,
    /// Plain UDP applications.
    Udp,
    /// Everything else.
    Background,
}

impl TaskPriority {
    /// Number of priority classes.
    pub const COUNT: usize = 7;

    /// All classes, most urgent first.
    pub const ALL: [TaskPriority; Self::COUNT] = [
        Self::MacRx,
        Self::MacTxDone,
        Self::Sixtop,
        Self::Coap,
        Self::Rpl,
        Self::Udp,
        Self::Background,
    ];

    /// Zero-based index, 0 being the most urgent class.
    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for TaskPriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::MacRx => "mac_rx",
            Self::MacTxDone => "mac_tx_done",
            Self::Sixtop => "sixtop",
            Self::Coap => "coap",
            Self::Rpl => "rpl",
            Self::Udp => "udp",
            Self::Background => "background",
        };
        f.write_str(name)
    }
}

/// Cooperative scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Maximum number of pending tasks across all priority classes.
    pub queue_depth: usize,

    /// How long the scheduler parks when idle before re-checking.
    #[serde(with = "humantime_serde")]
    pub idle_park: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_depth: 20,
            idle_park: Duration::from_millis(50),
        }
    }
}

/// Simulated host stack configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Number of packet buffers in the pool.
    pub buffer_count: usize,

    /// Size of each packet buffer in bytes.
    pub buffer_size: usize,

    /// Free-running timer frequency.
    pub timer_hz: u32,

    /// TSCH slot duration.
    #[serde(with = "humantime_serde")]
    pub slot_duration: Duration,

    /// Whether the sender starts synchronized to the network.
    pub synchronized: bool,

    /// Link behaviour for accepted sends.
    pub link: LinkConfig,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            buffer_count: 10,
            buffer_size: 127,
            timer_hz: 32_768,
            slot_duration: Duration::from_millis(15),
            synchronized: true,
            link: LinkConfig::Reliable,
        }
    }
}

/// Delivery outcome model for the simulated link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkConfig {
    /// Every accepted packet is delivered.
    #[default]
    Reliable,
    /// Every `fail_every`-th accepted packet fails after the send.
    Lossy {
        /// Failure period (must be non-zero).
        fail_every: u32,
    },
}

/// Trigger pulse generator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Number of rising edges to generate (0 = external triggers only).
    pub pulses: u32,

    /// Time between generated edges.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            pulses: 0,
            interval: Duration::from_secs(1),
        }
    }
}

/// Latency metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Size of the latency ring buffer.
    pub histogram_size: usize,

    /// Percentiles to report.
    pub percentiles: Vec<f64>,

    /// Latencies above this are counted as over budget.
    #[serde(with = "humantime_serde")]
    pub latency_budget: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            histogram_size: 10_000,
            percentiles: vec![50.0, 90.0, 99.0],
            latency_budget: Duration::from_millis(100),
        }
    }
}

impl ProbeConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or fails validation.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a value is out of range.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.probe.port == 0 {
            return invalid("probe.port must be non-zero");
        }
        if self.scheduler.queue_depth == 0 {
            return invalid("scheduler.queue_depth must be at least 1");
        }
        if self.stack.buffer_count == 0 {
            return invalid("stack.buffer_count must be at least 1");
        }
        if self.stack.buffer_size < MIN_BUFFER_SIZE {
            return Err(ConfigError::Invalid(format!(
                "stack.buffer_size must be at least {MIN_BUFFER_SIZE} bytes"
            )));
        }
        if self.stack.timer_hz == 0 {
            return invalid("stack.timer_hz must be non-zero");
        }
        if self.stack.slot_duration.is_zero() {
            return invalid("stack.slot_duration must be non-zero");
        }
        if let LinkConfig::Lossy { fail_every: 0 } = self.stack.link {
            return invalid("stack.link.fail_every must be non-zero");
        }
        Ok(())
    }
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File I/O error.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// TOML parsing error.
    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Serde helper module for `Duration` using humantime format.
mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}
