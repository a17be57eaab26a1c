use std::time::Duration;

use crate::backoff::DEFAULT_MAX_BACKOFF;
use crate::decode::DecodeLevel;

/// Scheduler tick used when none, or a zero one, is configured
pub(crate) const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// Timing, retry and batching parameters of one physical link
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialization", serde(rename_all = "camelCase", default))]
pub struct LinkConfig {
    /// bound on a single transaction, also applied to opening the link
    #[cfg_attr(feature = "serialization", serde(with = "millis"))]
    pub timeout: Duration,
    /// additional attempts made by a write after a transport error
    pub retry: u8,
    /// minimum spacing between the end of one transaction and the start of the next,
    /// also the quiet window after a write during which polling is deferred
    #[cfg_attr(feature = "serialization", serde(with = "millis"))]
    pub min_interval: Duration,
    /// maximum register span of a read group
    pub max_batch_span: u16,
    /// maximum register span of a merged holding register write
    pub max_write_span: u16,
    /// keep the transport open across transactions until an error occurs
    pub keep_alive: bool,
    /// ceiling of the backed-off polling period
    #[cfg_attr(feature = "serialization", serde(with = "millis"))]
    pub max_backoff: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(1000),
            retry: 3,
            min_interval: Duration::from_millis(100),
            max_batch_span: 32,
            max_write_span: 32,
            keep_alive: true,
            max_backoff: DEFAULT_MAX_BACKOFF,
        }
    }
}

/// Configuration of one connection task
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serialization", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serialization", serde(rename_all = "camelCase", default))]
pub struct ConnectionConfig {
    /// name used in the tracing span of the task
    pub name: String,
    /// start polling immediately
    pub enabled: bool,
    /// resolution of the scheduler tick
    #[cfg_attr(feature = "serialization", serde(with = "millis"))]
    pub tick: Duration,
    /// link parameters
    pub link: LinkConfig,
    /// initial decode level
    pub decode: DecodeLevel,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            name: "connection".to_string(),
            enabled: true,
            tick: DEFAULT_TICK,
            link: LinkConfig::default(),
            decode: DecodeLevel::default(),
        }
    }
}

impl ConnectionConfig {
    /// Create a configuration with the given name and default values
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Replace the link parameters
    pub fn with_link(mut self, link: LinkConfig) -> Self {
        self.link = link;
        self
    }

    /// Replace the initial decode level
    pub fn with_decode(mut self, decode: DecodeLevel) -> Self {
        self.decode = decode;
        self
    }
}

/// Durations are integer milliseconds on the wire, duration text such as `"1m30s"` is also accepted
#[cfg(feature = "serialization")]
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub(super) fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum DurationHelper {
            Millis(u64),
            Text(String),
        }

        match DurationHelper::deserialize(deserializer)? {
            DurationHelper::Millis(ms) => Ok(Duration::from_millis(ms)),
            DurationHelper::Text(text) => {
                crate::point::parse_duration(&text).map_err(serde::de::Error::custom)
            }
        }
    }
}
