//! Client configuration.
//!
//! Three small config structs, one per layer: the per-broker connection,
//! the router, and the producer-facing knobs. All have conservative
//! defaults; construct with struct-update syntax:
//!
//! ```rust
//! use std::time::Duration;
//! use samovar::config::ConnectionConfig;
//!
//! let config = ConnectionConfig {
//!     request_timeout: Duration::from_secs(5),
//!     ..ConnectionConfig::default()
//! };
//! ```

use std::time::Duration;

use crate::error::{Error, Result};
use crate::protocol::messages::Compression;

/// Write acknowledgements required for a produce request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(i16)]
pub enum Acks {
    /// Leader and all in-sync replicas. The broker holds the response up
    /// to the configured ack timeout.
    All = -1,
    /// No acknowledgement; the broker sends no response at all.
    None = 0,
    /// Leader only.
    Leader = 1,
}

impl Acks {
    pub fn as_i16(self) -> i16 {
        self as i16
    }
}

/// Settings for a single broker connection.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Deadline for a request: elapsed time between handing bytes to the
    /// transport and the matched response arriving.
    pub request_timeout: Duration,
    /// Upper bound on any single TCP connect attempt.
    pub connecting_timeout: Duration,
    /// How many times the transport retries a failed connect before
    /// surfacing a connection error to every pending request.
    pub max_reconnect_attempts: usize,
    /// Count bytes in/out on the connection's telemetry counters.
    pub track_telemetry: bool,
    /// Responses claiming to be larger than this fault the connection.
    pub max_frame_size: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(10),
            connecting_timeout: Duration::from_secs(5),
            max_reconnect_attempts: 5,
            track_telemetry: false,
            max_frame_size: crate::constants::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

/// A bounded backoff schedule: attempts plus the delay envelope.
#[derive(Clone, Copy, Debug)]
pub struct RetrySchedule {
    /// Maximum number of retries after the first attempt.
    pub max_retries: usize,
    /// Delay before the first retry.
    pub min_delay: Duration,
    /// Ceiling for the exponential backoff.
    pub max_delay: Duration,
}

impl Default for RetrySchedule {
    fn default() -> Self {
        Self {
            max_retries: 3,
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(3),
        }
    }
}

/// Settings for the router and its metadata cache.
#[derive(Clone, Debug)]
pub struct RouterConfig {
    /// How long a cached topic entry is considered fresh. `None` means
    /// entries never expire on age alone.
    pub cache_expiration: Option<Duration>,
    /// Schedule for metadata refresh attempts.
    pub refresh_retry: RetrySchedule,
    /// Schedule for the request dispatch loop (resolve, send, inspect,
    /// retry).
    pub dispatch_retry: RetrySchedule,
    /// Client id stamped on every request this router issues.
    pub client_id: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            cache_expiration: Some(Duration::from_secs(60)),
            refresh_retry: RetrySchedule::default(),
            dispatch_retry: RetrySchedule::default(),
            client_id: crate::constants::DEFAULT_CLIENT_ID.to_string(),
        }
    }
}

/// Producer-facing knobs consumed by [`crate::router::Router::produce`].
#[derive(Clone, Debug)]
pub struct ProducerConfig {
    /// Acknowledgement level. [`Acks::None`] turns a produce into
    /// fire-and-forget: the broker sends no response.
    pub acks: Acks,
    /// Server-side bound on how long the leader waits for replica acks.
    pub ack_timeout: Duration,
    /// Compression codec for produced message sets.
    pub codec: Compression,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        Self {
            acks: Acks::Leader,
            ack_timeout: Duration::from_secs(1),
            codec: Compression::None,
        }
    }
}

impl ProducerConfig {
    /// Reject configurations the protocol cannot express.
    pub fn validate(&self) -> Result<()> {
        let timeout_ms = self.ack_timeout.as_millis();
        if timeout_ms > i32::MAX as u128 {
            return Err(Error::Config(format!(
                "ack_timeout {}ms exceeds the protocol's i32 range",
                timeout_ms
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acks_wire_values() {
        assert_eq!(Acks::All.as_i16(), -1);
        assert_eq!(Acks::None.as_i16(), 0);
        assert_eq!(Acks::Leader.as_i16(), 1);
    }

    #[test]
    fn test_connection_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert!(config.max_reconnect_attempts >= 1);
        assert!(!config.track_telemetry);
    }

    #[test]
    fn test_producer_config_validate() {
        assert!(ProducerConfig::default().validate().is_ok());

        let bad = ProducerConfig {
            ack_timeout: Duration::from_secs(u64::MAX / 2),
            ..ProducerConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
