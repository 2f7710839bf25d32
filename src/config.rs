use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::idle::IdleStrategyKind;
use crate::message::{MessageError, TIMESTAMP_LENGTH};
use crate::transport::udp::STREAM_HEADER_LENGTH;
use crate::transport::{Channel, TransportError};

pub const DEFAULT_PING_CHANNEL: &str = "udp://localhost:40123";
pub const DEFAULT_PONG_CHANNEL: &str = "udp://localhost:40124";
pub const DEFAULT_PING_STREAM_ID: i32 = 10;
pub const DEFAULT_PONG_STREAM_ID: i32 = 10;
pub const DEFAULT_MESSAGE_COUNT: u64 = 10_000;
pub const DEFAULT_WARMUP_MESSAGE_COUNT: u64 = 10_000;
pub const DEFAULT_WARMUP_ITERATIONS: u64 = 5;
pub const DEFAULT_MESSAGE_LENGTH: usize = 32;
pub const DEFAULT_FRAGMENT_LIMIT: usize = 10;
pub const DEFAULT_SEND_PAUSE: Duration = Duration::from_millis(1);
pub const DEFAULT_HIGHEST_TRACKABLE: Duration = Duration::from_millis(500);
pub const DEFAULT_SIGNIFICANT_DIGITS: u8 = 3;

/// Largest payload that still fits a datagram next to the stream header.
pub const MAX_MESSAGE_LENGTH: usize = 65_000;

const _: () = assert!(MAX_MESSAGE_LENGTH + STREAM_HEADER_LENGTH <= 65_507);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error(transparent)]
    Message(#[from] MessageError),

    #[error("message length {0} exceeds the 65000 byte limit")]
    MessageTooLong(usize),

    #[error("fragment limit must be at least 1")]
    ZeroFragmentLimit,

    #[error("measured message count must be at least 1")]
    ZeroMessageCount,

    #[error("significant digits must be between 1 and 5, got {0}")]
    SignificantDigits(u8),

    #[error("highest trackable latency must be at least 2ns")]
    HighestTrackable,
}

/// A channel URI plus the stream id used on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub channel: Channel,
    pub stream_id: i32,
}

impl ChannelSpec {
    pub fn new(uri: &str, stream_id: i32) -> Result<Self, TransportError> {
        Ok(Self {
            channel: uri.parse()?,
            stream_id,
        })
    }

    fn default_for(uri: &str, stream_id: i32) -> Self {
        Self {
            channel: Channel::Udp {
                endpoint: uri.trim_start_matches("udp://").to_string(),
            },
            stream_id,
        }
    }
}

impl fmt::Display for ChannelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on stream Id {}", self.channel, self.stream_id)
    }
}

/// Everything a ping run needs, fixed before the run starts.
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    /// Where pings are published.
    pub ping: ChannelSpec,
    /// Where pongs come back.
    pub pong: ChannelSpec,
    pub message_length: usize,
    pub fragment_limit: usize,
    pub message_count: u64,
    pub warmup_message_count: u64,
    pub warmup_iterations: u64,
    /// Wait after the last send of a phase before joining the receiver.
    pub linger: Duration,
    /// Pause after every accepted send.
    pub send_pause: Duration,
    pub idle: IdleStrategyKind,
    pub highest_trackable: Duration,
    pub significant_digits: u8,
    /// Core to pin receiver threads to.
    pub receiver_core: Option<usize>,
    /// Run an echo responder inside this process.
    pub embedded_driver: bool,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            ping: ChannelSpec::default_for(DEFAULT_PING_CHANNEL, DEFAULT_PING_STREAM_ID),
            pong: ChannelSpec::default_for(DEFAULT_PONG_CHANNEL, DEFAULT_PONG_STREAM_ID),
            message_length: DEFAULT_MESSAGE_LENGTH,
            fragment_limit: DEFAULT_FRAGMENT_LIMIT,
            message_count: DEFAULT_MESSAGE_COUNT,
            warmup_message_count: DEFAULT_WARMUP_MESSAGE_COUNT,
            warmup_iterations: DEFAULT_WARMUP_ITERATIONS,
            linger: Duration::ZERO,
            send_pause: DEFAULT_SEND_PAUSE,
            idle: IdleStrategyKind::default(),
            highest_trackable: DEFAULT_HIGHEST_TRACKABLE,
            significant_digits: DEFAULT_SIGNIFICANT_DIGITS,
            receiver_core: None,
            embedded_driver: false,
        }
    }
}

impl BenchmarkConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.message_length < TIMESTAMP_LENGTH {
            return Err(MessageError::TooShort(self.message_length).into());
        }
        if self.message_length > MAX_MESSAGE_LENGTH {
            return Err(ConfigError::MessageTooLong(self.message_length));
        }
        if self.fragment_limit == 0 {
            return Err(ConfigError::ZeroFragmentLimit);
        }
        if self.message_count == 0 {
            return Err(ConfigError::ZeroMessageCount);
        }
        if !(1..=5).contains(&self.significant_digits) {
            return Err(ConfigError::SignificantDigits(self.significant_digits));
        }
        if self.highest_trackable < Duration::from_nanos(2) {
            return Err(ConfigError::HighestTrackable);
        }
        Ok(())
    }

    pub fn warmup_total(&self) -> u64 {
        self.warmup_iterations.saturating_mul(self.warmup_message_count)
    }

    /// Echo side matching this ping configuration, for the embedded driver.
    pub fn echo_config(&self) -> EchoConfig {
        EchoConfig {
            ping: self.ping.clone(),
            pong: self.pong.clone(),
            fragment_limit: self.fragment_limit,
            idle: self.idle,
        }
    }
}

/// Configuration of the pong side.
#[derive(Debug, Clone)]
pub struct EchoConfig {
    /// Subscribed to.
    pub ping: ChannelSpec,
    /// Published to.
    pub pong: ChannelSpec,
    pub fragment_limit: usize,
    pub idle: IdleStrategyKind,
}

impl Default for EchoConfig {
    fn default() -> Self {
        BenchmarkConfig::default().echo_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = BenchmarkConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.warmup_total(), 50_000);
        assert_eq!(config.ping.to_string(), "udp://localhost:40123 on stream Id 10");
        assert_eq!(config.ping, ChannelSpec::new(DEFAULT_PING_CHANNEL, 10).unwrap());
    }

    #[test]
    fn test_validation_failures() {
        let cases: [(fn(&mut BenchmarkConfig), ConfigError); 6] = [
            (
                (|c: &mut BenchmarkConfig| c.message_length = 7),
                ConfigError::Message(MessageError::TooShort(7)),
            ),
            (
                (|c: &mut BenchmarkConfig| c.message_length = MAX_MESSAGE_LENGTH + 1),
                ConfigError::MessageTooLong(MAX_MESSAGE_LENGTH + 1),
            ),
            ((|c: &mut BenchmarkConfig| c.fragment_limit = 0), ConfigError::ZeroFragmentLimit),
            ((|c: &mut BenchmarkConfig| c.message_count = 0), ConfigError::ZeroMessageCount),
            ((|c: &mut BenchmarkConfig| c.significant_digits = 6), ConfigError::SignificantDigits(6)),
            (
                (|c: &mut BenchmarkConfig| c.highest_trackable = Duration::from_nanos(1)),
                ConfigError::HighestTrackable,
            ),
        ];

        for (mutate, expected) in cases {
            let mut config = BenchmarkConfig::default();
            mutate(&mut config);
            assert_eq!(config.validate(), Err(expected));
        }
    }

    #[test]
    fn test_eight_byte_messages_are_allowed() {
        let config = BenchmarkConfig {
            message_length: TIMESTAMP_LENGTH,
            warmup_iterations: 0,
            ..BenchmarkConfig::default()
        };
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.warmup_total(), 0);
    }
}
