//! Channel-based transport seen by the benchmark: a publication that either
//! accepts or rejects a message, and a subscription that is polled for
//! fragments.

pub mod driver;
pub mod ipc;
pub mod udp;

use std::fmt;
use std::io;
use std::str::FromStr;

use thiserror::Error;
use tracing::warn;

use crate::config::{BenchmarkConfig, ChannelSpec, EchoConfig};
use crate::event::EventLog;

pub use driver::EmbeddedDriver;
pub use ipc::{IpcPublication, IpcSubscription};
pub use udp::{UdpPublication, UdpSubscription};

/// Slots in the in-process queue behind an `ipc` channel.
pub const IPC_QUEUE_CAPACITY: usize = 4096;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("channel closed")]
    Closed,

    #[error("invalid channel `{0}`, expected udp://host:port or ipc")]
    InvalidChannel(String),

    #[error("ping and pong channels must both be udp or both be ipc")]
    MixedChannels,

    #[error("ipc channels only exist inside a ping process")]
    IpcNotShared,

    #[error("embedded driver thread panicked")]
    DriverPanicked,

    #[error("could not resolve {endpoint}: {source}")]
    AddressResolution {
        endpoint: String,
        #[source]
        source: io::Error,
    },

    #[error("{context}: {source}")]
    Io {
        context: &'static str,
        #[source]
        source: io::Error,
    },
}

impl TransportError {
    pub(crate) fn io(context: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| TransportError::Io { context, source }
    }
}

/// Outbound half of a channel.
pub trait Publication {
    /// Tries to send `buffer` as one message. `Ok(false)` means the
    /// transport or the remote side pushed back and the caller should retry.
    fn offer(&mut self, buffer: &[u8]) -> Result<bool, TransportError>;

    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Inbound half of a channel.
pub trait Subscription {
    /// Hands up to `fragment_limit` waiting fragments to `handler` and
    /// returns how many were delivered. Never blocks.
    fn poll<F>(&mut self, fragment_limit: usize, handler: F) -> Result<usize, TransportError>
    where
        F: FnMut(&[u8]);

    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Channel {
    /// `udp://host:port`
    Udp { endpoint: String },
    /// In-process queue, see [`ipc`].
    Ipc,
}

impl FromStr for Channel {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uri = s.trim();
        if uri == "ipc" {
            return Ok(Channel::Ipc);
        }

        let endpoint = uri
            .strip_prefix("udp://")
            .filter(|endpoint| {
                endpoint
                    .rsplit_once(':')
                    .is_some_and(|(host, port)| !host.is_empty() && port.parse::<u16>().is_ok())
            })
            .ok_or_else(|| TransportError::InvalidChannel(uri.to_string()))?;

        Ok(Channel::Udp {
            endpoint: endpoint.to_string(),
        })
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Udp { endpoint } => write!(f, "udp://{}", endpoint),
            Channel::Ipc => f.write_str("ipc"),
        }
    }
}

pub enum AnyPublication {
    Udp(UdpPublication),
    Ipc(IpcPublication),
}

impl Publication for AnyPublication {
    #[inline]
    fn offer(&mut self, buffer: &[u8]) -> Result<bool, TransportError> {
        match self {
            AnyPublication::Udp(publication) => publication.offer(buffer),
            AnyPublication::Ipc(publication) => publication.offer(buffer),
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        match self {
            AnyPublication::Udp(publication) => publication.close(),
            AnyPublication::Ipc(publication) => publication.close(),
        }
    }
}

pub enum AnySubscription {
    Udp(UdpSubscription),
    Ipc(IpcSubscription),
}

impl Subscription for AnySubscription {
    #[inline]
    fn poll<F>(&mut self, fragment_limit: usize, handler: F) -> Result<usize, TransportError>
    where
        F: FnMut(&[u8]),
    {
        match self {
            AnySubscription::Udp(subscription) => subscription.poll(fragment_limit, handler),
            AnySubscription::Ipc(subscription) => subscription.poll(fragment_limit, handler),
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        match self {
            AnySubscription::Udp(subscription) => subscription.close(),
            AnySubscription::Ipc(subscription) => subscription.close(),
        }
    }
}

/// Opens the ping side: a publication on the ping channel and a
/// subscription on the pong channel. Two `ipc` channels become one
/// in-process queue that hands every ping straight back.
pub fn connect_ping(
    config: &BenchmarkConfig,
    log: EventLog,
) -> Result<(AnyPublication, AnySubscription), TransportError> {
    match (&config.ping.channel, &config.pong.channel) {
        (Channel::Ipc, Channel::Ipc) => {
            let (publication, subscription) = ipc::channel(IPC_QUEUE_CAPACITY);
            Ok((AnyPublication::Ipc(publication), AnySubscription::Ipc(subscription)))
        }
        (Channel::Udp { .. }, Channel::Udp { .. }) => {
            // bind the pong side first so no early echo is lost
            let subscription = open_subscription(&config.pong, log)?;
            let publication = open_publication(&config.ping, log)?;
            Ok((AnyPublication::Udp(publication), AnySubscription::Udp(subscription)))
        }
        _ => Err(TransportError::MixedChannels),
    }
}

/// Opens the pong side: subscribe to pings, publish pongs.
pub fn connect_pong(
    config: &EchoConfig,
    log: EventLog,
) -> Result<(UdpPublication, UdpSubscription), TransportError> {
    let subscription = open_subscription(&config.ping, log)?;
    let publication = open_publication(&config.pong, log)?;
    Ok((publication, subscription))
}

/// Opens a standalone publication. Only UDP channels can be opened on their
/// own; an `ipc` queue exists only as the pair built by [`connect_ping`].
pub fn open_publication(spec: &ChannelSpec, log: EventLog) -> Result<UdpPublication, TransportError> {
    match spec.channel {
        Channel::Udp { .. } => UdpPublication::open(spec, log),
        Channel::Ipc => Err(TransportError::IpcNotShared),
    }
}

pub fn open_subscription(spec: &ChannelSpec, log: EventLog) -> Result<UdpSubscription, TransportError> {
    match spec.channel {
        Channel::Udp { .. } => UdpSubscription::open(spec, log),
        Channel::Ipc => Err(TransportError::IpcNotShared),
    }
}

/// Logs a failed close instead of letting it replace the run's own result.
pub fn log_close_failure(what: &str, result: Result<(), TransportError>) {
    if let Err(e) = result {
        warn!("Failed to close {}: {}", what, e);
    }
}
