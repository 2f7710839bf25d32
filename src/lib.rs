//! Ping/pong round-trip latency benchmark over a channel-based transport.
//!
//! The ping side ([`orchestrator::PingBenchmark`]) sends timestamped messages,
//! the pong side ([`pong::EchoResponder`]) echoes them back, and every round
//! trip lands in a [`histogram::LatencyHistogram`].

pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod histogram;
pub mod idle;
pub mod message;
pub mod orchestrator;
pub mod pong;
pub mod receiver;
pub mod sender;
pub mod transport;

pub use config::{BenchmarkConfig, ChannelSpec, EchoConfig};
pub use error::BenchError;
pub use event::{EventCode, EventLog, EventMask};
pub use histogram::LatencyHistogram;
pub use idle::{IdleStrategy, IdleStrategyKind};
pub use orchestrator::{BenchmarkOutcome, PingBenchmark};
