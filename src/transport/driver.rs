use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tracing::{info, warn};

use super::{TransportError, connect_pong, log_close_failure};
use crate::config::EchoConfig;
use crate::event::EventLog;
use crate::pong::EchoResponder;

/// Echo responder running on its own thread inside the ping process.
///
/// Stopped and joined when dropped, so it is released on every exit path of
/// the run that owns it.
pub struct EmbeddedDriver {
    running: Arc<AtomicBool>,
    handle: Option<thread::JoinHandle<Result<u64, TransportError>>>,
}

impl EmbeddedDriver {
    /// Binds the echo channels before returning, so pings sent right after
    /// launch have somewhere to land.
    pub fn launch(config: &EchoConfig, log: EventLog) -> Result<Self, TransportError> {
        let (publication, subscription) = connect_pong(config, log)?;
        let mut responder =
            EchoResponder::new(publication, subscription, config.idle.build(), config.fragment_limit);

        let running = Arc::new(AtomicBool::new(true));
        let flag = running.clone();
        let handle = thread::Builder::new()
            .name("rtt-embedded-driver".to_string())
            .spawn(move || {
                let result = responder.run(&flag);
                let (publication, subscription) = responder.close();
                log_close_failure("embedded pong publication", publication);
                log_close_failure("embedded ping subscription", subscription);
                result
            })
            .map_err(TransportError::io("spawn embedded driver"))?;

        info!("Embedded driver echoing {} -> {}", config.ping, config.pong);
        Ok(Self {
            running,
            handle: Some(handle),
        })
    }

    /// Stops the echo thread and returns how many fragments it echoed.
    pub fn close(mut self) -> Result<u64, TransportError> {
        self.shutdown().unwrap_or(Ok(0))
    }

    /// `None` once the thread has already been joined.
    fn shutdown(&mut self) -> Option<Result<u64, TransportError>> {
        self.running.store(false, Ordering::Relaxed);
        let handle = self.handle.take()?;
        Some(handle.join().unwrap_or(Err(TransportError::DriverPanicked)))
    }
}

impl Drop for EmbeddedDriver {
    fn drop(&mut self) {
        match self.shutdown() {
            Some(Ok(echoed)) => info!("Embedded driver stopped after echoing {} fragments", echoed),
            Some(Err(e)) => warn!("Embedded driver failed: {}", e),
            None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelSpec;
    use crate::transport::{Publication, Subscription, UdpPublication, UdpSubscription};
    use std::time::{Duration, Instant};

    #[test]
    fn test_driver_echoes_over_udp() {
        let config = EchoConfig {
            ping: ChannelSpec::new("udp://127.0.0.1:46211", 10).unwrap(),
            pong: ChannelSpec::new("udp://127.0.0.1:46212", 10).unwrap(),
            ..EchoConfig::default()
        };
        let driver = EmbeddedDriver::launch(&config, EventLog::disabled()).unwrap();
        let mut pongs = UdpSubscription::open(&config.pong, EventLog::disabled()).unwrap();
        let mut pings = UdpPublication::open(&config.ping, EventLog::disabled()).unwrap();

        while !pings.offer(b"ping!").unwrap() {}
        let mut echoed = Vec::new();
        let deadline = Instant::now() + Duration::from_secs(5);
        while echoed.is_empty() && Instant::now() < deadline {
            pongs.poll(1, |f| echoed.push(f.to_vec())).unwrap();
        }

        assert_eq!(echoed, vec![b"ping!".to_vec()]);
        assert_eq!(driver.close().unwrap(), 1);
    }

    #[test]
    fn test_panicked_echo_thread_is_an_error() {
        let driver = EmbeddedDriver {
            running: Arc::new(AtomicBool::new(true)),
            handle: Some(thread::spawn(|| -> Result<u64, TransportError> {
                panic!("echo thread died")
            })),
        };
        assert!(matches!(driver.close(), Err(TransportError::DriverPanicked)));
    }
}
