use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info};

use crate::idle::IdleStrategy;
use crate::transport::{Publication, Subscription, TransportError};

/// Pong side: republishes every fragment it receives, byte for byte.
pub struct EchoResponder<P, S, I> {
    publication: P,
    subscription: S,
    idle: I,
    fragment_limit: usize,
    echoed: u64,
}

impl<P, S, I> EchoResponder<P, S, I>
where
    P: Publication,
    S: Subscription,
    I: IdleStrategy,
{
    pub fn new(publication: P, subscription: S, idle: I, fragment_limit: usize) -> Self {
        Self {
            publication,
            subscription,
            idle,
            fragment_limit,
            echoed: 0,
        }
    }

    /// Echoes until `running` goes false or the transport fails. Returns the
    /// number of fragments echoed.
    pub fn run(&mut self, running: &AtomicBool) -> Result<u64, TransportError> {
        info!("Echo responder started");
        while running.load(Ordering::Relaxed) {
            let fragments = self.poll_once(running)?;
            self.idle.idle(fragments);
        }
        info!("Echo responder stopped after {} fragments", self.echoed);
        Ok(self.echoed)
    }

    /// One poll of the subscription, offering each fragment until accepted.
    pub fn poll_once(&mut self, running: &AtomicBool) -> Result<usize, TransportError> {
        let Self {
            publication,
            subscription,
            idle,
            fragment_limit,
            echoed,
        } = self;
        let mut failure = None;

        let fragments = subscription.poll(*fragment_limit, |fragment| {
            if failure.is_some() {
                return;
            }
            loop {
                match publication.offer(fragment) {
                    Ok(true) => {
                        *echoed += 1;
                        idle.reset();
                        break;
                    }
                    Ok(false) if running.load(Ordering::Relaxed) => idle.idle(0),
                    Ok(false) => {
                        debug!("Dropping fragment, echo responder is stopping");
                        break;
                    }
                    Err(e) => {
                        failure = Some(e);
                        break;
                    }
                }
            }
        })?;

        match failure {
            Some(e) => Err(e),
            None => Ok(fragments),
        }
    }

    pub fn echoed(&self) -> u64 {
        self.echoed
    }

    pub fn close(mut self) -> (Result<(), TransportError>, Result<(), TransportError>) {
        (self.publication.close(), self.subscription.close())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::idle::BusySpinIdleStrategy;
    use crate::transport::ipc;

    #[test]
    fn test_echoes_fragments_unmodified() {
        let (mut ping_pub, ping_sub) = ipc::channel(16);
        let (pong_pub, mut pong_sub) = ipc::channel(16);
        let mut responder = EchoResponder::new(pong_pub, ping_sub, BusySpinIdleStrategy, 10);
        let running = AtomicBool::new(true);

        ping_pub.offer(b"one").unwrap();
        ping_pub.offer(b"two").unwrap();
        assert_eq!(responder.poll_once(&running).unwrap(), 2);
        assert_eq!(responder.echoed(), 2);

        let mut echoed = Vec::new();
        pong_sub.poll(10, |f| echoed.push(f.to_vec())).unwrap();
        assert_eq!(echoed, vec![b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn test_closed_pong_channel_fails() {
        let (mut ping_pub, ping_sub) = ipc::channel(16);
        let (pong_pub, pong_sub) = ipc::channel(16);
        drop(pong_sub);
        let mut responder = EchoResponder::new(pong_pub, ping_sub, BusySpinIdleStrategy, 10);

        ping_pub.offer(b"lost").unwrap();
        let running = AtomicBool::new(true);
        assert!(matches!(responder.run(&running), Err(TransportError::Closed)));
    }

    #[test]
    fn test_stops_when_not_running() {
        let (_ping_pub, ping_sub) = ipc::channel(16);
        let (pong_pub, _pong_sub) = ipc::channel(16);
        let mut responder = EchoResponder::new(pong_pub, ping_sub, BusySpinIdleStrategy, 10);

        let running = AtomicBool::new(false);
        assert_eq!(responder.run(&running).unwrap(), 0);
        let (publication, subscription) = responder.close();
        assert!(publication.is_ok() && subscription.is_ok());
    }
}
