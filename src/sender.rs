use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::clock;
use crate::idle::IdleStrategy;
use crate::message::PingMessage;
use crate::transport::{Publication, TransportError};

/// Ping side sender.
///
/// Each message is stamped once, before its first offer. Rejected offers
/// are retried with the same bytes, so the measured round trip includes the
/// time spent under backpressure.
pub struct Sender<I> {
    message: PingMessage,
    idle: I,
    pause: Duration,
    sent: u64,
    rejected: u64,
}

impl<I: IdleStrategy> Sender<I> {
    pub fn new(message: PingMessage, idle: I, pause: Duration) -> Self {
        Self {
            message,
            idle,
            pause,
            sent: 0,
            rejected: 0,
        }
    }

    pub fn send<P: Publication>(&mut self, publication: &mut P, count: u64) -> Result<u64, TransportError> {
        self.send_until(publication, count, || false)
    }

    /// Like [`send`](Self::send), but gives up once `stop` returns true.
    /// `stop` is checked before every message and between rejected offers.
    /// Returns how many of the `count` messages were accepted.
    pub fn send_until<P, F>(&mut self, publication: &mut P, count: u64, mut stop: F) -> Result<u64, TransportError>
    where
        P: Publication,
        F: FnMut() -> bool,
    {
        let rejected_before = self.rejected;
        let mut accepted = 0;

        'messages: while accepted < count {
            if stop() {
                break;
            }
            self.message.stamp(clock::nano_time());
            while !publication.offer(self.message.as_bytes())? {
                self.rejected += 1;
                if stop() {
                    break 'messages;
                }
                self.idle.idle(0);
            }
            self.idle.reset();
            self.sent += 1;
            accepted += 1;

            if !self.pause.is_zero() {
                thread::sleep(self.pause);
            }
        }

        debug!(
            "Sent {} of {} messages ({} offers rejected)",
            accepted,
            count,
            self.rejected - rejected_before
        );
        Ok(accepted)
    }

    /// Messages accepted by the transport so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Offers turned away by the transport so far.
    pub fn rejected(&self) -> u64 {
        self.rejected
    }
}
