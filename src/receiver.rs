use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::clock;
use crate::error::{BenchError, Result};
use crate::histogram::LatencyHistogram;
use crate::idle::IdleStrategy;
use crate::message;
use crate::transport::Subscription;

/// Ping side receiver: turns each pong into one round-trip sample.
///
/// Owns the subscription and the histogram. The orchestrator moves it onto a
/// receiver thread for a phase and gets it back on join, which is what keeps
/// the histogram single-writer.
pub struct Receiver<S, I> {
    subscription: S,
    histogram: LatencyHistogram,
    idle: I,
    fragment_limit: usize,
    malformed: u64,
}

impl<S, I> Receiver<S, I>
where
    S: Subscription,
    I: IdleStrategy,
{
    pub fn new(subscription: S, histogram: LatencyHistogram, idle: I, fragment_limit: usize) -> Self {
        Self {
            subscription,
            histogram,
            idle,
            fragment_limit,
            malformed: 0,
        }
    }

    /// Polls until `expected` fragments have been seen. Returns the number
    /// observed, which can overshoot `expected` by up to one poll's worth.
    pub fn run(&mut self, expected: u64, abort: &AtomicBool) -> Result<u64> {
        let Self {
            subscription,
            histogram,
            idle,
            fragment_limit,
            malformed,
        } = self;
        let mut observed = 0u64;

        while observed < expected {
            if abort.load(Ordering::Acquire) {
                return Err(BenchError::Aborted { observed, expected });
            }

            let fragments = subscription.poll(*fragment_limit, |fragment| match message::decode(fragment) {
                Ok(sent_at) => histogram.record(clock::nano_time().saturating_sub(sent_at)),
                Err(e) => {
                    *malformed += 1;
                    debug!("Skipping fragment: {}", e);
                }
            })?;

            observed += fragments as u64;
            idle.idle(fragments);
        }

        Ok(observed)
    }

    pub fn histogram(&self) -> &LatencyHistogram {
        &self.histogram
    }

    pub fn histogram_mut(&mut self) -> &mut LatencyHistogram {
        &mut self.histogram
    }

    /// Fragments too short to carry a timestamp.
    pub fn malformed(&self) -> u64 {
        self.malformed
    }

    pub fn into_parts(self) -> (S, LatencyHistogram) {
        (self.subscription, self.histogram)
    }
}
