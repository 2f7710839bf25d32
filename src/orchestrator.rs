//! Drives a ping run: warm-up, measurement, report.
//!
//! Each phase spawns a receiver thread that owns the subscription and the
//! histogram, drives the sender on the calling thread, then joins the
//! receiver to get both back. The histogram is only reset or read between
//! phases, after the join.

use std::fmt;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use tracing::{debug, info, warn};

use crate::config::{BenchmarkConfig, ConfigError};
use crate::error::{BenchError, Result};
use crate::event::EventLog;
use crate::histogram::LatencyHistogram;
use crate::idle::IdleStrategy;
use crate::message::PingMessage;
use crate::receiver::Receiver;
use crate::sender::Sender;
use crate::transport::{Channel, EmbeddedDriver, Publication, Subscription, connect_ping, log_close_failure};

/// Report values are printed in microseconds.
const REPORT_SCALE_NANOS_TO_MICROS: f64 = 1000.0;

type BoxedIdle = Box<dyn IdleStrategy + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BenchmarkState {
    Idle,
    WarmupRunning,
    WarmupDraining,
    MeasuredRunning,
    MeasuredDraining,
    Reporting,
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Warmup,
    Measured,
}

impl Phase {
    fn name(self) -> &'static str {
        match self {
            Phase::Warmup => "warmup",
            Phase::Measured => "measured",
        }
    }

    fn draining(self) -> BenchmarkState {
        match self {
            Phase::Warmup => BenchmarkState::WarmupDraining,
            Phase::Measured => BenchmarkState::MeasuredDraining,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a completed run leaves behind besides the printed report.
#[derive(Debug)]
pub struct BenchmarkOutcome {
    /// Round trips of the measured phase only.
    pub histogram: LatencyHistogram,
    /// Warm-up samples recorded and then thrown away.
    pub warmup_samples_discarded: u64,
    /// Histogram count right after the warm-up reset. Always zero.
    pub measured_start_count: u64,
    /// Offers the transport turned away across both phases.
    pub send_rejections: u64,
}

pub struct PingBenchmark<P> {
    config: BenchmarkConfig,
    publication: P,
    sender: Sender<BoxedIdle>,
    state: BenchmarkState,
}

impl<P: Publication> PingBenchmark<P> {
    pub fn new(config: BenchmarkConfig, publication: P) -> Result<Self> {
        config.validate()?;
        let message = PingMessage::new(config.message_length).map_err(ConfigError::from)?;

        if config.idle.is_spinning() && num_cpus::get() < 2 {
            warn!(
                "Busy-spin idle strategy with {} CPU, sender and receiver will compete for it",
                num_cpus::get()
            );
        }

        let sender = Sender::new(message, config.idle.build(), config.send_pause);
        Ok(Self {
            config,
            publication,
            sender,
            state: BenchmarkState::Idle,
        })
    }

    pub fn state(&self) -> BenchmarkState {
        self.state
    }

    /// Runs both phases against `subscription` and writes the measured
    /// distribution to `out`.
    ///
    /// The publication is closed on every path. The subscription is closed
    /// after a successful report and dropped otherwise.
    pub fn run<S, W>(mut self, subscription: S, out: &mut W) -> Result<BenchmarkOutcome>
    where
        S: Subscription + Send + 'static,
        W: Write,
    {
        let histogram = LatencyHistogram::new(self.config.highest_trackable, self.config.significant_digits)?;
        let receiver = Receiver::new(
            subscription,
            histogram,
            self.config.idle.build(),
            self.config.fragment_limit,
        );

        let result = self.play(receiver, out);
        log_close_failure("ping publication", self.publication.close());

        let (mut subscription, outcome) = result?;
        log_close_failure("pong subscription", subscription.close());
        self.transition(BenchmarkState::Done);
        Ok(outcome)
    }

    fn play<S, W>(&mut self, receiver: Receiver<S, BoxedIdle>, out: &mut W) -> Result<(S, BenchmarkOutcome)>
    where
        S: Subscription + Send + 'static,
        W: Write,
    {
        info!(
            "Warming up... {} iterations of {} messages",
            self.config.warmup_iterations, self.config.warmup_message_count
        );
        self.transition(BenchmarkState::WarmupRunning);
        let mut receiver = self.run_phase(
            receiver,
            Phase::Warmup,
            self.config.warmup_iterations,
            self.config.warmup_message_count,
            self.config.warmup_total(),
        )?;

        let warmup_samples_discarded = receiver.histogram().count();
        receiver.histogram_mut().reset();
        let measured_start_count = receiver.histogram().count();

        info!(
            "Pinging {} messages of length {} bytes",
            self.config.message_count, self.config.message_length
        );
        self.transition(BenchmarkState::MeasuredRunning);
        let receiver = self.run_phase(
            receiver,
            Phase::Measured,
            1,
            self.config.message_count,
            self.config.message_count,
        )?;

        self.transition(BenchmarkState::Reporting);
        let (subscription, histogram) = receiver.into_parts();
        info!("Done playing... Histogram of RTT latencies in microseconds.");
        out.write_all(histogram.percentile_distribution(REPORT_SCALE_NANOS_TO_MICROS).as_bytes())?;
        out.flush()?;

        if histogram.clamped() > 0 {
            warn!(
                "{} samples exceeded {} ns and were clamped",
                histogram.clamped(),
                histogram.highest_trackable()
            );
        }

        let outcome = BenchmarkOutcome {
            histogram,
            warmup_samples_discarded,
            measured_start_count,
            send_rejections: self.sender.rejected(),
        };
        Ok((subscription, outcome))
    }

    /// Sends `batches` batches of `batch_size` while a receiver thread counts
    /// `expected` pongs, then hands the receiver back.
    ///
    /// Whichever side stops first ends the phase: a failed send aborts the
    /// receiver, and a receiver that has returned or panicked stops the
    /// sending.
    fn run_phase<S>(
        &mut self,
        mut receiver: Receiver<S, BoxedIdle>,
        phase: Phase,
        batches: u64,
        batch_size: u64,
        expected: u64,
    ) -> Result<Receiver<S, BoxedIdle>>
    where
        S: Subscription + Send + 'static,
    {
        let abort = Arc::new(AtomicBool::new(false));
        let core = self.config.receiver_core;

        let handle = {
            let abort = abort.clone();
            thread::Builder::new()
                .name(format!("rtt-receiver-{}", phase))
                .spawn(move || {
                    if let Some(core) = core {
                        pin_current_thread(core);
                    }
                    let result = receiver.run(expected, &abort);
                    (receiver, result)
                })
                .map_err(BenchError::Spawn)?
        };

        let sent_before = self.sender.sent();
        let mut sent = Ok(());
        for _ in 0..batches {
            match self
                .sender
                .send_until(&mut self.publication, batch_size, || handle.is_finished())
            {
                Ok(accepted) if accepted < batch_size => {
                    debug!("Receiver for {} phase returned early, sending stopped", phase);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    sent = Err(e);
                    break;
                }
            }
        }

        if let Err(e) = sent {
            abort.store(true, Ordering::Release);
            if handle.join().is_err() {
                warn!("Receiver thread for {} phase panicked while aborting", phase);
            }
            return Err(e.into());
        }

        self.transition(phase.draining());
        if !self.config.linger.is_zero() && !handle.is_finished() {
            thread::sleep(self.config.linger);
        }

        let (receiver, result) = handle
            .join()
            .map_err(|_| BenchError::ReceiverPanicked { phase: phase.name() })?;
        let observed = result?;
        debug!(
            "{} phase sent {} messages and observed {} of {} fragments",
            phase,
            self.sender.sent() - sent_before,
            observed,
            expected
        );
        if receiver.malformed() > 0 {
            warn!(
                "{} fragments too short to carry a timestamp so far, skipped",
                receiver.malformed()
            );
        }
        Ok(receiver)
    }

    fn transition(&mut self, next: BenchmarkState) {
        debug!("Benchmark state {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

fn pin_current_thread(core: usize) {
    let Some(cores) = core_affinity::get_core_ids() else {
        info!("CPU affinity not supported on this platform, continuing without core pinning");
        return;
    };
    match cores.into_iter().find(|c| c.id == core) {
        Some(id) if core_affinity::set_for_current(id) => debug!("Receiver pinned to CPU core {}", core),
        Some(_) => warn!("Failed to pin receiver to CPU core {}", core),
        None => warn!("CPU core {} not available, receiver left unpinned", core),
    }
}

/// Full ping run: optional embedded driver, connect, benchmark, report to
/// `out`. The driver is stopped on every exit path.
pub fn run_ping<W: Write>(config: BenchmarkConfig, log: EventLog, out: &mut W) -> Result<BenchmarkOutcome> {
    config.validate()?;

    let _driver = if !config.embedded_driver {
        None
    } else if config.ping.channel == Channel::Ipc {
        info!("ipc channels echo in process, no embedded driver needed");
        None
    } else {
        Some(EmbeddedDriver::launch(&config.echo_config(), log)?)
    };

    info!("Publishing Ping at {}", config.ping);
    info!("Subscribing Pong at {}", config.pong);
    let (publication, subscription) = connect_ping(&config, log)?;

    PingBenchmark::new(config, publication)?.run(subscription, out)
}
