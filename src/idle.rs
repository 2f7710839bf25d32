use std::thread;
use std::time::Duration;

use clap::ValueEnum;
use crossbeam_utils::Backoff;

/// What a polling loop does when its last attempt found no work.
///
/// `idle` is called once per attempt with the amount of work just done.
/// Implementations must never fail; a non-zero `work_count` resets any
/// progressive state and returns straight away.
pub trait IdleStrategy {
    fn idle(&mut self, work_count: usize);

    /// Drop any progressive state, as if work had just been done.
    fn reset(&mut self) {}
}

/// Spins on the CPU. Keeps wake-up latency at the cost of a whole core.
#[derive(Debug, Default, Clone, Copy)]
pub struct BusySpinIdleStrategy;

impl IdleStrategy for BusySpinIdleStrategy {
    #[inline]
    fn idle(&mut self, work_count: usize) {
        if work_count == 0 {
            std::hint::spin_loop();
        }
    }
}

/// Hands the rest of the time slice back to the scheduler.
#[derive(Debug, Default, Clone, Copy)]
pub struct YieldingIdleStrategy;

impl IdleStrategy for YieldingIdleStrategy {
    #[inline]
    fn idle(&mut self, work_count: usize) {
        if work_count == 0 {
            thread::yield_now();
        }
    }
}

/// Spins with exponential backoff, then falls back to yielding.
#[derive(Debug, Default)]
pub struct BackoffIdleStrategy {
    backoff: Backoff,
}

impl IdleStrategy for BackoffIdleStrategy {
    fn idle(&mut self, work_count: usize) {
        if work_count > 0 {
            self.backoff.reset();
            return;
        }
        self.backoff.snooze();
    }

    fn reset(&mut self) {
        self.backoff.reset();
    }
}

/// Sleeps for a fixed period. Only for runs where latency does not matter.
#[derive(Debug, Clone, Copy)]
pub struct SleepingIdleStrategy {
    period: Duration,
}

impl SleepingIdleStrategy {
    pub fn new(period: Duration) -> Self {
        Self { period }
    }
}

impl Default for SleepingIdleStrategy {
    fn default() -> Self {
        Self::new(Duration::from_micros(100))
    }
}

impl IdleStrategy for SleepingIdleStrategy {
    fn idle(&mut self, work_count: usize) {
        if work_count == 0 {
            thread::sleep(self.period);
        }
    }
}

/// Idle strategy selected on the command line.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IdleStrategyKind {
    #[default]
    BusySpin,
    Yielding,
    Backoff,
    Sleeping,
}

impl IdleStrategyKind {
    pub fn build(self) -> Box<dyn IdleStrategy + Send> {
        match self {
            IdleStrategyKind::BusySpin => Box::new(BusySpinIdleStrategy),
            IdleStrategyKind::Yielding => Box::new(YieldingIdleStrategy),
            IdleStrategyKind::Backoff => Box::new(BackoffIdleStrategy::default()),
            IdleStrategyKind::Sleeping => Box::new(SleepingIdleStrategy::default()),
        }
    }

    pub fn is_spinning(self) -> bool {
        matches!(self, IdleStrategyKind::BusySpin)
    }
}

impl IdleStrategy for Box<dyn IdleStrategy + Send> {
    #[inline]
    fn idle(&mut self, work_count: usize) {
        (**self).idle(work_count)
    }

    fn reset(&mut self) {
        (**self).reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;

    #[test]
    fn test_busy_spin_returns_promptly() {
        let mut idle = BusySpinIdleStrategy;
        let start = Instant::now();
        for _ in 0..100_000 {
            idle.idle(0);
        }
        // 100k spin hints are well under a scheduler quantum on any host
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn test_busy_spin_observes_new_work() {
        let ready = Arc::new(AtomicBool::new(false));
        let flag = ready.clone();
        let waiter = std::thread::spawn(move || {
            let mut idle = BusySpinIdleStrategy;
            let mut spins = 0u64;
            while !flag.load(Ordering::Acquire) {
                idle.idle(0);
                spins += 1;
            }
            spins
        });

        std::thread::sleep(Duration::from_millis(5));
        let published = Instant::now();
        ready.store(true, Ordering::Release);
        waiter.join().unwrap();
        assert!(published.elapsed() < Duration::from_millis(100));
    }

    #[test]
    fn test_backoff_resets_on_work() {
        let mut idle = BackoffIdleStrategy::default();
        for _ in 0..64 {
            idle.idle(0);
        }
        assert!(idle.backoff.is_completed());

        idle.idle(3);
        assert!(!idle.backoff.is_completed());
    }

    #[test]
    fn test_kind_builds_each_variant() {
        for kind in IdleStrategyKind::value_variants() {
            let mut idle = kind.build();
            idle.idle(1);
            idle.reset();
        }
        assert!(IdleStrategyKind::default().is_spinning());
        assert!(!IdleStrategyKind::Sleeping.is_spinning());
    }
}
