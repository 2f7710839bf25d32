use std::fmt::Write as _;
use std::time::Duration;

use hdrhistogram::{CreationError, Histogram};
use thiserror::Error;

/// Half-distance ticks per percentile step in the distribution table.
const PERCENTILE_TICKS_PER_HALF_DISTANCE: u32 = 5;

#[derive(Debug, Error)]
#[error("cannot build histogram for 1..={highest} ns at {sigfig} significant digits: {cause:?}")]
pub struct HistogramError {
    highest: u64,
    sigfig: u8,
    cause: CreationError,
}

/// HDR histogram of round-trip times in nanoseconds.
///
/// Samples beyond the bucket holding the highest trackable value are clamped
/// to it and counted in [`clamped`](Self::clamped). The histogram has no interior locking; the
/// orchestrator hands it to exactly one receiver at a time.
#[derive(Debug, Clone)]
pub struct LatencyHistogram {
    histogram: Histogram<u64>,
    clamped: u64,
}

impl LatencyHistogram {
    pub fn new(highest_trackable: Duration, significant_digits: u8) -> Result<Self, HistogramError> {
        let highest = highest_trackable.as_nanos().min(u64::MAX as u128) as u64;
        let histogram = Histogram::new_with_bounds(1, highest, significant_digits).map_err(|cause| {
            HistogramError {
                highest,
                sigfig: significant_digits,
                cause,
            }
        })?;

        Ok(Self {
            histogram,
            clamped: 0,
        })
    }

    pub fn record(&mut self, sample_nanos: u64) {
        let high = self.histogram.high();
        let sample = if sample_nanos > self.histogram.highest_equivalent(high) {
            self.clamped += 1;
            high
        } else {
            sample_nanos
        };
        self.histogram.saturating_record(sample);
    }

    pub fn reset(&mut self) {
        self.histogram.reset();
        self.clamped = 0;
    }

    pub fn count(&self) -> u64 {
        self.histogram.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    /// Samples that exceeded the highest trackable value since the last reset.
    pub fn clamped(&self) -> u64 {
        self.clamped
    }

    pub fn highest_trackable(&self) -> u64 {
        self.histogram.high()
    }

    pub fn value_at_percentile(&self, percentile: f64) -> u64 {
        self.histogram.value_at_percentile(percentile)
    }

    pub fn max(&self) -> u64 {
        self.histogram.max()
    }

    pub fn mean(&self) -> f64 {
        self.histogram.mean()
    }

    /// Percentile table with every value divided by `output_scale_factor`.
    ///
    /// Laid out the way HdrHistogram prints it, so existing plotting tools
    /// can read it.
    pub fn percentile_distribution(&self, output_scale_factor: f64) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "{:>12} {:>14} {:>10} {:>14}\n",
            "Value", "Percentile", "TotalCount", "1/(1-Percentile)"
        );

        let mut total = 0u64;
        for step in self.histogram.iter_quantiles(PERCENTILE_TICKS_PER_HALF_DISTANCE) {
            total += step.count_since_last_iteration();
            let value = step.value_iterated_to() as f64 / output_scale_factor;
            let quantile = step.quantile_iterated_to();
            if quantile < 1.0 {
                let _ = writeln!(
                    out,
                    "{:>12.3} {:>2.12} {:>10} {:>14.2}",
                    value,
                    quantile,
                    total,
                    1.0 / (1.0 - quantile)
                );
            } else {
                let _ = writeln!(out, "{:>12.3} {:>2.12} {:>10}", value, quantile, total);
            }
        }

        let (mean, stdev, max) = if self.is_empty() {
            (0.0, 0.0, 0.0)
        } else {
            (
                self.histogram.mean() / output_scale_factor,
                self.histogram.stdev() / output_scale_factor,
                self.histogram.max() as f64 / output_scale_factor,
            )
        };
        let _ = writeln!(out, "#[Mean    = {:>12.3}, StdDeviation   = {:>12.3}]", mean, stdev);
        let _ = writeln!(out, "#[Max     = {:>12.3}, Total count    = {:>12}]", max, self.count());
        let _ = writeln!(out, "#[Clamped = {:>12}, Highest (ns)   = {:>12}]", self.clamped, self.highest_trackable());
        out
    }
}
