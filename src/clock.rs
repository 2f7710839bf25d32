use std::sync::OnceLock;
use std::time::Instant;

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Monotonic nanoseconds since the first call in this process.
///
/// Every thread reads against the same epoch, so a value stamped by the
/// sender can be subtracted from a value read by the receiver.
#[inline]
pub fn nano_time() -> u64 {
    EPOCH.get_or_init(Instant::now).elapsed().as_nanos() as u64
}
