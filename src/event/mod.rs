//! Diagnostic event codes and the mask that decides which ones get logged.

pub mod code;
pub mod configuration;

use std::fmt;

use tracing::{debug, warn};

pub use code::{EventCode, UnknownEventCode};
pub use configuration::{
    ENABLED_EVENT_CODES_PROPERTY, EventCodeSet, EventConfigError, EventMask, resolve, to_bitmask,
    try_resolve,
};

/// Gate for transport diagnostics, built once from the resolved mask and
/// copied into every component that emits events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventLog {
    mask: EventMask,
}

impl EventLog {
    pub fn new(mask: EventMask) -> Self {
        Self { mask }
    }

    pub fn disabled() -> Self {
        Self::new(EventMask::NONE)
    }

    pub fn mask(&self) -> EventMask {
        self.mask
    }

    #[inline]
    pub fn is_enabled(&self, code: EventCode) -> bool {
        self.mask.is_enabled(code)
    }

    /// Emits `detail` under `code` if that code is enabled. Production codes
    /// go out at warn level, everything else at debug.
    pub fn log(&self, code: EventCode, detail: fmt::Arguments<'_>) {
        if !self.is_enabled(code) {
            return;
        }
        if code.is_production() {
            warn!(target: "rtt_pingpong::event", code = code.name(), "{}", detail);
        } else {
            debug!(target: "rtt_pingpong::event", code = code.name(), "{}", detail);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gate_follows_mask() {
        let log = EventLog::new(EventMask::from_config(Some("FRAME_IN")));
        assert!(log.is_enabled(EventCode::FrameIn));
        assert!(!log.is_enabled(EventCode::Exception));

        let disabled = EventLog::disabled();
        assert!(EventCode::ALL.iter().all(|&c| !disabled.is_enabled(c)));
        disabled.log(EventCode::Exception, format_args!("not emitted"));
    }
}
