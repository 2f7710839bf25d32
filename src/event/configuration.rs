use std::collections::BTreeSet;

use thiserror::Error;
use tracing::warn;

use super::code::{EventCode, UnknownEventCode};

/// Name of the setting that selects the enabled event codes. Either a comma
/// separated list of codes, `all`, or `prod`.
pub const ENABLED_EVENT_CODES_PROPERTY: &str = "RTT_EVENT_LOG";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("RTT_EVENT_LOG not configured properly: {0}")]
pub struct EventConfigError(#[from] UnknownEventCode);

pub type EventCodeSet = BTreeSet<EventCode>;

/// Bitwise OR of the tag bits of the enabled codes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EventMask(u64);

impl EventMask {
    pub const NONE: EventMask = EventMask(0);

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn is_enabled(self, code: EventCode) -> bool {
        self.0 & code.tag_bit() != 0
    }

    /// Resolves the configured value and builds the mask in one step.
    pub fn from_config(configured: Option<&str>) -> Self {
        to_bitmask(&resolve(configured))
    }
}

pub fn production_codes() -> EventCodeSet {
    EventCode::PRODUCTION.iter().copied().collect()
}

pub fn all_codes() -> EventCodeSet {
    EventCode::ALL.iter().copied().collect()
}

/// Like [`resolve`], but reports a malformed list instead of falling back.
pub fn try_resolve(configured: Option<&str>) -> Result<EventCodeSet, EventConfigError> {
    match configured.map(str::trim) {
        None | Some("") | Some("prod") => Ok(production_codes()),
        Some("all") => Ok(all_codes()),
        Some(list) => list
            .split(',')
            .map(|token| token.parse::<EventCode>().map_err(EventConfigError::from))
            .collect(),
    }
}

/// Enabled codes for the configured value. A list with any unknown name is
/// discarded as a whole in favour of the production codes.
pub fn resolve(configured: Option<&str>) -> EventCodeSet {
    try_resolve(configured).unwrap_or_else(|e| {
        let defaults: Vec<&str> = EventCode::PRODUCTION.iter().map(|c| c.name()).collect();
        warn!("{}, defaulting to {:?}", e, defaults);
        production_codes()
    })
}

pub fn to_bitmask(codes: &EventCodeSet) -> EventMask {
    EventMask(codes.iter().fold(0u64, |acc, code| acc | code.tag_bit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::fmt;
    use std::sync::{Arc, Mutex};
    use tracing::field::{Field, Visit};
    use tracing::{Event, Level, Subscriber};
    use tracing_subscriber::Layer;
    use tracing_subscriber::layer::{Context, SubscriberExt};

    /// Collects the message of every warn-level event.
    #[derive(Clone, Default)]
    struct Warnings(Arc<Mutex<Vec<String>>>);

    impl<S: Subscriber> Layer<S> for Warnings {
        fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
            if *event.metadata().level() == Level::WARN {
                let mut message = Message(String::new());
                event.record(&mut message);
                self.0.lock().unwrap().push(message.0);
            }
        }
    }

    struct Message(String);

    impl Visit for Message {
        fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
            if field.name() == "message" {
                self.0 = format!("{:?}", value);
            }
        }
    }

    fn warnings_while(f: impl FnOnce()) -> Vec<String> {
        let warnings = Warnings::default();
        let subscriber = tracing_subscriber::registry().with(warnings.clone());
        tracing::subscriber::with_default(subscriber, f);
        warnings.0.lock().unwrap().clone()
    }

    #[test]
    fn test_absent_and_prod_are_production() {
        assert_eq!(resolve(None), production_codes());
        assert_eq!(resolve(Some("")), production_codes());
        assert_eq!(resolve(Some("prod")), production_codes());
    }

    #[test]
    fn test_all_is_superset_of_prod() {
        let all = to_bitmask(&resolve(Some("all")));
        let prod = to_bitmask(&resolve(Some("prod")));

        assert_eq!(all.bits() & prod.bits(), prod.bits());
        assert_eq!(all.bits().count_ones() as usize, EventCode::ALL.len());
    }

    #[test]
    fn test_explicit_list() {
        let codes = resolve(Some("FRAME_IN,FrameOut,EXCEPTION"));
        let expected: EventCodeSet = [EventCode::FrameIn, EventCode::FrameOut, EventCode::Exception]
            .into_iter()
            .collect();
        assert_eq!(codes, expected);

        let mask = to_bitmask(&codes);
        assert!(mask.is_enabled(EventCode::FrameIn));
        assert!(!mask.is_enabled(EventCode::Invocation));
    }

    #[test]
    fn test_bad_token_falls_back_to_production() {
        assert_eq!(resolve(Some("BadName,Exception")), resolve(None));
        assert_eq!(
            try_resolve(Some("BadName,Exception")),
            Err(EventConfigError(UnknownEventCode("BadName".to_string())))
        );
        assert_eq!(resolve(Some("FRAME_IN,")), production_codes());
    }

    #[test]
    fn test_fallback_warns_once_naming_the_property() {
        let warnings = warnings_while(|| {
            resolve(Some("BadName,Exception"));
        });

        assert_eq!(warnings.len(), 1, "{warnings:?}");
        assert!(warnings[0].contains(ENABLED_EVENT_CODES_PROPERTY), "{}", warnings[0]);
        assert!(warnings[0].contains("BadName"), "{}", warnings[0]);
        assert!(warnings[0].contains("EXCEPTION"), "{}", warnings[0]);
    }

    #[test]
    fn test_valid_values_do_not_warn() {
        let warnings = warnings_while(|| {
            for value in [None, Some(""), Some("prod"), Some("all"), Some("FRAME_IN,Exception")] {
                resolve(value);
            }
        });
        assert!(warnings.is_empty(), "{warnings:?}");
    }

    #[test]
    fn test_bitmask_is_order_independent_and_idempotent() {
        let a = to_bitmask(&resolve(Some("FRAME_IN,FRAME_OUT")));
        let b = to_bitmask(&resolve(Some("FRAME_OUT,FRAME_IN,FRAME_OUT")));
        assert_eq!(a, b);
        assert_eq!(EventMask::from_config(Some("FRAME_IN,FRAME_OUT")), a);
    }

    fn config_value() -> impl Strategy<Value = String> {
        let name = prop_oneof![
            proptest::sample::select(EventCode::ALL).prop_map(|c| c.name().to_string()),
            "[A-Za-z_]{0,12}",
        ];
        prop_oneof![
            Just("all".to_string()),
            Just("prod".to_string()),
            proptest::collection::vec(name, 1..6).prop_map(|names| names.join(",")),
        ]
    }

    proptest! {
        #[test]
        fn prop_resolve_is_deterministic_with_one_bit_per_code(value in config_value()) {
            let first = resolve(Some(&value));
            let second = resolve(Some(&value));
            prop_assert_eq!(&first, &second);

            let mask = to_bitmask(&first);
            prop_assert_eq!(mask.bits().count_ones() as usize, first.len());
        }
    }
}
