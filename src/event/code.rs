use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("unknown event code `{0}`")]
pub struct UnknownEventCode(pub String);

/// Diagnostic event categories of the transport.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventCode {
    FrameIn = 1,
    FrameOut = 2,
    CmdInAddPublication = 3,
    CmdInRemovePublication = 4,
    CmdInAddSubscription = 5,
    CmdInRemoveSubscription = 6,
    CmdOutPublicationReady = 7,
    CmdOutConnectionReady = 8,
    CmdOutOnOperationSuccess = 9,
    CmdInKeepaliveClient = 10,
    RemovePublicationCleanup = 11,
    RemoveSubscriptionCleanup = 12,
    RemoveConnectionCleanup = 13,
    Invocation = 14,
    Exception = 15,
    MalformedFrameLength = 16,
    UnknownHeaderType = 17,
    ErrorSendingHeartbeatPacket = 18,
    CouldNotFindFrameHandlerForNewConnectedSubscription = 19,
    CouldNotFindInterface = 20,
    CouldNotSendEntireRetransmit = 21,
}

impl EventCode {
    /// Every code, in id order.
    pub const ALL: &'static [EventCode] = &[
        EventCode::FrameIn,
        EventCode::FrameOut,
        EventCode::CmdInAddPublication,
        EventCode::CmdInRemovePublication,
        EventCode::CmdInAddSubscription,
        EventCode::CmdInRemoveSubscription,
        EventCode::CmdOutPublicationReady,
        EventCode::CmdOutConnectionReady,
        EventCode::CmdOutOnOperationSuccess,
        EventCode::CmdInKeepaliveClient,
        EventCode::RemovePublicationCleanup,
        EventCode::RemoveSubscriptionCleanup,
        EventCode::RemoveConnectionCleanup,
        EventCode::Invocation,
        EventCode::Exception,
        EventCode::MalformedFrameLength,
        EventCode::UnknownHeaderType,
        EventCode::ErrorSendingHeartbeatPacket,
        EventCode::CouldNotFindFrameHandlerForNewConnectedSubscription,
        EventCode::CouldNotFindInterface,
        EventCode::CouldNotSendEntireRetransmit,
    ];

    pub const fn id(self) -> u32 {
        self as u32
    }

    /// Canonical property name, e.g. `FRAME_IN`.
    pub const fn name(self) -> &'static str {
        match self {
            EventCode::FrameIn => "FRAME_IN",
            EventCode::FrameOut => "FRAME_OUT",
            EventCode::CmdInAddPublication => "CMD_IN_ADD_PUBLICATION",
            EventCode::CmdInRemovePublication => "CMD_IN_REMOVE_PUBLICATION",
            EventCode::CmdInAddSubscription => "CMD_IN_ADD_SUBSCRIPTION",
            EventCode::CmdInRemoveSubscription => "CMD_IN_REMOVE_SUBSCRIPTION",
            EventCode::CmdOutPublicationReady => "CMD_OUT_PUBLICATION_READY",
            EventCode::CmdOutConnectionReady => "CMD_OUT_CONNECTION_READY",
            EventCode::CmdOutOnOperationSuccess => "CMD_OUT_ON_OPERATION_SUCCESS",
            EventCode::CmdInKeepaliveClient => "CMD_IN_KEEPALIVE_CLIENT",
            EventCode::RemovePublicationCleanup => "REMOVE_PUBLICATION_CLEANUP",
            EventCode::RemoveSubscriptionCleanup => "REMOVE_SUBSCRIPTION_CLEANUP",
            EventCode::RemoveConnectionCleanup => "REMOVE_CONNECTION_CLEANUP",
            EventCode::Invocation => "INVOCATION",
            EventCode::Exception => "EXCEPTION",
            EventCode::MalformedFrameLength => "MALFORMED_FRAME_LENGTH",
            EventCode::UnknownHeaderType => "UNKNOWN_HEADER_TYPE",
            EventCode::ErrorSendingHeartbeatPacket => "ERROR_SENDING_HEARTBEAT_PACKET",
            EventCode::CouldNotFindFrameHandlerForNewConnectedSubscription => "COULD_NOT_FIND_FRAME_HANDLER_FOR_NEW_CONNECTED_SUBSCRIPTION",
            EventCode::CouldNotFindInterface => "COULD_NOT_FIND_INTERFACE",
            EventCode::CouldNotSendEntireRetransmit => "COULD_NOT_SEND_ENTIRE_RETRANSMIT",
        }
    }

    /// `FrameIn` style spelling of [`name`](Self::name): each `_` separated
    /// word capitalised, the rest of it lower case.
    fn matches_camel_case(self, token: &str) -> bool {
        let mut rest = token.as_bytes();
        for word in self.name().split('_') {
            let Some((head, tail)) = rest.split_at_checked(word.len()) else {
                return false;
            };
            let Some((first, others)) = head.split_first() else {
                return false;
            };
            let word = word.as_bytes();
            if *first != word[0] || !others.iter().zip(&word[1..]).all(|(t, w)| *t == w.to_ascii_lowercase()) {
                return false;
            }
            rest = tail;
        }
        rest.is_empty()
    }
}

const _: () = assert!(EventCode::ALL.len() < 64);

impl EventCode {
    /// Codes enabled when nothing else is configured.
    pub const PRODUCTION: &'static [EventCode] = &[
        EventCode::Exception,
        EventCode::ErrorSendingHeartbeatPacket,
        EventCode::CouldNotFindFrameHandlerForNewConnectedSubscription,
        EventCode::CouldNotFindInterface,
        EventCode::CouldNotSendEntireRetransmit,
        EventCode::MalformedFrameLength,
        EventCode::UnknownHeaderType,
    ];

    /// The single mask bit owned by this code.
    pub const fn tag_bit(self) -> u64 {
        1u64 << self.id()
    }

    pub fn is_production(self) -> bool {
        Self::PRODUCTION.contains(&self)
    }
}

impl fmt::Display for EventCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EventCode {
    type Err = UnknownEventCode;

    /// Accepts `FRAME_IN` as well as `FrameIn`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let token = s.trim();
        EventCode::ALL
            .iter()
            .copied()
            .find(|code| code.name() == token || code.matches_camel_case(token))
            .ok_or_else(|| UnknownEventCode(token.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_tag_bits_are_distinct_single_bits() {
        let mut seen = 0u64;
        for code in EventCode::ALL {
            let bit = code.tag_bit();
            assert_eq!(bit.count_ones(), 1, "{code}");
            assert_eq!(seen & bit, 0, "{code} shares a bit");
            seen |= bit;
        }
    }

    #[test]
    fn test_ids_follow_declaration_order() {
        for (index, code) in EventCode::ALL.iter().enumerate() {
            assert_eq!(code.id() as usize, index + 1);
        }
    }

    #[test]
    fn test_parse_both_spellings() {
        assert_eq!("FRAME_IN".parse::<EventCode>(), Ok(EventCode::FrameIn));
        assert_eq!("Exception".parse::<EventCode>(), Ok(EventCode::Exception));
        assert_eq!(
            "CouldNotFindInterface".parse::<EventCode>(),
            Ok(EventCode::CouldNotFindInterface)
        );
        assert_eq!(" UNKNOWN_HEADER_TYPE ".parse::<EventCode>(), Ok(EventCode::UnknownHeaderType));
        for loose in ["frame_in", "FRAMEIN", "FrAmEiN", "ExCePtIoN", "frameIn", "FrameInX"] {
            assert_eq!(loose.parse::<EventCode>(), Err(UnknownEventCode(loose.to_string())));
        }
    }

    #[test]
    fn test_names_round_trip() {
        let names: HashSet<_> = EventCode::ALL.iter().map(|c| c.name()).collect();
        assert_eq!(names.len(), EventCode::ALL.len());
        for code in EventCode::ALL {
            assert_eq!(code.to_string().parse::<EventCode>(), Ok(*code));
        }
    }
}
