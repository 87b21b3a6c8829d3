//! Session transition table.
//!
//! Every legal `(state, inbound type)` pair is one row. A pair with no row
//! is a sequence error. The acknowledgment type comes from the message type
//! catalog ([`FpduKind::ack`]), not from this table.

use super::state::SessionState;
use crate::catalog::FpduKind;

/// Handler run for a legal inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Connect,
    Release,
    Abort,
    Create,
    Select,
    Deselect,
    Open,
    Close,
    Write,
    Read,
    Data,
    DataEnd,
    TransEnd,
    Sync,
    Resync,
    Interrupt,
    Message,
    MessageStart,
    MessagePart,
    MessageEnd,
}

/// One row of the table.
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    /// `None` matches every state.
    pub from: Option<SessionState>,
    pub on: FpduKind,
    pub action: Action,
    pub to: SessionState,
}

const fn row(from: SessionState, on: FpduKind, action: Action, to: SessionState) -> Transition {
    Transition {
        from: Some(from),
        on,
        action,
        to,
    }
}

use Action as A;
use FpduKind as K;
use SessionState as S;

pub static TRANSITIONS: &[Transition] = &[
    row(S::Disconnected, K::Connect, A::Connect, S::Connected),
    // idle connection
    row(S::Connected, K::Create, A::Create, S::FileSelected),
    row(S::Connected, K::Select, A::Select, S::FileSelected),
    row(S::Connected, K::Msg, A::Message, S::Connected),
    row(S::Connected, K::MsgDm, A::MessageStart, S::MessageReceiving),
    row(S::Connected, K::Release, A::Release, S::Disconnected),
    row(S::FileDeselected, K::Create, A::Create, S::FileSelected),
    row(S::FileDeselected, K::Select, A::Select, S::FileSelected),
    row(S::FileDeselected, K::Msg, A::Message, S::Connected),
    row(S::FileDeselected, K::MsgDm, A::MessageStart, S::MessageReceiving),
    row(S::FileDeselected, K::Release, A::Release, S::Disconnected),
    // segmented message
    row(S::MessageReceiving, K::MsgMm, A::MessagePart, S::MessageReceiving),
    row(S::MessageReceiving, K::MsgFm, A::MessageEnd, S::Connected),
    // file selected
    row(S::FileSelected, K::Open, A::Open, S::FileOpen),
    row(S::FileSelected, K::Deselect, A::Deselect, S::FileDeselected),
    row(S::FileOpen, K::Write, A::Write, S::Transferring),
    row(S::FileOpen, K::Read, A::Read, S::DataEnded),
    row(S::FileOpen, K::Close, A::Close, S::FileClosed),
    // data phase
    row(S::Transferring, K::Dtf, A::Data, S::Transferring),
    row(S::Transferring, K::DtfDa, A::Data, S::Transferring),
    row(S::Transferring, K::DtfMa, A::Data, S::Transferring),
    row(S::Transferring, K::DtfFa, A::Data, S::Transferring),
    row(S::Transferring, K::Syn, A::Sync, S::Transferring),
    row(S::Transferring, K::Resyn, A::Resync, S::Transferring),
    row(S::Transferring, K::DtfEnd, A::DataEnd, S::DataEnded),
    row(S::Transferring, K::TransEnd, A::TransEnd, S::TransEnded),
    row(S::Transferring, K::Idt, A::Interrupt, S::Interrupted),
    row(S::DataEnded, K::TransEnd, A::TransEnd, S::TransEnded),
    row(S::DataEnded, K::Idt, A::Interrupt, S::Interrupted),
    // after a transfer
    row(S::TransEnded, K::Close, A::Close, S::FileClosed),
    row(S::TransEnded, K::Write, A::Write, S::Transferring),
    row(S::TransEnded, K::Read, A::Read, S::DataEnded),
    row(S::Interrupted, K::Close, A::Close, S::FileClosed),
    row(S::Interrupted, K::Write, A::Write, S::Transferring),
    row(S::Interrupted, K::Read, A::Read, S::DataEnded),
    row(S::Interrupted, K::Resyn, A::Resync, S::Transferring),
    row(S::FileClosed, K::Open, A::Open, S::FileOpen),
    row(S::FileClosed, K::Deselect, A::Deselect, S::FileDeselected),
    Transition {
        from: None,
        on: K::Abort,
        action: A::Abort,
        to: S::Disconnected,
    },
];

/// Row for `kind` arriving in `state`, if legal.
pub fn lookup(state: SessionState, kind: FpduKind) -> Option<&'static Transition> {
    TRANSITIONS
        .iter()
        .find(|t| t.on == kind && t.from.map_or(true, |from| from == state))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_rows_are_unique() {
        let mut seen = HashSet::new();
        for t in TRANSITIONS {
            assert!(seen.insert((t.from, t.on)), "duplicate row {:?} {:?}", t.from, t.on);
        }
    }

    #[test]
    fn test_only_requests_are_accepted() {
        // acknowledgments and responses never arrive at a responder
        for t in TRANSITIONS {
            let name = t.on.name();
            assert!(!name.starts_with("ACK_"), "{name}");
            assert!(!matches!(t.on, K::Aconnect | K::Rconnect | K::Relconf));
        }
    }

    #[test]
    fn test_every_pair_is_classified() {
        let mut legal = 0;
        for state in SessionState::ALL {
            for kind in FpduKind::ALL {
                match lookup(state, kind) {
                    Some(t) => {
                        legal += 1;
                        assert_eq!(t.on, kind);
                        assert!(t.from.is_none() || t.from == Some(state));
                    }
                    None => assert_ne!(kind, K::Abort),
                }
            }
        }
        let any_state_rows = TRANSITIONS.iter().filter(|t| t.from.is_none()).count();
        assert_eq!(
            legal,
            TRANSITIONS.len() - any_state_rows + any_state_rows * SessionState::ALL.len()
        );
    }

    #[test]
    fn test_sequence_errors() {
        assert!(lookup(S::Connected, K::Open).is_none());
        assert!(lookup(S::Transferring, K::Write).is_none());
        assert!(lookup(S::Connected, K::MsgMm).is_none());
        assert!(lookup(S::Disconnected, K::Create).is_none());
        assert!(lookup(S::FileSelected, K::Release).is_none());
        assert!(lookup(S::DataEnded, K::Dtf).is_none());
    }

    #[test]
    fn test_abort_from_anywhere() {
        for state in SessionState::ALL {
            let t = lookup(state, K::Abort).unwrap();
            assert_eq!(t.to, S::Disconnected);
            assert_eq!(t.action, A::Abort);
        }
    }

    #[test]
    fn test_happy_path_walk() {
        let path = [
            (K::Connect, S::Connected),
            (K::Create, S::FileSelected),
            (K::Open, S::FileOpen),
            (K::Write, S::Transferring),
            (K::Dtf, S::Transferring),
            (K::Syn, S::Transferring),
            (K::DtfEnd, S::DataEnded),
            (K::TransEnd, S::TransEnded),
            (K::Close, S::FileClosed),
            (K::Deselect, S::FileDeselected),
            (K::Release, S::Disconnected),
        ];
        let mut state = S::Disconnected;
        for (kind, expected) in path {
            state = lookup(state, kind).unwrap().to;
            assert_eq!(state, expected, "after {kind}");
        }
    }
}
