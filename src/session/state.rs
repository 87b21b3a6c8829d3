//! Session states.

use std::fmt;

/// Where a connection is in the CONNECT..RELEASE sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// No CONNECT accepted yet, or the session has ended.
    #[default]
    Disconnected,
    Connected,
    /// Between MSGDM and MSGFM.
    MessageReceiving,
    FileSelected,
    FileOpen,
    /// WRITE or READ acknowledged; data frames, SYN and RESYN flow here.
    Transferring,
    /// DTF_END seen (or sent), TRANS_END expected.
    DataEnded,
    /// IDT acknowledged; the transfer can be resumed or closed.
    Interrupted,
    TransEnded,
    FileClosed,
    FileDeselected,
}

impl SessionState {
    pub const ALL: [SessionState; 11] = [
        SessionState::Disconnected,
        SessionState::Connected,
        SessionState::MessageReceiving,
        SessionState::FileSelected,
        SessionState::FileOpen,
        SessionState::Transferring,
        SessionState::DataEnded,
        SessionState::Interrupted,
        SessionState::TransEnded,
        SessionState::FileClosed,
        SessionState::FileDeselected,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SessionState::Disconnected => "DISCONNECTED",
            SessionState::Connected => "CONNECTED",
            SessionState::MessageReceiving => "MESSAGE_RECEIVING",
            SessionState::FileSelected => "FILE_SELECTED",
            SessionState::FileOpen => "FILE_OPEN",
            SessionState::Transferring => "TRANSFERRING",
            SessionState::DataEnded => "DATA_ENDED",
            SessionState::Interrupted => "INTERRUPTED",
            SessionState::TransEnded => "TRANS_ENDED",
            SessionState::FileClosed => "FILE_CLOSED",
            SessionState::FileDeselected => "FILE_DESELECTED",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
