//! Bytes and text markers of the procServ control connection.

use crate::state::RunState;

/// Last text of the banner procServ sends to a new connection.
pub const MSG_BANNER_END: &str = "server started at";
pub const MSG_SHUT_DOWN: &str = "SHUT DOWN";
pub const MSG_KILLED: &str = "process was killed";
pub const MSG_NEW_CHILD: &str = "new child";
/// Prompt printed by the procmgrd shell.
pub const MSG_PROMPT: &str = "\r\n> ";
/// Wording used since procServ 2.8; older releases say "auto restart".
pub const MSG_AUTORESTART_MODE: &str = "auto restart mode";
pub const MSG_AUTORESTART_CHANGE: &str = "auto restart to ";
pub const MSG_AUTORESTART_MODE_CHANGE: &str = "auto restart mode to ";

/// Byte produced by holding ctrl with `letter`, e.g. `ctrl('X') == 0x18`.
pub const fn ctrl(letter: char) -> u8 {
    (letter as u8) & 0x1f
}

/// Control bytes understood by procServ.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlCode {
    /// `^X`: start a stopped child or stop a running one.
    ToggleRunning,
    /// `^T`: cycle the autorestart mode.
    ToggleAutorestart,
    /// `^Q`: shut procServ down. Ignored while the child runs.
    Close,
    /// `^U`: discard the current input line.
    ClearLine,
}

impl ControlCode {
    pub const fn byte(self) -> u8 {
        match self {
            Self::ToggleRunning => ctrl('X'),
            Self::ToggleAutorestart => ctrl('T'),
            Self::Close => ctrl('Q'),
            Self::ClearLine => ctrl('U'),
        }
    }

    pub fn from_byte(byte: u8) -> Option<Self> {
        [
            Self::ToggleRunning,
            Self::ToggleAutorestart,
            Self::Close,
            Self::ClearLine,
        ]
        .into_iter()
        .find(|code| code.byte() == byte)
    }
}

/// Text procServ prints once it has acted on `code` while the child is in `run`.
///
/// An empty slice means nothing is printed; closing is confirmed by the
/// connection dropping instead.
pub fn ack_markers(code: ControlCode, run: RunState) -> &'static [&'static str] {
    match (code, run) {
        (ControlCode::ToggleAutorestart, _) => &[MSG_AUTORESTART_CHANGE, MSG_AUTORESTART_MODE_CHANGE],
        (ControlCode::ToggleRunning, RunState::NotRunning) => &[MSG_NEW_CHILD],
        (ControlCode::ToggleRunning, RunState::Running) => &[MSG_KILLED],
        (ControlCode::Close, _) | (ControlCode::ClearLine, _) => &[],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctrl_maps_letters_to_control_bytes() {
        assert_eq!(ctrl('X'), 0x18);
        assert_eq!(ctrl('x'), 0x18);
        assert_eq!(ctrl('T'), 0x14);
        assert_eq!(ctrl('Q'), 0x11);
        assert_eq!(ctrl('U'), 0x15);
        assert_eq!(ctrl('A'), 0x01);
    }

    #[test]
    fn control_codes_round_trip_through_bytes() {
        for code in [
            ControlCode::ToggleRunning,
            ControlCode::ToggleAutorestart,
            ControlCode::Close,
            ControlCode::ClearLine,
        ] {
            assert_eq!(ControlCode::from_byte(code.byte()), Some(code));
        }
        assert_eq!(ControlCode::from_byte(b'a'), None);
    }

    #[test]
    fn stop_and_start_wait_for_different_markers() {
        assert_eq!(
            ack_markers(ControlCode::ToggleRunning, RunState::NotRunning),
            [MSG_NEW_CHILD]
        );
        assert_eq!(
            ack_markers(ControlCode::ToggleRunning, RunState::Running),
            [MSG_KILLED]
        );
        assert!(ack_markers(ControlCode::Close, RunState::NotRunning).is_empty());
    }
}
