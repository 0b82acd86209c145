//! Protocol error
use std::fmt;

use super::BackendMessage;

/// An error when translating buffer from postgres.
///
/// Any `ProtocolError` means the connection cannot be trusted to be in sync anymore.
pub enum ProtocolError {
    /// Message type is not valid in current phase.
    Unexpected {
        expect: Option<u8>,
        found: u8,
        phase: Option<&'static str>,
    },
    /// Authentication request code is unknown.
    UnknownAuth {
        auth: u32,
    },
    /// Message length is less than the length field itself.
    InvalidLength {
        len: u32,
    },
    /// Message body exceed configured maximum.
    TooLarge {
        len: usize,
        max: usize,
    },
    /// Message body does not match its message type layout.
    Malformed {
        reason: &'static str,
    },
}

impl std::error::Error for ProtocolError { }

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            ProtocolError::Unexpected { expect, found, phase } => {
                let found_name = BackendMessage::message_name(found);
                match expect {
                    Some(m) => {
                        write!(
                            f,
                            "Expected message `{}` found `{found_name}`",
                            BackendMessage::message_name(m),
                        )?
                    },
                    None => write!(f, "Unexpected message `{found_name}`")?,
                }
                if found_name == "Unknown" {
                    write!(f, " ({:?})", found as char)?
                }
                if let Some(phase) = phase {
                    write!(f, " in `{phase}`")?
                }
                Ok(())
            },
            ProtocolError::UnknownAuth { auth } => {
                write!(f, "Unknown authentication request code: {auth}")
            },
            ProtocolError::InvalidLength { len } => {
                write!(f, "Invalid message length: {len}")
            },
            ProtocolError::TooLarge { len, max } => {
                write!(f, "Message body too large: {len} bytes exceed maximum of {max} bytes")
            },
            ProtocolError::Malformed { reason } => {
                write!(f, "Malformed message: {reason}")
            },
        }
    }
}

impl fmt::Debug for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl ProtocolError {
    pub(crate) fn unknown(found: u8) -> ProtocolError {
        Self::Unexpected {
            expect: None,
            found,
            phase: None,
        }
    }

    pub(crate) fn unexpected(expect: u8, found: u8) -> ProtocolError {
        Self::Unexpected {
            expect: Some(expect),
            found,
            phase: None,
        }
    }

    pub(crate) fn unexpected_phase(found: u8, phase: &'static str) -> ProtocolError {
        Self::Unexpected {
            expect: None,
            found,
            phase: Some(phase),
        }
    }

    pub(crate) fn unknown_auth(auth: u32) -> ProtocolError {
        Self::UnknownAuth { auth }
    }

    pub(crate) fn malformed(reason: &'static str) -> ProtocolError {
        Self::Malformed { reason }
    }
}
