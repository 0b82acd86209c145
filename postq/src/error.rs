//! `postq` error types.
use std::{backtrace::Backtrace, fmt, io};

use crate::{
    connection::{ConnectError, NotConnected, ParseError},
    phase::UnsupportedAuth,
    postgres::{ErrorResponse, ProtocolError, frontend::InvalidMessage},
    row::DecodeError,
    stream::{Timeout, UnexpectedEof},
};

/// A specialized [`Result`] type for `postq` operation.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// All possible error from `postq` library.
pub struct Error {
    context: String,
    backtrace: Backtrace,
    kind: ErrorKind,
}

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    pub fn into_kind(self) -> ErrorKind {
        self.kind
    }

    pub fn backtrace(&self) -> &Backtrace {
        &self.backtrace
    }

    /// Returns the database error, if this error is returned by the server.
    pub fn as_database(&self) -> Option<&ErrorResponse> {
        match &self.kind {
            ErrorKind::Database(err) => Some(err),
            _ => None,
        }
    }

    /// Attach context message, displayed before the error.
    pub(crate) fn context(mut self, context: impl Into<String>) -> Self {
        self.context = context.into();
        self
    }
}

/// All possible error kind from `postq` library.
pub enum ErrorKind {
    /// Invalid configuration.
    Config(ParseError),
    /// Failed to connect the socket.
    Connect(ConnectError),
    /// Server requested authentication method other than trust.
    UnsupportedAuth(UnsupportedAuth),
    /// Message is not valid for the current phase or malformed.
    Protocol(ProtocolError),
    /// Message cannot be sent, e.g. query containing nul character.
    InvalidMessage(InvalidMessage),
    /// Stream closed in the middle of a message.
    UnexpectedEof(UnexpectedEof),
    /// Error returned by the server.
    Database(ErrorResponse),
    /// Operation requires a ready connection.
    NotConnected(NotConnected),
    /// Failed to decode a row value.
    Decode(DecodeError),
    /// Operation did not complete within configured timeout.
    Timeout(Timeout),
    Io(io::Error),
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for Error {
            fn from($pat: $ty) -> Self {
                let backtrace = std::backtrace::Backtrace::capture();
                Self { context: String::new(), backtrace, kind: $body }
            }
        }
    };
}

from!(<ErrorKind>e => e);
from!(<ParseError>e => ErrorKind::Config(e));
from!(<ConnectError>e => ErrorKind::Connect(e));
from!(<UnsupportedAuth>e => ErrorKind::UnsupportedAuth(e));
from!(<ProtocolError>e => ErrorKind::Protocol(e));
from!(<InvalidMessage>e => ErrorKind::InvalidMessage(e));
from!(<UnexpectedEof>e => ErrorKind::UnexpectedEof(e));
from!(<ErrorResponse>e => ErrorKind::Database(e));
from!(<NotConnected>e => ErrorKind::NotConnected(e));
from!(<DecodeError>e => ErrorKind::Decode(e));
from!(<Timeout>e => ErrorKind::Timeout(e));
from!(<io::Error>e => ErrorKind::Io(e));

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            ErrorKind::Connect(e) => Some(e),
            ErrorKind::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.context.is_empty() {
            write!(f, "{}: ", self.context)?;
        }

        fmt::Display::fmt(&self.kind, f)?;

        if let std::backtrace::BacktraceStatus::Captured = self.backtrace.status() {
            let mut backtrace = self.backtrace.to_string();
            write!(f, "\n\n")?;
            writeln!(f, "Stack backtrace:")?;
            backtrace.truncate(backtrace.trim_end().len());
            write!(f, "{}", backtrace)?;
        }

        Ok(())
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

impl std::error::Error for ErrorKind { }

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => e.fmt(f),
            Self::Connect(e) => e.fmt(f),
            Self::UnsupportedAuth(e) => e.fmt(f),
            Self::Protocol(e) => e.fmt(f),
            Self::InvalidMessage(e) => e.fmt(f),
            Self::UnexpectedEof(e) => e.fmt(f),
            Self::Database(e) => e.fmt(f),
            Self::NotConnected(e) => e.fmt(f),
            Self::Decode(e) => e.fmt(f),
            Self::Timeout(e) => e.fmt(f),
            Self::Io(e) => e.fmt(f),
        }
    }
}

impl fmt::Debug for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
