//! Postgres Frontend Messages
//!
//! <https://www.postgresql.org/docs/current/protocol-message-formats.html>
use bytes::BytesMut;
use std::fmt;

use super::frame;
use crate::{common::ByteStr, ext::BufMutExt};

/// Maximum body of a frontend message, the length field is a signed 32 bit integer
/// which also counts itself.
pub const MAX_BODY_LEN: usize = i32::MAX as usize - 4;

/// Write a frontend message to `buf`.
///
/// The length field is computed from the written body.
pub fn write<F: FrontendProtocol>(msg: F, buf: &mut BytesMut) {
    frame::write_with(Some(F::MSGTYPE), buf, |buf| msg.encode(buf));
}

/// A type which can be encoded into postgres frontend message
pub trait FrontendProtocol {
    /// Message type.
    const MSGTYPE: u8;

    /// Write the main body of the message.
    ///
    /// Message type and length is written by [`write`].
    fn encode(self, buf: &mut BytesMut);
}

/// Protocol version 3.0.
///
/// The most significant 16 bits are the major version number (3 for the protocol described here).
/// The least significant 16 bits are the minor version number (0 for the protocol described here).
pub const PROTOCOL_VERSION: u32 = 3 << 16;

/// Postgres Startup frontend message
///
/// For historical reasons, the very first message sent by the client (the [`Startup`] message)
/// has no initial message-type byte, thus [`Startup`] does not implement [`FrontendProtocol`].
///
/// To write startup message, use [`Startup::write`].
#[derive(Debug)]
pub struct Startup<'a> {
    /// The database user name to connect as. Required; there is no default.
    pub user: &'a str,
    /// The database to connect to. Defaults to the user name.
    pub database: Option<&'a str>,
    /// Other run-time parameters, applied as session defaults.
    ///
    /// Parameter names beginning with `_pq_.` are reserved for use as protocol extensions.
    pub params: &'a [(ByteStr, ByteStr)],
}

impl Startup<'_> {
    /// Check that every string can be sent as a nul terminated string.
    pub fn check(&self) -> Result<(), InvalidMessage> {
        check_str(self.user, "user contains nul character")?;
        if let Some(db) = self.database {
            check_str(db, "database contains nul character")?;
        }
        for (name, value) in self.params {
            check_str(name, "parameter name contains nul character")?;
            check_str(value, "parameter value contains nul character")?;
        }
        Ok(())
    }

    pub fn write(self, buf: &mut BytesMut) {
        frame::write_with(None, buf, |buf| {
            buf.extend_from_slice(&PROTOCOL_VERSION.to_be_bytes());

            // The protocol version number is followed by one or more pairs of parameter name and value strings.

            buf.put_nul_string("user");
            buf.put_nul_string(self.user);

            if let Some(db) = self.database {
                buf.put_nul_string("database");
                buf.put_nul_string(db);
            }

            for (name, value) in self.params {
                buf.put_nul_string(name);
                buf.put_nul_string(value);
            }

            // A zero byte is required as a terminator after the last name/value pair.
            buf.extend_from_slice(b"\0");
        });
    }
}

/// Identifies the message as a simple query
#[derive(Debug)]
pub struct Query<'a> {
    /// the query string itself
    pub sql: &'a str,
}

impl Query<'_> {
    /// Check that the query can be sent in a single message.
    pub fn check(&self) -> Result<(), InvalidMessage> {
        if self.sql.len() >= MAX_BODY_LEN {
            return Err(InvalidMessage::new("query too large"));
        }
        check_str(self.sql, "query contains nul character")
    }
}

impl FrontendProtocol for Query<'_> {
    const MSGTYPE: u8 = b'Q';

    fn encode(self, buf: &mut BytesMut) {
        buf.put_nul_string(self.sql);
    }
}

/// Identifies the message as a termination.
///
/// The normal, graceful termination procedure is that the frontend sends a Terminate
/// message and immediately closes the connection.
#[derive(Debug)]
pub struct Terminate;

impl FrontendProtocol for Terminate {
    const MSGTYPE: u8 = b'X';

    fn encode(self, _: &mut BytesMut) { }
}

fn check_str(string: &str, reason: &'static str) -> Result<(), InvalidMessage> {
    match string.contains('\0') {
        true => Err(InvalidMessage::new(reason)),
        false => Ok(()),
    }
}

/// Frontend message cannot be represented in the protocol.
///
/// Strings are nul terminated, thus cannot contain nul character.
pub struct InvalidMessage {
    reason: &'static str,
}

impl InvalidMessage {
    fn new(reason: &'static str) -> Self {
        Self { reason }
    }

    pub fn reason(&self) -> &'static str {
        self.reason
    }
}

impl std::error::Error for InvalidMessage { }

impl fmt::Display for InvalidMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid message: {}", self.reason)
    }
}

impl fmt::Debug for InvalidMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
