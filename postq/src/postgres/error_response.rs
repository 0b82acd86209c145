//! Error and notice message fields.
//!
//! <https://www.postgresql.org/docs/current/protocol-error-fields.html>
use bytes::{Buf, Bytes};
use std::{collections::BTreeMap, fmt};

use super::{BackendProtocol, ProtocolError};
use crate::{common::ByteStr, ext::BytesExt};

/// Identifies a field in [`ErrorResponse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorField {
    /// `S`, the severity, one of ERROR, FATAL, or PANIC (in an error message),
    /// or WARNING, NOTICE, DEBUG, INFO, or LOG (in a notice message), possibly localized.
    Severity,
    /// `V`, same as [`ErrorField::Severity`] except that the contents are never localized.
    SeverityNonLocalized,
    /// `C`, the SQLSTATE code for the error.
    Code,
    /// `M`, the primary human-readable error message.
    Message,
    /// `D`, an optional secondary error message carrying more detail about the problem.
    Detail,
    /// `H`, an optional suggestion what to do about the problem.
    Hint,
    /// `P`, a decimal ASCII integer, indicating an error cursor position as an index into
    /// the original query string.
    Position,
    /// `p`, same as [`ErrorField::Position`], but for an internally generated command.
    InternalPosition,
    /// `q`, the text of a failed internally-generated command.
    InternalQuery,
    /// `W`, an indication of the context in which the error occurred.
    Where,
    /// `s`, the name of the schema, if the error was associated with a specific database object.
    Schema,
    /// `t`, the name of the table, if the error was associated with a specific table.
    Table,
    /// `c`, the name of the column, if the error was associated with a specific table column.
    Column,
    /// `d`, the name of the data type, if the error was associated with a specific data type.
    DataType,
    /// `n`, the name of the constraint, if the error was associated with a specific constraint.
    Constraint,
    /// `F`, the file name of the source-code location where the error was reported.
    File,
    /// `L`, the line number of the source-code location where the error was reported.
    Line,
    /// `R`, the name of the source-code routine reporting the error.
    Routine,
    /// Field type not recognized, keyed by its raw code.
    Unknown(u8),
}

impl ErrorField {
    /// Map a field type code to [`ErrorField`].
    pub const fn from_code(code: u8) -> ErrorField {
        match code {
            b'S' => Self::Severity,
            b'V' => Self::SeverityNonLocalized,
            b'C' => Self::Code,
            b'M' => Self::Message,
            b'D' => Self::Detail,
            b'H' => Self::Hint,
            b'P' => Self::Position,
            b'p' => Self::InternalPosition,
            b'q' => Self::InternalQuery,
            b'W' => Self::Where,
            b's' => Self::Schema,
            b't' => Self::Table,
            b'c' => Self::Column,
            b'd' => Self::DataType,
            b'n' => Self::Constraint,
            b'F' => Self::File,
            b'L' => Self::Line,
            b'R' => Self::Routine,
            code => Self::Unknown(code),
        }
    }

    /// Returns the field type code.
    pub const fn code(&self) -> u8 {
        match self {
            Self::Severity => b'S',
            Self::SeverityNonLocalized => b'V',
            Self::Code => b'C',
            Self::Message => b'M',
            Self::Detail => b'D',
            Self::Hint => b'H',
            Self::Position => b'P',
            Self::InternalPosition => b'p',
            Self::InternalQuery => b'q',
            Self::Where => b'W',
            Self::Schema => b's',
            Self::Table => b't',
            Self::Column => b'c',
            Self::DataType => b'd',
            Self::Constraint => b'n',
            Self::File => b'F',
            Self::Line => b'L',
            Self::Routine => b'R',
            Self::Unknown(code) => *code,
        }
    }
}

/// Identifies the message as an error.
///
/// The message body consists of one or more identified fields, followed by a zero byte as a terminator.
/// Fields can appear in any order.
///
/// For each field there is the following:
///
/// `Byte1` A code identifying the field type; if zero, this is the message terminator and no string follows.
///
/// `String` The field value.
///
/// Unrecognized field type is kept as [`ErrorField::Unknown`], all values are kept verbatim.
/// The same layout is used by `NoticeResponse`.
#[derive(Clone)]
pub struct ErrorResponse {
    fields: BTreeMap<ErrorField, ByteStr>,
}

impl ErrorResponse {
    pub const MSGTYPE: u8 = b'E';

    /// Decode error fields from message body.
    ///
    /// Value with invalid utf8 is replaced lossily rather than failing the whole error.
    pub fn parse(mut body: Bytes) -> Result<Self, ProtocolError> {
        let mut fields = BTreeMap::new();

        while body.remaining() > 1 {
            let code = body.get_u8();
            if code == b'\0' {
                break;
            }
            let value = ByteStr::from_utf8_lossy(body.get_nul_bytes()?);
            fields.insert(ErrorField::from_code(code), value);
        }

        Ok(Self { fields })
    }

    /// Get field value.
    pub fn get(&self, field: ErrorField) -> Option<&str> {
        self.fields.get(&field).map(ByteStr::as_str)
    }

    /// The severity, empty if server did not send one.
    pub fn severity(&self) -> &str {
        self.get(ErrorField::Severity).unwrap_or_default()
    }

    /// The SQLSTATE code, empty if server did not send one.
    pub fn code(&self) -> &str {
        self.get(ErrorField::Code).unwrap_or_default()
    }

    /// The primary error message, empty if server did not send one.
    pub fn message(&self) -> &str {
        self.get(ErrorField::Message).unwrap_or_default()
    }

    pub fn detail(&self) -> Option<&str> {
        self.get(ErrorField::Detail)
    }

    pub fn hint(&self) -> Option<&str> {
        self.get(ErrorField::Hint)
    }

    /// Error cursor position, one based index into the query string.
    pub fn position(&self) -> Option<u32> {
        self.get(ErrorField::Position)?.parse().ok()
    }

    /// Returns the number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Returns `true` if there is no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over all fields.
    pub fn fields(&self) -> impl Iterator<Item = (ErrorField, &str)> {
        self.fields.iter().map(|(k, v)| (*k, v.as_str()))
    }
}

impl BackendProtocol for ErrorResponse {
    fn decode(msgtype: u8, body: Bytes) -> Result<Self,ProtocolError> {
        if Self::MSGTYPE != msgtype {
            return Err(ProtocolError::unexpected(Self::MSGTYPE, msgtype))
        }
        Self::parse(body)
    }
}

impl std::error::Error for ErrorResponse { }

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity(), self.message())?;
        if let Some(code) = self.get(ErrorField::Code) {
            write!(f, " ({code})")?;
        }
        if let Some(detail) = self.detail() {
            write!(f, "\nDETAIL: {detail}")?;
        }
        if let Some(hint) = self.hint() {
            write!(f, "\nHINT: {hint}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_map();
        for (field, value) in &self.fields {
            match field {
                ErrorField::Unknown(code) => dbg.entry(&format_args!("Unknown({:?})", *code as char), value),
                field => dbg.entry(field, value),
            };
        }
        dbg.finish()
    }
}
