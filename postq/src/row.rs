//! Postgres row operation.
//!
//! - [`Row`]
//! - [`Column`]
//! - [`Field`]
//! - [`FromRow`]
//! - [`Decode`]
//!
//! - [`Index`]
//! - [`DecodeError`]
//!
//! Only text format is used in simple query, every value is decoded from its textual
//! representation.
use bytes::Bytes;
use std::{borrow::Cow, fmt, str::Utf8Error, string::FromUtf8Error, sync::Arc};

use crate::{
    common::ByteStr,
    ext::{BytesExt, FmtExt},
    postgres::{
        Oid, ProtocolError,
        backend::{DataRow, RowDescription},
    },
};

/// Column metadata from `RowDescription`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    name: ByteStr,
    table_oid: Oid,
    attribute: i16,
    oid: Oid,
    type_size: i16,
    type_modifier: i32,
    format: i16,
}

impl Column {
    /// Parse all fields in `RowDescription` message.
    pub(crate) fn parse_all(desc: RowDescription) -> Result<Arc<[Column]>, ProtocolError> {
        let RowDescription { field_len, mut body } = desc;
        let mut columns = Vec::with_capacity(field_len as usize);

        for _ in 0..field_len {
            columns.push(Column {
                name: body.get_nul_bytestr()?,
                table_oid: body.try_u32()?,
                attribute: body.try_i16()?,
                oid: body.try_u32()?,
                type_size: body.try_i16()?,
                type_modifier: body.try_i32()?,
                format: body.try_i16()?,
            });
        }

        Ok(columns.into())
    }

    /// The field name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// If the field can be identified as a column of a specific table, the object ID of the table;
    /// otherwise zero.
    pub fn table_oid(&self) -> Oid {
        self.table_oid
    }

    /// If the field can be identified as a column of a specific table, the attribute number of the
    /// column; otherwise zero.
    pub fn attribute(&self) -> i16 {
        self.attribute
    }

    /// The object ID of the field's data type.
    pub fn oid(&self) -> Oid {
        self.oid
    }

    /// The data type size (see `pg_type.typlen`). Negative values denote variable-width types.
    pub fn type_size(&self) -> i16 {
        self.type_size
    }

    /// The type modifier (see `pg_attribute.atttypmod`).
    pub fn type_modifier(&self) -> i32 {
        self.type_modifier
    }

    /// The format code being used for the field. Zero (text) or one (binary).
    pub fn format(&self) -> i16 {
        self.format
    }
}

/// Postgres row.
///
/// Values are split eagerly from the `DataRow` message and share its buffer.
#[derive(Clone)]
pub struct Row {
    columns: Arc<[Column]>,
    values: Vec<Option<Bytes>>,
}

impl Row {
    /// Split `DataRow` values.
    ///
    /// `columns` may be empty if there is no `RowDescription` preceding the row, in that case
    /// values are only addressable by index.
    pub(crate) fn new(columns: Arc<[Column]>, row: DataRow) -> Result<Self, ProtocolError> {
        let DataRow { column_len, mut body } = row;

        if !columns.is_empty() && columns.len() != column_len as usize {
            return Err(ProtocolError::malformed("DataRow column count differ from RowDescription"));
        }

        let mut values = Vec::with_capacity(column_len as usize);
        for _ in 0..column_len {
            let value = match body.try_i32()? {
                -1 => None,
                len if len < 0 => return Err(ProtocolError::malformed("negative value length")),
                len => Some(body.try_split_to(len as usize)?),
            };
            values.push(value);
        }

        Ok(Self { columns, values })
    }

    /// Returns `true` if row contains no values.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the number of values.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns columns description.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Get value as string, `None` if the value is `NULL`.
    ///
    /// ```no_run
    /// # fn f(row: postq::Row) -> Result<(), postq::DecodeError> {
    /// let name = row.field("name")?;
    /// let first = row.field(0)?;
    /// # Ok(()) }
    /// ```
    pub fn field<I: Index>(&self, idx: I) -> Result<Option<&str>, DecodeError> {
        let nth = idx.position(&self.columns, self.values.len())?;
        match &self.values[nth] {
            Some(value) => Ok(Some(std::str::from_utf8(value)?)),
            None => Ok(None),
        }
    }

    /// Try get and decode value.
    pub fn try_get<I: Index, D: Decode>(&self, idx: I) -> Result<D, DecodeError> {
        let nth = idx.position(&self.columns, self.values.len())?;
        D::decode(self.get_field(nth))
    }

    /// Try decode type using [`FromRow`] implementation.
    pub fn decode<R: FromRow>(self) -> Result<R, DecodeError> {
        R::from_row(self)
    }

    /// Iterate over every value with its column.
    pub fn iter(&self) -> Iter<'_> {
        Iter { row: self, nth: 0 }
    }

    fn get_field(&self, nth: usize) -> Field<'_> {
        Field {
            column: self.columns.get(nth),
            value: self.values[nth].as_ref(),
        }
    }
}

impl<'a> IntoIterator for &'a Row {
    type Item = Field<'a>;

    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over [`Row`] values.
#[derive(Debug)]
pub struct Iter<'a> {
    row: &'a Row,
    nth: usize,
}

impl<'a> Iterator for Iter<'a> {
    type Item = Field<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.nth == self.row.len() {
            return None;
        }
        let field = self.row.get_field(self.nth);
        self.nth += 1;
        Some(field)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.row.len() - self.nth;
        (len, Some(len))
    }
}

impl ExactSizeIterator for Iter<'_> { }

impl fmt::Debug for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut dbg = f.debug_map();
        for (nth, field) in self.iter().enumerate() {
            match field.column {
                Some(col) => dbg.key(&col.name),
                None => dbg.key(&nth),
            };
            match field.value {
                Some(value) => dbg.value(&value.lossy()),
                None => dbg.value(&format_args!("NULL")),
            };
        }
        dbg.finish()
    }
}

/// A single value in a [`Row`].
#[derive(Debug, Clone, Copy)]
pub struct Field<'a> {
    column: Option<&'a Column>,
    value: Option<&'a Bytes>,
}

impl<'a> Field<'a> {
    /// Returns column description, `None` if the row has no description.
    pub fn column(&self) -> Option<&'a Column> {
        self.column
    }

    /// Returns column name, empty if the row has no description.
    pub fn name(&self) -> &'a str {
        self.column.map(Column::name).unwrap_or_default()
    }

    /// Returns column type [`Oid`], zero if the row has no description.
    pub fn oid(&self) -> Oid {
        self.column.map(Column::oid).unwrap_or_default()
    }

    /// Return `true` if value is NULL.
    pub fn is_null(&self) -> bool {
        self.value.is_none()
    }

    /// Returns the raw value.
    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        self.value.map(|e| &e[..])
    }

    /// Returns the value as string, `None` if value is NULL.
    pub fn as_str(&self) -> Result<Option<&'a str>, DecodeError> {
        match self.value {
            Some(value) => Ok(Some(std::str::from_utf8(value)?)),
            None => Ok(None),
        }
    }

    /// Returns the value as string.
    ///
    /// Return [`DecodeError::Null`] if value is NULL.
    pub fn try_str(&self) -> Result<&'a str, DecodeError> {
        self.as_str()?.ok_or(DecodeError::Null)
    }

    /// Try decode type using [`Decode`] implementation.
    pub fn decode<D: Decode>(self) -> Result<D, DecodeError> {
        D::decode(self)
    }
}

// ===== Traits =====

/// Type that can be constructed from a row.
pub trait FromRow: Sized {
    /// Construct self from row.
    fn from_row(row: Row) -> Result<Self, DecodeError>;
}

impl FromRow for Row {
    fn from_row(row: Row) -> Result<Self, DecodeError> {
        Ok(row)
    }
}

impl FromRow for () {
    fn from_row(_: Row) -> Result<Self, DecodeError> {
        Ok(())
    }
}

macro_rules! from_row_tuple {
    ($($t:ident $i:literal),*) => {
        impl<$($t),*> FromRow for ($($t),*,)
        where
            $($t: Decode),*
        {
            fn from_row(row: Row) -> Result<Self, DecodeError> {
                Ok((
                    $(row.try_get::<usize, $t>($i)?),*,
                ))
            }
        }
    };
}

from_row_tuple!(T0 0);
from_row_tuple!(T0 0, T1 1);
from_row_tuple!(T0 0, T1 1, T2 2);
from_row_tuple!(T0 0, T1 1, T2 2, T3 3);

/// A type that can be decoded from text format [`Field`].
pub trait Decode: Sized {
    /// Try decode self from field.
    fn decode(field: Field<'_>) -> Result<Self, DecodeError>;
}

impl<T: Decode> Decode for Option<T> {
    fn decode(field: Field<'_>) -> Result<Self, DecodeError> {
        match field.is_null() {
            true => Ok(None),
            false => field.decode().map(Some),
        }
    }
}

impl Decode for () {
    fn decode(_: Field<'_>) -> Result<Self, DecodeError> {
        Ok(())
    }
}

impl Decode for String {
    fn decode(field: Field<'_>) -> Result<Self, DecodeError> {
        field.try_str().map(Into::into)
    }
}

impl Decode for ByteStr {
    fn decode(field: Field<'_>) -> Result<Self, DecodeError> {
        let value = field.value.ok_or(DecodeError::Null)?;
        Ok(ByteStr::from_utf8(value.clone())?)
    }
}

impl Decode for bool {
    fn decode(field: Field<'_>) -> Result<Self, DecodeError> {
        match field.try_str()? {
            "t" | "true" => Ok(true),
            "f" | "false" => Ok(false),
            value => Err(DecodeError::parse::<Self>(value)),
        }
    }
}

macro_rules! decode_from_str {
    ($($ty:ty),*) => {$(
        impl Decode for $ty {
            fn decode(field: Field<'_>) -> Result<Self, DecodeError> {
                let value = field.try_str()?;
                value.parse().map_err(|_| DecodeError::parse::<Self>(value))
            }
        }
    )*};
}

decode_from_str!(i16, i32, i64, f32, f64);

/// Type that can be used for indexing column.
pub trait Index: Sized + sealed::Sealed {
    /// Returns the nth value.
    fn position(self, columns: &[Column], len: usize) -> Result<usize, DecodeError>;
}

impl Index for usize {
    fn position(self, _: &[Column], len: usize) -> Result<usize, DecodeError> {
        match self < len {
            true => Ok(self),
            false => Err(DecodeError::IndexOutOfBounds(self)),
        }
    }
}

impl Index for &str {
    /// The first column with matching name.
    fn position(self, columns: &[Column], _: usize) -> Result<usize, DecodeError> {
        match columns.iter().position(|col| col.name == self) {
            Some(nth) => Ok(nth),
            None => Err(DecodeError::ColumnNotFound(String::from(self).into())),
        }
    }
}

mod sealed {
    pub trait Sealed { }
    impl Sealed for usize { }
    impl Sealed for &str { }
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for DecodeError {
            fn from($pat: $ty) -> Self {
                $body
            }
        }
    };
}

/// An error when decoding row value.
pub enum DecodeError {
    /// Postgres return non utf8 string.
    Utf8(Utf8Error),
    /// Column requested not found.
    ColumnNotFound(Cow<'static,str>),
    /// Index requested is out of bounds.
    IndexOutOfBounds(usize),
    /// Column data type does not match the requested type.
    OidMismatch(Oid),
    /// Value is NULL.
    Null,
    /// Value text is not valid for the requested type.
    Parse {
        ty: &'static str,
        value: String,
    },
    /// Failed to deserialize using `serde_json`.
    #[cfg(feature = "json")]
    Json(serde_json::error::Error),
}

impl DecodeError {
    fn parse<T>(value: &str) -> Self {
        Self::Parse { ty: std::any::type_name::<T>(), value: value.into() }
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to decode value, ")?;
        match self {
            Self::Utf8(e) => write!(f, "{e}"),
            Self::ColumnNotFound(name) => write!(f, "column not found: {name:?}"),
            Self::IndexOutOfBounds(u) => write!(f, "index out of bounds: {u:?}"),
            Self::OidMismatch(oid) => write!(f, "data type mismatch, found oid {oid}"),
            Self::Null => write!(f, "unexpected NULL value"),
            Self::Parse { ty, value } => write!(f, "invalid `{ty}`: {value:?}"),
            #[cfg(feature = "json")]
            Self::Json(e) => write!(f, "{e}"),
        }
    }
}

from!(<Utf8Error>e => Self::Utf8(e));
from!(<FromUtf8Error>e => Self::Utf8(e.utf8_error()));
#[cfg(feature = "json")]
from!(<serde_json::error::Error>e => Self::Json(e));

impl std::error::Error for DecodeError { }

impl fmt::Debug for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}
