use bytes::{Buf, BufMut, Bytes};

use crate::{common::ByteStr, postgres::ProtocolError};

/// Integer signess in postgres docs is awful.
pub trait UsizeExt {
    /// Length is `usize` in rust, while sometime postgres want `u32`,
    /// this will panic when overflow instead of wrapping.
    ///
    /// Message size is checked before encoding, see [`Query::check`][crate::postgres::frontend::Query::check].
    fn to_u32(self) -> u32;
}

/// Nul string operation in [`BufMut`]
pub trait BufMutExt {
    /// Write string and nul termination.
    fn put_nul_string(&mut self, string: &str);
}

/// Checked read operation on a backend message body.
///
/// Backend body is untrusted, a short body returns [`ProtocolError`] instead of panic
/// like [`Buf::get_u32`] does.
pub trait BytesExt {
    /// Try to read nul terminated bytes, the nul is consumed but not returned.
    fn get_nul_bytes(&mut self) -> Result<Bytes, ProtocolError>;

    /// Try to read nul terminated string.
    ///
    /// Using [`ByteStr`] avoid allocating [`Vec`] as it required for [`String::from_utf8`]
    fn get_nul_bytestr(&mut self) -> Result<ByteStr, ProtocolError>;

    fn try_u8(&mut self) -> Result<u8, ProtocolError>;

    fn try_u16(&mut self) -> Result<u16, ProtocolError>;

    fn try_i16(&mut self) -> Result<i16, ProtocolError>;

    fn try_u32(&mut self) -> Result<u32, ProtocolError>;

    fn try_i32(&mut self) -> Result<i32, ProtocolError>;

    /// Split `len` bytes from the front.
    fn try_split_to(&mut self, len: usize) -> Result<Bytes, ProtocolError>;
}

/// Helper trait to [`Display`][std::fmt::Display] bytes.
pub trait FmtExt {
    /// Lossy [`Display`][std::fmt::Display] bytes.
    fn lossy(&self) -> LossyFmt<'_>;
}

/// Lossy [`Display`][std::fmt::Display] implementation for bytes.
pub struct LossyFmt<'a>(pub &'a [u8]);

impl UsizeExt for usize {
    fn to_u32(self) -> u32 {
        match u32::try_from(self) {
            Ok(ok) => ok,
            Err(err) => panic!("message size too large for protocol: {err}"),
        }
    }
}

impl<B: BufMut> BufMutExt for B {
    fn put_nul_string(&mut self, string: &str) {
        self.put(string.as_bytes());
        self.put_u8(b'\0');
    }
}

macro_rules! try_get {
    ($name:ident, $get:ident, $ty:ty) => {
        fn $name(&mut self) -> Result<$ty, ProtocolError> {
            if self.remaining() < size_of::<$ty>() {
                return Err(ProtocolError::malformed(concat!("missing ", stringify!($ty))));
            }
            Ok(self.$get())
        }
    };
}

impl BytesExt for Bytes {
    fn get_nul_bytes(&mut self) -> Result<Bytes, ProtocolError> {
        let Some(end) = self.iter().position(|e| matches!(e, b'\0')) else {
            return Err(ProtocolError::malformed("string is not nul terminated"));
        };
        let me = self.split_to(end);
        Buf::advance(self, 1); // nul
        Ok(me)
    }

    fn get_nul_bytestr(&mut self) -> Result<ByteStr, ProtocolError> {
        ByteStr::from_utf8(self.get_nul_bytes()?)
            .map_err(|_| ProtocolError::malformed("string is not valid utf8"))
    }

    try_get!(try_u8, get_u8, u8);
    try_get!(try_u16, get_u16, u16);
    try_get!(try_i16, get_i16, i16);
    try_get!(try_u32, get_u32, u32);
    try_get!(try_i32, get_i32, i32);

    fn try_split_to(&mut self, len: usize) -> Result<Bytes, ProtocolError> {
        if self.len() < len {
            return Err(ProtocolError::malformed("value length exceed message body"));
        }
        Ok(self.split_to(len))
    }
}

impl FmtExt for [u8] {
    fn lossy(&self) -> LossyFmt<'_> {
        LossyFmt(self)
    }
}

impl std::fmt::Display for LossyFmt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for &b in self.0 {
            if b.is_ascii_graphic() || b.is_ascii_whitespace() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:x}")?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for LossyFmt<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "b\"{self}\"")
    }
}
