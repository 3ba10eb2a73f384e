//! Length-prefixed payload fields.
//!
//! Text fields are `[len: u8][utf8 bytes]`, integers are big-endian. Names may
//! therefore contain spaces or separators without any parsing ambiguity.

use crate::errors::WireError;

/// Longest text field representable with a one-byte length prefix.
pub const MAX_TEXT_FIELD: usize = u8::MAX as usize;

#[derive(Debug, Default)]
pub struct PayloadWriter {
    buf: Vec<u8>,
}

impl PayloadWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_text(&mut self, field: &'static str, value: &str) -> Result<(), WireError> {
        let len = u8::try_from(value.len()).map_err(|_| WireError::FieldTooLong {
            field,
            len: value.len(),
            max: MAX_TEXT_FIELD,
        })?;
        self.buf.push(len);
        self.buf.extend_from_slice(value.as_bytes());
        Ok(())
    }

    pub fn put_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn put_u16(&mut self, value: u16) {
        self.buf.extend_from_slice(&value.to_be_bytes());
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor over a received payload. Never reads past the slice it was given.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, field: &'static str, n: usize) -> Result<&'a [u8], WireError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(WireError::Truncated { field })?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn get_u8(&mut self, field: &'static str) -> Result<u8, WireError> {
        Ok(self.take(field, 1)?[0])
    }

    pub fn get_u16(&mut self, field: &'static str) -> Result<u16, WireError> {
        let raw = self.take(field, 2)?;
        Ok(u16::from_be_bytes([raw[0], raw[1]]))
    }

    pub fn get_text(&mut self, field: &'static str) -> Result<&'a str, WireError> {
        let len = self.get_u8(field)? as usize;
        let raw = self.take(field, len)?;
        std::str::from_utf8(raw).map_err(|_| WireError::InvalidUtf8 { field })
    }

    /// Finish decoding. Trailing NUL padding from fixed-buffer senders is
    /// tolerated; any other leftover byte is an error.
    pub fn finish(self) -> Result<(), WireError> {
        let rest = &self.bytes[self.pos..];
        if rest.iter().all(|b| *b == 0) {
            Ok(())
        } else {
            Err(WireError::TrailingBytes(rest.len()))
        }
    }
}
