//! CODA encoding and decoding errors.

use std::borrow::Cow;
use std::error::Error;
use std::fmt;

/// A CODA value encoding error.
///
/// `EncodeError` indicates that a value could not be serialized: a structural
/// cycle through non-shared references, a value that does not match its
/// declared field type, or the recursion depth cap.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodeError {
    description: Cow<'static, str>,
}

impl EncodeError {
    pub fn new<S>(description: S) -> EncodeError
    where
        S: Into<Cow<'static, str>>,
    {
        EncodeError {
            description: description.into(),
        }
    }
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to encode CODA value: {}", self.description)
    }
}

impl Error for EncodeError {}

impl From<EncodeError> for std::io::Error {
    fn from(error: EncodeError) -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, error)
    }
}

/// Position of a decoding failure in the input.
///
/// Binary streams report a byte offset; text streams report a line number.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DecodePos {
    Byte(u64),
    Line(u32),
}

/// A CODA value decoding error.
///
/// `DecodeError` indicates that the input does not contain a valid encoded
/// value. After a decode error the decoder state is undefined and the decoder
/// must be discarded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodeError {
    description: Cow<'static, str>,
    pos: Option<DecodePos>,
}

impl DecodeError {
    pub fn new<S>(description: S) -> DecodeError
    where
        S: Into<Cow<'static, str>>,
    {
        DecodeError {
            description: description.into(),
            pos: None,
        }
    }

    /// Attaches a byte offset to the error, keeping an already-recorded
    /// position if one was set closer to the failure.
    pub fn at_offset(mut self, offset: u64) -> DecodeError {
        self.pos.get_or_insert(DecodePos::Byte(offset));
        self
    }

    /// Attaches a source line number to the error.
    pub fn at_line(mut self, line: u32) -> DecodeError {
        self.pos.get_or_insert(DecodePos::Line(line));
        self
    }

    pub fn position(&self) -> Option<DecodePos> {
        self.pos
    }
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to decode CODA value")?;
        match self.pos {
            Some(DecodePos::Byte(offset)) => write!(f, " at offset {}", offset)?,
            Some(DecodePos::Line(line)) => write!(f, " at line {}", line)?,
            None => {}
        }
        write!(f, ": {}", self.description)
    }
}

impl Error for DecodeError {}

impl From<DecodeError> for std::io::Error {
    fn from(error: DecodeError) -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::InvalidData, error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_display() {
        let err = DecodeError::new("invalid varint").at_offset(17);
        assert_eq!(
            err.to_string(),
            "failed to decode CODA value at offset 17: invalid varint"
        );
        // The first recorded position wins.
        let err = err.at_offset(99);
        assert_eq!(err.position(), Some(DecodePos::Byte(17)));
    }

    #[test]
    fn into_io_error() {
        let err = std::io::Error::from(DecodeError::new("truncated stream"));
        assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    }
}
