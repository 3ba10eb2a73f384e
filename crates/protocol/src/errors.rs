//! Error types for the wire protocol

use std::fmt;

use thiserror::Error;

use crate::pdu::PduType;

/// Failure to encode or decode a PDU or one of its payload fields.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("empty datagram")]
    Empty,

    #[error("unknown PDU type tag {0:#04x}")]
    UnknownType(u8),

    #[error("payload truncated while reading {field}")]
    Truncated { field: &'static str },

    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    PayloadTooLarge { len: usize, max: usize },

    #[error("field {field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    #[error("field {field} is {len} bytes, limit is {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("invalid {field}: {reason}")]
    InvalidName {
        field: &'static str,
        reason: &'static str,
    },

    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    #[error("{0} unexpected trailing bytes")]
    TrailingBytes(usize),

    #[error("unknown error code {0}")]
    UnknownErrorCode(u8),

    #[error("{0} PDU is not a valid request")]
    NotARequest(PduType),

    #[error("unexpected {actual} PDU in reply to {request}")]
    UnexpectedReply { request: PduType, actual: PduType },
}

/// Failure while reading or writing a framed PDU on a byte stream.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed frame: {0}")]
    Wire(#[from] WireError),
}

/// Reason carried in an ERROR PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    MalformedRequest = 1,
    DuplicateRegistration = 2,
    NotFound = 3,
    CapacityExceeded = 4,
    FileUnavailable = 5,
    UnexpectedRequest = 6,
}

impl ErrorCode {
    /// Stable snake_case name, used for log fields and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::MalformedRequest => "malformed_request",
            ErrorCode::DuplicateRegistration => "duplicate_registration",
            ErrorCode::NotFound => "not_found",
            ErrorCode::CapacityExceeded => "capacity_exceeded",
            ErrorCode::FileUnavailable => "file_unavailable",
            ErrorCode::UnexpectedRequest => "unexpected_request",
        }
    }
}

impl TryFrom<u8> for ErrorCode {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(ErrorCode::MalformedRequest),
            2 => Ok(ErrorCode::DuplicateRegistration),
            3 => Ok(ErrorCode::NotFound),
            4 => Ok(ErrorCode::CapacityExceeded),
            5 => Ok(ErrorCode::FileUnavailable),
            6 => Ok(ErrorCode::UnexpectedRequest),
            other => Err(WireError::UnknownErrorCode(other)),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCode::MalformedRequest => write!(f, "Malformed request"),
            ErrorCode::DuplicateRegistration => write!(f, "Duplicate registration"),
            ErrorCode::NotFound => write!(f, "Not found"),
            ErrorCode::CapacityExceeded => write!(f, "Capacity exceeded"),
            ErrorCode::FileUnavailable => write!(f, "File unavailable"),
            ErrorCode::UnexpectedRequest => write!(f, "Unexpected request"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_survive_byte_conversion() {
        for code in [
            ErrorCode::MalformedRequest,
            ErrorCode::DuplicateRegistration,
            ErrorCode::NotFound,
            ErrorCode::CapacityExceeded,
            ErrorCode::FileUnavailable,
            ErrorCode::UnexpectedRequest,
        ] {
            assert_eq!(ErrorCode::try_from(code as u8), Ok(code));
        }
    }

    #[test]
    fn unknown_error_code_is_rejected() {
        assert_eq!(ErrorCode::try_from(0), Err(WireError::UnknownErrorCode(0)));
        assert_eq!(
            ErrorCode::try_from(200),
            Err(WireError::UnknownErrorCode(200))
        );
    }
}
