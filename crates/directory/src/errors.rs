//! Error types for the index directory

use std::net::IpAddr;

use peerdex_protocol::{ErrorCode, WireError};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("{peer_name} has already registered {filename}")]
    DuplicateRegistration { peer_name: String, filename: String },

    #[error("no registration of {filename} on port {port} from {address}")]
    NotRegistered {
        filename: String,
        port: u16,
        address: IpAddr,
    },

    #[error("{peer_name} is not serving {filename}")]
    ReplicaNotFound { peer_name: String, filename: String },

    #[error("directory is empty")]
    EmptyDirectory,

    #[error("directory is full ({capacity} entries)")]
    CapacityExceeded { capacity: usize },

    #[error("invalid request: {0}")]
    InvalidName(#[from] WireError),
}

impl DirectoryError {
    /// Code sent back to the requester in the ERROR PDU.
    pub fn code(&self) -> ErrorCode {
        match self {
            DirectoryError::DuplicateRegistration { .. } => ErrorCode::DuplicateRegistration,
            DirectoryError::NotRegistered { .. }
            | DirectoryError::ReplicaNotFound { .. }
            | DirectoryError::EmptyDirectory => ErrorCode::NotFound,
            DirectoryError::CapacityExceeded { .. } => ErrorCode::CapacityExceeded,
            DirectoryError::InvalidName(_) => ErrorCode::MalformedRequest,
        }
    }
}

pub type Result<T> = std::result::Result<T, DirectoryError>;
