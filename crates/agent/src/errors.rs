//! Error types for the peer agent

use std::io;
use std::path::PathBuf;

use peerdex_protocol::{ErrorCode, FrameError, PduType, WireError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("network error: {0}")]
    Transport(#[source] io::Error),

    #[error("{code}: {message}")]
    Rejected { code: ErrorCode, message: String },

    #[error("protocol error: {0}")]
    Wire(#[from] WireError),

    #[error("unexpected {0} reply")]
    UnexpectedResponse(PduType),

    #[error("invalid name: {0}")]
    InvalidName(#[source] WireError),

    #[error("{}: {source}", path.display())]
    LocalIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("already serving {0}")]
    AlreadyServing(String),

    #[error("not serving {0}")]
    NotServing(String),

    #[error("transfer of {0} ended before the final chunk")]
    TransferIncomplete(String),

    #[error("downloaded {bytes} bytes of {filename}, re-registration failed: {source}")]
    Reregistration {
        filename: String,
        bytes: u64,
        #[source]
        source: Box<AgentError>,
    },

    #[error("no free port in {start}..={end} after {attempts} attempts")]
    NoFreePort { start: u16, end: u16, attempts: usize },
}

impl AgentError {
    /// Error code reported by the index server or a serving peer, if any.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            AgentError::Rejected { code, .. } => Some(*code),
            AgentError::Reregistration { source, .. } => source.code(),
            _ => None,
        }
    }

    pub fn local_io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        AgentError::LocalIo {
            path: path.into(),
            source,
        }
    }
}

impl From<FrameError> for AgentError {
    fn from(err: FrameError) -> Self {
        match err {
            FrameError::Io(e) => AgentError::Transport(e),
            FrameError::Wire(e) => AgentError::Wire(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;
