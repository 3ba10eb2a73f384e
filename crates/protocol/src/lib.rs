//! Peerdex Wire Protocol
//!
//! Every control exchange with the index server is a single PDU carried in one
//! UDP datagram. File transfers between peers reuse the same PDU shape, framed
//! with a length prefix over a TCP stream.
//!
//! ## Modules
//! - `pdu`: type tags, datagram encoding and stream framing
//! - `fields`: length-prefixed payload field codec
//! - `messages`: typed index requests/responses and transfer payloads
//! - `errors`: decode errors and the error codes carried in ERROR PDUs

pub mod errors;
pub mod fields;
pub mod messages;
pub mod pdu;

pub use errors::{ErrorCode, FrameError, WireError};
pub use fields::{PayloadReader, PayloadWriter};
pub use messages::{validate_filename, validate_peer_name, ListedReplica, Request, Response};
pub use pdu::{write_frame, FrameReader, Pdu, PduType};

/// Default UDP port of the index server.
pub const DEFAULT_INDEX_PORT: u16 = 15_000;

/// Maximum number of file bytes carried by one CONTENT_DATA PDU.
pub const CHUNK_SIZE: usize = 256;

/// Upper bound for a control payload so a PDU always fits in one UDP datagram.
pub const MAX_CONTROL_PAYLOAD: usize = 60_000;

/// Receive buffer size for control datagrams (tag + payload).
pub const MAX_DATAGRAM: usize = MAX_CONTROL_PAYLOAD + 1;

/// Longest peer name or filename accepted anywhere in the protocol.
pub const MAX_NAME_LEN: usize = 64;
