//! Typed index requests/responses and file-transfer payloads.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::errors::{ErrorCode, WireError};
use crate::fields::{PayloadReader, PayloadWriter, MAX_TEXT_FIELD};
use crate::pdu::{Pdu, PduType};
use crate::MAX_NAME_LEN;

pub fn validate_peer_name(name: &str) -> Result<(), WireError> {
    validate_name("peer_name", name)
}

/// Filenames are resolved inside a peer's shared directory, so they must be a
/// single path component.
pub fn validate_filename(name: &str) -> Result<(), WireError> {
    validate_name("filename", name)?;
    if name == "." || name == ".." {
        return Err(WireError::InvalidName {
            field: "filename",
            reason: "must not be a directory reference",
        });
    }
    if name.contains(['/', '\\']) {
        return Err(WireError::InvalidName {
            field: "filename",
            reason: "must not contain path separators",
        });
    }
    Ok(())
}

fn validate_name(field: &'static str, value: &str) -> Result<(), WireError> {
    if value.is_empty() {
        return Err(WireError::InvalidName {
            field,
            reason: "must not be empty",
        });
    }
    if value.len() > MAX_NAME_LEN {
        return Err(WireError::FieldTooLong {
            field,
            len: value.len(),
            max: MAX_NAME_LEN,
        });
    }
    if value.chars().any(char::is_control) {
        return Err(WireError::InvalidName {
            field,
            reason: "must not contain control characters",
        });
    }
    Ok(())
}

/// Cut `message` to fit a text field without splitting a UTF-8 sequence.
fn clamp_text(message: &str) -> &str {
    if message.len() <= MAX_TEXT_FIELD {
        return message;
    }
    let mut end = MAX_TEXT_FIELD;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    &message[..end]
}

/// A request sent by a peer agent to the index server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Register {
        peer_name: String,
        filename: String,
        port: u16,
    },
    Deregister {
        filename: String,
        port: u16,
    },
    Search {
        peer_name: String,
        filename: String,
    },
    List,
}

impl Request {
    pub fn kind(&self) -> PduType {
        match self {
            Request::Register { .. } => PduType::Register,
            Request::Deregister { .. } => PduType::Deregister,
            Request::Search { .. } => PduType::Search,
            Request::List => PduType::List,
        }
    }

    fn validate(&self) -> Result<(), WireError> {
        match self {
            Request::Register {
                peer_name,
                filename,
                ..
            }
            | Request::Search {
                peer_name,
                filename,
            } => {
                validate_peer_name(peer_name)?;
                validate_filename(filename)
            }
            Request::Deregister { filename, .. } => validate_filename(filename),
            Request::List => Ok(()),
        }
    }

    pub fn to_pdu(&self) -> Result<Pdu, WireError> {
        self.validate()?;
        let mut writer = PayloadWriter::new();
        match self {
            Request::Register {
                peer_name,
                filename,
                port,
            } => {
                writer.put_text("peer_name", peer_name)?;
                writer.put_text("filename", filename)?;
                writer.put_u16(*port);
            }
            Request::Deregister { filename, port } => {
                writer.put_text("filename", filename)?;
                writer.put_u16(*port);
            }
            Request::Search {
                peer_name,
                filename,
            } => {
                writer.put_text("peer_name", peer_name)?;
                writer.put_text("filename", filename)?;
            }
            Request::List => {}
        }
        Ok(Pdu::new(self.kind(), writer.into_bytes()))
    }

    pub fn from_pdu(pdu: &Pdu) -> Result<Self, WireError> {
        let mut reader = PayloadReader::new(&pdu.payload);
        let request = match pdu.kind {
            PduType::Register => Request::Register {
                peer_name: reader.get_text("peer_name")?.to_string(),
                filename: reader.get_text("filename")?.to_string(),
                port: reader.get_u16("port")?,
            },
            PduType::Deregister => Request::Deregister {
                filename: reader.get_text("filename")?.to_string(),
                port: reader.get_u16("port")?,
            },
            PduType::Search => Request::Search {
                peer_name: reader.get_text("peer_name")?.to_string(),
                filename: reader.get_text("filename")?.to_string(),
            },
            PduType::List => Request::List,
            other => return Err(WireError::NotARequest(other)),
        };
        reader.finish()?;
        request.validate()?;
        Ok(request)
    }
}

/// One replica chosen by a LIST request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedReplica {
    pub peer_name: String,
    pub filename: String,
    pub address: SocketAddr,
}

impl fmt::Display for ListedReplica {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}:{}",
            self.peer_name,
            self.filename,
            self.address.ip(),
            self.address.port()
        )
    }
}

/// A reply from the index server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Acknowledge(String),
    Located(SocketAddr),
    Listing(Vec<ListedReplica>),
    Error { code: ErrorCode, message: String },
}

impl Response {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Response::Error {
            code,
            message: message.into(),
        }
    }

    pub fn to_pdu(&self) -> Result<Pdu, WireError> {
        let mut writer = PayloadWriter::new();
        let kind = match self {
            Response::Acknowledge(message) => {
                writer.put_text("message", clamp_text(message))?;
                PduType::Acknowledge
            }
            Response::Located(address) => {
                put_address(&mut writer, address)?;
                PduType::Acknowledge
            }
            Response::Listing(replicas) => {
                let count = u16::try_from(replicas.len()).map_err(|_| {
                    WireError::PayloadTooLarge {
                        len: replicas.len(),
                        max: u16::MAX as usize,
                    }
                })?;
                writer.put_u16(count);
                for replica in replicas {
                    writer.put_text("peer_name", &replica.peer_name)?;
                    writer.put_text("filename", &replica.filename)?;
                    put_address(&mut writer, &replica.address)?;
                }
                PduType::List
            }
            Response::Error { code, message } => {
                return Ok(Pdu::new(PduType::Error, error_payload(*code, message)));
            }
        };
        Ok(Pdu::new(kind, writer.into_bytes()))
    }

    /// Decode the reply to a request of kind `request`. ACKNOWLEDGE carries an
    /// address for SEARCH and a text message otherwise.
    pub fn from_pdu(pdu: &Pdu, request: PduType) -> Result<Self, WireError> {
        if pdu.kind == PduType::Error {
            let (code, message) = parse_error_payload(&pdu.payload)?;
            return Ok(Response::Error { code, message });
        }

        let mut reader = PayloadReader::new(&pdu.payload);
        let response = match (pdu.kind, request) {
            (PduType::Acknowledge, PduType::Search) => {
                Response::Located(get_address(&mut reader)?)
            }
            (PduType::Acknowledge, PduType::Register | PduType::Deregister) => {
                Response::Acknowledge(reader.get_text("message")?.to_string())
            }
            (PduType::List, PduType::List) => {
                let count = reader.get_u16("count")?;
                let mut replicas = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    replicas.push(ListedReplica {
                        peer_name: reader.get_text("peer_name")?.to_string(),
                        filename: reader.get_text("filename")?.to_string(),
                        address: get_address(&mut reader)?,
                    });
                }
                Response::Listing(replicas)
            }
            (actual, request) => return Err(WireError::UnexpectedReply { request, actual }),
        };
        reader.finish()?;
        Ok(response)
    }
}

fn put_address(writer: &mut PayloadWriter, address: &SocketAddr) -> Result<(), WireError> {
    writer.put_text("ip", &address.ip().to_string())?;
    writer.put_u16(address.port());
    Ok(())
}

fn get_address(reader: &mut PayloadReader<'_>) -> Result<SocketAddr, WireError> {
    let raw_ip = reader.get_text("ip")?;
    let ip: IpAddr = raw_ip
        .parse()
        .map_err(|_| WireError::InvalidAddress(raw_ip.to_string()))?;
    let port = reader.get_u16("port")?;
    Ok(SocketAddr::new(ip, port))
}

/// ERROR payload: `[code][message]`. Long messages are clamped, never rejected.
pub fn error_payload(code: ErrorCode, message: &str) -> Vec<u8> {
    let mut writer = PayloadWriter::new();
    writer.put_u8(code as u8);
    // clamped to the field limit, cannot fail
    let _ = writer.put_text("message", clamp_text(message));
    writer.into_bytes()
}

pub fn parse_error_payload(payload: &[u8]) -> Result<(ErrorCode, String), WireError> {
    let mut reader = PayloadReader::new(payload);
    let code = ErrorCode::try_from(reader.get_u8("code")?)?;
    let message = reader.get_text("message")?.to_string();
    reader.finish()?;
    Ok((code, message))
}

pub fn download_payload(filename: &str) -> Result<Vec<u8>, WireError> {
    validate_filename(filename)?;
    let mut writer = PayloadWriter::new();
    writer.put_text("filename", filename)?;
    Ok(writer.into_bytes())
}

pub fn parse_download_payload(payload: &[u8]) -> Result<String, WireError> {
    let mut reader = PayloadReader::new(payload);
    let filename = reader.get_text("filename")?.to_string();
    reader.finish()?;
    validate_filename(&filename)?;
    Ok(filename)
}
