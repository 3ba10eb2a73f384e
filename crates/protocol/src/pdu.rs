//! PDU type tags, datagram encoding and stream framing.

use std::fmt;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::{FrameError, WireError};
use crate::MAX_CONTROL_PAYLOAD;

/// One-byte type tag at the front of every PDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PduType {
    Register = b'R',
    Deregister = b'T',
    Search = b'S',
    Download = b'D',
    ContentData = b'C',
    List = b'O',
    Acknowledge = b'A',
    Error = b'E',
    Final = b'F',
}

impl PduType {
    pub fn tag(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for PduType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, WireError> {
        match value {
            b'R' => Ok(PduType::Register),
            b'T' => Ok(PduType::Deregister),
            b'S' => Ok(PduType::Search),
            b'D' => Ok(PduType::Download),
            b'C' => Ok(PduType::ContentData),
            b'O' => Ok(PduType::List),
            b'A' => Ok(PduType::Acknowledge),
            b'E' => Ok(PduType::Error),
            b'F' => Ok(PduType::Final),
            other => Err(WireError::UnknownType(other)),
        }
    }
}

impl fmt::Display for PduType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PduType::Register => "REGISTER",
            PduType::Deregister => "DEREGISTER",
            PduType::Search => "SEARCH",
            PduType::Download => "DOWNLOAD",
            PduType::ContentData => "CONTENT_DATA",
            PduType::List => "LIST",
            PduType::Acknowledge => "ACKNOWLEDGE",
            PduType::Error => "ERROR",
            PduType::Final => "FINAL",
        };
        f.write_str(name)
    }
}

/// A protocol data unit: type tag plus payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pdu {
    pub kind: PduType,
    pub payload: Vec<u8>,
}

impl Pdu {
    pub fn new(kind: PduType, payload: Vec<u8>) -> Self {
        Self { kind, payload }
    }

    pub fn empty(kind: PduType) -> Self {
        Self {
            kind,
            payload: Vec::new(),
        }
    }

    /// Encode as a single control datagram: `[tag][payload]`.
    pub fn to_datagram(&self) -> Result<Vec<u8>, WireError> {
        if self.payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(WireError::PayloadTooLarge {
                len: self.payload.len(),
                max: MAX_CONTROL_PAYLOAD,
            });
        }
        let mut datagram = Vec::with_capacity(1 + self.payload.len());
        datagram.push(self.kind.tag());
        datagram.extend_from_slice(&self.payload);
        Ok(datagram)
    }

    /// Decode a received datagram. `datagram` must be exactly the bytes received;
    /// the payload length is everything after the tag.
    pub fn from_datagram(datagram: &[u8]) -> Result<Self, WireError> {
        let (&tag, payload) = datagram.split_first().ok_or(WireError::Empty)?;
        let kind = PduType::try_from(tag)?;
        if payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(WireError::PayloadTooLarge {
                len: payload.len(),
                max: MAX_CONTROL_PAYLOAD,
            });
        }
        Ok(Self {
            kind,
            payload: payload.to_vec(),
        })
    }
}

/// Write one stream frame: `[tag][len: u16 BE][payload]`.
pub async fn write_frame<W>(writer: &mut W, kind: PduType, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let len = u16::try_from(payload.len()).map_err(|_| WireError::PayloadTooLarge {
        len: payload.len(),
        max: u16::MAX as usize,
    })?;

    let mut frame = Vec::with_capacity(3 + payload.len());
    frame.push(kind.tag());
    frame.extend_from_slice(&len.to_be_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame).await?;
    Ok(())
}

/// Reads length-prefixed PDUs from a byte stream.
///
/// The receive buffer is cleared and resized to the declared length before every
/// frame, so a short frame never carries bytes left over from a longer one.
pub struct FrameReader<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::new(),
        }
    }

    /// Read the next frame. Returns `Ok(None)` on a clean end of stream between
    /// frames; an end of stream inside a frame is an I/O error.
    pub async fn next_frame(&mut self) -> Result<Option<(PduType, &[u8])>, FrameError> {
        let mut tag = [0u8; 1];
        if self.inner.read(&mut tag).await? == 0 {
            return Ok(None);
        }
        let kind = PduType::try_from(tag[0])?;
        let len = self.inner.read_u16().await? as usize;

        self.buf.clear();
        self.buf.resize(len, 0);
        self.inner.read_exact(&mut self.buf).await?;

        Ok(Some((kind, &self.buf)))
    }

    pub fn into_inner(self) -> R {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[test]
    fn type_tags_match_protocol_letters() {
        assert_eq!(PduType::Register.tag(), b'R');
        assert_eq!(PduType::Deregister.tag(), b'T');
        assert_eq!(PduType::List.tag(), b'O');
        assert_eq!(PduType::try_from(b'F'), Ok(PduType::Final));
        assert_eq!(PduType::try_from(b'x'), Err(WireError::UnknownType(b'x')));
    }

    #[test]
    fn datagram_payload_is_bounded_by_received_length() {
        let pdu = Pdu::from_datagram(b"Ahello").unwrap();
        assert_eq!(pdu.kind, PduType::Acknowledge);
        assert_eq!(pdu.payload, b"hello");

        let bare = Pdu::from_datagram(b"O").unwrap();
        assert_eq!(bare, Pdu::empty(PduType::List));

        assert_eq!(Pdu::from_datagram(&[]), Err(WireError::Empty));
    }

    #[test]
    fn oversized_control_payload_is_refused() {
        let pdu = Pdu::new(PduType::Acknowledge, vec![0u8; MAX_CONTROL_PAYLOAD + 1]);
        assert!(matches!(
            pdu.to_datagram(),
            Err(WireError::PayloadTooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn frames_are_written_with_length_prefix() {
        let mut mock = Builder::new()
            .write(&[b'C', 0, 3, 1, 2, 3])
            .write(&[b'F', 0, 0])
            .build();

        write_frame(&mut mock, PduType::ContentData, &[1, 2, 3])
            .await
            .unwrap();
        write_frame(&mut mock, PduType::Final, &[]).await.unwrap();
    }

    #[tokio::test]
    async fn frames_split_across_reads_are_reassembled() {
        let mock = Builder::new()
            .read(&[b'C', 0])
            .read(&[4, b'a', b'b'])
            .read(&[b'c', b'd', b'F', 0, 0])
            .build();
        let mut reader = FrameReader::new(mock);

        let (kind, payload) = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(kind, PduType::ContentData);
        assert_eq!(payload, b"abcd");

        let (kind, payload) = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(kind, PduType::Final);
        assert!(payload.is_empty());

        assert!(reader.next_frame().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn short_frame_after_long_frame_has_no_residue() {
        let mock = Builder::new()
            .read(&[b'C', 0, 5, b'l', b'o', b'n', b'g', b'!'])
            .read(&[b'C', 0, 2, b'o', b'k'])
            .build();
        let mut reader = FrameReader::new(mock);

        let (_, first) = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(first, b"long!");
        let (_, second) = reader.next_frame().await.unwrap().unwrap();
        assert_eq!(second, b"ok");
    }

    #[tokio::test]
    async fn end_of_stream_inside_frame_is_an_error() {
        let mock = Builder::new().read(&[b'C', 0, 10, 1, 2]).build();
        let mut reader = FrameReader::new(mock);

        let err = reader.next_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::Io(_)));
    }

    #[tokio::test]
    async fn unknown_tag_on_stream_is_rejected() {
        let mock = Builder::new().read(&[b'Z']).build();
        let mut reader = FrameReader::new(mock);

        let err = reader.next_frame().await.unwrap_err();
        assert!(matches!(err, FrameError::Wire(WireError::UnknownType(b'Z'))));
    }
}
