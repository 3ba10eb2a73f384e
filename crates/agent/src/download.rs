//! Client side of a file transfer.

use std::ffi::OsString;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use peerdex_protocol::messages::{download_payload, parse_error_payload};
use peerdex_protocol::{write_frame, FrameReader, PduType};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::errors::{AgentError, Result};

/// Output file that is removed unless the transfer is committed.
///
/// Data lands in a `.part` sibling of the destination and is renamed into
/// place on commit, so an existing file with the same name is only replaced
/// by a complete copy.
struct PartialDownload {
    file: Option<File>,
    part_path: PathBuf,
    destination: PathBuf,
    bytes: u64,
}

impl PartialDownload {
    async fn create(destination: &Path) -> Result<Self> {
        let part_path = part_path_for(destination);
        let file = File::create(&part_path)
            .await
            .map_err(|e| AgentError::local_io(&part_path, e))?;
        Ok(Self {
            file: Some(file),
            part_path,
            destination: destination.to_path_buf(),
            bytes: 0,
        })
    }

    async fn write(&mut self, data: &[u8]) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.write_all(data)
                .await
                .map_err(|e| AgentError::local_io(&self.part_path, e))?;
            self.bytes += data.len() as u64;
        }
        Ok(())
    }

    async fn commit(mut self) -> Result<u64> {
        if let Some(mut file) = self.file.take() {
            file.flush()
                .await
                .map_err(|e| AgentError::local_io(&self.part_path, e))?;
            file.sync_all()
                .await
                .map_err(|e| AgentError::local_io(&self.part_path, e))?;
        }
        tokio::fs::rename(&self.part_path, &self.destination)
            .await
            .map_err(|e| AgentError::local_io(&self.destination, e))?;
        // renamed away, nothing left for Drop to clean up
        self.part_path.clear();
        Ok(self.bytes)
    }
}

impl Drop for PartialDownload {
    fn drop(&mut self) {
        drop(self.file.take());
        if self.part_path.as_os_str().is_empty() {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.part_path) {
            warn!(
                "Failed to remove partial download {}: {}",
                self.part_path.display(),
                e
            );
        }
    }
}

fn part_path_for(destination: &Path) -> PathBuf {
    let mut name = OsString::from(".");
    name.push(destination.file_name().unwrap_or_default());
    name.push(".part");
    destination.with_file_name(name)
}

/// Download `filename` from the peer serving it at `address` into
/// `destination`. Returns the number of bytes written.
///
/// Anything other than CONTENT frames closed by FINAL counts as failure and
/// leaves no file behind.
pub async fn fetch(address: SocketAddr, filename: &str, destination: &Path) -> Result<u64> {
    let request = download_payload(filename).map_err(AgentError::InvalidName)?;

    let mut stream = TcpStream::connect(address)
        .await
        .map_err(AgentError::Transport)?;
    write_frame(&mut stream, PduType::Download, &request).await?;
    debug!("Requested {} from {}", filename, address);

    let mut output = PartialDownload::create(destination).await?;
    let mut frames = FrameReader::new(stream);
    loop {
        match frames.next_frame().await? {
            Some((PduType::ContentData, data)) => output.write(data).await?,
            Some((PduType::Final, _)) => break,
            Some((PduType::Error, payload)) => {
                let (code, message) = parse_error_payload(payload)?;
                return Err(AgentError::Rejected { code, message });
            }
            Some((other, _)) => return Err(AgentError::UnexpectedResponse(other)),
            None => return Err(AgentError::TransferIncomplete(filename.to_string())),
        }
    }

    output.commit().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerdex_protocol::messages::error_payload;
    use peerdex_protocol::ErrorCode;
    use tokio::net::TcpListener;

    /// Accept one connection, swallow the request, then write `frames` raw.
    async fn scripted_peer(frames: Vec<(PduType, Vec<u8>)>) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut reader = FrameReader::new(stream);
            reader.next_frame().await.unwrap();
            let mut stream = reader.into_inner();
            for (kind, payload) in frames {
                write_frame(&mut stream, kind, &payload).await.unwrap();
            }
        });
        addr
    }

    fn leftovers(dir: &Path) -> Vec<OsString> {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect()
    }

    #[test]
    fn part_path_is_hidden_sibling() {
        assert_eq!(
            part_path_for(Path::new("/tmp/share/a.txt")),
            PathBuf::from("/tmp/share/.a.txt.part")
        );
    }

    #[tokio::test]
    async fn complete_transfer_is_committed() {
        let dir = tempfile::tempdir().unwrap();
        let addr = scripted_peer(vec![
            (PduType::ContentData, b"hello ".to_vec()),
            (PduType::ContentData, b"world".to_vec()),
            (PduType::Final, Vec::new()),
        ])
        .await;

        let destination = dir.path().join("greeting.txt");
        let bytes = fetch(addr, "greeting.txt", &destination).await.unwrap();
        assert_eq!(bytes, 11);
        assert_eq!(std::fs::read(&destination).unwrap(), b"hello world");
        assert_eq!(leftovers(dir.path()), vec![OsString::from("greeting.txt")]);
    }

    #[tokio::test]
    async fn error_reply_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let addr = scripted_peer(vec![(
            PduType::Error,
            error_payload(ErrorCode::FileUnavailable, "gone"),
        )])
        .await;

        let err = fetch(addr, "a.txt", &dir.path().join("a.txt"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::FileUnavailable));
        assert!(leftovers(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn early_close_is_incomplete_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let addr = scripted_peer(vec![(PduType::ContentData, vec![1u8; 200])]).await;

        let err = fetch(addr, "a.txt", &dir.path().join("a.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::TransferIncomplete(_)));
        assert!(leftovers(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn unexpected_frame_fails_transfer() {
        let dir = tempfile::tempdir().unwrap();
        let addr = scripted_peer(vec![
            (PduType::ContentData, vec![1u8; 10]),
            (PduType::Acknowledge, Vec::new()),
        ])
        .await;

        let err = fetch(addr, "a.txt", &dir.path().join("a.txt"))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::UnexpectedResponse(PduType::Acknowledge)));
        assert!(leftovers(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn failed_transfer_keeps_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let destination = dir.path().join("a.txt");
        std::fs::write(&destination, b"original").unwrap();
        let addr = scripted_peer(vec![(PduType::ContentData, vec![0u8; 5])]).await;

        assert!(fetch(addr, "a.txt", &destination).await.is_err());
        assert_eq!(std::fs::read(&destination).unwrap(), b"original");
    }
}
