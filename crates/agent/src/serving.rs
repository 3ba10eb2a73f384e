//! Per-file serving tasks.
//!
//! Each registered file gets its own TCP listener and accept loop. Every
//! accepted connection is answered in a spawned task: one DOWNLOAD request in,
//! then either one ERROR or a run of CONTENT frames closed by FINAL.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::sync::Arc;

use peerdex_protocol::messages::{error_payload, parse_download_payload};
use peerdex_protocol::{write_frame, ErrorCode, FrameError, FrameReader, PduType, CHUNK_SIZE};
use rand::Rng;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::errors::{AgentError, Result};

/// Random ports tried before giving up on binding a listener.
pub const MAX_BIND_ATTEMPTS: usize = 32;

/// Bind a listener on a random port from `ports`.
pub async fn bind_listener(host: IpAddr, ports: RangeInclusive<u16>) -> Result<TcpListener> {
    let (start, end) = (*ports.start(), *ports.end());
    for _ in 0..MAX_BIND_ATTEMPTS {
        let port = rand::thread_rng().gen_range(start..=end);
        match TcpListener::bind(SocketAddr::new(host, port)).await {
            Ok(listener) => return Ok(listener),
            Err(e) => debug!("Port {} unavailable: {}", port, e),
        }
    }
    Err(AgentError::NoFreePort {
        start,
        end,
        attempts: MAX_BIND_ATTEMPTS,
    })
}

/// A file offered on one port.
#[derive(Debug, Clone)]
pub struct ServedFile {
    pub filename: String,
    pub path: PathBuf,
}

/// How a single connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// The whole file went out, followed by FINAL.
    Completed { bytes: u64, chunks: u64 },
    /// The request was answered with an ERROR frame.
    Refused(ErrorCode),
    /// The client closed the connection without asking for anything.
    Abandoned,
}

/// Stop switch for a running accept loop.
///
/// Stopping is cooperative: the accept loop exits and its listener closes,
/// transfers already in flight run to completion in their own tasks.
#[derive(Debug)]
pub struct ServingHandle {
    port: u16,
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ServingHandle {
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Signal the accept loop and wait for it to release the listener.
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        if let Err(e) = self.task.await {
            warn!("Serving task on port {} ended abnormally: {}", self.port, e);
        }
    }
}

/// Start serving `file` on an already bound listener.
pub fn spawn(listener: TcpListener, file: ServedFile) -> io::Result<ServingHandle> {
    let port = listener.local_addr()?.port();
    let (stop, stop_rx) = watch::channel(false);
    let task = tokio::spawn(accept_loop(listener, Arc::new(file), stop_rx));
    Ok(ServingHandle { port, stop, task })
}

async fn accept_loop(listener: TcpListener, file: Arc<ServedFile>, mut stop: watch::Receiver<bool>) {
    let port = listener.local_addr().map(|addr| addr.port()).unwrap_or_default();
    info!("Serving {} on port {}", file.filename, port);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    let file = Arc::clone(&file);
                    tokio::spawn(async move {
                        match serve_connection(stream, &file).await {
                            Ok(outcome) => debug!("Transfer of {} to {}: {:?}", file.filename, peer, outcome),
                            Err(e) => warn!("Transfer of {} to {} failed: {}", file.filename, peer, e),
                        }
                    });
                }
                Err(e) => warn!("Accept failed on port {}: {}", port, e),
            },
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }

    info!("Stopped serving {} on port {}", file.filename, port);
}

/// Answer one connection.
pub async fn serve_connection(mut stream: TcpStream, file: &ServedFile) -> std::result::Result<Transfer, FrameError> {
    let (reader, mut writer) = stream.split();
    let mut frames = FrameReader::new(reader);

    let requested = match frames.next_frame().await? {
        None => return Ok(Transfer::Abandoned),
        Some((PduType::Download, payload)) => match parse_download_payload(payload) {
            Ok(filename) => filename,
            Err(e) => {
                return refuse(&mut writer, ErrorCode::MalformedRequest, &e.to_string()).await;
            }
        },
        Some((kind, _)) => {
            let message = format!("expected DOWNLOAD, got {kind}");
            return refuse(&mut writer, ErrorCode::UnexpectedRequest, &message).await;
        }
    };

    if requested != file.filename {
        let message = format!("{requested} is not served on this port");
        return refuse(&mut writer, ErrorCode::NotFound, &message).await;
    }

    let mut source = match File::open(&file.path).await {
        Ok(source) => source,
        Err(e) => {
            let message = format!("cannot open {}: {}", file.filename, e);
            return refuse(&mut writer, ErrorCode::FileUnavailable, &message).await;
        }
    };

    let mut chunk = [0u8; CHUNK_SIZE];
    let (mut bytes, mut chunks) = (0u64, 0u64);
    loop {
        let n = match source.read(&mut chunk).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) => {
                let message = format!("reading {} failed: {}", file.filename, e);
                return refuse(&mut writer, ErrorCode::FileUnavailable, &message).await;
            }
        };
        write_frame(&mut writer, PduType::ContentData, &chunk[..n]).await?;
        bytes += n as u64;
        chunks += 1;
    }
    write_frame(&mut writer, PduType::Final, &[]).await?;
    writer.shutdown().await?;

    Ok(Transfer::Completed { bytes, chunks })
}

async fn refuse<W>(writer: &mut W, code: ErrorCode, message: &str) -> std::result::Result<Transfer, FrameError>
where
    W: AsyncWrite + Unpin,
{
    debug!("Refusing download: {}", message);
    write_frame(writer, PduType::Error, &error_payload(code, message)).await?;
    writer.shutdown().await?;
    Ok(Transfer::Refused(code))
}
