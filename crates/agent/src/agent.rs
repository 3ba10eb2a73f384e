//! The peer agent: ties the index client, serving tasks and downloads together.

use std::net::{IpAddr, SocketAddr};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use peerdex_protocol::{validate_filename, validate_peer_name, ListedReplica};
use tracing::{info, warn};

use crate::client::IndexClient;
use crate::config::AgentConfig;
use crate::download;
use crate::errors::{AgentError, Result};
use crate::registry::{LocalServedFile, ServedFiles};
use crate::serving::{self, ServedFile};

/// Where served files live and how serving listeners are bound.
#[derive(Debug, Clone)]
pub struct ServingOptions {
    pub shared_dir: PathBuf,
    pub bind_ip: IpAddr,
    pub ports: RangeInclusive<u16>,
}

impl ServingOptions {
    pub fn from_config(config: &AgentConfig) -> std::result::Result<Self, String> {
        Ok(Self {
            shared_dir: config.shared_dir.clone(),
            bind_ip: config.bind_ip()?,
            ports: config.port_range(),
        })
    }
}

/// Outcome of a successful download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadReport {
    pub source: SocketAddr,
    pub bytes: u64,
    /// Port the downloaded copy is now served on.
    pub port: u16,
}

pub struct PeerAgent {
    name: String,
    client: IndexClient,
    options: ServingOptions,
    served: ServedFiles,
}

impl PeerAgent {
    pub fn new(name: impl Into<String>, client: IndexClient, options: ServingOptions) -> Result<Self> {
        let name = name.into();
        validate_peer_name(&name).map_err(AgentError::InvalidName)?;
        Ok(Self {
            name,
            client,
            options,
            served: ServedFiles::new(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shared_dir(&self) -> &Path {
        &self.options.shared_dir
    }

    /// `(filename, port)` for every file currently served.
    pub fn served(&self) -> Vec<(String, u16)> {
        self.served.snapshot()
    }

    /// Start serving a file from the shared directory and announce it.
    ///
    /// The listener is bound before the index hears about the port; if the
    /// index refuses, the listener is closed again. Returns the serving port.
    pub async fn register(&self, filename: &str) -> Result<u16> {
        validate_filename(filename).map_err(AgentError::InvalidName)?;
        if self.served.contains(filename) {
            return Err(AgentError::AlreadyServing(filename.to_string()));
        }

        let path = self.options.shared_dir.join(filename);
        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| AgentError::local_io(&path, e))?;
        if !metadata.is_file() {
            return Err(AgentError::local_io(
                &path,
                std::io::Error::new(std::io::ErrorKind::InvalidInput, "not a regular file"),
            ));
        }

        let listener =
            serving::bind_listener(self.options.bind_ip, self.options.ports.clone()).await?;
        let port = listener
            .local_addr()
            .map_err(AgentError::Transport)?
            .port();

        // on rejection the listener is dropped here and the port released
        self.client.register(&self.name, filename, port).await?;

        let served_file = ServedFile {
            filename: filename.to_string(),
            path,
        };
        let handle = serving::spawn(listener, served_file).map_err(AgentError::Transport)?;
        if let Err(duplicate) = self.served.insert(LocalServedFile::new(filename, handle)) {
            warn!("{} registered twice concurrently, withdrawing port {}", filename, port);
            if let Err(e) = self.client.deregister(filename, port).await {
                warn!("Failed to withdraw {} on port {}: {}", filename, port, e);
            }
            duplicate.stop().await;
            return Err(AgentError::AlreadyServing(filename.to_string()));
        }

        info!("Registered {} as {} on port {}", filename, self.name, port);
        Ok(port)
    }

    /// Fetch `filename` from `peer_name`, then serve the copy under this
    /// agent's own name.
    pub async fn download(&self, peer_name: &str, filename: &str) -> Result<DownloadReport> {
        validate_peer_name(peer_name).map_err(AgentError::InvalidName)?;
        validate_filename(filename).map_err(AgentError::InvalidName)?;
        if self.served.contains(filename) {
            return Err(AgentError::AlreadyServing(filename.to_string()));
        }

        let source = self.client.search(peer_name, filename).await?;
        let destination = self.options.shared_dir.join(filename);
        let bytes = download::fetch(source, filename, &destination).await?;
        info!("Downloaded {} ({} bytes) from {} at {}", filename, bytes, peer_name, source);

        // the copy stays on disk when it cannot be served
        let port = self
            .register(filename)
            .await
            .map_err(|e| AgentError::Reregistration {
                filename: filename.to_string(),
                bytes,
                source: Box::new(e),
            })?;
        Ok(DownloadReport {
            source,
            bytes,
            port,
        })
    }

    pub async fn search(&self, peer_name: &str, filename: &str) -> Result<SocketAddr> {
        self.client.search(peer_name, filename).await
    }

    pub async fn list(&self) -> Result<Vec<ListedReplica>> {
        self.client.list().await
    }

    /// Withdraw a served file from the index and stop serving it.
    ///
    /// The local serving task stops even when the index rejects the request.
    pub async fn deregister(&self, filename: &str) -> Result<()> {
        let file = self.served.remove(filename)?;
        let result = self.client.deregister(filename, file.port).await;
        file.stop().await;
        match result {
            Ok(_) => {
                info!("Deregistered {}", filename);
                Ok(())
            }
            Err(e) => {
                warn!("Index refused deregistration of {}: {}", filename, e);
                Err(e)
            }
        }
    }

    /// Deregister and stop every served file. Returns the files whose
    /// deregistration failed; their serving tasks are stopped regardless.
    pub async fn shutdown(&self) -> Vec<(String, AgentError)> {
        let mut failures = Vec::new();
        for file in self.served.drain() {
            if let Err(e) = self.client.deregister(&file.filename, file.port).await {
                failures.push((file.filename.clone(), e));
            }
            file.stop().await;
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerdex_protocol::{ErrorCode, Pdu, PduType, Request, Response, MAX_DATAGRAM};
    use std::net::Ipv4Addr;
    use tokio::net::UdpSocket;
    use tokio::sync::mpsc;

    /// Index stand-in that acknowledges every registration and refuses every
    /// deregistration, reporting each request kind it sees.
    async fn accepting_index() -> (u16, mpsc::UnboundedReceiver<PduType>) {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let port = socket.local_addr().unwrap().port();
        let (seen, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                let (len, source) = socket.recv_from(&mut buf).await.unwrap();
                let request = Request::from_pdu(&Pdu::from_datagram(&buf[..len]).unwrap()).unwrap();
                let _ = seen.send(request.kind());
                let reply = match request {
                    Request::Deregister { .. } => Response::error(ErrorCode::NotFound, "gone"),
                    _ => Response::Acknowledge("ok".into()),
                };
                let datagram = reply.to_pdu().unwrap().to_datagram().unwrap();
                socket.send_to(&datagram, source).await.unwrap();
            }
        });
        (port, rx)
    }

    #[tokio::test]
    async fn concurrent_duplicate_is_withdrawn_even_if_index_refuses() {
        let (port, mut seen) = accepting_index().await;
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
        let client = IndexClient::connect("127.0.0.1", port).await.unwrap();
        let options = ServingOptions {
            shared_dir: dir.path().to_path_buf(),
            bind_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ports: 20_000..=65_535,
        };
        let agent = PeerAgent::new("alice", client, options).unwrap();

        let (first, second) = tokio::join!(agent.register("a.txt"), agent.register("a.txt"));
        let refused = match (first, second) {
            (Ok(_), Err(e)) | (Err(e), Ok(_)) => e,
            other => panic!("expected exactly one registration to win: {other:?}"),
        };
        assert!(matches!(refused, AgentError::AlreadyServing(_)));
        assert_eq!(agent.served().len(), 1);

        let mut kinds = Vec::new();
        while let Ok(kind) = seen.try_recv() {
            kinds.push(kind);
        }
        assert_eq!(
            kinds,
            vec![PduType::Register, PduType::Register, PduType::Deregister]
        );
    }
}
