//! UDP index server.
//!
//! Iterative by construction: receive one datagram, process it completely,
//! send exactly one reply, repeat. A bad request is answered with an ERROR
//! PDU and never stops the loop.

use std::io;
use std::net::{IpAddr, SocketAddr};

use metrics::{counter, gauge};
use peerdex_protocol::{ErrorCode, Pdu, Request, Response, WireError, MAX_DATAGRAM};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::errors::DirectoryError;
use crate::store::Directory;

pub struct IndexServer {
    socket: UdpSocket,
    directory: Directory,
}

impl IndexServer {
    /// Bind the control socket. Failure here is fatal for the process.
    pub async fn bind(addr: SocketAddr, directory: Directory) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self { socket, directory })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serve requests until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> io::Result<()> {
        info!("Index server listening on {}", self.local_addr()?);

        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let (len, source) = tokio::select! {
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok(received) => received,
                    Err(e) => {
                        warn!("Failed to receive datagram: {}", e);
                        continue;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            let reply = self.encode_reply(self.handle_datagram(&buf[..len], source));
            if let Err(e) = self.socket.send_to(&reply, source).await {
                warn!("Failed to send reply to {}: {}", source, e);
            }
        }

        info!("Index server stopped");
        Ok(())
    }

    /// Decode and answer one datagram received from `source`.
    pub fn handle_datagram(&self, datagram: &[u8], source: SocketAddr) -> Response {
        let request = match Pdu::from_datagram(datagram).and_then(|pdu| Request::from_pdu(&pdu)) {
            Ok(request) => request,
            Err(e) => {
                debug!("Rejecting datagram from {}: {}", source, e);
                let code = match e {
                    WireError::NotARequest(_) => ErrorCode::UnexpectedRequest,
                    _ => ErrorCode::MalformedRequest,
                };
                record("invalid", code.as_str());
                return Response::error(code, e.to_string());
            }
        };

        let kind = request_label(&request);
        let response = self.handle_request(request, source.ip());
        match &response {
            Response::Error { code, .. } => record(kind, code.as_str()),
            _ => record(kind, "ok"),
        }
        gauge!("peerdex_index_entries").set(self.directory.len() as f64);
        response
    }

    fn handle_request(&self, request: Request, source_ip: IpAddr) -> Response {
        match request {
            Request::Register {
                peer_name,
                filename,
                port,
            } => match self.directory.register(&peer_name, &filename, source_ip, port) {
                Ok(()) => {
                    info!(
                        "Registered {} for {} at {}:{}",
                        filename, peer_name, source_ip, port
                    );
                    Response::Acknowledge("Registration successful.".to_string())
                }
                Err(e) => reject("Registration", e),
            },
            Request::Deregister { filename, port } => {
                match self.directory.deregister(&filename, port, source_ip) {
                    Ok(entry) => {
                        info!(
                            "Deregistered {} for {} at {}:{}",
                            entry.filename, entry.peer_name, entry.address, entry.port
                        );
                        Response::Acknowledge("Deregistration successful.".to_string())
                    }
                    Err(e) => reject("Deregistration", e),
                }
            }
            Request::Search {
                peer_name,
                filename,
            } => match self.directory.search(&peer_name, &filename) {
                Ok(address) => {
                    debug!("Resolved {} from {} to {}", filename, peer_name, address);
                    Response::Located(address)
                }
                Err(e) => reject("Search", e),
            },
            Request::List => match self.directory.list() {
                Ok(replicas) => {
                    debug!("Listing {} files", replicas.len());
                    Response::Listing(replicas)
                }
                Err(e) => reject("List", e),
            },
        }
    }

    /// Serialise a reply; a listing too large for one datagram becomes an ERROR.
    fn encode_reply(&self, response: Response) -> Vec<u8> {
        match response.to_pdu().and_then(|pdu| pdu.to_datagram()) {
            Ok(datagram) => datagram,
            Err(e) => {
                warn!("Reply does not fit in one datagram: {}", e);
                let fallback = Response::error(ErrorCode::CapacityExceeded, e.to_string());
                // a short ERROR always fits
                fallback
                    .to_pdu()
                    .and_then(|pdu| pdu.to_datagram())
                    .unwrap_or_else(|_| vec![peerdex_protocol::PduType::Error.tag()])
            }
        }
    }
}

fn reject(operation: &str, error: DirectoryError) -> Response {
    debug!("{} rejected: {}", operation, error);
    Response::error(error.code(), format!("{} failed: {}", operation, error))
}

fn request_label(request: &Request) -> &'static str {
    match request {
        Request::Register { .. } => "register",
        Request::Deregister { .. } => "deregister",
        Request::Search { .. } => "search",
        Request::List => "list",
    }
}

fn record(kind: &'static str, outcome: &'static str) {
    counter!("peerdex_index_requests_total", "kind" => kind, "outcome" => outcome).increment(1);
}
