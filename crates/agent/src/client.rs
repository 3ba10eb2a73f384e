//! UDP client for the index server.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use peerdex_protocol::{ListedReplica, Pdu, PduType, Request, Response, WireError, MAX_DATAGRAM};
use tokio::net::{lookup_host, UdpSocket};
use tokio::sync::Mutex;
use tracing::debug;

use crate::errors::{AgentError, Result};

/// One connected UDP socket to the index server.
///
/// Registration and deregistration must leave from the same source address,
/// so every request goes through this socket. Exchanges are serialised so a
/// reply is always matched with the request that caused it.
pub struct IndexClient {
    socket: UdpSocket,
    server: SocketAddr,
    exchange: Mutex<Vec<u8>>,
}

impl IndexClient {
    /// Resolve `host:port` and connect a fresh socket to it.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let server = lookup_host((host, port))
            .await
            .map_err(AgentError::Transport)?
            .next()
            .ok_or_else(|| {
                AgentError::Transport(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("{host} did not resolve to any address"),
                ))
            })?;

        let local: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await.map_err(AgentError::Transport)?;
        socket.connect(server).await.map_err(AgentError::Transport)?;
        debug!("Index client bound to {:?}, server {}", socket.local_addr(), server);

        Ok(Self {
            socket,
            server,
            exchange: Mutex::new(vec![0u8; MAX_DATAGRAM]),
        })
    }

    pub fn server_addr(&self) -> SocketAddr {
        self.server
    }

    /// Send one request and wait for its reply.
    ///
    /// An ERROR reply is surfaced as [`AgentError::Rejected`]. Replies left
    /// over from an exchange that was cancelled mid-flight are discarded:
    /// queued datagrams are drained before sending, and a reply whose type
    /// cannot answer this request is skipped.
    pub async fn request(&self, request: &Request) -> Result<Response> {
        let datagram = request
            .to_pdu()
            .and_then(|pdu| pdu.to_datagram())
            .map_err(AgentError::InvalidName)?;

        let mut buf = self.exchange.lock().await;
        self.drain_stale(&mut buf)?;
        self.socket
            .send(&datagram)
            .await
            .map_err(AgentError::Transport)?;

        loop {
            let len = self
                .socket
                .recv(&mut buf)
                .await
                .map_err(AgentError::Transport)?;

            let pdu = Pdu::from_datagram(&buf[..len])?;
            match Response::from_pdu(&pdu, request.kind()) {
                Err(WireError::UnexpectedReply { request, actual }) => {
                    debug!("Discarding stale {} reply while awaiting {}", actual, request);
                }
                Err(e) => return Err(e.into()),
                Ok(Response::Error { code, message }) => {
                    return Err(AgentError::Rejected { code, message })
                }
                Ok(response) => return Ok(response),
            }
        }
    }

    /// Drop every datagram already queued on the socket.
    fn drain_stale(&self, buf: &mut [u8]) -> Result<()> {
        loop {
            match self.socket.try_recv(buf) {
                Ok(len) => debug!("Discarding {} byte stale reply", len),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) => return Err(AgentError::Transport(e)),
            }
        }
    }

    pub async fn register(&self, peer_name: &str, filename: &str, port: u16) -> Result<String> {
        let request = Request::Register {
            peer_name: peer_name.to_string(),
            filename: filename.to_string(),
            port,
        };
        self.acknowledged(&request).await
    }

    pub async fn deregister(&self, filename: &str, port: u16) -> Result<String> {
        let request = Request::Deregister {
            filename: filename.to_string(),
            port,
        };
        self.acknowledged(&request).await
    }

    /// Resolve where `peer_name` serves `filename`.
    pub async fn search(&self, peer_name: &str, filename: &str) -> Result<SocketAddr> {
        let request = Request::Search {
            peer_name: peer_name.to_string(),
            filename: filename.to_string(),
        };
        match self.request(&request).await? {
            Response::Located(address) => Ok(address),
            other => Err(AgentError::UnexpectedResponse(reply_kind(&other))),
        }
    }

    pub async fn list(&self) -> Result<Vec<ListedReplica>> {
        match self.request(&Request::List).await? {
            Response::Listing(replicas) => Ok(replicas),
            other => Err(AgentError::UnexpectedResponse(reply_kind(&other))),
        }
    }

    async fn acknowledged(&self, request: &Request) -> Result<String> {
        match self.request(request).await? {
            Response::Acknowledge(text) => Ok(text),
            other => Err(AgentError::UnexpectedResponse(reply_kind(&other))),
        }
    }
}

fn reply_kind(response: &Response) -> PduType {
    match response {
        Response::Acknowledge(_) | Response::Located(_) => PduType::Acknowledge,
        Response::Listing(_) => PduType::List,
        Response::Error { .. } => PduType::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use peerdex_protocol::ErrorCode;

    /// Answer exactly one datagram with `reply`.
    async fn one_shot_server(reply: Response) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            let (_, source) = socket.recv_from(&mut buf).await.unwrap();
            let datagram = reply.to_pdu().unwrap().to_datagram().unwrap();
            socket.send_to(&datagram, source).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn leftover_reply_of_another_kind_is_skipped() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            let (_, source) = socket.recv_from(&mut buf).await.unwrap();
            for reply in [Response::Listing(Vec::new()), Response::Acknowledge("ok".into())] {
                let datagram = reply.to_pdu().unwrap().to_datagram().unwrap();
                socket.send_to(&datagram, source).await.unwrap();
            }
        });
        let client = IndexClient::connect("127.0.0.1", addr.port()).await.unwrap();

        assert_eq!(client.register("alice", "a.txt", 20_000).await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn queued_reply_is_drained_before_the_next_exchange() {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let client = IndexClient::connect("127.0.0.1", addr.port()).await.unwrap();
        let client_port = client.socket.local_addr().unwrap().port();

        // a reply nobody is waiting for any more
        let stale = Response::Acknowledge("late".into()).to_pdu().unwrap().to_datagram().unwrap();
        socket.send_to(&stale, ("127.0.0.1", client_port)).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            let (_, source) = socket.recv_from(&mut buf).await.unwrap();
            let reply = Response::Acknowledge("fresh".into()).to_pdu().unwrap();
            socket.send_to(&reply.to_datagram().unwrap(), source).await.unwrap();
        });

        assert_eq!(client.deregister("a.txt", 20_000).await.unwrap(), "fresh");
    }

    #[tokio::test]
    async fn error_reply_becomes_rejection() {
        let addr = one_shot_server(Response::error(ErrorCode::NotFound, "no such file")).await;
        let client = IndexClient::connect("127.0.0.1", addr.port()).await.unwrap();

        let err = client.search("alice", "a.txt").await.unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::NotFound));
        assert!(err.to_string().contains("no such file"));
    }

    #[tokio::test]
    async fn search_reply_is_decoded_as_location() {
        let location: SocketAddr = "10.1.2.3:24000".parse().unwrap();
        let addr = one_shot_server(Response::Located(location)).await;
        let client = IndexClient::connect("127.0.0.1", addr.port()).await.unwrap();

        assert_eq!(client.search("alice", "a.txt").await.unwrap(), location);
        assert_eq!(client.server_addr(), addr);
    }

    #[tokio::test]
    async fn invalid_filename_is_refused_before_sending() {
        let client = IndexClient::connect("127.0.0.1", 9).await.unwrap();
        let err = client.register("alice", "../etc/passwd", 20_000).await.unwrap_err();
        assert!(matches!(err, AgentError::InvalidName(_)));
    }
}
