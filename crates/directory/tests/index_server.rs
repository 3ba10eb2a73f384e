//! End-to-end tests for the UDP index server.
//! Each test binds a server on an ephemeral loopback port and talks to it with
//! raw PDUs, exactly as a peer agent would.

use std::net::SocketAddr;

use peerdex_directory::{Directory, IndexServer};
use peerdex_protocol::{ErrorCode, Pdu, PduType, Request, Response, MAX_DATAGRAM};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct RunningServer {
    addr: SocketAddr,
    directory: Directory,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<std::io::Result<()>>,
}

impl RunningServer {
    async fn start() -> Self {
        let directory = Directory::new();
        let server = IndexServer::bind("127.0.0.1:0".parse().unwrap(), directory.clone())
            .await
            .expect("bind index server");
        let addr = server.local_addr().expect("server addr");
        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(server.run(shutdown_rx));
        Self {
            addr,
            directory,
            shutdown,
            task,
        }
    }

    async fn stop(self) {
        self.shutdown.send(true).expect("server still running");
        self.task.await.expect("server task").expect("server result");
    }
}

async fn exchange(server: SocketAddr, request: &Request) -> Response {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect(server).await.unwrap();
    let datagram = request.to_pdu().unwrap().to_datagram().unwrap();
    socket.send(&datagram).await.unwrap();

    let mut buf = vec![0u8; MAX_DATAGRAM];
    let len = socket.recv(&mut buf).await.unwrap();
    let pdu = Pdu::from_datagram(&buf[..len]).unwrap();
    Response::from_pdu(&pdu, request.kind()).unwrap()
}

fn register(peer: &str, file: &str, port: u16) -> Request {
    Request::Register {
        peer_name: peer.into(),
        filename: file.into(),
        port,
    }
}

fn search(peer: &str, file: &str) -> Request {
    Request::Search {
        peer_name: peer.into(),
        filename: file.into(),
    }
}

fn error_code(response: &Response) -> Option<ErrorCode> {
    match response {
        Response::Error { code, .. } => Some(*code),
        _ => None,
    }
}

#[tokio::test]
async fn register_then_search_returns_registered_port() {
    let server = RunningServer::start().await;

    let reply = exchange(server.addr, &register("alice", "a.txt", 31_000)).await;
    assert!(matches!(reply, Response::Acknowledge(_)));

    let reply = exchange(server.addr, &search("alice", "a.txt")).await;
    assert_eq!(
        reply,
        Response::Located("127.0.0.1:31000".parse().unwrap())
    );

    server.stop().await;
}

#[tokio::test]
async fn deregistered_file_is_no_longer_found() {
    let server = RunningServer::start().await;

    exchange(server.addr, &register("alice", "a.txt", 31_001)).await;
    let reply = exchange(
        server.addr,
        &Request::Deregister {
            filename: "a.txt".into(),
            port: 31_001,
        },
    )
    .await;
    assert!(matches!(reply, Response::Acknowledge(_)));

    let reply = exchange(server.addr, &search("alice", "a.txt")).await;
    assert_eq!(error_code(&reply), Some(ErrorCode::NotFound));

    server.stop().await;
}

#[tokio::test]
async fn second_registration_of_same_pair_is_duplicate() {
    let server = RunningServer::start().await;

    exchange(server.addr, &register("alice", "a.txt", 31_002)).await;
    let reply = exchange(server.addr, &register("alice", "a.txt", 31_003)).await;
    assert_eq!(error_code(&reply), Some(ErrorCode::DuplicateRegistration));
    assert_eq!(server.directory.len(), 1);

    server.stop().await;
}

#[tokio::test]
async fn list_spreads_selections_across_replicas() {
    let server = RunningServer::start().await;

    let reply = exchange(server.addr, &Request::List).await;
    assert_eq!(error_code(&reply), Some(ErrorCode::NotFound));

    exchange(server.addr, &register("alice", "song.mp3", 32_000)).await;
    exchange(server.addr, &register("bob", "song.mp3", 32_001)).await;
    exchange(server.addr, &register("bob", "notes.txt", 32_002)).await;

    let mut picks = Vec::new();
    for _ in 0..4 {
        match exchange(server.addr, &Request::List).await {
            Response::Listing(replicas) => {
                assert_eq!(replicas.len(), 2, "one replica per distinct filename");
                let song = replicas
                    .iter()
                    .find(|replica| replica.filename == "song.mp3")
                    .expect("song listed");
                picks.push(song.peer_name.clone());
            }
            other => panic!("unexpected reply {other:?}"),
        }
    }
    assert_eq!(picks, vec!["alice", "bob", "alice", "bob"]);

    server.stop().await;
}

#[tokio::test]
async fn server_survives_malformed_datagrams() {
    let server = RunningServer::start().await;

    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    socket.connect(server.addr).await.unwrap();
    socket.send(b"Zjunk").await.unwrap();

    let mut buf = vec![0u8; MAX_DATAGRAM];
    let len = socket.recv(&mut buf).await.unwrap();
    let pdu = Pdu::from_datagram(&buf[..len]).unwrap();
    assert_eq!(pdu.kind, PduType::Error);

    let reply = exchange(server.addr, &register("alice", "still-up", 33_000)).await;
    assert!(matches!(reply, Response::Acknowledge(_)));

    server.stop().await;
}
