//! Directory entry data model.

use std::net::{IpAddr, SocketAddr};

/// One replica: a file registered by one peer at one network location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub filename: String,
    pub peer_name: String,

    /// Source address of the REGISTER datagram.
    pub address: IpAddr,

    /// TCP port of the peer's serving task.
    pub port: u16,

    /// Number of times LIST has selected this replica.
    pub use_count: u64,
}

impl DirectoryEntry {
    pub fn new(
        peer_name: impl Into<String>,
        filename: impl Into<String>,
        address: IpAddr,
        port: u16,
    ) -> Self {
        Self {
            filename: filename.into(),
            peer_name: peer_name.into(),
            address,
            port,
            use_count: 0,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    pub fn is_replica_of(&self, peer_name: &str, filename: &str) -> bool {
        self.peer_name == peer_name && self.filename == filename
    }
}
