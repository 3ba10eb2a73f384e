//! Peerdex Index Directory
//!
//! The authoritative directory mapping filenames to the peers serving them,
//! and the UDP server that answers REGISTER, DEREGISTER, SEARCH and LIST.
//! The index never moves file bytes; it only brokers locations.

pub mod entry;
pub mod errors;
pub mod server;
pub mod store;

pub use entry::DirectoryEntry;
pub use errors::*;
pub use server::IndexServer;
pub use store::Directory;
