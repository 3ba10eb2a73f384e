//! In-memory directory store with least-used replica selection.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use parking_lot::Mutex;
use peerdex_protocol::{validate_filename, validate_peer_name, ListedReplica};

use crate::entry::DirectoryEntry;
use crate::errors::{DirectoryError, Result};

/// Directory of registered replicas.
///
/// Entries keep registration order; removal shifts later entries down so the
/// list never has gaps. All operations run under one mutex, so request
/// handling may be parallelised without callers observing a torn update.
#[derive(Clone, Debug)]
pub struct Directory {
    inner: Arc<Mutex<DirectoryInner>>,
}

#[derive(Debug)]
struct DirectoryInner {
    entries: Vec<DirectoryEntry>,
    max_entries: Option<usize>,
}

impl Directory {
    /// Create an unbounded directory.
    pub fn new() -> Self {
        Self::with_limit(None)
    }

    /// Create a directory that refuses registrations beyond `max_entries`.
    pub fn with_limit(max_entries: Option<usize>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(DirectoryInner {
                entries: Vec::new(),
                max_entries,
            })),
        }
    }

    /// Register `filename` as served by `peer_name` at `address:port`.
    pub fn register(
        &self,
        peer_name: &str,
        filename: &str,
        address: IpAddr,
        port: u16,
    ) -> Result<()> {
        validate_peer_name(peer_name)?;
        validate_filename(filename)?;

        let mut inner = self.inner.lock();
        if inner
            .entries
            .iter()
            .any(|entry| entry.is_replica_of(peer_name, filename))
        {
            return Err(DirectoryError::DuplicateRegistration {
                peer_name: peer_name.to_string(),
                filename: filename.to_string(),
            });
        }
        if let Some(capacity) = inner.max_entries {
            if inner.entries.len() >= capacity {
                return Err(DirectoryError::CapacityExceeded { capacity });
            }
        }

        inner
            .entries
            .push(DirectoryEntry::new(peer_name, filename, address, port));
        Ok(())
    }

    /// Remove the entry for `filename` registered from `address` with `port`.
    pub fn deregister(&self, filename: &str, port: u16, address: IpAddr) -> Result<DirectoryEntry> {
        let mut inner = self.inner.lock();
        let position = inner
            .entries
            .iter()
            .position(|entry| {
                entry.filename == filename && entry.port == port && entry.address == address
            })
            .ok_or_else(|| DirectoryError::NotRegistered {
                filename: filename.to_string(),
                port,
                address,
            })?;
        Ok(inner.entries.remove(position))
    }

    /// Resolve the serving address of `filename` as registered by `peer_name`.
    pub fn search(&self, peer_name: &str, filename: &str) -> Result<SocketAddr> {
        let inner = self.inner.lock();
        inner
            .entries
            .iter()
            .find(|entry| entry.is_replica_of(peer_name, filename))
            .map(DirectoryEntry::socket_addr)
            .ok_or_else(|| DirectoryError::ReplicaNotFound {
                peer_name: peer_name.to_string(),
                filename: filename.to_string(),
            })
    }

    /// Select one replica per distinct filename: the one with the lowest use
    /// count, earliest registration on ties. Each selected replica's use count
    /// is incremented. Files appear in order of their first registration.
    pub fn list(&self) -> Result<Vec<ListedReplica>> {
        let mut inner = self.inner.lock();
        if inner.entries.is_empty() {
            return Err(DirectoryError::EmptyDirectory);
        }

        let chosen = {
            let entries = &inner.entries;
            let mut chosen: Vec<usize> = Vec::new();
            let mut slot_by_filename: HashMap<&str, usize> = HashMap::new();
            for (index, entry) in entries.iter().enumerate() {
                match slot_by_filename.get(entry.filename.as_str()) {
                    Some(&slot) => {
                        // strict comparison keeps the earliest registration on ties
                        if entry.use_count < entries[chosen[slot]].use_count {
                            chosen[slot] = index;
                        }
                    }
                    None => {
                        slot_by_filename.insert(entry.filename.as_str(), chosen.len());
                        chosen.push(index);
                    }
                }
            }
            chosen
        };

        let mut replicas = Vec::with_capacity(chosen.len());
        for index in chosen {
            let entry = &mut inner.entries[index];
            entry.use_count += 1;
            replicas.push(ListedReplica {
                peer_name: entry.peer_name.clone(),
                filename: entry.filename.clone(),
                address: entry.socket_addr(),
            });
        }
        Ok(replicas)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }

    /// Snapshot of all entries in registration order.
    pub fn entries(&self) -> Vec<DirectoryEntry> {
        self.inner.lock().entries.clone()
    }
}

impl Default for Directory {
    fn default() -> Self {
        Self::new()
    }
}
