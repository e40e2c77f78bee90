//! Durable registries of known coordinator and client endpoints, used for
//! peer discovery (invalidation fan-out, client re-pointing, failover
//! bootstrapping). The core protocol only sees the `Registry` trait.

use std::net::SocketAddr;

use crate::utils::DsmError;
use crate::protocol::{ClientId, ClientPointer};

use serde::{Deserialize, Serialize};

mod file;
mod mem;

pub use file::FileRegistry;
pub use mem::MemRegistry;

/// Registry record of one coordinator process.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub struct CoordinatorRecord {
    /// RPC address of the coordinator.
    pub addr: SocketAddr,

    /// Registered as the primary?
    pub is_primary: bool,
}

/// Registry record of one client process.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub struct ClientRecord {
    pub id: ClientId,
    pub addr: SocketAddr,
}

impl From<ClientRecord> for ClientPointer {
    fn from(record: ClientRecord) -> Self {
        ClientPointer::new(record.id, record.addr)
    }
}

/// Node discovery capability. Entries are append-only within a run.
pub trait Registry: Send + Sync {
    /// Address of the coordinator registered as primary, if any.
    fn lookup_primary(&self) -> Result<Option<SocketAddr>, DsmError> {
        Ok(self
            .list_coordinators()?
            .into_iter()
            .find(|c| c.is_primary)
            .map(|c| c.addr))
    }

    /// Address of the first coordinator registered as backup, if any.
    fn lookup_backup(&self) -> Result<Option<SocketAddr>, DsmError> {
        Ok(self
            .list_coordinators()?
            .into_iter()
            .find(|c| !c.is_primary)
            .map(|c| c.addr))
    }

    /// All known clients.
    fn list_clients(&self) -> Result<Vec<ClientPointer>, DsmError>;

    /// All known coordinators.
    fn list_coordinators(&self) -> Result<Vec<CoordinatorRecord>, DsmError>;

    /// Registers a new coordinator. The first one ever registered becomes the
    /// primary; later ones are backups.
    fn register_coordinator(
        &self,
        addr: SocketAddr,
    ) -> Result<CoordinatorRecord, DsmError>;

    /// Registers a new client, assigning it the next free ID (starting at 1).
    fn register_client(
        &self,
        addr: SocketAddr,
    ) -> Result<ClientPointer, DsmError>;
}

/// Next coordinator record to append to `existing`.
fn next_coordinator(
    existing: &[CoordinatorRecord],
    addr: SocketAddr,
) -> CoordinatorRecord {
    CoordinatorRecord {
        addr,
        is_primary: existing.is_empty(),
    }
}

/// Next client record to append to `existing`.
fn next_client(existing: &[ClientRecord], addr: SocketAddr) -> ClientRecord {
    let id = existing.iter().map(|c| c.id).max().unwrap_or(0) + 1;
    ClientRecord { id, addr }
}
