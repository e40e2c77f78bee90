//! In-memory registry.

use std::net::SocketAddr;
use std::sync::{Mutex, PoisonError};

use crate::utils::DsmError;
use crate::protocol::ClientPointer;
use crate::registry::{
    ClientRecord, CoordinatorRecord, Registry, next_client, next_coordinator,
};

/// Registry kept in process memory.
#[derive(Debug, Default)]
pub struct MemRegistry {
    coordinators: Mutex<Vec<CoordinatorRecord>>,
    clients: Mutex<Vec<ClientRecord>>,
}

impl MemRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Registry for MemRegistry {
    fn list_clients(&self) -> Result<Vec<ClientPointer>, DsmError> {
        let clients = self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(clients.iter().map(|&c| c.into()).collect())
    }

    fn list_coordinators(&self) -> Result<Vec<CoordinatorRecord>, DsmError> {
        Ok(self
            .coordinators
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    fn register_coordinator(
        &self,
        addr: SocketAddr,
    ) -> Result<CoordinatorRecord, DsmError> {
        let mut coordinators = self
            .coordinators
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let record = next_coordinator(&coordinators, addr);
        coordinators.push(record);
        Ok(record)
    }

    fn register_client(
        &self,
        addr: SocketAddr,
    ) -> Result<ClientPointer, DsmError> {
        let mut clients =
            self.clients.lock().unwrap_or_else(PoisonError::into_inner);
        let record = next_client(&clients, addr);
        clients.push(record);
        Ok(record.into())
    }
}

#[cfg(test)]
mod mem_tests {
    use super::*;

    #[test]
    fn primary_then_backup() -> Result<(), DsmError> {
        let registry = MemRegistry::new();
        assert_eq!(registry.lookup_primary()?, None);
        assert_eq!(registry.lookup_backup()?, None);

        let primary = registry.register_coordinator("127.0.0.1:50000".parse()?)?;
        assert!(primary.is_primary);
        let backup = registry.register_coordinator("127.0.0.1:50001".parse()?)?;
        assert!(!backup.is_primary);

        assert_eq!(registry.lookup_primary()?, Some(primary.addr));
        assert_eq!(registry.lookup_backup()?, Some(backup.addr));
        assert_eq!(registry.list_coordinators()?.len(), 2);
        Ok(())
    }

    #[test]
    fn client_ids_increase() -> Result<(), DsmError> {
        let registry = MemRegistry::new();
        let a = registry.register_client("127.0.0.1:50010".parse()?)?;
        let b = registry.register_client("127.0.0.1:50011".parse()?)?;
        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(registry.list_clients()?, vec![a, b]);
        Ok(())
    }
}
