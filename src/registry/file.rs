//! File-backed registry: two TOML files in a shared directory, re-read on
//! every lookup so that separate node processes see each other.

use std::fs;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use crate::utils::DsmError;
use crate::protocol::ClientPointer;
use crate::registry::{
    ClientRecord, CoordinatorRecord, Registry, next_client, next_coordinator,
};

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

/// File name of the coordinators registry.
pub const COORDINATORS_FILE: &str = "coordinators.toml";

/// File name of the clients registry.
pub const CLIENTS_FILE: &str = "clients.toml";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CoordinatorsTable {
    #[serde(default)]
    coordinators: Vec<CoordinatorRecord>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ClientsTable {
    #[serde(default)]
    clients: Vec<ClientRecord>,
}

/// Registry persisted as TOML files under a directory.
#[derive(Debug)]
pub struct FileRegistry {
    /// Path to the coordinators file.
    coordinators_path: PathBuf,

    /// Path to the clients file.
    clients_path: PathBuf,

    /// Serializes read-modify-write cycles issued from this process.
    write_lock: Mutex<()>,
}

impl FileRegistry {
    /// Creates a registry rooted at `dir`, creating the directory if needed.
    pub fn new_and_setup(dir: impl AsRef<Path>) -> Result<Self, DsmError> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        Ok(FileRegistry {
            coordinators_path: dir.join(COORDINATORS_FILE),
            clients_path: dir.join(CLIENTS_FILE),
            write_lock: Mutex::new(()),
        })
    }

    /// Loads a table from file; a missing file reads as an empty table, a
    /// malformed one is an error.
    fn load<T>(path: &Path) -> Result<T, DsmError>
    where
        T: DeserializeOwned + Default,
    {
        match fs::read_to_string(path) {
            Ok(text) => toml::from_str(&text).map_err(|e| {
                DsmError::msg(format!(
                    "malformed registry '{}': {}",
                    path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Stores a table to file by writing a temporary file and renaming it
    /// over the target.
    fn store<T: Serialize>(path: &Path, table: &T) -> Result<(), DsmError> {
        let text = toml::to_string_pretty(table)?;
        let tmp_path = path.with_extension("toml.tmp");
        fs::write(&tmp_path, text)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

impl Registry for FileRegistry {
    fn list_clients(&self) -> Result<Vec<ClientPointer>, DsmError> {
        let table: ClientsTable = Self::load(&self.clients_path)?;
        Ok(table.clients.into_iter().map(ClientPointer::from).collect())
    }

    fn list_coordinators(&self) -> Result<Vec<CoordinatorRecord>, DsmError> {
        let table: CoordinatorsTable = Self::load(&self.coordinators_path)?;
        Ok(table.coordinators)
    }

    fn register_coordinator(
        &self,
        addr: SocketAddr,
    ) -> Result<CoordinatorRecord, DsmError> {
        let _guard =
            self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut table: CoordinatorsTable =
            Self::load(&self.coordinators_path)?;
        let record = next_coordinator(&table.coordinators, addr);
        table.coordinators.push(record);
        Self::store(&self.coordinators_path, &table)?;
        Ok(record)
    }

    fn register_client(
        &self,
        addr: SocketAddr,
    ) -> Result<ClientPointer, DsmError> {
        let _guard =
            self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut table: ClientsTable = Self::load(&self.clients_path)?;
        let record = next_client(&table.clients, addr);
        table.clients.push(record);
        Self::store(&self.clients_path, &table)?;
        Ok(record.into())
    }
}

#[cfg(test)]
mod file_tests {
    use super::*;

    fn fresh_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "ivydsm-registry-{}-{}",
            std::process::id(),
            name
        ));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn empty_registry() -> Result<(), DsmError> {
        let registry = FileRegistry::new_and_setup(fresh_dir("empty"))?;
        assert_eq!(registry.lookup_primary()?, None);
        assert!(registry.list_clients()?.is_empty());
        Ok(())
    }

    #[test]
    fn shared_between_handles() -> Result<(), DsmError> {
        let dir = fresh_dir("shared");
        let first = FileRegistry::new_and_setup(&dir)?;
        let second = FileRegistry::new_and_setup(&dir)?;

        let primary = first.register_coordinator("127.0.0.1:50000".parse()?)?;
        let backup = second.register_coordinator("127.0.0.1:50001".parse()?)?;
        assert!(primary.is_primary);
        assert!(!backup.is_primary);
        assert_eq!(second.lookup_primary()?, Some(primary.addr));
        assert_eq!(first.lookup_backup()?, Some(backup.addr));

        let a = first.register_client("127.0.0.1:50010".parse()?)?;
        let b = second.register_client("127.0.0.1:50011".parse()?)?;
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(first.list_clients()?, vec![a, b]);
        Ok(())
    }

    #[test]
    fn malformed_file() -> Result<(), DsmError> {
        let dir = fresh_dir("malformed");
        let registry = FileRegistry::new_and_setup(&dir)?;
        fs::write(dir.join(COORDINATORS_FILE), "coordinators = 42")?;
        assert!(registry.lookup_primary().is_err());
        assert!(registry
            .register_coordinator("127.0.0.1:50000".parse()?)
            .is_err());
        Ok(())
    }
}
