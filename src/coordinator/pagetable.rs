//! Authoritative per-page metadata table of a coordinator.
//!
//! Two levels of exclusion:
//!   - a per-page async lock, held by a read/write request handler for its
//!     whole request cycle, so that cycles on the same page serialize while
//!     different pages proceed in parallel
//!   - a short-lived mutex over the metadata map, never held across an
//!     `.await`, so that each individual update (confirmation commit, copy set
//!     shrink on invalidation, marker set/clear) is atomic
//!
//! Confirmations only take the second one, since they arrive while the
//! triggering request cycle is still holding the page lock.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::protocol::{
    ClientPointer, Metadata, PageId, PageInfo, Transfer, TransferKind,
};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Guard of a page's request-cycle lock.
pub(crate) type PageGuard = OwnedMutexGuard<()>;

/// Outcome of committing a read confirmation.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub(crate) enum CopyInsert {
    /// Newly added to the copy set.
    Added,

    /// Already in the copy set; nothing changed.
    Duplicate,

    /// Requester is the owner; owners never join their own copy set.
    IsOwner,

    /// No such page.
    Unknown,
}

#[derive(Debug, Default)]
pub(crate) struct PageTable {
    /// Page ID -> metadata.
    meta: Mutex<Metadata>,

    /// Page ID -> request-cycle lock, created lazily.
    locks: Mutex<HashMap<PageId, Arc<AsyncMutex<()>>>>,
}

impl PageTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn meta(&self) -> MutexGuard<'_, Metadata> {
        self.meta.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Acquires the request-cycle lock of a page, waiting for any in-flight
    /// cycle on the same page to finish.
    pub(crate) async fn lock_page(&self, page_id: &str) -> PageGuard {
        let lock = {
            let mut locks =
                self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks
                .entry(page_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }

    /// Releases the lock of a page found to have no metadata, and forgets the
    /// lock unless another cycle is already waiting on it.
    pub(crate) fn release_unknown(&self, page_id: &str, guard: PageGuard) {
        drop(guard);
        let mut locks =
            self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if self.meta().contains_key(page_id) {
            return;
        }
        if locks
            .get(page_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(page_id);
        }
    }

    #[cfg(test)]
    fn num_locks(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Copy of a page's metadata.
    pub(crate) fn get(&self, page_id: &str) -> Option<PageInfo> {
        self.meta().get(page_id).cloned()
    }

    /// Full snapshot of all metadata.
    pub(crate) fn snapshot(&self) -> Metadata {
        self.meta().clone()
    }

    /// Replaces all metadata with a snapshot adopted from another coordinator.
    pub(crate) fn replace(&self, snapshot: Metadata) {
        *self.meta() = snapshot;
    }

    /// Creates metadata for a never-written page owned by `owner`, with a
    /// write marker set. Returns false if the page already existed.
    pub(crate) fn create_owned(
        &self,
        page_id: &str,
        owner: ClientPointer,
    ) -> bool {
        let mut meta = self.meta();
        if meta.contains_key(page_id) {
            return false;
        }
        let mut info = PageInfo::owned_by(owner);
        info.transfer = Some(Transfer {
            kind: TransferKind::Write,
            requester: owner,
        });
        meta.insert(page_id.to_string(), info);
        true
    }

    /// Sets the transfer-in-progress marker of a page, returning the marker it
    /// replaced, if any.
    pub(crate) fn begin_transfer(
        &self,
        page_id: &str,
        transfer: Transfer,
    ) -> Option<Transfer> {
        self.meta()
            .get_mut(page_id)
            .and_then(|info| info.transfer.replace(transfer))
    }

    /// Current transfer marker of a page.
    pub(crate) fn transfer(&self, page_id: &str) -> Option<Transfer> {
        self.meta().get(page_id).and_then(|info| info.transfer)
    }

    /// Clears the transfer marker of a page, returning it.
    pub(crate) fn clear_transfer(&self, page_id: &str) -> Option<Transfer> {
        self.meta()
            .get_mut(page_id)
            .and_then(|info| info.transfer.take())
    }

    /// Clears every transfer marker, returning the pages that had one.
    pub(crate) fn clear_all_transfers(&self) -> Vec<(PageId, Transfer)> {
        self.meta()
            .iter_mut()
            .filter_map(|(page_id, info)| {
                info.transfer.take().map(|t| (page_id.clone(), t))
            })
            .collect()
    }

    /// Commits a read confirmation: adds `requester` to the copy set unless
    /// already there or the owner, and clears a matching read marker.
    pub(crate) fn add_copy(
        &self,
        page_id: &str,
        requester: ClientPointer,
    ) -> CopyInsert {
        let mut meta = self.meta();
        let Some(info) = meta.get_mut(page_id) else {
            return CopyInsert::Unknown;
        };
        if info.transfer
            == Some(Transfer {
                kind: TransferKind::Read,
                requester,
            })
        {
            info.transfer = None;
        }
        if info.owner == requester {
            CopyInsert::IsOwner
        } else if info.copy_set.insert(requester) {
            CopyInsert::Added
        } else {
            CopyInsert::Duplicate
        }
    }

    /// Removes one client from a page's copy set after its copy has been
    /// invalidated.
    pub(crate) fn remove_copy(&self, page_id: &str, holder: &ClientPointer) {
        if let Some(info) = self.meta().get_mut(page_id) {
            info.copy_set.remove(holder);
        }
    }

    /// Commits a write confirmation: installs `writer` as owner, empties the
    /// copy set, and clears the marker. Returns false if the page is unknown.
    pub(crate) fn set_owner(&self, page_id: &str, writer: ClientPointer) -> bool {
        match self.meta().get_mut(page_id) {
            Some(info) => {
                info.owner = writer;
                info.copy_set.clear();
                info.transfer = None;
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod pagetable_tests {
    use super::*;
    use std::time::Duration;

    fn pointer(id: u64) -> ClientPointer {
        let addr = format!("127.0.0.1:{}", 42000 + id).parse().unwrap();
        ClientPointer::new(id, addr)
    }

    #[test]
    fn create_only_once() {
        let table = PageTable::new();
        assert!(table.create_owned("P1", pointer(1)));
        assert!(!table.create_owned("P1", pointer(2)));
        let info = table.get("P1").unwrap();
        assert_eq!(info.owner, pointer(1));
        assert!(info.copy_set.is_empty());
        assert_eq!(
            info.transfer,
            Some(Transfer {
                kind: TransferKind::Write,
                requester: pointer(1)
            })
        );
    }

    #[test]
    fn add_copy_dedups_and_skips_owner() {
        let table = PageTable::new();
        assert_eq!(table.add_copy("P1", pointer(2)), CopyInsert::Unknown);

        table.create_owned("P1", pointer(1));
        assert_eq!(table.add_copy("P1", pointer(2)), CopyInsert::Added);
        assert_eq!(table.add_copy("P1", pointer(2)), CopyInsert::Duplicate);
        assert_eq!(table.add_copy("P1", pointer(1)), CopyInsert::IsOwner);

        let info = table.get("P1").unwrap();
        assert_eq!(info.copy_set.len(), 1);
        assert!(!info.copy_set.contains(&info.owner));
    }

    #[test]
    fn read_marker_cleared_by_matching_confirmation() {
        let table = PageTable::new();
        table.create_owned("P1", pointer(1));
        table.clear_transfer("P1");

        let marker = Transfer {
            kind: TransferKind::Read,
            requester: pointer(3),
        };
        assert_eq!(table.begin_transfer("P1", marker), None);
        table.add_copy("P1", pointer(2));
        assert_eq!(table.transfer("P1"), Some(marker));
        table.add_copy("P1", pointer(3));
        assert_eq!(table.transfer("P1"), None);
    }

    #[test]
    fn set_owner_resets_copy_set() {
        let table = PageTable::new();
        assert!(!table.set_owner("P1", pointer(1)));

        table.create_owned("P1", pointer(1));
        table.add_copy("P1", pointer(2));
        table.add_copy("P1", pointer(3));
        table.remove_copy("P1", &pointer(2));
        assert_eq!(table.get("P1").unwrap().copy_set.len(), 1);

        assert!(table.set_owner("P1", pointer(4)));
        let info = table.get("P1").unwrap();
        assert_eq!(info.owner, pointer(4));
        assert!(info.copy_set.is_empty());
        assert_eq!(info.transfer, None);
    }

    #[test]
    fn clear_all_transfers_reports_stalled() {
        let table = PageTable::new();
        table.create_owned("P1", pointer(1));
        table.create_owned("P2", pointer(2));
        table.clear_transfer("P2");
        let stalled = table.clear_all_transfers();
        assert_eq!(stalled.len(), 1);
        assert_eq!(stalled[0].0, "P1");
        assert!(table.snapshot().values().all(|i| i.transfer.is_none()));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_page_cycles_serialize() {
        let table = Arc::new(PageTable::new());
        let inside = Arc::new(Mutex::new(0u32));
        let max_inside = Arc::new(Mutex::new(0u32));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let (table, inside, max_inside) =
                (table.clone(), inside.clone(), max_inside.clone());
            handles.push(tokio::spawn(async move {
                let _guard = table.lock_page("P1").await;
                {
                    let mut n = inside.lock().unwrap();
                    *n += 1;
                    let mut m = max_inside.lock().unwrap();
                    *m = (*m).max(*n);
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
                *inside.lock().unwrap() -= 1;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(*max_inside.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn different_pages_do_not_block() {
        let table = PageTable::new();
        let _p1 = table.lock_page("P1").await;
        let p2 = tokio::time::timeout(
            Duration::from_millis(100),
            table.lock_page("P2"),
        )
        .await;
        assert!(p2.is_ok());
    }

    #[tokio::test]
    async fn unknown_page_lock_forgotten() {
        let table = Arc::new(PageTable::new());
        let guard = table.lock_page("P9").await;
        table.release_unknown("P9", guard);
        assert_eq!(table.num_locks(), 0);

        // kept while another cycle waits on it
        let guard = table.lock_page("P9").await;
        let waiter = {
            let table = table.clone();
            tokio::spawn(async move {
                let _guard = table.lock_page("P9").await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        table.release_unknown("P9", guard);
        assert_eq!(table.num_locks(), 1);
        waiter.await.unwrap();

        // kept once the page exists
        table.create_owned("P1", pointer(1));
        let guard = table.lock_page("P1").await;
        table.release_unknown("P1", guard);
        assert_eq!(table.num_locks(), 2);
    }
}
