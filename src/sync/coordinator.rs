//! C8: `FolderSyncCoordinator`. Guarantees at-most-one mutating sync pass per
//! `(account_id, folder_id)` at a time, so an IDLE-triggered incremental pass
//! and a foreground full-sync pass never race on the same folder.
//!
//! No direct donor counterpart -- the donor serializes IMAP access
//! implicitly through its single actor task per account (`mail/imap/actor.rs`).
//! Implemented as a `tokio::sync::Mutex`-per-key map guarded by an outer
//! `std::sync::Mutex` for the map itself, following the same Arc/Mutex-map
//! idiom as `imap::pool::ConnectionPool`'s per-account semaphore map.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::{AccountId, FolderId};

type Key = (AccountId, FolderId);

/// Held for the duration of a sync pass on one folder. Dropping it releases
/// the lock and wakes the oldest FIFO waiter (`tokio::sync::Mutex`'s own
/// guarantee).
pub struct FolderSyncGuard {
    _guard: OwnedMutexGuard<()>,
}

pub struct FolderSyncCoordinator {
    locks: StdMutex<HashMap<Key, Arc<Mutex<()>>>>,
}

impl FolderSyncCoordinator {
    pub fn new() -> Self {
        Self { locks: StdMutex::new(HashMap::new()) }
    }

    fn lock_for(&self, account_id: &AccountId, folder_id: &FolderId) -> Arc<Mutex<()>> {
        let key = (account_id.clone(), folder_id.clone());
        let mut locks = self.locks.lock().unwrap();
        locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    /// Suspends until the (account, folder) key is free, then holds it.
    pub async fn acquire(&self, account_id: &AccountId, folder_id: &FolderId) -> FolderSyncGuard {
        let lock = self.lock_for(account_id, folder_id);
        let guard = lock.lock_owned().await;
        FolderSyncGuard { _guard: guard }
    }

    /// Non-blocking variant used to coalesce IDLE-triggered re-runs: if a
    /// pass is already underway, the caller just lets it finish rather than
    /// queueing a second identical pass behind it.
    pub fn try_acquire(&self, account_id: &AccountId, folder_id: &FolderId) -> Option<FolderSyncGuard> {
        let lock = self.lock_for(account_id, folder_id);
        lock.try_lock_owned().ok().map(|guard| FolderSyncGuard { _guard: guard })
    }
}

impl Default for FolderSyncCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn second_acquire_waits_for_first_to_release() {
        let coordinator = Arc::new(FolderSyncCoordinator::new());
        let account_id = AccountId::from("acct-1");
        let folder_id = FolderId::from("inbox".to_string());

        let guard = coordinator.acquire(&account_id, &folder_id).await;
        assert!(coordinator.try_acquire(&account_id, &folder_id).is_none());
        drop(guard);
        assert!(coordinator.try_acquire(&account_id, &folder_id).is_some());
    }

    #[tokio::test]
    async fn distinct_folders_do_not_contend() {
        let coordinator = FolderSyncCoordinator::new();
        let account_id = AccountId::from("acct-1");
        let inbox = FolderId::from("inbox".to_string());
        let sent = FolderId::from("sent".to_string());

        let _guard = coordinator.acquire(&account_id, &inbox).await;
        assert!(coordinator.try_acquire(&account_id, &sent).is_some());
    }
}
