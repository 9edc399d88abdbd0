//! C5: `ConnectionPool`, a per-account + global limited, FIFO-fair pool of
//! connected `IMAPClient`s.
//!
//! Grounded on the donor's `mail/imap/pool.rs` `Arc<Mutex<Vec<ImapClient>>>`
//! idle list (push/pop reuse, `is_connected()` staleness probe before
//! handing a client back out), generalized two ways: (1) a second,
//! account-keyed idle list plus a global cap, since donor's pool serves a
//! single account; (2) admission control via `tokio::sync::Semaphore`
//! rather than donor's unconditional `Vec` (donor had no concurrency cap at
//! all beyond the idle list's own size). `tokio::sync::Semaphore` grants
//! permits to waiters in arrival order, which is what gives both the
//! per-account and the global queue their FIFO fairness without hand-rolled
//! waiter bookkeeping.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::domain::AccountId;
use crate::error::{ImapProtocolError, PoolError};

use super::client::IMAPClient;

type IdleMap = StdMutex<HashMap<AccountId, VecDeque<IMAPClient>>>;

pub struct ConnectionPool {
    global: Arc<Semaphore>,
    account_semaphores: StdMutex<HashMap<AccountId, Arc<Semaphore>>>,
    idle: Arc<IdleMap>,
}

impl ConnectionPool {
    pub fn new(global_limit: usize) -> Self {
        Self {
            global: Arc::new(Semaphore::new(global_limit)),
            account_semaphores: StdMutex::new(HashMap::new()),
            idle: Arc::new(StdMutex::new(HashMap::new())),
        }
    }

    fn account_semaphore(&self, account_id: &AccountId, per_account_limit: usize) -> Arc<Semaphore> {
        let mut map = self.account_semaphores.lock().unwrap();
        map.entry(account_id.clone())
            .or_insert_with(|| Arc::new(Semaphore::new(per_account_limit)))
            .clone()
    }

    /// Checks out a connected client for `account_id`, waiting in FIFO order
    /// for both the account's and the pool's global limit. `factory`
    /// constructs a fresh, not-yet-connected `IMAPClient` on an idle-pool
    /// miss; `connect()` (with its own retry policy) is called either way.
    pub async fn checkout(
        &self,
        account_id: AccountId,
        per_account_limit: usize,
        factory: impl FnOnce() -> IMAPClient,
    ) -> Result<PooledImapClient, PoolError> {
        let account_sem = self.account_semaphore(&account_id, per_account_limit);

        // Account permit first: a caller parked only because its own account
        // is at its per-account cap must not also be holding a global slot
        // while it waits (§4.5 step 4) -- that would park a global permit
        // for the whole wait and could starve other accounts that do have
        // global room.
        let account_permit = account_sem.acquire_owned().await.map_err(|_| PoolError::Cancelled)?;
        let global_permit = self.global.clone().acquire_owned().await.map_err(|_| PoolError::Cancelled)?;

        let existing = {
            let mut idle = self.idle.lock().unwrap();
            idle.get_mut(&account_id).and_then(|q| q.pop_front())
        };

        let mut client = existing.unwrap_or_else(factory);
        if !client.is_connected() {
            client.connect().await.map_err(PoolError::Imap)?;
        }

        Ok(PooledImapClient {
            client: Some(client),
            idle: self.idle.clone(),
            account_id,
            _global_permit: global_permit,
            _account_permit: account_permit,
        })
    }
}

/// A checked-out client. Dropping it returns the connection to the idle
/// list and releases both permits, unblocking the next FIFO waiter.
pub struct PooledImapClient {
    client: Option<IMAPClient>,
    idle: Arc<IdleMap>,
    account_id: AccountId,
    _global_permit: OwnedSemaphorePermit,
    _account_permit: OwnedSemaphorePermit,
}

impl PooledImapClient {
    pub fn get_mut(&mut self) -> Result<&mut IMAPClient, ImapProtocolError> {
        self.client.as_mut().ok_or(ImapProtocolError::OperationCancelled)
    }

    /// Drops the underlying connection instead of returning it to the idle
    /// list, for callers that know the session is unrecoverable (e.g. after
    /// a protocol error that left the stream in an undefined state).
    pub fn discard(mut self) {
        self.client = None;
    }
}

impl Drop for PooledImapClient {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            if client.is_connected() {
                let mut idle = self.idle.lock().unwrap();
                idle.entry(self.account_id.clone()).or_default().push_back(client);
            }
        }
    }
}
