//! C10: `IDLEMonitor` -- issues IMAP IDLE against an already-selected folder,
//! waking on either server-pushed activity or a refresh deadline.
//!
//! Grounded on the donor's `mail/imap/monitor.rs::folder_monitor_loop`: same
//! `session.idle()` / `idle.init()` / `idle.wait()` / `idle.done()` dance
//! wrapped in `tokio::select!` against a timeout, generalized to take an
//! external shutdown signal (donor used a dedicated per-monitor mpsc
//! channel; here a `CancellationToken` so one monitor loop can serve any
//! number of folders sequentially under `FolderSyncCoordinator`'s
//! direction rather than needing one spawned task per folder).

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::{AccountConfig, AuthMethod, Tunables};
use crate::credentials::CredentialResolver;
use crate::domain::AccountId;
use crate::error::ImapProtocolError;
use crate::sync::engine::{credential_template, oauth_endpoint_for_tag};

use super::client::IMAPClient;
use super::pool::ConnectionPool;
use super::session::ImapSessionState;

#[derive(Debug)]
pub enum IdleEvent {
    /// Server pushed EXISTS/EXPUNGE/FETCH during the IDLE window; caller
    /// should re-sync the folder.
    Activity,
    /// No server activity before `idle_deadline` elapsed; IDLE was
    /// refreshed. Caller may choose to re-sync anyway as a safety net.
    Refreshed,
    /// Shutdown signal fired while idling.
    Cancelled,
}

pub struct IDLEMonitor {
    imap_path: String,
    idle_deadline: Duration,
}

impl IDLEMonitor {
    pub fn new(imap_path: String, idle_deadline: Duration) -> Self {
        Self { imap_path, idle_deadline }
    }

    /// Runs one IDLE cycle against `client`, which must already have
    /// `imap_path` selected. Re-selects if the session drifted to a
    /// different folder (e.g. after a prior FETCH-driven SELECT elsewhere).
    pub async fn run_once(
        &self,
        client: &mut IMAPClient,
        shutdown: &CancellationToken,
    ) -> Result<IdleEvent, ImapProtocolError> {
        if client.current_folder() != Some(self.imap_path.as_str()) {
            client.select_folder(&self.imap_path).await?;
        }

        let mut session = client.take_session()?;
        let inner = session.take_inner().ok_or(ImapProtocolError::OperationCancelled)?;
        let mut idle_handle = inner.idle();
        idle_handle.init().await.map_err(|e| ImapProtocolError::CommandFailed(e.to_string()))?;

        let (idle_future, _stop) = idle_handle.wait();

        let outcome = tokio::select! {
            result = tokio::time::timeout(self.idle_deadline, idle_future) => {
                match result {
                    Ok(Ok(_)) => Ok(IdleEvent::Activity),
                    Ok(Err(e)) => Err(ImapProtocolError::CommandFailed(e.to_string())),
                    Err(_) => Ok(IdleEvent::Refreshed),
                }
            }
            _ = shutdown.cancelled() => Ok(IdleEvent::Cancelled),
        };

        match idle_handle.done().await {
            Ok(restored) => {
                session.restore(restored);
                session.set_state(ImapSessionState::Idle(self.imap_path.clone()));
                client.restore_session(session);
            }
            Err(e) => {
                return Err(ImapProtocolError::CommandFailed(e.to_string()));
            }
        }

        outcome
    }
}

/// Events a subscription emits, per §4.10's "lazy event sequence of
/// `{NewMail, Disconnected}` per (account, folder)".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdleMonitorEvent {
    NewMail,
    Disconnected,
}

/// A running (account, folder) IDLE subscription: a background task
/// holding a dedicated checked-out connection, an event channel the caller
/// drains, and a cancellation handle to stop it gracefully.
pub struct IdleSubscription {
    events: mpsc::Receiver<IdleMonitorEvent>,
    shutdown: CancellationToken,
    task: JoinHandle<()>,
}

impl IdleSubscription {
    /// Waits for the next event. Returns `None` once the subscription task
    /// has exited (after emitting `Disconnected`, or silently after a
    /// graceful `shutdown()`).
    pub async fn recv(&mut self) -> Option<IdleMonitorEvent> {
        self.events.recv().await
    }

    /// Requests a graceful stop. Per §4.10 this does NOT itself produce a
    /// `Disconnected` event -- the subscription task simply exits.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Awaits the background task's exit, e.g. after `shutdown()`.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// C10 full lifecycle, §4.10 steps 1-4: resolve the account's credential
/// (refreshing OAuth2 if the resolver judges it necessary), check out a
/// dedicated connection from `pool` under the account's own
/// `idle_refresh_interval`, `SELECT` the folder, then cycle
/// `IDLEMonitor::run_once` -- emitting `NewMail` on each activity wakeup --
/// until cancelled or a read error ends the loop. On any exit the
/// connection is checked back in via `PooledImapClient`'s `Drop`, matching
/// the donor's `spawn_folder_monitor`/`folder_monitor_loop` split between a
/// spawn wrapper and the loop it drives.
pub fn subscribe(pool: Arc<ConnectionPool>, credentials: Arc<CredentialResolver>, account: AccountConfig, tunables: Tunables, folder_imap_path: String) -> IdleSubscription {
    let (tx, rx) = mpsc::channel(8);
    let shutdown = CancellationToken::new();
    let task_shutdown = shutdown.clone();

    let task = tokio::spawn(run_subscription(pool, credentials, account, tunables, folder_imap_path, tx, task_shutdown));

    IdleSubscription { events: rx, shutdown, task }
}

async fn run_subscription(
    pool: Arc<ConnectionPool>,
    credentials: Arc<CredentialResolver>,
    account: AccountConfig,
    tunables: Tunables,
    folder_imap_path: String,
    events: mpsc::Sender<IdleMonitorEvent>,
    shutdown: CancellationToken,
) {
    let endpoint = match &account.auth {
        AuthMethod::OAuth2 { provider, .. } => oauth_endpoint_for_tag(provider),
        AuthMethod::Password => None,
    };

    let credential = match credentials.resolve(&account, endpoint.as_ref()).await {
        Ok(credential) => credential,
        Err(error) => {
            tracing::warn!(account = %account.account_id, %error, "idle monitor: credential resolution failed");
            let _ = events.send(IdleMonitorEvent::Disconnected).await;
            return;
        }
    };
    let template = credential_template(&account, &credential);
    let per_account_limit = account.connection_limit.unwrap_or(tunables.per_account_connection_limit);
    let connect_timeout = Duration::from_secs(tunables.connection_timeout_secs);
    let idle_deadline = Duration::from_secs(account.idle_refresh_secs.unwrap_or(tunables.idle_refresh_secs)) + Duration::from_secs(60);
    let imap = account.imap.clone();
    let account_id = AccountId::from(account.account_id.clone());

    let mut pooled = match pool
        .checkout(account_id, per_account_limit, move || {
            IMAPClient::new(imap.host, imap.port, imap.security, connect_timeout, connect_timeout, template)
        })
        .await
    {
        Ok(pooled) => pooled,
        Err(error) => {
            tracing::warn!(account = %account.account_id, %error, "idle monitor: could not check out a connection");
            let _ = events.send(IdleMonitorEvent::Disconnected).await;
            return;
        }
    };

    let client = match pooled.get_mut() {
        Ok(client) => client,
        Err(error) => {
            tracing::warn!(account = %account.account_id, %error, "idle monitor: checked-out client already gone");
            let _ = events.send(IdleMonitorEvent::Disconnected).await;
            return;
        }
    };

    if let Err(error) = client.select_folder(&folder_imap_path).await {
        tracing::warn!(folder = %folder_imap_path, %error, "idle monitor: SELECT failed");
        let _ = events.send(IdleMonitorEvent::Disconnected).await;
        return;
    }

    let monitor = IDLEMonitor::new(folder_imap_path.clone(), idle_deadline);

    loop {
        match monitor.run_once(client, &shutdown).await {
            Ok(IdleEvent::Activity) => {
                if events.send(IdleMonitorEvent::NewMail).await.is_err() {
                    return;
                }
            }
            Ok(IdleEvent::Refreshed) => continue,
            Ok(IdleEvent::Cancelled) => return,
            Err(error) => {
                tracing::warn!(folder = %folder_imap_path, %error, "idle monitor: read error, ending subscription");
                let _ = events.send(IdleMonitorEvent::Disconnected).await;
                return;
            }
        }
    }
}
