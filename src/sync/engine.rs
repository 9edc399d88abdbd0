//! C9: `SyncEngine`, the public entry point for account/folder sync and
//! write-side reconciliation.
//!
//! Orchestrates every other sync-subsystem module against the collaborator
//! traits in `crate::repository`: `ConnectionPool` for connections,
//! `CredentialResolver` for auth, `ProviderRegistry` for provider-specific
//! behavior, `FolderSyncCoordinator` to serialize mutating passes per
//! folder. Generalizes the donor's `mail/imap/actor.rs` connect-then-dispatch
//! shape (there: one actor task per account reading off an mpsc command
//! channel) into plain async methods callable concurrently per account, with
//! Stage D's background catch-up spawned the same way the donor spawns its
//! actor task (`tokio::spawn` of a free function over owned/`Arc` state,
//! not a method on `&self`).

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use crate::config::{AccountConfig, Tunables};
use crate::credentials::{CredentialResolver, OAuth2TokenEndpoint};
use crate::domain::{AccountId, Credential, EmailFlags, EmailFolder, FolderId, FolderType, SendState};
use crate::error::SyncError;
use crate::imap::{ConnectionPool, CredentialTemplate, IMAPClient, PooledImapClient};
use crate::repository::{AccountRepository, EmailRepository, MIMEEncoder, ProviderRegistry};
use crate::smtp::{OutgoingMessage, SMTPClient};

use super::coordinator::FolderSyncCoordinator;
use super::initial_fast::{
    run_catch_up_loop, stage_a_list_folders, stage_b_inbox_fast, stage_c_budget_allocate, CatchUpHandle,
};
use super::message_sync::{sync_folder_messages, MessageSyncMode, MessageSyncOutcome};
use super::reconcile::{apply_flag_change, archive_messages, move_messages, FlagChange};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountSyncMode {
    Full,
    InitialFast,
    Incremental,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FolderSyncMode {
    Incremental,
    CatchUp,
}

/// Compiled-in OAuth2 token endpoints for the providers the static registry
/// recognizes. Not part of `ProviderConfig` itself: the token URL is a
/// detail of the refresh flow, not of how a client connects, so it lives
/// next to `CredentialResolver`'s consumer instead.
pub(crate) fn oauth_endpoint_for_tag(tag: &str) -> Option<OAuth2TokenEndpoint> {
    match tag {
        "gmail" => Some(OAuth2TokenEndpoint { token_url: "https://oauth2.googleapis.com/token".to_string(), client_secret: None }),
        "outlook" => {
            Some(OAuth2TokenEndpoint { token_url: "https://login.microsoftonline.com/common/oauth2/v2.0/token".to_string(), client_secret: None })
        }
        _ => None,
    }
}

pub struct SyncEngine {
    pool: Arc<ConnectionPool>,
    credentials: Arc<CredentialResolver>,
    provider_registry: Arc<dyn ProviderRegistry>,
    mime_encoder: Arc<dyn MIMEEncoder>,
    account_repo: Arc<dyn AccountRepository>,
    email_repo: Arc<dyn EmailRepository>,
    coordinator: Arc<FolderSyncCoordinator>,
    tunables: Tunables,
    catch_up_handles: StdMutex<HashMap<AccountId, CatchUpHandle>>,
}

impl SyncEngine {
    pub fn new(
        credentials: CredentialResolver,
        provider_registry: Arc<dyn ProviderRegistry>,
        mime_encoder: Arc<dyn MIMEEncoder>,
        account_repo: Arc<dyn AccountRepository>,
        email_repo: Arc<dyn EmailRepository>,
        tunables: Tunables,
    ) -> Self {
        Self {
            pool: Arc::new(ConnectionPool::new(tunables.global_connection_limit)),
            credentials: Arc::new(credentials),
            provider_registry,
            mime_encoder,
            account_repo,
            email_repo,
            coordinator: Arc::new(FolderSyncCoordinator::new()),
            tunables,
            catch_up_handles: StdMutex::new(HashMap::new()),
        }
    }

    async fn provider_for(provider_registry: &dyn ProviderRegistry, account: &AccountConfig) -> crate::domain::ProviderConfig {
        if let Some(tag) = &account.provider {
            if let Some(config) = provider_registry.lookup_by_tag(tag).await {
                return config;
            }
        }
        crate::domain::ProviderConfig::unknown_self_hosted(account.imap.host.clone(), account.smtp.host.clone())
    }

    async fn oauth_endpoint(account: &AccountConfig) -> Option<OAuth2TokenEndpoint> {
        match &account.auth {
            crate::config::AuthMethod::OAuth2 { provider, .. } => oauth_endpoint_for_tag(provider),
            crate::config::AuthMethod::Password => None,
        }
    }

    async fn checkout(
        pool: &ConnectionPool,
        credentials: &CredentialResolver,
        tunables: &Tunables,
        account: &AccountConfig,
    ) -> Result<PooledImapClient, SyncError> {
        let endpoint = Self::oauth_endpoint(account).await;
        let credential = credentials.resolve(account, endpoint.as_ref()).await?;
        let template = credential_template(account, &credential);
        let per_account_limit = account.connection_limit.unwrap_or(tunables.per_account_connection_limit);
        let connect_timeout = Duration::from_secs(tunables.connection_timeout_secs);
        let imap = account.imap.clone();

        let client = pool
            .checkout(AccountId::from(account.account_id.clone()), per_account_limit, move || {
                IMAPClient::new(imap.host, imap.port, imap.security, connect_timeout, connect_timeout, template)
            })
            .await?;
        Ok(client)
    }

    /// `sync_account(account_id, mode)`.
    pub async fn sync_account(&self, account: &AccountConfig, mode: AccountSyncMode) -> Result<(), SyncError> {
        let account_id = AccountId::from(account.account_id.clone());
        let provider = Self::provider_for(self.provider_registry.as_ref(), account).await;

        let mut pooled = Self::checkout(&self.pool, &self.credentials, &self.tunables, account).await?;
        let client = pooled.get_mut()?;

        let upserted = stage_a_list_folders(client, self.account_repo.as_ref(), &account_id, &provider).await?;

        match mode {
            AccountSyncMode::InitialFast => {
                let mut inbox = upserted
                    .iter()
                    .find(|(f, syncable)| f.folder_type == FolderType::Inbox && *syncable)
                    .map(|(f, _)| f.clone())
                    .ok_or_else(|| SyncError::Repository("account has no syncable Inbox".to_string()))?;

                let guard = self.coordinator.acquire(&account_id, &inbox.id).await;
                stage_b_inbox_fast(client, self.account_repo.as_ref(), self.email_repo.as_ref(), &account_id, &mut inbox, &self.tunables)
                    .await?;
                drop(guard);

                let mut sent = upserted.iter().find(|(f, syncable)| f.folder_type == FolderType::Sent && *syncable).map(|(f, _)| f.clone());
                let mut others: Vec<crate::domain::Folder> = upserted
                    .into_iter()
                    .filter(|(f, syncable)| *syncable && f.folder_type != FolderType::Inbox && f.folder_type != FolderType::Sent)
                    .map(|(f, _)| f)
                    .collect();

                stage_c_budget_allocate(
                    client,
                    self.account_repo.as_ref(),
                    self.email_repo.as_ref(),
                    &account_id,
                    &mut inbox,
                    sent.as_mut(),
                    &mut others,
                    &self.tunables,
                )
                .await?;

                drop(pooled);
                self.spawn_catch_up(account.clone());
            }
            AccountSyncMode::Full | AccountSyncMode::Incremental => {
                let syncable_mode = if mode == AccountSyncMode::Full { MessageSyncMode::Full } else { MessageSyncMode::Forward };
                for (mut folder, syncable) in upserted {
                    if !syncable {
                        continue;
                    }
                    let guard = self.coordinator.acquire(&account_id, &folder.id).await;
                    let want_bodies = folder.folder_type == FolderType::Inbox;
                    if let Err(error) = sync_folder_messages(
                        client,
                        self.account_repo.as_ref(),
                        self.email_repo.as_ref(),
                        &account_id,
                        &mut folder,
                        syncable_mode,
                        want_bodies,
                        self.tunables.fetch_batch_size,
                        None,
                    )
                    .await
                    {
                        tracing::warn!(folder = %folder.imap_path, %error, "account sync: folder failed, continuing");
                    }
                    drop(guard);
                }
            }
        }

        Ok(())
    }

    /// `sync_folder(account_id, folder_id, mode)`.
    pub async fn sync_folder(
        &self,
        account: &AccountConfig,
        folder_id: &FolderId,
        mode: FolderSyncMode,
    ) -> Result<MessageSyncOutcome, SyncError> {
        let account_id = AccountId::from(account.account_id.clone());
        let mut folder = self
            .account_repo
            .list_folders(&account_id)
            .await?
            .into_iter()
            .find(|f| &f.id == folder_id)
            .ok_or_else(|| SyncError::Repository(format!("folder {folder_id:?} not found")))?;

        let guard = self.coordinator.acquire(&account_id, folder_id).await;

        let mut pooled = Self::checkout(&self.pool, &self.credentials, &self.tunables, account).await?;
        let client = pooled.get_mut()?;

        let sync_mode = match mode {
            FolderSyncMode::Incremental => MessageSyncMode::Forward,
            FolderSyncMode::CatchUp => MessageSyncMode::Backward,
        };
        let max_uids = matches!(mode, FolderSyncMode::CatchUp).then_some(self.tunables.fetch_batch_size);
        let want_bodies = folder.folder_type == FolderType::Inbox && mode == FolderSyncMode::Incremental;

        let outcome = sync_folder_messages(
            client,
            self.account_repo.as_ref(),
            self.email_repo.as_ref(),
            &account_id,
            &mut folder,
            sync_mode,
            want_bodies,
            self.tunables.fetch_batch_size,
            max_uids,
        )
        .await;
        drop(guard);
        outcome
    }

    /// C10 entry point: starts an IDLE subscription for `folder_imap_path`
    /// on a dedicated connection, independent of the folders this engine is
    /// otherwise pulling. The caller drains `IdleSubscription::recv` and,
    /// on `NewMail`, calls `sync_folder(.., Incremental)` -- the data-flow
    /// coupling between C10 and C9 described in §2 -- while
    /// `FolderSyncCoordinator` keeps that re-sync from racing a concurrent
    /// foreground pass on the same folder.
    pub fn subscribe_idle(&self, account: &AccountConfig, folder_imap_path: String) -> crate::imap::IdleSubscription {
        crate::imap::subscribe_idle(self.pool.clone(), self.credentials.clone(), account.clone(), self.tunables.clone(), folder_imap_path)
    }

    pub fn pause_catch_up(&self, account_id: &AccountId) {
        if let Some(handle) = self.catch_up_handles.lock().unwrap().get(account_id) {
            handle.pause();
        }
    }

    pub fn resume_catch_up(&self, account_id: &AccountId) {
        if let Some(handle) = self.catch_up_handles.lock().unwrap().get(account_id) {
            handle.resume();
        }
    }

    /// Stage D handoff. Spawns a detached background task over owned
    /// `Arc` clones of the collaborators it needs, mirroring how the donor
    /// hands its IMAP actor task a freshly connected client plus cloned
    /// `Arc<Cache>` rather than a reference into the manager that spawned
    /// it (`mail/imap/actor.rs::spawn`).
    fn spawn_catch_up(&self, account: AccountConfig) {
        let account_id = AccountId::from(account.account_id.clone());
        let handle = CatchUpHandle::new();
        self.catch_up_handles.lock().unwrap().insert(account_id.clone(), handle.clone());

        let pool = self.pool.clone();
        let credentials = self.credentials.clone();
        let account_repo = self.account_repo.clone();
        let email_repo = self.email_repo.clone();
        let tunables = self.tunables.clone();
        let task_handle = handle.clone();

        tokio::spawn(async move {
            tracing::info!(account = %account.account_id, "stage D catch-up starting");
            let mut pooled = match Self::checkout(&pool, &credentials, &tunables, &account).await {
                Ok(pooled) => pooled,
                Err(error) => {
                    tracing::warn!(account = %account.account_id, %error, "catch-up: could not connect, aborting this pass");
                    return;
                }
            };
            let client = match pooled.get_mut() {
                Ok(client) => client,
                Err(_) => return,
            };
            run_catch_up_loop(client, account_repo.as_ref(), email_repo.as_ref(), &account, &task_handle, &tunables).await;
        });
    }

    // --- Write-side reconciliation (§4.9) ---

    pub async fn reconcile_flags(&self, account: &AccountConfig, change: &FlagChange<'_>) -> Result<(), SyncError> {
        let mut pooled = Self::checkout(&self.pool, &self.credentials, &self.tunables, account).await?;
        apply_flag_change(pooled.get_mut()?, change).await
    }

    pub async fn reconcile_move(
        &self,
        account: &AccountConfig,
        source_folder: &str,
        uids: &[u32],
        dest_folder: &str,
    ) -> Result<(), SyncError> {
        let mut pooled = Self::checkout(&self.pool, &self.credentials, &self.tunables, account).await?;
        move_messages(pooled.get_mut()?, source_folder, uids, dest_folder).await
    }

    pub async fn reconcile_archive(&self, account: &AccountConfig, uids: &[u32]) -> Result<(), SyncError> {
        let provider = Self::provider_for(self.provider_registry.as_ref(), account).await;
        let archive_path = self
            .account_repo
            .list_folders(&AccountId::from(account.account_id.clone()))
            .await?
            .into_iter()
            .find(|f| f.folder_type == FolderType::Archive)
            .map(|f| f.imap_path);

        let mut pooled = Self::checkout(&self.pool, &self.credentials, &self.tunables, account).await?;
        archive_messages(pooled.get_mut()?, provider.archive_behavior, uids, archive_path.as_deref()).await
    }

    /// Send path: resolve credentials once for both protocols, hand the
    /// message to `SMTPClient`, then on success mark it `Sent`, move its
    /// local `EmailFolder` membership from Drafts to Sent, and for
    /// `requires_sent_append` providers APPEND the raw MIME so the
    /// provider's own Sent copy exists (most non-Gmail IMAP servers do not
    /// create one automatically from a successful SMTP submission).
    pub async fn reconcile_send(
        &self,
        account: &AccountConfig,
        email: &mut crate::domain::Email,
        message: &OutgoingMessage,
        sent_folder_path: &str,
        draft_folder_id: &FolderId,
        sent_folder_id: &FolderId,
    ) -> Result<(), SyncError> {
        let provider = Self::provider_for(self.provider_registry.as_ref(), account).await;
        let endpoint = Self::oauth_endpoint(account).await;
        let (_, smtp_credential) = self.credentials.resolve_both(account, endpoint.as_ref()).await?;
        let smtp_template = credential_template(account, &smtp_credential);

        let smtp = SMTPClient::new(&account.smtp.host, account.smtp.port, account.smtp.security, &smtp_template)?;

        email.send_state = SendState::Sending;
        self.email_repo.upsert_email(email).await?;

        match smtp.send(message).await {
            Ok(()) => {
                email.send_state = SendState::Sent;
                self.email_repo.upsert_email(email).await?;
                self.email_repo.unlink_from_folder(&email.id, draft_folder_id).await?;
                self.email_repo
                    .link_to_folder(&EmailFolder { email_id: email.id.clone(), folder_id: sent_folder_id.clone(), imap_uid: 0 })
                    .await?;

                if provider.requires_sent_append {
                    let compose = crate::repository::MimeCompose {
                        from: &message.from,
                        to: &message.to,
                        cc: &message.cc,
                        bcc: &message.bcc,
                        subject: &message.subject,
                        plain_body: &message.plain_body,
                        html_body: message.html_body.as_deref(),
                    };
                    if let Ok(raw) = self.mime_encoder.encode(&compose) {
                        if let Ok(mut pooled) = Self::checkout(&self.pool, &self.credentials, &self.tunables, account).await {
                            if let Ok(client) = pooled.get_mut() {
                                let _ = client.append_message(sent_folder_path, EmailFlags::SEEN, &raw).await;
                            }
                        }
                    }
                }
                Ok(())
            }
            Err(error) => {
                email.retry_count += 1;
                email.send_state = send_state_after_failure(email.retry_count, self.tunables.max_send_retries);
                self.email_repo.upsert_email(email).await?;
                Err(SyncError::Smtp(error))
            }
        }
    }
}

/// §4.9 send reconciliation's post-failure transition: re-queue for another
/// attempt until `retry_count` reaches `max_send_retries`, then give up.
fn send_state_after_failure(retry_count: u32, max_send_retries: u32) -> SendState {
    if retry_count >= max_send_retries {
        SendState::Failed
    } else {
        SendState::Queued
    }
}

pub(crate) fn credential_template(account: &AccountConfig, credential: &Credential) -> CredentialTemplate {
    match credential {
        Credential::Password { username, bytes } => {
            CredentialTemplate::Password { username: username.clone(), password: String::from_utf8_lossy(bytes).into_owned() }
        }
        Credential::OAuthToken { access, .. } => CredentialTemplate::OAuth2 { username: account.email.clone(), access_token: access.clone() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_account() -> AccountConfig {
        AccountConfig {
            account_id: "a".into(),
            email: "me@example.com".into(),
            display_name: None,
            provider: Some("gmail".into()),
            imap: crate::config::ImapEndpoint { host: "h".into(), port: 993, security: crate::config::ConnectionSecurity::Tls },
            smtp: crate::config::SmtpEndpoint { host: "h".into(), port: 587, security: crate::config::ConnectionSecurity::Starttls },
            auth: crate::config::AuthMethod::Password,
            sync_window_days: 30,
            active: true,
            connection_limit: None,
            idle_refresh_secs: None,
        }
    }

    #[test]
    fn credential_template_maps_password_variant() {
        let account = sample_account();
        let credential = Credential::Password { username: "me@example.com".into(), bytes: b"hunter2".to_vec() };
        match credential_template(&account, &credential) {
            CredentialTemplate::Password { username, password } => {
                assert_eq!(username, "me@example.com");
                assert_eq!(password, "hunter2");
            }
            _ => panic!("expected password template"),
        }
    }

    #[test]
    fn credential_template_maps_oauth_variant() {
        let account = sample_account();
        let credential =
            Credential::OAuthToken { access: "tok".into(), refresh: None, expires_at: chrono::Utc::now(), scope: None };
        match credential_template(&account, &credential) {
            CredentialTemplate::OAuth2 { username, access_token } => {
                assert_eq!(username, "me@example.com");
                assert_eq!(access_token, "tok");
            }
            _ => panic!("expected oauth2 template"),
        }
    }

    #[test]
    fn known_provider_tags_resolve_an_oauth_endpoint() {
        assert!(oauth_endpoint_for_tag("gmail").is_some());
        assert!(oauth_endpoint_for_tag("outlook").is_some());
        assert!(oauth_endpoint_for_tag("yahoo").is_none());
    }

    /// Scenario 8: three `ConnectionFailed`s in a row against
    /// `max_send_retries = 3` re-queue twice then fail on the third,
    /// ending at `retry_count = 3`.
    #[test]
    fn send_state_after_failure_requeues_until_max_then_fails() {
        let max = 3;
        let mut retry_count = 0;
        for expected in [SendState::Queued, SendState::Queued, SendState::Failed] {
            retry_count += 1;
            assert_eq!(send_state_after_failure(retry_count, max), expected);
        }
        assert_eq!(retry_count, 3);
    }
}
