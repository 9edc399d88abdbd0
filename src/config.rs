//! Account configuration and the tunables table from the external-interfaces
//! section of the core's design. Loaded from TOML with [`Default`] filling in
//! anything a partial document omits.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How an account authenticates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method")]
pub enum AuthMethod {
    Password,
    OAuth2 { provider: String, client_id: String },
}

/// Transport security mode for a single endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionSecurity {
    /// Implicit TLS from the first byte (IMAPS/993, SMTPS/465).
    Tls,
    /// Plaintext connect, upgraded in place via STARTTLS.
    Starttls,
    /// No transport security. Compiled out of release builds; only used by
    /// in-process test servers.
    #[cfg(any(test, debug_assertions))]
    Plain,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImapEndpoint {
    pub host: String,
    pub port: u16,
    pub security: ConnectionSecurity,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpEndpoint {
    pub host: String,
    pub port: u16,
    pub security: ConnectionSecurity,
}

/// Archive behavior, provider-dependent. See `ProviderConfig`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ArchiveBehavior {
    LabelRemoveInbox,
    CopyToArchive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub account_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub provider: Option<String>,
    pub imap: ImapEndpoint,
    pub smtp: SmtpEndpoint,
    pub auth: AuthMethod,
    /// How many days of history this account wants synced in non-initial
    /// "Full" passes; `0` means "no bound" (rely on UID cursors only).
    pub sync_window_days: u32,
    pub active: bool,
    /// Per-account override of `Tunables::per_account_connection_limit`.
    pub connection_limit: Option<usize>,
    pub idle_refresh_secs: Option<u64>,
}

impl AccountConfig {
    pub fn display_name_or_email(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.email)
    }
}

/// Every tunable named in the external-interfaces tunables table, with the
/// documented defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Tunables {
    pub per_account_connection_limit: usize,
    pub global_connection_limit: usize,
    pub connection_timeout_secs: u64,
    pub idle_refresh_secs: u64,
    pub fetch_batch_size: usize,
    pub initial_fast_inbox_cap: usize,
    pub stage_c_total_cap: usize,
    pub stage_c_inbox_backward_pct: u8,
    pub stage_c_sent_forward_pct: u8,
    pub stage_c_other_folders_pct: u8,
    pub stage_c_other_folder_floor: usize,
    pub max_send_retries: u32,
    pub oauth_refresh_retries: u32,
    pub oauth_refresh_backoff_base_secs: u64,
    pub oauth_refresh_backoff_factor: u32,
    pub connect_retry_count: u32,
    pub connect_retry_backoff_base_secs: u64,
    pub connect_retry_backoff_factor: u32,
    pub discovery_tier_timeout_secs: u64,
    pub discovery_overall_budget_secs: u64,
    pub discovery_probe_timeout_secs: u64,
    pub discovery_cache_ttl_days: u64,
    pub discovery_cache_max_entries: usize,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            per_account_connection_limit: 5,
            global_connection_limit: 25,
            connection_timeout_secs: 30,
            idle_refresh_secs: 25 * 60,
            fetch_batch_size: 50,
            initial_fast_inbox_cap: 30,
            stage_c_total_cap: 500,
            stage_c_inbox_backward_pct: 60,
            stage_c_sent_forward_pct: 20,
            stage_c_other_folders_pct: 20,
            stage_c_other_folder_floor: 20,
            max_send_retries: 3,
            oauth_refresh_retries: 3,
            oauth_refresh_backoff_base_secs: 2,
            oauth_refresh_backoff_factor: 2,
            connect_retry_count: 3,
            connect_retry_backoff_base_secs: 5,
            connect_retry_backoff_factor: 3,
            discovery_tier_timeout_secs: 10,
            discovery_overall_budget_secs: 30,
            discovery_probe_timeout_secs: 5,
            discovery_cache_ttl_days: 30,
            discovery_cache_max_entries: 100,
        }
    }
}

impl Tunables {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }

    pub fn idle_refresh(&self) -> Duration {
        Duration::from_secs(self.idle_refresh_secs)
    }

    pub fn idle_read_deadline(&self) -> Duration {
        self.idle_refresh() + Duration::from_secs(60)
    }

    pub fn stage_c_inbox_backward_cap(&self) -> usize {
        self.stage_c_total_cap * self.stage_c_inbox_backward_pct as usize / 100
    }

    pub fn stage_c_sent_forward_cap(&self) -> usize {
        self.stage_c_total_cap * self.stage_c_sent_forward_pct as usize / 100
    }

    pub fn stage_c_other_folders_cap(&self) -> usize {
        self.stage_c_total_cap * self.stage_c_other_folders_pct as usize / 100
    }
}

/// Top-level configuration document. A partial TOML document overlays onto
/// [`Default`] field by field rather than requiring every key.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CoreConfig {
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub tunables: Tunables,
}

impl CoreConfig {
    pub fn load_from_str(toml_str: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(toml_str)?)
    }

    pub fn account_by_id(&self, account_id: &str) -> Option<&AccountConfig> {
        self.accounts.iter().find(|a| a.account_id == account_id)
    }

    pub fn connection_limit_for(&self, account: &AccountConfig) -> usize {
        account
            .connection_limit
            .unwrap_or(self.tunables.per_account_connection_limit)
    }

    pub fn idle_refresh_for(&self, account: &AccountConfig) -> Duration {
        Duration::from_secs(account.idle_refresh_secs.unwrap_or(self.tunables.idle_refresh_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_table() {
        let t = Tunables::default();
        assert_eq!(t.per_account_connection_limit, 5);
        assert_eq!(t.global_connection_limit, 25);
        assert_eq!(t.fetch_batch_size, 50);
        assert_eq!(t.initial_fast_inbox_cap, 30);
        assert_eq!(t.stage_c_total_cap, 500);
        assert_eq!(t.stage_c_other_folder_floor, 20);
        assert_eq!(t.discovery_cache_ttl_days, 30);
        assert_eq!(t.discovery_cache_max_entries, 100);
    }

    #[test]
    fn stage_c_split_sums_to_total() {
        let t = Tunables::default();
        assert_eq!(
            t.stage_c_inbox_backward_cap() + t.stage_c_sent_forward_cap() + t.stage_c_other_folders_cap(),
            t.stage_c_total_cap
        );
        assert_eq!(t.stage_c_inbox_backward_cap(), 300);
        assert_eq!(t.stage_c_sent_forward_cap(), 100);
        assert_eq!(t.stage_c_other_folders_cap(), 100);
    }

    #[test]
    fn partial_toml_overlays_onto_defaults() {
        let doc = r#"
            accounts = []

            [tunables]
            global_connection_limit = 10
        "#;
        let cfg = CoreConfig::load_from_str(doc).unwrap();
        assert_eq!(cfg.tunables.global_connection_limit, 10);
        assert_eq!(cfg.tunables.per_account_connection_limit, 5);
    }
}
