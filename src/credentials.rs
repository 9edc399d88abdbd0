//! C6: `CredentialResolver`. Password credentials pass straight through the
//! keychain; OAuth2 credentials are proactively refreshed (within a 5-minute
//! expiry window) using the §6 backoff policy before being handed to an
//! `IMAPSession`/`SMTPClient`.
//!
//! Grounded on the donor's `oauth2.rs::refresh_access_token` (only the
//! refresh-token-grant POST; the browser/PKCE authorization-code flow in the
//! rest of that file is out of scope here -- onboarding a new account is not
//! part of the sync core) and `account/manager.rs::get_credentials`'s
//! keychain-first lookup, generalized from donor's single hardcoded
//! "bltz" keyring service name to a `KeychainManager` trait object so the
//! core doesn't hardcode a specific credential store.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{AccountConfig, AuthMethod};
use crate::domain::Credential;
use crate::error::CredentialError;
use crate::repository::KeychainManager;
use crate::retry::{with_retry, RetryConfig};

const KEYCHAIN_SERVICE: &str = "mailsync-core";
/// Proactively refresh OAuth2 tokens this far ahead of expiry, so a session
/// about to authenticate never races a token that's seconds from expiring.
const REFRESH_WINDOW: ChronoDuration = ChronoDuration::minutes(5);

/// Token endpoint for a single OAuth2 provider. Looked up by provider tag
/// from the static registry alongside `ProviderConfig`, not stored per-account.
#[derive(Debug, Clone)]
pub struct OAuth2TokenEndpoint {
    pub token_url: String,
    pub client_secret: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredOAuthToken {
    access: String,
    refresh: Option<String>,
    expires_at: DateTime<Utc>,
    scope: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenRefreshResponse {
    access_token: String,
    expires_in: Option<i64>,
    refresh_token: Option<String>,
    scope: Option<String>,
}

pub struct CredentialResolver {
    keychain: Arc<dyn KeychainManager>,
    http: reqwest::Client,
    refresh_policy: RetryConfig,
}

impl CredentialResolver {
    pub fn new(keychain: Arc<dyn KeychainManager>) -> Self {
        Self { keychain, http: reqwest::Client::new(), refresh_policy: RetryConfig::oauth_refresh_default() }
    }

    /// Resolves the single shared credential for an account. IMAP and SMTP
    /// use the same token/password, so the sync engine's connect path for
    /// both protocols calls this once per account and clones the result
    /// rather than hitting the keychain/refresh twice.
    pub async fn resolve(
        &self,
        account: &AccountConfig,
        endpoint: Option<&OAuth2TokenEndpoint>,
    ) -> Result<Credential, CredentialError> {
        match &account.auth {
            AuthMethod::Password => {
                let password = self
                    .keychain
                    .get_secret(KEYCHAIN_SERVICE, &password_key(&account.account_id))
                    .await?
                    .ok_or(CredentialError::NoCredentials)?;
                Ok(Credential::Password { username: account.email.clone(), bytes: password.into_bytes() })
            }
            AuthMethod::OAuth2 { client_id, .. } => {
                let key = oauth_key(&account.account_id);
                let raw = self.keychain.get_secret(KEYCHAIN_SERVICE, &key).await?.ok_or(CredentialError::NoCredentials)?;
                let stored: StoredOAuthToken =
                    serde_json::from_str(&raw).map_err(|e| CredentialError::Keychain(e.to_string()))?;

                let now = Utc::now();
                if now + REFRESH_WINDOW < stored.expires_at {
                    return Ok(Credential::OAuthToken {
                        access: stored.access,
                        refresh: stored.refresh,
                        expires_at: stored.expires_at,
                        scope: stored.scope,
                    });
                }

                let not_yet_expired = now < stored.expires_at;
                let refresh_token = match stored.refresh.clone() {
                    Some(token) => token,
                    None if not_yet_expired => {
                        return Ok(Credential::OAuthToken {
                            access: stored.access,
                            refresh: stored.refresh,
                            expires_at: stored.expires_at,
                            scope: stored.scope,
                        });
                    }
                    None => return Err(CredentialError::TokenExpired),
                };
                let endpoint = match endpoint {
                    Some(endpoint) => endpoint,
                    None if not_yet_expired => {
                        return Ok(Credential::OAuthToken {
                            access: stored.access,
                            refresh: stored.refresh,
                            expires_at: stored.expires_at,
                            scope: stored.scope,
                        });
                    }
                    None => {
                        return Err(CredentialError::TokenRefreshFailed("no token endpoint configured for provider".to_string()))
                    }
                };

                // Inside the refresh window but not yet expired: a failed
                // refresh attempt still leaves a usable token, so fall back
                // to it instead of surfacing the failure. Past actual
                // expiry there is nothing to fall back to.
                let refreshed = match self.refresh(endpoint, client_id, &refresh_token).await {
                    Ok(refreshed) => refreshed,
                    Err(error) if not_yet_expired => {
                        tracing::warn!(%error, "oauth2 refresh failed inside refresh window; falling back to existing token");
                        return Ok(Credential::OAuthToken {
                            access: stored.access,
                            refresh: stored.refresh,
                            expires_at: stored.expires_at,
                            scope: stored.scope,
                        });
                    }
                    Err(_) => return Err(CredentialError::TokenRefreshFailed("token refresh failed after expiry".to_string())),
                };

                let updated = StoredOAuthToken {
                    access: refreshed.access_token.clone(),
                    refresh: refreshed.refresh_token.clone().or(Some(refresh_token)),
                    expires_at: now + ChronoDuration::seconds(refreshed.expires_in.unwrap_or(3600)),
                    scope: refreshed.scope.clone(),
                };
                let serialized = serde_json::to_string(&updated).map_err(|e| CredentialError::Keychain(e.to_string()))?;
                self.keychain.set_secret(KEYCHAIN_SERVICE, &key, &serialized).await?;

                Ok(Credential::OAuthToken {
                    access: updated.access,
                    refresh: updated.refresh,
                    expires_at: updated.expires_at,
                    scope: updated.scope,
                })
            }
        }
    }

    /// Resolves once and clones the result for both protocols, so a
    /// connect path that needs both an `IMAPClient` and an `SMTPClient`
    /// (send-then-append) never refreshes the same OAuth token twice.
    pub async fn resolve_both(
        &self,
        account: &AccountConfig,
        endpoint: Option<&OAuth2TokenEndpoint>,
    ) -> Result<(Credential, Credential), CredentialError> {
        let credential = self.resolve(account, endpoint).await?;
        Ok((credential.clone(), credential))
    }

    async fn refresh(
        &self,
        endpoint: &OAuth2TokenEndpoint,
        client_id: &str,
        refresh_token: &str,
    ) -> Result<TokenRefreshResponse, CredentialError> {
        with_retry(
            &self.refresh_policy,
            |e: &CredentialError| !matches!(e, CredentialError::TokenExpired),
            || async {
                let mut form = vec![
                    ("client_id", client_id),
                    ("refresh_token", refresh_token),
                    ("grant_type", "refresh_token"),
                ];
                if let Some(secret) = &endpoint.client_secret {
                    form.push(("client_secret", secret.as_str()));
                }

                let response = self
                    .http
                    .post(&endpoint.token_url)
                    .form(&form)
                    .send()
                    .await
                    .map_err(|e| CredentialError::TokenRefreshFailed(e.to_string()))?;

                if !response.status().is_success() {
                    return Err(CredentialError::TokenRefreshFailed(format!(
                        "token endpoint returned {}",
                        response.status()
                    )));
                }

                response.json().await.map_err(|e| CredentialError::TokenRefreshFailed(e.to_string()))
            },
        )
        .await
    }
}

fn password_key(account_id: &str) -> String {
    format!("{account_id}:password")
}

fn oauth_key(account_id: &str) -> String {
    format!("{account_id}:oauth2")
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct FakeKeychain {
        store: StdMutex<std::collections::HashMap<String, String>>,
    }

    impl FakeKeychain {
        fn with(entries: &[(&str, &str)]) -> Self {
            let mut store = std::collections::HashMap::new();
            for (k, v) in entries {
                store.insert(k.to_string(), v.to_string());
            }
            Self { store: StdMutex::new(store) }
        }
    }

    #[async_trait]
    impl KeychainManager for FakeKeychain {
        async fn get_secret(&self, _service: &str, key: &str) -> Result<Option<String>, CredentialError> {
            Ok(self.store.lock().unwrap().get(key).cloned())
        }
        async fn set_secret(&self, _service: &str, key: &str, value: &str) -> Result<(), CredentialError> {
            self.store.lock().unwrap().insert(key.to_string(), value.to_string());
            Ok(())
        }
        async fn delete_secret(&self, _service: &str, key: &str) -> Result<(), CredentialError> {
            self.store.lock().unwrap().remove(key);
            Ok(())
        }
    }

    fn password_account() -> AccountConfig {
        AccountConfig {
            account_id: "acct-1".into(),
            email: "me@example.com".into(),
            display_name: None,
            provider: None,
            imap: crate::config::ImapEndpoint { host: "imap.example.com".into(), port: 993, security: crate::config::ConnectionSecurity::Tls },
            smtp: crate::config::SmtpEndpoint { host: "smtp.example.com".into(), port: 587, security: crate::config::ConnectionSecurity::Starttls },
            auth: AuthMethod::Password,
            sync_window_days: 30,
            active: true,
            connection_limit: None,
            idle_refresh_secs: None,
        }
    }

    #[tokio::test]
    async fn resolves_password_credential_from_keychain() {
        let keychain = Arc::new(FakeKeychain::with(&[("acct-1:password", "hunter2")]));
        let resolver = CredentialResolver::new(keychain);
        let credential = resolver.resolve(&password_account(), None).await.unwrap();
        match credential {
            Credential::Password { username, bytes } => {
                assert_eq!(username, "me@example.com");
                assert_eq!(bytes, b"hunter2");
            }
            _ => panic!("expected password credential"),
        }
    }

    #[tokio::test]
    async fn missing_password_is_no_credentials() {
        let keychain = Arc::new(FakeKeychain::with(&[]));
        let resolver = CredentialResolver::new(keychain);
        let result = resolver.resolve(&password_account(), None).await;
        assert!(matches!(result, Err(CredentialError::NoCredentials)));
    }

    #[tokio::test]
    async fn unexpired_oauth_token_is_returned_without_refresh() {
        let stored = StoredOAuthToken {
            access: "tok".into(),
            refresh: Some("rtok".into()),
            expires_at: Utc::now() + ChronoDuration::hours(1),
            scope: None,
        };
        let keychain = Arc::new(FakeKeychain::with(&[(
            "acct-1:oauth2",
            &serde_json::to_string(&stored).unwrap(),
        )]));
        let resolver = CredentialResolver::new(keychain);
        let mut account = password_account();
        account.auth = AuthMethod::OAuth2 { provider: "google".into(), client_id: "cid".into() };
        let credential = resolver.resolve(&account, None).await.unwrap();
        match credential {
            Credential::OAuthToken { access, .. } => assert_eq!(access, "tok"),
            _ => panic!("expected oauth credential"),
        }
    }

    #[tokio::test]
    async fn near_expiry_token_falls_back_to_existing_when_no_endpoint_configured() {
        // Inside the 5-minute refresh window but not yet actually expired:
        // a refresh that can't even be attempted (no endpoint) must still
        // hand back the still-valid stored token rather than erroring.
        let stored = StoredOAuthToken {
            access: "tok".into(),
            refresh: Some("rtok".into()),
            expires_at: Utc::now() + ChronoDuration::seconds(30),
            scope: None,
        };
        let keychain = Arc::new(FakeKeychain::with(&[(
            "acct-1:oauth2",
            &serde_json::to_string(&stored).unwrap(),
        )]));
        let resolver = CredentialResolver::new(keychain);
        let mut account = password_account();
        account.auth = AuthMethod::OAuth2 { provider: "google".into(), client_id: "cid".into() };
        let credential = resolver.resolve(&account, None).await.unwrap();
        match credential {
            Credential::OAuthToken { access, .. } => assert_eq!(access, "tok"),
            _ => panic!("expected fallback to the existing oauth credential"),
        }
    }

    #[tokio::test]
    async fn expired_token_with_no_endpoint_is_token_refresh_failed() {
        let stored = StoredOAuthToken {
            access: "tok".into(),
            refresh: Some("rtok".into()),
            expires_at: Utc::now() - ChronoDuration::seconds(30),
            scope: None,
        };
        let keychain = Arc::new(FakeKeychain::with(&[(
            "acct-1:oauth2",
            &serde_json::to_string(&stored).unwrap(),
        )]));
        let resolver = CredentialResolver::new(keychain);
        let mut account = password_account();
        account.auth = AuthMethod::OAuth2 { provider: "google".into(), client_id: "cid".into() };
        let result = resolver.resolve(&account, None).await;
        assert!(matches!(result, Err(CredentialError::TokenRefreshFailed(_))));
    }

    #[tokio::test]
    async fn expired_token_with_no_refresh_token_is_token_expired() {
        let stored = StoredOAuthToken {
            access: "tok".into(),
            refresh: None,
            expires_at: Utc::now() - ChronoDuration::seconds(30),
            scope: None,
        };
        let keychain = Arc::new(FakeKeychain::with(&[(
            "acct-1:oauth2",
            &serde_json::to_string(&stored).unwrap(),
        )]));
        let resolver = CredentialResolver::new(keychain);
        let mut account = password_account();
        account.auth = AuthMethod::OAuth2 { provider: "google".into(), client_id: "cid".into() };
        let result = resolver.resolve(&account, None).await;
        assert!(matches!(result, Err(CredentialError::TokenExpired)));
    }
}
