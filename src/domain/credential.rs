use chrono::{DateTime, Utc};

/// A ready-to-use credential. Stored only in OS-level secret storage; never
/// persisted to the general durable store.
#[derive(Clone)]
pub enum Credential {
    OAuthToken {
        access: String,
        refresh: Option<String>,
        expires_at: DateTime<Utc>,
        scope: Option<String>,
    },
    Password {
        username: String,
        bytes: Vec<u8>,
    },
}

impl Credential {
    pub fn is_oauth(&self) -> bool {
        matches!(self, Credential::OAuthToken { .. })
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self {
            Credential::OAuthToken { expires_at, .. } => now >= *expires_at,
            Credential::Password { .. } => false,
        }
    }

    /// Expired or within this window of expiring. Used to decide whether to
    /// proactively refresh before a session attempts to authenticate.
    pub fn needs_refresh(&self, now: DateTime<Utc>, window: chrono::Duration) -> bool {
        match self {
            Credential::OAuthToken { expires_at, .. } => now + window >= *expires_at,
            Credential::Password { .. } => false,
        }
    }
}

// Never derive Debug over the secret payload directly; redact it.
impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::OAuthToken { expires_at, scope, .. } => f
                .debug_struct("Credential::OAuthToken")
                .field("access", &"<redacted>")
                .field("refresh", &"<redacted>")
                .field("expires_at", expires_at)
                .field("scope", scope)
                .finish(),
            Credential::Password { username, .. } => f
                .debug_struct("Credential::Password")
                .field("username", username)
                .field("bytes", &"<redacted>")
                .finish(),
        }
    }
}
