//! Static provider registry: compiled-in descriptors for the handful of
//! consumer providers the core recognizes outright, searched before any
//! network tier runs. No donor counterpart; shape follows
//! `ProviderConfig`'s own fields.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::config::{ArchiveBehavior, ConnectionSecurity};
use crate::domain::provider::ProviderAuthMethod;
use crate::domain::ProviderConfig;
use crate::repository::ProviderRegistry;

pub struct StaticProviderRegistry {
    by_tag: HashMap<&'static str, ProviderConfig>,
    domain_to_tag: HashMap<&'static str, &'static str>,
}

impl StaticProviderRegistry {
    pub fn with_builtins() -> Self {
        let mut by_tag = HashMap::new();
        by_tag.insert(
            "gmail",
            ProviderConfig {
                tag: "gmail".into(),
                imap_host: "imap.gmail.com".into(),
                imap_port: 993,
                imap_security: ConnectionSecurity::Tls,
                smtp_host: "smtp.gmail.com".into(),
                smtp_port: 587,
                smtp_security: ConnectionSecurity::Starttls,
                auth_method: ProviderAuthMethod::OAuth2,
                archive_behavior: ArchiveBehavior::LabelRemoveInbox,
                requires_sent_append: false,
                idle_refresh_secs: 25 * 60,
                max_connections: 5,
            },
        );
        by_tag.insert(
            "outlook",
            ProviderConfig {
                tag: "outlook".into(),
                imap_host: "outlook.office365.com".into(),
                imap_port: 993,
                imap_security: ConnectionSecurity::Tls,
                smtp_host: "smtp.office365.com".into(),
                smtp_port: 587,
                smtp_security: ConnectionSecurity::Starttls,
                auth_method: ProviderAuthMethod::OAuth2,
                archive_behavior: ArchiveBehavior::CopyToArchive,
                requires_sent_append: true,
                idle_refresh_secs: 25 * 60,
                max_connections: 5,
            },
        );
        by_tag.insert(
            "yahoo",
            ProviderConfig {
                tag: "yahoo".into(),
                imap_host: "imap.mail.yahoo.com".into(),
                imap_port: 993,
                imap_security: ConnectionSecurity::Tls,
                smtp_host: "smtp.mail.yahoo.com".into(),
                smtp_port: 587,
                smtp_security: ConnectionSecurity::Starttls,
                auth_method: ProviderAuthMethod::Plain,
                archive_behavior: ArchiveBehavior::CopyToArchive,
                requires_sent_append: true,
                idle_refresh_secs: 25 * 60,
                max_connections: 5,
            },
        );
        by_tag.insert(
            "icloud",
            ProviderConfig {
                tag: "icloud".into(),
                imap_host: "imap.mail.me.com".into(),
                imap_port: 993,
                imap_security: ConnectionSecurity::Tls,
                smtp_host: "smtp.mail.me.com".into(),
                smtp_port: 587,
                smtp_security: ConnectionSecurity::Starttls,
                auth_method: ProviderAuthMethod::Plain,
                archive_behavior: ArchiveBehavior::CopyToArchive,
                requires_sent_append: true,
                idle_refresh_secs: 25 * 60,
                max_connections: 3,
            },
        );

        let mut domain_to_tag = HashMap::new();
        domain_to_tag.insert("gmail.com", "gmail");
        domain_to_tag.insert("googlemail.com", "gmail");
        domain_to_tag.insert("outlook.com", "outlook");
        domain_to_tag.insert("hotmail.com", "outlook");
        domain_to_tag.insert("live.com", "outlook");
        domain_to_tag.insert("msn.com", "outlook");
        domain_to_tag.insert("yahoo.com", "yahoo");
        domain_to_tag.insert("ymail.com", "yahoo");
        domain_to_tag.insert("icloud.com", "icloud");
        domain_to_tag.insert("me.com", "icloud");

        Self { by_tag, domain_to_tag }
    }

    pub fn lookup_by_tag_sync(&self, tag: &str) -> Option<ProviderConfig> {
        self.by_tag.get(tag).cloned()
    }

    pub fn lookup_by_domain_sync(&self, domain: &str) -> Option<ProviderConfig> {
        self.domain_to_tag.get(domain).and_then(|tag| self.by_tag.get(tag)).cloned()
    }
}

#[async_trait]
impl ProviderRegistry for StaticProviderRegistry {
    async fn lookup_by_tag(&self, tag: &str) -> Option<ProviderConfig> {
        self.lookup_by_tag_sync(tag)
    }

    async fn lookup_by_domain(&self, domain: &str) -> Option<ProviderConfig> {
        self.lookup_by_domain_sync(domain)
    }
}
