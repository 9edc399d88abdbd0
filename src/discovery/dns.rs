//! Tier 3: DNS MX heuristic. Resolves the domain's MX records and maps
//! well-known mail-exchanger suffixes to the static registry; domains with
//! no recognized suffix fall back to the `imap.<domain>`/`smtp.<domain>`
//! convention the spec names explicitly.
//!
//! Grounded on `TexasFortress-AI-RustyMail`'s `autodiscovery.rs` use of
//! `hickory_resolver::TokioResolver` (that donor resolves SRV records for
//! RFC 6186; this tier resolves MX records instead, per this crate's spec).
//! Gated behind the `dns-discovery` feature per the open question in
//! SPEC_FULL.md: not every target platform has a usable resolver stub.

use hickory_resolver::TokioResolver;

use crate::config::{ArchiveBehavior, ConnectionSecurity};
use crate::domain::provider::ProviderAuthMethod;
use crate::domain::ProviderConfig;
use crate::error::DiscoveryError;

use super::registry::StaticProviderRegistry;

/// MX-exchanger suffix -> provider tag, per §4.7.
const WELL_KNOWN_SUFFIXES: &[(&str, &str)] = &[
    (".google.com", "gmail"),
    (".googlemail.com", "gmail"),
    (".outlook.com", "outlook"),
    (".microsoft.com", "outlook"),
    (".yahoodns.net", "yahoo"),
    (".icloud.com", "icloud"),
    (".me.com", "icloud"),
];

pub async fn lookup(domain: &str) -> Result<ProviderConfig, DiscoveryError> {
    let resolver = TokioResolver::builder_tokio()
        .map_err(|e| DiscoveryError::Dns(e.to_string()))?
        .build();

    let mx_lookup = resolver.mx_lookup(domain).await.map_err(|e| DiscoveryError::Dns(e.to_string()))?;

    let registry = StaticProviderRegistry::with_builtins();
    for record in mx_lookup.iter() {
        let exchange = record.exchange().to_string();
        if let Some(tag) = suffix_to_tag(&exchange) {
            if let Some(config) = registry.lookup_by_tag_sync(tag) {
                return Ok(config);
            }
        }
    }

    Ok(fallback_config(domain))
}

fn suffix_to_tag(exchange: &str) -> Option<&'static str> {
    let exchange = exchange.trim_end_matches('.').to_lowercase();
    WELL_KNOWN_SUFFIXES
        .iter()
        .find(|(suffix, _)| exchange.ends_with(suffix.as_ref() as &str))
        .map(|(_, tag)| *tag)
}

/// `imap.<domain>:993/TLS` + `smtp.<domain>:587/STARTTLS`, plain auth --
/// the spec's named fallback for MX-resolvable domains with no recognized
/// well-known exchanger.
fn fallback_config(domain: &str) -> ProviderConfig {
    ProviderConfig {
        tag: "mx-heuristic".to_string(),
        imap_host: format!("imap.{domain}"),
        imap_port: 993,
        imap_security: ConnectionSecurity::Tls,
        smtp_host: format!("smtp.{domain}"),
        smtp_port: 587,
        smtp_security: ConnectionSecurity::Starttls,
        auth_method: ProviderAuthMethod::Plain,
        archive_behavior: ArchiveBehavior::CopyToArchive,
        requires_sent_append: true,
        idle_refresh_secs: 25 * 60,
        max_connections: 5,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn google_mx_exchanger_maps_to_gmail_tag() {
        assert_eq!(suffix_to_tag("aspmx.l.google.com."), Some("gmail"));
    }

    #[test]
    fn yahoo_mx_exchanger_maps_to_yahoo_tag() {
        assert_eq!(suffix_to_tag("mta7.am0.yahoodns.net."), Some("yahoo"));
    }

    #[test]
    fn unrecognized_exchanger_has_no_tag() {
        assert_eq!(suffix_to_tag("mail.some-self-hosted-domain.example."), None);
    }

    #[test]
    fn fallback_uses_imap_smtp_subdomain_convention() {
        let config = fallback_config("example.com");
        assert_eq!(config.imap_host, "imap.example.com");
        assert_eq!(config.imap_port, 993);
        assert_eq!(config.imap_security, ConnectionSecurity::Tls);
        assert_eq!(config.smtp_host, "smtp.example.com");
        assert_eq!(config.smtp_security, ConnectionSecurity::Starttls);
    }
}
