//! Tier 2: Thunderbird/Mozilla ISPDB autoconfig lookup.
//!
//! Grounded on `TexasFortress-AI-RustyMail`'s
//! `dashboard/services/autodiscovery.rs::try_mozilla_autoconfig` /
//! `parse_mozilla_autoconfig` for the request shape and `quick-xml`'s serde
//! deserializer usage; narrowed to the single canonical
//! `autoconfig.thunderbird.net` URL the spec names instead of that donor's
//! multi-URL fallback chain (self-hosted `autoconfig.<domain>` discovery is
//! tier-3/DNS territory here, not folded into this tier).

use quick_xml::de::from_str;
use serde::Deserialize;

use crate::config::ConnectionSecurity;
use crate::domain::provider::ProviderAuthMethod;
use crate::domain::ProviderConfig;
use crate::error::DiscoveryError;

#[derive(Debug, Deserialize)]
struct ClientConfig {
    #[serde(rename = "emailProvider")]
    email_provider: EmailProvider,
}

#[derive(Debug, Deserialize)]
struct EmailProvider {
    #[serde(rename = "displayName", default)]
    #[allow(dead_code)]
    display_name: Option<String>,
    #[serde(rename = "incomingServer", default)]
    incoming_servers: Vec<ServerEntry>,
    #[serde(rename = "outgoingServer", default)]
    outgoing_servers: Vec<ServerEntry>,
}

#[derive(Debug, Deserialize)]
struct ServerEntry {
    #[serde(rename = "@type", default)]
    server_type: String,
    hostname: String,
    port: u16,
    #[serde(rename = "socketType")]
    socket_type: String,
    #[serde(default)]
    authentication: Option<String>,
}

/// Domain must be a plain DNS label sequence before it's spliced into the
/// ISPDB URL -- no scheme separators, whitespace, or path characters.
fn validate_domain(domain: &str) -> Result<(), DiscoveryError> {
    let valid = !domain.is_empty()
        && domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(DiscoveryError::InvalidDomain(domain.to_string()))
    }
}

pub async fn lookup(http: &reqwest::Client, domain: &str) -> Result<ProviderConfig, DiscoveryError> {
    validate_domain(domain)?;
    let url = format!("https://autoconfig.thunderbird.net/v1.1/{domain}");

    let response = http.get(&url).send().await.map_err(|e| DiscoveryError::Http(e.to_string()))?;
    if !response.status().is_success() {
        return Err(DiscoveryError::NotFound(domain.to_string()));
    }
    let body = response.text().await.map_err(|e| DiscoveryError::Http(e.to_string()))?;
    parse_autoconfig(&body)
}

fn parse_autoconfig(xml: &str) -> Result<ProviderConfig, DiscoveryError> {
    let parsed: ClientConfig = from_str(xml).map_err(|e| DiscoveryError::Xml(e.to_string()))?;

    let imap = parsed
        .email_provider
        .incoming_servers
        .iter()
        .find(|s| s.server_type.eq_ignore_ascii_case("imap"))
        .ok_or_else(|| DiscoveryError::Xml("no <incomingServer type=\"imap\"> element".to_string()))?;
    let smtp = parsed
        .email_provider
        .outgoing_servers
        .first()
        .ok_or_else(|| DiscoveryError::Xml("no <outgoingServer> element".to_string()))?;

    Ok(ProviderConfig {
        tag: "ispdb".to_string(),
        imap_host: imap.hostname.clone(),
        imap_port: imap.port,
        imap_security: socket_type_to_security(&imap.socket_type),
        smtp_host: smtp.hostname.clone(),
        smtp_port: smtp.port,
        smtp_security: socket_type_to_security(&smtp.socket_type),
        auth_method: authentication_to_method(imap.authentication.as_deref()),
        archive_behavior: crate::config::ArchiveBehavior::CopyToArchive,
        requires_sent_append: true,
        idle_refresh_secs: 25 * 60,
        max_connections: 5,
    })
}

fn socket_type_to_security(socket_type: &str) -> ConnectionSecurity {
    match socket_type.to_uppercase().as_str() {
        "SSL" | "TLS" => ConnectionSecurity::Tls,
        "STARTTLS" => ConnectionSecurity::Starttls,
        _ => ConnectionSecurity::Tls,
    }
}

fn authentication_to_method(authentication: Option<&str>) -> ProviderAuthMethod {
    match authentication.map(|a| a.to_lowercase()) {
        Some(a) if a == "oauth2" || a == "xoauth2" => ProviderAuthMethod::OAuth2,
        _ => ProviderAuthMethod::Plain,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<clientConfig version="1.1">
  <emailProvider id="example.com">
    <displayName>Example Mail</displayName>
    <incomingServer type="imap">
      <hostname>imap.example.com</hostname>
      <port>993</port>
      <socketType>SSL</socketType>
      <authentication>password-cleartext</authentication>
    </incomingServer>
    <outgoingServer type="smtp">
      <hostname>smtp.example.com</hostname>
      <port>587</port>
      <socketType>STARTTLS</socketType>
      <authentication>password-cleartext</authentication>
    </outgoingServer>
  </emailProvider>
</clientConfig>"#;

    #[test]
    fn parses_imap_and_smtp_servers() {
        let config = parse_autoconfig(SAMPLE).unwrap();
        assert_eq!(config.imap_host, "imap.example.com");
        assert_eq!(config.imap_port, 993);
        assert_eq!(config.imap_security, ConnectionSecurity::Tls);
        assert_eq!(config.smtp_host, "smtp.example.com");
        assert_eq!(config.smtp_security, ConnectionSecurity::Starttls);
        assert_eq!(config.auth_method, ProviderAuthMethod::Plain);
    }

    #[test]
    fn oauth2_authentication_maps_to_oauth2_method() {
        let xml = SAMPLE.replace("password-cleartext", "OAuth2");
        let config = parse_autoconfig(&xml).unwrap();
        assert_eq!(config.auth_method, ProviderAuthMethod::OAuth2);
    }

    #[test]
    fn rejects_domain_with_invalid_characters() {
        assert!(validate_domain("example.com/evil").is_err());
        assert!(validate_domain("example.com").is_ok());
    }

    #[test]
    fn missing_imap_server_is_an_xml_error() {
        let xml = r#"<clientConfig version="1.1"><emailProvider id="x"><outgoingServer type="smtp"><hostname>h</hostname><port>587</port><socketType>STARTTLS</socketType></outgoingServer></emailProvider></clientConfig>"#;
        assert!(matches!(parse_autoconfig(xml), Err(DiscoveryError::Xml(_))));
    }
}
