use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};

use crate::config::ConnectionSecurity;
use crate::error::SmtpProtocolError;
use crate::imap::CredentialTemplate;

/// A message ready to hand to the transport. Threading headers are set
/// verbatim from the sync engine's `Email`/thread resolution, not
/// recomputed here.
#[derive(Debug, Clone)]
pub struct OutgoingMessage {
    pub from: String,
    pub from_name: Option<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub bcc: Vec<String>,
    pub subject: String,
    pub plain_body: String,
    pub html_body: Option<String>,
    pub in_reply_to: Option<String>,
    pub references: Vec<String>,
}

pub struct SMTPClient {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SMTPClient {
    pub fn new(
        host: &str,
        port: u16,
        security: ConnectionSecurity,
        credential: &CredentialTemplate,
    ) -> Result<Self, SmtpProtocolError> {
        let (creds, mechanisms) = match credential {
            CredentialTemplate::Password { username, password } => {
                (Credentials::new(username.clone(), password.clone()), vec![Mechanism::Plain, Mechanism::Login])
            }
            CredentialTemplate::OAuth2 { username, access_token } => {
                (Credentials::new(username.clone(), access_token.clone()), vec![Mechanism::Xoauth2])
            }
        };

        let builder = match security {
            ConnectionSecurity::Tls => AsyncSmtpTransport::<Tokio1Executor>::relay(host)
                .map_err(|e| SmtpProtocolError::CommandFailed(e.to_string()))?,
            ConnectionSecurity::Starttls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)
                .map_err(|e| SmtpProtocolError::CommandFailed(e.to_string()))?,
            #[cfg(any(test, debug_assertions))]
            ConnectionSecurity::Plain => AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(host),
        };

        let transport = builder.port(port).credentials(creds).authentication(mechanisms).build();

        Ok(Self { transport })
    }

    /// Sends one attempt. §4.9's write-side reconciliation owns the
    /// retry-count/`send_state` bookkeeping across attempts (one call here
    /// per queued-send attempt), rather than this client retrying silently
    /// underneath it -- a caller observing `retry_count` needs it to track
    /// actual attempts made.
    pub async fn send(&self, message: &OutgoingMessage) -> Result<(), SmtpProtocolError> {
        let built = build_message(message)?;
        self.transport.send(built).await.map(|_| ()).map_err(|e| SmtpProtocolError::CommandFailed(e.to_string()))
    }
}

fn build_message(message: &OutgoingMessage) -> Result<Message, SmtpProtocolError> {
    let from_mailbox = parse_mailbox(&message.from, message.from_name.as_deref())?;

    let mut builder = Message::builder().from(from_mailbox).subject(&message.subject);

    for to in &message.to {
        builder = builder.to(parse_mailbox(to, None)?);
    }
    for cc in &message.cc {
        builder = builder.cc(parse_mailbox(cc, None)?);
    }
    for bcc in &message.bcc {
        builder = builder.bcc(parse_mailbox(bcc, None)?);
    }
    if let Some(in_reply_to) = &message.in_reply_to {
        builder = builder.in_reply_to(in_reply_to.clone());
    }
    if !message.references.is_empty() {
        builder = builder.references(message.references.join(" "));
    }

    let built = match &message.html_body {
        Some(html) => builder
            .multipart(
                MultiPart::alternative()
                    .singlepart(SinglePart::builder().header(ContentType::TEXT_PLAIN).body(message.plain_body.clone()))
                    .singlepart(SinglePart::builder().header(ContentType::TEXT_HTML).body(html.clone())),
            )
            .map_err(|e| SmtpProtocolError::InvalidResponse(e.to_string()))?,
        None => builder
            .header(ContentType::TEXT_PLAIN)
            .body(message.plain_body.clone())
            .map_err(|e| SmtpProtocolError::InvalidResponse(e.to_string()))?,
    };

    Ok(built)
}

fn parse_mailbox(address: &str, display_name: Option<&str>) -> Result<Mailbox, SmtpProtocolError> {
    let text = match display_name {
        Some(name) => format!("{name} <{address}>"),
        None => address.to_string(),
    };
    text.parse::<Mailbox>().map_err(|e| SmtpProtocolError::InvalidResponse(format!("invalid address {address}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_message_rejects_invalid_recipient() {
        let message = OutgoingMessage {
            from: "me@example.com".into(),
            from_name: None,
            to: vec!["not-an-address".into()],
            cc: vec![],
            bcc: vec![],
            subject: "hi".into(),
            plain_body: "body".into(),
            html_body: None,
            in_reply_to: None,
            references: vec![],
        };
        assert!(build_message(&message).is_err());
    }

    #[test]
    fn build_message_with_html_produces_multipart() {
        let message = OutgoingMessage {
            from: "me@example.com".into(),
            from_name: Some("Me".into()),
            to: vec!["you@example.com".into()],
            cc: vec![],
            bcc: vec![],
            subject: "hi".into(),
            plain_body: "plain".into(),
            html_body: Some("<p>html</p>".into()),
            in_reply_to: Some("<parent@example.com>".into()),
            references: vec!["<parent@example.com>".into()],
        };
        assert!(build_message(&message).is_ok());
    }
}
