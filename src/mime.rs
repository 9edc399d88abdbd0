//! Default `MIMEEncoder`, built on `mail-builder` the way the donor's
//! `ComposeEmail` helpers (`mail/types.rs::reply_to`/`reply_all`/`forward`)
//! build reply bodies -- just operating on raw bytes for APPEND to the Sent
//! folder rather than on donor's UI-facing `ComposeEmail` string struct.

use mail_builder::MessageBuilder;

use crate::error::MimeError;
use crate::repository::{MIMEEncoder, MimeCompose};

pub struct DefaultMimeEncoder;

impl MIMEEncoder for DefaultMimeEncoder {
    fn encode(&self, message: &MimeCompose<'_>) -> Result<Vec<u8>, MimeError> {
        if message.to.is_empty() {
            return Err(MimeError::InvalidAddress("no recipients".to_string()));
        }

        let mut builder = MessageBuilder::new()
            .from(message.from.to_string())
            .to(message.to.iter().map(|addr| addr.to_string()).collect::<Vec<_>>())
            .subject(message.subject.to_string());

        if !message.cc.is_empty() {
            builder = builder.cc(message.cc.iter().map(|addr| addr.to_string()).collect::<Vec<_>>());
        }
        if !message.bcc.is_empty() {
            builder = builder.bcc(message.bcc.iter().map(|addr| addr.to_string()).collect::<Vec<_>>());
        }

        builder = match message.html_body {
            Some(html) => builder.text_body(message.plain_body.to_string()).html_body(html.to_string()),
            None => builder.text_body(message.plain_body.to_string()),
        };

        builder.write_to_vec().map_err(|e| MimeError::EncodingFailed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compose<'a>(to: &'a [String], cc: &'a [String], bcc: &'a [String], html_body: Option<&'a str>) -> MimeCompose<'a> {
        MimeCompose {
            from: "me@example.com",
            to,
            cc,
            bcc,
            subject: "hi",
            plain_body: "body",
            html_body,
        }
    }

    #[test]
    fn encode_rejects_empty_recipients() {
        let encoder = DefaultMimeEncoder;
        let result = encoder.encode(&compose(&[], &[], &[], None));
        assert!(result.is_err());
    }

    #[test]
    fn encode_produces_nonempty_bytes() {
        let encoder = DefaultMimeEncoder;
        let to = vec!["you@example.com".to_string()];
        let bytes = encoder.encode(&compose(&to, &[], &[], None)).unwrap();
        assert!(!bytes.is_empty());
    }

    #[test]
    fn encode_with_cc_bcc_and_html_includes_both_bodies() {
        let encoder = DefaultMimeEncoder;
        let to = vec!["you@example.com".to_string()];
        let cc = vec!["cc@example.com".to_string()];
        let bcc = vec!["bcc@example.com".to_string()];
        let bytes = encoder.encode(&compose(&to, &cc, &bcc, Some("<p>body</p>"))).unwrap();
        let raw = String::from_utf8_lossy(&bytes);
        assert!(raw.contains("cc@example.com"));
        assert!(raw.contains("<p>body</p>"));
    }
}
