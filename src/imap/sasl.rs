//! SASL payload construction and the two levels of wire-string sanitization
//! IMAPSession requires (§4.2): quoted-string interpolation (escapes `\`/`"`,
//! strips CR/LF) and atom interpolation (strips CR/LF only, so the
//! syntactic backslash of `\Seen`/`\Flagged` survives).

/// XOAUTH2 authenticator handed to `async_imap::Client::authenticate`.
/// Identical wire format to the donor's `XOAuth2Authenticator`
/// (`mail/imap/mod.rs`), generalized off a single hardcoded account.
pub struct XOAuth2Authenticator {
    pub user: String,
    pub access_token: String,
}

impl async_imap::Authenticator for XOAuth2Authenticator {
    type Response = String;

    fn process(&mut self, _challenge: &[u8]) -> Self::Response {
        format!("user={}\x01auth=Bearer {}\x01\x01", self.user, self.access_token)
    }
}

pub fn xoauth2_sasl_string(email: &str, access_token: &str) -> String {
    format!("user={email}\x01auth=Bearer {access_token}\x01\x01")
}

/// Escapes `\` and `"` and strips CR/LF. Use for anything interpolated into
/// a double-quoted IMAP string (folder names, LOGIN credentials).
pub fn sanitize_quoted(s: &str) -> String {
    s.chars()
        .filter(|&c| c != '\r' && c != '\n')
        .flat_map(|c| match c {
            '\\' => vec!['\\', '\\'],
            '"' => vec!['\\', '"'],
            other => vec![other],
        })
        .collect()
}

/// Strips CR/LF only. Use for IMAP atoms such as flag names, where the
/// leading backslash of `\Seen` is syntax, not a character to escape.
pub fn sanitize_atom(s: &str) -> String {
    s.chars().filter(|&c| c != '\r' && c != '\n').collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoted_sanitize_escapes_and_strips() {
        assert_eq!(sanitize_quoted("a\"b\\c\r\n"), "a\\\"b\\\\c");
    }

    #[test]
    fn quoted_sanitize_is_idempotent_on_clean_input() {
        let clean = "plain folder name";
        assert_eq!(sanitize_quoted(clean), clean);
    }

    #[test]
    fn atom_sanitize_preserves_backslash() {
        assert_eq!(sanitize_atom("\\Seen"), "\\Seen");
        assert_eq!(sanitize_atom("\\Flagged\r\n"), "\\Flagged");
    }

    #[test]
    fn xoauth2_string_matches_rfc_format() {
        let s = xoauth2_sasl_string("user@example.com", "tok123");
        assert_eq!(s, "user=user@example.com\x01auth=Bearer tok123\x01\x01");
    }
}
