//! C2: `IMAPSession`, the connect/greet/STARTTLS/authenticate state machine.
//!
//! The explicit `{greeting, STARTTLS}` handshake is framed by hand directly
//! over `TlsConnection` (this is the one place the core talks raw IMAP wire
//! bytes) because `async_imap::Client` has no public way to hand back its
//! underlying stream mid-session for an in-place TLS upgrade. Once the
//! handshake settles on a final (plain or upgraded) `TlsConnection`,
//! everything else -- LOGIN/AUTHENTICATE, SELECT, FETCH, STORE, IDLE -- is
//! delegated to `async_imap::Client`/`Session`, bridged via
//! `tokio_util::compat` (donor's `mail/imap/client.rs::connect` does the same
//! bridging, just with `async_native_tls` instead of `tokio-rustls`).

use std::time::Duration;

use async_imap::Session as ImapLibSession;
use tokio_util::compat::{Compat, TokioAsyncReadCompatExt};

use crate::config::ConnectionSecurity;
use crate::error::ImapProtocolError;
use crate::tls::TlsConnection;

use super::sasl::XOAuth2Authenticator;

type WireStream = Compat<TlsConnection>;

/// `Closed -> Connecting -> Greeted -> Authenticated -> {Selected | Idle} -> Closed`.
/// `Selected`/`Idle` carry the folder's IMAP path so a caller re-selecting
/// after IDLE can tell whether a re-SELECT is actually necessary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImapSessionState {
    Closed,
    Connecting,
    Greeted,
    Authenticated,
    Selected(String),
    Idle(String),
}

pub struct IMAPSession {
    inner: Option<ImapLibSession<WireStream>>,
    state: ImapSessionState,
    pub has_uidplus: bool,
}

impl IMAPSession {
    /// Runs the full connect sequence: TCP connect, TLS-from-start or
    /// plaintext-then-STARTTLS, greeting, then LOGIN or XOAUTH2 AUTHENTICATE.
    pub async fn connect(
        host: &str,
        port: u16,
        security: ConnectionSecurity,
        connect_timeout: Duration,
        credential: SessionCredential,
    ) -> Result<Self, ImapProtocolError> {
        let mut conn = match security {
            ConnectionSecurity::Tls => TlsConnection::connect_tls(host, port, connect_timeout).await?,
            ConnectionSecurity::Starttls => {
                let plain = TlsConnection::connect_plain(host, port, connect_timeout).await?;
                Self::read_greeting(plain, connect_timeout).await?
            }
            #[cfg(any(test, debug_assertions))]
            ConnectionSecurity::Plain => TlsConnection::connect_plain(host, port, connect_timeout).await?,
        };

        if matches!(security, ConnectionSecurity::Starttls) {
            conn = Self::negotiate_starttls(conn, connect_timeout).await?;
        } else {
            // TLS-from-start servers still send a greeting line before
            // LOGIN/AUTHENTICATE is valid; consume and discard it raw so
            // async_imap's Client starts from a clean response boundary.
            conn = Self::read_greeting(conn, connect_timeout).await?;
        }

        let client = async_imap::Client::new(conn.compat());
        let mut session = match credential {
            SessionCredential::Password { username, password } => client
                .login(&username, &password)
                .await
                .map_err(|(e, _)| ImapProtocolError::AuthenticationFailed(e.to_string()))?,
            SessionCredential::OAuth2 { username, access_token } => {
                let authenticator = XOAuth2Authenticator { user: username, access_token };
                client
                    .authenticate("XOAUTH2", authenticator)
                    .await
                    .map_err(|(e, _)| ImapProtocolError::AuthenticationFailed(e.to_string()))?
            }
        };

        let has_uidplus = session
            .capabilities()
            .await
            .map(|caps| caps.has(&async_imap::types::Capability::Atom("UIDPLUS".into())))
            .unwrap_or(false);

        Ok(Self {
            inner: Some(session),
            state: ImapSessionState::Authenticated,
            has_uidplus,
        })
    }

    /// Reads and discards the server's untagged greeting line
    /// (`* OK ...` / `* PREAUTH ...`), raw, before any framed IMAP exchange
    /// begins. Returns the connection unchanged so callers can chain.
    async fn read_greeting(mut conn: TlsConnection, io_timeout: Duration) -> Result<TlsConnection, ImapProtocolError> {
        let line = conn.receive(4096, io_timeout).await?;
        if !line.starts_with(b"* OK") && !line.starts_with(b"* PREAUTH") {
            return Err(ImapProtocolError::InvalidResponse(
                String::from_utf8_lossy(&line).trim().to_string(),
            ));
        }
        Ok(conn)
    }

    /// §4.2's six-step STARTTLS sequence (steps 3-6; steps 1-2, the plain
    /// TCP connect and greeting read, already happened in `connect`):
    /// tagged `CAPABILITY` requiring the literal token `STARTTLS` in the
    /// untagged response, tagged `STARTTLS`, the TLS handshake itself, then
    /// a second tagged `CAPABILITY` whose contents are ignored but whose
    /// tagged status must be `OK`. The donor's own connect path never
    /// speaks STARTTLS at all (it always dials implicit TLS); this whole
    /// sequence is new, grounded on RFC 3501 §6.2.1 / §7.2.1.
    async fn negotiate_starttls(mut conn: TlsConnection, io_timeout: Duration) -> Result<TlsConnection, ImapProtocolError> {
        conn.send(b"a1 CAPABILITY\r\n", io_timeout).await?;
        let lines = Self::read_tagged_response(&mut conn, "a1", io_timeout).await?;
        if !Self::is_tagged_ok(&lines, "a1") {
            return Err(ImapProtocolError::CommandFailed(lines.join("\n")));
        }
        if !lines.iter().any(|l| l.to_ascii_uppercase().contains("STARTTLS")) {
            return Err(ImapProtocolError::StarttlsNotSupported);
        }

        conn.send(b"a2 STARTTLS\r\n", io_timeout).await?;
        let lines = Self::read_tagged_response(&mut conn, "a2", io_timeout).await?;
        if !Self::is_tagged_ok(&lines, "a2") {
            return Err(ImapProtocolError::StarttlsNotSupported);
        }

        let mut conn = conn.upgrade_tls(io_timeout).await?;

        conn.send(b"a3 CAPABILITY\r\n", io_timeout).await?;
        let lines = Self::read_tagged_response(&mut conn, "a3", io_timeout).await?;
        if !Self::is_tagged_ok(&lines, "a3") {
            return Err(ImapProtocolError::CommandFailed(lines.join("\n")));
        }

        Ok(conn)
    }

    /// Reads raw lines off `conn` until one starting with `"{tag} "`
    /// arrives (the tagged terminator), returning every line seen
    /// including that last one. Used only for the pre-`async_imap::Client`
    /// CAPABILITY/STARTTLS exchange; everything after the handshake
    /// settles is framed by `async_imap` instead.
    async fn read_tagged_response(conn: &mut TlsConnection, tag: &str, io_timeout: Duration) -> Result<Vec<String>, ImapProtocolError> {
        let marker = format!("{tag} ");
        let mut buffer: Vec<u8> = Vec::new();
        loop {
            let chunk = conn.receive(4096, io_timeout).await?;
            buffer.extend_from_slice(&chunk);
            let text = String::from_utf8_lossy(&buffer).into_owned();
            if let Some(idx) = text.lines().position(|l| l.starts_with(&marker)) {
                return Ok(text.lines().take(idx + 1).map(|l| l.trim_end().to_string()).collect());
            }
        }
    }

    fn is_tagged_ok(lines: &[String], tag: &str) -> bool {
        lines.last().map(|l| l.starts_with(&format!("{tag} OK"))).unwrap_or(false)
    }

    pub fn state(&self) -> &ImapSessionState {
        &self.state
    }

    pub(super) fn session_mut(&mut self) -> Result<&mut ImapLibSession<WireStream>, ImapProtocolError> {
        self.inner.as_mut().ok_or(ImapProtocolError::OperationCancelled)
    }

    pub(super) fn set_state(&mut self, state: ImapSessionState) {
        self.state = state;
    }

    /// Hands the underlying `async_imap` session out so the caller (the
    /// IDLE loop) can run `session.idle()`, which consumes its `Session` by
    /// value. Returned via `restore`.
    pub(super) fn take_inner(&mut self) -> Option<ImapLibSession<WireStream>> {
        self.inner.take()
    }

    pub(super) fn restore(&mut self, session: ImapLibSession<WireStream>) {
        self.inner = Some(session);
    }

    pub async fn logout(&mut self) -> Result<(), ImapProtocolError> {
        if let Some(mut session) = self.inner.take() {
            session.logout().await.map_err(|e| ImapProtocolError::CommandFailed(e.to_string()))?;
        }
        self.state = ImapSessionState::Closed;
        Ok(())
    }
}

pub enum SessionCredential {
    Password { username: String, password: String },
    OAuth2 { username: String, access_token: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    /// Reads one line (up to and including `\r\n`) off a raw server-side
    /// socket in a test script.
    async fn read_line(sock: &mut TcpStream) -> String {
        let mut buf = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            sock.read_exact(&mut byte).await.unwrap();
            buf.push(byte[0]);
            if buf.ends_with(b"\r\n") {
                break;
            }
        }
        String::from_utf8_lossy(&buf).into_owned()
    }

    #[tokio::test]
    async fn starttls_not_advertised_fails_before_sending_starttls() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"* OK greeting ready\r\n").await.unwrap();

            let capability_cmd = read_line(&mut sock).await;
            assert!(capability_cmd.starts_with("a1 CAPABILITY"));
            sock.write_all(b"* CAPABILITY IMAP4rev1\r\na1 OK done\r\n").await.unwrap();

            // The client must give up here: it never gets to send STARTTLS.
            let mut probe = [0u8; 1];
            let n = tokio::time::timeout(Duration::from_millis(200), sock.read(&mut probe)).await;
            // Either the client never sends anything more (timeout) or the
            // connection drops (EOF / reset) -- both mean "gave up before
            // STARTTLS", which is what matters here.
            assert!(!matches!(n, Ok(Ok(k)) if k > 0));
        });

        let credential = SessionCredential::Password { username: "u".into(), password: "p".into() };
        let result =
            IMAPSession::connect("127.0.0.1", addr.port(), ConnectionSecurity::Starttls, Duration::from_secs(2), credential).await;

        assert!(matches!(result, Err(ImapProtocolError::StarttlsNotSupported)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn starttls_tagged_bad_is_not_supported() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"* OK greeting ready\r\n").await.unwrap();

            let capability_cmd = read_line(&mut sock).await;
            assert!(capability_cmd.starts_with("a1 CAPABILITY"));
            sock.write_all(b"* CAPABILITY IMAP4rev1 STARTTLS\r\na1 OK done\r\n").await.unwrap();

            let starttls_cmd = read_line(&mut sock).await;
            assert!(starttls_cmd.starts_with("a2 STARTTLS"));
            sock.write_all(b"a2 BAD not now\r\n").await.unwrap();
        });

        let credential = SessionCredential::Password { username: "u".into(), password: "p".into() };
        let result =
            IMAPSession::connect("127.0.0.1", addr.port(), ConnectionSecurity::Starttls, Duration::from_secs(2), credential).await;

        assert!(matches!(result, Err(ImapProtocolError::StarttlsNotSupported)));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn bad_greeting_is_invalid_response() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            sock.write_all(b"* BYE not ready\r\n").await.unwrap();
        });

        let credential = SessionCredential::Password { username: "u".into(), password: "p".into() };
        let result =
            IMAPSession::connect("127.0.0.1", addr.port(), ConnectionSecurity::Starttls, Duration::from_secs(2), credential).await;

        assert!(matches!(result, Err(ImapProtocolError::InvalidResponse(_))));
        server.await.unwrap();
    }
}
