//! SMTP session runner
//!
//! One TCP (or TLS) dialog against a single host:port, walking
//! greeting -> EHLO -> optional STARTTLS -> EHLO -> MAIL FROM ->
//! RCPT TO. Every request and reply is recorded in a wire transcript;
//! the final RCPT reply is classified into a recipient status and a
//! diagnostic tag. Failures never escape as errors: they are folded
//! into the returned [`SessionOutcome`].

use crate::smtp::classifier;
use crate::{RecipientStatus, VerifierConfig};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_native_tls::TlsStream;
use tracing::{debug, trace};

/// Ports that expect a TLS handshake before any SMTP command
pub(crate) fn is_implicit_tls(port: u16) -> bool {
    matches!(port, 465 | 2465)
}

/// A parsed (possibly multi-line) SMTP reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmtpReply {
    /// Reply code from the last line, or -1 when unparseable
    pub code: i32,
    /// RFC 3463 enhanced status code, when the last line carries one
    pub enhanced: Option<String>,
    /// Raw reply lines as received, code prefixes included
    pub lines: Vec<String>,
}

impl SmtpReply {
    /// Raw reply text, newline-joined
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    pub(crate) fn from_lines(lines: Vec<String>) -> Self {
        let last = lines.last().map(String::as_str).unwrap_or("");
        let code = parse_reply_code(last);
        let enhanced = parse_enhanced_code(last);
        Self { code, enhanced, lines }
    }
}

/// First three digits of a reply line, or -1
pub(crate) fn parse_reply_code(line: &str) -> i32 {
    line.get(..3).and_then(|s| s.parse::<i32>().ok()).unwrap_or(-1)
}

/// Second whitespace-separated token of the last line, when it has the
/// `d.d.d` shape
pub(crate) fn parse_enhanced_code(line: &str) -> Option<String> {
    let token = line.split_whitespace().nth(1)?;
    let bytes = token.as_bytes();
    if bytes.len() == 5
        && bytes[0].is_ascii_digit()
        && bytes[1] == b'.'
        && bytes[2].is_ascii_digit()
        && bytes[3] == b'.'
        && bytes[4].is_ascii_digit()
    {
        Some(token.to_string())
    } else {
        None
    }
}

/// A reply ends on the first line shorter than 4 characters or whose
/// 4th character is not `-`
pub(crate) fn is_final_line(line: &str) -> bool {
    line.as_bytes().get(3).map(|b| *b != b'-').unwrap_or(true)
}

/// Outcome of one probing session
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub status: RecipientStatus,
    /// RCPT reply code, or -1 when the dialog never got that far
    pub smtp_code: i32,
    pub reply_text: Option<String>,
    pub diagnostic_tag: String,
    pub mx_host: String,
    pub port: u16,
    /// Whether the dialog ran over TLS (implicit or upgraded)
    pub tls: bool,
    pub transcript: Vec<String>,
    /// Session start, ISO-8601 with millisecond precision
    pub timestamp: String,
    pub error: Option<String>,
}

impl SessionOutcome {
    /// Newline-joined transcript, `None` when nothing was exchanged
    pub fn transcript_text(&self) -> Option<String> {
        if self.transcript.is_empty() {
            None
        } else {
            Some(self.transcript.join("\n"))
        }
    }

    pub(crate) fn timed_out(host: &str, port: u16, timeout_ms: u64) -> Self {
        Self {
            status: RecipientStatus::TemporaryFailure,
            smtp_code: -1,
            reply_text: None,
            diagnostic_tag: "Timeout".to_string(),
            mx_host: host.to_string(),
            port,
            tls: false,
            transcript: Vec::new(),
            timestamp: crate::now_timestamp(),
            error: Some(format!("session timed out after {timeout_ms} ms")),
        }
    }
}

#[derive(Error, Debug)]
pub(crate) enum SessionError {
    #[error("host resolution failed: {0}")]
    Dns(String),
    #[error("connect to {addr} failed: {source}")]
    Connect { addr: SocketAddr, source: io::Error },
    #[error("timed out after {ms} ms during {during}")]
    Timeout { during: &'static str, ms: u64 },
    #[error("TLS handshake failed: {0}")]
    Tls(String),
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl SessionError {
    fn status_and_tag(&self) -> (RecipientStatus, &'static str) {
        match self {
            Self::Dns(_) => (RecipientStatus::UnknownFailure, "DNSResolutionFailed"),
            Self::Timeout { .. } => (RecipientStatus::TemporaryFailure, "Timeout"),
            Self::Tls(_) => (RecipientStatus::TemporaryFailure, "TLSHandshakeFailed"),
            Self::Connect { .. } | Self::Protocol(_) | Self::Io(_) => {
                (RecipientStatus::UnknownFailure, "PortFailed")
            }
        }
    }
}

/// Run one probing session against `host:port` for `target`
///
/// Never fails: connection, TLS, and protocol errors are folded into
/// the outcome with the transcript collected so far.
pub async fn run_session(
    host: &str,
    port: u16,
    target: &str,
    config: &VerifierConfig,
) -> SessionOutcome {
    let started = crate::now_timestamp();
    let mut transcript = Vec::new();
    let mut tls = false;

    match dialogue(host, port, target, config, &mut transcript, &mut tls).await {
        Ok(rcpt) => {
            let text = rcpt.text();
            let status = classifier::classify_response(rcpt.code, rcpt.enhanced.as_deref(), &text);
            let tag = classifier::diagnostic_tag(rcpt.code, &text);
            debug!(
                "Session {}:{} finished - code {}, status {:?}, tag {}",
                host, port, rcpt.code, status, tag
            );
            SessionOutcome {
                status,
                smtp_code: rcpt.code,
                reply_text: Some(text),
                diagnostic_tag: tag.to_string(),
                mx_host: host.to_string(),
                port,
                tls,
                transcript,
                timestamp: started,
                error: None,
            }
        }
        Err(err) => {
            let (status, tag) = err.status_and_tag();
            debug!("Session {}:{} failed - {}", host, port, err);
            SessionOutcome {
                status,
                smtp_code: -1,
                reply_text: None,
                diagnostic_tag: tag.to_string(),
                mx_host: host.to_string(),
                port,
                tls,
                transcript,
                timestamp: started,
                error: Some(err.to_string()),
            }
        }
    }
}

async fn dialogue(
    host: &str,
    port: u16,
    target: &str,
    config: &VerifierConfig,
    transcript: &mut Vec<String>,
    tls_used: &mut bool,
) -> Result<SmtpReply, SessionError> {
    let io_timeout = Duration::from_millis(config.smtp_timeout_ms);
    let addr = resolve_addr(host, port, io_timeout).await?;
    let implicit = is_implicit_tls(port);

    let mut stream = if implicit {
        match SmtpStream::connect_tls(addr, host, io_timeout).await {
            Ok(stream) => {
                transcript.push("<< Implicit TLS connection established".to_string());
                *tls_used = true;
                stream
            }
            Err(err @ SessionError::Tls(_)) => {
                transcript.push(format!("<< TLS handshake failed: {err}"));
                return Err(err);
            }
            Err(err) => return Err(err),
        }
    } else {
        SmtpStream::connect(addr, io_timeout).await?
    };

    let greeting = stream.read_reply().await?;
    record_reply(transcript, &greeting);

    let ehlo_cmd = format!("EHLO {}", config.helo_name);
    let ehlo = exchange(&mut stream, transcript, &ehlo_cmd).await?;

    if !implicit && ehlo.text().to_ascii_lowercase().contains("starttls") {
        let go_ahead = exchange(&mut stream, transcript, "STARTTLS").await?;
        if go_ahead.code == 220 {
            match stream.upgrade_tls(host).await {
                Ok(()) => {
                    transcript.push("<< TLS handshake successful".to_string());
                    *tls_used = true;
                }
                Err(err) => {
                    transcript.push(format!("<< TLS handshake failed: {err}"));
                    return Err(err);
                }
            }
            // The pre-TLS capabilities no longer apply
            exchange(&mut stream, transcript, &ehlo_cmd).await?;
        }
    }

    exchange(
        &mut stream,
        transcript,
        &format!("MAIL FROM:<{}>", config.mail_from),
    )
    .await?;
    exchange(&mut stream, transcript, &format!("RCPT TO:<{target}>")).await
}

async fn exchange(
    stream: &mut SmtpStream,
    transcript: &mut Vec<String>,
    command: &str,
) -> Result<SmtpReply, SessionError> {
    transcript.push(format!(">> {command}"));
    stream.send_command(command).await?;
    let reply = stream.read_reply().await?;
    record_reply(transcript, &reply);
    Ok(reply)
}

fn record_reply(transcript: &mut Vec<String>, reply: &SmtpReply) {
    for line in &reply.lines {
        transcript.push(format!("<< {line}"));
    }
}

async fn resolve_addr(
    host: &str,
    port: u16,
    io_timeout: Duration,
) -> Result<SocketAddr, SessionError> {
    let lookup = timeout(io_timeout, tokio::net::lookup_host((host, port)))
        .await
        .map_err(|_| SessionError::Timeout {
            during: "host resolution",
            ms: io_timeout.as_millis() as u64,
        })?;
    lookup
        .map_err(|err| SessionError::Dns(format!("{host}: {err}")))?
        .next()
        .ok_or_else(|| SessionError::Dns(format!("{host}: no addresses")))
}

enum StreamState {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
    Invalid,
}

/// Buffered SMTP stream over plaintext or TLS
struct SmtpStream {
    state: StreamState,
    buffer: Vec<u8>,
    io_timeout: Duration,
}

impl SmtpStream {
    async fn connect(addr: SocketAddr, io_timeout: Duration) -> Result<Self, SessionError> {
        let stream = timeout(io_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| SessionError::Timeout {
                during: "connect",
                ms: io_timeout.as_millis() as u64,
            })?
            .map_err(|source| SessionError::Connect { addr, source })?;
        Ok(Self {
            state: StreamState::Plain(stream),
            buffer: Vec::new(),
            io_timeout,
        })
    }

    async fn connect_tls(
        addr: SocketAddr,
        host: &str,
        io_timeout: Duration,
    ) -> Result<Self, SessionError> {
        let mut stream = Self::connect(addr, io_timeout).await?;
        stream.upgrade_tls(host).await?;
        Ok(stream)
    }

    async fn upgrade_tls(&mut self, host: &str) -> Result<(), SessionError> {
        let state = std::mem::replace(&mut self.state, StreamState::Invalid);
        let plain = match state {
            StreamState::Plain(stream) => stream,
            StreamState::Tls(stream) => {
                self.state = StreamState::Tls(stream);
                return Ok(());
            }
            StreamState::Invalid => {
                return Err(SessionError::Protocol("invalid stream state".to_string()))
            }
        };

        let connector = tls_connector()?;
        let handshake = timeout(self.io_timeout, connector.connect(host, plain))
            .await
            .map_err(|_| SessionError::Timeout {
                during: "TLS handshake",
                ms: self.io_timeout.as_millis() as u64,
            })?;
        let tls = handshake.map_err(|err| SessionError::Tls(err.to_string()))?;
        self.state = StreamState::Tls(Box::new(tls));
        Ok(())
    }

    async fn send_command(&mut self, command: &str) -> Result<(), SessionError> {
        trace!("C: {command}");
        let mut data = command.as_bytes().to_vec();
        data.extend_from_slice(b"\r\n");
        let write = async {
            match &mut self.state {
                StreamState::Plain(stream) => {
                    stream.write_all(&data).await?;
                    stream.flush().await
                }
                StreamState::Tls(stream) => {
                    stream.write_all(&data).await?;
                    stream.flush().await
                }
                StreamState::Invalid => Err(io::Error::new(
                    io::ErrorKind::NotConnected,
                    "invalid stream state",
                )),
            }
        };
        timeout(self.io_timeout, write)
            .await
            .map_err(|_| SessionError::Timeout {
                during: "write",
                ms: self.io_timeout.as_millis() as u64,
            })?
            .map_err(SessionError::from)
    }

    async fn read_reply(&mut self) -> Result<SmtpReply, SessionError> {
        let mut lines = Vec::new();
        loop {
            let line = self.read_line().await?;
            trace!("S: {line}");
            let last = is_final_line(&line);
            lines.push(line);
            if last {
                break;
            }
        }
        Ok(SmtpReply::from_lines(lines))
    }

    async fn read_line(&mut self) -> Result<String, SessionError> {
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
                if line.ends_with(b"\n") {
                    line.pop();
                }
                if line.ends_with(b"\r") {
                    line.pop();
                }
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }

            let mut buf = [0u8; 512];
            let read = async {
                match &mut self.state {
                    StreamState::Plain(stream) => stream.read(&mut buf).await,
                    StreamState::Tls(stream) => stream.read(&mut buf).await,
                    StreamState::Invalid => Err(io::Error::new(
                        io::ErrorKind::NotConnected,
                        "invalid stream state",
                    )),
                }
            };
            let n = timeout(self.io_timeout, read)
                .await
                .map_err(|_| SessionError::Timeout {
                    during: "read",
                    ms: self.io_timeout.as_millis() as u64,
                })??;
            if n == 0 {
                return Err(SessionError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed by server",
                )));
            }
            self.buffer.extend_from_slice(&buf[..n]);
        }
    }
}

/// Probing connector: mail hosts routinely present certificates that do
/// not match their MX label, so verification is relaxed.
fn tls_connector() -> Result<tokio_native_tls::TlsConnector, SessionError> {
    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(|err| SessionError::Tls(err.to_string()))?;
    Ok(tokio_native_tls::TlsConnector::from(connector))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RecipientStatus;
    use pretty_assertions::assert_eq;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_reply_code() {
        assert_eq!(parse_reply_code("250 2.1.5 Ok"), 250);
        assert_eq!(parse_reply_code("550-first line"), 550);
        assert_eq!(parse_reply_code("xx"), -1);
        assert_eq!(parse_reply_code(""), -1);
    }

    #[test]
    fn test_parse_enhanced_code() {
        assert_eq!(
            parse_enhanced_code("550 5.1.1 User unknown"),
            Some("5.1.1".to_string())
        );
        assert_eq!(parse_enhanced_code("250 Ok"), None);
        assert_eq!(parse_enhanced_code("250"), None);
        assert_eq!(parse_enhanced_code("451 4.7.15 odd"), None);
    }

    #[test]
    fn test_final_line_detection() {
        assert!(is_final_line("250 Ok"));
        assert!(!is_final_line("250-more to come"));
        assert!(is_final_line("ok"));
        assert!(is_final_line(""));
    }

    #[test]
    fn test_reply_from_lines() {
        let reply = SmtpReply::from_lines(vec![
            "250-mx.example.com".to_string(),
            "250-STARTTLS".to_string(),
            "250 SIZE 1000000".to_string(),
        ]);
        assert_eq!(reply.code, 250);
        assert_eq!(reply.enhanced, None);
        assert!(reply.text().contains("STARTTLS"));
    }

    fn test_config(timeout_ms: u64) -> VerifierConfig {
        VerifierConfig {
            smtp_timeout_ms: timeout_ms,
            ..VerifierConfig::default()
        }
    }

    /// Minimal scripted SMTP server for one connection: replies to the
    /// greeting and then answers each command with the next canned line.
    async fn mock_server(replies: Vec<&'static str>) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut replies = replies.into_iter();
            if let Some(greeting) = replies.next() {
                socket.write_all(greeting.as_bytes()).await.unwrap();
            }
            let mut buf = [0u8; 1024];
            for reply in replies {
                if socket.read(&mut buf).await.unwrap_or(0) == 0 {
                    return;
                }
                if socket.write_all(reply.as_bytes()).await.is_err() {
                    return;
                }
            }
        });
        port
    }

    #[tokio::test]
    async fn test_session_accepts_recipient() {
        let port = mock_server(vec![
            "220 mx.example.com ESMTP ready\r\n",
            "250-mx.example.com\r\n250 SIZE 35882577\r\n",
            "250 2.1.0 Ok\r\n",
            "250 2.1.5 Ok\r\n",
        ])
        .await;

        let outcome = run_session("127.0.0.1", port, "user@example.com", &test_config(2_000)).await;
        assert_eq!(outcome.status, RecipientStatus::Valid);
        assert_eq!(outcome.smtp_code, 250);
        assert_eq!(outcome.diagnostic_tag, "Accepted");
        assert_eq!(outcome.port, port);
        assert!(!outcome.tls);
        assert!(outcome.error.is_none());

        let transcript = outcome.transcript_text().unwrap();
        assert!(transcript.contains(">> EHLO validator.com"));
        assert!(transcript.contains(">> MAIL FROM:<validator@validator.com>"));
        assert!(transcript.contains(">> RCPT TO:<user@example.com>"));
        assert!(transcript.contains("<< 250 2.1.5 Ok"));
    }

    #[tokio::test]
    async fn test_session_user_not_found() {
        let port = mock_server(vec![
            "220 mx.example.com ESMTP\r\n",
            "250 mx.example.com\r\n",
            "250 Ok\r\n",
            "550 5.1.1 User unknown\r\n",
        ])
        .await;

        let outcome = run_session("127.0.0.1", port, "ghost@example.com", &test_config(2_000)).await;
        assert_eq!(outcome.status, RecipientStatus::UserNotFound);
        assert_eq!(outcome.smtp_code, 550);
        assert_eq!(outcome.diagnostic_tag, "UserNotFound");
    }

    #[tokio::test]
    async fn test_session_greeting_timeout() {
        // Accepts the connection but never sends a greeting
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let outcome = run_session("127.0.0.1", port, "user@example.com", &test_config(200)).await;
        assert_eq!(outcome.status, RecipientStatus::TemporaryFailure);
        assert_eq!(outcome.diagnostic_tag, "Timeout");
        assert_eq!(outcome.smtp_code, -1);
        assert!(outcome.error.unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn test_session_connection_refused() {
        // Bind then drop to get a port with nothing listening
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let outcome = run_session("127.0.0.1", port, "user@example.com", &test_config(1_000)).await;
        assert_eq!(outcome.status, RecipientStatus::UnknownFailure);
        assert_eq!(outcome.diagnostic_tag, "PortFailed");
        assert!(outcome.error.is_some());
    }

    #[tokio::test]
    async fn test_session_multiline_greeting() {
        let port = mock_server(vec![
            "220-mx.example.com welcomes you\r\n220 ESMTP ready\r\n",
            "250 mx.example.com\r\n",
            "250 Ok\r\n",
            "250 Ok\r\n",
        ])
        .await;

        let outcome = run_session("127.0.0.1", port, "user@example.com", &test_config(2_000)).await;
        assert_eq!(outcome.status, RecipientStatus::Valid);
        let transcript = outcome.transcript_text().unwrap();
        assert!(transcript.contains("<< 220-mx.example.com welcomes you"));
        assert!(transcript.contains("<< 220 ESMTP ready"));
    }
}
