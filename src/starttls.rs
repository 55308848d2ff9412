//! Plaintext STARTTLS negotiation for IMAP, POP3 and SMTP.
//!
//! Replies are read one byte at a time so nothing past the final line is
//! consumed; the stream can then go straight to
//! [`TrustedSocketFactory::upgrade`](crate::socket_factory::TrustedSocketFactory::upgrade).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use crate::error::{Result, TrustError};

const MAX_LINE: usize = 8192;
const IMAP_TAG: &str = "a001";
const EHLO_NAME: &str = "mailtrust.localdomain";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MailProtocol {
    Imap,
    Pop3,
    Smtp,
}

impl MailProtocol {
    /// Port for TLS from the first byte (IMAPS, POP3S, SMTPS).
    pub fn implicit_tls_port(&self) -> u16 {
        match self {
            MailProtocol::Imap => 993,
            MailProtocol::Pop3 => 995,
            MailProtocol::Smtp => 465,
        }
    }

    /// Plaintext port on which STARTTLS is offered.
    pub fn starttls_port(&self) -> u16 {
        match self {
            MailProtocol::Imap => 143,
            MailProtocol::Pop3 => 110,
            MailProtocol::Smtp => 587,
        }
    }
}

impl fmt::Display for MailProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MailProtocol::Imap => f.write_str("imap"),
            MailProtocol::Pop3 => f.write_str("pop3"),
            MailProtocol::Smtp => f.write_str("smtp"),
        }
    }
}

impl FromStr for MailProtocol {
    type Err = TrustError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "imap" => Ok(MailProtocol::Imap),
            "pop3" | "pop" => Ok(MailProtocol::Pop3),
            "smtp" => Ok(MailProtocol::Smtp),
            other => Err(TrustError::Protocol(format!("unknown mail protocol {:?}", other))),
        }
    }
}

/// Runs the plaintext part of STARTTLS. On success the next bytes on
/// `stream` belong to the TLS handshake.
pub async fn negotiate_starttls<S>(stream: &mut S, protocol: MailProtocol) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    debug!("Negotiating {} STARTTLS", protocol);
    match protocol {
        MailProtocol::Imap => imap(stream).await,
        MailProtocol::Pop3 => pop3(stream).await,
        MailProtocol::Smtp => smtp(stream).await,
    }
}

async fn imap<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let greeting = read_line(stream).await?;
    if !greeting.starts_with("* OK") {
        return Err(refused("IMAP greeting", &greeting));
    }
    send(stream, &format!("{} STARTTLS", IMAP_TAG)).await?;
    loop {
        let line = read_line(stream).await?;
        if line.starts_with("* ") {
            continue;
        }
        return match line.strip_prefix(IMAP_TAG).map(str::trim_start) {
            Some(rest) if rest.starts_with("OK") => Ok(()),
            _ => Err(refused("IMAP STARTTLS", &line)),
        };
    }
}

async fn pop3<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let greeting = read_line(stream).await?;
    if !greeting.starts_with("+OK") {
        return Err(refused("POP3 greeting", &greeting));
    }
    send(stream, "STLS").await?;
    let reply = read_line(stream).await?;
    if !reply.starts_with("+OK") {
        return Err(refused("POP3 STLS", &reply));
    }
    Ok(())
}

async fn smtp<S>(stream: &mut S) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    expect_smtp(stream, 220, "SMTP greeting").await?;
    send(stream, &format!("EHLO {}", EHLO_NAME)).await?;
    let capabilities = expect_smtp(stream, 250, "SMTP EHLO").await?;
    if !capabilities
        .iter()
        .any(|line| line.get(4..).map_or(false, |c| c.eq_ignore_ascii_case("STARTTLS")))
    {
        debug!("Server did not advertise STARTTLS, trying anyway");
    }
    send(stream, "STARTTLS").await?;
    expect_smtp(stream, 220, "SMTP STARTTLS").await?;
    Ok(())
}

/// Reads a possibly multi-line SMTP reply and checks its code.
async fn expect_smtp<S>(stream: &mut S, code: u16, stage: &str) -> Result<Vec<String>>
where
    S: AsyncRead + Unpin,
{
    let mut lines = Vec::new();
    loop {
        let line = read_line(stream).await?;
        let reply_code = line.get(..3).and_then(|c| c.parse::<u16>().ok());
        if reply_code != Some(code) {
            return Err(refused(stage, &line));
        }
        let last = line.as_bytes().get(3) != Some(&b'-');
        lines.push(line);
        if last {
            return Ok(lines);
        }
    }
}

async fn send<S>(stream: &mut S, command: &str) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    stream.write_all(command.as_bytes()).await?;
    stream.write_all(b"\r\n").await?;
    stream.flush().await?;
    Ok(())
}

async fn read_line<S>(stream: &mut S) -> Result<String>
where
    S: AsyncRead + Unpin,
{
    let mut line = Vec::new();
    loop {
        let byte = stream.read_u8().await?;
        if byte == b'\n' {
            break;
        }
        if line.len() >= MAX_LINE {
            return Err(TrustError::Protocol("server line too long".to_string()));
        }
        line.push(byte);
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
    Ok(String::from_utf8_lossy(&line).into_owned())
}

fn refused(stage: &str, line: &str) -> TrustError {
    TrustError::Protocol(format!("{} failed: {}", stage, line))
}
