//! One authenticated NNTP session.
//!
//! State machine after a successful dial:
//! `greeted → authenticated → idle → in-request → idle → closed`.
//! A connection handles requests strictly serially; concurrency comes from
//! pooling many connections, never from sharing one.

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::db::NewsServer;
use crate::error::NntpError;

use super::dialer::{Dialer, StreamReader, StreamWriter};
use super::response::{NntpResponse, parse_status_line};

type Result<T> = std::result::Result<T, NntpError>;

/// Every write must complete within this deadline from issue
const WRITE_DEADLINE: Duration = Duration::from_secs(30);

/// Every read must produce a line within this deadline since the last byte
const READ_DEADLINE: Duration = Duration::from_secs(60);

/// BufReader capacity for article downloads; the default 8 KB causes
/// excessive syscalls at Usenet line rates
const BUFREADER_CAPACITY: usize = 256 * 1024;

/// A live, authenticated NNTP session.
///
/// Exclusively owned while leased from a pool; the pool is the only
/// component that closes it.
pub struct NntpConnection {
    reader: BufReader<StreamReader>,
    writer: StreamWriter,
}

impl std::fmt::Debug for NntpConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NntpConnection").finish_non_exhaustive()
    }
}

impl NntpConnection {
    /// Dial, consume the greeting, and authenticate when credentials are
    /// configured.
    pub async fn connect(dialer: &Dialer, server: &NewsServer) -> Result<Self> {
        let (reader, writer) = dialer.dial(&server.host, server.port, server.tls).await?;

        let mut conn = Self {
            reader: BufReader::with_capacity(BUFREADER_CAPACITY, reader),
            writer,
        };

        let greeting = conn.read_status().await?;
        debug!(
            host = %server.host,
            code = greeting.code,
            "server greeting: {}",
            greeting.message
        );

        if !greeting.is_greeting() {
            return Err(NntpError::Protocol {
                code: greeting.code,
                message: greeting.message,
            });
        }

        if let Some(username) = &server.username {
            conn.authenticate(username, server.password.as_deref().unwrap_or(""))
                .await?;
        }

        Ok(conn)
    }

    /// AUTHINFO USER/PASS exchange: 281 finishes, 381 asks for the password.
    async fn authenticate(&mut self, username: &str, password: &str) -> Result<()> {
        self.write_line(&format!("AUTHINFO USER {username}")).await?;
        let response = self.read_status().await?;

        match response.code {
            281 => return Ok(()),
            381 => {}
            code => {
                return Err(NntpError::AuthFailed(format!(
                    "AUTHINFO USER rejected ({code})"
                )));
            }
        }

        self.write_line(&format!("AUTHINFO PASS {password}")).await?;
        let response = self.read_status().await?;

        if response.code != 281 {
            return Err(NntpError::AuthFailed(format!(
                "AUTHINFO PASS rejected ({})",
                response.code
            )));
        }

        Ok(())
    }

    /// Fetch one article body by message-id.
    ///
    /// The id is wrapped in angle brackets if not already. Expects 222; any
    /// other code is [`NntpError::ArticleUnavailable`]. The returned bytes
    /// are the dot-unstuffed body with LF line endings.
    pub async fn fetch_body(&mut self, message_id: &str) -> Result<Vec<u8>> {
        let bare = message_id
            .trim_start_matches('<')
            .trim_end_matches('>')
            .to_string();

        self.write_line(&format!("BODY <{bare}>")).await?;

        let response = self.read_status().await?;
        if response.code != 222 {
            return Err(NntpError::ArticleUnavailable {
                message_id: bare,
                code: response.code,
            });
        }

        self.read_body().await
    }

    /// Read a dot-terminated multiline body, removing dot-stuffing.
    async fn read_body(&mut self) -> Result<Vec<u8>> {
        let mut body = Vec::with_capacity(512 * 1024);
        let mut line = Vec::with_capacity(1024);

        loop {
            line.clear();
            let read = timeout(READ_DEADLINE, self.reader.read_until(b'\n', &mut line))
                .await
                .map_err(|_| NntpError::Timeout)?
                .map_err(NntpError::Io)?;

            if read == 0 {
                return Err(NntpError::ConnectionClosed);
            }

            // Terminator: a line containing only "."
            if line == b".\r\n" || line == b".\n" {
                break;
            }

            let content_end = if line.ends_with(b"\r\n") {
                line.len() - 2
            } else if line.ends_with(b"\n") {
                line.len() - 1
            } else {
                line.len()
            };
            let content = &line[..content_end];

            // Strip exactly one leading dot from stuffed lines
            if content.starts_with(b"..") {
                body.extend_from_slice(&content[1..]);
            } else {
                body.extend_from_slice(content);
            }
            body.push(b'\n');
        }

        Ok(body)
    }

    /// Best-effort QUIT, then drop the socket.
    pub async fn close(mut self) {
        if self.write_line("QUIT").await.is_ok() {
            // The goodbye line is informational; a short wait keeps close
            // bounded even against a wedged server.
            let _ = timeout(Duration::from_secs(2), async {
                let mut line = Vec::new();
                let _ = self.reader.read_until(b'\n', &mut line).await;
            })
            .await;
        }
        let _ = self.writer.shutdown().await;
    }

    /// Send one CRLF-terminated command line under the write deadline.
    async fn write_line(&mut self, line: &str) -> Result<()> {
        trace!("sending: {line}");
        timeout(WRITE_DEADLINE, async {
            self.writer.write_all(line.as_bytes()).await?;
            self.writer.write_all(b"\r\n").await?;
            self.writer.flush().await
        })
        .await
        .map_err(|_| NntpError::Timeout)?
        .map_err(NntpError::Io)
    }

    /// Read one status line under the read deadline.
    async fn read_status(&mut self) -> Result<NntpResponse> {
        let mut line = Vec::with_capacity(512);
        let read = timeout(READ_DEADLINE, self.reader.read_until(b'\n', &mut line))
            .await
            .map_err(|_| NntpError::Timeout)?
            .map_err(NntpError::Io)?;

        if read == 0 {
            return Err(NntpError::ConnectionClosed);
        }

        let text = String::from_utf8_lossy(&line);
        let text = text.trim_end();
        trace!("received: {text}");

        parse_status_line(text)
    }
}
