//! Scripted loopback NNTP server for protocol-layer tests.
//!
//! Speaks just enough NNTP for the connection, pool, and manager tests:
//! greeting, AUTHINFO USER/PASS, BODY with dot-stuffing, QUIT. Every
//! accepted connection is handled concurrently so pool tests can hold
//! several sessions at once.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use crate::db::NewsServer;

/// What the scripted server should do
#[derive(Clone)]
pub(crate) struct ServerBehavior {
    greeting: String,
    auth: Option<(String, String)>,
    articles: HashMap<String, Vec<u8>>,
    /// Articles whose body send stops mid-way with a dropped connection
    truncated: HashMap<String, Vec<u8>>,
}

impl ServerBehavior {
    pub(crate) fn new() -> Self {
        Self {
            greeting: "200 mock news server ready".to_string(),
            auth: None,
            articles: HashMap::new(),
            truncated: HashMap::new(),
        }
    }

    pub(crate) fn with_greeting(mut self, greeting: &str) -> Self {
        self.greeting = greeting.to_string();
        self
    }

    pub(crate) fn with_auth(mut self, username: &str, password: &str) -> Self {
        self.auth = Some((username.to_string(), password.to_string()));
        self
    }

    /// Serve `body` (LF line endings, undotted) for `message_id` (bare).
    pub(crate) fn with_article(mut self, message_id: &str, body: &[u8]) -> Self {
        self.articles.insert(message_id.to_string(), body.to_vec());
        self
    }

    /// Send a 222 and part of the body, then drop the connection.
    pub(crate) fn with_truncated_article(mut self, message_id: &str, partial: &[u8]) -> Self {
        self.truncated
            .insert(message_id.to_string(), partial.to_vec());
        self
    }
}

/// Handle to a running scripted server
pub(crate) struct MockNntpServer {
    addr: SocketAddr,
    /// Total connections accepted since start
    pub(crate) connections: Arc<AtomicUsize>,
    /// Total BODY commands answered with 222
    pub(crate) bodies_served: Arc<AtomicUsize>,
}

impl MockNntpServer {
    pub(crate) async fn start(behavior: ServerBehavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock server");
        let addr = listener.local_addr().expect("local addr");
        let connections = Arc::new(AtomicUsize::new(0));
        let bodies_served = Arc::new(AtomicUsize::new(0));

        let accepted = Arc::clone(&connections);
        let served = Arc::clone(&bodies_served);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                accepted.fetch_add(1, Ordering::SeqCst);
                let behavior = behavior.clone();
                let served = Arc::clone(&served);
                tokio::spawn(async move {
                    let _ = handle_session(stream, behavior, served).await;
                });
            }
        });

        Self {
            addr,
            connections,
            bodies_served,
        }
    }

    /// A NewsServer record pointing at this mock, no credentials.
    pub(crate) fn news_server(&self) -> NewsServer {
        self.news_server_named(1, "mock")
    }

    /// A NewsServer record with a chosen id/name (manager tests).
    pub(crate) fn news_server_named(&self, id: i64, name: &str) -> NewsServer {
        NewsServer {
            id,
            name: name.to_string(),
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
            tls: false,
            username: None,
            password: None,
            connections: 4,
            enabled: true,
        }
    }
}

async fn handle_session(
    stream: TcpStream,
    behavior: ServerBehavior,
    bodies_served: Arc<AtomicUsize>,
) -> std::io::Result<()> {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    writer
        .write_all(format!("{}\r\n", behavior.greeting).as_bytes())
        .await?;

    let mut authed_user: Option<String> = None;
    let mut line = String::new();

    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let command = line.trim_end();

        if let Some(user) = command.strip_prefix("AUTHINFO USER ") {
            match &behavior.auth {
                Some(_) => {
                    authed_user = Some(user.to_string());
                    writer.write_all(b"381 password required\r\n").await?;
                }
                None => writer.write_all(b"281 no authentication required\r\n").await?,
            }
        } else if let Some(pass) = command.strip_prefix("AUTHINFO PASS ") {
            let ok = match (&behavior.auth, &authed_user) {
                (Some((user, password)), Some(given_user)) => {
                    given_user == user && pass == password
                }
                _ => false,
            };
            if ok {
                writer.write_all(b"281 authentication accepted\r\n").await?;
            } else {
                writer.write_all(b"481 authentication failed\r\n").await?;
            }
        } else if let Some(id) = command.strip_prefix("BODY ") {
            let bare = id.trim().trim_start_matches('<').trim_end_matches('>');

            if let Some(partial) = behavior.truncated.get(bare) {
                writer
                    .write_all(format!("222 0 <{bare}> body follows\r\n").as_bytes())
                    .await?;
                writer.write_all(&dot_stuff(partial)).await?;
                // Drop without the terminator
                return Ok(());
            }

            match behavior.articles.get(bare) {
                Some(body) => {
                    bodies_served.fetch_add(1, Ordering::SeqCst);
                    writer
                        .write_all(format!("222 0 <{bare}> body follows\r\n").as_bytes())
                        .await?;
                    writer.write_all(&dot_stuff(body)).await?;
                    writer.write_all(b".\r\n").await?;
                }
                None => {
                    writer.write_all(b"430 no such article\r\n").await?;
                }
            }
        } else if command == "QUIT" {
            writer.write_all(b"205 goodbye\r\n").await?;
            return Ok(());
        } else {
            writer.write_all(b"500 command not recognized\r\n").await?;
        }
    }
}

/// Apply NNTP dot-stuffing and CRLF framing to an LF-lined body.
fn dot_stuff(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 64);
    let mut lines = body.split(|&b| b == b'\n').peekable();

    while let Some(line) = lines.next() {
        // A trailing LF produces one empty final chunk, not an empty line
        if line.is_empty() && lines.peek().is_none() {
            break;
        }
        if line.starts_with(b".") {
            out.push(b'.');
        }
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }

    out
}
