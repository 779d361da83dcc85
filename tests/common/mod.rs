//! Shared fixtures: a scripted loopback NNTP server and NZB builders.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

/// A minimal NNTP server: greeting, BODY with dot-stuffing, QUIT.
pub struct NntpFixture {
    pub addr: SocketAddr,
    pub connections: Arc<AtomicUsize>,
    pub bodies_served: Arc<AtomicUsize>,
}

impl NntpFixture {
    /// Serve the given articles (bare message-id → LF-lined body bytes).
    pub async fn start(articles: HashMap<String, Vec<u8>>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind fixture");
        let addr = listener.local_addr().expect("local addr");
        let connections = Arc::new(AtomicUsize::new(0));
        let bodies_served = Arc::new(AtomicUsize::new(0));

        let articles = Arc::new(articles);
        let accepted = Arc::clone(&connections);
        let served = Arc::clone(&bodies_served);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                accepted.fetch_add(1, Ordering::SeqCst);
                let articles = Arc::clone(&articles);
                let served = Arc::clone(&served);
                tokio::spawn(async move {
                    let _ = serve(stream, articles, served).await;
                });
            }
        });

        Self {
            addr,
            connections,
            bodies_served,
        }
    }

    /// A ServerConfig pointing at this fixture.
    pub fn server_config(&self, name: &str) -> nzbtunnel::ServerConfig {
        nzbtunnel::ServerConfig {
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

async fn serve(
    stream: TcpStream,
    articles: Arc<HashMap<String, Vec<u8>>>,
    served: Arc<AtomicUsize>,
) -> std::io::Result<()> {
    let (read_half, mut writer) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    writer.write_all(b"200 fixture news server ready\r\n").await?;

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await? == 0 {
            return Ok(());
        }
        let command = line.trim_end();

        if let Some(id) = command.strip_prefix("BODY ") {
            let bare = id.trim().trim_start_matches('<').trim_end_matches('>');
            match articles.get(bare) {
                Some(body) => {
                    served.fetch_add(1, Ordering::SeqCst);
                    writer
                        .write_all(format!("222 0 <{bare}> body follows\r\n").as_bytes())
                        .await?;
                    writer.write_all(&dot_stuff(body)).await?;
                    writer.write_all(b".\r\n").await?;
                }
                None => writer.write_all(b"430 no such article\r\n").await?,
            }
        } else if command == "QUIT" {
            writer.write_all(b"205 goodbye\r\n").await?;
            return Ok(());
        } else {
            writer.write_all(b"500 command not recognized\r\n").await?;
        }
    }
}

fn dot_stuff(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 64);
    let mut lines = body.split(|&b| b == b'\n').peekable();

    while let Some(line) = lines.next() {
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

/// Build a one-file NZB with the given segments.
pub fn nzb_for(filename: &str, segments: &[(u32, &str)]) -> Vec<u8> {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <nzb xmlns=\"http://www.newzbin.com/DTD/2003/nzb\">\n",
    );
    xml.push_str(&format!(
        "  <file poster=\"tester@example.com\" date=\"1700000000\" \
         subject=\"post &quot;{filename}&quot; yEnc (1/{})\">\n",
        segments.len()
    ));
    xml.push_str("    <groups><group>alt.binaries.test</group></groups>\n    <segments>\n");
    for (number, message_id) in segments {
        xml.push_str(&format!(
            "      <segment bytes=\"700\" number=\"{number}\">{message_id}</segment>\n"
        ));
    }
    xml.push_str("    </segments>\n  </file>\n</nzb>\n");
    xml.into_bytes()
}
