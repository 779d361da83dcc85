//! Engine tests against scripted fetchers and real assembly on disk.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::db::{Database, RuntimeState};
use crate::error::{Error, NntpError, Result};
use crate::extraction::ArchiveExtractor;
use crate::types::{DownloadOptions, Status};
use crate::yenc;

use super::{ArticleFetcher, Engine};

/// Fetcher serving canned articles, logging every requested message-id.
struct ScriptedFetcher {
    articles: HashMap<String, Vec<u8>>,
    log: std::sync::Mutex<Vec<String>>,
    /// When set, every fetch parks until the job is cancelled
    hold_until_cancel: bool,
}

impl ScriptedFetcher {
    fn new() -> Self {
        Self {
            articles: HashMap::new(),
            log: std::sync::Mutex::new(Vec::new()),
            hold_until_cancel: false,
        }
    }

    fn with_article(mut self, message_id: &str, body: Vec<u8>) -> Self {
        self.articles.insert(message_id.to_string(), body);
        self
    }

    fn holding() -> Self {
        Self {
            articles: HashMap::new(),
            log: std::sync::Mutex::new(Vec::new()),
            hold_until_cancel: true,
        }
    }

    fn requested(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl ArticleFetcher for ScriptedFetcher {
    async fn fetch_article(
        &self,
        cancel: &CancellationToken,
        message_id: &str,
    ) -> Result<Vec<u8>> {
        self.log
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(message_id.to_string());

        if self.hold_until_cancel {
            cancel.cancelled().await;
            return Err(Error::Nntp(NntpError::Cancelled));
        }

        match self.articles.get(message_id) {
            Some(body) => Ok(body.clone()),
            None => Err(Error::Nntp(NntpError::FetchExhausted {
                message_id: message_id.to_string(),
                attempts: 3,
                last: "no such article (430)".to_string(),
            })),
        }
    }
}

struct Harness {
    engine: Arc<Engine>,
    db: Arc<Database>,
    state: Arc<RuntimeState>,
    complete: std::path::PathBuf,
    _root: tempfile::TempDir,
}

async fn harness(fetcher: Arc<dyn ArticleFetcher>) -> Harness {
    let root = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.download.incomplete_dir = root.path().join("incomplete");
    config.download.complete_dir = root.path().join("complete");
    let complete = config.download.complete_dir.clone();

    let db = Arc::new(Database::in_memory().await.unwrap());
    let state = Arc::new(RuntimeState::new());
    let post = Arc::new(ArchiveExtractor::new(complete.clone(), Arc::clone(&state)));

    let engine = Arc::new(Engine::new(
        Arc::clone(&db),
        Arc::clone(&state),
        fetcher,
        post,
        Arc::new(config),
        Arc::new(Notify::new()),
    ));

    Harness {
        engine,
        db,
        state,
        complete,
        _root: root,
    }
}

/// Build an NZB document: one `<file>` per (filename, segments) entry.
fn nzb_xml(files: &[(&str, &[(u32, &str)])]) -> Vec<u8> {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <nzb xmlns=\"http://www.newzbin.com/DTD/2003/nzb\">\n",
    );

    for (filename, segments) in files {
        xml.push_str(&format!(
            "  <file poster=\"tester@example.com\" date=\"1700000000\" \
             subject=\"test post &quot;{filename}&quot; yEnc (1/{})\">\n",
            segments.len()
        ));
        xml.push_str("    <groups><group>alt.binaries.test</group></groups>\n    <segments>\n");
        for (number, message_id) in *segments {
            xml.push_str(&format!(
                "      <segment bytes=\"700\" number=\"{number}\">{message_id}</segment>\n"
            ));
        }
        xml.push_str("    </segments>\n  </file>\n");
    }

    xml.push_str("</nzb>\n");
    xml.into_bytes()
}

// -----------------------------------------------------------------------
// End-to-end scenarios
// -----------------------------------------------------------------------

#[tokio::test]
async fn single_segment_job_completes_with_exact_bytes() {
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .with_article("s1@test", yenc::encode("greeting.txt", b"Hello")),
    );
    let h = harness(fetcher).await;

    let id = h
        .engine
        .add_nzb(
            nzb_xml(&[("greeting.txt", &[(1, "s1@test")])]),
            DownloadOptions {
                name: Some("greeting-job".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    h.engine.drain_queue().await;

    let job = h.db.get_download(id).await.unwrap().unwrap();
    assert_eq!(job.status(), Status::Completed, "error: {:?}", job.error_msg);

    let delivered = h.complete.join("greeting-job").join("greeting.txt");
    let bytes = std::fs::read(&delivered).unwrap();
    assert_eq!(bytes, b"Hello");
    assert_eq!(bytes.len(), 5);

    assert_eq!(job.downloaded_bytes, 5);
    assert_eq!(job.done_segments, 1);
}

#[tokio::test]
async fn crc_mismatch_fails_the_job_and_delivers_nothing() {
    // Part 2 declares a pcrc32 that cannot match its payload
    let good = yenc::encode_part("data.bin", 1, 2, 1, 4, b"AAAA");
    let bad = {
        let article = yenc::encode_part("data.bin", 2, 2, 5, 8, b"BBBB");
        let text = String::from_utf8(article).unwrap();
        let start = text.find("pcrc32=").unwrap() + "pcrc32=".len();
        let mut corrupted = text.clone();
        corrupted.replace_range(start..start + 8, "00000000");
        corrupted.into_bytes()
    };

    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .with_article("p1@test", good)
            .with_article("p2@test", bad),
    );
    let h = harness(fetcher).await;

    let id = h
        .engine
        .add_nzb(
            nzb_xml(&[("data.bin", &[(1, "p1@test"), (2, "p2@test")])]),
            DownloadOptions {
                name: Some("crc-job".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    h.engine.drain_queue().await;

    let job = h.db.get_download(id).await.unwrap().unwrap();
    assert_eq!(job.status(), Status::Failed);
    assert!(
        job.error_msg.as_deref().unwrap_or("").contains("CRC"),
        "error should mention CRC: {:?}",
        job.error_msg
    );
    assert!(
        !h.complete.join("crc-job").exists(),
        "failed jobs deliver nothing to the complete directory"
    );
}

#[tokio::test]
async fn cancel_fails_the_job_exactly_once_with_the_literal_message() {
    let fetcher = Arc::new(ScriptedFetcher::holding());
    let h = harness(Arc::clone(&fetcher) as Arc<dyn ArticleFetcher>).await;

    let id = h
        .engine
        .add_nzb(
            nzb_xml(&[("held.bin", &[(1, "h1@test"), (2, "h2@test")])]),
            DownloadOptions::default(),
        )
        .await
        .unwrap();

    let driver = {
        let engine = Arc::clone(&h.engine);
        tokio::spawn(async move { engine.drain_queue().await })
    };

    // Wait until the job registered its cancel handle
    for _ in 0..200 {
        if h.engine.active_jobs.lock().await.contains_key(&id) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(h.engine.active_jobs.lock().await.contains_key(&id));

    assert!(h.engine.cancel_download(id).await.unwrap());
    driver.await.unwrap();

    let job = h.db.get_download(id).await.unwrap().unwrap();
    assert_eq!(job.status(), Status::Failed);
    assert_eq!(job.error_msg.as_deref(), Some("cancelled by user"));
    assert_eq!(job.downloaded_bytes, 0, "no progress after cancellation");

    // A second cancel is a no-op, not a second failure
    assert!(!h.engine.cancel_download(id).await.unwrap());
}

#[tokio::test]
async fn jobs_process_strictly_fifo() {
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .with_article("first@test", yenc::encode("first.bin", b"one"))
            .with_article("second@test", yenc::encode("second.bin", b"two")),
    );
    let h = harness(Arc::clone(&fetcher) as Arc<dyn ArticleFetcher>).await;

    h.engine
        .add_nzb(
            nzb_xml(&[("first.bin", &[(1, "first@test")])]),
            DownloadOptions {
                name: Some("job-one".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    h.engine
        .add_nzb(
            nzb_xml(&[("second.bin", &[(1, "second@test")])]),
            DownloadOptions {
                name: Some("job-two".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    h.engine.drain_queue().await;

    assert_eq!(
        fetcher.requested(),
        vec!["first@test".to_string(), "second@test".to_string()],
        "the older job's segments must be requested first"
    );
}

#[tokio::test]
async fn paused_engine_dispatches_nothing() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    let h = harness(Arc::clone(&fetcher) as Arc<dyn ArticleFetcher>).await;

    let id = h
        .engine
        .add_nzb(
            nzb_xml(&[("idle.bin", &[(1, "never@test")])]),
            DownloadOptions::default(),
        )
        .await
        .unwrap();

    h.state.set_paused(true);
    h.engine.drain_queue().await;

    assert!(fetcher.requested().is_empty(), "no fetches while paused");
    assert_eq!(
        h.db.get_download(id).await.unwrap().unwrap().status(),
        Status::Queued,
        "the job is untouched until resume"
    );
}

#[tokio::test]
async fn segments_are_written_in_ordinal_order() {
    // The NZB lists segments out of order; assembly must follow ordinals
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .with_article("o1@test", yenc::encode_part("ordered.bin", 1, 3, 1, 4, b"AAA,"))
            .with_article("o2@test", yenc::encode_part("ordered.bin", 2, 3, 5, 8, b"BBB,"))
            .with_article("o3@test", yenc::encode_part("ordered.bin", 3, 3, 9, 12, b"CCC.")),
    );
    let h = harness(fetcher).await;

    let id = h
        .engine
        .add_nzb(
            nzb_xml(&[(
                "ordered.bin",
                &[(3, "o3@test"), (1, "o1@test"), (2, "o2@test")],
            )]),
            DownloadOptions {
                name: Some("ordered-job".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    h.engine.drain_queue().await;

    let job = h.db.get_download(id).await.unwrap().unwrap();
    assert_eq!(job.status(), Status::Completed, "error: {:?}", job.error_msg);

    let bytes = std::fs::read(h.complete.join("ordered-job").join("ordered.bin")).unwrap();
    assert_eq!(bytes, b"AAA,BBB,CCC.");
}

#[tokio::test]
async fn exhausted_article_fails_the_whole_job() {
    // Partial success is never reported: one dead article kills the job
    let fetcher = Arc::new(
        ScriptedFetcher::new()
            .with_article("ok@test", yenc::encode_part("half.bin", 1, 2, 1, 4, b"good")),
    );
    let h = harness(fetcher).await;

    let id = h
        .engine
        .add_nzb(
            nzb_xml(&[("half.bin", &[(1, "ok@test"), (2, "dead@test")])]),
            DownloadOptions::default(),
        )
        .await
        .unwrap();

    h.engine.drain_queue().await;

    let job = h.db.get_download(id).await.unwrap().unwrap();
    assert_eq!(job.status(), Status::Failed);
    assert!(job.error_msg.is_some());

    let history = h.db.list_history().await.unwrap();
    assert_eq!(history.len(), 1, "failed jobs are reachable in history");
}

#[tokio::test]
async fn add_nzb_rejects_malformed_descriptors() {
    let h = harness(Arc::new(ScriptedFetcher::new())).await;

    let err = h
        .engine
        .add_nzb(b"<nzb><file>".to_vec(), DownloadOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidNzb(_)), "got: {err}");

    assert!(h.db.list_queue().await.unwrap().is_empty());
}

#[tokio::test]
async fn remove_from_queue_deletes_queued_jobs() {
    let h = harness(Arc::new(ScriptedFetcher::new())).await;

    let id = h
        .engine
        .add_nzb(
            nzb_xml(&[("gone.bin", &[(1, "x@test")])]),
            DownloadOptions::default(),
        )
        .await
        .unwrap();

    assert!(h.engine.remove_from_queue(id).await.unwrap());
    assert!(h.db.get_download(id).await.unwrap().is_none());
}

#[tokio::test]
async fn driver_start_and_stop_round_trip() {
    let fetcher = Arc::new(
        ScriptedFetcher::new().with_article("d1@test", yenc::encode("drv.bin", b"driver")),
    );
    let h = harness(fetcher).await;

    h.engine.start().await;
    let id = h
        .engine
        .add_nzb(
            nzb_xml(&[("drv.bin", &[(1, "d1@test")])]),
            DownloadOptions {
                name: Some("driver-job".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    // The enqueue wake should get the job picked up without the 5 s tick
    for _ in 0..500 {
        let status = h.db.get_download(id).await.unwrap().unwrap().status();
        if status == Status::Completed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(
        h.db.get_download(id).await.unwrap().unwrap().status(),
        Status::Completed
    );

    h.engine.stop().await;
}
