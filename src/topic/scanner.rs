// Copyright 2026 The stonelog Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::VecDeque;
use std::fs::{self, OpenOptions};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crossbeam_utils::atomic::AtomicCell;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;

use crate::log::{BigLog, Scanner, Watcher};
use crate::message::Message;
use crate::service::{AppError, AppResult};

/// Offset state of a scanner as reported to clients.
#[derive(Debug, Clone, Serialize)]
pub struct ScannerInfo {
    pub id: String,
    /// Next offset the scanner will read: one past the last consumed
    /// one, jumped forward when the log was trimmed underneath it.
    pub next: i64,
    pub from: i64,
    #[serde(rename = "persistent")]
    pub persist: bool,
}

/// A cursor yielding one logical message at a time. Message-sets are
/// decoded transparently, and at the end of the log a scan suspends
/// until new data arrives or the caller cancels. Thread-safe.
pub enum TopicScanner {
    Direct(LogScanner),
    Persistent(PersistentScanner),
}

impl TopicScanner {
    pub(crate) async fn new(
        bl: &Arc<BigLog>,
        readers_dir: &Path,
        id: String,
        from: i64,
        persist: bool,
    ) -> AppResult<TopicScanner> {
        let scanner = LogScanner::new(bl, id, from).await?;

        if !persist {
            return Ok(TopicScanner::Direct(scanner));
        }
        Ok(TopicScanner::Persistent(PersistentScanner::new(
            readers_dir,
            scanner,
        )?))
    }

    pub fn id(&self) -> &str {
        match self {
            TopicScanner::Direct(s) => &s.id,
            TopicScanner::Persistent(p) => &p.inner.id,
        }
    }

    /// Next message and its offset. Blocks at the tail until data
    /// arrives or `cancel` fires; cancellation with nothing buffered
    /// surfaces as `EndOfTopic`.
    pub async fn scan(&self, cancel: &CancellationToken) -> AppResult<(Message, i64)> {
        match self {
            TopicScanner::Direct(s) => s.scan(cancel).await,
            TopicScanner::Persistent(p) => p.scan(cancel).await,
        }
    }

    pub fn info(&self) -> ScannerInfo {
        match self {
            TopicScanner::Direct(s) => s.info(false),
            TopicScanner::Persistent(p) => p.inner.info(true),
        }
    }

    pub fn close(&self) -> AppResult<()> {
        match self {
            TopicScanner::Direct(_) => Ok(()),
            TopicScanner::Persistent(p) => p.close(),
        }
    }
}

struct ScanState {
    sc: Scanner,
    wc: Watcher,
    // decoded remainder of the last message-set
    messages: VecDeque<Message>,
}

/// Scanner over one log. The mutex serializes scans, the message-set
/// buffer lives behind it; `last` is kept outside so `info` never waits
/// on a blocked scan.
pub struct LogScanner {
    id: String,
    from: i64,
    bl: Arc<BigLog>,
    last: AtomicCell<i64>,
    state: tokio::sync::Mutex<ScanState>,
}

impl LogScanner {
    async fn new(bl: &Arc<BigLog>, id: String, from: i64) -> AppResult<LogScanner> {
        let (sc, positioned) = Scanner::new(bl, from)?;

        let scanner = LogScanner {
            id,
            from,
            bl: Arc::clone(bl),
            last: AtomicCell::new(-1),
            state: tokio::sync::Mutex::new(ScanState {
                sc,
                wc: Watcher::new(bl),
                messages: VecDeque::new(),
            }),
        };

        // an embedded start lands on the enclosing entry, scan forward
        // inside the local message-set until `from` is next
        if positioned != from {
            scanner.scan_forward(from).await?;
        }

        Ok(scanner)
    }

    async fn scan_forward(&self, target: i64) -> AppResult<()> {
        let cancel = CancellationToken::new();
        loop {
            let (_, offset) = self.scan(&cancel).await?;
            if offset + 1 == target {
                return Ok(());
            }
        }
    }

    async fn scan(&self, cancel: &CancellationToken) -> AppResult<(Message, i64)> {
        let mut st = self.state.lock().await;

        loop {
            if let Some(m) = st.messages.pop_front() {
                let offset = self.last.load();
                self.last.store(offset + 1);
                return Ok((m, offset));
            }

            match st.sc.scan()? {
                Some(tok) => {
                    self.last.store(tok.offset);

                    if tok.odelta == 1 {
                        return Ok((Message::from_bytes(tok.bytes), tok.offset));
                    }

                    let set = Message::from_bytes(tok.bytes);
                    st.messages = set.unpack()?.into();
                }
                None => {
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(AppError::EndOfTopic),
                        _ = st.wc.changed() => {}
                    }
                }
            }
        }
    }

    fn info(&self, persist: bool) -> ScannerInfo {
        let last = self.last.load();
        let next = if last < 0 { self.from } else { last + 1 };

        ScannerInfo {
            id: self.id.clone(),
            next: next.max(self.bl.oldest()),
            from: self.from,
            persist,
        }
    }
}

/// Wraps a scanner and tracks its last consumed offset in an 8-byte file
/// under the topic's readers directory. Persistence is best-effort: the
/// offset is pushed through a bounded channel and written by a
/// background task, overflow just skips an update.
pub struct PersistentScanner {
    inner: LogScanner,
    fpath: PathBuf,
    oc: mpsc::Sender<i64>,
}

impl PersistentScanner {
    fn new(readers_dir: &Path, inner: LogScanner) -> AppResult<PersistentScanner> {
        fs::create_dir_all(readers_dir).map_err(|e| {
            error!("can't create readers dir: {e}");
            AppError::InvalidDir
        })?;

        let fpath = readers_dir.join(format!("{}.scanner", inner.id));
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&fpath)
            .map_err(|e| {
                error!("can't open scanner file: {e}");
                AppError::InvalidDir
            })?;

        let (oc, mut rx) = mpsc::channel::<i64>(100);
        let id = inner.id.clone();
        tokio::spawn(async move {
            while let Some(offset) = rx.recv().await {
                if let Err(e) = file.write_at(&offset.to_be_bytes(), 0) {
                    error!("failed to persist scanner {id}: {e}");
                }
            }
        });

        Ok(PersistentScanner { inner, fpath, oc })
    }

    async fn scan(&self, cancel: &CancellationToken) -> AppResult<(Message, i64)> {
        let (m, offset) = self.inner.scan(cancel).await?;
        let _ = self.oc.try_send(offset);
        Ok((m, offset))
    }

    fn close(&self) -> AppResult<()> {
        fs::remove_file(&self.fpath).map_err(|e| {
            error!("can't remove {}: {e}", self.fpath.display());
            AppError::from(e)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn cancel_after(d: Duration) -> CancellationToken {
        let token = CancellationToken::new();
        let t = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(d).await;
            t.cancel();
        });
        token
    }

    #[tokio::test]
    async fn scans_plain_messages_with_offsets() {
        let dir = tempdir().unwrap();
        let bl = BigLog::create(&dir.path().join("t"), 64).unwrap();
        for i in 0..3 {
            let m = Message::from_payload(format!("msg {i}").as_bytes());
            bl.write(m.bytes()).unwrap();
        }

        let sc = TopicScanner::new(&bl, &dir.path().join("t/readers"), "a".into(), 0, false)
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        for i in 0..3 {
            let (m, offset) = sc.scan(&cancel).await.unwrap();
            assert_eq!(offset, i);
            assert_eq!(m.payload(), format!("msg {i}").as_bytes());
        }
    }

    #[tokio::test]
    async fn cancelled_scan_at_the_tail_is_end_of_topic() {
        let dir = tempdir().unwrap();
        let bl = BigLog::create(&dir.path().join("t"), 64).unwrap();

        let sc = TopicScanner::new(&bl, &dir.path().join("t/readers"), "a".into(), 0, false)
            .await
            .unwrap();

        let cancel = cancel_after(Duration::from_millis(50));
        assert!(matches!(
            sc.scan(&cancel).await,
            Err(AppError::EndOfTopic)
        ));
    }

    #[tokio::test]
    async fn scan_wakes_up_for_new_data() {
        let dir = tempdir().unwrap();
        let bl = BigLog::create(&dir.path().join("t"), 64).unwrap();

        let sc = TopicScanner::new(&bl, &dir.path().join("t/readers"), "a".into(), 0, false)
            .await
            .unwrap();

        let writer = Arc::clone(&bl);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let m = Message::from_payload(b"late arrival");
            writer.write(m.bytes()).unwrap();
        });

        let cancel = cancel_after(Duration::from_secs(5));
        let (m, offset) = sc.scan(&cancel).await.unwrap();
        assert_eq!(offset, 0);
        assert_eq!(m.payload(), b"late arrival");
    }

    #[tokio::test]
    async fn info_reports_next_and_from() {
        let dir = tempdir().unwrap();
        let bl = BigLog::create(&dir.path().join("t"), 64).unwrap();
        for _ in 0..4 {
            let m = Message::from_payload(b"x");
            bl.write(m.bytes()).unwrap();
        }

        let sc = TopicScanner::new(&bl, &dir.path().join("t/readers"), "a".into(), 1, false)
            .await
            .unwrap();

        let info = sc.info();
        assert_eq!((info.next, info.from, info.persist), (1, 1, false));

        let cancel = CancellationToken::new();
        sc.scan(&cancel).await.unwrap();
        sc.scan(&cancel).await.unwrap();
        assert_eq!(sc.info().next, 3);
    }

    #[tokio::test]
    async fn persistent_scanner_writes_and_removes_its_file() {
        let dir = tempdir().unwrap();
        let bl = BigLog::create(&dir.path().join("t"), 64).unwrap();
        let readers = dir.path().join("t/readers");

        for _ in 0..2 {
            let m = Message::from_payload(b"payload");
            bl.write(m.bytes()).unwrap();
        }

        let sc = TopicScanner::new(&bl, &readers, "persist-me".into(), 0, true)
            .await
            .unwrap();
        let fpath = readers.join("persist-me.scanner");
        assert!(fpath.exists());
        assert!(sc.info().persist);

        let cancel = CancellationToken::new();
        sc.scan(&cancel).await.unwrap();
        sc.scan(&cancel).await.unwrap();

        // the drain task runs async, give it a moment
        tokio::time::sleep(Duration::from_millis(50)).await;
        let stored = fs::read(&fpath).unwrap();
        assert_eq!(i64::from_be_bytes(stored[..8].try_into().unwrap()), 1);

        sc.close().unwrap();
        assert!(!fpath.exists());
    }
}
