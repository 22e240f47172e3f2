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

//! The storage engine: an ordered sequence of segments addressed by one
//! globally increasing offset space, with cursors that cross segment
//! boundaries transparently and a coalescing change signal for tailing
//! readers.

mod index_reader;
mod info;
mod reader;
mod scanner;
mod segment;
mod streamer;
mod watcher;

pub use index_reader::{IndexEntry, IndexReader, IndexSection};
pub use info::{LogInfo, SegInfo};
pub use reader::Reader;
pub use scanner::{ScanToken, Scanner};
pub use streamer::{StreamDelta, Streamer};
pub use watcher::Watcher;

pub(crate) use segment::Segment;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::service::{AppError, AppResult};

/// Relative offset of `offset` within a segment starting at `base`.
/// Relative offsets are 1-based in the index encoding.
pub(crate) fn relative(offset: i64, base: i64) -> u32 {
    assert!(base <= offset, "base offset out of reach");
    (offset - base + 1) as u32
}

/// Absolute offset of a relative offset within a segment at `base`.
pub(crate) fn absolute(ro: u32, base: i64) -> i64 {
    ro as i64 + base - 1
}

/// Index of the segment covering `offset`: the last one whose base is at
/// or below it.
pub(crate) fn index_of_segment(segs: &[Arc<Segment>], offset: i64) -> Option<usize> {
    let i = segs.partition_point(|s| s.base_offset() <= offset);
    i.checked_sub(1)
}

fn index_of_segment_ts(segs: &[Arc<Segment>], ts: u32) -> Option<usize> {
    let i = segs.partition_point(|s| s.created_ts() <= ts);
    i.checked_sub(1)
}

/// An append-only log made of segments. Exactly one segment, the one
/// with the highest base offset, accepts writes; the others are sealed.
///
/// The log must outlive its cursors: close and delete refuse to run
/// while readers or watchers are registered, unless forced.
#[derive(Debug)]
pub struct BigLog {
    name: String,
    dir_path: PathBuf,
    bufio_size: usize,

    segs: RwLock<Vec<Arc<Segment>>>,
    // serializes writes, splits, trims and lifecycle transitions
    wmu: Mutex<()>,
    closed: AtomicBool,

    watchers: DashMap<u64, mpsc::Sender<()>>,
    readers: DashMap<u64, ()>,
    next_handle: AtomicU64,

    shutdown: CancellationToken,
}

impl BigLog {
    /// Creates a new log directory holding its first segment at base
    /// offset zero, then opens it.
    pub fn create(dir_path: &Path, max_index_entries: usize) -> AppResult<Arc<BigLog>> {
        fs::create_dir(dir_path)?;

        let seg = Segment::create(dir_path, max_index_entries, 0)?;
        seg.close()?;
        drop(seg);

        BigLog::open(dir_path)
    }

    /// Opens a log from disk by loading every `*.index` file in the
    /// directory. The 20-digit zero-padded naming makes lexicographic
    /// order equal base-offset order; the last segment becomes hot.
    pub fn open(dir_path: &Path) -> AppResult<Arc<BigLog>> {
        BigLog::open_with(dir_path, 0)
    }

    /// Opens a log routing hot-segment writes through a buffer of
    /// `bufio_size` bytes (0 writes straight through).
    pub fn open_with(dir_path: &Path, bufio_size: usize) -> AppResult<Arc<BigLog>> {
        let mut indexes: Vec<String> = fs::read_dir(dir_path)?
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| n.ends_with(".index"))
            .collect();

        if indexes.is_empty() {
            return Err(AppError::InvalidLog);
        }
        indexes.sort();

        let dir_path = dir_path.canonicalize()?;
        let mut segs = Vec::with_capacity(indexes.len());
        for index in &indexes {
            segs.push(Arc::new(Segment::load(&dir_path.join(index))?));
        }

        if bufio_size > 0 {
            if let Some(hot) = segs.last() {
                hot.buffer_writer(bufio_size)?;
            }
        }

        let name = dir_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let bl = Arc::new(BigLog {
            name,
            dir_path,
            bufio_size,
            segs: RwLock::new(segs),
            wmu: Mutex::new(()),
            closed: AtomicBool::new(false),
            watchers: DashMap::new(),
            readers: DashMap::new(),
            next_handle: AtomicU64::new(1),
            shutdown: CancellationToken::new(),
        });

        bl.start_dispatcher();
        Ok(bl)
    }

    /// Snapshot of the current segment list.
    pub(crate) fn segments(&self) -> Vec<Arc<Segment>> {
        self.segs.read().clone()
    }

    fn hot_segment(&self) -> Arc<Segment> {
        self.segs
            .read()
            .last()
            .cloned()
            .expect("biglog without segments")
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir_path(&self) -> &Path {
        &self.dir_path
    }

    /// Appends `b` as a single entry covering one offset.
    pub fn write(&self, b: &[u8]) -> AppResult<usize> {
        self.write_n(b, 1)
    }

    /// Appends `b` as a single entry covering `n` contiguous offsets.
    /// Splits into a fresh segment first when the hot one is full.
    pub fn write_n(&self, b: &[u8], n: u32) -> AppResult<usize> {
        let _g = self.wmu.lock();
        self.ensure_open()?;
        self.split_if_full()?;
        self.hot_segment().write_n(b, n)
    }

    /// Oldest available offset.
    pub fn oldest(&self) -> i64 {
        self.segs
            .read()
            .first()
            .map(|s| s.base_offset())
            .unwrap_or(0)
    }

    /// Latest written offset, -1 when the log holds no data yet.
    pub fn latest(&self) -> i64 {
        let segs = self.segs.read();
        let hot = match segs.last() {
            Some(s) => s,
            None => return -1,
        };

        if segs.len() == 1 && hot.next_ro() == 1 {
            return -1;
        }
        absolute(hot.next_ro() - 1, hot.base_offset())
    }

    /// First offset at or after time `t`.
    pub fn after(&self, t: SystemTime) -> AppResult<i64> {
        let ts = t
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as u32;

        let segs = self.segments();
        let i = index_of_segment_ts(&segs, ts).ok_or(AppError::OffsetNotFound)?;
        let l = segs[i].search_ts(ts);
        Ok(absolute(l.ro, segs[i].base_offset()))
    }

    /// Seals the hot segment and makes a fresh one at `latest + 1` the
    /// write target. The sealed segment's write buffer, if any, is
    /// flushed and its notify channel closed so the dispatcher rolls
    /// over.
    pub fn split(&self) -> AppResult<()> {
        let _g = self.wmu.lock();
        self.ensure_open()?;
        self.split_locked()
    }

    fn split_locked(&self) -> AppResult<()> {
        let hot = self.hot_segment();
        let seg = Arc::new(Segment::create(
            &self.dir_path,
            hot.max_index_entries(),
            self.latest() + 1,
        )?);

        hot.unbuffer_writer()?;
        hot.close_notify();

        if self.bufio_size > 0 {
            seg.buffer_writer(self.bufio_size)?;
        }

        self.segs.write().push(seg);
        Ok(())
    }

    fn split_if_full(&self) -> AppResult<()> {
        if self.hot_segment().is_full() {
            return self.split_locked();
        }
        Ok(())
    }

    /// Removes the oldest segment. Refuses on the only segment and on a
    /// segment that still has readers attached.
    pub fn trim(&self) -> AppResult<()> {
        let _g = self.wmu.lock();
        let mut segs = self.segs.write();

        if segs.len() < 2 {
            return Err(AppError::LastSegment);
        }

        segs[0].delete(false)?;
        segs.remove(0);
        Ok(())
    }

    /// Flushes the hot segment's buffered writer and syncs its files.
    pub fn sync(&self) -> AppResult<()> {
        let _g = self.wmu.lock();
        self.ensure_open()?;
        self.hot_segment().sync()
    }

    /// Frees all resources without touching persisted data. Fails with
    /// busy when readers or watchers are still registered, unless forced.
    pub fn close(&self, force: bool) -> AppResult<()> {
        let _g = self.wmu.lock();
        self.close_locked(force)
    }

    fn close_locked(&self, force: bool) -> AppResult<()> {
        if !force {
            if !self.watchers.is_empty() || !self.readers.is_empty() {
                return Err(AppError::Busy);
            }
            for s in self.segs.read().iter() {
                if s.is_busy() {
                    return Err(AppError::Busy);
                }
            }
        }

        for s in self.segs.read().iter() {
            if let Err(e) = s.close() {
                if !force {
                    return Err(e.ext());
                }
            }
        }

        self.segs.write().clear();
        self.watchers.clear();
        self.closed.store(true, Ordering::Release);
        self.shutdown.cancel();
        Ok(())
    }

    /// Closes the log and removes every file it owns on disk.
    pub fn delete(&self, force: bool) -> AppResult<()> {
        let _g = self.wmu.lock();

        if let Err(e) = self.close_locked(force) {
            if !force {
                return Err(e);
            }
        }

        fs::remove_dir_all(&self.dir_path)?;
        Ok(())
    }

    pub fn info(&self) -> AppResult<LogInfo> {
        let mut inf = LogInfo {
            name: self.name.clone(),
            path: self.dir_path.to_string_lossy().into_owned(),
            disk_size: 0,
            first_offset: self.oldest(),
            latest_offset: self.latest(),
            segments: Vec::new(),
            mod_time: chrono::Local::now(),
        };

        for seg in self.segments() {
            let si = seg.info()?;
            inf.disk_size += si.disk_size;
            inf.mod_time = si.mod_time;
            inf.segments.push(si);
        }
        Ok(inf)
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(AppError::InvalidLog);
        }
        Ok(())
    }

    /// Segment holding `offset` plus the exact relative offset within
    /// it. Embedded-offset conditions are left to `Segment::lookup`.
    pub(crate) fn locate_offset(&self, offset: i64) -> AppResult<(Arc<Segment>, u32)> {
        if offset < 0 {
            return Err(AppError::OffsetNotFound);
        }

        let segs = self.segments();
        let i = index_of_segment(&segs, offset).ok_or(AppError::OffsetNotFound)?;
        let seg = segs[i].clone();

        let ro = relative(offset, seg.base_offset());
        if ro > seg.next_ro() {
            return Err(AppError::OffsetNotFound);
        }
        Ok((seg, ro))
    }

    pub(crate) fn register_reader(&self) -> u64 {
        let id = self.next_handle.fetch_add(1, Ordering::AcqRel);
        self.readers.insert(id, ());
        id
    }

    pub(crate) fn unregister_reader(&self, id: u64) {
        self.readers.remove(&id);
    }

    pub(crate) fn register_watcher(&self, tx: mpsc::Sender<()>) -> u64 {
        let id = self.next_handle.fetch_add(1, Ordering::AcqRel);
        self.watchers.insert(id, tx);
        id
    }

    pub(crate) fn unregister_watcher(&self, id: u64) {
        self.watchers.remove(&id);
    }

    /// The dispatcher drains the hot segment's notify channel and fans
    /// wake-ups out to every watcher, never blocking on a slow one: each
    /// watcher channel holds one coalesced signal at most. When the hot
    /// segment's channel closes after a split, the dispatcher re-reads
    /// the hot segment pointer and keeps going.
    fn start_dispatcher(self: &Arc<Self>) {
        let bl = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let rx = {
                    let segs = bl.segs.read();
                    match segs.last() {
                        Some(hot) => hot.take_notify_rx(),
                        None => None,
                    }
                };

                let Some(mut rx) = rx else {
                    debug!("notification dispatcher for {} stopping", bl.name);
                    return;
                };

                loop {
                    tokio::select! {
                        _ = bl.shutdown.cancelled() => return,
                        msg = rx.recv() => match msg {
                            Some(()) => {
                                for w in bl.watchers.iter() {
                                    let _ = w.value().try_send(());
                                }
                            }
                            // hot segment sealed, re-read the pointer
                            None => break,
                        }
                    }
                }
            }
        });
    }
}
