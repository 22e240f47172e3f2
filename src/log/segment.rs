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

//! One block of the log: a preallocated, memory-mapped index file next to
//! an append-only data file, named `<20-digit-base-offset>.{index,data}`.
//!
//! Terms used throughout the engine:
//! - RO: offset relative to the segment base, 1-based in the encoding
//! - iFO / dFO: byte position inside the index / data file
//! - next_ro / next_ifo / next_dfo: where the next write lands
//!
//! The index is sparse: one 16-byte entry per write, regardless of how
//! many offsets the write reserves. The entry at `next_ifo` is always the
//! fully formed next entry (`next_ro`, ts 0, `next_dfo`), so loading a
//! segment only needs to find the first zeroed slot.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI32, AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::{DateTime, Local};
use crossbeam_utils::atomic::AtomicCell;
use memmap2::MmapMut;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tracing::warn;

use crate::log::info::SegInfo;
use crate::service::{AppError, AppResult};

/// Byte width of one index entry: `relOffset:u32 | ts:u32 | dFO:u64`.
pub(crate) const ENTRY_WIDTH: usize = 16;

const INDEX_SUFFIX: &str = "index";
const DATA_SUFFIX: &str = "data";

fn index_file_name(base_offset: i64) -> String {
    format!("{base_offset:020}.{INDEX_SUFFIX}")
}

fn data_file_name(base_offset: i64) -> String {
    format!("{base_offset:020}.{DATA_SUFFIX}")
}

/// One raw index entry as stored on disk.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawEntry {
    pub ro: u32,
    pub ts: u32,
    pub dfo: i64,
}

fn write_entry(buf: &mut [u8], ro: u32, dfo: u64) {
    buf[0..4].copy_from_slice(&ro.to_be_bytes());
    buf[8..16].copy_from_slice(&dfo.to_be_bytes());
}

fn write_entry_ts(buf: &mut [u8], ts: u32) {
    buf[4..8].copy_from_slice(&ts.to_be_bytes());
}

fn read_entry(buf: &[u8]) -> RawEntry {
    RawEntry {
        ro: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
        ts: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        dfo: u64::from_be_bytes([
            buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
        ]) as i64,
    }
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as u32
}

/// Sink for the data file. The hot segment may write through a buffer,
/// sealed segments write straight to the file, closed segments reject
/// writes.
#[derive(Debug)]
enum SegmentWriter {
    Direct(File),
    Buffered(BufWriter<File>),
    Closed,
}

impl SegmentWriter {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            SegmentWriter::Direct(f) => f.write_all(buf),
            SegmentWriter::Buffered(w) => w.write_all(buf),
            SegmentWriter::Closed => Err(io::Error::new(
                io::ErrorKind::Other,
                "write on closed segment",
            )),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            SegmentWriter::Buffered(w) => w.flush(),
            _ => Ok(()),
        }
    }
}

/// Result of locating a relative offset in the index.
///
/// When `found_ro != ro` the requested offset is embedded inside a
/// batched write: the entry located is the one containing it, and the
/// caller has to decode the message-set to reach the exact message.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LookupResult {
    pub ro: u32,
    pub found_ro: u32,
    pub ts: u32,
    pub ifo: u32,
    pub dfo: i64,
}

impl LookupResult {
    pub fn is_embedded(&self) -> bool {
        self.found_ro != self.ro
    }
}

#[derive(Debug)]
pub(crate) struct Segment {
    base_offset: i64,
    index_path: PathBuf,
    data_path: PathBuf,

    index: RwLock<MmapMut>,
    index_size: u32,
    created_ts: u32,

    data_file: File,
    writer: Mutex<SegmentWriter>,

    readers: AtomicI32,

    next_ro: AtomicU32,
    next_ifo: AtomicU32,
    next_dfo: AtomicCell<i64>,

    notify_tx: Mutex<Option<mpsc::Sender<()>>>,
    notify_rx: Mutex<Option<mpsc::Receiver<()>>>,
}

impl Segment {
    /// Creates both files and loads the fresh segment. The index is
    /// preallocated to `max_index_entries * 16` bytes with its first
    /// entry set to (1, 0, 0).
    pub(crate) fn create(
        dir: &Path,
        max_index_entries: usize,
        base_offset: i64,
    ) -> AppResult<Segment> {
        let index_path = dir.join(index_file_name(base_offset));
        let data_path = dir.join(data_file_name(base_offset));

        let mut init = vec![0u8; max_index_entries * ENTRY_WIDTH];
        write_entry(&mut init, 1, 0);

        let mut f = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&index_path)?;
        f.write_all(&init)?;
        drop(f);

        OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&data_path)?;

        Segment::load(&index_path)
    }

    /// Loads a segment given the path to its index file. The data file
    /// path is derived from the base offset encoded in the name. Runs the
    /// partial-write health check before handing the segment out.
    pub(crate) fn load(index_path: &Path) -> AppResult<Segment> {
        let file_name = index_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let base_offset: i64 = file_name
            .strip_suffix(&format!(".{INDEX_SUFFIX}"))
            .filter(|stem| stem.len() == 20)
            .and_then(|stem| stem.parse().ok())
            .ok_or_else(|| AppError::LoadSegment(format!("invalid index name {file_name:?}")))?;

        let dir = index_path.parent().unwrap_or_else(|| Path::new("."));
        let data_path = dir.join(data_file_name(base_offset));

        let index_file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(index_path)
            .map_err(|e| AppError::LoadSegment(format!("{}: {e}", index_path.display())))?;

        // mapped shared read/write so entries written here are visible to
        // every reader of the same file
        let index = unsafe { MmapMut::map_mut(&index_file) }
            .map_err(|e| AppError::LoadSegment(format!("can't mmap index: {e}")))?;
        let index_size = index.len() as u32;

        let nifo = index_of_next(&index);
        let next = read_entry(&index[nifo..]);
        let created_ts = read_entry(&index[..ENTRY_WIDTH]).ts;

        health_check_partial_write(&data_path, next.dfo)?;

        let data_file = OpenOptions::new()
            .read(true)
            .open(&data_path)
            .map_err(|e| AppError::LoadSegment(format!("{}: {e}", data_path.display())))?;
        let append_file = OpenOptions::new().append(true).open(&data_path)?;

        let (tx, rx) = mpsc::channel(1);

        Ok(Segment {
            base_offset,
            index_path: index_path.to_path_buf(),
            data_path,
            index: RwLock::new(index),
            index_size,
            created_ts,
            data_file,
            writer: Mutex::new(SegmentWriter::Direct(append_file)),
            readers: AtomicI32::new(0),
            next_ro: AtomicU32::new(next.ro),
            next_ifo: AtomicU32::new(nifo as u32),
            next_dfo: AtomicCell::new(next.dfo),
            notify_tx: Mutex::new(Some(tx)),
            notify_rx: Mutex::new(Some(rx)),
        })
    }

    pub(crate) fn base_offset(&self) -> i64 {
        self.base_offset
    }

    pub(crate) fn created_ts(&self) -> u32 {
        self.created_ts
    }

    pub(crate) fn next_ro(&self) -> u32 {
        self.next_ro.load(Ordering::Acquire)
    }

    pub(crate) fn next_ifo(&self) -> u32 {
        self.next_ifo.load(Ordering::Acquire)
    }

    pub(crate) fn next_dfo(&self) -> i64 {
        self.next_dfo.load()
    }

    pub(crate) fn max_index_entries(&self) -> usize {
        self.index_size as usize / ENTRY_WIDTH
    }

    /// Reads into `buf` from the data file at byte offset `off`. Returns
    /// 0 at end of data.
    pub(crate) fn read_at(&self, buf: &mut [u8], off: i64) -> io::Result<usize> {
        self.data_file.read_at(buf, off as u64)
    }

    /// Appends `b` covering `n` offsets, then records the index entry.
    pub(crate) fn write_n(&self, b: &[u8], n: u32) -> AppResult<usize> {
        if self.is_full() {
            return Err(AppError::SegmentFull);
        }

        self.writer.lock().write_all(b)?;
        self.update_index(n, b.len() as i64);
        Ok(b.len())
    }

    /// Stamps the entry at `next_ifo`, advances the write position and
    /// writes the new next entry. The `next_ifo` advance is atomic since
    /// index readers sample it without taking the index lock.
    fn update_index(&self, entries: u32, length: i64) {
        let nro = self.next_ro.load(Ordering::Acquire);
        assert!(nro > 0, "zero next relative offset");

        let mut index = self.index.write();
        let ifo = self.next_ifo.load(Ordering::Acquire) as usize;

        write_entry_ts(&mut index[ifo..], unix_now());

        let new_ro = nro + entries;
        let new_dfo = self.next_dfo.load() + length;
        self.next_ro.store(new_ro, Ordering::Release);
        self.next_dfo.store(new_dfo);
        self.next_ifo
            .store((ifo + ENTRY_WIDTH) as u32, Ordering::Release);

        write_entry(&mut index[ifo + ENTRY_WIDTH..], new_ro, new_dfo as u64);
        drop(index);

        if let Some(tx) = self.notify_tx.lock().as_ref() {
            let _ = tx.try_send(());
        }
    }

    /// Locates `ro` in the index. The direct-indexed slot is tried first:
    /// without batching every relative offset sits exactly at
    /// `(ro-1) * 16`, making the lookup O(1). Batched logs fall back to
    /// binary search and may report an embedded offset.
    pub(crate) fn lookup(&self, ro: u32) -> AppResult<LookupResult> {
        if ro == 0 {
            return Err(AppError::InvalidRelOffset);
        }
        if ro > self.next_ro() {
            return Err(AppError::OffsetNotFound);
        }

        let index = self.index.read();

        let max_ifo = (ro as usize - 1) * ENTRY_WIDTH;
        if max_ifo + ENTRY_WIDTH <= self.index_size as usize {
            let e = read_entry(&index[max_ifo..]);
            if e.ro == ro {
                return Ok(LookupResult {
                    ro,
                    found_ro: ro,
                    ts: e.ts,
                    ifo: max_ifo as u32,
                    dfo: e.dfo,
                });
            }

            // more entries than offsets can not happen on a well-formed index
            assert!(
                e.ro == 0 || e.ro >= ro - 1,
                "relative offset found too far ahead in the index"
            );
        }

        let i = index_of_ro(&index, ro);
        let e = read_entry(&index[i..]);
        Ok(LookupResult {
            ro,
            found_ro: e.ro,
            ts: e.ts,
            ifo: i as u32,
            dfo: e.dfo,
        })
    }

    /// First entry whose timestamp is at or after `ts`. Timestamps come
    /// from the index so the result is never embedded.
    pub(crate) fn search_ts(&self, ts: u32) -> LookupResult {
        let index = self.index.read();
        let total = self.index_size as usize / ENTRY_WIDTH;

        let i = search(total, |i| {
            let e = read_entry(&index[i * ENTRY_WIDTH..]);
            e.ts >= ts || e.ts == 0
        })
        .min(total - 1);

        let e = read_entry(&index[i * ENTRY_WIDTH..]);
        LookupResult {
            ro: e.ro,
            found_ro: e.ro,
            ts: e.ts,
            ifo: (i * ENTRY_WIDTH) as u32,
            dfo: e.dfo,
        }
    }

    /// Single entry at `ifo`.
    pub(crate) fn entry_at(&self, ifo: u32) -> RawEntry {
        let index = self.index.read();
        read_entry(&index[ifo as usize..])
    }

    /// Entry at `ifo` together with its successor; the successor's fields
    /// provide the offset and byte deltas. `ifo` must be below `next_ifo`.
    pub(crate) fn entry_pair(&self, ifo: u32) -> (RawEntry, RawEntry) {
        let index = self.index.read();
        let i = ifo as usize;
        (
            read_entry(&index[i..]),
            read_entry(&index[i + ENTRY_WIDTH..]),
        )
    }

    /// True when the index has no room for another write.
    pub(crate) fn is_full(&self) -> bool {
        self.next_ifo() + ENTRY_WIDTH as u32 >= self.index_size
    }

    pub(crate) fn is_busy(&self) -> bool {
        self.readers.load(Ordering::Acquire) > 0
    }

    pub(crate) fn inc_readers(&self) {
        self.readers.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn dec_readers(&self) {
        self.readers.fetch_sub(1, Ordering::AcqRel);
    }

    /// Routes subsequent writes through a buffer of `size` bytes.
    pub(crate) fn buffer_writer(&self, size: usize) -> AppResult<()> {
        let append_file = OpenOptions::new().append(true).open(&self.data_path)?;
        *self.writer.lock() = SegmentWriter::Buffered(BufWriter::with_capacity(size, append_file));
        Ok(())
    }

    /// Flushes any write buffer and reverts to direct writes. Called when
    /// the segment stops being hot.
    pub(crate) fn unbuffer_writer(&self) -> AppResult<()> {
        let mut w = self.writer.lock();
        if let SegmentWriter::Buffered(_) = &*w {
            w.flush()?;
            let append_file = OpenOptions::new().append(true).open(&self.data_path)?;
            *w = SegmentWriter::Direct(append_file);
        }
        Ok(())
    }

    /// Flushes data and index to disk synchronously.
    pub(crate) fn sync(&self) -> AppResult<()> {
        self.writer.lock().flush()?;
        self.data_file.sync_all()?;
        self.index.write().flush()?;
        Ok(())
    }

    /// Closes the segment unless it still has readers attached.
    pub(crate) fn close(&self) -> AppResult<()> {
        if self.is_busy() {
            return Err(AppError::SegmentBusy);
        }

        let mut w = self.writer.lock();
        let flush_res = w.flush();
        *w = SegmentWriter::Closed;
        flush_res?;
        Ok(())
    }

    /// Closes the segment and unlinks both files. `force` ignores a busy
    /// close and deletes the data anyway.
    pub(crate) fn delete(&self, force: bool) -> AppResult<()> {
        if let Err(e) = self.close() {
            if !force {
                return Err(e);
            }
        }

        fs::remove_file(&self.index_path)?;
        fs::remove_file(&self.data_path)?;
        Ok(())
    }

    /// Hands the notify receiver to the notification dispatcher. Each
    /// segment's receiver is taken at most once, while it is hot.
    pub(crate) fn take_notify_rx(&self) -> Option<mpsc::Receiver<()>> {
        self.notify_rx.lock().take()
    }

    /// Drops the notify sender; the dispatcher observes the closed
    /// channel and moves on to the new hot segment.
    pub(crate) fn close_notify(&self) {
        self.notify_tx.lock().take();
    }

    pub(crate) fn info(&self) -> AppResult<SegInfo> {
        let ifi = fs::metadata(&self.index_path)?;
        let dfi = fs::metadata(&self.data_path)?;

        Ok(SegInfo {
            first_offset: self.base_offset,
            disk_size: (ifi.len() + dfi.len()) as i64,
            data_size: dfi.len() as i64,
            mod_time: DateTime::<Local>::from(dfi.modified()?),
        })
    }
}

/// Smallest `i` in `0..total` satisfying `pred`, assuming `pred` flips
/// from false to true exactly once; `total` when it never does.
fn search(total: usize, pred: impl Fn(usize) -> bool) -> usize {
    let mut lo = 0;
    let mut hi = total;
    while lo < hi {
        let mid = (lo + hi) / 2;
        if pred(mid) {
            hi = mid;
        } else {
            lo = mid + 1;
        }
    }
    lo
}

/// Byte position of the next writable entry: one before the first entry
/// whose relative offset is still zero.
fn index_of_next(index: &[u8]) -> usize {
    let total = index.len() / ENTRY_WIDTH;
    let i = search(total, |i| read_entry(&index[i * ENTRY_WIDTH..]).ro == 0);
    (i - 1) * ENTRY_WIDTH
}

/// Byte position of the entry containing `ro`: the last entry with a
/// relative offset at or below it.
fn index_of_ro(index: &[u8], ro: u32) -> usize {
    let total = index.len() / ENTRY_WIDTH;
    let i = search(total, |i| {
        let e = read_entry(&index[i * ENTRY_WIDTH..]);
        e.ro > ro || e.ro == 0
    });
    (i - 1) * ENTRY_WIDTH
}

/// If the process died after appending data but before the index entry
/// was recorded, the data file is longer than the index's high-water
/// mark. Rebuild it from the known-good prefix so the next append lands
/// where the index expects it.
fn health_check_partial_write(data_path: &Path, next_dfo: i64) -> AppResult<()> {
    let len = fs::metadata(data_path)?.len() as i64;
    if next_dfo >= len {
        return Ok(());
    }

    warn!(
        "data file {} bytes larger than index, rebuilding {}",
        len - next_dfo,
        data_path.display()
    );

    let tmp_path = data_path.with_extension("data.temp");
    let src = File::open(data_path)?;
    let mut dst = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)?;
    io::copy(&mut src.take(next_dfo as u64), &mut dst)?;
    dst.sync_all()?;
    drop(dst);

    fs::rename(&tmp_path, data_path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn seg(dir: &Path, entries: usize) -> Segment {
        Segment::create(dir, entries, 0).unwrap()
    }

    #[tokio::test]
    async fn create_initializes_the_index_head() {
        let dir = tempdir().unwrap();
        let s = seg(dir.path(), 64);

        assert_eq!(s.base_offset(), 0);
        assert_eq!(s.next_ro(), 1);
        assert_eq!(s.next_ifo(), 0);
        assert_eq!(s.next_dfo(), 0);
        assert!(!s.is_full());
    }

    #[tokio::test]
    async fn write_n_appends_and_indexes() {
        let dir = tempdir().unwrap();
        let s = seg(dir.path(), 64);

        s.write_n(b"0123456789", 1).unwrap();
        assert_eq!(s.next_ro(), 2);
        assert_eq!(s.next_ifo(), 16);
        assert_eq!(s.next_dfo(), 10);

        s.write_n(b"abcde", 5).unwrap();
        assert_eq!(s.next_ro(), 7);
        assert_eq!(s.next_dfo(), 15);

        let mut buf = [0u8; 15];
        let n = s.read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf[..n], b"0123456789abcde");
    }

    #[tokio::test]
    async fn the_next_entry_is_always_formed() {
        let dir = tempdir().unwrap();
        let s = seg(dir.path(), 64);
        s.write_n(b"xxxx", 1).unwrap();
        s.write_n(b"yy", 1).unwrap();

        let (e, _) = s.entry_pair(s.next_ifo());
        assert_eq!(e.ro, s.next_ro());
        assert_eq!(e.ts, 0);
        assert_eq!(e.dfo, s.next_dfo());
    }

    #[tokio::test]
    async fn lookup_is_direct_for_unbatched_writes() {
        let dir = tempdir().unwrap();
        let s = seg(dir.path(), 64);
        for i in 0..5u8 {
            s.write_n(&[i; 4], 1).unwrap();
        }

        let l = s.lookup(3).unwrap();
        assert!(!l.is_embedded());
        assert_eq!(l.found_ro, 3);
        assert_eq!(l.dfo, 8);
        assert_eq!(l.ifo, 32);
        assert!(l.ts > 0);
    }

    #[tokio::test]
    async fn lookup_reports_embedded_offsets() {
        let dir = tempdir().unwrap();
        let s = seg(dir.path(), 64);
        s.write_n(b"single", 1).unwrap();
        s.write_n(b"a-batch-of-four", 4).unwrap();
        s.write_n(b"tail", 1).unwrap();

        // offset 3 lives inside the batch starting at relative offset 2
        let l = s.lookup(3).unwrap();
        assert!(l.is_embedded());
        assert_eq!(l.found_ro, 2);
        assert_eq!(l.dfo, 6);

        let l = s.lookup(6).unwrap();
        assert!(!l.is_embedded());
        assert_eq!(l.dfo, 21);
    }

    #[tokio::test]
    async fn lookup_rejects_bad_offsets() {
        let dir = tempdir().unwrap();
        let s = seg(dir.path(), 64);
        s.write_n(b"data", 1).unwrap();

        assert!(matches!(s.lookup(0), Err(AppError::InvalidRelOffset)));
        assert!(matches!(s.lookup(9), Err(AppError::OffsetNotFound)));
    }

    #[tokio::test]
    async fn segment_fills_up() {
        let dir = tempdir().unwrap();
        let s = seg(dir.path(), 3);

        s.write_n(b"a", 1).unwrap();
        assert!(!s.is_full());
        s.write_n(b"b", 1).unwrap();
        assert!(s.is_full());
        assert!(matches!(s.write_n(b"c", 1), Err(AppError::SegmentFull)));
    }

    #[tokio::test]
    async fn reload_restores_the_write_position() {
        let dir = tempdir().unwrap();
        let index_path;
        {
            let s = seg(dir.path(), 64);
            s.write_n(b"0123456789", 2).unwrap();
            s.write_n(b"ab", 1).unwrap();
            index_path = s.index_path.clone();
        }

        let s = Segment::load(&index_path).unwrap();
        assert_eq!(s.next_ro(), 4);
        assert_eq!(s.next_ifo(), 32);
        assert_eq!(s.next_dfo(), 12);

        s.write_n(b"cd", 1).unwrap();
        assert_eq!(s.next_dfo(), 14);
    }

    #[tokio::test]
    async fn load_rejects_malformed_names() {
        let dir = tempdir().unwrap();
        let bogus = dir.path().join("not-a-segment.index");
        fs::write(&bogus, vec![0u8; 64]).unwrap();
        assert!(matches!(
            Segment::load(&bogus),
            Err(AppError::LoadSegment(_))
        ));
    }

    #[tokio::test]
    async fn partial_write_is_truncated_on_load() {
        let dir = tempdir().unwrap();
        let (index_path, data_path);
        {
            let s = seg(dir.path(), 64);
            s.write_n(b"full-entry", 1).unwrap();
            index_path = s.index_path.clone();
            data_path = s.data_path.clone();
        }

        // simulate dying between the data append and the index update
        let mut f = OpenOptions::new().append(true).open(&data_path).unwrap();
        f.write_all(b"orphan bytes").unwrap();
        drop(f);

        let s = Segment::load(&index_path).unwrap();
        assert_eq!(s.next_dfo(), 10);
        assert_eq!(fs::metadata(&data_path).unwrap().len(), 10);
    }

    #[tokio::test]
    async fn busy_segment_refuses_to_close() {
        let dir = tempdir().unwrap();
        let s = seg(dir.path(), 64);
        s.inc_readers();
        assert!(matches!(s.close(), Err(AppError::SegmentBusy)));
        s.dec_readers();
        s.close().unwrap();
    }

    #[tokio::test]
    async fn delete_removes_both_files() {
        let dir = tempdir().unwrap();
        let s = seg(dir.path(), 64);
        let (ip, dp) = (s.index_path.clone(), s.data_path.clone());
        s.delete(false).unwrap();
        assert!(!ip.exists());
        assert!(!dp.exists());
    }

    #[tokio::test]
    async fn search_ts_finds_the_first_entry_at_or_after() {
        let dir = tempdir().unwrap();
        let s = seg(dir.path(), 64);
        s.write_n(b"aa", 1).unwrap();
        s.write_n(b"bb", 1).unwrap();

        // every entry was stamped "now"; searching from 0 hits the first
        let l = s.search_ts(0);
        assert_eq!(l.ro, 1);

        // searching past all timestamps lands on the next-write sentinel
        let l = s.search_ts(u32::MAX);
        assert_eq!(l.ro, s.next_ro());
    }
}
