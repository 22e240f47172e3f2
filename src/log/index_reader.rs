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

use std::io::SeekFrom;
use std::sync::Arc;

use crate::log::segment::ENTRY_WIDTH;
use crate::log::{absolute, index_of_segment, BigLog, Segment};
use crate::service::{AppError, AppResult};

/// One decoded index entry.
#[derive(Debug, Clone, Copy)]
pub struct IndexEntry {
    /// Unix timestamp of the write.
    pub timestamp: u32,
    /// Absolute offset of the entry's first message.
    pub offset: i64,
    /// Number of offsets the entry covers.
    pub odelta: u32,
    /// Bytes of data the entry maps.
    pub size: i64,
}

/// A run of consecutive index entries, used to drive a byte reader over
/// a bounded chunk of the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct IndexSection {
    /// Absolute offset of the first message in the section.
    pub offset: i64,
    /// Number of offsets in the section.
    pub odelta: i64,
    /// Number of index entries in the section.
    pub edelta: i64,
    /// Bytes of data the section maps.
    pub size: i64,
}

/// A positioned cursor over index entries, the entry-level counterpart
/// of `Reader`. Crosses segments transparently; the hot segment's write
/// position is sampled atomically so reads never block appends.
#[derive(Debug)]
pub struct IndexReader {
    bl: Arc<BigLog>,
    seg: Arc<Segment>,
    ifo: u32,
    handle: u64,
}

impl IndexReader {
    /// Opens an index reader at `from`; the returned offset is the entry
    /// start actually positioned at (see `Reader::new`).
    pub fn new(bl: &Arc<BigLog>, from: i64) -> AppResult<(IndexReader, i64)> {
        let (seg, ro) = bl.locate_offset(from)?;
        let l = seg.lookup(ro)?;

        let positioned = if l.is_embedded() {
            from - (l.ro - l.found_ro) as i64
        } else {
            from
        };

        seg.inc_readers();
        let handle = bl.register_reader();

        Ok((
            IndexReader {
                bl: Arc::clone(bl),
                seg,
                ifo: l.ifo,
                handle,
            },
            positioned,
        ))
    }

    /// Reads up to `n` entries, fewer when the index is exhausted. An
    /// empty result means end of index for now.
    pub fn read_entries(&mut self, n: usize) -> Vec<IndexEntry> {
        let mut entries = Vec::with_capacity(n);
        for _ in 0..n {
            if !self.jump_seg() {
                break;
            }

            let (e, next) = self.seg.entry_pair(self.ifo);
            entries.push(IndexEntry {
                timestamp: e.ts,
                offset: absolute(e.ro, self.seg.base_offset()),
                odelta: next.ro - e.ro,
                size: next.dfo - e.dfo,
            });

            self.ifo += ENTRY_WIDTH as u32;
        }
        entries
    }

    /// Accumulates entries while the running totals stay within both
    /// budgets. An empty section means end of index. When even the first
    /// entry exceeds a budget the caller must raise it, signalled by
    /// `NeedMoreOffsets` / `NeedMoreBytes`.
    pub fn read_section(&mut self, max_offsets: i64, max_bytes: i64) -> AppResult<IndexSection> {
        let mut sec = IndexSection::default();

        let mut first = true;
        while self.jump_seg() {
            let (e, next) = self.seg.entry_pair(self.ifo);
            let odelta = (next.ro - e.ro) as i64;
            let size = next.dfo - e.dfo;

            if sec.odelta + odelta > max_offsets {
                if first {
                    return Err(AppError::NeedMoreOffsets);
                }
                break;
            }
            if sec.size + size > max_bytes {
                if first {
                    return Err(AppError::NeedMoreBytes);
                }
                break;
            }

            if first {
                first = false;
                sec.offset = absolute(e.ro, self.seg.base_offset());
            }

            sec.edelta += 1;
            sec.odelta += odelta;
            sec.size += size;

            self.ifo += ENTRY_WIDTH as u32;
        }

        Ok(sec)
    }

    /// Offset position the cursor currently stands on.
    pub fn head(&self) -> i64 {
        let e = self.seg.entry_at(self.ifo);
        absolute(e.ro, self.seg.base_offset())
    }

    /// Repositions the cursor; all three whence modes are supported.
    pub fn seek(&mut self, pos: SeekFrom) -> AppResult<i64> {
        let offset = match pos {
            SeekFrom::Start(o) => o as i64,
            SeekFrom::Current(d) => self.head() + d,
            SeekFrom::End(d) => self.bl.latest() + d,
        };

        let (seg, ro) = self.bl.locate_offset(offset)?;
        let l = seg.lookup(ro)?;

        let positioned = if l.is_embedded() {
            offset - (l.ro - l.found_ro) as i64
        } else {
            offset
        };

        self.set_segment(seg);
        self.ifo = l.ifo;
        Ok(positioned)
    }

    /// Moves into following segments until one has an unread entry.
    /// Returns false at the end of the index.
    fn jump_seg(&mut self) -> bool {
        loop {
            if self.ifo < self.seg.next_ifo() {
                return true;
            }

            match self.next_seg() {
                Some(next) => {
                    self.set_segment(next);
                    self.ifo = 0;
                }
                None => return false,
            }
        }
    }

    fn next_seg(&self) -> Option<Arc<Segment>> {
        let segs = self.bl.segments();
        let i = index_of_segment(&segs, self.seg.base_offset())?;
        if i + 1 >= segs.len() {
            return None;
        }
        Some(segs[i + 1].clone())
    }

    fn set_segment(&mut self, seg: Arc<Segment>) {
        self.seg.dec_readers();
        seg.inc_readers();
        self.seg = seg;
    }
}

impl Drop for IndexReader {
    fn drop(&mut self) {
        self.seg.dec_readers();
        self.bl.unregister_reader(self.handle);
    }
}
