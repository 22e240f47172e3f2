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
use std::io::Read;
use std::sync::Arc;

use bytes::Bytes;

use crate::log::{BigLog, IndexEntry, IndexReader, Reader};
use crate::service::{AppError, AppResult};

const INITIAL_BUF_SIZE: usize = 64 * 1024;

/// One scanned entry: its raw bytes plus the index metadata needed to
/// interpret them.
#[derive(Debug, Clone)]
pub struct ScanToken {
    pub bytes: Bytes,
    /// Absolute offset of the entry's first message.
    pub offset: i64,
    /// Number of offsets the entry covers; more than one means the bytes
    /// hold a message-set.
    pub odelta: u32,
}

/// Reads a log one index entry at a time, pairing a byte reader with an
/// index reader over the same position. Not thread-safe; wrap in a mutex
/// to share.
///
/// Bytes are pulled through a single buffer that each read fills as far
/// as it can, so one read typically serves many entries. Consumed bytes
/// are shifted out to reclaim space and the buffer doubles only when it
/// is full and the next entry still does not fit, up to the optional
/// cap.
#[derive(Debug)]
pub struct Scanner {
    r: Reader,
    ir: IndexReader,
    entries: VecDeque<IndexEntry>,
    buf: Vec<u8>,
    // consumed and filled high-water marks into buf
    start: usize,
    end: usize,
    max_buf_size: usize,
}

impl Scanner {
    /// Opens a scanner at `from`. The returned offset is where it really
    /// stands: the containing entry's start when `from` is embedded in a
    /// batched write.
    pub fn new(bl: &Arc<BigLog>, from: i64) -> AppResult<(Scanner, i64)> {
        let (r, positioned) = Reader::new(bl, from)?;
        let (ir, _) = IndexReader::new(bl, positioned)?;

        Ok((
            Scanner {
                r,
                ir,
                entries: VecDeque::new(),
                buf: vec![0u8; INITIAL_BUF_SIZE],
                start: 0,
                end: 0,
                max_buf_size: 0,
            },
            positioned,
        ))
    }

    /// Replaces the scan buffer, e.g. to start from something smaller
    /// than the default 64 KiB. An entry larger than the buffer replaces
    /// it with a bigger one unless capped by `set_max_buffer_size`.
    pub fn use_buffer(&mut self, buf: Vec<u8>) {
        self.buf = buf;
        self.start = 0;
        self.end = 0;
    }

    /// Caps buffer growth; an entry that still doesn't fit a full buffer
    /// of this size fails the scan with `EntryTooLong`. Zero means no
    /// limit.
    pub fn set_max_buffer_size(&mut self, size: usize) {
        self.max_buf_size = size;
    }

    /// Advances to the next entry. `None` means the end of the log for
    /// now: either no further index entry, or the entry's data hasn't
    /// reached the file yet (it may still sit in a write buffer). In
    /// both cases a later call can succeed.
    pub fn scan(&mut self) -> AppResult<Option<ScanToken>> {
        if self.entries.is_empty() {
            self.entries = self.ir.read_entries(2).into();
            if self.entries.is_empty() {
                return Ok(None);
            }
        }

        loop {
            let entry = *self.entries.front().expect("scanner entry buffer empty");
            let size = entry.size as usize;

            // enough buffered data for the entry
            if self.end - self.start >= size {
                let token = Bytes::copy_from_slice(&self.buf[self.start..self.start + size]);
                self.start += size;
                self.entries.pop_front();
                return Ok(Some(ScanToken {
                    bytes: token,
                    offset: entry.offset,
                    odelta: entry.odelta,
                }));
            }

            // shift pending data to the front when space is needed or
            // most of the buffer sits consumed
            if self.start > 0 && (self.end == self.buf.len() || self.start > self.buf.len() / 2) {
                self.buf.copy_within(self.start..self.end, 0);
                self.end -= self.start;
                self.start = 0;
            }

            // a full buffer that still doesn't hold the entry has to grow
            if self.end == self.buf.len() {
                if self.max_buf_size > 0 && self.buf.len() >= self.max_buf_size {
                    return Err(AppError::EntryTooLong);
                }

                let mut new_size = self.buf.len() * 2;
                if self.max_buf_size > 0 && new_size > self.max_buf_size {
                    new_size = self.max_buf_size;
                }
                self.buf.resize(new_size, 0);
            }

            let n = self.r.read(&mut self.buf[self.end..])?;
            self.end += n;

            if n == 0 {
                return Ok(None);
            }
        }
    }
}
