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

use std::io::{self, Read};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::log::{BigLog, IndexReader, Reader};
use crate::service::{AppError, AppResult};

struct StreamerInner {
    r: Reader,
    ir: IndexReader,
}

/// Slices a log into transferable chunks. `get` locks the streamer and
/// hands out one `StreamDelta` at a time; the lock is released when the
/// delta is put back (dropped). A delta abandoned mid-transfer leaves
/// the cursor where the reader stopped; a client that failed a transfer
/// must reopen at a known offset rather than resume.
pub struct Streamer {
    inner: Arc<Mutex<StreamerInner>>,
}

/// A bounded chunk of log data plus the index metadata describing it.
/// Reading it drains the underlying log reader up to `size` bytes.
pub struct StreamDelta {
    offset: i64,
    odelta: i64,
    edelta: i64,
    size: i64,
    sent: i64,
    guard: OwnedMutexGuard<StreamerInner>,
}

impl Streamer {
    /// Opens a streamer at `from`; the second value is the offset it is
    /// really positioned at (entry start when `from` was embedded).
    pub fn new(bl: &Arc<BigLog>, from: i64) -> AppResult<(Streamer, i64)> {
        let (r, positioned) = Reader::new(bl, from)?;
        let (ir, _) = IndexReader::new(bl, positioned)?;

        Ok((
            Streamer {
                inner: Arc::new(Mutex::new(StreamerInner { r, ir })),
            },
            positioned,
        ))
    }

    /// Returns the biggest delta satisfying both limits. Fails with
    /// `NeedMoreOffsets`/`NeedMoreBytes` when the next entry alone
    /// exceeds a limit, and with `EndOfTopic` when there is nothing to
    /// stream right now. The delta must be dropped (`put`) before the
    /// next `get` can proceed.
    pub async fn get(&self, max_offsets: i64, max_bytes: i64) -> AppResult<StreamDelta> {
        let mut guard = self.inner.clone().lock_owned().await;

        let sec = guard.ir.read_section(max_offsets, max_bytes)?;
        if sec.edelta == 0 {
            return Err(AppError::EndOfTopic);
        }

        Ok(StreamDelta {
            offset: sec.offset,
            odelta: sec.odelta,
            edelta: sec.edelta,
            size: sec.size,
            sent: 0,
            guard,
        })
    }

    /// Releases the delta, unblocking the next `get`.
    pub fn put(&self, delta: StreamDelta) {
        drop(delta);
    }
}

impl StreamDelta {
    /// First offset in the delta.
    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// Number of offsets the delta covers.
    pub fn offset_delta(&self) -> i64 {
        self.odelta
    }

    /// Number of index entries the delta covers.
    pub fn entry_delta(&self) -> i64 {
        self.edelta
    }

    /// Number of payload bytes the delta maps.
    pub fn size(&self) -> i64 {
        self.size
    }
}

impl Read for StreamDelta {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = (self.size - self.sent).max(0) as usize;
        if remaining == 0 {
            return Ok(0);
        }

        let cap = remaining.min(buf.len());
        let n = self.guard.r.read(&mut buf[..cap])?;
        self.sent += n as i64;
        Ok(n)
    }
}
