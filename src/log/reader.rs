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

use std::io::{self, Read, SeekFrom};
use std::sync::Arc;

use crate::log::{index_of_segment, BigLog, Segment};
use crate::service::AppResult;

/// A positioned byte cursor over a log. Reads advance through sealed
/// segments into the hot one transparently; at the current end of data a
/// read returns 0 until more is written.
///
/// A reader pins the segment it stands on through the per-segment reader
/// count, which is what keeps trim and close from pulling files out from
/// under it. Registration is released on drop.
#[derive(Debug)]
pub struct Reader {
    bl: Arc<BigLog>,
    seg: Arc<Segment>,
    dfo: i64,
    handle: u64,
}

impl Reader {
    /// Opens a reader at `from`. The returned offset is the one the
    /// reader is actually positioned at: when `from` is embedded in a
    /// batched write it is the offset of the containing entry, so the
    /// caller knows how many messages to skip.
    pub fn new(bl: &Arc<BigLog>, from: i64) -> AppResult<(Reader, i64)> {
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
            Reader {
                bl: Arc::clone(bl),
                seg,
                dfo: l.dfo,
                handle,
            },
            positioned,
        ))
    }

    /// Repositions the reader at a logical offset, absolute or relative
    /// to the latest one. `SeekFrom::Current` is unsupported: a byte
    /// cursor does not track which logical offset it has reached.
    pub fn seek(&mut self, pos: SeekFrom) -> AppResult<i64> {
        let offset = match pos {
            SeekFrom::Start(o) => o as i64,
            SeekFrom::End(d) => self.bl.latest() + d,
            SeekFrom::Current(_) => panic!("seek from current position is not supported"),
        };

        let (seg, ro) = self.bl.locate_offset(offset)?;
        let l = seg.lookup(ro)?;

        let positioned = if l.is_embedded() {
            offset - (l.ro - l.found_ro) as i64
        } else {
            offset
        };

        self.set_segment(seg);
        self.dfo = l.dfo;
        Ok(positioned)
    }

    // the segment list may have grown since the last read, scan it again
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

impl Read for Reader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut sum = 0;
        while sum < buf.len() {
            let n = self.seg.read_at(&mut buf[sum..], self.dfo)?;
            self.dfo += n as i64;
            sum += n;

            if n == 0 {
                match self.next_seg() {
                    Some(next) => {
                        self.set_segment(next);
                        self.dfo = 0;
                    }
                    None => break,
                }
            }
        }
        Ok(sum)
    }
}

impl Drop for Reader {
    fn drop(&mut self) {
        self.seg.dec_readers();
        self.bl.unregister_reader(self.handle);
    }
}
