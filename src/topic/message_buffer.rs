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

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::error;

use crate::log::BigLog;
use crate::message::{CompressionType, Message};
use crate::service::AppResult;

/// Per-topic write batching: messages accumulate until the batch count
/// is reached or the interval flusher fires, then go into the log as one
/// message-set whose offset delta equals the batch size. Batching
/// amortizes per-write syscalls and lets compression exploit redundancy
/// across messages.
pub struct MessageBuffer {
    bl: Arc<BigLog>,
    comp: CompressionType,
    max_messages: usize,
    // None once closed; writing then is a programmer error
    buf: Mutex<Option<Vec<Message>>>,
    flusher: Mutex<Option<(oneshot::Sender<()>, JoinHandle<()>)>>,
}

impl MessageBuffer {
    pub(crate) fn new(
        bl: Arc<BigLog>,
        max_messages: usize,
        interval: Option<Duration>,
        comp: CompressionType,
    ) -> Arc<MessageBuffer> {
        let mb = Arc::new(MessageBuffer {
            bl,
            comp,
            max_messages,
            buf: Mutex::new(Some(Vec::with_capacity(max_messages.max(1)))),
            flusher: Mutex::new(None),
        });

        if let Some(d) = interval.filter(|d| !d.is_zero()) {
            mb.launch_flusher(d);
        }
        mb
    }

    fn launch_flusher(self: &Arc<Self>, d: Duration) {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let weak = Arc::downgrade(self);

        let handle = tokio::spawn(async move {
            // first tick a full interval from now, not immediately
            let mut ticker = interval_at(Instant::now() + d, d);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => return,
                    _ = ticker.tick() => {
                        let Some(mb) = weak.upgrade() else { return };
                        if let Err(e) = mb.flush() {
                            error!("flush failed: {e}");
                        }
                    }
                }
            }
        });

        *self.flusher.lock() = Some((stop_tx, handle));
    }

    /// Buffers one framed message. Reaching the batch count flushes
    /// synchronously inside this call.
    ///
    /// Panics when the buffer was already closed.
    pub fn write(&self, p: &[u8]) -> AppResult<usize> {
        let mut guard = self.buf.lock();
        let buf = guard.as_mut().expect("write on closed message buffer");

        buf.push(Message::from_bytes(Bytes::copy_from_slice(p)));

        if self.max_messages > 0 && buf.len() >= self.max_messages {
            self.flush_locked(buf)?;
        }
        Ok(p.len())
    }

    /// Pushes whatever is buffered into the log: nothing for an empty
    /// buffer, the single message as-is for one, a packed message-set
    /// reserving one offset per message for more.
    pub fn flush(&self) -> AppResult<()> {
        let mut guard = self.buf.lock();
        match guard.as_mut() {
            Some(buf) => self.flush_locked(buf),
            None => Ok(()),
        }
    }

    fn flush_locked(&self, buf: &mut Vec<Message>) -> AppResult<()> {
        if buf.is_empty() {
            return Ok(());
        }

        let count = buf.len() as u32;
        let data = if count == 1 {
            buf[0].clone()
        } else {
            Message::pack(buf, self.comp)
        };
        buf.clear();

        self.bl.write_n(data.bytes(), count)?;
        Ok(())
    }

    /// Stops the interval flusher and rejects further writes. Waits for
    /// the flusher task to acknowledge; buffered messages are dropped.
    pub(crate) async fn close(&self) {
        let flusher = self.flusher.lock().take();
        if let Some((stop_tx, handle)) = flusher {
            let _ = stop_tx.send(());
            let _ = handle.await;
        }
        self.buf.lock().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::tempdir;

    fn payloads(n: usize) -> Vec<Message> {
        (0..n)
            .map(|i| Message::from_payload(format!("payload-{i}").as_bytes()))
            .collect()
    }

    #[rstest]
    #[case(CompressionType::Gzip)]
    #[case(CompressionType::Snappy)]
    #[tokio::test]
    async fn counted_batching_packs_per_five(#[case] comp: CompressionType) {
        let dir = tempdir().unwrap();
        let bl = BigLog::create(&dir.path().join("log"), 64).unwrap();
        let mb = MessageBuffer::new(Arc::clone(&bl), 5, None, comp);

        for m in payloads(13) {
            mb.write(m.bytes()).unwrap();
        }

        // two full batches reserved ten offsets, three stay buffered
        assert_eq!(bl.latest(), 9);
        assert_eq!(bl.segments()[0].next_ifo(), 32);

        mb.flush().unwrap();
        assert_eq!(bl.latest(), 12);
    }

    #[tokio::test]
    async fn single_buffered_message_is_written_plain() {
        let dir = tempdir().unwrap();
        let bl = BigLog::create(&dir.path().join("log"), 64).unwrap();
        let mb = MessageBuffer::new(Arc::clone(&bl), 10, None, CompressionType::Gzip);

        let m = Message::from_payload(b"just one");
        mb.write(m.bytes()).unwrap();
        mb.flush().unwrap();

        assert_eq!(bl.latest(), 0);
        // written plain, the stored frame is the message itself
        let mut buf = vec![0u8; m.size()];
        bl.segments()[0].read_at(&mut buf, 0).unwrap();
        assert_eq!(&buf, m.bytes());
    }

    #[tokio::test]
    async fn empty_flush_is_a_no_op() {
        let dir = tempdir().unwrap();
        let bl = BigLog::create(&dir.path().join("log"), 64).unwrap();
        let mb = MessageBuffer::new(Arc::clone(&bl), 5, None, CompressionType::None);

        mb.flush().unwrap();
        assert_eq!(bl.latest(), -1);
    }

    #[tokio::test]
    async fn interval_flusher_fires_once_per_period() {
        let dir = tempdir().unwrap();
        let bl = BigLog::create(&dir.path().join("log"), 64).unwrap();
        let mb = MessageBuffer::new(
            Arc::clone(&bl),
            100_000,
            Some(Duration::from_millis(500)),
            CompressionType::None,
        );

        for m in payloads(5) {
            mb.write(m.bytes()).unwrap();
        }

        // before the period elapses nothing was flushed
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(bl.latest(), -1);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert_eq!(bl.latest(), 4);
        // exactly one write happened
        assert_eq!(bl.segments()[0].next_ifo(), 16);

        mb.close().await;
    }

    #[tokio::test]
    async fn close_stops_the_flusher() {
        let dir = tempdir().unwrap();
        let bl = BigLog::create(&dir.path().join("log"), 64).unwrap();
        let mb = MessageBuffer::new(
            Arc::clone(&bl),
            100,
            Some(Duration::from_millis(200)),
            CompressionType::None,
        );

        for m in payloads(2) {
            mb.write(m.bytes()).unwrap();
        }
        mb.close().await;

        // buffered messages are discarded, no late flush writes them
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(bl.latest(), -1);
    }

    #[tokio::test]
    #[should_panic(expected = "closed message buffer")]
    async fn write_after_close_is_fatal() {
        let dir = tempdir().unwrap();
        let bl = BigLog::create(&dir.path().join("log"), 64).unwrap();
        let mb = MessageBuffer::new(Arc::clone(&bl), 5, None, CompressionType::None);

        mb.close().await;
        let m = Message::from_payload(b"too late");
        let _ = mb.write(m.bytes());
    }
}
