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

//! A topic binds one log to its settings, an optional write batcher, a
//! scanner registry and the persistence of tailing cursors.

mod integrity;
mod message_buffer;
mod scanner;

pub use integrity::IntegrityChecker;
pub use message_buffer::MessageBuffer;
pub use scanner::{ScannerInfo, TopicScanner};

use std::collections::HashMap;
use std::fs;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::log::{BigLog, LogInfo, Reader};
use crate::message::{CompressionType, IntegrityError, Message};
use crate::service::{AppError, AppResult};

const SETTINGS_FILE: &str = "settings.json";
const READERS_DIR: &str = "readers";
const SCANNER_SUFFIX: &str = "scanner";

/// Tunable settings of one topic, persisted as `settings.json` in the
/// topic directory. Zero values inherit the store defaults at creation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicSettings {
    /// Age after which the oldest segment is discarded, e.g. "12h".
    pub segment_age: Option<String>,
    /// Data size in bytes above which the hot segment is rolled.
    pub segment_size: i64,
    /// Number of messages batched into a single message-set.
    pub batch_num_messages: usize,
    /// Interval at which batched messages are flushed, e.g. "500ms".
    pub batch_interval: Option<String>,
    /// Compression code applied to batched message-sets.
    pub compression_type: u8,
}

impl TopicSettings {
    pub fn segment_age(&self) -> AppResult<Option<Duration>> {
        parse_opt_duration(&self.segment_age)
    }

    pub fn batch_interval(&self) -> AppResult<Option<Duration>> {
        parse_opt_duration(&self.batch_interval)
    }

    pub fn compression(&self) -> AppResult<CompressionType> {
        CompressionType::from_code(self.compression_type)
    }

    fn merge_defaults(&mut self, defaults: &TopicSettings) {
        if self.segment_age.is_none() {
            self.segment_age = defaults.segment_age.clone();
        }
        if self.segment_size == 0 {
            self.segment_size = defaults.segment_size;
        }
        if self.batch_num_messages == 0 {
            self.batch_num_messages = defaults.batch_num_messages;
        }
        if self.batch_interval.is_none() {
            self.batch_interval = defaults.batch_interval.clone();
        }
        if self.compression_type == CompressionType::Default.code() {
            self.compression_type = defaults.compression_type;
        }
    }
}

fn parse_opt_duration(s: &Option<String>) -> AppResult<Option<Duration>> {
    match s {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => humantime::parse_duration(s)
            .map(Some)
            .map_err(|_| AppError::InvalidDuration(s.clone())),
    }
}

enum TopicWriter {
    Direct(Arc<BigLog>),
    Buffered(Arc<MessageBuffer>),
}

/// Topic information handed to the transport: the log metadata plus the
/// registered scanners.
#[derive(Debug, Serialize)]
pub struct TopicInfo {
    #[serde(flatten)]
    pub log: LogInfo,
    pub scanners: HashMap<String, ScannerInfo>,
}

/// A log of linear messages.
pub struct Topic {
    name: String,
    settings: TopicSettings,
    pub(crate) bl: Arc<BigLog>,
    writer: TopicWriter,
    scanners: DashMap<String, Arc<TopicScanner>>,
}

impl Topic {
    /// Binds `bl` to its merged settings, choosing the write path:
    /// batching topics write through a message buffer, the rest straight
    /// into the log. Persisted scanners found on disk are restored.
    pub(crate) async fn new(
        bl: Arc<BigLog>,
        mut settings: TopicSettings,
        defaults: &TopicSettings,
    ) -> AppResult<Arc<Topic>> {
        settings.merge_defaults(defaults);

        let batch_interval = settings.batch_interval()?;
        let batching = settings.batch_num_messages > 1
            || batch_interval.map(|d| !d.is_zero()).unwrap_or(false);

        let writer = if batching {
            // code 0 in newly written sets would be unreadable, batch
            // uncompressed when nothing was configured
            let comp = match settings.compression()? {
                CompressionType::Default => CompressionType::None,
                c => c,
            };
            TopicWriter::Buffered(MessageBuffer::new(
                Arc::clone(&bl),
                settings.batch_num_messages,
                batch_interval,
                comp,
            ))
        } else {
            TopicWriter::Direct(Arc::clone(&bl))
        };

        let t = Arc::new(Topic {
            name: bl.name().to_string(),
            settings,
            bl,
            writer,
            scanners: DashMap::new(),
        });

        t.restore_persisted_scanners().await;
        Ok(t)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &TopicSettings {
        &self.settings
    }

    pub fn dir_path(&self) -> PathBuf {
        self.bl.dir_path().to_path_buf()
    }

    /// Appends one message through the topic's write path; batching
    /// topics may hold it until the next flush.
    pub fn write(&self, p: &[u8]) -> AppResult<usize> {
        match &self.writer {
            TopicWriter::Direct(bl) => bl.write(p),
            TopicWriter::Buffered(mb) => mb.write(p),
        }
    }

    /// Appends a prepacked set of `n` messages, bypassing the buffer.
    pub fn write_n(&self, p: &[u8], n: u32) -> AppResult<usize> {
        self.bl.write_n(p, n)
    }

    /// Flushes everything down to disk.
    pub fn sync(&self) -> AppResult<()> {
        self.flush_buffered()?;
        self.bl.sync()
    }

    /// Pushes buffered messages into the log. The log may buffer on its
    /// own, so this alone does not guarantee bytes reached disk.
    pub fn flush_buffered(&self) -> AppResult<()> {
        match &self.writer {
            TopicWriter::Direct(_) => Ok(()),
            TopicWriter::Buffered(mb) => mb.flush(),
        }
    }

    pub fn info(&self) -> AppResult<TopicInfo> {
        let log = self.bl.info()?;
        let scanners = self
            .scanners
            .iter()
            .map(|e| (e.key().clone(), e.value().info()))
            .collect();
        Ok(TopicInfo { log, scanners })
    }

    /// Applies the rollover policy: discard the oldest segment once it
    /// outlives `segment_age`, roll the hot segment once its data file
    /// outgrows `segment_size`. Called by the segment monitor.
    pub fn check_segments(&self) -> AppResult<()> {
        let info = self.bl.info()?;
        self.check_segments_age(&info)?;
        self.check_segments_size(&info)
    }

    fn check_segments_age(&self, info: &LogInfo) -> AppResult<()> {
        let age = match self.settings.segment_age()? {
            Some(age) if !age.is_zero() => age,
            _ => return Ok(()),
        };

        if info.segments.len() < 2 {
            return Ok(());
        }

        let age = chrono::Duration::from_std(age)
            .map_err(|_| AppError::InvalidDuration(format!("{age:?}")))?;
        if info.segments[0].mod_time + age > chrono::Local::now() {
            return Ok(());
        }

        info!("removing old segment on {:?}", self.name);
        self.bl.trim()
    }

    fn check_segments_size(&self, info: &LogInfo) -> AppResult<()> {
        if self.settings.segment_size <= 0 {
            return Ok(());
        }

        let hot = match info.segments.last() {
            Some(s) => s,
            None => return Ok(()),
        };
        if hot.data_size <= self.settings.segment_size {
            return Ok(());
        }

        info!("creating new segment on {:?}", self.name);
        self.bl.split()
    }

    /// Ingests a stream of framed messages until it ends. Messages whose
    /// checksum fails are dropped with a warning, the stream is
    /// best-effort. Returns the number of bytes consumed. A stream that
    /// ends mid-frame is a malformed request, not an empty one.
    pub fn read_from<R: Read>(&self, r: &mut R) -> AppResult<u64> {
        let mut n = 0u64;
        loop {
            let m = match Message::read(r) {
                Ok(Some(m)) => m,
                Ok(None) => return Ok(n),
                Err(e) => {
                    error!("could not read from stream: {e}");
                    return Err(AppError::BadRequest(format!(
                        "malformed message stream: {e}"
                    )));
                }
            };

            n += m.size() as u64;
            if !m.checksum_ok() {
                warn!("corrupt entry in stream");
                continue;
            }

            self.write(m.bytes())?;
        }
    }

    /// Fetches the payload of a single offset, decoding through
    /// message-sets when the offset is embedded in a batch. A clean end
    /// of data at the offset means there is nothing there yet; a frame
    /// cut short mid-read means the log is inconsistent and fails hard.
    pub fn payload(&self, offset: i64) -> AppResult<bytes::Bytes> {
        let (mut r, positioned) = Reader::new(&self.bl, offset)?;

        let entry = Message::read(&mut r)?.ok_or(AppError::EndOfTopic)?;

        let msgs = entry.unpack()?;
        let m = msgs
            .get((offset - positioned) as usize)
            .ok_or(AppError::OffsetNotFound)?;

        if !m.checksum_ok() {
            return Err(AppError::Crc);
        }
        Ok(m.payload_bytes())
    }

    /// Creates a scanner at `from` under a fresh UUID. Persistent
    /// scanners keep their position on disk and survive restarts.
    pub async fn new_scanner(&self, from: i64, persist: bool) -> AppResult<Arc<TopicScanner>> {
        self.create_scanner(uuid::Uuid::new_v4().to_string(), from, persist)
            .await
    }

    async fn create_scanner(
        &self,
        id: String,
        from: i64,
        persist: bool,
    ) -> AppResult<Arc<TopicScanner>> {
        if from < 0 {
            warn!("can't create scanner from negative offset {from}");
            return Err(AppError::InvalidOffset);
        }

        let ts = TopicScanner::new(&self.bl, &self.readers_dir(), id, from, persist)
            .await
            .map_err(|e| {
                warn!("failed to create scanner {}:{from}: {e}", self.name);
                e.ext()
            })?;

        let ts = Arc::new(ts);
        self.scanners.insert(ts.id().to_string(), Arc::clone(&ts));

        info!("created scanner from {}:{from}", self.name);
        Ok(ts)
    }

    /// Existing scanner by ID.
    pub fn scanner(&self, id: &str) -> AppResult<Arc<TopicScanner>> {
        self.scanners
            .get(id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| AppError::ScannerNotFound(id.to_string()))
    }

    /// Closes the scanner and removes it from the topic.
    pub fn delete_scanner(&self, id: &str) -> AppResult<()> {
        info!("deleting scanner {id} from {:?}", self.name);

        let sc = self.scanner(id)?;
        sc.close().map_err(|e| {
            warn!("failed to delete scanner {id} from {}: {e}", self.name);
            e
        })?;

        self.scanners.remove(id);
        info!("deleted scanner {id} from {:?}", self.name);
        Ok(())
    }

    /// Converts an offset string into a precise offset:
    /// `beginning`/`first`/`oldest`/`start` or the empty string name the
    /// lowest available offset, `last`/`latest` the highest written one,
    /// `end`/`now` the next to be written. Numeric strings convert
    /// directly; duration strings like "1h30m" name the first offset
    /// written since that long ago.
    pub fn parse_offset(&self, s: &str) -> AppResult<i64> {
        let s = s.to_lowercase();

        match s.as_str() {
            "" | "beginning" | "first" | "oldest" | "start" => return Ok(self.bl.oldest()),
            "last" | "latest" => return Ok(self.bl.latest()),
            "end" | "now" => return Ok(self.bl.latest() + 1),
            _ => {}
        }

        if let Ok(offset) = s.parse::<i64>() {
            return Ok(offset);
        }

        let d = humantime::parse_duration(&s).map_err(|_| AppError::InvalidOffset)?;
        self.bl
            .after(SystemTime::now() - d)
            .map_err(|_| AppError::InvalidOffset)
    }

    /// Scans the topic from `from` and reports every inconsistency found
    /// in the stored data.
    pub fn check_integrity(
        &self,
        cancel: &CancellationToken,
        from: i64,
    ) -> AppResult<Vec<IntegrityError>> {
        info!("checking integrity of topic {:?}", self.name);

        let mut ic = IntegrityChecker::new(self, from).map_err(AppError::ext)?;
        let errors = ic.check(cancel);

        info!(
            "integrity check finished for topic {:?}, found {} errors",
            self.name,
            errors.len()
        );
        Ok(errors)
    }

    /// Stops background work owned by the topic. Called after the
    /// underlying log was deleted or the store shuts down.
    pub(crate) async fn stop(&self) {
        if let TopicWriter::Buffered(mb) = &self.writer {
            mb.close().await;
        }
    }

    pub(crate) fn readers_dir(&self) -> PathBuf {
        self.bl.dir_path().join(READERS_DIR)
    }

    pub(crate) fn settings_path(&self) -> PathBuf {
        self.bl.dir_path().join(SETTINGS_FILE)
    }

    async fn restore_persisted_scanners(&self) {
        let entries = match fs::read_dir(self.readers_dir()) {
            Ok(entries) => entries,
            Err(_) => return,
        };

        for entry in entries.filter_map(|e| e.ok()) {
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(id) = name.strip_suffix(&format!(".{SCANNER_SUFFIX}")) else {
                error!("unknown file in readers dir: {name}");
                continue;
            };

            let last = offset_from_file(&entry.path());
            let from = (last + 1).max(self.bl.oldest());

            match self.create_scanner(id.to_string(), from, true).await {
                Ok(_) => info!("restored scanner {id} on {}:{from}", self.name),
                Err(e) => error!("unable to restore scanner {id}: {e}"),
            }
        }
    }
}

fn offset_from_file(path: &std::path::Path) -> i64 {
    match fs::read(path) {
        Ok(b) if b.len() == 8 => i64::from_be_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]),
        _ => -1,
    }
}

pub(crate) fn settings_file_name() -> &'static str {
    SETTINGS_FILE
}
