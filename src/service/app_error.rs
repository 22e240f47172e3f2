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

use std::io;

pub type AppResult<T> = Result<T, AppError>;

/// All error kinds surfaced by the store.
///
/// The first group maps caller mistakes, the second group maps lookup
/// misses, the third group carries the storage-engine sentinels that are
/// translated at the topic boundary before they ever reach a client.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("invalid offset")]
    InvalidOffset,

    #[error("invalid duration: {0}")]
    InvalidDuration(String),

    #[error("invalid compression type: {0}")]
    InvalidCompression(u8),

    #[error("topic {0:?} already exists")]
    TopicExists(String),

    #[error("topic {0:?} not found")]
    TopicNotFound(String),

    #[error("scanner {0} not found")]
    ScannerNotFound(String),

    #[error("offset not found")]
    OffsetNotFound,

    #[error("end of topic")]
    EndOfTopic,

    #[error("checksum mismatch")]
    Crc,

    #[error("resource busy")]
    Busy,

    #[error("invalid data directory")]
    InvalidDir,

    /// The hot segment's index has no capacity left.
    #[error("segment full")]
    SegmentFull,

    #[error("segment busy")]
    SegmentBusy,

    #[error("last segment can't be deleted")]
    LastSegment,

    #[error("not a valid log directory")]
    InvalidLog,

    #[error("failed to load segment: {0}")]
    LoadSegment(String),

    /// Relative offsets are 1-based, zero never addresses an entry.
    #[error("invalid relative offset")]
    InvalidRelOffset,

    /// A single index entry does not fit the requested byte budget.
    #[error("max_bytes too low for any entry")]
    NeedMoreBytes,

    /// A single index entry does not fit the requested offset budget.
    #[error("max_offsets too low for any entry")]
    NeedMoreOffsets,

    #[error("entry too long for scan buffer")]
    EntryTooLong,

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Unknown(String),
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Unknown(e.to_string())
    }
}

impl AppError {
    /// HTTP status the external transport should answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            AppError::BadRequest(_)
            | AppError::InvalidOffset
            | AppError::InvalidDuration(_)
            | AppError::InvalidCompression(_)
            | AppError::TopicExists(_) => 400,
            AppError::TopicNotFound(_)
            | AppError::ScannerNotFound(_)
            | AppError::OffsetNotFound
            | AppError::EndOfTopic => 404,
            AppError::Busy | AppError::SegmentBusy => 409,
            _ => 500,
        }
    }

    /// Translates storage-engine sentinels into the error the caller of
    /// the topic layer is supposed to see. Anything already external
    /// passes through unchanged. I/O errors are deliberately not mapped
    /// here: an unexpected end of data means different things per call
    /// site (corrupt upload, index/data mismatch) and never the
    /// tail-wait "end of topic".
    pub(crate) fn ext(self) -> AppError {
        match self {
            AppError::SegmentBusy => AppError::Busy,
            other => other,
        }
    }
}
