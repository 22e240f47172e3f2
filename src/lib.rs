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

pub mod log;
pub mod message;
pub mod service;
pub mod store;
pub mod topic;

pub use log::{
    BigLog, IndexEntry, IndexReader, IndexSection, LogInfo, Reader, ScanToken, Scanner, SegInfo,
    StreamDelta, Streamer, Watcher,
};
pub use message::{
    check_message_integrity, CompressionType, IntegrityError, IntegrityErrorKind, Message,
};
pub use service::{setup_tracing, AppError, AppResult, Shutdown, StoreConfig};
pub use store::MessageStore;
pub use topic::{ScannerInfo, Topic, TopicInfo, TopicScanner, TopicSettings};
