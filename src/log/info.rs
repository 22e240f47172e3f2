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

use chrono::{DateTime, Local};
use serde::Serialize;

/// Metadata of a single segment.
#[derive(Debug, Clone, Serialize)]
pub struct SegInfo {
    pub first_offset: i64,
    pub disk_size: i64,
    pub data_size: i64,
    pub mod_time: DateTime<Local>,
}

/// Metadata of a whole log, segment by segment.
#[derive(Debug, Clone, Serialize)]
pub struct LogInfo {
    pub name: String,
    pub path: String,
    pub disk_size: i64,
    pub first_offset: i64,
    pub latest_offset: i64,
    pub segments: Vec<SegInfo>,
    pub mod_time: DateTime<Local>,
}
