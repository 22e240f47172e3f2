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

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::service::{AppError, AppResult};
use crate::topic::TopicSettings;

/// Process-level configuration, loaded from a TOML file with
/// `STONELOG_`-prefixed environment overrides.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub general: GeneralConfig,
    pub log: LogConfig,
    /// Settings applied to topics that don't specify their own.
    pub topic_defaults: TopicSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Directory holding one subdirectory per topic.
    pub data_dir: String,
    /// Interval of the segment split/discard monitor, e.g. "1s".
    pub monitor_interval: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Entries preallocated in every segment index file.
    pub max_index_entries: usize,
    /// Buffer size for the hot segment writer, 0 writes straight through.
    pub bufio_size: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            data_dir: "./data".to_string(),
            monitor_interval: None,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            max_index_entries: 100 * 1024,
            bufio_size: 0,
        }
    }
}

impl StoreConfig {
    pub fn set_up_config<P: AsRef<Path>>(path: P) -> AppResult<StoreConfig> {
        let path_str = path
            .as_ref()
            .to_str()
            .ok_or_else(|| AppError::BadRequest("config file path".to_string()))?;

        let settings = config::Config::builder()
            .add_source(config::File::with_name(path_str).required(false))
            .add_source(config::Environment::with_prefix("STONELOG").separator("__"))
            .build()
            .map_err(|e| AppError::Unknown(format!("config error: {e}")))?;

        settings
            .try_deserialize()
            .map_err(|e| AppError::Unknown(format!("config error: {e}")))
    }

    /// Monitor tick interval, one second when unset.
    pub fn monitor_interval(&self) -> AppResult<Duration> {
        match &self.general.monitor_interval {
            None => Ok(Duration::from_secs(1)),
            Some(s) => humantime::parse_duration(s)
                .map_err(|_| AppError::InvalidDuration(s.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let c = StoreConfig::default();
        assert_eq!(c.log.max_index_entries, 100 * 1024);
        assert_eq!(c.log.bufio_size, 0);
        assert_eq!(c.monitor_interval().unwrap(), Duration::from_secs(1));
    }

    #[test]
    fn monitor_interval_parses_duration_strings() {
        let mut c = StoreConfig::default();
        c.general.monitor_interval = Some("250ms".to_string());
        assert_eq!(c.monitor_interval().unwrap(), Duration::from_millis(250));

        c.general.monitor_interval = Some("nonsense".to_string());
        assert!(matches!(
            c.monitor_interval(),
            Err(AppError::InvalidDuration(_))
        ));
    }
}
