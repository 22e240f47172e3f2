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

//! The top level of the store: a set of named topics under one data
//! directory, restored at boot and watched by the segment monitor.

mod segment_monitor;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::log::BigLog;
use crate::service::{AppError, AppResult, Shutdown, StoreConfig};
use crate::topic::{settings_file_name, Topic, TopicSettings};

use segment_monitor::SegmentMonitor;

/// Serves a set of topics out of one data directory. Usually wrapped by
/// an HTTP transport.
pub struct MessageStore {
    data_dir: PathBuf,
    topics: DashMap<String, Arc<Topic>>,
    defaults: TopicSettings,
    max_index_entries: usize,
    bufio_size: usize,
    notify_shutdown: broadcast::Sender<()>,
}

impl MessageStore {
    /// Opens the store: validates the data directory, loads every topic
    /// subdirectory (restoring their persisted scanners) and starts the
    /// segment monitor.
    pub async fn open(config: StoreConfig) -> AppResult<Arc<MessageStore>> {
        let data_dir = PathBuf::from(&config.general.data_dir);
        match fs::metadata(&data_dir) {
            Ok(meta) if !meta.is_dir() => return Err(AppError::InvalidDir),
            Ok(_) => {}
            Err(_) => fs::create_dir(&data_dir).map_err(|e| {
                error!("failed to create data dir: {e}");
                AppError::InvalidDir
            })?,
        }

        let (notify_shutdown, _) = broadcast::channel(1);

        let store = Arc::new(MessageStore {
            data_dir,
            topics: DashMap::new(),
            defaults: config.topic_defaults.clone(),
            max_index_entries: config.log.max_index_entries,
            bufio_size: config.log.bufio_size,
            notify_shutdown: notify_shutdown.clone(),
        });

        store.load_topics().await;

        let monitor = SegmentMonitor::new(Arc::clone(&store));
        let shutdown = Shutdown::new(notify_shutdown.subscribe());
        let interval = config.monitor_interval()?;
        tokio::spawn(async move { monitor.start(interval, shutdown).await });

        Ok(store)
    }

    async fn load_topics(&self) {
        let entries = match fs::read_dir(&self.data_dir) {
            Ok(entries) => entries,
            Err(e) => {
                error!("can't read data dir: {e}");
                return;
            }
        };

        for entry in entries.filter_map(|e| e.ok()) {
            if !entry.path().is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            if let Err(e) = self.load_topic(&name).await {
                error!("failed to load topic {name:?}: {e}");
            }
        }
    }

    async fn load_topic(&self, name: &str) -> AppResult<()> {
        if self.topics.contains_key(name) {
            return Err(AppError::TopicExists(name.to_string()));
        }

        let topic_path = self.data_dir.join(name);
        let bl = BigLog::open_with(&topic_path, self.bufio_size)?;

        let settings_raw = fs::read(topic_path.join(settings_file_name()))?;
        let settings: TopicSettings = serde_json::from_slice(&settings_raw)?;

        let t = Topic::new(bl, settings, &self.defaults).await?;
        self.register(name, t)
    }

    /// Creates a topic under `name`. Settings not specified inherit the
    /// store defaults; the merged settings are persisted in the topic
    /// directory.
    pub async fn create_topic(
        &self,
        name: &str,
        settings: TopicSettings,
    ) -> AppResult<Arc<Topic>> {
        if self.topics.contains_key(name) {
            warn!("failed to create topic {name:?}: exists");
            return Err(AppError::TopicExists(name.to_string()));
        }

        let topic_path = self.data_dir.join(name);
        let bl = BigLog::create(&topic_path, self.max_index_entries)?;

        let t = Topic::new(bl, settings, &self.defaults).await?;
        self.register(name, Arc::clone(&t))?;

        let settings_json = serde_json::to_vec(t.settings())?;
        fs::write(t.settings_path(), settings_json)?;

        info!("created topic {name:?}");
        Ok(t)
    }

    /// Existing topic by name.
    pub fn topic(&self, name: &str) -> AppResult<Arc<Topic>> {
        self.topics
            .get(name)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| AppError::TopicNotFound(name.to_string()))
    }

    /// Deletes a topic and all its files. The topic is unregistered
    /// before deletion so nothing new attaches to it mid-flight; a
    /// failed deletion registers it back.
    pub async fn delete_topic(&self, name: &str, force: bool) -> AppResult<()> {
        info!("deleting topic {name:?} force={force}");

        let t = self.topic(name)?;
        self.unregister(name)?;

        if let Err(e) = t.bl.delete(force) {
            warn!("failed to delete topic {name:?}: {e}");
            let _ = self.register(name, t);
            return Err(e.ext());
        }

        t.stop().await;
        info!("deleted topic {name:?} force={force}");
        Ok(())
    }

    /// Names of all existing topics.
    pub fn topic_list(&self) -> Vec<String> {
        self.topics.iter().map(|e| e.key().clone()).collect()
    }

    pub(crate) fn topics(&self) -> Vec<(String, Arc<Topic>)> {
        self.topics
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect()
    }

    /// Stops background tasks and closes every topic's log. Buffered
    /// writes are flushed first.
    pub async fn close(&self) {
        let _ = self.notify_shutdown.send(());

        for (name, t) in self.topics() {
            if let Err(e) = t.sync() {
                error!("failed to sync topic {name:?} on close: {e}");
            }
            t.stop().await;
            if let Err(e) = t.bl.close(true) {
                error!("failed to close topic {name:?}: {e}");
            }
            self.topics.remove(&name);
        }
    }

    fn register(&self, name: &str, topic: Arc<Topic>) -> AppResult<()> {
        if self.topics.contains_key(name) {
            return Err(AppError::TopicExists(name.to_string()));
        }
        self.topics.insert(name.to_string(), topic);
        Ok(())
    }

    fn unregister(&self, name: &str) -> AppResult<()> {
        self.topics
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| AppError::TopicNotFound(name.to_string()))
    }
}
