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

use tokio::sync::mpsc;

use crate::log::BigLog;

/// A coalescing change signal for one log: holds at most one pending
/// wake-up, so a slow consumer learns "something was appended since the
/// last look" without ever blocking the write path. Consumers re-probe
/// the index after every wake-up, missed intermediate signals are
/// harmless.
#[derive(Debug)]
pub struct Watcher {
    bl: Arc<BigLog>,
    id: u64,
    rx: mpsc::Receiver<()>,
}

impl Watcher {
    pub fn new(bl: &Arc<BigLog>) -> Watcher {
        let (tx, rx) = mpsc::channel(1);
        let id = bl.register_watcher(tx);
        Watcher {
            bl: Arc::clone(bl),
            id,
            rx,
        }
    }

    /// Waits until the log has changed since the last call. On a log
    /// that shut down, waits forever: no further change can come and the
    /// caller's cancellation is what ends the wait.
    pub async fn changed(&mut self) {
        if self.rx.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        self.bl.unregister_watcher(self.id);
    }
}
