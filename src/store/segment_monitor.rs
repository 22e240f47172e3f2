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

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, trace};

use crate::service::Shutdown;
use crate::store::MessageStore;
use crate::topic::Topic;

/// Periodically evaluates every topic's segment rollover policy. A
/// failure on one topic must not halt monitoring of the others, so each
/// check runs behind a panic boundary.
pub(crate) struct SegmentMonitor {
    store: Arc<MessageStore>,
}

impl SegmentMonitor {
    pub(crate) fn new(store: Arc<MessageStore>) -> SegmentMonitor {
        SegmentMonitor { store }
    }

    pub(crate) async fn start(&self, interval: Duration, mut shutdown: Shutdown) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.recv() => {
                    trace!("segment monitor received shutdown signal");
                    return;
                }
            }

            trace!("running segment monitor");
            for (name, t) in self.store.topics() {
                check(&name, &t);
            }
        }
    }
}

fn check(name: &str, t: &Arc<Topic>) {
    let result = catch_unwind(AssertUnwindSafe(|| t.check_segments()));

    match result {
        Err(_) => error!("alert: segment check panicked on {name:?}"),
        Ok(Err(e)) => error!("check segments failed on {name:?}: {e}"),
        Ok(Ok(())) => {}
    }
}
