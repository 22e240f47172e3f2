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

use tokio_util::sync::CancellationToken;

use crate::log::Scanner;
use crate::message::{check_message_integrity, IntegrityError, IntegrityErrorKind, Message};
use crate::service::AppResult;
use crate::topic::Topic;

// collecting stops here, a deeply damaged log would otherwise flood the
// report
const ERR_LIMIT: usize = 1000;

/// Walks a topic sequentially and reports every CRC or length mismatch
/// in the stored entries.
pub struct IntegrityChecker {
    sc: Scanner,
}

impl IntegrityChecker {
    pub fn new(t: &Topic, from: i64) -> AppResult<IntegrityChecker> {
        let (sc, _) = Scanner::new(&t.bl, from)?;
        Ok(IntegrityChecker { sc })
    }

    /// Reads everything from the starting offset, collecting findings.
    /// Cancellation stops the walk early with whatever was collected,
    /// recommended since a full check over a large topic is slow.
    pub fn check(&mut self, cancel: &CancellationToken) -> Vec<IntegrityError> {
        let mut errors = Vec::new();

        loop {
            if errors.len() >= ERR_LIMIT || cancel.is_cancelled() {
                return errors;
            }

            match self.sc.scan() {
                Ok(Some(tok)) => {
                    let m = Message::from_bytes(tok.bytes);
                    if let Some(mut e) = check_message_integrity(&m, tok.odelta) {
                        e.offset = tok.offset;
                        errors.push(e);
                    }
                }
                Ok(None) => return errors,
                Err(e) => {
                    errors.push(IntegrityError {
                        offset: -1,
                        odelta: 0,
                        kind: IntegrityErrorKind::Unknown,
                        expected: String::new(),
                        actual: e.to_string(),
                    });
                }
            }
        }
    }
}
