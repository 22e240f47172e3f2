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

use serde::Serialize;

use crate::message::Message;

/// Category of damage found in stored data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrityErrorKind {
    /// Header checksum doesn't match the checksum of the payload.
    Checksum,
    /// Header length doesn't match the length of the payload.
    Length,
    /// The data could not be read at all.
    Unknown,
}

/// One integrity finding, positioned by absolute offset and the number
/// of offsets the damaged entry covers.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityError {
    pub offset: i64,
    pub odelta: u32,
    #[serde(rename = "type")]
    pub kind: IntegrityErrorKind,
    pub expected: String,
    pub actual: String,
}

/// Checks a single message, returning the finding if any. `delta` is the
/// offset count ascribed to the record, carried through for reporting.
pub fn check_message_integrity(m: &Message, delta: u32) -> Option<IntegrityError> {
    if !m.checksum_ok() {
        return Some(IntegrityError {
            offset: -1,
            odelta: delta,
            kind: IntegrityErrorKind::Checksum,
            expected: crc32fast::hash(m.payload()).to_string(),
            actual: m.crc32().to_string(),
        });
    }

    if m.plength() as usize != m.payload().len() {
        return Some(IntegrityError {
            offset: -1,
            odelta: delta,
            kind: IntegrityErrorKind::Length,
            expected: m.plength().to_string(),
            actual: m.payload().len().to_string(),
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    #[test]
    fn intact_message_passes() {
        let m = Message::from_payload(b"all good here");
        assert!(check_message_integrity(&m, 1).is_none());
    }

    #[test]
    fn corrupt_length_is_reported() {
        let m = Message::from_payload(b"payload");
        let mut buf = BytesMut::from(m.bytes());
        // overwrite the length header with 20, payload is 7 bytes
        buf[5..9].copy_from_slice(&20u32.to_be_bytes());
        let bad = Message::from_bytes(buf.freeze());

        let err = check_message_integrity(&bad, 1).unwrap();
        assert_eq!(err.kind, IntegrityErrorKind::Length);
        assert_eq!(err.expected, "20");
        assert_eq!(err.actual, "7");
    }

    #[test]
    fn corrupt_checksum_is_reported() {
        let m = Message::from_payload(b"payload");
        let mut buf = BytesMut::from(m.bytes());
        buf[1..5].copy_from_slice(&0xdeadbeefu32.to_be_bytes());
        let bad = Message::from_bytes(buf.freeze());

        let err = check_message_integrity(&bad, 3).unwrap();
        assert_eq!(err.kind, IntegrityErrorKind::Checksum);
        assert_eq!(err.odelta, 3);
    }
}
