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

//! The canonical on-disk frame.
//!
//! Every stored record is a `Message`: a 9-byte header followed by the
//! payload. The header carries a combined compression/version byte, the
//! CRC32 (IEEE) of the payload and the payload length, both big-endian.
//!
//! ```text
//!   byte 0        bytes 1-4     bytes 5-8    bytes 9..
//! [ compver ] [ crc32 (BE) ] [ plen (BE) ] [ payload ]
//! ```
//!
//! A message-set is a `Message` whose payload is itself a sequence of
//! messages, optionally compressed as declared by the low nibble of
//! `compver`. One message-set occupies a single index entry covering as
//! many offsets as it embeds messages.

use std::io::{self, Read, Write};

use bytes::{Bytes, BytesMut};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::service::{AppError, AppResult};

const COMPVER_POS: usize = 0;
const CRC_POS: usize = 1;
const PLENGTH_POS: usize = 5;
const PAYLOAD_POS: usize = 9;

/// Size of the fixed message header in bytes.
pub const HEADER_SIZE: usize = PAYLOAD_POS;

/// Compression applied to a message-set payload.
///
/// `Default` (0) is only ever read, never written: legacy data uses it to
/// mean "not a set". Packing with `Default` is a programmer error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionType {
    Default,
    None,
    Gzip,
    Snappy,
}

impl CompressionType {
    pub fn code(self) -> u8 {
        match self {
            CompressionType::Default => 0,
            CompressionType::None => 1,
            CompressionType::Gzip => 2,
            CompressionType::Snappy => 3,
        }
    }

    pub fn from_code(code: u8) -> AppResult<CompressionType> {
        match code {
            0 => Ok(CompressionType::Default),
            1 => Ok(CompressionType::None),
            2 => Ok(CompressionType::Gzip),
            3 => Ok(CompressionType::Snappy),
            other => Err(AppError::InvalidCompression(other)),
        }
    }
}

impl Default for CompressionType {
    fn default() -> Self {
        CompressionType::Default
    }
}

/// The unit of data storage: header plus payload in one contiguous
/// buffer. Cloning is cheap, the bytes are shared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message(Bytes);

impl Message {
    /// Builds a message around `payload`, computing the CRC and length
    /// headers. The compver byte is left zero.
    pub fn from_payload(payload: &[u8]) -> Message {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(&[0u8]);
        buf.extend_from_slice(&crc32fast::hash(payload).to_be_bytes());
        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(payload);
        Message(buf.freeze())
    }

    /// Wraps raw frame bytes without validating them. Used when handing
    /// scanned tokens or ingested frames back into the codec; integrity
    /// is checked separately.
    pub fn from_bytes(b: Bytes) -> Message {
        Message(b)
    }

    /// Packs `msgs` into a single message-set compressed as `comp`.
    ///
    /// Panics when `comp` is `Default`: nothing would tell readers that
    /// further messages are embedded in the payload.
    pub fn pack(msgs: &[Message], comp: CompressionType) -> Message {
        let packed = match comp {
            CompressionType::None => {
                let mut buf = Vec::new();
                for m in msgs {
                    buf.extend_from_slice(m.bytes());
                }
                buf
            }
            CompressionType::Gzip => {
                let mut enc = GzEncoder::new(Vec::new(), flate2::Compression::default());
                for m in msgs {
                    enc.write_all(m.bytes()).expect("gzip write to memory");
                }
                enc.finish().expect("gzip finish to memory")
            }
            CompressionType::Snappy => {
                let mut enc = snap::write::FrameEncoder::new(Vec::new());
                for m in msgs {
                    enc.write_all(m.bytes()).expect("snappy write to memory");
                }
                enc.into_inner().expect("snappy finish to memory")
            }
            CompressionType::Default => panic!("message-set packed with default compression"),
        };

        let m = Message::from_payload(&packed);
        let mut buf = BytesMut::from(m.bytes());
        buf[COMPVER_POS] = comp.code();
        Message(buf.freeze())
    }

    /// Reads one message from `r`. Returns `None` on a clean end of
    /// stream. A stream that ends inside the header or the payload is
    /// corrupt and fails.
    pub fn read<R: Read>(r: &mut R) -> io::Result<Option<Message>> {
        let mut header = [0u8; HEADER_SIZE];
        let mut got = 0;
        while got < HEADER_SIZE {
            let n = r.read(&mut header[got..])?;
            if n == 0 {
                break;
            }
            got += n;
        }

        if got == 0 {
            return Ok(None);
        }
        if got < HEADER_SIZE {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "short buffer reading message header",
            ));
        }

        let plen = u32::from_be_bytes([header[5], header[6], header[7], header[8]]) as usize;
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + plen);
        buf.extend_from_slice(&header);
        buf.resize(HEADER_SIZE + plen, 0);
        r.read_exact(&mut buf[HEADER_SIZE..])?;

        Ok(Some(Message(buf.freeze())))
    }

    /// Unpacks a message-set into its component messages.
    ///
    /// Compression code 0 means the bytes are not a wrapped set but a
    /// plain sequence of messages, read as-is from the start. That keeps
    /// legacy data readable; newly written sets always carry a real code.
    pub fn unpack(&self) -> AppResult<Vec<Message>> {
        if self.compression_code() > 0 {
            let comp = CompressionType::from_code(self.compression_code())?;
            unpack_stream(self.payload(), comp)
        } else {
            unpack_stream(self.bytes(), CompressionType::None)
        }
    }

    /// The combined compression/version byte.
    pub fn compver(&self) -> u8 {
        self.0[COMPVER_POS]
    }

    /// Compression code from the low nibble of the header byte.
    pub fn compression_code(&self) -> u8 {
        self.compver() & 15
    }

    /// Format version from the high nibble of the header byte.
    pub fn version(&self) -> u8 {
        self.compver() >> 4
    }

    /// Total message size in bytes as claimed by the length header.
    pub fn size(&self) -> usize {
        self.plength() as usize + HEADER_SIZE
    }

    /// Stored checksum of the payload.
    pub fn crc32(&self) -> u32 {
        u32::from_be_bytes([
            self.0[CRC_POS],
            self.0[CRC_POS + 1],
            self.0[CRC_POS + 2],
            self.0[CRC_POS + 3],
        ])
    }

    /// Payload length in bytes as claimed by the header.
    pub fn plength(&self) -> u32 {
        u32::from_be_bytes([
            self.0[PLENGTH_POS],
            self.0[PLENGTH_POS + 1],
            self.0[PLENGTH_POS + 2],
            self.0[PLENGTH_POS + 3],
        ])
    }

    /// The actual payload bytes present after the header.
    pub fn payload(&self) -> &[u8] {
        &self.0[PAYLOAD_POS..]
    }

    /// Payload as a shared slice of the underlying buffer.
    pub fn payload_bytes(&self) -> Bytes {
        self.0.slice(PAYLOAD_POS..)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }

    /// Recomputes the payload CRC and compares it with the header.
    pub fn checksum_ok(&self) -> bool {
        crc32fast::hash(self.payload()) == self.crc32()
    }
}

fn unpack_stream(data: &[u8], comp: CompressionType) -> AppResult<Vec<Message>> {
    let mut reader: Box<dyn Read + '_> = match comp {
        CompressionType::Default | CompressionType::None => Box::new(data),
        CompressionType::Gzip => Box::new(GzDecoder::new(data)),
        CompressionType::Snappy => Box::new(snap::read::FrameDecoder::new(data)),
    };

    let mut msgs = Vec::new();
    while let Some(m) = Message::read(&mut reader)? {
        msgs.push(m);
    }
    Ok(msgs)
}
