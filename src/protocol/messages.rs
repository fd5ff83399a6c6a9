//! Classic Kafka message and message-set codec.
//!
//! # Wire layout
//!
//! A message set is a bare concatenation of entries (no count prefix):
//!
//! ```text
//! offset:i64 | size:i32 | message
//! ```
//!
//! and each message is:
//!
//! ```text
//! crc:i32 | magic:i8 | attributes:i8 | timestamp:i64 (magic >= 1) | key:bytes | value:bytes
//! ```
//!
//! The CRC is CRC-32 (IEEE, reflected) over everything from the magic byte
//! through the value. The low two bits of the attribute byte select the
//! compression codec; a compressed message's value holds a complete nested
//! message set which is decoded recursively, the inner messages keeping
//! their own offsets.
//!
//! Brokers may truncate the last entry of a fetched set at the fetch-size
//! boundary, so the decoder has a tolerant mode that discards a partial
//! trailing entry instead of failing.

use std::io::{Read, Write};

use bytes::{Buf, Bytes};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use crate::constants::{COMPRESSION_CODEC_MASK, MESSAGE_SET_ENTRY_OVERHEAD, MESSAGE_V0_HEADER_SIZE};
use crate::encode::{encode_crc_prefixed, encode_length_prefixed, ToByte};
use crate::error::{Error, Result};

/// Compression codec carried in the low two bits of a message's attribute
/// byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(i8)]
pub enum Compression {
    #[default]
    None = 0,
    Gzip = 1,
}

impl Compression {
    /// Extract the codec from an attribute byte.
    pub fn from_attributes(attributes: i8) -> Result<Self> {
        match attributes & COMPRESSION_CODEC_MASK {
            0 => Ok(Compression::None),
            1 => Ok(Compression::Gzip),
            bits => Err(Error::UnsupportedCodec(bits)),
        }
    }

    /// The attribute byte for a message carrying this codec.
    pub fn attributes(self) -> i8 {
        self as i8
    }
}

/// A single decoded or to-be-produced message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Offset of this message within its partition log. Producers write 0;
    /// brokers assign the real offset on append.
    pub offset: i64,
    /// Message format version: 0, or 1 when a timestamp is present.
    pub magic: i8,
    /// Raw attribute byte (compression bits included).
    pub attributes: i8,
    /// Milliseconds since epoch; only on the wire when `magic >= 1`.
    pub timestamp: Option<i64>,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
}

impl Message {
    /// A plain magic-0 message.
    pub fn new(key: Option<Bytes>, value: Option<Bytes>) -> Self {
        Self {
            offset: 0,
            magic: 0,
            attributes: 0,
            timestamp: None,
            key,
            value,
        }
    }

    pub fn compression(&self) -> Result<Compression> {
        Compression::from_attributes(self.attributes)
    }

    /// Render the message itself (no offset/size entry header). The CRC
    /// slot is backfilled over magic..value.
    fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        encode_crc_prefixed(buffer, |b| {
            self.magic.encode(b)?;
            self.attributes.encode(b)?;
            if self.magic >= 1 {
                self.timestamp.unwrap_or(-1).encode(b)?;
            }
            self.key.clone().encode(b)?;
            self.value.clone().encode(b)
        })
    }
}

/// An ordered batch of messages, encoded and decoded as a unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageSet {
    pub messages: Vec<Message>,
}

impl MessageSet {
    pub fn new(messages: Vec<Message>) -> Self {
        Self { messages }
    }

    /// Render every entry as `offset | size | message`.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        for message in &self.messages {
            message.offset.encode(buffer)?;
            encode_length_prefixed(buffer, |b| message.encode(b))?;
        }
        Ok(())
    }

    /// Render the set under the given codec. For [`Compression::None`]
    /// this is a plain encode; for GZIP the whole set is encoded, then
    /// compressed, then wrapped as the value of a single outer message
    /// whose attribute bits name the codec.
    pub fn encode_with_codec(&self, codec: Compression, buffer: &mut Vec<u8>) -> Result<()> {
        match codec {
            Compression::None => self.encode(buffer),
            Compression::Gzip => {
                let mut inner = Vec::new();
                self.encode(&mut inner)?;
                let compressed = gzip_compress(&inner)?;
                let outer = Message {
                    offset: 0,
                    magic: 0,
                    attributes: Compression::Gzip.attributes(),
                    timestamp: None,
                    key: None,
                    value: Some(Bytes::from(compressed)),
                };
                MessageSet::new(vec![outer]).encode(buffer)
            }
        }
    }

    /// Decode a message set from raw bytes.
    ///
    /// `tolerate_partial` is how Fetch responses are decoded: a trailing
    /// entry cut off at the fetch-size boundary ends the set cleanly.
    /// Everywhere else (nested compressed sets in particular) the set is
    /// expected complete and a truncated entry is a
    /// [`Error::BufferUnderRun`].
    pub fn decode(data: Bytes, tolerate_partial: bool) -> Result<Self> {
        let mut buf = data;
        let mut messages = Vec::new();

        while !buf.is_empty() {
            // Not even room for the offset/size entry header.
            if buf.len() < MESSAGE_SET_ENTRY_OVERHEAD {
                break;
            }
            let offset = buf.get_i64();
            let size = buf.get_i32();
            if size < 0 {
                return Err(Error::ParsingError(buf.copy_to_bytes(buf.remaining())));
            }
            if size as usize > buf.len() {
                if tolerate_partial {
                    break;
                }
                return Err(Error::BufferUnderRun("message set entry"));
            }
            let body = buf.split_to(size as usize);
            Self::decode_entry(offset, body, &mut messages)?;
        }

        Ok(Self { messages })
    }

    /// Decode one entry body (crc onward), appending either the message
    /// itself or, for a compressed entry, the recursively decoded inner
    /// set. Inner messages carry their own offsets; the outer offset is
    /// only a base and is not propagated.
    fn decode_entry(offset: i64, data: Bytes, messages: &mut Vec<Message>) -> Result<()> {
        if data.len() < MESSAGE_V0_HEADER_SIZE {
            return Err(Error::BufferUnderRun("message header"));
        }

        let stored = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let computed = crc32fast::hash(&data[4..]);
        if stored != computed {
            return Err(Error::CrcMismatch { stored, computed });
        }

        let mut buf = data.slice(4..);
        let magic = buf.get_i8();
        let attributes = buf.get_i8();

        let timestamp = if magic >= 1 {
            if buf.len() < 8 {
                return Err(Error::BufferUnderRun("message timestamp"));
            }
            Some(buf.get_i64())
        } else {
            None
        };

        let key = read_nullable_bytes(&mut buf)?;
        let value = read_nullable_bytes(&mut buf)?;

        match Compression::from_attributes(attributes)? {
            Compression::None => {
                messages.push(Message {
                    offset,
                    magic,
                    attributes,
                    timestamp,
                    key,
                    value,
                });
                Ok(())
            }
            Compression::Gzip => {
                let compressed = value.ok_or(Error::BufferUnderRun("compressed value"))?;
                let inner = gzip_decompress(&compressed)?;
                let inner_set = MessageSet::decode(Bytes::from(inner), false)?;
                messages.extend(inner_set.messages);
                Ok(())
            }
        }
    }
}

/// Read an i32-length-prefixed nullable byte field with bounds checking.
fn read_nullable_bytes(buf: &mut Bytes) -> Result<Option<Bytes>> {
    if buf.len() < 4 {
        return Err(Error::BufferUnderRun("bytes length"));
    }
    let len = buf.get_i32();
    if len == -1 {
        return Ok(None);
    }
    if len < 0 {
        return Err(Error::ParsingError(buf.copy_to_bytes(buf.remaining())));
    }
    if len as usize > buf.len() {
        return Err(Error::BufferUnderRun("bytes payload"));
    }
    Ok(Some(buf.split_to(len as usize)))
}

fn gzip_compress(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).map_err(Error::from)?;
    encoder.finish().map_err(Error::from)
}

fn gzip_decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out).map_err(Error::from)?;
    Ok(out)
}
