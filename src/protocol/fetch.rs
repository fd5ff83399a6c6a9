//! Fetch API codec.
//!
//! The interesting part of a fetch response is the per-partition message
//! set: the broker cuts it off at the fetch-size boundary, so the set is
//! decoded tolerantly — a partial trailing message is discarded, while a
//! corrupt or impossible entry still fails the decode.

use bytes::Bytes;
use nom::number::complete::{be_i16, be_i32, be_i64};
use nom::IResult;
use nombytes::NomBytes;
use num_traits::FromPrimitive;

use crate::constants::CONSUMER_REPLICA_ID;
use crate::encode::{encode_as_array, ToByte};
use crate::error::{KafkaCode, Result};
use crate::parser::{self, parse_array, parse_nullable_bytes, parse_string};
use crate::protocol::messages::MessageSet;
use crate::protocol::{
    parse_header_response, ApiKey, HeaderResponse, KafkaRequest, KafkaResponse,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchPartition {
    pub partition: i32,
    /// Offset to start fetching from.
    pub offset: i64,
    /// Upper bound on the bytes the broker returns for this partition.
    pub max_bytes: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTopic {
    pub topic: String,
    pub partitions: Vec<FetchPartition>,
}

/// Fetch request, api versions 0 and 1 (identical bodies; v1 adds the
/// response throttle field).
#[derive(Debug, Clone)]
pub struct FetchRequest {
    /// How long the broker may park the request waiting for `min_bytes`.
    pub max_wait_ms: i32,
    /// Minimum bytes to accumulate before responding.
    pub min_bytes: i32,
    pub topics: Vec<FetchTopic>,
}

impl FetchRequest {
    pub fn new(max_wait_ms: i32, min_bytes: i32, topics: Vec<FetchTopic>) -> Self {
        Self {
            max_wait_ms,
            min_bytes,
            topics,
        }
    }

    /// Fetch a single partition from one offset.
    pub fn single(
        topic: &str,
        partition: i32,
        offset: i64,
        max_bytes: i32,
        max_wait_ms: i32,
        min_bytes: i32,
    ) -> Self {
        Self::new(
            max_wait_ms,
            min_bytes,
            vec![FetchTopic {
                topic: topic.to_string(),
                partitions: vec![FetchPartition {
                    partition,
                    offset,
                    max_bytes,
                }],
            }],
        )
    }
}

impl KafkaRequest for FetchRequest {
    const API_KEY: ApiKey = ApiKey::Fetch;
    const MAX_VERSION: i16 = 1;

    type Response = FetchResponse;

    fn encode_versioned(&self, buffer: &mut Vec<u8>, _api_version: i16) -> Result<()> {
        CONSUMER_REPLICA_ID.encode(buffer)?;
        self.max_wait_ms.encode(buffer)?;
        self.min_bytes.encode(buffer)?;
        encode_as_array(buffer, &self.topics, |b, topic| {
            topic.topic.encode(b)?;
            encode_as_array(b, &topic.partitions, |b, p| {
                p.partition.encode(b)?;
                p.offset.encode(b)?;
                p.max_bytes.encode(b)
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponsePartition {
    pub partition: i32,
    pub error_code: KafkaCode,
    /// Offset of the last committed message in the partition log.
    pub high_watermark: i64,
    pub messages: MessageSet,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponseTopic {
    pub topic: String,
    pub partitions: Vec<FetchResponsePartition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub header: HeaderResponse,
    /// Present from v1.
    pub throttle_time_ms: Option<i32>,
    pub topics: Vec<FetchResponseTopic>,
}

impl KafkaResponse for FetchResponse {
    fn parse(data: Bytes, api_version: i16) -> Result<Self> {
        let (_, raw) = parse_fetch_response(NomBytes::new(data.clone()), api_version)
            .map_err(|err| parser::to_crate_error(data, err))?;

        // Message sets are decoded outside nom so CRC and codec failures
        // surface with their own error kinds.
        let mut topics = Vec::with_capacity(raw.topics.len());
        for topic in raw.topics {
            let mut partitions = Vec::with_capacity(topic.partitions.len());
            for (partition, error_code, high_watermark, set_bytes) in topic.partitions {
                let messages = MessageSet::decode(set_bytes.unwrap_or_default(), true)?;
                partitions.push(FetchResponsePartition {
                    partition,
                    error_code,
                    high_watermark,
                    messages,
                });
            }
            topics.push(FetchResponseTopic {
                topic: topic.topic,
                partitions,
            });
        }

        Ok(Self {
            header: raw.header,
            throttle_time_ms: raw.throttle_time_ms,
            topics,
        })
    }

    fn error_codes(&self) -> Vec<KafkaCode> {
        self.topics
            .iter()
            .flat_map(|t| t.partitions.iter().map(|p| p.error_code))
            .collect()
    }
}

struct RawFetchTopic {
    topic: String,
    partitions: Vec<(i32, KafkaCode, i64, Option<Bytes>)>,
}

struct RawFetchResponse {
    header: HeaderResponse,
    throttle_time_ms: Option<i32>,
    topics: Vec<RawFetchTopic>,
}

fn parse_raw_partition(s: NomBytes) -> IResult<NomBytes, (i32, KafkaCode, i64, Option<Bytes>)> {
    let (s, partition) = be_i32(s)?;
    let (s, error_code) = be_i16(s)?;
    let (s, high_watermark) = be_i64(s)?;
    let (s, set_bytes) = parse_nullable_bytes(s)?;
    Ok((
        s,
        (
            partition,
            KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
            high_watermark,
            set_bytes,
        ),
    ))
}

fn parse_raw_topic(s: NomBytes) -> IResult<NomBytes, RawFetchTopic> {
    let (s, topic) = parse_string(s)?;
    let topic = parser::bytes_to_string(&topic)?;
    let (s, partitions) = parse_array(parse_raw_partition)(s)?;
    Ok((s, RawFetchTopic { topic, partitions }))
}

fn parse_fetch_response(s: NomBytes, api_version: i16) -> IResult<NomBytes, RawFetchResponse> {
    let (s, header) = parse_header_response(s)?;
    let (s, throttle_time_ms) = if api_version >= 1 {
        let (s, throttle) = be_i32(s)?;
        (s, Some(throttle))
    } else {
        (s, None)
    };
    let (s, topics) = parse_array(parse_raw_topic)(s)?;
    Ok((
        s,
        RawFetchResponse {
            header,
            throttle_time_ms,
            topics,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::Message;

    fn encode_set(values: &[&str]) -> Vec<u8> {
        let set = MessageSet::new(
            values
                .iter()
                .map(|v| Message::new(None, Some(Bytes::copy_from_slice(v.as_bytes()))))
                .collect(),
        );
        let mut buffer = Vec::new();
        set.encode(&mut buffer).unwrap();
        buffer
    }

    fn response_frame(correlation_id: i32, throttle: Option<i32>, set_bytes: &[u8]) -> Vec<u8> {
        let mut frame = correlation_id.to_be_bytes().to_vec();
        if let Some(t) = throttle {
            frame.extend_from_slice(&t.to_be_bytes());
        }
        frame.extend_from_slice(&1i32.to_be_bytes()); // one topic
        frame.extend_from_slice(&[0x00, 0x01, b't']);
        frame.extend_from_slice(&1i32.to_be_bytes()); // one partition
        frame.extend_from_slice(&0i32.to_be_bytes()); // partition 0
        frame.extend_from_slice(&0i16.to_be_bytes()); // no error
        frame.extend_from_slice(&42i64.to_be_bytes()); // high watermark
        frame.extend_from_slice(&(set_bytes.len() as i32).to_be_bytes());
        frame.extend_from_slice(set_bytes);
        frame
    }

    #[test]
    fn test_encode_request_layout() {
        let request = FetchRequest::single("t", 2, 77, 1024, 100, 1);
        let mut body = Vec::new();
        request.encode_versioned(&mut body, 0).unwrap();

        assert_eq!(&body[0..4], &(-1i32).to_be_bytes()); // replica id
        assert_eq!(&body[4..8], &100i32.to_be_bytes()); // max wait
        assert_eq!(&body[8..12], &1i32.to_be_bytes()); // min bytes
        assert_eq!(&body[12..16], &1i32.to_be_bytes()); // topic count
        assert_eq!(&body[16..19], &[0x00, 0x01, b't']);
        assert_eq!(&body[19..23], &1i32.to_be_bytes()); // partition count
        assert_eq!(&body[23..27], &2i32.to_be_bytes());
        assert_eq!(&body[27..35], &77i64.to_be_bytes());
        assert_eq!(&body[35..39], &1024i32.to_be_bytes());
    }

    #[test]
    fn test_parse_response_v0() {
        let set = encode_set(&["hello"]);
        let frame = response_frame(3, None, &set);

        let response = FetchResponse::parse(Bytes::from(frame), 0).unwrap();
        assert_eq!(response.header.correlation_id, 3);
        assert_eq!(response.throttle_time_ms, None);
        let partition = &response.topics[0].partitions[0];
        assert_eq!(partition.high_watermark, 42);
        assert_eq!(partition.messages.messages.len(), 1);
        assert_eq!(
            partition.messages.messages[0].value,
            Some(Bytes::from_static(b"hello"))
        );
    }

    #[test]
    fn test_parse_response_v1_throttle() {
        let set = encode_set(&["x"]);
        let frame = response_frame(1, Some(15), &set);

        let response = FetchResponse::parse(Bytes::from(frame), 1).unwrap();
        assert_eq!(response.throttle_time_ms, Some(15));
    }

    #[test]
    fn test_partial_trailing_message_discarded() {
        let set = encode_set(&["complete", "truncated"]);
        // first entry: 12-byte header + 22-byte body; keep it plus a
        // sliver of the second entry
        let cut = &set[..12 + 22 + 14];
        let frame = response_frame(1, None, cut);

        let response = FetchResponse::parse(Bytes::from(frame), 0).unwrap();
        let messages = &response.topics[0].partitions[0].messages.messages;
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].value, Some(Bytes::from_static(b"complete")));
    }

    #[test]
    fn test_corrupt_message_still_fails() {
        let mut set = encode_set(&["payload"]);
        let last = set.len() - 1;
        set[last] ^= 0x01;
        let frame = response_frame(1, None, &set);

        let err = FetchResponse::parse(Bytes::from(frame), 0).unwrap_err();
        assert!(matches!(err, crate::error::Error::CrcMismatch { .. }));
    }

    #[test]
    fn test_empty_message_set() {
        let frame = response_frame(1, None, &[]);
        let response = FetchResponse::parse(Bytes::from(frame), 0).unwrap();
        assert!(response.topics[0].partitions[0].messages.messages.is_empty());
    }

    #[test]
    fn test_error_codes_collected() {
        let mut frame = 1i32.to_be_bytes().to_vec();
        frame.extend_from_slice(&1i32.to_be_bytes());
        frame.extend_from_slice(&[0x00, 0x01, b't']);
        frame.extend_from_slice(&1i32.to_be_bytes());
        frame.extend_from_slice(&0i32.to_be_bytes());
        frame.extend_from_slice(&1i16.to_be_bytes()); // OffsetOutOfRange
        frame.extend_from_slice(&(-1i64).to_be_bytes());
        frame.extend_from_slice(&0i32.to_be_bytes()); // empty set

        let response = FetchResponse::parse(Bytes::from(frame), 0).unwrap();
        assert_eq!(response.error_codes(), vec![KafkaCode::OffsetOutOfRange]);
    }
}
