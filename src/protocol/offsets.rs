//! Offset API codecs: ListOffsets, OffsetCommit, OffsetFetch.
//!
//! OffsetCommit is the most version-sensitive API in the supported
//! surface: v1 adds the group generation and member id (plus a
//! per-partition timestamp), v2 drops the timestamp again in favor of a
//! request-level retention time.

use bytes::Bytes;
use nom::number::complete::{be_i16, be_i32, be_i64};
use nom::IResult;
use nombytes::NomBytes;
use num_traits::FromPrimitive;

use crate::constants::CONSUMER_REPLICA_ID;
use crate::encode::{encode_as_array, ToByte};
use crate::error::{KafkaCode, Result};
use crate::parser::{self, parse_array, parse_nullable_string, parse_string};
use crate::protocol::{
    parse_header_response, ApiKey, HeaderResponse, KafkaRequest, KafkaResponse,
};

/// Timestamp sentinel asking for the end of the log.
pub const LATEST_OFFSET: i64 = -1;
/// Timestamp sentinel asking for the beginning of the log.
pub const EARLIEST_OFFSET: i64 = -2;

// ============================================================================
// ListOffsets
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOffsetsPartition {
    pub partition: i32,
    /// Target time in ms, or [`LATEST_OFFSET`] / [`EARLIEST_OFFSET`].
    pub timestamp: i64,
    /// v0 only: how many offsets the broker may return.
    pub max_offsets: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOffsetsTopic {
    pub topic: String,
    pub partitions: Vec<ListOffsetsPartition>,
}

/// ListOffsets ("Offset") request, api versions 0 and 1.
#[derive(Debug, Clone)]
pub struct ListOffsetsRequest {
    pub topics: Vec<ListOffsetsTopic>,
}

impl ListOffsetsRequest {
    pub fn new(topics: Vec<ListOffsetsTopic>) -> Self {
        Self { topics }
    }

    pub fn single(topic: &str, partition: i32, timestamp: i64, max_offsets: i32) -> Self {
        Self::new(vec![ListOffsetsTopic {
            topic: topic.to_string(),
            partitions: vec![ListOffsetsPartition {
                partition,
                timestamp,
                max_offsets,
            }],
        }])
    }
}

impl KafkaRequest for ListOffsetsRequest {
    const API_KEY: ApiKey = ApiKey::ListOffsets;
    const MAX_VERSION: i16 = 1;

    type Response = ListOffsetsResponse;

    fn encode_versioned(&self, buffer: &mut Vec<u8>, api_version: i16) -> Result<()> {
        CONSUMER_REPLICA_ID.encode(buffer)?;
        encode_as_array(buffer, &self.topics, |b, topic| {
            topic.topic.encode(b)?;
            encode_as_array(b, &topic.partitions, |b, p| {
                p.partition.encode(b)?;
                p.timestamp.encode(b)?;
                if api_version == 0 {
                    p.max_offsets.encode(b)?;
                }
                Ok(())
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOffsetsResponsePartition {
    pub partition: i32,
    pub error_code: KafkaCode,
    /// v0: the offset list the broker chose; v1: a single offset.
    pub offsets: Vec<i64>,
    /// v1 only: the timestamp of the returned offset.
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOffsetsResponseTopic {
    pub topic: String,
    pub partitions: Vec<ListOffsetsResponsePartition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOffsetsResponse {
    pub header: HeaderResponse,
    pub topics: Vec<ListOffsetsResponseTopic>,
}

impl KafkaResponse for ListOffsetsResponse {
    fn parse(data: Bytes, api_version: i16) -> Result<Self> {
        let (_, response) = parse_list_offsets_response(NomBytes::new(data.clone()), api_version)
            .map_err(|err| parser::to_crate_error(data, err))?;
        Ok(response)
    }

    fn error_codes(&self) -> Vec<KafkaCode> {
        self.topics
            .iter()
            .flat_map(|t| t.partitions.iter().map(|p| p.error_code))
            .collect()
    }
}

fn parse_list_offsets_partition(
    api_version: i16,
) -> impl Fn(NomBytes) -> IResult<NomBytes, ListOffsetsResponsePartition> + Copy {
    move |s: NomBytes| {
        let (s, partition) = be_i32(s)?;
        let (s, error_code) = be_i16(s)?;
        let error_code = KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown);
        if api_version >= 1 {
            let (s, timestamp) = be_i64(s)?;
            let (s, offset) = be_i64(s)?;
            Ok((
                s,
                ListOffsetsResponsePartition {
                    partition,
                    error_code,
                    offsets: vec![offset],
                    timestamp: Some(timestamp),
                },
            ))
        } else {
            let (s, offsets) = parse_array(be_i64)(s)?;
            Ok((
                s,
                ListOffsetsResponsePartition {
                    partition,
                    error_code,
                    offsets,
                    timestamp: None,
                },
            ))
        }
    }
}

fn parse_list_offsets_topic(
    api_version: i16,
) -> impl Fn(NomBytes) -> IResult<NomBytes, ListOffsetsResponseTopic> + Copy {
    move |s: NomBytes| {
        let (s, topic) = parse_string(s)?;
        let topic = parser::bytes_to_string(&topic)?;
        let (s, partitions) = parse_array(parse_list_offsets_partition(api_version))(s)?;
        Ok((s, ListOffsetsResponseTopic { topic, partitions }))
    }
}

pub fn parse_list_offsets_response(
    s: NomBytes,
    api_version: i16,
) -> IResult<NomBytes, ListOffsetsResponse> {
    let (s, header) = parse_header_response(s)?;
    let (s, topics) = parse_array(parse_list_offsets_topic(api_version))(s)?;
    Ok((s, ListOffsetsResponse { header, topics }))
}

// ============================================================================
// OffsetCommit
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetCommitPartition {
    pub partition: i32,
    pub offset: i64,
    /// v1 only: commit timestamp; -1 lets the broker stamp it.
    pub timestamp: i64,
    pub metadata: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetCommitTopic {
    pub topic: String,
    pub partitions: Vec<OffsetCommitPartition>,
}

/// OffsetCommit request, api versions 0 through 2.
///
/// - v0: `group_id | topics`
/// - v1: adds `generation_id`, `member_id`, and a per-partition timestamp
/// - v2: keeps generation/member, drops the partition timestamp, adds
///   `retention_time_ms`
#[derive(Debug, Clone)]
pub struct OffsetCommitRequest {
    pub group_id: String,
    pub generation_id: i32,
    pub member_id: String,
    /// v2 only; -1 uses the broker's configured retention.
    pub retention_time_ms: i64,
    pub topics: Vec<OffsetCommitTopic>,
}

impl OffsetCommitRequest {
    pub fn new(group_id: &str, topics: Vec<OffsetCommitTopic>) -> Self {
        Self {
            group_id: group_id.to_string(),
            generation_id: -1,
            member_id: String::new(),
            retention_time_ms: -1,
            topics,
        }
    }
}

impl KafkaRequest for OffsetCommitRequest {
    const API_KEY: ApiKey = ApiKey::OffsetCommit;
    const MAX_VERSION: i16 = 2;

    type Response = OffsetCommitResponse;

    fn encode_versioned(&self, buffer: &mut Vec<u8>, api_version: i16) -> Result<()> {
        self.group_id.encode(buffer)?;
        if api_version >= 1 {
            self.generation_id.encode(buffer)?;
            self.member_id.encode(buffer)?;
        }
        if api_version >= 2 {
            self.retention_time_ms.encode(buffer)?;
        }
        encode_as_array(buffer, &self.topics, |b, topic| {
            topic.topic.encode(b)?;
            encode_as_array(b, &topic.partitions, |b, p| {
                p.partition.encode(b)?;
                p.offset.encode(b)?;
                if api_version == 1 {
                    p.timestamp.encode(b)?;
                }
                p.metadata.as_deref().encode(b)
            })
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetCommitResponsePartition {
    pub partition: i32,
    pub error_code: KafkaCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetCommitResponseTopic {
    pub topic: String,
    pub partitions: Vec<OffsetCommitResponsePartition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetCommitResponse {
    pub header: HeaderResponse,
    pub topics: Vec<OffsetCommitResponseTopic>,
}

impl KafkaResponse for OffsetCommitResponse {
    fn parse(data: Bytes, _api_version: i16) -> Result<Self> {
        let (_, response) = parse_offset_commit_response(NomBytes::new(data.clone()))
            .map_err(|err| parser::to_crate_error(data, err))?;
        Ok(response)
    }

    fn error_codes(&self) -> Vec<KafkaCode> {
        self.topics
            .iter()
            .flat_map(|t| t.partitions.iter().map(|p| p.error_code))
            .collect()
    }
}

fn parse_offset_commit_partition(
    s: NomBytes,
) -> IResult<NomBytes, OffsetCommitResponsePartition> {
    let (s, partition) = be_i32(s)?;
    let (s, error_code) = be_i16(s)?;
    Ok((
        s,
        OffsetCommitResponsePartition {
            partition,
            error_code: KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
        },
    ))
}

fn parse_offset_commit_topic(s: NomBytes) -> IResult<NomBytes, OffsetCommitResponseTopic> {
    let (s, topic) = parse_string(s)?;
    let topic = parser::bytes_to_string(&topic)?;
    let (s, partitions) = parse_array(parse_offset_commit_partition)(s)?;
    Ok((s, OffsetCommitResponseTopic { topic, partitions }))
}

pub fn parse_offset_commit_response(s: NomBytes) -> IResult<NomBytes, OffsetCommitResponse> {
    let (s, header) = parse_header_response(s)?;
    let (s, topics) = parse_array(parse_offset_commit_topic)(s)?;
    Ok((s, OffsetCommitResponse { header, topics }))
}

// ============================================================================
// OffsetFetch
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetFetchTopic {
    pub topic: String,
    pub partitions: Vec<i32>,
}

/// OffsetFetch request, api versions 0 and 1 (identical wire format; v0
/// reads ZooKeeper-era offsets, v1 reads Kafka-stored offsets).
#[derive(Debug, Clone)]
pub struct OffsetFetchRequest {
    pub group_id: String,
    pub topics: Vec<OffsetFetchTopic>,
}

impl OffsetFetchRequest {
    pub fn new(group_id: &str, topics: Vec<OffsetFetchTopic>) -> Self {
        Self {
            group_id: group_id.to_string(),
            topics,
        }
    }
}

impl KafkaRequest for OffsetFetchRequest {
    const API_KEY: ApiKey = ApiKey::OffsetFetch;
    const MAX_VERSION: i16 = 1;

    type Response = OffsetFetchResponse;

    fn encode_versioned(&self, buffer: &mut Vec<u8>, _api_version: i16) -> Result<()> {
        self.group_id.encode(buffer)?;
        encode_as_array(buffer, &self.topics, |b, topic| {
            topic.topic.encode(b)?;
            encode_as_array(b, &topic.partitions, |b, p| p.encode(b))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetFetchResponsePartition {
    pub partition: i32,
    /// -1 when the group has no committed offset for the partition.
    pub offset: i64,
    pub metadata: Option<String>,
    pub error_code: KafkaCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetFetchResponseTopic {
    pub topic: String,
    pub partitions: Vec<OffsetFetchResponsePartition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetFetchResponse {
    pub header: HeaderResponse,
    pub topics: Vec<OffsetFetchResponseTopic>,
}

impl KafkaResponse for OffsetFetchResponse {
    fn parse(data: Bytes, _api_version: i16) -> Result<Self> {
        let (_, response) = parse_offset_fetch_response(NomBytes::new(data.clone()))
            .map_err(|err| parser::to_crate_error(data, err))?;
        Ok(response)
    }

    fn error_codes(&self) -> Vec<KafkaCode> {
        self.topics
            .iter()
            .flat_map(|t| t.partitions.iter().map(|p| p.error_code))
            .collect()
    }
}

fn parse_offset_fetch_partition(s: NomBytes) -> IResult<NomBytes, OffsetFetchResponsePartition> {
    let (s, partition) = be_i32(s)?;
    let (s, offset) = be_i64(s)?;
    let (s, metadata) = parse_nullable_string(s)?;
    let metadata = parser::bytes_to_string_opt(metadata)?;
    let (s, error_code) = be_i16(s)?;
    Ok((
        s,
        OffsetFetchResponsePartition {
            partition,
            offset,
            metadata,
            error_code: KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
        },
    ))
}

fn parse_offset_fetch_topic(s: NomBytes) -> IResult<NomBytes, OffsetFetchResponseTopic> {
    let (s, topic) = parse_string(s)?;
    let topic = parser::bytes_to_string(&topic)?;
    let (s, partitions) = parse_array(parse_offset_fetch_partition)(s)?;
    Ok((s, OffsetFetchResponseTopic { topic, partitions }))
}

pub fn parse_offset_fetch_response(s: NomBytes) -> IResult<NomBytes, OffsetFetchResponse> {
    let (s, header) = parse_header_response(s)?;
    let (s, topics) = parse_array(parse_offset_fetch_topic)(s)?;
    Ok((s, OffsetFetchResponse { header, topics }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_offsets_encode_v0_vs_v1() {
        let request = ListOffsetsRequest::single("t", 0, LATEST_OFFSET, 10);

        let mut v0 = Vec::new();
        request.encode_versioned(&mut v0, 0).unwrap();
        let mut v1 = Vec::new();
        request.encode_versioned(&mut v1, 1).unwrap();

        // v0 carries max_offsets, v1 does not
        assert_eq!(v0.len() - v1.len(), 4);
        // replica id is always -1
        assert_eq!(&v0[0..4], &(-1i32).to_be_bytes());
        // v0 tail: max_offsets
        assert_eq!(&v0[v0.len() - 4..], &10i32.to_be_bytes());
    }

    #[test]
    fn test_list_offsets_parse_v0() {
        let mut frame = 5i32.to_be_bytes().to_vec();
        frame.extend_from_slice(&1i32.to_be_bytes());
        frame.extend_from_slice(&[0x00, 0x01, b't']);
        frame.extend_from_slice(&1i32.to_be_bytes());
        frame.extend_from_slice(&0i32.to_be_bytes());
        frame.extend_from_slice(&0i16.to_be_bytes());
        frame.extend_from_slice(&2i32.to_be_bytes()); // two offsets
        frame.extend_from_slice(&500i64.to_be_bytes());
        frame.extend_from_slice(&0i64.to_be_bytes());

        let response = ListOffsetsResponse::parse(Bytes::from(frame), 0).unwrap();
        let partition = &response.topics[0].partitions[0];
        assert_eq!(partition.offsets, vec![500, 0]);
        assert_eq!(partition.timestamp, None);
    }

    #[test]
    fn test_list_offsets_parse_v1() {
        let mut frame = 5i32.to_be_bytes().to_vec();
        frame.extend_from_slice(&1i32.to_be_bytes());
        frame.extend_from_slice(&[0x00, 0x01, b't']);
        frame.extend_from_slice(&1i32.to_be_bytes());
        frame.extend_from_slice(&0i32.to_be_bytes());
        frame.extend_from_slice(&0i16.to_be_bytes());
        frame.extend_from_slice(&1_000i64.to_be_bytes()); // timestamp
        frame.extend_from_slice(&321i64.to_be_bytes()); // offset

        let response = ListOffsetsResponse::parse(Bytes::from(frame), 1).unwrap();
        let partition = &response.topics[0].partitions[0];
        assert_eq!(partition.offsets, vec![321]);
        assert_eq!(partition.timestamp, Some(1_000));
    }

    #[test]
    fn test_offset_commit_version_branches() {
        let request = OffsetCommitRequest {
            group_id: "g".to_string(),
            generation_id: 3,
            member_id: "m".to_string(),
            retention_time_ms: 1000,
            topics: vec![OffsetCommitTopic {
                topic: "t".to_string(),
                partitions: vec![OffsetCommitPartition {
                    partition: 0,
                    offset: 42,
                    timestamp: -1,
                    metadata: None,
                }],
            }],
        };

        let mut v0 = Vec::new();
        request.encode_versioned(&mut v0, 0).unwrap();
        let mut v1 = Vec::new();
        request.encode_versioned(&mut v1, 1).unwrap();
        let mut v2 = Vec::new();
        request.encode_versioned(&mut v2, 2).unwrap();

        // v0: group only. v1: + generation(4) + member(2+1) + partition ts(8).
        assert_eq!(v1.len() - v0.len(), 4 + 3 + 8);
        // v2: + retention(8) but no partition ts.
        assert_eq!(v2.len() - v0.len(), 4 + 3 + 8);

        // v0 starts with the group id directly followed by the topic array
        assert_eq!(&v0[0..3], &[0x00, 0x01, b'g']);
        assert_eq!(&v0[3..7], &1i32.to_be_bytes());
        // v2 carries the retention after the member id
        assert_eq!(&v2[3..7], &3i32.to_be_bytes());
        assert_eq!(&v2[7..10], &[0x00, 0x01, b'm']);
        assert_eq!(&v2[10..18], &1000i64.to_be_bytes());
    }

    #[test]
    fn test_offset_commit_parse_response() {
        let mut frame = 2i32.to_be_bytes().to_vec();
        frame.extend_from_slice(&1i32.to_be_bytes());
        frame.extend_from_slice(&[0x00, 0x01, b't']);
        frame.extend_from_slice(&1i32.to_be_bytes());
        frame.extend_from_slice(&0i32.to_be_bytes());
        frame.extend_from_slice(&22i16.to_be_bytes()); // IllegalGeneration

        let response = OffsetCommitResponse::parse(Bytes::from(frame), 0).unwrap();
        assert_eq!(
            response.error_codes(),
            vec![KafkaCode::IllegalGeneration]
        );
    }

    #[test]
    fn test_offset_fetch_encode_partition_ids_only() {
        let request = OffsetFetchRequest::new(
            "group",
            vec![OffsetFetchTopic {
                topic: "t".to_string(),
                partitions: vec![0, 1, 2],
            }],
        );
        let mut body = Vec::new();
        request.encode_versioned(&mut body, 0).unwrap();

        // group(2+5) topics(4) topic(2+1) partitions(4) + 3*4
        assert_eq!(body.len(), 7 + 4 + 3 + 4 + 12);
        assert_eq!(&body[body.len() - 12..body.len() - 8], &0i32.to_be_bytes());
        assert_eq!(&body[body.len() - 4..], &2i32.to_be_bytes());
    }

    #[test]
    fn test_offset_fetch_parse_response() {
        let mut frame = 2i32.to_be_bytes().to_vec();
        frame.extend_from_slice(&1i32.to_be_bytes());
        frame.extend_from_slice(&[0x00, 0x01, b't']);
        frame.extend_from_slice(&1i32.to_be_bytes());
        frame.extend_from_slice(&1i32.to_be_bytes());
        frame.extend_from_slice(&(-1i64).to_be_bytes()); // no committed offset
        frame.extend_from_slice(&(-1i16).to_be_bytes()); // null metadata
        frame.extend_from_slice(&0i16.to_be_bytes());

        let response = OffsetFetchResponse::parse(Bytes::from(frame), 0).unwrap();
        let partition = &response.topics[0].partitions[0];
        assert_eq!(partition.partition, 1);
        assert_eq!(partition.offset, -1);
        assert_eq!(partition.metadata, None);
        assert_eq!(partition.error_code, KafkaCode::None);
    }
}
