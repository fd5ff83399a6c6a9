//! Metadata API codec.
//!
//! The only request that can be addressed to any broker in the cluster:
//! it answers which topics exist, how they are partitioned, which broker
//! leads each partition, and where every broker listens. The router's
//! topology cache is built exclusively from these responses.

use bytes::Bytes;
use nom::number::complete::{be_i16, be_i32};
use nom::IResult;
use nombytes::NomBytes;
use num_traits::FromPrimitive;

use crate::encode::{encode_as_array, ToByte};
use crate::error::{KafkaCode, Result};
use crate::parser::{self, parse_array, parse_string};
use crate::protocol::{
    parse_header_response, ApiKey, HeaderResponse, KafkaRequest, KafkaResponse,
};

/// Metadata request, api version 0.
///
/// `topics: None` (or an empty list) asks for every topic in the cluster;
/// the wire encodes both as a zero-length array since requests may not
/// carry null arrays.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataRequest {
    pub topics: Option<Vec<String>>,
}

impl MetadataRequest {
    pub fn new(topics: Option<Vec<String>>) -> Self {
        Self { topics }
    }

    pub fn all_topics() -> Self {
        Self { topics: None }
    }

    pub fn for_topic(topic: &str) -> Self {
        Self {
            topics: Some(vec![topic.to_string()]),
        }
    }
}

impl KafkaRequest for MetadataRequest {
    const API_KEY: ApiKey = ApiKey::Metadata;

    type Response = MetadataResponse;

    fn encode_versioned(&self, buffer: &mut Vec<u8>, _api_version: i16) -> Result<()> {
        match &self.topics {
            Some(topics) => encode_as_array(buffer, topics, |b, t| t.encode(b)),
            None => 0i32.encode(buffer),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Broker {
    pub node_id: i32,
    pub host: String,
    pub port: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionMetadata {
    pub error_code: KafkaCode,
    pub partition: i32,
    /// Broker id of the current leader; -1 while an election is running.
    pub leader: i32,
    pub replicas: Vec<i32>,
    pub isr: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicMetadata {
    pub error_code: KafkaCode,
    pub topic: String,
    pub partitions: Vec<PartitionMetadata>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataResponse {
    pub header: HeaderResponse,
    pub brokers: Vec<Broker>,
    pub topics: Vec<TopicMetadata>,
}

impl KafkaResponse for MetadataResponse {
    fn parse(data: Bytes, api_version: i16) -> Result<Self> {
        let (_, response) = parse_metadata_response(NomBytes::new(data.clone()), api_version)
            .map_err(|err| parser::to_crate_error(data, err))?;
        Ok(response)
    }

    fn error_codes(&self) -> Vec<KafkaCode> {
        self.topics
            .iter()
            .flat_map(|t| {
                std::iter::once(t.error_code).chain(t.partitions.iter().map(|p| p.error_code))
            })
            .collect()
    }
}

fn parse_broker(s: NomBytes) -> IResult<NomBytes, Broker> {
    let (s, node_id) = be_i32(s)?;
    let (s, host) = parse_string(s)?;
    let host = parser::bytes_to_string(&host)?;
    let (s, port) = be_i32(s)?;
    Ok((s, Broker { node_id, host, port }))
}

fn parse_partition(s: NomBytes) -> IResult<NomBytes, PartitionMetadata> {
    let (s, error_code) = be_i16(s)?;
    let (s, partition) = be_i32(s)?;
    let (s, leader) = be_i32(s)?;
    let (s, replicas) = parse_array(be_i32)(s)?;
    let (s, isr) = parse_array(be_i32)(s)?;
    Ok((
        s,
        PartitionMetadata {
            error_code: KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
            partition,
            leader,
            replicas,
            isr,
        },
    ))
}

fn parse_topic(s: NomBytes) -> IResult<NomBytes, TopicMetadata> {
    let (s, error_code) = be_i16(s)?;
    let (s, topic) = parse_string(s)?;
    let topic = parser::bytes_to_string(&topic)?;
    let (s, partitions) = parse_array(parse_partition)(s)?;
    Ok((
        s,
        TopicMetadata {
            error_code: KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
            topic,
            partitions,
        },
    ))
}

pub fn parse_metadata_response(
    s: NomBytes,
    _api_version: i16,
) -> IResult<NomBytes, MetadataResponse> {
    let (s, header) = parse_header_response(s)?;
    let (s, brokers) = parse_array(parse_broker)(s)?;
    let (s, topics) = parse_array(parse_topic)(s)?;
    Ok((
        s,
        MetadataResponse {
            header,
            brokers,
            topics,
        },
    ))
}
