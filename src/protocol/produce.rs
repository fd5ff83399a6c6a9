//! Produce API codec.
//!
//! Requests group their messages by `(topic, partition)`; each group is
//! rendered as its own topic entry with a single-partition array, the
//! message set compressed according to the request codec. Responses carry
//! a base offset per partition, a throttle time from v1, and a
//! log-append timestamp per partition from v2.

use bytes::Bytes;
use nom::number::complete::{be_i16, be_i32, be_i64};
use nom::IResult;
use nombytes::NomBytes;
use num_traits::FromPrimitive;

use crate::encode::{encode_length_prefixed, ToByte};
use crate::error::{KafkaCode, Result};
use crate::parser::{self, parse_array, parse_string};
use crate::protocol::messages::{Compression, Message, MessageSet};
use crate::protocol::{
    parse_header_response, ApiKey, HeaderResponse, KafkaRequest, KafkaResponse,
};

/// One message bound for a concrete topic partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceMessage {
    pub topic: String,
    pub partition: i32,
    pub key: Option<Bytes>,
    pub value: Option<Bytes>,
}

impl ProduceMessage {
    pub fn new(topic: &str, partition: i32, key: Option<Bytes>, value: Option<Bytes>) -> Self {
        Self {
            topic: topic.to_string(),
            partition,
            key,
            value,
        }
    }
}

/// Produce request, api versions 0 through 2 (the body is identical across
/// them; only the response grows).
#[derive(Debug, Clone)]
pub struct ProduceRequest {
    /// Required acks: 0 none (fire-and-forget), 1 leader, -1 all replicas.
    pub acks: i16,
    /// Server-side bound on waiting for replica acknowledgement.
    pub timeout_ms: i32,
    pub compression: Compression,
    pub messages: Vec<ProduceMessage>,
}

impl ProduceRequest {
    pub fn new(
        acks: i16,
        timeout_ms: i32,
        compression: Compression,
        messages: Vec<ProduceMessage>,
    ) -> Self {
        Self {
            acks,
            timeout_ms,
            compression,
            messages,
        }
    }

    /// Group messages by `(topic, partition)` preserving first-appearance
    /// order.
    fn groups(&self) -> Vec<((&str, i32), Vec<Message>)> {
        let mut groups: Vec<((&str, i32), Vec<Message>)> = Vec::new();
        for message in &self.messages {
            let entry = (message.topic.as_str(), message.partition);
            let wire = Message::new(message.key.clone(), message.value.clone());
            match groups.iter_mut().find(|(key, _)| *key == entry) {
                Some((_, set)) => set.push(wire),
                None => groups.push((entry, vec![wire])),
            }
        }
        groups
    }
}

impl KafkaRequest for ProduceRequest {
    const API_KEY: ApiKey = ApiKey::Produce;
    const MAX_VERSION: i16 = 2;

    type Response = ProduceResponse;

    fn encode_versioned(&self, buffer: &mut Vec<u8>, _api_version: i16) -> Result<()> {
        self.acks.encode(buffer)?;
        self.timeout_ms.encode(buffer)?;

        let groups = self.groups();
        (groups.len() as i32).encode(buffer)?;
        for ((topic, partition), messages) in groups {
            topic.encode(buffer)?;
            // One topic entry per group, so the partition count is always 1.
            1i32.encode(buffer)?;
            partition.encode(buffer)?;
            encode_length_prefixed(buffer, |b| {
                MessageSet::new(messages).encode_with_codec(self.compression, b)
            })?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProducePartition {
    pub partition: i32,
    pub error_code: KafkaCode,
    /// Base offset the broker assigned to the first message of the set.
    pub offset: i64,
    /// Broker log-append time, present from v2. -1 when the topic uses
    /// creation-time stamping.
    pub timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceTopic {
    pub topic: String,
    pub partitions: Vec<ProducePartition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceResponse {
    pub header: HeaderResponse,
    pub topics: Vec<ProduceTopic>,
    /// Present from v1.
    pub throttle_time_ms: Option<i32>,
}

impl KafkaResponse for ProduceResponse {
    fn parse(data: Bytes, api_version: i16) -> Result<Self> {
        let (_, response) = parse_produce_response(NomBytes::new(data.clone()), api_version)
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

fn parse_produce_partition(
    api_version: i16,
) -> impl Fn(NomBytes) -> IResult<NomBytes, ProducePartition> + Copy {
    move |s: NomBytes| {
        let (s, partition) = be_i32(s)?;
        let (s, error_code) = be_i16(s)?;
        let (s, offset) = be_i64(s)?;
        let (s, timestamp) = if api_version >= 2 {
            let (s, ts) = be_i64(s)?;
            (s, Some(ts))
        } else {
            (s, None)
        };
        Ok((
            s,
            ProducePartition {
                partition,
                error_code: KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
                offset,
                timestamp,
            },
        ))
    }
}

fn parse_produce_topic(
    api_version: i16,
) -> impl Fn(NomBytes) -> IResult<NomBytes, ProduceTopic> + Copy {
    move |s: NomBytes| {
        let (s, topic) = parse_string(s)?;
        let topic = parser::bytes_to_string(&topic)?;
        let (s, partitions) = parse_array(parse_produce_partition(api_version))(s)?;
        Ok((s, ProduceTopic { topic, partitions }))
    }
}

pub fn parse_produce_response(
    s: NomBytes,
    api_version: i16,
) -> IResult<NomBytes, ProduceResponse> {
    let (s, header) = parse_header_response(s)?;
    let (s, topics) = parse_array(parse_produce_topic(api_version))(s)?;
    let (s, throttle_time_ms) = if api_version >= 1 {
        let (s, throttle) = be_i32(s)?;
        (s, Some(throttle))
    } else {
        (s, None)
    };
    Ok((
        s,
        ProduceResponse {
            header,
            topics,
            throttle_time_ms,
        },
    ))
}
