//! StopReplica API codec.
//!
//! A controller-to-broker administrative request, included for protocol
//! completeness; ordinary clients have no business sending it.

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

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReplicaPartition {
    pub topic: String,
    pub partition: i32,
}

/// StopReplica request, api version 0.
#[derive(Debug, Clone)]
pub struct StopReplicaRequest {
    pub controller_id: i32,
    pub controller_epoch: i32,
    /// Delete the partition logs rather than just stopping replication.
    pub delete_partitions: bool,
    pub partitions: Vec<StopReplicaPartition>,
}

impl KafkaRequest for StopReplicaRequest {
    const API_KEY: ApiKey = ApiKey::StopReplica;

    type Response = StopReplicaResponse;

    fn encode_versioned(&self, buffer: &mut Vec<u8>, _api_version: i16) -> Result<()> {
        self.controller_id.encode(buffer)?;
        self.controller_epoch.encode(buffer)?;
        self.delete_partitions.encode(buffer)?;
        encode_as_array(buffer, &self.partitions, |b, p| {
            p.topic.encode(b)?;
            p.partition.encode(b)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReplicaResponsePartition {
    pub topic: String,
    pub partition: i32,
    pub error_code: KafkaCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReplicaResponse {
    pub header: HeaderResponse,
    pub error_code: KafkaCode,
    pub partitions: Vec<StopReplicaResponsePartition>,
}

impl KafkaResponse for StopReplicaResponse {
    fn parse(data: Bytes, _api_version: i16) -> Result<Self> {
        let (_, response) = parse_stop_replica_response(NomBytes::new(data.clone()))
            .map_err(|err| parser::to_crate_error(data, err))?;
        Ok(response)
    }

    fn error_codes(&self) -> Vec<KafkaCode> {
        std::iter::once(self.error_code)
            .chain(self.partitions.iter().map(|p| p.error_code))
            .collect()
    }
}

fn parse_stop_replica_partition(s: NomBytes) -> IResult<NomBytes, StopReplicaResponsePartition> {
    let (s, topic) = parse_string(s)?;
    let topic = parser::bytes_to_string(&topic)?;
    let (s, partition) = be_i32(s)?;
    let (s, error_code) = be_i16(s)?;
    Ok((
        s,
        StopReplicaResponsePartition {
            topic,
            partition,
            error_code: KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
        },
    ))
}

pub fn parse_stop_replica_response(s: NomBytes) -> IResult<NomBytes, StopReplicaResponse> {
    let (s, header) = parse_header_response(s)?;
    let (s, error_code) = be_i16(s)?;
    let (s, partitions) = parse_array(parse_stop_replica_partition)(s)?;
    Ok((
        s,
        StopReplicaResponse {
            header,
            error_code: KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
            partitions,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_request() {
        let request = StopReplicaRequest {
            controller_id: 1,
            controller_epoch: 7,
            delete_partitions: true,
            partitions: vec![StopReplicaPartition {
                topic: "t".to_string(),
                partition: 0,
            }],
        };
        let mut body = Vec::new();
        request.encode_versioned(&mut body, 0).unwrap();

        assert_eq!(&body[0..4], &1i32.to_be_bytes());
        assert_eq!(&body[4..8], &7i32.to_be_bytes());
        assert_eq!(body[8], 1); // delete_partitions
        assert_eq!(&body[9..13], &1i32.to_be_bytes());
        assert_eq!(&body[13..16], &[0x00, 0x01, b't']);
        assert_eq!(&body[16..20], &0i32.to_be_bytes());
    }

    #[test]
    fn test_parse_response() {
        let mut frame = 1i32.to_be_bytes().to_vec();
        frame.extend_from_slice(&0i16.to_be_bytes());
        frame.extend_from_slice(&1i32.to_be_bytes());
        frame.extend_from_slice(&1u16.to_be_bytes());
        frame.extend_from_slice(b"t");
        frame.extend_from_slice(&0i32.to_be_bytes());
        frame.extend_from_slice(&11i16.to_be_bytes()); // StaleControllerEpoch

        let response = StopReplicaResponse::parse(Bytes::from(frame), 0).unwrap();
        assert_eq!(response.error_code, KafkaCode::None);
        assert_eq!(
            response.partitions[0].error_code,
            KafkaCode::StaleControllerEpoch
        );
    }
}
