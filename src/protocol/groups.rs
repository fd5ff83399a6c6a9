//! Group management API codecs: GroupCoordinator, JoinGroup, SyncGroup,
//! Heartbeat, LeaveGroup, DescribeGroups, ListGroups.
//!
//! Member metadata and assignment payloads are opaque byte slabs at this
//! layer — the codec moves them around without interpreting them. Their
//! contents belong to the group's embedded protocol and are produced and
//! consumed through a [`ProtocolEncoder`] looked up by protocol-type
//! string; the standard `"consumer"` protocol encoder ships in the
//! [`EncoderRegistry`] defaults.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use nom::number::complete::{be_i16, be_i32};
use nom::IResult;
use nombytes::NomBytes;
use num_traits::FromPrimitive;

use crate::encode::{encode_as_array, ToByte};
use crate::error::{Error, KafkaCode, Result};
use crate::parser::{self, parse_array, parse_bytes, parse_string};
use crate::protocol::{
    parse_header_response, ApiKey, HeaderResponse, KafkaRequest, KafkaResponse,
};

// ============================================================================
// GroupCoordinator
// ============================================================================

/// GroupCoordinator (FindCoordinator) request, api version 0.
#[derive(Debug, Clone)]
pub struct GroupCoordinatorRequest {
    pub group_id: String,
}

impl GroupCoordinatorRequest {
    pub fn new(group_id: &str) -> Self {
        Self {
            group_id: group_id.to_string(),
        }
    }
}

impl KafkaRequest for GroupCoordinatorRequest {
    const API_KEY: ApiKey = ApiKey::GroupCoordinator;

    type Response = GroupCoordinatorResponse;

    fn encode_versioned(&self, buffer: &mut Vec<u8>, _api_version: i16) -> Result<()> {
        self.group_id.encode(buffer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupCoordinatorResponse {
    pub header: HeaderResponse,
    pub error_code: KafkaCode,
    pub coordinator_id: i32,
    pub coordinator_host: String,
    pub coordinator_port: i32,
}

impl KafkaResponse for GroupCoordinatorResponse {
    fn parse(data: Bytes, _api_version: i16) -> Result<Self> {
        let (_, response) = parse_group_coordinator_response(NomBytes::new(data.clone()))
            .map_err(|err| parser::to_crate_error(data, err))?;
        Ok(response)
    }

    fn error_codes(&self) -> Vec<KafkaCode> {
        vec![self.error_code]
    }
}

pub fn parse_group_coordinator_response(
    s: NomBytes,
) -> IResult<NomBytes, GroupCoordinatorResponse> {
    let (s, header) = parse_header_response(s)?;
    let (s, error_code) = be_i16(s)?;
    let (s, coordinator_id) = be_i32(s)?;
    let (s, host) = parse_string(s)?;
    let coordinator_host = parser::bytes_to_string(&host)?;
    let (s, coordinator_port) = be_i32(s)?;
    Ok((
        s,
        GroupCoordinatorResponse {
            header,
            error_code: KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
            coordinator_id,
            coordinator_host,
            coordinator_port,
        },
    ))
}

// ============================================================================
// JoinGroup
// ============================================================================

/// One protocol the joining member supports, with its opaque metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinGroupProtocol {
    pub name: String,
    pub metadata: Bytes,
}

/// JoinGroup request, api versions 0 and 1 (v1 adds the rebalance
/// timeout).
#[derive(Debug, Clone)]
pub struct JoinGroupRequest {
    pub group_id: String,
    pub session_timeout_ms: i32,
    /// v1 only; how long the coordinator waits for members to rejoin.
    pub rebalance_timeout_ms: i32,
    /// Empty on first join; the coordinator assigns one.
    pub member_id: String,
    pub protocol_type: String,
    pub protocols: Vec<JoinGroupProtocol>,
}

impl KafkaRequest for JoinGroupRequest {
    const API_KEY: ApiKey = ApiKey::JoinGroup;
    const MAX_VERSION: i16 = 1;

    type Response = JoinGroupResponse;

    fn encode_versioned(&self, buffer: &mut Vec<u8>, api_version: i16) -> Result<()> {
        self.group_id.encode(buffer)?;
        self.session_timeout_ms.encode(buffer)?;
        if api_version >= 1 {
            self.rebalance_timeout_ms.encode(buffer)?;
        }
        self.member_id.encode(buffer)?;
        self.protocol_type.encode(buffer)?;
        encode_as_array(buffer, &self.protocols, |b, p| {
            p.name.encode(b)?;
            p.metadata.encode(b)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinGroupMember {
    pub member_id: String,
    pub metadata: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinGroupResponse {
    pub header: HeaderResponse,
    pub error_code: KafkaCode,
    pub generation_id: i32,
    /// The protocol the coordinator selected for the generation.
    pub protocol: String,
    pub leader_id: String,
    pub member_id: String,
    /// Only populated for the member elected leader.
    pub members: Vec<JoinGroupMember>,
}

impl KafkaResponse for JoinGroupResponse {
    fn parse(data: Bytes, _api_version: i16) -> Result<Self> {
        let (_, response) = parse_join_group_response(NomBytes::new(data.clone()))
            .map_err(|err| parser::to_crate_error(data, err))?;
        Ok(response)
    }

    fn error_codes(&self) -> Vec<KafkaCode> {
        vec![self.error_code]
    }
}

fn parse_join_group_member(s: NomBytes) -> IResult<NomBytes, JoinGroupMember> {
    let (s, member_id) = parse_string(s)?;
    let member_id = parser::bytes_to_string(&member_id)?;
    let (s, metadata) = parse_bytes(s)?;
    Ok((
        s,
        JoinGroupMember {
            member_id,
            metadata,
        },
    ))
}

pub fn parse_join_group_response(s: NomBytes) -> IResult<NomBytes, JoinGroupResponse> {
    let (s, header) = parse_header_response(s)?;
    let (s, error_code) = be_i16(s)?;
    let (s, generation_id) = be_i32(s)?;
    let (s, protocol) = parse_string(s)?;
    let protocol = parser::bytes_to_string(&protocol)?;
    let (s, leader_id) = parse_string(s)?;
    let leader_id = parser::bytes_to_string(&leader_id)?;
    let (s, member_id) = parse_string(s)?;
    let member_id = parser::bytes_to_string(&member_id)?;
    let (s, members) = parse_array(parse_join_group_member)(s)?;
    Ok((
        s,
        JoinGroupResponse {
            header,
            error_code: KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
            generation_id,
            protocol,
            leader_id,
            member_id,
            members,
        },
    ))
}

// ============================================================================
// SyncGroup
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncGroupAssignment {
    pub member_id: String,
    pub assignment: Bytes,
}

/// SyncGroup request, api version 0. Only the leader fills
/// `assignments`; followers send an empty array.
#[derive(Debug, Clone)]
pub struct SyncGroupRequest {
    pub group_id: String,
    pub generation_id: i32,
    pub member_id: String,
    pub assignments: Vec<SyncGroupAssignment>,
}

impl KafkaRequest for SyncGroupRequest {
    const API_KEY: ApiKey = ApiKey::SyncGroup;

    type Response = SyncGroupResponse;

    fn encode_versioned(&self, buffer: &mut Vec<u8>, _api_version: i16) -> Result<()> {
        self.group_id.encode(buffer)?;
        self.generation_id.encode(buffer)?;
        self.member_id.encode(buffer)?;
        encode_as_array(buffer, &self.assignments, |b, a| {
            a.member_id.encode(b)?;
            a.assignment.encode(b)
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncGroupResponse {
    pub header: HeaderResponse,
    pub error_code: KafkaCode,
    /// This member's assignment slab, decoded by the group's protocol
    /// encoder.
    pub assignment: Bytes,
}

impl KafkaResponse for SyncGroupResponse {
    fn parse(data: Bytes, _api_version: i16) -> Result<Self> {
        let (_, response) = parse_sync_group_response(NomBytes::new(data.clone()))
            .map_err(|err| parser::to_crate_error(data, err))?;
        Ok(response)
    }

    fn error_codes(&self) -> Vec<KafkaCode> {
        vec![self.error_code]
    }
}

pub fn parse_sync_group_response(s: NomBytes) -> IResult<NomBytes, SyncGroupResponse> {
    let (s, header) = parse_header_response(s)?;
    let (s, error_code) = be_i16(s)?;
    let (s, assignment) = parse_bytes(s)?;
    Ok((
        s,
        SyncGroupResponse {
            header,
            error_code: KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
            assignment,
        },
    ))
}

// ============================================================================
// Heartbeat / LeaveGroup
// ============================================================================

/// Heartbeat request, api version 0.
#[derive(Debug, Clone)]
pub struct HeartbeatRequest {
    pub group_id: String,
    pub generation_id: i32,
    pub member_id: String,
}

impl KafkaRequest for HeartbeatRequest {
    const API_KEY: ApiKey = ApiKey::Heartbeat;

    type Response = HeartbeatResponse;

    fn encode_versioned(&self, buffer: &mut Vec<u8>, _api_version: i16) -> Result<()> {
        self.group_id.encode(buffer)?;
        self.generation_id.encode(buffer)?;
        self.member_id.encode(buffer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatResponse {
    pub header: HeaderResponse,
    pub error_code: KafkaCode,
}

impl KafkaResponse for HeartbeatResponse {
    fn parse(data: Bytes, _api_version: i16) -> Result<Self> {
        let (_, response) = parse_error_only_response(NomBytes::new(data.clone()))
            .map(|(s, (header, error_code))| (s, HeartbeatResponse { header, error_code }))
            .map_err(|err| parser::to_crate_error(data, err))?;
        Ok(response)
    }

    fn error_codes(&self) -> Vec<KafkaCode> {
        vec![self.error_code]
    }
}

/// LeaveGroup request, api version 0.
#[derive(Debug, Clone)]
pub struct LeaveGroupRequest {
    pub group_id: String,
    pub member_id: String,
}

impl KafkaRequest for LeaveGroupRequest {
    const API_KEY: ApiKey = ApiKey::LeaveGroup;

    type Response = LeaveGroupResponse;

    fn encode_versioned(&self, buffer: &mut Vec<u8>, _api_version: i16) -> Result<()> {
        self.group_id.encode(buffer)?;
        self.member_id.encode(buffer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveGroupResponse {
    pub header: HeaderResponse,
    pub error_code: KafkaCode,
}

impl KafkaResponse for LeaveGroupResponse {
    fn parse(data: Bytes, _api_version: i16) -> Result<Self> {
        let (_, response) = parse_error_only_response(NomBytes::new(data.clone()))
            .map(|(s, (header, error_code))| (s, LeaveGroupResponse { header, error_code }))
            .map_err(|err| parser::to_crate_error(data, err))?;
        Ok(response)
    }

    fn error_codes(&self) -> Vec<KafkaCode> {
        vec![self.error_code]
    }
}

fn parse_error_only_response(s: NomBytes) -> IResult<NomBytes, (HeaderResponse, KafkaCode)> {
    let (s, header) = parse_header_response(s)?;
    let (s, error_code) = be_i16(s)?;
    Ok((
        s,
        (
            header,
            KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
        ),
    ))
}

// ============================================================================
// DescribeGroups / ListGroups
// ============================================================================

/// DescribeGroups request, api version 0.
#[derive(Debug, Clone)]
pub struct DescribeGroupsRequest {
    pub group_ids: Vec<String>,
}

impl KafkaRequest for DescribeGroupsRequest {
    const API_KEY: ApiKey = ApiKey::DescribeGroups;

    type Response = DescribeGroupsResponse;

    fn encode_versioned(&self, buffer: &mut Vec<u8>, _api_version: i16) -> Result<()> {
        encode_as_array(buffer, &self.group_ids, |b, id| id.encode(b))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescribedGroupMember {
    pub member_id: String,
    pub client_id: String,
    pub client_host: String,
    pub metadata: Bytes,
    pub assignment: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescribedGroup {
    pub error_code: KafkaCode,
    pub group_id: String,
    pub state: String,
    pub protocol_type: String,
    pub protocol: String,
    pub members: Vec<DescribedGroupMember>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescribeGroupsResponse {
    pub header: HeaderResponse,
    pub groups: Vec<DescribedGroup>,
}

impl KafkaResponse for DescribeGroupsResponse {
    fn parse(data: Bytes, _api_version: i16) -> Result<Self> {
        let (_, response) = parse_describe_groups_response(NomBytes::new(data.clone()))
            .map_err(|err| parser::to_crate_error(data, err))?;
        Ok(response)
    }

    fn error_codes(&self) -> Vec<KafkaCode> {
        self.groups.iter().map(|g| g.error_code).collect()
    }
}

fn parse_described_member(s: NomBytes) -> IResult<NomBytes, DescribedGroupMember> {
    let (s, member_id) = parse_string(s)?;
    let member_id = parser::bytes_to_string(&member_id)?;
    let (s, client_id) = parse_string(s)?;
    let client_id = parser::bytes_to_string(&client_id)?;
    let (s, client_host) = parse_string(s)?;
    let client_host = parser::bytes_to_string(&client_host)?;
    let (s, metadata) = parse_bytes(s)?;
    let (s, assignment) = parse_bytes(s)?;
    Ok((
        s,
        DescribedGroupMember {
            member_id,
            client_id,
            client_host,
            metadata,
            assignment,
        },
    ))
}

fn parse_described_group(s: NomBytes) -> IResult<NomBytes, DescribedGroup> {
    let (s, error_code) = be_i16(s)?;
    let (s, group_id) = parse_string(s)?;
    let group_id = parser::bytes_to_string(&group_id)?;
    let (s, state) = parse_string(s)?;
    let state = parser::bytes_to_string(&state)?;
    let (s, protocol_type) = parse_string(s)?;
    let protocol_type = parser::bytes_to_string(&protocol_type)?;
    let (s, protocol) = parse_string(s)?;
    let protocol = parser::bytes_to_string(&protocol)?;
    let (s, members) = parse_array(parse_described_member)(s)?;
    Ok((
        s,
        DescribedGroup {
            error_code: KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
            group_id,
            state,
            protocol_type,
            protocol,
            members,
        },
    ))
}

pub fn parse_describe_groups_response(s: NomBytes) -> IResult<NomBytes, DescribeGroupsResponse> {
    let (s, header) = parse_header_response(s)?;
    let (s, groups) = parse_array(parse_described_group)(s)?;
    Ok((s, DescribeGroupsResponse { header, groups }))
}

/// ListGroups request, api version 0. No body.
#[derive(Debug, Clone, Default)]
pub struct ListGroupsRequest;

impl KafkaRequest for ListGroupsRequest {
    const API_KEY: ApiKey = ApiKey::ListGroups;

    type Response = ListGroupsResponse;

    fn encode_versioned(&self, _buffer: &mut Vec<u8>, _api_version: i16) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedGroup {
    pub group_id: String,
    pub protocol_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListGroupsResponse {
    pub header: HeaderResponse,
    pub error_code: KafkaCode,
    pub groups: Vec<ListedGroup>,
}

impl KafkaResponse for ListGroupsResponse {
    fn parse(data: Bytes, _api_version: i16) -> Result<Self> {
        let (_, response) = parse_list_groups_response(NomBytes::new(data.clone()))
            .map_err(|err| parser::to_crate_error(data, err))?;
        Ok(response)
    }

    fn error_codes(&self) -> Vec<KafkaCode> {
        vec![self.error_code]
    }
}

fn parse_listed_group(s: NomBytes) -> IResult<NomBytes, ListedGroup> {
    let (s, group_id) = parse_string(s)?;
    let group_id = parser::bytes_to_string(&group_id)?;
    let (s, protocol_type) = parse_string(s)?;
    let protocol_type = parser::bytes_to_string(&protocol_type)?;
    Ok((
        s,
        ListedGroup {
            group_id,
            protocol_type,
        },
    ))
}

pub fn parse_list_groups_response(s: NomBytes) -> IResult<NomBytes, ListGroupsResponse> {
    let (s, header) = parse_header_response(s)?;
    let (s, error_code) = be_i16(s)?;
    let (s, groups) = parse_array(parse_listed_group)(s)?;
    Ok((
        s,
        ListGroupsResponse {
            header,
            error_code: KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
            groups,
        },
    ))
}

// ============================================================================
// Embedded protocol payloads
// ============================================================================

/// Partitions of one topic inside a member assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicAssignment {
    pub topic: String,
    pub partitions: Vec<i32>,
}

/// Codec for the opaque payloads one embedded protocol type stores in
/// JoinGroup metadata and SyncGroup assignments.
pub trait ProtocolEncoder: Send + Sync {
    /// Serialize subscription metadata for a JoinGroup protocol entry.
    fn encode_metadata(&self, topics: &[String], user_data: Option<Bytes>) -> Result<Bytes>;

    /// Serialize one member's assignment for a SyncGroup request.
    fn encode_assignment(
        &self,
        assignments: &[TopicAssignment],
        user_data: Option<Bytes>,
    ) -> Result<Bytes>;

    /// Deserialize the assignment slab of a SyncGroup response.
    fn decode_assignment(&self, data: Bytes) -> Result<Vec<TopicAssignment>>;
}

/// Protocol encoders keyed by protocol-type string.
///
/// The registry ships with the standard `"consumer"` protocol; embedders
/// register their own types alongside it.
pub struct EncoderRegistry {
    encoders: HashMap<String, Arc<dyn ProtocolEncoder>>,
}

impl Default for EncoderRegistry {
    fn default() -> Self {
        let mut registry = Self {
            encoders: HashMap::new(),
        };
        registry.register("consumer", Arc::new(ConsumerProtocolEncoder));
        registry
    }
}

impl EncoderRegistry {
    pub fn register(&mut self, protocol_type: &str, encoder: Arc<dyn ProtocolEncoder>) {
        self.encoders.insert(protocol_type.to_string(), encoder);
    }

    pub fn get(&self, protocol_type: &str) -> Result<Arc<dyn ProtocolEncoder>> {
        self.encoders
            .get(protocol_type)
            .cloned()
            .ok_or_else(|| Error::Config(format!("no encoder for protocol type {}", protocol_type)))
    }
}

/// The standard `"consumer"` embedded protocol.
///
/// Metadata: `version:i16 | topics:[string] | user_data:bytes`.
/// Assignment: `version:i16 | [topic | partitions:[i32]] | user_data:bytes`.
pub struct ConsumerProtocolEncoder;

impl ConsumerProtocolEncoder {
    const VERSION: i16 = 0;
}

impl ProtocolEncoder for ConsumerProtocolEncoder {
    fn encode_metadata(&self, topics: &[String], user_data: Option<Bytes>) -> Result<Bytes> {
        let mut buffer = Vec::new();
        Self::VERSION.encode(&mut buffer)?;
        encode_as_array(&mut buffer, topics, |b, t| t.encode(b))?;
        user_data.encode(&mut buffer)?;
        Ok(Bytes::from(buffer))
    }

    fn encode_assignment(
        &self,
        assignments: &[TopicAssignment],
        user_data: Option<Bytes>,
    ) -> Result<Bytes> {
        let mut buffer = Vec::new();
        Self::VERSION.encode(&mut buffer)?;
        encode_as_array(&mut buffer, assignments, |b, a| {
            a.topic.encode(b)?;
            encode_as_array(b, &a.partitions, |b, p| p.encode(b))
        })?;
        user_data.encode(&mut buffer)?;
        Ok(Bytes::from(buffer))
    }

    fn decode_assignment(&self, data: Bytes) -> Result<Vec<TopicAssignment>> {
        fn topic_assignment(s: NomBytes) -> IResult<NomBytes, TopicAssignment> {
            let (s, topic) = parse_string(s)?;
            let topic = parser::bytes_to_string(&topic)?;
            let (s, partitions) = parse_array(be_i32)(s)?;
            Ok((s, TopicAssignment { topic, partitions }))
        }

        fn assignment(s: NomBytes) -> IResult<NomBytes, Vec<TopicAssignment>> {
            let (s, _version) = be_i16(s)?;
            let (s, assignments) = parse_array(topic_assignment)(s)?;
            Ok((s, assignments))
        }

        let (_, assignments) = assignment(NomBytes::new(data.clone()))
            .map_err(|err| parser::to_crate_error(data, err))?;
        Ok(assignments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_coordinator_roundtrip() {
        let request = GroupCoordinatorRequest::new("my-group");
        let mut body = Vec::new();
        request.encode_versioned(&mut body, 0).unwrap();
        assert_eq!(&body[..2], &8i16.to_be_bytes());
        assert_eq!(&body[2..], b"my-group");

        let mut frame = 1i32.to_be_bytes().to_vec();
        frame.extend_from_slice(&0i16.to_be_bytes());
        frame.extend_from_slice(&3i32.to_be_bytes());
        frame.extend_from_slice(&9u16.to_be_bytes());
        frame.extend_from_slice(b"localhost");
        frame.extend_from_slice(&9092i32.to_be_bytes());

        let response = GroupCoordinatorResponse::parse(Bytes::from(frame), 0).unwrap();
        assert_eq!(response.coordinator_id, 3);
        assert_eq!(response.coordinator_host, "localhost");
        assert_eq!(response.coordinator_port, 9092);
    }

    #[test]
    fn test_join_group_encode_versions() {
        let request = JoinGroupRequest {
            group_id: "g".to_string(),
            session_timeout_ms: 30_000,
            rebalance_timeout_ms: 60_000,
            member_id: String::new(),
            protocol_type: "consumer".to_string(),
            protocols: vec![JoinGroupProtocol {
                name: "range".to_string(),
                metadata: Bytes::from_static(&[1, 2]),
            }],
        };

        let mut v0 = Vec::new();
        request.encode_versioned(&mut v0, 0).unwrap();
        let mut v1 = Vec::new();
        request.encode_versioned(&mut v1, 1).unwrap();

        // v1 carries the rebalance timeout
        assert_eq!(v1.len() - v0.len(), 4);
        assert_eq!(&v1[7..11], &60_000i32.to_be_bytes());
    }

    #[test]
    fn test_join_group_parse_response() {
        let mut frame = 1i32.to_be_bytes().to_vec();
        frame.extend_from_slice(&0i16.to_be_bytes());
        frame.extend_from_slice(&5i32.to_be_bytes()); // generation
        frame.extend_from_slice(&5u16.to_be_bytes());
        frame.extend_from_slice(b"range");
        frame.extend_from_slice(&2u16.to_be_bytes());
        frame.extend_from_slice(b"m1");
        frame.extend_from_slice(&2u16.to_be_bytes());
        frame.extend_from_slice(b"m1");
        frame.extend_from_slice(&1i32.to_be_bytes()); // one member
        frame.extend_from_slice(&2u16.to_be_bytes());
        frame.extend_from_slice(b"m1");
        frame.extend_from_slice(&2i32.to_be_bytes());
        frame.extend_from_slice(&[0xAB, 0xCD]);

        let response = JoinGroupResponse::parse(Bytes::from(frame), 0).unwrap();
        assert_eq!(response.generation_id, 5);
        assert_eq!(response.protocol, "range");
        assert_eq!(response.leader_id, "m1");
        assert_eq!(response.member_id, "m1");
        assert_eq!(response.members.len(), 1);
        assert_eq!(response.members[0].metadata, Bytes::from_static(&[0xAB, 0xCD]));
    }

    #[test]
    fn test_sync_group_roundtrip() {
        let encoder = ConsumerProtocolEncoder;
        let assignment = encoder
            .encode_assignment(
                &[TopicAssignment {
                    topic: "t".to_string(),
                    partitions: vec![0, 1],
                }],
                None,
            )
            .unwrap();

        let request = SyncGroupRequest {
            group_id: "g".to_string(),
            generation_id: 1,
            member_id: "m1".to_string(),
            assignments: vec![SyncGroupAssignment {
                member_id: "m1".to_string(),
                assignment: assignment.clone(),
            }],
        };
        let mut body = Vec::new();
        request.encode_versioned(&mut body, 0).unwrap();
        assert_eq!(&body[0..3], &[0x00, 0x01, b'g']);

        let mut frame = 1i32.to_be_bytes().to_vec();
        frame.extend_from_slice(&0i16.to_be_bytes());
        frame.extend_from_slice(&(assignment.len() as i32).to_be_bytes());
        frame.extend_from_slice(&assignment);

        let response = SyncGroupResponse::parse(Bytes::from(frame), 0).unwrap();
        let decoded = encoder.decode_assignment(response.assignment).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].topic, "t");
        assert_eq!(decoded[0].partitions, vec![0, 1]);
    }

    #[test]
    fn test_heartbeat_and_leave_group() {
        let heartbeat = HeartbeatRequest {
            group_id: "g".to_string(),
            generation_id: 2,
            member_id: "m".to_string(),
        };
        let mut body = Vec::new();
        heartbeat.encode_versioned(&mut body, 0).unwrap();
        // group(3) generation(4) member(3)
        assert_eq!(body.len(), 10);

        let mut frame = 1i32.to_be_bytes().to_vec();
        frame.extend_from_slice(&27i16.to_be_bytes()); // RebalanceInProgress
        let response = HeartbeatResponse::parse(Bytes::from(frame.clone()), 0).unwrap();
        assert_eq!(response.error_code, KafkaCode::RebalanceInProgress);

        let response = LeaveGroupResponse::parse(Bytes::from(frame), 0).unwrap();
        assert_eq!(response.error_code, KafkaCode::RebalanceInProgress);
    }

    #[test]
    fn test_describe_groups_roundtrip() {
        let request = DescribeGroupsRequest {
            group_ids: vec!["a".to_string(), "b".to_string()],
        };
        let mut body = Vec::new();
        request.encode_versioned(&mut body, 0).unwrap();
        assert_eq!(&body[0..4], &2i32.to_be_bytes());

        let mut frame = 1i32.to_be_bytes().to_vec();
        frame.extend_from_slice(&1i32.to_be_bytes());
        frame.extend_from_slice(&0i16.to_be_bytes());
        frame.extend_from_slice(&1u16.to_be_bytes());
        frame.extend_from_slice(b"a");
        frame.extend_from_slice(&6u16.to_be_bytes());
        frame.extend_from_slice(b"Stable");
        frame.extend_from_slice(&8u16.to_be_bytes());
        frame.extend_from_slice(b"consumer");
        frame.extend_from_slice(&5u16.to_be_bytes());
        frame.extend_from_slice(b"range");
        frame.extend_from_slice(&0i32.to_be_bytes()); // no members

        let response = DescribeGroupsResponse::parse(Bytes::from(frame), 0).unwrap();
        assert_eq!(response.groups.len(), 1);
        assert_eq!(response.groups[0].group_id, "a");
        assert_eq!(response.groups[0].state, "Stable");
        assert_eq!(response.groups[0].protocol, "range");
    }

    #[test]
    fn test_list_groups_roundtrip() {
        let mut body = Vec::new();
        ListGroupsRequest.encode_versioned(&mut body, 0).unwrap();
        assert!(body.is_empty());

        let mut frame = 1i32.to_be_bytes().to_vec();
        frame.extend_from_slice(&0i16.to_be_bytes());
        frame.extend_from_slice(&1i32.to_be_bytes());
        frame.extend_from_slice(&2u16.to_be_bytes());
        frame.extend_from_slice(b"g1");
        frame.extend_from_slice(&8u16.to_be_bytes());
        frame.extend_from_slice(b"consumer");

        let response = ListGroupsResponse::parse(Bytes::from(frame), 0).unwrap();
        assert_eq!(
            response.groups,
            vec![ListedGroup {
                group_id: "g1".to_string(),
                protocol_type: "consumer".to_string(),
            }]
        );
    }

    #[test]
    fn test_consumer_metadata_layout() {
        let encoder = ConsumerProtocolEncoder;
        let metadata = encoder
            .encode_metadata(&["purchases".to_string()], None)
            .unwrap();

        // version(2) + array(4) + string(2+9) + user_data(-1:4)
        assert_eq!(metadata.len(), 21);
        assert_eq!(&metadata[0..2], &0i16.to_be_bytes());
        assert_eq!(&metadata[2..6], &1i32.to_be_bytes());
        assert_eq!(&metadata[metadata.len() - 4..], &(-1i32).to_be_bytes());
    }

    #[test]
    fn test_registry_lookup() {
        let registry = EncoderRegistry::default();
        assert!(registry.get("consumer").is_ok());
        assert!(registry.get("connect").is_err());
    }
}
