//! Kafka wire protocol codec.
//!
//! Every supported API lives in a submodule holding the request encoder,
//! the response parser, and wire-level tests. Requests implement
//! [`KafkaRequest`] (version-aware encoding into a frame), responses
//! implement [`KafkaResponse`] (version-aware parsing out of a frame).
//!
//! # Wire framing
//!
//! Requests:
//! ```text
//! size:i32 | api_key:i16 | api_version:i16 | correlation_id:i32 | client_id:nullable_string | body
//! ```
//!
//! Responses:
//! ```text
//! size:i32 | correlation_id:i32 | body
//! ```
//!
//! All integers are big-endian. The correlation id is read before any body
//! decoder runs; matching a response to its request never requires
//! understanding the body.

pub mod admin;
pub mod auth;
pub mod fetch;
pub mod groups;
pub mod messages;
pub mod metadata;
pub mod offsets;
pub mod produce;
pub mod versions;

use bytes::{BufMut, Bytes};
use nom::number::complete::be_i32;
use nom::IResult;
use nombytes::NomBytes;

use crate::encode::{encode_length_prefixed, ToByte};
use crate::error::{Error, KafkaCode, Result};

/// API keys of the supported protocol surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i16)]
pub enum ApiKey {
    Produce = 0,
    Fetch = 1,
    ListOffsets = 2,
    Metadata = 3,
    StopReplica = 5,
    OffsetCommit = 8,
    OffsetFetch = 9,
    GroupCoordinator = 10,
    JoinGroup = 11,
    Heartbeat = 12,
    LeaveGroup = 13,
    SyncGroup = 14,
    DescribeGroups = 15,
    ListGroups = 16,
    SaslHandshake = 17,
    ApiVersions = 18,
}

impl From<ApiKey> for i16 {
    fn from(key: ApiKey) -> Self {
        key as i16
    }
}

impl TryFrom<i16> for ApiKey {
    type Error = Error;

    fn try_from(value: i16) -> Result<Self> {
        Ok(match value {
            0 => ApiKey::Produce,
            1 => ApiKey::Fetch,
            2 => ApiKey::ListOffsets,
            3 => ApiKey::Metadata,
            5 => ApiKey::StopReplica,
            8 => ApiKey::OffsetCommit,
            9 => ApiKey::OffsetFetch,
            10 => ApiKey::GroupCoordinator,
            11 => ApiKey::JoinGroup,
            12 => ApiKey::Heartbeat,
            13 => ApiKey::LeaveGroup,
            14 => ApiKey::SyncGroup,
            15 => ApiKey::DescribeGroups,
            16 => ApiKey::ListGroups,
            17 => ApiKey::SaslHandshake,
            18 => ApiKey::ApiVersions,
            n => return Err(Error::Config(format!("unsupported api key {}", n))),
        })
    }
}

impl ApiKey {
    /// Static name, used for logging without allocating.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiKey::Produce => "Produce",
            ApiKey::Fetch => "Fetch",
            ApiKey::ListOffsets => "ListOffsets",
            ApiKey::Metadata => "Metadata",
            ApiKey::StopReplica => "StopReplica",
            ApiKey::OffsetCommit => "OffsetCommit",
            ApiKey::OffsetFetch => "OffsetFetch",
            ApiKey::GroupCoordinator => "GroupCoordinator",
            ApiKey::JoinGroup => "JoinGroup",
            ApiKey::Heartbeat => "Heartbeat",
            ApiKey::LeaveGroup => "LeaveGroup",
            ApiKey::SyncGroup => "SyncGroup",
            ApiKey::DescribeGroups => "DescribeGroups",
            ApiKey::ListGroups => "ListGroups",
            ApiKey::SaslHandshake => "SaslHandshake",
            ApiKey::ApiVersions => "ApiVersions",
        }
    }
}

/// Request header preceding every request body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRequest {
    pub api_key: ApiKey,
    pub api_version: i16,
    pub correlation_id: i32,
    pub client_id: Option<String>,
}

impl ToByte for HeaderRequest {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        i16::from(self.api_key).encode(buffer)?;
        self.api_version.encode(buffer)?;
        self.correlation_id.encode(buffer)?;
        self.client_id.as_deref().encode(buffer)
    }
}

/// Response header: just the echoed correlation id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderResponse {
    pub correlation_id: i32,
}

pub fn parse_header_response(s: NomBytes) -> IResult<NomBytes, HeaderResponse> {
    let (s, correlation_id) = be_i32(s)?;
    Ok((s, HeaderResponse { correlation_id }))
}

/// Per-call framing inputs: which version to speak and how to stamp the
/// frame. Created per send, never shared across sends.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub correlation_id: i32,
    pub api_version: i16,
    pub client_id: Option<String>,
}

impl RequestContext {
    pub fn new(correlation_id: i32, api_version: i16, client_id: Option<String>) -> Self {
        Self {
            correlation_id,
            api_version,
            client_id,
        }
    }
}

/// A request kind this client can put on the wire.
///
/// The set of implementors is the closed set of supported APIs; dispatch
/// over them is static.
pub trait KafkaRequest {
    const API_KEY: ApiKey;
    /// Lowest api version this client encodes for this kind.
    const MIN_VERSION: i16 = 0;
    /// Highest api version this client encodes for this kind.
    const MAX_VERSION: i16 = 0;

    type Response: KafkaResponse;

    /// Render the request body (everything after the shared header) for
    /// the given api version.
    fn encode_versioned(&self, buffer: &mut Vec<u8>, api_version: i16) -> Result<()>;
}

/// A response kind this client can reconstruct from the wire.
pub trait KafkaResponse: Sized {
    /// Parse a full response frame (correlation id onward, the size prefix
    /// already stripped by the transport).
    fn parse(data: Bytes, api_version: i16) -> Result<Self>;

    /// Every error code embedded in the response, in encounter order.
    ///
    /// The router inspects these to classify a decoded-but-unhappy
    /// response for its retry loop. Kinds without error codes return
    /// nothing.
    fn error_codes(&self) -> Vec<KafkaCode> {
        Vec::new()
    }
}

/// Frame a request: size prefix, header, version-encoded body.
pub fn encode_request<R: KafkaRequest>(request: &R, context: &RequestContext) -> Result<Vec<u8>> {
    if context.api_version < R::MIN_VERSION || context.api_version > R::MAX_VERSION {
        return Err(Error::Config(format!(
            "{} v{} is outside the supported range {}..={}",
            R::API_KEY.as_str(),
            context.api_version,
            R::MIN_VERSION,
            R::MAX_VERSION,
        )));
    }

    let header = HeaderRequest {
        api_key: R::API_KEY,
        api_version: context.api_version,
        correlation_id: context.correlation_id,
        client_id: context.client_id.clone(),
    };

    let mut buffer = Vec::with_capacity(64);
    encode_length_prefixed(&mut buffer, |b| {
        header.encode(b)?;
        request.encode_versioned(b, context.api_version)
    })?;
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_roundtrip() {
        for raw in [0i16, 1, 2, 3, 5, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18] {
            let key = ApiKey::try_from(raw).unwrap();
            assert_eq!(i16::from(key), raw);
        }
    }

    #[test]
    fn test_api_key_rejects_unsupported() {
        assert!(ApiKey::try_from(4).is_err()); // LeaderAndIsr is broker-internal
        assert!(ApiKey::try_from(99).is_err());
    }

    #[test]
    fn test_header_request_encode() {
        let header = HeaderRequest {
            api_key: ApiKey::Metadata,
            api_version: 0,
            correlation_id: 1,
            client_id: Some("rust".to_string()),
        };
        let mut buffer = Vec::new();
        header.encode(&mut buffer).unwrap();
        assert_eq!(
            buffer,
            [0, 3, 0, 0, 0, 0, 0, 1, 0, 4, b'r', b'u', b's', b't'],
        );
    }

    #[test]
    fn test_header_request_null_client_id() {
        let header = HeaderRequest {
            api_key: ApiKey::Fetch,
            api_version: 1,
            correlation_id: -1,
            client_id: None,
        };
        let mut buffer = Vec::new();
        header.encode(&mut buffer).unwrap();
        assert_eq!(
            buffer,
            [0, 1, 0, 1, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF],
        );
    }

    #[test]
    fn test_parse_header_response() {
        let input = NomBytes::from(&[0, 0, 0, 42, 1, 2, 3][..]);
        let (rest, header) = parse_header_response(input).unwrap();
        assert_eq!(header.correlation_id, 42);
        assert_eq!(rest.into_bytes().len(), 3);
    }
}
