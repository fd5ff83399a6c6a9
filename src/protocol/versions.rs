//! ApiVersions API codec.
//!
//! Server capability discovery: an empty request, answered with the
//! version range the broker accepts for every API it knows. Usable as the
//! first request on a fresh connection since v0 never changes shape.

use bytes::Bytes;
use nom::number::complete::be_i16;
use nom::IResult;
use nombytes::NomBytes;
use num_traits::FromPrimitive;

use crate::error::{KafkaCode, Result};
use crate::parser::{self, parse_array};
use crate::protocol::{
    parse_header_response, ApiKey, HeaderResponse, KafkaRequest, KafkaResponse,
};

/// ApiVersions request, api version 0. No body.
#[derive(Debug, Clone, Default)]
pub struct ApiVersionsRequest;

impl KafkaRequest for ApiVersionsRequest {
    const API_KEY: ApiKey = ApiKey::ApiVersions;

    type Response = ApiVersionsResponse;

    fn encode_versioned(&self, _buffer: &mut Vec<u8>, _api_version: i16) -> Result<()> {
        Ok(())
    }
}

/// Version range the broker supports for one API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiVersionRange {
    /// Raw api key — kept as `i16` because brokers report APIs this
    /// client does not implement.
    pub api_key: i16,
    pub min_version: i16,
    pub max_version: i16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiVersionsResponse {
    pub header: HeaderResponse,
    pub error_code: KafkaCode,
    pub api_versions: Vec<ApiVersionRange>,
}

impl ApiVersionsResponse {
    /// The broker's supported range for one of this client's APIs.
    pub fn range_for(&self, api_key: ApiKey) -> Option<(i16, i16)> {
        let raw = i16::from(api_key);
        self.api_versions
            .iter()
            .find(|v| v.api_key == raw)
            .map(|v| (v.min_version, v.max_version))
    }
}

impl KafkaResponse for ApiVersionsResponse {
    fn parse(data: Bytes, _api_version: i16) -> Result<Self> {
        let (_, response) = parse_api_versions_response(NomBytes::new(data.clone()))
            .map_err(|err| parser::to_crate_error(data, err))?;
        Ok(response)
    }

    fn error_codes(&self) -> Vec<KafkaCode> {
        vec![self.error_code]
    }
}

fn parse_version_range(s: NomBytes) -> IResult<NomBytes, ApiVersionRange> {
    let (s, api_key) = be_i16(s)?;
    let (s, min_version) = be_i16(s)?;
    let (s, max_version) = be_i16(s)?;
    Ok((
        s,
        ApiVersionRange {
            api_key,
            min_version,
            max_version,
        },
    ))
}

pub fn parse_api_versions_response(s: NomBytes) -> IResult<NomBytes, ApiVersionsResponse> {
    let (s, header) = parse_header_response(s)?;
    let (s, error_code) = be_i16(s)?;
    let (s, api_versions) = parse_array(parse_version_range)(s)?;
    Ok((
        s,
        ApiVersionsResponse {
            header,
            error_code: KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
            api_versions,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_request, RequestContext};

    #[test]
    fn test_encode_full_frame() {
        // correlation=42, client_id="client": the frame is exactly the
        // header, and the leading size equals the bytes that follow it.
        let ctx = RequestContext::new(42, 0, Some("client".to_string()));
        let frame = encode_request(&ApiVersionsRequest, &ctx).unwrap();

        let expected: Vec<u8> = [
            &16i32.to_be_bytes()[..],
            &[0x00, 0x12], // api key 18
            &[0x00, 0x00],
            &42i32.to_be_bytes(),
            &[0x00, 0x06],
            b"client",
        ]
        .concat();
        assert_eq!(frame, expected);
    }

    #[test]
    fn test_parse_response() {
        let mut frame = 42i32.to_be_bytes().to_vec();
        frame.extend_from_slice(&0i16.to_be_bytes());
        frame.extend_from_slice(&2i32.to_be_bytes());
        for (key, min, max) in [(0i16, 0i16, 2i16), (3, 0, 1)] {
            frame.extend_from_slice(&key.to_be_bytes());
            frame.extend_from_slice(&min.to_be_bytes());
            frame.extend_from_slice(&max.to_be_bytes());
        }

        let response = ApiVersionsResponse::parse(Bytes::from(frame), 0).unwrap();
        assert_eq!(response.header.correlation_id, 42);
        assert_eq!(response.api_versions.len(), 2);
        assert_eq!(response.range_for(ApiKey::Produce), Some((0, 2)));
        assert_eq!(response.range_for(ApiKey::Metadata), Some((0, 1)));
        assert_eq!(response.range_for(ApiKey::Fetch), None);
    }
}
