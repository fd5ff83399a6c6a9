//! SaslHandshake API codec.
//!
//! Only the handshake itself: the client names a mechanism and the broker
//! either accepts it or lists what it supports. The authentication
//! exchange that follows is outside this crate's scope.

use bytes::Bytes;
use nom::number::complete::be_i16;
use nom::IResult;
use nombytes::NomBytes;
use num_traits::FromPrimitive;

use crate::encode::ToByte;
use crate::error::{KafkaCode, Result};
use crate::parser::{self, parse_array, parse_string};
use crate::protocol::{
    parse_header_response, ApiKey, HeaderResponse, KafkaRequest, KafkaResponse,
};

/// SaslHandshake request, api version 0.
#[derive(Debug, Clone)]
pub struct SaslHandshakeRequest {
    /// SASL mechanism name, e.g. `PLAIN` or `SCRAM-SHA-256`.
    pub mechanism: String,
}

impl SaslHandshakeRequest {
    pub fn new(mechanism: &str) -> Self {
        Self {
            mechanism: mechanism.to_string(),
        }
    }
}

impl KafkaRequest for SaslHandshakeRequest {
    const API_KEY: ApiKey = ApiKey::SaslHandshake;

    type Response = SaslHandshakeResponse;

    fn encode_versioned(&self, buffer: &mut Vec<u8>, _api_version: i16) -> Result<()> {
        self.mechanism.encode(buffer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaslHandshakeResponse {
    pub header: HeaderResponse,
    pub error_code: KafkaCode,
    /// Mechanisms the broker supports, returned whether or not the
    /// requested one was accepted.
    pub mechanisms: Vec<String>,
}

impl KafkaResponse for SaslHandshakeResponse {
    fn parse(data: Bytes, _api_version: i16) -> Result<Self> {
        let (_, response) = parse_sasl_handshake_response(NomBytes::new(data.clone()))
            .map_err(|err| parser::to_crate_error(data, err))?;
        Ok(response)
    }

    fn error_codes(&self) -> Vec<KafkaCode> {
        vec![self.error_code]
    }
}

fn parse_mechanism(s: NomBytes) -> IResult<NomBytes, String> {
    let (s, mechanism) = parse_string(s)?;
    let mechanism = parser::bytes_to_string(&mechanism)?;
    Ok((s, mechanism))
}

pub fn parse_sasl_handshake_response(s: NomBytes) -> IResult<NomBytes, SaslHandshakeResponse> {
    let (s, header) = parse_header_response(s)?;
    let (s, error_code) = be_i16(s)?;
    let (s, mechanisms) = parse_array(parse_mechanism)(s)?;
    Ok((
        s,
        SaslHandshakeResponse {
            header,
            error_code: KafkaCode::from_i16(error_code).unwrap_or(KafkaCode::Unknown),
            mechanisms,
        },
    ))
}
