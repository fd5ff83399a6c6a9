//! Deserialize data from the bytecode protocol.
use bytes::Bytes;
use nom::{
    bytes::complete::take,
    multi::many_m_n,
    number::complete::{be_i16, be_i32, be_u16},
    IResult,
};
use nombytes::NomBytes;

use crate::constants::MAX_PROTOCOL_ARRAY_SIZE;
use crate::error::Error;

/// Convert bytes to a validated UTF-8 string.
/// Returns an error if the bytes are not valid UTF-8.
pub fn bytes_to_string(bytes: &Bytes) -> Result<String, nom::Err<nom::error::Error<NomBytes>>> {
    std::str::from_utf8(bytes)
        .map(|s| s.to_string())
        .map_err(|_| {
            nom::Err::Failure(nom::error::Error::new(
                NomBytes::from(bytes.as_ref()),
                nom::error::ErrorKind::Verify,
            ))
        })
}

/// Convert optional bytes to a validated UTF-8 string.
/// Returns None for None input, error for invalid UTF-8.
pub fn bytes_to_string_opt(
    bytes: Option<Bytes>,
) -> Result<Option<String>, nom::Err<nom::error::Error<NomBytes>>> {
    match bytes {
        Some(b) => bytes_to_string(&b).map(Some),
        None => Ok(None),
    }
}

pub fn parse_string(s: NomBytes) -> IResult<NomBytes, Bytes> {
    let (s, length) = be_u16(s)?;
    let (s, string) = take(length)(s)?;
    Ok((s, string.into_bytes()))
}

pub fn parse_nullable_string(s: NomBytes) -> IResult<NomBytes, Option<Bytes>> {
    let (s, length) = be_i16(s)?;

    // Null string
    if length == -1 {
        return Ok((s, None));
    }

    if length < 0 {
        return Err(nom::Err::Failure(nom::error::Error::new(
            s,
            nom::error::ErrorKind::TooLarge,
        )));
    }

    let (s, string) = take(length as u16)(s)?;
    Ok((s, Some(string.into_bytes())))
}

/// Parse a BYTES field: i32 length then payload.
pub fn parse_bytes(s: NomBytes) -> IResult<NomBytes, Bytes> {
    let (s, length) = be_i32(s)?;

    if length < 0 {
        return Err(nom::Err::Failure(nom::error::Error::new(
            s,
            nom::error::ErrorKind::TooLarge,
        )));
    }

    let (s, payload) = take(length as u32)(s)?;
    Ok((s, payload.into_bytes()))
}

/// Parse a nullable BYTES field: i32 length, -1 means null.
pub fn parse_nullable_bytes(s: NomBytes) -> IResult<NomBytes, Option<Bytes>> {
    let (s, length) = be_i32(s)?;

    if length == -1 {
        return Ok((s, None));
    }

    if length < 0 {
        return Err(nom::Err::Failure(nom::error::Error::new(
            s,
            nom::error::ErrorKind::TooLarge,
        )));
    }

    let (s, payload) = take(length as u32)(s)?;
    Ok((s, Some(payload.into_bytes())))
}

pub fn parse_array<O, E, F>(f: F) -> impl FnMut(NomBytes) -> IResult<NomBytes, Vec<O>, E>
where
    F: nom::Parser<NomBytes, O, E> + Copy,
    E: nom::error::ParseError<NomBytes>,
{
    move |input: NomBytes| {
        let i = input.clone();
        let (i, length) = be_i32(i)?;

        // Null array
        if length == -1 {
            return Ok((i, vec![]));
        }

        // Validate array size bounds
        if !(0..=MAX_PROTOCOL_ARRAY_SIZE).contains(&length) {
            return Err(nom::Err::Failure(E::from_error_kind(
                i,
                nom::error::ErrorKind::TooLarge,
            )));
        }

        many_m_n(length as usize, length as usize, f)(i)
    }
}

/// Map a nom error from a response body parse into a crate error.
///
/// A parser that ran off the end of the frame becomes
/// [`Error::BufferUnderRun`]; anything else keeps the offending bytes for
/// diagnostics.
pub fn to_crate_error(data: Bytes, err: nom::Err<nom::error::Error<NomBytes>>) -> Error {
    match err {
        nom::Err::Incomplete(_) => Error::BufferUnderRun("response body"),
        nom::Err::Error(e) | nom::Err::Failure(e) if e.code == nom::error::ErrorKind::Eof => {
            Error::BufferUnderRun("response body")
        }
        _ => Error::ParsingError(data),
    }
}
