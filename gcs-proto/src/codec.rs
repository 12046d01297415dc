//! Field-by-field MessagePack encoding.
//!
//! Wire values are written as a flat sequence of MessagePack scalars with no
//! enclosing array or map marker. The vocabulary of this protocol is small
//! and closed, so every type implements the traits by hand; this keeps the
//! encoded overhead of a frame tight (see [`crate::wire::FRAME_OVERHEAD`]).

use std::io::{Read, Write};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtoError {
    /// Underlying errors are not `Clone`, so the message is kept as a string.
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
}

pub trait WireEncode {
    fn encode_to<W: Write>(&self, writer: &mut W) -> Result<(), ProtoError>;
}

pub trait WireDecode: Sized {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, ProtoError>;
}

/// Encodes a value into a fresh buffer.
pub fn encode<T: WireEncode>(value: &T) -> Result<Vec<u8>, ProtoError> {
    let mut buf = Vec::new();
    value.encode_to(&mut buf)?;
    Ok(buf)
}

/// Decodes a value from a buffer, rejecting trailing garbage.
pub fn decode<T: WireDecode>(bytes: &[u8]) -> Result<T, ProtoError> {
    let mut reader = bytes;
    let value = T::decode_from(&mut reader)?;
    if !reader.is_empty() {
        return Err(ProtoError::Decode(format!(
            "{} trailing bytes after value",
            reader.len()
        )));
    }
    Ok(value)
}

impl WireEncode for u64 {
    fn encode_to<W: Write>(&self, writer: &mut W) -> Result<(), ProtoError> {
        rmp::encode::write_uint(writer, *self)
            .map(|_| ())
            .map_err(|e| ProtoError::Encode(e.to_string()))
    }
}

impl WireDecode for u64 {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, ProtoError> {
        rmp::decode::read_int(reader).map_err(|e| ProtoError::Decode(e.to_string()))
    }
}

impl WireEncode for u32 {
    fn encode_to<W: Write>(&self, writer: &mut W) -> Result<(), ProtoError> {
        (*self as u64).encode_to(writer)
    }
}

impl WireDecode for u32 {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, ProtoError> {
        rmp::decode::read_int(reader).map_err(|e| ProtoError::Decode(e.to_string()))
    }
}

impl WireEncode for u8 {
    fn encode_to<W: Write>(&self, writer: &mut W) -> Result<(), ProtoError> {
        (*self as u64).encode_to(writer)
    }
}

impl WireDecode for u8 {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, ProtoError> {
        rmp::decode::read_int(reader).map_err(|e| ProtoError::Decode(e.to_string()))
    }
}

impl WireEncode for i64 {
    fn encode_to<W: Write>(&self, writer: &mut W) -> Result<(), ProtoError> {
        rmp::encode::write_sint(writer, *self)
            .map(|_| ())
            .map_err(|e| ProtoError::Encode(e.to_string()))
    }
}

impl WireDecode for i64 {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, ProtoError> {
        rmp::decode::read_int(reader).map_err(|e| ProtoError::Decode(e.to_string()))
    }
}

impl WireEncode for bool {
    fn encode_to<W: Write>(&self, writer: &mut W) -> Result<(), ProtoError> {
        rmp::encode::write_bool(writer, *self).map_err(|e| ProtoError::Encode(e.to_string()))
    }
}

impl WireDecode for bool {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, ProtoError> {
        rmp::decode::read_bool(reader).map_err(|e| ProtoError::Decode(e.to_string()))
    }
}

impl WireEncode for [u8] {
    fn encode_to<W: Write>(&self, writer: &mut W) -> Result<(), ProtoError> {
        rmp::encode::write_bin(writer, self)
            .map(|_| ())
            .map_err(|e| ProtoError::Encode(e.to_string()))
    }
}

impl WireEncode for Vec<u8> {
    fn encode_to<W: Write>(&self, writer: &mut W) -> Result<(), ProtoError> {
        self.as_slice().encode_to(writer)
    }
}

impl WireDecode for Vec<u8> {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, ProtoError> {
        let len = rmp::decode::read_bin_len(reader)
            .map_err(|e| ProtoError::Decode(e.to_string()))?;
        let mut buf = vec![0u8; len as usize];
        reader
            .read_exact(&mut buf)
            .map_err(|e| ProtoError::Decode(e.to_string()))?;
        Ok(buf)
    }
}

impl WireEncode for str {
    fn encode_to<W: Write>(&self, writer: &mut W) -> Result<(), ProtoError> {
        rmp::encode::write_str(writer, self).map_err(|e| ProtoError::Encode(e.to_string()))
    }
}

impl WireEncode for String {
    fn encode_to<W: Write>(&self, writer: &mut W) -> Result<(), ProtoError> {
        self.as_str().encode_to(writer)
    }
}

impl WireDecode for String {
    fn decode_from<R: Read>(reader: &mut R) -> Result<Self, ProtoError> {
        let len = rmp::decode::read_str_len(reader)
            .map_err(|e| ProtoError::Decode(e.to_string()))?;
        let mut buf = vec![0u8; len as usize];
        reader
            .read_exact(&mut buf)
            .map_err(|e| ProtoError::Decode(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| ProtoError::Decode(e.to_string()))
    }
}
