//! Schema-less protobuf decoding for `fetchProto`
//!
//! Messages decode into a JSON object keyed by field number. Repeated
//! fields become arrays. Length-delimited fields are read as text when they
//! are printable UTF-8, as a nested message when they parse as one, and as
//! base64 otherwise.

use base64::{engine::general_purpose, Engine as _};
use serde_json::{Map, Value};

/// Largest integer JavaScript numbers hold exactly
const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WireError {
    #[error("Truncated message at byte {0}")]
    Truncated(usize),

    #[error("Varint too long at byte {0}")]
    VarintOverflow(usize),

    #[error("Invalid field number 0 at byte {0}")]
    InvalidField(usize),

    #[error("Unsupported wire type {wire_type} at byte {offset}")]
    UnsupportedWireType { wire_type: u64, offset: usize },
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn done(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn varint(&mut self) -> Result<u64, WireError> {
        let start = self.pos;
        let mut value = 0u64;
        for shift in (0..64).step_by(7) {
            let byte = *self.bytes.get(self.pos).ok_or(WireError::Truncated(self.pos))?;
            self.pos += 1;
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(WireError::VarintOverflow(start))
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], WireError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(WireError::Truncated(self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }
}

/// Decode one protobuf message
pub fn decode_message(bytes: &[u8]) -> Result<Map<String, Value>, WireError> {
    let mut reader = Reader::new(bytes);
    let mut fields = Map::new();

    while !reader.done() {
        let offset = reader.pos;
        let key = reader.varint()?;
        let field = key >> 3;
        if field == 0 {
            return Err(WireError::InvalidField(offset));
        }

        let value = match key & 0x7 {
            0 => number(reader.varint()?),
            1 => {
                let raw = reader.take(8)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(raw);
                number(u64::from_le_bytes(buf))
            }
            2 => {
                let len = reader.varint()? as usize;
                length_delimited(reader.take(len)?)
            }
            5 => {
                let raw = reader.take(4)?;
                let mut buf = [0u8; 4];
                buf.copy_from_slice(raw);
                Value::from(u32::from_le_bytes(buf))
            }
            wire_type => return Err(WireError::UnsupportedWireType { wire_type, offset }),
        };

        push_field(&mut fields, field.to_string(), value);
    }

    Ok(fields)
}

/// Strip a gRPC-web data frame header when one wraps the message
pub fn strip_grpc_web_frame(bytes: &[u8]) -> &[u8] {
    if bytes.len() < 5 || bytes[0] != 0 {
        return bytes;
    }
    let len = u32::from_be_bytes([bytes[1], bytes[2], bytes[3], bytes[4]]) as usize;
    match bytes.get(5..5 + len) {
        Some(frame) => frame,
        None => bytes,
    }
}

fn number(value: u64) -> Value {
    if value > MAX_SAFE_INTEGER {
        Value::String(value.to_string())
    } else {
        Value::from(value)
    }
}

fn length_delimited(bytes: &[u8]) -> Value {
    if let Ok(text) = std::str::from_utf8(bytes) {
        if is_printable(text) {
            return Value::String(text.to_string());
        }
    }
    match decode_message(bytes) {
        Ok(message) if !message.is_empty() => Value::Object(message),
        _ => Value::String(general_purpose::STANDARD.encode(bytes)),
    }
}

fn is_printable(text: &str) -> bool {
    text.chars()
        .all(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
}

fn push_field(fields: &mut Map<String, Value>, key: String, value: Value) {
    match fields.get_mut(&key) {
        Some(Value::Array(items)) => items.push(value),
        Some(existing) => {
            let first = existing.take();
            *existing = Value::Array(vec![first, value]);
        }
        None => {
            fields.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_scalar_and_string_fields() {
        // field 1 varint 150, field 2 "testing"
        let bytes = [
            0x08, 0x96, 0x01, 0x12, 0x07, b't', b'e', b's', b't', b'i', b'n', b'g',
        ];
        let message = decode_message(&bytes).unwrap();
        assert_eq!(Value::Object(message), json!({ "1": 150, "2": "testing" }));
    }

    #[test]
    fn test_nested_and_repeated_fields() {
        // field 3 nested { 1: 1 }, repeated twice; field 5 fixed32 7
        let bytes = [0x1a, 0x02, 0x08, 0x01, 0x1a, 0x02, 0x08, 0x02, 0x2d, 0x07, 0x00, 0x00, 0x00];
        let message = decode_message(&bytes).unwrap();
        assert_eq!(
            Value::Object(message),
            json!({ "3": [{ "1": 1 }, { "1": 2 }], "5": 7 })
        );
    }

    #[test]
    fn test_opaque_bytes_fall_back_to_base64() {
        let bytes = [0x0a, 0x02, 0xff, 0xfe];
        let message = decode_message(&bytes).unwrap();
        assert_eq!(message["1"], json!("//4="));
    }

    #[test]
    fn test_truncated_and_invalid_input() {
        assert_eq!(decode_message(&[0x12, 0x05, b'a']), Err(WireError::Truncated(2)));
        assert_eq!(decode_message(&[0x00]), Err(WireError::InvalidField(0)));
        assert!(matches!(
            decode_message(&[0x0b]),
            Err(WireError::UnsupportedWireType { wire_type: 3, .. })
        ));
    }

    #[test]
    fn test_large_varints_become_strings() {
        let mut bytes = vec![0x08];
        bytes.extend([0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01]);
        let message = decode_message(&bytes).unwrap();
        assert_eq!(message["1"], json!(u64::MAX.to_string()));
    }

    #[test]
    fn test_strip_grpc_web_frame() {
        let framed = [0x00, 0x00, 0x00, 0x00, 0x02, 0x08, 0x01, 0x80, 0x00];
        assert_eq!(strip_grpc_web_frame(&framed), &[0x08, 0x01]);
        assert_eq!(strip_grpc_web_frame(&[0x08, 0x01]), &[0x08, 0x01]);
    }
}
