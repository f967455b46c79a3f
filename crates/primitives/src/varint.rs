//! Compact integers and length-prefixed byte strings.
//!
//! Values below `0xFD` take one byte; larger values use a discriminator
//! byte (`0xFD` u16, `0xFE` u32, `0xFF` u64) followed by the little-endian
//! integer. Readers consume from a `&mut &[u8]` cursor.

use crate::{PrimitiveError, Result};

/// Default bound on a `VarBytes` field
pub const MAX_VAR_BYTES: usize = 256;

/// Number of bytes `value` occupies as a varint
pub const fn varint_len(value: u64) -> usize {
    if value < 0xFD {
        1
    } else if value <= 0xFFFF {
        3
    } else if value <= 0xFFFF_FFFF {
        5
    } else {
        9
    }
}

/// Append `value` as a varint
pub fn write_varint(out: &mut Vec<u8>, value: u64) {
    if value < 0xFD {
        out.push(value as u8);
    } else if value <= 0xFFFF {
        out.push(0xFD);
        out.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value <= 0xFFFF_FFFF {
        out.push(0xFE);
        out.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        out.push(0xFF);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

/// Read a varint, rejecting encodings longer than necessary
pub fn read_varint(input: &mut &[u8]) -> Result<u64> {
    let discriminant = take(input, 1)?[0];
    let (value, min) = match discriminant {
        0xFD => (u16::from_le_bytes(take_array(input)?) as u64, 0xFD),
        0xFE => (u32::from_le_bytes(take_array(input)?) as u64, 0x1_0000),
        0xFF => (u64::from_le_bytes(take_array(input)?), 0x1_0000_0000),
        small => return Ok(small as u64),
    };
    if value < min {
        return Err(PrimitiveError::NonCanonicalVarInt(value));
    }
    Ok(value)
}

/// Append `bytes` prefixed by its varint length
pub fn write_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

/// Number of bytes `bytes` occupies as `VarBytes`
pub const fn var_bytes_len(bytes: &[u8]) -> usize {
    varint_len(bytes.len() as u64) + bytes.len()
}

/// Read a length-prefixed byte string of at most `max` bytes
pub fn read_var_bytes<'a>(input: &mut &'a [u8], max: usize, field: &'static str) -> Result<&'a [u8]> {
    let len = read_varint(input)?;
    if len > max as u64 {
        return Err(PrimitiveError::FieldTooLong { field, len, max });
    }
    take(input, len as usize)
}

/// Split `n` bytes off the front of `input`
pub fn take<'a>(input: &mut &'a [u8], n: usize) -> Result<&'a [u8]> {
    if input.len() < n {
        return Err(PrimitiveError::UnexpectedEof { needed: n, available: input.len() });
    }
    let (head, rest) = input.split_at(n);
    *input = rest;
    Ok(head)
}

/// Split a fixed-size array off the front of `input`
pub fn take_array<const N: usize>(input: &mut &[u8]) -> Result<[u8; N]> {
    let mut out = [0u8; N];
    out.copy_from_slice(take(input, N)?);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_varint_boundaries() {
        let cases: [(u64, &[u8]); 6] = [
            (0, &[0x00]),
            (0xFC, &[0xFC]),
            (0xFD, &[0xFD, 0xFD, 0x00]),
            (0xFFFF, &[0xFD, 0xFF, 0xFF]),
            (0x1_0000, &[0xFE, 0x00, 0x00, 0x01, 0x00]),
            (0x1_0000_0000, &[0xFF, 0, 0, 0, 0, 1, 0, 0, 0]),
        ];
        for (value, encoded) in cases {
            let mut out = Vec::new();
            write_varint(&mut out, value);
            assert_eq!(out, encoded, "encoding {value:#x}");
            assert_eq!(varint_len(value), encoded.len());
            let mut cursor = encoded;
            assert_eq!(read_varint(&mut cursor).unwrap(), value);
            assert!(cursor.is_empty());
        }
    }

    #[test]
    fn test_non_canonical_rejected() {
        let mut cursor: &[u8] = &[0xFD, 0x10, 0x00];
        assert_eq!(read_varint(&mut cursor), Err(PrimitiveError::NonCanonicalVarInt(0x10)));
        let mut cursor: &[u8] = &[0xFE, 0xFF, 0xFF, 0x00, 0x00];
        assert!(read_varint(&mut cursor).is_err());
    }

    #[test]
    fn test_truncated_varint() {
        let mut cursor: &[u8] = &[0xFE, 0x01];
        assert!(matches!(
            read_varint(&mut cursor),
            Err(PrimitiveError::UnexpectedEof { needed: 4, available: 1 })
        ));
        let mut empty: &[u8] = &[];
        assert!(read_varint(&mut empty).is_err());
    }

    #[test]
    fn test_var_bytes_bound() {
        let mut out = Vec::new();
        write_var_bytes(&mut out, &[7u8; 300]);
        let mut cursor = out.as_slice();
        assert_eq!(
            read_var_bytes(&mut cursor, MAX_VAR_BYTES, "statement"),
            Err(PrimitiveError::FieldTooLong { field: "statement", len: 300, max: 256 })
        );
        let mut cursor = out.as_slice();
        assert_eq!(read_var_bytes(&mut cursor, 300, "statement").unwrap().len(), 300);
        assert!(cursor.is_empty());
    }

    #[test]
    fn test_var_bytes_truncated() {
        let mut cursor: &[u8] = &[5, 1, 2];
        assert!(read_var_bytes(&mut cursor, MAX_VAR_BYTES, "value").is_err());
    }

    proptest! {
        #[test]
        fn prop_varint_roundtrip(value in any::<u64>()) {
            let mut out = Vec::new();
            write_varint(&mut out, value);
            prop_assert_eq!(out.len(), varint_len(value));
            let mut cursor = out.as_slice();
            prop_assert_eq!(read_varint(&mut cursor).unwrap(), value);
            prop_assert!(cursor.is_empty());
        }
    }
}
