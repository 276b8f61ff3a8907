//! Small byte-slice cursor helpers shared by the packet codecs.
//!
//! The codec chooses to walk `&[u8]` slices and return `(value, rest)` pairs
//! rather than wrap a `std::io::Read`, so a short buffer is just another
//! `Err` instead of a partial read to reason about.

use crate::error::PacketError;

pub(crate) fn take_u8(bytes: &[u8]) -> Result<(u8, &[u8]), PacketError> {
    match bytes.split_first() {
        Some((&b, rest)) => Ok((b, rest)),
        None => Err(PacketError::TooShort),
    }
}

pub(crate) fn take_n(bytes: &[u8], n: usize) -> Result<(&[u8], &[u8]), PacketError> {
    if bytes.len() < n {
        return Err(PacketError::TooShort);
    }
    Ok(bytes.split_at(n))
}

pub(crate) fn take_u16_be(bytes: &[u8]) -> Result<(u16, &[u8]), PacketError> {
    let (field, rest) = take_n(bytes, 2)?;
    Ok((u16::from_be_bytes([field[0], field[1]]), rest))
}

pub(crate) fn take_u32_be(bytes: &[u8]) -> Result<(u32, &[u8]), PacketError> {
    let (field, rest) = take_n(bytes, 4)?;
    Ok((u32::from_be_bytes(field.try_into().unwrap()), rest))
}

pub(crate) fn take_u64_be(bytes: &[u8]) -> Result<(u64, &[u8]), PacketError> {
    let (field, rest) = take_n(bytes, 8)?;
    Ok((u64::from_be_bytes(field.try_into().unwrap()), rest))
}

/// Reads a NUL-terminated UTF-8 string. Returns `None` (not an error) when
/// the buffer is exhausted before any bytes were read, matching §4.1's
/// allowance for an unterminated/absent name on `end` packets.
pub(crate) fn take_optional_cstr(bytes: &[u8]) -> Result<(Option<String>, &[u8]), PacketError> {
    match bytes.iter().position(|&b| b == 0) {
        Some(nul_at) => {
            let name = std::str::from_utf8(&bytes[..nul_at]).map_err(|_| PacketError::InvalidName)?;
            Ok((Some(name.to_string()), &bytes[nul_at + 1..]))
        }
        None => {
            if bytes.is_empty() {
                Ok((None, bytes))
            } else {
                let name = std::str::from_utf8(bytes).map_err(|_| PacketError::InvalidName)?;
                Ok((Some(name.to_string()), &[]))
            }
        }
    }
}

/// High bit of a MIDI byte: status bytes have it set, data bytes do not.
pub(crate) trait StatusBit {
    fn status_bit(&self) -> bool;
}

impl StatusBit for u8 {
    fn status_bit(&self) -> bool {
        self & 0x80 != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_cstr_terminated() {
        let bytes = b"Session A\0trailing";
        let (name, rest) = take_optional_cstr(bytes).unwrap();
        assert_eq!(name.as_deref(), Some("Session A"));
        assert_eq!(rest, b"trailing");
    }

    #[test]
    fn optional_cstr_absent() {
        let (name, rest) = take_optional_cstr(&[]).unwrap();
        assert_eq!(name, None);
        assert!(rest.is_empty());
    }

    #[test]
    fn optional_cstr_unterminated_is_taken_whole() {
        let bytes = b"no terminator";
        let (name, rest) = take_optional_cstr(bytes).unwrap();
        assert_eq!(name.as_deref(), Some("no terminator"));
        assert!(rest.is_empty());
    }
}
