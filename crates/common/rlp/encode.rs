use bytes::BufMut;
use ethereum_types::{H256, U256};

use super::constants::{RLP_EMPTY_LIST, RLP_NULL};

/// Encode a value to a freshly allocated RLP buffer.
/// For encoding into an existing buffer, use [`RLPEncode::encode`].
pub fn encode<T: RLPEncode>(value: T) -> Vec<u8> {
    let mut buf = Vec::new();
    value.encode(&mut buf);
    buf
}

/// Trait for encoding a value in RLP format.
/// See <https://ethereum.org/en/developers/docs/data-structures-and-encoding/rlp/>
pub trait RLPEncode {
    fn encode(&self, buf: &mut dyn BufMut);

    fn length(&self) -> usize {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf.len()
    }

    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        self.encode(&mut buf);
        buf
    }
}

/// Writes the RLP header for a list whose encoded payload is `payload_len` bytes long.
pub fn encode_list_header(payload_len: usize, buf: &mut dyn BufMut) {
    if payload_len < 56 {
        buf.put_u8(RLP_EMPTY_LIST + payload_len as u8);
    } else {
        let be = payload_len.to_be_bytes();
        let start = be.iter().position(|b| *b != 0).unwrap_or(be.len() - 1);
        buf.put_u8(0xf7 + (be.len() - start) as u8);
        buf.put_slice(&be[start..]);
    }
}

/// Writes the RLP header for a byte string of `len` bytes. Single bytes below
/// 0x80 encode as themselves and take no header; callers handle that case.
pub fn encode_bytes_header(len: usize, buf: &mut dyn BufMut) {
    if len < 56 {
        buf.put_u8(RLP_NULL + len as u8);
    } else {
        let be = len.to_be_bytes();
        let start = be.iter().position(|b| *b != 0).unwrap_or(be.len() - 1);
        buf.put_u8(0xb7 + (be.len() - start) as u8);
        buf.put_slice(&be[start..]);
    }
}

fn encode_trimmed_be(value_be: &[u8], buf: &mut dyn BufMut) {
    let start = value_be.iter().position(|b| *b != 0);
    match start {
        // All zeroes: the integer zero, encoded as the empty string.
        None => buf.put_u8(RLP_NULL),
        Some(start) => {
            let trimmed = &value_be[start..];
            if trimmed.len() == 1 && trimmed[0] < RLP_NULL {
                buf.put_u8(trimmed[0]);
            } else {
                buf.put_u8(RLP_NULL + trimmed.len() as u8);
                buf.put_slice(trimmed);
            }
        }
    }
}

impl RLPEncode for bool {
    fn encode(&self, buf: &mut dyn BufMut) {
        if *self {
            buf.put_u8(0x01);
        } else {
            buf.put_u8(RLP_NULL);
        }
    }

    fn length(&self) -> usize {
        1
    }
}

impl RLPEncode for u8 {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_trimmed_be(&self.to_be_bytes(), buf);
    }
}

impl RLPEncode for u16 {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_trimmed_be(&self.to_be_bytes(), buf);
    }
}

impl RLPEncode for u32 {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_trimmed_be(&self.to_be_bytes(), buf);
    }
}

impl RLPEncode for u64 {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_trimmed_be(&self.to_be_bytes(), buf);
    }
}

impl RLPEncode for usize {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_trimmed_be(&self.to_be_bytes(), buf);
    }
}

impl RLPEncode for U256 {
    fn encode(&self, buf: &mut dyn BufMut) {
        encode_trimmed_be(&self.to_big_endian(), buf);
    }
}

impl RLPEncode for H256 {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_bytes().encode(buf)
    }
}

impl RLPEncode for &[u8] {
    fn encode(&self, buf: &mut dyn BufMut) {
        if self.len() == 1 && self[0] < RLP_NULL {
            buf.put_u8(self[0]);
        } else {
            encode_bytes_header(self.len(), buf);
            buf.put_slice(self);
        }
    }
}

impl RLPEncode for Vec<u8> {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_slice().encode(buf)
    }
}

impl<const N: usize> RLPEncode for [u8; N] {
    fn encode(&self, buf: &mut dyn BufMut) {
        self.as_slice().encode(buf)
    }
}

impl<T: RLPEncode> RLPEncode for &T {
    fn encode(&self, buf: &mut dyn BufMut) {
        (*self).encode(buf)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn encode_small_ints() {
        assert_eq!(encode(0u64), vec![RLP_NULL]);
        assert_eq!(encode(1u64), vec![0x01]);
        assert_eq!(encode(0x7fu64), vec![0x7f]);
        assert_eq!(encode(0x80u64), vec![0x81, 0x80]);
        assert_eq!(encode(0x0400u64), vec![0x82, 0x04, 0x00]);
    }

    #[test]
    fn encode_u256_matches_u64() {
        assert_eq!(encode(U256::from(0x12345678u64)), encode(0x12345678u64));
        assert_eq!(encode(U256::zero()), vec![RLP_NULL]);
    }

    #[test]
    fn encode_byte_strings() {
        assert_eq!(encode([0x00u8].as_slice()), vec![0x00]);
        assert_eq!(encode([0x7fu8].as_slice()), vec![0x7f]);
        assert_eq!(encode([0x80u8].as_slice()), vec![0x81, 0x80]);
        assert_eq!(encode(b"dog".as_slice()), vec![0x83, b'd', b'o', b'g']);
        assert_eq!(encode([0u8; 0].as_slice()), vec![RLP_NULL]);
    }

    #[test]
    fn encode_long_string_header() {
        let data = vec![0xaau8; 60];
        let out = encode(data.as_slice());
        assert_eq!(out[0], 0xb8);
        assert_eq!(out[1], 60);
        assert_eq!(&out[2..], data.as_slice());
    }

    #[test]
    fn encode_h256_is_fixed_width() {
        let h = H256::from_low_u64_be(7);
        let out = encode(h);
        assert_eq!(out.len(), 33);
        assert_eq!(out[0], 0xa0);
    }

    #[test]
    fn list_header_boundaries() {
        let mut buf = Vec::new();
        encode_list_header(55, &mut buf);
        assert_eq!(buf, vec![0xf7]);
        buf.clear();
        encode_list_header(56, &mut buf);
        assert_eq!(buf, vec![0xf8, 56]);
    }
}
