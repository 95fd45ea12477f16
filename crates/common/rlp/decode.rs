use ethereum_types::{H256, U256};

use super::{
    constants::{RLP_EMPTY_LIST, RLP_NULL},
    error::RLPDecodeError,
};

/// Trait for decoding RLP encoded slices of data.
/// [`RLPDecode::decode_unfinished`] returns the decoded value along with the
/// remaining bytes; [`RLPDecode::decode`] requires the input to be fully
/// consumed. Implementors only need `decode_unfinished`.
pub trait RLPDecode: Sized {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError>;

    fn decode(rlp: &[u8]) -> Result<Self, RLPDecodeError> {
        let (decoded, remaining) = Self::decode_unfinished(rlp)?;
        if !remaining.is_empty() {
            return Err(RLPDecodeError::InvalidLength);
        }
        Ok(decoded)
    }
}

impl RLPDecode for bool {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let first = rlp.first().ok_or(RLPDecodeError::InvalidLength)?;
        let value = match *first {
            RLP_NULL => false,
            0x01 => true,
            b => return Err(RLPDecodeError::MalformedBoolean(b)),
        };
        Ok((value, &rlp[1..]))
    }
}

macro_rules! impl_rlp_decode_uint {
    ($($t:ty),*) => {
        $(impl RLPDecode for $t {
            fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
                let (bytes, rest) = decode_bytes(rlp)?;
                let padded = static_left_pad(bytes)?;
                Ok((<$t>::from_be_bytes(padded), rest))
            }
        })*
    };
}

impl_rlp_decode_uint!(u8, u16, u32, u64, usize);

impl RLPDecode for U256 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        if bytes.len() > 32 || bytes.first() == Some(&0) {
            return Err(RLPDecodeError::MalformedData);
        }
        Ok((U256::from_big_endian(bytes), rest))
    }
}

impl RLPDecode for H256 {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        if bytes.len() != 32 {
            return Err(RLPDecodeError::InvalidLength);
        }
        Ok((H256::from_slice(bytes), rest))
    }
}

impl RLPDecode for Vec<u8> {
    fn decode_unfinished(rlp: &[u8]) -> Result<(Self, &[u8]), RLPDecodeError> {
        let (bytes, rest) = decode_bytes(rlp)?;
        Ok((bytes.to_vec(), rest))
    }
}

/// Decodes a single RLP item header. Returns `(is_list, payload, remaining)`.
pub fn decode_rlp_item(rlp: &[u8]) -> Result<(bool, &[u8], &[u8]), RLPDecodeError> {
    let first = *rlp.first().ok_or(RLPDecodeError::InvalidLength)?;
    match first {
        // Single byte encoding itself.
        0..=0x7f => Ok((false, &rlp[..1], &rlp[1..])),
        // Short string.
        RLP_NULL..=0xb7 => {
            let len = (first - RLP_NULL) as usize;
            split_payload(rlp, 1, len, false)
        }
        // Long string.
        0xb8..=0xbf => {
            let len_len = (first - 0xb7) as usize;
            let len = decode_length_field(rlp, len_len)?;
            split_payload(rlp, 1 + len_len, len, false)
        }
        // Short list.
        RLP_EMPTY_LIST..=0xf7 => {
            let len = (first - RLP_EMPTY_LIST) as usize;
            split_payload(rlp, 1, len, true)
        }
        // Long list.
        _ => {
            let len_len = (first - 0xf7) as usize;
            let len = decode_length_field(rlp, len_len)?;
            split_payload(rlp, 1 + len_len, len, true)
        }
    }
}

fn split_payload(
    rlp: &[u8],
    header_len: usize,
    payload_len: usize,
    is_list: bool,
) -> Result<(bool, &[u8], &[u8]), RLPDecodeError> {
    let end = header_len
        .checked_add(payload_len)
        .ok_or(RLPDecodeError::InvalidLength)?;
    if rlp.len() < end {
        return Err(RLPDecodeError::InvalidLength);
    }
    Ok((is_list, &rlp[header_len..end], &rlp[end..]))
}

fn decode_length_field(rlp: &[u8], len_len: usize) -> Result<usize, RLPDecodeError> {
    if rlp.len() < 1 + len_len || len_len > std::mem::size_of::<usize>() {
        return Err(RLPDecodeError::InvalidLength);
    }
    let bytes = &rlp[1..1 + len_len];
    if bytes.first() == Some(&0) {
        return Err(RLPDecodeError::MalformedData);
    }
    let padded = static_left_pad(bytes)?;
    Ok(usize::from_be_bytes(padded))
}

/// Decodes an RLP string item, rejecting lists.
pub fn decode_bytes(rlp: &[u8]) -> Result<(&[u8], &[u8]), RLPDecodeError> {
    match decode_rlp_item(rlp)? {
        (false, payload, rest) => Ok((payload, rest)),
        (true, _, _) => Err(RLPDecodeError::UnexpectedList),
    }
}

/// Returns the next encoded item with its prefix, plus the remaining bytes.
pub fn get_item_with_prefix(rlp: &[u8]) -> Result<(&[u8], &[u8]), RLPDecodeError> {
    let (_, payload, rest) = decode_rlp_item(rlp)?;
    let item_len = rlp.len() - rest.len();
    debug_assert!(payload.len() <= item_len);
    Ok((&rlp[..item_len], rest))
}

/// Left-pads big-endian bytes into a fixed-size array, rejecting leading
/// zeroes and oversized inputs.
pub fn static_left_pad<const N: usize>(bytes: &[u8]) -> Result<[u8; N], RLPDecodeError> {
    let mut padded = [0; N];
    if bytes.is_empty() {
        return Ok(padded);
    }
    if bytes[0] == 0 {
        return Err(RLPDecodeError::MalformedData);
    }
    if bytes.len() > N {
        return Err(RLPDecodeError::InvalidLength);
    }
    padded[N - bytes.len()..].copy_from_slice(bytes);
    Ok(padded)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::encode::encode;

    #[test]
    fn decode_uints() {
        assert_eq!(u64::decode(&[RLP_NULL]).unwrap(), 0);
        assert_eq!(u64::decode(&[0x09]).unwrap(), 9);
        assert_eq!(u64::decode(&[0x82, 0x04, 0x00]).unwrap(), 1024);
    }

    #[test]
    fn decode_rejects_trailing_bytes() {
        assert!(u64::decode(&[0x09, 0x01]).is_err());
    }

    #[test]
    fn decode_rejects_leading_zeroes() {
        assert!(u64::decode(&[0x82, 0x00, 0x01]).is_err());
    }

    #[test]
    fn roundtrip_bytes() {
        for value in [vec![], vec![0x00], vec![0x80], b"lorem ipsum".to_vec(), vec![7u8; 80]] {
            let encoded = encode(value.as_slice());
            assert_eq!(Vec::<u8>::decode(&encoded).unwrap(), value);
        }
    }

    #[test]
    fn roundtrip_u256() {
        for value in [0u64, 1, 127, 128, u64::MAX] {
            let value = ethereum_types::U256::from(value);
            assert_eq!(ethereum_types::U256::decode(&encode(value)).unwrap(), value);
        }
    }

    #[test]
    fn item_with_prefix_walks_list_payload() {
        // [ "cat", "dog" ]
        let rlp = [0xc8, 0x83, b'c', b'a', b't', 0x83, b'd', b'o', b'g'];
        let (is_list, payload, rest) = decode_rlp_item(&rlp).unwrap();
        assert!(is_list);
        assert!(rest.is_empty());
        let (first, rest) = get_item_with_prefix(payload).unwrap();
        assert_eq!(first, &[0x83, b'c', b'a', b't']);
        let (second, rest) = get_item_with_prefix(rest).unwrap();
        assert_eq!(second, &[0x83, b'd', b'o', b'g']);
        assert!(rest.is_empty());
    }
}
