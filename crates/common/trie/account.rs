use bytes::BufMut;
use ethereum_types::{H256, U256};
use flatstate_rlp::structs::Encoder;
use thiserror::Error;

/// Account state as carried by the flat state bucket.
///
/// The storage root is not part of this record; it is reconstructed by the
/// sub-trie loader and only exists in the hashed form of the account.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Account {
    pub nonce: u64,
    pub balance: U256,
    pub incarnation: u64,
    pub code_hash: H256,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountDecodeError {
    #[error("truncated account field")]
    Truncated,
    #[error("unexpected field-set bits {0:#04x}")]
    UnknownFields(u8),
    #[error("invalid field length {0}")]
    InvalidFieldLength(usize),
}

const NONCE_FLAG: u8 = 0x01;
const BALANCE_FLAG: u8 = 0x02;
const INCARNATION_FLAG: u8 = 0x04;
const CODE_HASH_FLAG: u8 = 0x08;

impl Account {
    /// Empty account code hash (keccak256 of empty bytes).
    pub const EMPTY_CODE_HASH: H256 = H256([
        0xc5, 0xd2, 0x46, 0x01, 0x86, 0xf7, 0x23, 0x3c, 0x92, 0x7e, 0x7d, 0xb2, 0xdc, 0xc7, 0x03,
        0xc0, 0xe5, 0x00, 0xb6, 0x53, 0xca, 0x82, 0x27, 0x3b, 0x7b, 0xfa, 0xd8, 0x04, 0x5d, 0x85,
        0xa4, 0x70,
    ]);

    pub fn is_empty_code_hash(&self) -> bool {
        self.code_hash == Self::EMPTY_CODE_HASH || self.code_hash.is_zero()
    }

    /// Compact field-set encoding used by the flat state bucket: a bitmask
    /// byte, then one length byte plus big-endian bytes (leading zeroes
    /// trimmed) per present field. Zero-valued fields are omitted entirely.
    pub fn encode_for_storage(&self) -> Vec<u8> {
        let mut out = vec![0u8];
        let mut field_set = 0u8;
        if self.nonce > 0 {
            field_set |= NONCE_FLAG;
            push_trimmed_be(&mut out, &self.nonce.to_be_bytes());
        }
        if !self.balance.is_zero() {
            field_set |= BALANCE_FLAG;
            push_trimmed_be(&mut out, &self.balance.to_big_endian());
        }
        if self.incarnation > 0 {
            field_set |= INCARNATION_FLAG;
            push_trimmed_be(&mut out, &self.incarnation.to_be_bytes());
        }
        if !self.is_empty_code_hash() {
            field_set |= CODE_HASH_FLAG;
            out.push(32);
            out.extend_from_slice(self.code_hash.as_bytes());
        }
        out[0] = field_set;
        out
    }

    pub fn decode_for_storage(data: &[u8]) -> Result<Self, AccountDecodeError> {
        let (field_set, mut rest) = data.split_first().ok_or(AccountDecodeError::Truncated)?;
        if field_set & !(NONCE_FLAG | BALANCE_FLAG | INCARNATION_FLAG | CODE_HASH_FLAG) != 0 {
            return Err(AccountDecodeError::UnknownFields(*field_set));
        }

        let mut account = Account {
            code_hash: Self::EMPTY_CODE_HASH,
            ..Default::default()
        };
        if field_set & NONCE_FLAG != 0 {
            let (bytes, tail) = take_field(rest, 8)?;
            account.nonce = be_to_u64(bytes);
            rest = tail;
        }
        if field_set & BALANCE_FLAG != 0 {
            let (bytes, tail) = take_field(rest, 32)?;
            account.balance = U256::from_big_endian(bytes);
            rest = tail;
        }
        if field_set & INCARNATION_FLAG != 0 {
            let (bytes, tail) = take_field(rest, 8)?;
            account.incarnation = be_to_u64(bytes);
            rest = tail;
        }
        if field_set & CODE_HASH_FLAG != 0 {
            let (bytes, tail) = take_field(rest, 32)?;
            if bytes.len() != 32 {
                return Err(AccountDecodeError::InvalidFieldLength(bytes.len()));
            }
            account.code_hash = H256::from_slice(bytes);
            rest = tail;
        }
        if !rest.is_empty() {
            return Err(AccountDecodeError::InvalidFieldLength(rest.len()));
        }
        Ok(account)
    }

    /// The canonical four-field RLP of the account, as hashed into the state
    /// trie. The storage root is supplied by the caller because it lives in
    /// the trie, not in the flat record.
    pub fn rlp(&self, storage_root: H256, buf: &mut dyn BufMut) {
        Encoder::new(buf)
            .encode_field(&self.nonce)
            .encode_field(&self.balance)
            .encode_field(&storage_root)
            .encode_field(&self.code_hash)
            .finish();
    }
}

fn push_trimmed_be(out: &mut Vec<u8>, value: &[u8]) {
    let start = value
        .iter()
        .position(|b| *b != 0)
        .unwrap_or(value.len() - 1);
    out.push((value.len() - start) as u8);
    out.extend_from_slice(&value[start..]);
}

fn take_field(data: &[u8], max_len: usize) -> Result<(&[u8], &[u8]), AccountDecodeError> {
    let (len, rest) = data.split_first().ok_or(AccountDecodeError::Truncated)?;
    let len = *len as usize;
    if len > max_len {
        return Err(AccountDecodeError::InvalidFieldLength(len));
    }
    if rest.len() < len {
        return Err(AccountDecodeError::Truncated);
    }
    Ok(rest.split_at(len))
}

fn be_to_u64(bytes: &[u8]) -> u64 {
    let mut padded = [0u8; 8];
    padded[8 - bytes.len()..].copy_from_slice(bytes);
    u64::from_be_bytes(padded)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn empty_account_is_one_byte() {
        let account = Account {
            code_hash: Account::EMPTY_CODE_HASH,
            ..Default::default()
        };
        assert_eq!(account.encode_for_storage(), vec![0x00]);
        assert_eq!(Account::decode_for_storage(&[0x00]).unwrap(), account);
    }

    #[test]
    fn roundtrip_full_account() {
        let account = Account {
            nonce: 2,
            balance: U256::from(1_000_000_000u64),
            incarnation: 1,
            code_hash: H256::from_low_u64_be(0xdead),
        };
        let encoded = account.encode_for_storage();
        assert_eq!(encoded[0], 0x0f);
        assert_eq!(Account::decode_for_storage(&encoded).unwrap(), account);
    }

    #[test]
    fn zero_fields_do_not_set_bits() {
        let account = Account {
            nonce: 1,
            balance: U256::zero(),
            incarnation: 0,
            code_hash: Account::EMPTY_CODE_HASH,
        };
        let encoded = account.encode_for_storage();
        assert_eq!(encoded, vec![0x01, 0x01, 0x01]);
        let decoded = Account::decode_for_storage(&encoded).unwrap();
        assert_eq!(decoded.code_hash, Account::EMPTY_CODE_HASH);
        assert_eq!(decoded, account);
    }

    #[test]
    fn rejects_unknown_bits() {
        assert_eq!(
            Account::decode_for_storage(&[0x10]),
            Err(AccountDecodeError::UnknownFields(0x10))
        );
    }

    #[test]
    fn rejects_truncated_fields() {
        assert_eq!(
            Account::decode_for_storage(&[0x01, 0x02, 0xaa]),
            Err(AccountDecodeError::Truncated)
        );
    }

    #[test]
    fn rejects_trailing_bytes() {
        assert!(Account::decode_for_storage(&[0x00, 0x01]).is_err());
    }

    #[test]
    fn account_rlp_shape() {
        let account = Account {
            nonce: 1,
            balance: U256::from(2u64),
            incarnation: 1,
            code_hash: Account::EMPTY_CODE_HASH,
        };
        let mut rlp = Vec::new();
        account.rlp(crate::EMPTY_TRIE_HASH.to_owned(), &mut rlp);
        // list header + nonce + balance + two 33-byte hash strings
        assert_eq!(rlp.len(), 2 + 1 + 1 + 33 + 33);
        assert_eq!(rlp[0], 0xf8);
    }
}
