//! Persists account and storage updates into the flat state buckets in the
//! exact shape the sub-trie loader reads back.

use ethereum_types::{H256, U256};

use crate::{
    HASH_LENGTH, INCARNATION_LENGTH,
    account::Account,
    db::{CODE_BUCKET, CURRENT_STATE_BUCKET, MutableFlatDb},
    error::TrieError,
};

pub struct StateWriter<'a, Db: MutableFlatDb> {
    db: &'a Db,
}

impl<'a, Db: MutableFlatDb> StateWriter<'a, Db> {
    pub fn new(db: &'a Db) -> Self {
        Self { db }
    }

    pub fn update_account_data(
        &self,
        addr_hash: H256,
        account: &Account,
    ) -> Result<(), TrieError> {
        self.db.put(
            CURRENT_STATE_BUCKET,
            addr_hash.as_bytes().to_vec(),
            account.encode_for_storage(),
        )
    }

    pub fn delete_account(&self, addr_hash: H256) -> Result<(), TrieError> {
        self.db.delete(CURRENT_STATE_BUCKET, addr_hash.as_bytes())
    }

    pub fn update_account_code(&self, code_hash: H256, code: &[u8]) -> Result<(), TrieError> {
        self.db
            .put(CODE_BUCKET, code_hash.as_bytes().to_vec(), code.to_vec())
    }

    /// Writes one storage slot under the composite key. A zero value deletes
    /// the slot, matching the flat bucket's no-zero-values convention.
    /// The incarnation travels bit-inverted in the key so that newer
    /// incarnations sort first and a forward scan from
    /// `addr_hash ∥ !incarnation` sees only live slots.
    pub fn write_account_storage(
        &self,
        addr_hash: H256,
        incarnation: u64,
        slot_hash: H256,
        value: U256,
    ) -> Result<(), TrieError> {
        let key = composite_storage_key(addr_hash, incarnation, slot_hash);
        if value.is_zero() {
            return self.db.delete(CURRENT_STATE_BUCKET, &key);
        }
        let be = value.to_big_endian();
        let start = be.iter().position(|b| *b != 0).unwrap_or(be.len() - 1);
        self.db
            .put(CURRENT_STATE_BUCKET, key.to_vec(), be[start..].to_vec())
    }
}

pub fn composite_storage_key(
    addr_hash: H256,
    incarnation: u64,
    slot_hash: H256,
) -> [u8; 2 * HASH_LENGTH + INCARNATION_LENGTH] {
    let mut key = [0u8; 2 * HASH_LENGTH + INCARNATION_LENGTH];
    key[..HASH_LENGTH].copy_from_slice(addr_hash.as_bytes());
    key[HASH_LENGTH..HASH_LENGTH + INCARNATION_LENGTH]
        .copy_from_slice(&(!incarnation).to_be_bytes());
    key[HASH_LENGTH + INCARNATION_LENGTH..].copy_from_slice(slot_hash.as_bytes());
    key
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::{FlatDb, InMemoryFlatDb};

    #[test]
    fn account_roundtrips_through_the_bucket() {
        let db = InMemoryFlatDb::new();
        let writer = StateWriter::new(&db);
        let addr_hash = H256::repeat_byte(0x11);
        let account = Account {
            nonce: 3,
            balance: U256::from(10u64),
            incarnation: 1,
            code_hash: Account::EMPTY_CODE_HASH,
        };
        writer.update_account_data(addr_hash, &account).unwrap();

        let stored = db
            .get(CURRENT_STATE_BUCKET, addr_hash.as_bytes())
            .unwrap()
            .unwrap();
        assert_eq!(Account::decode_for_storage(&stored).unwrap(), account);

        writer.delete_account(addr_hash).unwrap();
        assert!(db
            .get(CURRENT_STATE_BUCKET, addr_hash.as_bytes())
            .unwrap()
            .is_none());
    }

    #[test]
    fn storage_values_are_trimmed_and_zero_deletes() {
        let db = InMemoryFlatDb::new();
        let writer = StateWriter::new(&db);
        let addr_hash = H256::repeat_byte(0x22);
        let slot = H256::repeat_byte(0x01);
        writer
            .write_account_storage(addr_hash, 1, slot, U256::from(0x0100u64))
            .unwrap();

        let key = composite_storage_key(addr_hash, 1, slot);
        assert_eq!(
            db.get(CURRENT_STATE_BUCKET, &key).unwrap().unwrap(),
            vec![0x01, 0x00]
        );

        writer
            .write_account_storage(addr_hash, 1, slot, U256::zero())
            .unwrap();
        assert!(db.get(CURRENT_STATE_BUCKET, &key).unwrap().is_none());
    }

    #[test]
    fn composite_key_inverts_the_incarnation() {
        let key = composite_storage_key(H256::repeat_byte(0xaa), 2, H256::repeat_byte(0xbb));
        assert_eq!(key.len(), 72);
        assert_eq!(&key[..32], &[0xaa; 32]);
        assert_eq!(&key[32..40], &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xfd]);
        assert_eq!(&key[40..], &[0xbb; 32]);
    }

    #[test]
    fn newer_incarnations_sort_first() {
        let slot = H256::repeat_byte(0x01);
        let addr = H256::repeat_byte(0xaa);
        let older = composite_storage_key(addr, 1, slot);
        let newer = composite_storage_key(addr, 2, slot);
        assert!(newer < older);
    }
}
