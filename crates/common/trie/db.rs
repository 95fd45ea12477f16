use std::{
    collections::{BTreeMap, HashMap},
    ops::Bound,
    sync::{Arc, Mutex},
};

use crate::{HASH_LENGTH, error::TrieError};

/// Main state bucket: 32-byte keys map hashed addresses to storage-encoded
/// accounts, 72-byte keys map composite storage keys to slot values.
pub const CURRENT_STATE_BUCKET: &str = "CurrentState";
/// Cached branch hashes keyed by byte prefixes of the composite key space.
pub const INTERMEDIATE_TRIE_HASH_BUCKET: &str = "IntermediateTrieHash";
/// Serialized witness lengths for the cached branch hashes; shares the key
/// set of [`INTERMEDIATE_TRIE_HASH_BUCKET`] when witness tracking is on.
pub const INTERMEDIATE_TRIE_WITNESS_LEN_BUCKET: &str = "IntermediateTrieWitnessLen";
/// Contract bytecode keyed by code hash.
pub const CODE_BUCKET: &str = "Code";

/// A cursor over one sorted bucket. Returned pairs are owned copies, valid
/// independently of later cursor calls.
pub trait OrderedCursor {
    /// Positions the cursor at the smallest key `>= key` and returns that
    /// entry, or `None` if the bucket has no such key.
    fn seek_to(&mut self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, TrieError>;

    /// Advances to the next entry in key order.
    fn next(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>, TrieError>;
}

/// A flat-ordered key-value store exposing cursor semantics per bucket.
/// The sub-trie loader only supports stores of this shape; anything else
/// cannot implement this trait and is rejected at compile time.
pub trait FlatDb: Send + Sync {
    fn cursor(&self, bucket: &'static str) -> Result<Box<dyn OrderedCursor + '_>, TrieError>;

    fn get(&self, bucket: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError>;
}

pub trait MutableFlatDb: FlatDb {
    fn put(&self, bucket: &'static str, key: Vec<u8>, value: Vec<u8>) -> Result<(), TrieError>;

    fn delete(&self, bucket: &'static str, key: &[u8]) -> Result<(), TrieError>;
}

type Buckets = HashMap<&'static str, BTreeMap<Vec<u8>, Vec<u8>>>;

/// InMemory implementation of the [`FlatDb`] trait, with cursor, get, put and
/// delete operations.
#[derive(Default, Clone)]
pub struct InMemoryFlatDb {
    inner: Arc<Mutex<Buckets>>,
}

impl InMemoryFlatDb {
    pub fn new() -> Self {
        Self::default()
    }
}

impl FlatDb for InMemoryFlatDb {
    fn cursor(&self, bucket: &'static str) -> Result<Box<dyn OrderedCursor + '_>, TrieError> {
        Ok(Box::new(InMemoryCursor {
            inner: self.inner.clone(),
            bucket,
            position: CursorPosition::Start,
        }))
    }

    fn get(&self, bucket: &'static str, key: &[u8]) -> Result<Option<Vec<u8>>, TrieError> {
        Ok(self
            .inner
            .lock()
            .map_err(|_| TrieError::LockError)?
            .get(bucket)
            .and_then(|b| b.get(key))
            .cloned())
    }
}

impl MutableFlatDb for InMemoryFlatDb {
    fn put(&self, bucket: &'static str, key: Vec<u8>, value: Vec<u8>) -> Result<(), TrieError> {
        self.inner
            .lock()
            .map_err(|_| TrieError::LockError)?
            .entry(bucket)
            .or_default()
            .insert(key, value);
        Ok(())
    }

    fn delete(&self, bucket: &'static str, key: &[u8]) -> Result<(), TrieError> {
        self.inner
            .lock()
            .map_err(|_| TrieError::LockError)?
            .entry(bucket)
            .or_default()
            .remove(key);
        Ok(())
    }
}

enum CursorPosition {
    Start,
    At(Vec<u8>),
    End,
}

struct InMemoryCursor {
    inner: Arc<Mutex<Buckets>>,
    bucket: &'static str,
    position: CursorPosition,
}

impl InMemoryCursor {
    fn first_from(
        &mut self,
        lower: Bound<Vec<u8>>,
    ) -> Result<Option<(Vec<u8>, Vec<u8>)>, TrieError> {
        let guard = self.inner.lock().map_err(|_| TrieError::LockError)?;
        let entry = guard
            .get(self.bucket)
            .and_then(|b| b.range((lower, Bound::Unbounded)).next())
            .map(|(k, v)| (k.clone(), v.clone()));
        self.position = match &entry {
            Some((k, _)) => CursorPosition::At(k.clone()),
            None => CursorPosition::End,
        };
        Ok(entry)
    }
}

impl OrderedCursor for InMemoryCursor {
    fn seek_to(&mut self, key: &[u8]) -> Result<Option<(Vec<u8>, Vec<u8>)>, TrieError> {
        self.first_from(Bound::Included(key.to_vec()))
    }

    fn next(&mut self) -> Result<Option<(Vec<u8>, Vec<u8>)>, TrieError> {
        match std::mem::replace(&mut self.position, CursorPosition::End) {
            CursorPosition::Start => self.first_from(Bound::Unbounded),
            CursorPosition::At(key) => self.first_from(Bound::Excluded(key)),
            CursorPosition::End => Ok(None),
        }
    }
}

/// Copies the account part of `key` and increments it as a 32-byte big-endian
/// integer, jumping past all storage belonging to that account. Returns `None`
/// on overflow.
pub fn next_account(key: &[u8]) -> Option<[u8; HASH_LENGTH]> {
    let mut out = [0u8; HASH_LENGTH];
    let len = key.len().min(HASH_LENGTH);
    out[..len].copy_from_slice(&key[..len]);
    for b in out.iter_mut().rev() {
        if *b != 0xff {
            *b += 1;
            return Some(out);
        }
        *b = 0;
    }
    None
}

/// Byte-string increment: the smallest key strictly greater than every key
/// prefixed by `key`. Returns `None` on overflow.
pub fn next_subtree(key: &[u8]) -> Option<Vec<u8>> {
    let mut out = key.to_vec();
    for b in out.iter_mut().rev() {
        if *b != 0xff {
            *b += 1;
            return Some(out);
        }
        *b = 0;
    }
    None
}

/// Lexicographic comparison where `None` sorts after every key. Returns
/// whether `k1` comes first (ties included) along with the smaller key.
pub fn key_is_before<'a>(
    k1: Option<&'a [u8]>,
    k2: Option<&'a [u8]>,
) -> (bool, Option<&'a [u8]>) {
    match (k1, k2) {
        (None, _) => (false, k2),
        (_, None) => (true, k1),
        (Some(a), Some(b)) => {
            if a <= b {
                (true, k1)
            } else {
                (false, k2)
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample_db() -> InMemoryFlatDb {
        let db = InMemoryFlatDb::new();
        for key in [vec![0x10], vec![0x20, 0x01], vec![0x30]] {
            db.put(CURRENT_STATE_BUCKET, key.clone(), key).unwrap();
        }
        db
    }

    #[test]
    fn cursor_seek_lands_on_smallest_greater_or_equal() {
        let db = sample_db();
        let mut cursor = db.cursor(CURRENT_STATE_BUCKET).unwrap();
        let (k, _) = cursor.seek_to(&[0x11]).unwrap().unwrap();
        assert_eq!(k, vec![0x20, 0x01]);
        let (k, _) = cursor.seek_to(&[0x20, 0x01]).unwrap().unwrap();
        assert_eq!(k, vec![0x20, 0x01]);
        assert!(cursor.seek_to(&[0x31]).unwrap().is_none());
    }

    #[test]
    fn cursor_next_walks_in_order() {
        let db = sample_db();
        let mut cursor = db.cursor(CURRENT_STATE_BUCKET).unwrap();
        let mut seen = Vec::new();
        while let Some((k, _)) = cursor.next().unwrap() {
            seen.push(k);
        }
        assert_eq!(seen, vec![vec![0x10], vec![0x20, 0x01], vec![0x30]]);
        assert!(cursor.next().unwrap().is_none());
    }

    #[test]
    fn cursor_next_after_seek() {
        let db = sample_db();
        let mut cursor = db.cursor(CURRENT_STATE_BUCKET).unwrap();
        cursor.seek_to(&[0x10]).unwrap();
        let (k, _) = cursor.next().unwrap().unwrap();
        assert_eq!(k, vec![0x20, 0x01]);
    }

    #[test]
    fn next_account_increments_and_truncates() {
        let mut key = vec![0x11; 40];
        key[31] = 0x05;
        let next = next_account(&key).unwrap();
        assert_eq!(next[31], 0x06);
        assert_eq!(&next[..31], &[0x11; 31]);
    }

    #[test]
    fn next_account_overflow() {
        assert!(next_account(&[0xff; 32]).is_none());
    }

    #[test]
    fn next_subtree_carries() {
        assert_eq!(next_subtree(&[0x01, 0xff]).unwrap(), vec![0x02, 0x00]);
        assert_eq!(next_subtree(&[0x01]).unwrap(), vec![0x02]);
        assert!(next_subtree(&[0xff, 0xff]).is_none());
    }

    #[test]
    fn key_ordering_treats_none_as_infinity() {
        let a = [0x01u8];
        let b = [0x02u8];
        assert_eq!(key_is_before(Some(&a), Some(&b)), (true, Some(&a[..])));
        assert_eq!(key_is_before(Some(&b), Some(&a)), (false, Some(&a[..])));
        assert_eq!(key_is_before(None, Some(&a)), (false, Some(&a[..])));
        assert_eq!(key_is_before(Some(&a), None), (true, Some(&a[..])));
        assert_eq!(key_is_before(None, None), (false, None));
    }

    #[test]
    fn equal_keys_prefer_the_first() {
        let a = [0x01u8];
        assert_eq!(key_is_before(Some(&a), Some(&a)), (true, Some(&a[..])));
    }
}
