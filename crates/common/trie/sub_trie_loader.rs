//! Reconstructs sub-ranges of the hexary state trie straight from the flat
//! key-value buckets, using cached intermediate hashes to skip subtrees the
//! caller did not ask to materialize.
//!
//! The walk merges two cursors — leaves from `CurrentState`, cached branch
//! hashes from `IntermediateTrieHash` — into one monotonic stream of items,
//! which a pair of structure-generation buffers (account level and storage
//! level) folds into the hash builder.

use ethereum_types::H256;
use std::sync::Arc;
use tracing::trace;

use crate::{
    HASH_LENGTH, INCARNATION_LENGTH,
    account::Account,
    db::{
        CODE_BUCKET, CURRENT_STATE_BUCKET, INTERMEDIATE_TRIE_HASH_BUCKET,
        INTERMEDIATE_TRIE_WITNESS_LEN_BUCKET, FlatDb, OrderedCursor, key_is_before, next_account,
        next_subtree,
    },
    error::TrieError,
    gen_struct::{
        ACCOUNT_FIELD_BALANCE_ONLY, ACCOUNT_FIELD_CODE_ONLY, ACCOUNT_FIELD_NONCE_ONLY,
        ACCOUNT_FIELD_STORAGE_ONLY, AccountStepData, GenStructStepData, gen_struct_step,
    },
    hash_builder::HashBuilder,
    nibbles::{LEAF_TERMINATOR, unpack_into, unpack_skip_incarnation_into},
    node::Node,
    retain::{RetainDecider, RetainNone},
};

/// One entry of the merged stream fed into the structural walker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamItem {
    AccountLeaf {
        addr_hash: Vec<u8>,
        account: Account,
    },
    StorageLeaf {
        addr_hash_prefix: Vec<u8>,
        slot_hash_suffix: Vec<u8>,
        value: Vec<u8>,
    },
    AccountHash {
        prefix: Vec<u8>,
        hash: H256,
        witness_len: u64,
    },
    StorageHash {
        addr_hash_prefix: Vec<u8>,
        slot_hash_prefix: Vec<u8>,
        hash: H256,
        witness_len: u64,
    },
    /// Synthetic marker emitted when the merged stream crosses into the next
    /// requested prefix range; carries the nibble depth to seal the finished
    /// range at.
    Cutoff { depth: usize },
}

/// One root (when retention materialized it) and one hash per requested
/// range. The hash is all-zeroes iff the range was a storage range with no
/// entries.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubTries {
    pub roots: Vec<Option<Node>>,
    pub hashes: Vec<H256>,
}

/// Code attachment request for a partial trie: install the bytecode itself
/// or only its length on the account leaf.
#[derive(Debug, Clone)]
pub struct CodeRequest {
    pub addr_hash: H256,
    pub code_hash: H256,
    pub bytecode: bool,
}

pub struct FlatDbSubTrieLoader {
    rl: Arc<dyn RetainDecider>,
    hb: HashBuilder,

    // Account-level structure generation state. `curr`/`succ` carry the two
    // most recent nibble paths; `value` the pending cached hash when the
    // previous item came from the hash cache.
    curr: Vec<u8>,
    succ: Vec<u8>,
    value: Vec<u8>,
    groups: Vec<u16>,
    a: Account,
    was_ih: bool,
    witness_len_account: u64,
    acc_field_set: u8,

    // Storage-level twin of the buffers above; storage is a nested trie
    // under each account and runs the same algorithm.
    curr_storage: Vec<u8>,
    succ_storage: Vec<u8>,
    value_storage: Vec<u8>,
    was_ih_storage: bool,
    witness_len_storage: u64,

    // Hash of the account being built concatenated with its bit-inverted
    // big-endian incarnation: the lower bound of that account's live storage.
    acc_addr_hash_with_inc: [u8; HASH_LENGTH + INCARNATION_LENGTH],

    range_idx: usize,
    db_prefixes: Vec<Vec<u8>>,
    fixedbytes: Vec<usize>,
    masks: Vec<u8>,
    cutoffs: Vec<usize>,

    k: Option<Vec<u8>>,
    v: Vec<u8>,
    ih_k: Option<Vec<u8>>,
    ih_v: Vec<u8>,
    min_key_as_nibbles: Vec<u8>,

    item: Option<StreamItem>,
    sub_tries: SubTries,
    track_witness_size: bool,
}

impl Default for FlatDbSubTrieLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl FlatDbSubTrieLoader {
    pub fn new() -> Self {
        Self {
            rl: Arc::new(RetainNone),
            hb: HashBuilder::new(),
            curr: Vec::new(),
            succ: Vec::new(),
            value: Vec::new(),
            groups: Vec::new(),
            a: Account::default(),
            was_ih: false,
            witness_len_account: 0,
            acc_field_set: 0,
            curr_storage: Vec::new(),
            succ_storage: Vec::new(),
            value_storage: Vec::new(),
            was_ih_storage: false,
            witness_len_storage: 0,
            acc_addr_hash_with_inc: [0u8; HASH_LENGTH + INCARNATION_LENGTH],
            range_idx: 0,
            db_prefixes: Vec::new(),
            fixedbytes: Vec::new(),
            masks: Vec::new(),
            cutoffs: Vec::new(),
            k: None,
            v: Vec::new(),
            ih_k: None,
            ih_v: Vec::new(),
            min_key_as_nibbles: Vec::new(),
            item: None,
            sub_tries: SubTries::default(),
            track_witness_size: false,
        }
    }

    /// Looks up witness lengths for every cached hash the loader emits.
    /// Off by default because the extra bucket is only populated when
    /// witness sizing is wanted downstream.
    pub fn with_witness_sizes(mut self, on: bool) -> Self {
        self.track_witness_size = on;
        self
    }

    /// Prepares the loader for the next pass, retaining allocations.
    ///
    /// `db_prefixes[i]` and `fixed_bits[i]` describe range `i`: the first
    /// `fixed_bits[i]` bits of a key must match the prefix for the key to
    /// belong to the range. Ranges must be sorted and disjoint.
    ///
    /// Panics if a range's fixed bits end inside the elided incarnation
    /// segment of composite keys; no meaningful cutoff exists there.
    pub fn reset(
        &mut self,
        rl: Arc<dyn RetainDecider>,
        db_prefixes: Vec<Vec<u8>>,
        fixed_bits: &[usize],
    ) {
        assert_eq!(db_prefixes.len(), fixed_bits.len());
        self.range_idx = 0;
        self.curr.clear();
        self.succ.clear();
        self.value.clear();
        self.groups.clear();
        self.a = Account::default();
        self.hb.reset();
        self.was_ih = false;
        self.witness_len_account = 0;
        self.acc_field_set = 0;
        self.curr_storage.clear();
        self.succ_storage.clear();
        self.value_storage.clear();
        self.was_ih_storage = false;
        self.witness_len_storage = 0;
        self.min_key_as_nibbles.clear();
        self.k = None;
        self.v.clear();
        self.ih_k = None;
        self.ih_v.clear();
        self.item = None;
        self.sub_tries = SubTries::default();
        self.rl = rl;

        self.fixedbytes.clear();
        self.masks.clear();
        self.cutoffs.clear();
        for bits in fixed_bits {
            assert!(
                !(*bits > 8 * HASH_LENGTH && *bits < 8 * (HASH_LENGTH + INCARNATION_LENGTH)),
                "range cutoff falls inside the elided incarnation segment: {bits} fixed bits"
            );
            if *bits >= 8 * (HASH_LENGTH + INCARNATION_LENGTH) {
                // Composite-key range: the incarnation nibbles are elided
                // from trie paths.
                self.cutoffs.push(bits / 4 - 2 * INCARNATION_LENGTH);
            } else {
                self.cutoffs.push(bits / 4);
            }
            let (fixedbytes, mask) = bytes_mask(*bits);
            self.fixedbytes.push(fixedbytes);
            self.masks.push(mask);
        }
        self.db_prefixes = db_prefixes;
        trace!(prefixes = self.db_prefixes.len(), "loader reset");
    }

    /// Runs one full pass over the requested ranges within a single read
    /// view of `db`. No partial results: any error aborts the whole load.
    pub fn load_sub_tries(&mut self, db: &dyn FlatDb) -> Result<SubTries, TrieError> {
        if self.db_prefixes.is_empty() {
            return Ok(SubTries::default());
        }
        let mut c = db.cursor(CURRENT_STATE_BUCKET)?;
        let mut ih = db.cursor(INTERMEDIATE_TRIE_HASH_BUCKET)?;
        let mut iwl = WitnessLenLookup::new(if self.track_witness_size {
            Some(db.cursor(INTERMEDIATE_TRIE_WITNESS_LEN_BUCKET)?)
        } else {
            None
        });

        self.iteration(c.as_mut(), ih.as_mut(), &mut iwl, true)?;
        while self.range_idx < self.db_prefixes.len() {
            while self.item.is_none() {
                self.iteration(c.as_mut(), ih.as_mut(), &mut iwl, false)?;
            }
            match self.item.take() {
                Some(StreamItem::StorageLeaf {
                    addr_hash_prefix,
                    slot_hash_suffix,
                    value,
                }) => self.walk_storage(false, &addr_hash_prefix, &slot_hash_suffix, &value, 0),
                Some(StreamItem::StorageHash {
                    addr_hash_prefix,
                    slot_hash_prefix,
                    hash,
                    witness_len,
                }) => self.walk_storage(
                    true,
                    &addr_hash_prefix,
                    &slot_hash_prefix,
                    hash.as_bytes(),
                    witness_len,
                ),
                Some(StreamItem::AccountLeaf { addr_hash, account }) => {
                    self.walk_account_leaf(&addr_hash, account)
                }
                Some(StreamItem::AccountHash {
                    prefix,
                    hash,
                    witness_len,
                }) => self.walk_account_hash(&prefix, hash, witness_len),
                Some(StreamItem::Cutoff { depth }) => self.finalise_root(depth),
                None => unreachable!("inner loop only exits with an item present"),
            }
        }
        Ok(std::mem::take(&mut self.sub_tries))
    }

    /// Advances the merge state machine by at most one cursor step per
    /// cursor, producing at most one stream item.
    fn iteration(
        &mut self,
        c: &mut dyn OrderedCursor,
        ih: &mut dyn OrderedCursor,
        iwl: &mut WitnessLenLookup<'_>,
        first: bool,
    ) -> Result<(), TrieError> {
        let (mut is_ih, mut min_key) = if first {
            (false, None)
        } else {
            owned_key_is_before(self.ih_k.as_deref(), self.k.as_deref())
        };
        let mut fixedbytes = self.fixedbytes[self.range_idx];
        let mut cutoff = self.cutoffs[self.range_idx];
        let mut db_prefix = self.db_prefixes[self.range_idx].clone();
        let mut mask = self.masks[self.range_idx];

        // Reconcile the cursor positions against the current range. `sought`
        // forces an initial positioning before a missing key may be read as
        // "past the end".
        let mut sought = !first;
        let mut cmp = -1i32;
        while cmp != 0 {
            match &min_key {
                None => {
                    if sought {
                        cmp = 1;
                    }
                }
                Some(min_key) if fixedbytes > 0 => {
                    cmp = compare_masked(min_key, &db_prefix, fixedbytes, mask);
                }
                Some(_) => cmp = 0,
            }
            if cmp == 0 && self.item.is_some() {
                return Ok(());
            }
            if cmp < 0 {
                if first && db_prefix.len() > HASH_LENGTH {
                    // Looking for a storage sub-tree.
                    self.acc_addr_hash_with_inc
                        .copy_from_slice(&db_prefix[..HASH_LENGTH + INCARNATION_LENGTH]);
                }
                self.set_k(c.seek_to(&db_prefix)?);
                if db_prefix.len() <= HASH_LENGTH && self.k_len() > HASH_LENGTH {
                    // Advance past the storage to the first account.
                    self.jump_to_next_account(c)?;
                }
                self.set_ih(ih.seek_to(&db_prefix)?);
                if db_prefix.len() <= HASH_LENGTH && self.ih_len() > HASH_LENGTH {
                    self.jump_ih_to_next_account(ih)?;
                }
                sought = true;
                (is_ih, min_key) = owned_key_is_before(self.ih_k.as_deref(), self.k.as_deref());
                if fixedbytes == 0 && min_key.is_some() {
                    cmp = 0;
                }
            } else if cmp > 0 {
                if first {
                    // The driver has not dispatched anything yet; leave the
                    // cursors positioned and let the next call seal the
                    // range, so its cutoff is not lost before the loop.
                    return Ok(());
                }
                // Both cursors are past the current range: seal it and move
                // to the next one.
                self.item = Some(StreamItem::Cutoff { depth: cutoff });
                self.range_idx += 1;
                if self.range_idx == self.db_prefixes.len() {
                    return Ok(());
                }
                fixedbytes = self.fixedbytes[self.range_idx];
                mask = self.masks[self.range_idx];
                db_prefix.clear();
                db_prefix.extend_from_slice(&self.db_prefixes[self.range_idx]);
                if db_prefix.len() > HASH_LENGTH {
                    self.acc_addr_hash_with_inc
                        .copy_from_slice(&db_prefix[..HASH_LENGTH + INCARNATION_LENGTH]);
                }
                cutoff = self.cutoffs[self.range_idx];
            }
        }

        if !is_ih {
            let k = self
                .k
                .clone()
                .expect("state cursor key is present on the leaf path");
            if k.len() > HASH_LENGTH && !k.starts_with(&self.acc_addr_hash_with_inc) {
                // Storage belonging to a wrong account or a stale
                // incarnation: reposition without emitting.
                if k.as_slice() < &self.acc_addr_hash_with_inc[..] {
                    let target = self.acc_addr_hash_with_inc;
                    self.set_k(c.seek_to(&target)?);
                } else {
                    self.jump_to_next_account(c)?;
                }
                return Ok(());
            }
            if k.len() > HASH_LENGTH {
                self.item = Some(StreamItem::StorageLeaf {
                    addr_hash_prefix: k[..HASH_LENGTH].to_vec(),
                    slot_hash_suffix: composite_suffix(&k).to_vec(),
                    value: self.v.clone(),
                });
                self.set_k(c.next()?);
                trace!(k = ?self.k, "state cursor after storage leaf");
            } else {
                let account = Account::decode_for_storage(&self.v)
                    .map_err(|_| TrieError::AccountDecode(H256::from_slice(&k)))?;
                self.acc_addr_hash_with_inc[..HASH_LENGTH].copy_from_slice(&k);
                self.acc_addr_hash_with_inc[HASH_LENGTH..]
                    .copy_from_slice(&(!account.incarnation).to_be_bytes());
                self.item = Some(StreamItem::AccountLeaf {
                    addr_hash: k,
                    account,
                });
                // With the correct incarnation known, everything below the
                // account but before its live storage can be skipped. An
                // incarnation of zero inverts to 0xff..ff, which no real
                // storage key reaches, so empty accounts skip all storage.
                let target = self.acc_addr_hash_with_inc;
                self.set_k(c.seek_to(&target)?);
                trace!(k = ?self.k, "state cursor after account leaf");
                if !self
                    .ih_k
                    .as_deref()
                    .is_some_and(|ih_k| ih_k.starts_with(&target))
                {
                    self.set_ih(ih.seek_to(&target)?);
                }
            }
            return Ok(());
        }

        // Cached-hash path.
        let min_key = min_key.expect("hash cursor key is present on the cached path");
        self.min_key_as_nibbles.clear();
        unpack_skip_incarnation_into(&min_key, &mut self.min_key_as_nibbles);

        if self.min_key_as_nibbles.len() < cutoff {
            // The cached node is shallower than the range requires: descend
            // to its children rather than its sibling.
            self.set_ih(ih.next()?);
            return Ok(());
        }

        let retain = self.rl.retain(&self.min_key_as_nibbles);
        trace!(prefix = ?self.min_key_as_nibbles, retain, "retention decision");
        if retain {
            // The caller wants this subtree materialized; the cached hash
            // cannot stand in for it.
            self.set_ih(ih.next()?);
            return Ok(());
        }

        let ih_k = self
            .ih_k
            .clone()
            .expect("hash cursor key is present on the cached path");
        if ih_k.len() > HASH_LENGTH && !ih_k.starts_with(&self.acc_addr_hash_with_inc) {
            if ih_k.as_slice() < &self.acc_addr_hash_with_inc[..] {
                let target = self.acc_addr_hash_with_inc;
                self.set_ih(ih.seek_to(&target)?);
            } else {
                self.jump_ih_to_next_account(ih)?;
            }
            return Ok(());
        }

        let hash = H256::from_slice(&self.ih_v);
        if ih_k.len() > HASH_LENGTH {
            self.item = Some(StreamItem::StorageHash {
                addr_hash_prefix: ih_k[..HASH_LENGTH].to_vec(),
                slot_hash_prefix: composite_suffix(&ih_k).to_vec(),
                hash,
                witness_len: iwl.get(&ih_k)?,
            });
        } else {
            self.item = Some(StreamItem::AccountHash {
                prefix: ih_k.clone(),
                hash,
                witness_len: iwl.get(&ih_k)?,
            });
        }

        // Skip the whole subtree the cached hash covers.
        let Some(next) = next_subtree(&ih_k) else {
            // No sibling can follow 0xff..ff: both cursors are done.
            self.k = None;
            self.ih_k = None;
            return Ok(());
        };
        trace!(next = ?next, "skipping cached subtree");

        if !self.k.as_deref().is_some_and(|k| k.starts_with(&next)) {
            self.set_k(c.seek_to(&next)?);
        }
        if next.len() <= HASH_LENGTH && self.k_len() > HASH_LENGTH {
            self.jump_to_next_account(c)?;
        }
        if !self.ih_k.as_deref().is_some_and(|k| k.starts_with(&next)) {
            self.set_ih(ih.seek_to(&next)?);
        }
        if next.len() <= HASH_LENGTH && self.ih_len() > HASH_LENGTH {
            self.jump_ih_to_next_account(ih)?;
        }
        Ok(())
    }

    /// Folds one storage-level item into the storage buffers.
    fn walk_storage(
        &mut self,
        is_ih: bool,
        addr_hash_prefix: &[u8],
        slot_part: &[u8],
        value_or_hash: &[u8],
        witness_len: u64,
    ) {
        trace!(
            is_ih,
            addr = ?addr_hash_prefix,
            slot = ?slot_part,
            "storage walker"
        );
        std::mem::swap(&mut self.curr_storage, &mut self.succ_storage);
        self.succ_storage.clear();
        unpack_into(addr_hash_prefix, &mut self.succ_storage);
        unpack_into(slot_part, &mut self.succ_storage);
        if !is_ih {
            self.succ_storage.push(LEAF_TERMINATOR);
        }

        if !self.curr_storage.is_empty() {
            let data = if self.was_ih_storage {
                GenStructStepData::Hash {
                    hash: H256::from_slice(&self.value_storage),
                    witness_len: self.witness_len_storage,
                }
            } else {
                GenStructStepData::Leaf {
                    value: &self.value_storage,
                }
            };
            self.groups = gen_struct_step(
                self.rl.as_ref(),
                &self.curr_storage,
                &self.succ_storage,
                &mut self.hb,
                data,
                std::mem::take(&mut self.groups),
            );
        }

        // Remember the current item for the next flush.
        self.was_ih_storage = is_ih;
        self.value_storage.clear();
        self.value_storage.extend_from_slice(value_or_hash);
        if is_ih {
            self.witness_len_storage = witness_len;
        }
    }

    /// Folds one account-level leaf into the account buffers. The previous
    /// account flushes here, which first seals its storage sub-trie.
    fn walk_account_leaf(&mut self, addr_hash: &[u8], account: Account) {
        trace!(addr = ?addr_hash, "account walker");
        self.shift_account_key(addr_hash, false);
        self.flush_pending_account();
        self.was_ih = false;

        self.a = account;
        // Code lands on the stack before the storage root does; the builder
        // pops them back in reverse.
        if !self.a.is_empty_code_hash() {
            self.acc_field_set |= ACCOUNT_FIELD_CODE_ONLY;
            self.hb.hash(self.a.code_hash, 0);
        }
    }

    fn walk_account_hash(&mut self, prefix: &[u8], hash: H256, witness_len: u64) {
        trace!(prefix = ?prefix, "account walker (cached)");
        self.shift_account_key(prefix, true);
        self.flush_pending_account();
        self.was_ih = true;
        self.value.clear();
        self.value.extend_from_slice(hash.as_bytes());
        self.witness_len_account = witness_len;
    }

    fn shift_account_key(&mut self, key: &[u8], is_ih: bool) {
        std::mem::swap(&mut self.curr, &mut self.succ);
        self.succ.clear();
        unpack_into(key, &mut self.succ);
        if !is_ih {
            self.succ.push(LEAF_TERMINATOR);
        }
    }

    /// Runs the account-level structural step for the item saved in the
    /// buffers, if any.
    fn flush_pending_account(&mut self) {
        if self.curr.is_empty() {
            return;
        }
        if self.was_ih {
            self.groups = gen_struct_step(
                self.rl.as_ref(),
                &self.curr,
                &self.succ,
                &mut self.hb,
                GenStructStepData::Hash {
                    hash: H256::from_slice(&self.value),
                    witness_len: self.witness_len_account,
                },
                std::mem::take(&mut self.groups),
            );
        } else {
            if self.finalise_storage_root(2 * HASH_LENGTH) {
                // The storage root is waiting on the stack for the builder.
                self.acc_field_set |= ACCOUNT_FIELD_STORAGE_ONLY;
            }
            let mut field_set = self.acc_field_set;
            if !self.a.balance.is_zero() {
                field_set |= ACCOUNT_FIELD_BALANCE_ONLY;
            }
            if self.a.nonce != 0 {
                field_set |= ACCOUNT_FIELD_NONCE_ONLY;
            }
            let data = AccountStepData {
                balance: self.a.balance,
                nonce: self.a.nonce,
                incarnation: self.a.incarnation,
                field_set,
            };
            self.was_ih_storage = false;
            self.curr_storage.clear();
            self.succ_storage.clear();
            self.groups = gen_struct_step(
                self.rl.as_ref(),
                &self.curr,
                &self.succ,
                &mut self.hb,
                GenStructStepData::Account(data),
                std::mem::take(&mut self.groups),
            );
        }
        self.acc_field_set = 0;
    }

    /// Seals the storage sub-trie at `cutoff` nibbles by flushing the pending
    /// storage item against a synthetic successor one nibble past the cutoff.
    /// Returns whether any storage was there to seal; if so its root is left
    /// on the hash-builder stack.
    fn finalise_storage_root(&mut self, cutoff: usize) -> bool {
        trace!(cutoff, pending = self.succ_storage.len(), "sealing storage sub-trie");
        std::mem::swap(&mut self.curr_storage, &mut self.succ_storage);
        self.succ_storage.clear();
        if self.curr_storage.is_empty() {
            return false;
        }
        // A key strictly greater than anything real under the cutoff prefix
        // forces the builder to close everything below it.
        self.succ_storage
            .extend_from_slice(&self.curr_storage[..cutoff - 1]);
        self.succ_storage.push(self.curr_storage[cutoff - 1] + 1);
        let data = if self.was_ih_storage {
            GenStructStepData::Hash {
                hash: H256::from_slice(&self.value_storage),
                witness_len: self.witness_len_storage,
            }
        } else {
            GenStructStepData::Leaf {
                value: &self.value_storage,
            }
        };
        self.groups = gen_struct_step(
            self.rl.as_ref(),
            &self.curr_storage,
            &self.succ_storage,
            &mut self.hb,
            data,
            std::mem::take(&mut self.groups),
        );
        if self.groups.len() >= cutoff {
            self.groups.truncate(cutoff - 1);
        }
        while self.groups.last() == Some(&0) {
            self.groups.pop();
        }
        self.curr_storage.clear();
        self.succ_storage.clear();
        self.was_ih_storage = false;
        trace!(root = ?self.hb.root_hash(), "storage sub-trie sealed");
        true
    }

    /// Seals the current range at `cutoff` nibbles and collects its root and
    /// hash into the output.
    fn finalise_root(&mut self, cutoff: usize) {
        trace!(cutoff, "sealing range");
        if cutoff >= 2 * HASH_LENGTH {
            // A pure storage range: no account records were involved.
            if self.finalise_storage_root(cutoff) {
                self.sub_tries.roots.push(self.hb.root());
                self.sub_tries.hashes.push(self.hb.root_hash());
            } else {
                self.sub_tries.roots.push(None);
                self.sub_tries.hashes.push(H256::zero());
            }
            return;
        }
        std::mem::swap(&mut self.curr, &mut self.succ);
        self.succ.clear();
        if !self.curr.is_empty() {
            if cutoff > 0 {
                self.succ.extend_from_slice(&self.curr[..cutoff - 1]);
                self.succ.push(self.curr[cutoff - 1] + 1);
            }
            self.flush_pending_account();
            if self.groups.len() > cutoff {
                self.groups.truncate(cutoff);
            }
            while self.groups.last() == Some(&0) {
                self.groups.pop();
            }
        }
        self.sub_tries.roots.push(self.hb.root());
        self.sub_tries.hashes.push(self.hb.root_hash());
        self.groups.clear();
        self.hb.reset();
        self.was_ih = false;
        self.was_ih_storage = false;
        self.curr.clear();
        self.succ.clear();
        self.curr_storage.clear();
        self.succ_storage.clear();
    }

    fn set_k(&mut self, entry: Option<(Vec<u8>, Vec<u8>)>) {
        match entry {
            Some((k, v)) => {
                self.k = Some(k);
                self.v = v;
            }
            None => {
                self.k = None;
                self.v.clear();
            }
        }
    }

    fn set_ih(&mut self, entry: Option<(Vec<u8>, Vec<u8>)>) {
        match entry {
            Some((k, v)) => {
                self.ih_k = Some(k);
                self.ih_v = v;
            }
            None => {
                self.ih_k = None;
                self.ih_v.clear();
            }
        }
    }

    fn k_len(&self) -> usize {
        self.k.as_deref().map_or(0, <[u8]>::len)
    }

    fn ih_len(&self) -> usize {
        self.ih_k.as_deref().map_or(0, <[u8]>::len)
    }

    fn jump_to_next_account(&mut self, c: &mut dyn OrderedCursor) -> Result<(), TrieError> {
        match self.k.as_deref().and_then(next_account) {
            Some(next) => self.set_k(c.seek_to(&next)?),
            None => self.k = None,
        }
        Ok(())
    }

    fn jump_ih_to_next_account(&mut self, ih: &mut dyn OrderedCursor) -> Result<(), TrieError> {
        match self.ih_k.as_deref().and_then(next_account) {
            Some(next) => self.set_ih(ih.seek_to(&next)?),
            None => self.ih_k = None,
        }
        Ok(())
    }
}

/// Installs requested bytecode (or just its size) on the account leaves of a
/// partial trie.
pub fn attach_code(
    db: &dyn FlatDb,
    trie: &mut Node,
    requests: &[CodeRequest],
) -> Result<(), TrieError> {
    let mut path = Vec::with_capacity(2 * HASH_LENGTH);
    for request in requests {
        let code = db
            .get(CODE_BUCKET, request.code_hash.as_bytes())?
            .ok_or(TrieError::CodeNotFound(request.code_hash))?;
        path.clear();
        unpack_into(request.addr_hash.as_bytes(), &mut path);
        let leaf = trie
            .account_leaf_mut(&path)
            .ok_or(TrieError::AccountNotFound(request.addr_hash))?;
        if request.bytecode {
            leaf.code = Some(code);
        } else {
            leaf.code_size = Some(code.len());
        }
    }
    Ok(())
}

struct WitnessLenLookup<'a> {
    cursor: Option<Box<dyn OrderedCursor + 'a>>,
}

impl<'a> WitnessLenLookup<'a> {
    fn new(cursor: Option<Box<dyn OrderedCursor + 'a>>) -> Self {
        Self { cursor }
    }

    /// Witness length recorded for a cached-hash key. When tracking is off
    /// this is always zero; when on, the hash bucket and the witness-length
    /// bucket must agree on their key sets.
    fn get(&mut self, prefix: &[u8]) -> Result<u64, TrieError> {
        let Some(cursor) = self.cursor.as_mut() else {
            return Ok(0);
        };
        match cursor.seek_to(prefix)? {
            Some((key, value)) if key == prefix && value.len() == 8 => {
                let mut be = [0u8; 8];
                be.copy_from_slice(&value);
                Ok(u64::from_be_bytes(be))
            }
            other => panic!(
                "hash and witness-length buckets must have the same key set: \
                 looked up {prefix:02x?}, found {:02x?}",
                other.map(|(key, _)| key)
            ),
        }
    }
}

/// `fixed_bits` split into whole bytes plus a left-aligned mask for the
/// remainder bits of the last byte.
fn bytes_mask(fixed_bits: usize) -> (usize, u8) {
    let fixedbytes = fixed_bits.div_ceil(8);
    let shiftbits = fixed_bits & 7;
    let mask = if shiftbits == 0 {
        0xff
    } else {
        0xffu8 << (8 - shiftbits)
    };
    (fixedbytes, mask)
}

/// Compares `min_key` against a range prefix: whole bytes up to
/// `fixedbytes - 1`, then the final byte under `mask`.
fn compare_masked(min_key: &[u8], db_prefix: &[u8], fixedbytes: usize, mask: u8) -> i32 {
    if min_key.len() < fixedbytes {
        // A strict prefix of the range prefix still sorts before the range.
        return match min_key.cmp(&db_prefix[..min_key.len()]) {
            std::cmp::Ordering::Less | std::cmp::Ordering::Equal => -1,
            std::cmp::Ordering::Greater => 1,
        };
    }
    match min_key[..fixedbytes - 1].cmp(&db_prefix[..fixedbytes - 1]) {
        std::cmp::Ordering::Less => -1,
        std::cmp::Ordering::Greater => 1,
        std::cmp::Ordering::Equal => {
            let k1 = min_key[fixedbytes - 1] & mask;
            let k2 = db_prefix[fixedbytes - 1] & mask;
            match k1.cmp(&k2) {
                std::cmp::Ordering::Less => -1,
                std::cmp::Ordering::Greater => 1,
                std::cmp::Ordering::Equal => 0,
            }
        }
    }
}

/// Slot part of a composite key, skipping the incarnation segment; empty for
/// prefixes that end inside or before it.
fn composite_suffix(key: &[u8]) -> &[u8] {
    if key.len() >= HASH_LENGTH + INCARNATION_LENGTH {
        &key[HASH_LENGTH + INCARNATION_LENGTH..]
    } else {
        &[]
    }
}

fn owned_key_is_before(k1: Option<&[u8]>, k2: Option<&[u8]>) -> (bool, Option<Vec<u8>>) {
    let (before, min_key) = key_is_before(k1, k2);
    (before, min_key.map(<[u8]>::to_vec))
}
