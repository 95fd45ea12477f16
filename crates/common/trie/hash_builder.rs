//! Stack machine assembling trie nodes bottom-up from structural steps.
//!
//! Each entry on the stack is the RLP reference of a finished subtree, plus
//! the materialized node when the caller asked for it and the serialized
//! witness length of the subtree. The `*_hash` twins of the node operations
//! produce identical references but retain no node.

use ethereum_types::H256;
use flatstate_rlp::{
    encode::RLPEncode,
    structs::Encoder,
};

use crate::{
    EMPTY_TRIE_HASH,
    account::Account,
    gen_struct::{ACCOUNT_FIELD_CODE_ONLY, ACCOUNT_FIELD_STORAGE_ONLY, AccountStepData},
    nibbles::{LEAF_TERMINATOR, encode_compact},
    node::{AccountLeafNode, BranchNode, ExtensionNode, LeafNode, Node},
    node_hash::NodeHash,
};

#[derive(Debug, Clone)]
struct StackEntry {
    hash: NodeHash,
    node: Option<Node>,
    witness_len: u64,
}

#[derive(Debug, Default)]
pub struct HashBuilder {
    stack: Vec<StackEntry>,
    rlp_buf: Vec<u8>,
}

impl HashBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.stack.clear();
    }

    /// The materialized node of the most recently completed subtree, if the
    /// retention policy kept it.
    pub fn root(&self) -> Option<Node> {
        self.stack.last().and_then(|entry| entry.node.clone())
    }

    /// Root hash of the most recently completed subtree. Trie roots are
    /// always a full keccak, even when the root RLP is shorter than 32 bytes.
    pub fn root_hash(&self) -> H256 {
        self.stack
            .last()
            .map(|entry| entry.hash.finalize())
            .unwrap_or(*EMPTY_TRIE_HASH)
    }

    /// Serialized witness length of the most recently completed subtree.
    pub fn top_witness_len(&self) -> u64 {
        self.stack.last().map(|entry| entry.witness_len).unwrap_or(0)
    }

    #[cfg(test)]
    fn stack_len(&self) -> usize {
        self.stack.len()
    }

    /// Pushes a bare hash reference: a cached branch hash or a code hash.
    pub fn hash(&mut self, hash: H256, witness_len: u64) {
        self.stack.push(StackEntry {
            hash: NodeHash::Hashed(hash),
            node: None,
            witness_len,
        });
    }

    pub fn leaf(&mut self, len: usize, key_hex: &[u8], value: &[u8]) {
        self.push_leaf(len, key_hex, value, true)
    }

    pub fn leaf_hash(&mut self, len: usize, key_hex: &[u8], value: &[u8]) {
        self.push_leaf(len, key_hex, value, false)
    }

    fn push_leaf(&mut self, len: usize, key_hex: &[u8], value: &[u8], retain: bool) {
        let key = &key_hex[key_hex.len() - len..];
        let compact = encode_compact(key);
        // The trie value of a storage leaf is the RLP of the raw slot bytes;
        // it is embedded into the leaf as a string, like any list item.
        let value_rlp = value.encode_to_vec();
        self.rlp_buf.clear();
        Encoder::new(&mut self.rlp_buf)
            .encode_field(&compact)
            .encode_field(&value_rlp)
            .finish();
        let node = retain.then(|| {
            LeafNode {
                partial: strip_terminator(key).to_vec(),
                value: value.to_vec(),
            }
            .into()
        });
        self.stack.push(StackEntry {
            hash: NodeHash::from_encoded(&self.rlp_buf),
            node,
            witness_len: 1 + compact.len() as u64 + value.len() as u64,
        });
    }

    pub fn account_leaf(&mut self, len: usize, key_hex: &[u8], data: &AccountStepData) {
        self.push_account_leaf(len, key_hex, data, true)
    }

    pub fn account_leaf_hash(&mut self, len: usize, key_hex: &[u8], data: &AccountStepData) {
        self.push_account_leaf(len, key_hex, data, false)
    }

    fn push_account_leaf(
        &mut self,
        len: usize,
        key_hex: &[u8],
        data: &AccountStepData,
        retain: bool,
    ) {
        let key = &key_hex[key_hex.len() - len..];
        let compact = encode_compact(key);

        // The storage root sits on top of the stack, the code hash (pushed
        // before the storage was walked) right below it.
        let storage_entry = (data.field_set & ACCOUNT_FIELD_STORAGE_ONLY != 0)
            .then(|| self.stack.pop().expect("account leaf without storage root"));
        let code_entry = (data.field_set & ACCOUNT_FIELD_CODE_ONLY != 0)
            .then(|| self.stack.pop().expect("account leaf without code hash"));

        let storage_root = storage_entry
            .as_ref()
            .map(|entry| entry.hash.finalize())
            .unwrap_or(*EMPTY_TRIE_HASH);
        let code_hash = code_entry
            .as_ref()
            .map(|entry| entry.hash.finalize())
            .unwrap_or(Account::EMPTY_CODE_HASH);

        let account = Account {
            nonce: data.nonce,
            balance: data.balance,
            incarnation: data.incarnation,
            code_hash,
        };
        let mut account_rlp = Vec::new();
        account.rlp(storage_root, &mut account_rlp);

        self.rlp_buf.clear();
        Encoder::new(&mut self.rlp_buf)
            .encode_field(&compact)
            .encode_field(&account_rlp)
            .finish();

        let witness_len = 1
            + compact.len() as u64
            + account_rlp.len() as u64
            + storage_entry.as_ref().map_or(0, |e| e.witness_len)
            + code_entry.as_ref().map_or(0, |e| e.witness_len);
        let node = retain.then(|| {
            AccountLeafNode {
                partial: strip_terminator(key).to_vec(),
                storage: storage_entry.map(|entry| entry.into_node()),
                account,
                code: None,
                code_size: None,
            }
            .into()
        });
        self.stack.push(StackEntry {
            hash: NodeHash::from_encoded(&self.rlp_buf),
            node,
            witness_len,
        });
    }

    pub fn extension(&mut self, key: &[u8]) {
        self.push_extension(key, true)
    }

    pub fn extension_hash(&mut self, key: &[u8]) {
        self.push_extension(key, false)
    }

    fn push_extension(&mut self, key: &[u8], retain: bool) {
        let child = self.stack.pop().expect("extension without child");
        let compact = encode_compact(key);
        self.rlp_buf.clear();
        let mut encoder = Encoder::new(&mut self.rlp_buf).encode_field(&compact);
        let mut child_ref = Vec::with_capacity(child.hash.child_ref_len());
        child.hash.encode_child_ref(&mut child_ref);
        encoder = encoder.encode_raw(&child_ref);
        encoder.finish();

        let witness_len = 1 + compact.len() as u64 + child.witness_len;
        let node = retain.then(|| {
            ExtensionNode {
                prefix: key.to_vec(),
                child: Box::new(child.into_node()),
            }
            .into()
        });
        self.stack.push(StackEntry {
            hash: NodeHash::from_encoded(&self.rlp_buf),
            node,
            witness_len,
        });
    }

    pub fn branch(&mut self, set: u16) {
        self.push_branch(set, true)
    }

    pub fn branch_hash(&mut self, set: u16) {
        self.push_branch(set, false)
    }

    fn push_branch(&mut self, set: u16, retain: bool) {
        let child_count = set.count_ones() as usize;
        assert!(
            self.stack.len() >= child_count,
            "branch set {set:#06x} wants {child_count} children, stack has {}",
            self.stack.len()
        );
        // Children were pushed in ascending nibble order.
        let children: Vec<StackEntry> = self.stack.split_off(self.stack.len() - child_count);

        self.rlp_buf.clear();
        let mut encoder = Encoder::new(&mut self.rlp_buf);
        let mut child_ref = Vec::new();
        let mut next_child = children.iter();
        for digit in 0..16u16 {
            if set & (1 << digit) != 0 {
                let child = next_child.next().expect("bit count mismatch");
                child_ref.clear();
                child.hash.encode_child_ref(&mut child_ref);
                encoder = encoder.encode_raw(&child_ref);
            } else {
                encoder = encoder.encode_raw(&[0x80]);
            }
        }
        // Branch nodes of the state tries never carry a value of their own.
        encoder = encoder.encode_raw(&[0x80]);
        encoder.finish();

        let witness_len = 1 + children.iter().map(|c| c.witness_len).sum::<u64>();
        let node = retain.then(|| {
            let mut choices = BranchNode::EMPTY_CHOICES;
            let mut next_child = children.iter();
            for digit in 0..16usize {
                if set & (1 << digit) != 0 {
                    let child = next_child.next().expect("bit count mismatch");
                    choices[digit] = Some(Box::new(child.clone().into_node()));
                }
            }
            BranchNode { choices }.into()
        });
        self.stack.push(StackEntry {
            hash: NodeHash::from_encoded(&self.rlp_buf),
            node,
            witness_len,
        });
    }
}

impl StackEntry {
    /// The retained node, or a hash reference when retention skipped it.
    fn into_node(self) -> Node {
        self.node.unwrap_or(Node::Hash(self.hash.finalize()))
    }
}

fn strip_terminator(key: &[u8]) -> &[u8] {
    match key.split_last() {
        Some((&LEAF_TERMINATOR, rest)) => rest,
        _ => key,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::keccak;
    use ethereum_types::U256;

    #[test]
    fn empty_builder_yields_empty_trie_hash() {
        let hb = HashBuilder::new();
        assert_eq!(hb.root_hash(), *EMPTY_TRIE_HASH);
        assert!(hb.root().is_none());
    }

    #[test]
    fn single_leaf_root_matches_manual_encoding() {
        let mut hb = HashBuilder::new();
        let mut key_hex = Vec::new();
        crate::nibbles::unpack_into(&[0xab; 32], &mut key_hex);
        key_hex.push(LEAF_TERMINATOR);
        let value = vec![0x2a];
        hb.leaf(key_hex.len(), &key_hex, &value);

        let mut expected = Vec::new();
        Encoder::new(&mut expected)
            .encode_field(&encode_compact(&key_hex))
            .encode_field(&value.encode_to_vec())
            .finish();
        assert_eq!(hb.root_hash(), keccak(&expected));
        assert!(matches!(hb.root(), Some(Node::Leaf(_))));
    }

    #[test]
    fn leaf_hash_retains_no_node() {
        let mut hb = HashBuilder::new();
        let key_hex = vec![1, 2, LEAF_TERMINATOR];
        hb.leaf_hash(3, &key_hex, &[0x01]);
        assert!(hb.root().is_none());
    }

    #[test]
    fn branch_pops_children_in_nibble_order() {
        let mut hb = HashBuilder::new();
        let low = H256::repeat_byte(0x11);
        let high = H256::repeat_byte(0x22);
        hb.hash(low, 0);
        hb.hash(high, 0);
        hb.branch(0b1000_0001); // nibbles 0 and 7

        let mut expected = Vec::new();
        let mut encoder = Encoder::new(&mut expected);
        let mut child_ref = Vec::new();
        low.encode(&mut child_ref);
        encoder = encoder.encode_raw(&child_ref);
        for _ in 1..7 {
            encoder = encoder.encode_raw(&[0x80]);
        }
        child_ref.clear();
        high.encode(&mut child_ref);
        encoder = encoder.encode_raw(&child_ref);
        for _ in 8..17 {
            encoder = encoder.encode_raw(&[0x80]);
        }
        encoder.finish();
        assert_eq!(hb.root_hash(), keccak(&expected));
    }

    #[test]
    fn extension_wraps_top_of_stack() {
        let mut hb = HashBuilder::new();
        let child = H256::repeat_byte(0x33);
        hb.hash(child, 5);
        hb.extension(&[0x0f, 0x0f]);

        let mut expected = Vec::new();
        let mut child_ref = Vec::new();
        child.encode(&mut child_ref);
        Encoder::new(&mut expected)
            .encode_field(&encode_compact(&[0x0f, 0x0f]))
            .encode_raw(&child_ref)
            .finish();
        assert_eq!(hb.root_hash(), keccak(&expected));
        assert_eq!(hb.top_witness_len(), 1 + 2 + 5);
    }

    #[test]
    fn account_leaf_defaults_to_empty_roots() {
        let mut hb = HashBuilder::new();
        let mut key_hex = Vec::new();
        crate::nibbles::unpack_into(&[0x11; 32], &mut key_hex);
        key_hex.push(LEAF_TERMINATOR);
        let data = AccountStepData {
            balance: U256::zero(),
            nonce: 1,
            incarnation: 0,
            field_set: crate::gen_struct::ACCOUNT_FIELD_NONCE_ONLY,
        };
        hb.account_leaf(key_hex.len(), &key_hex, &data);

        let account = Account {
            nonce: 1,
            code_hash: Account::EMPTY_CODE_HASH,
            ..Default::default()
        };
        let mut account_rlp = Vec::new();
        account.rlp(*EMPTY_TRIE_HASH, &mut account_rlp);
        let mut expected = Vec::new();
        Encoder::new(&mut expected)
            .encode_field(&encode_compact(&key_hex))
            .encode_field(&account_rlp)
            .finish();
        assert_eq!(hb.root_hash(), keccak(&expected));

        match hb.root() {
            Some(Node::AccountLeaf(leaf)) => {
                assert_eq!(leaf.account, account);
                assert!(leaf.storage.is_none());
            }
            other => panic!("expected account leaf, got {other:?}"),
        }
    }

    #[test]
    fn account_leaf_pops_storage_then_code() {
        let mut hb = HashBuilder::new();
        let code_hash = keccak(b"some code");
        let storage_root = H256::repeat_byte(0x44);
        hb.hash(code_hash, 0);
        hb.hash(storage_root, 0);

        let mut key_hex = Vec::new();
        crate::nibbles::unpack_into(&[0x11; 32], &mut key_hex);
        key_hex.push(LEAF_TERMINATOR);
        let data = AccountStepData {
            balance: U256::from(7u64),
            nonce: 0,
            incarnation: 1,
            field_set: ACCOUNT_FIELD_STORAGE_ONLY
                | ACCOUNT_FIELD_CODE_ONLY
                | crate::gen_struct::ACCOUNT_FIELD_BALANCE_ONLY,
        };
        hb.account_leaf(key_hex.len(), &key_hex, &data);
        assert_eq!(hb.stack_len(), 1);

        let account = Account {
            nonce: 0,
            balance: U256::from(7u64),
            incarnation: 1,
            code_hash,
        };
        let mut account_rlp = Vec::new();
        account.rlp(storage_root, &mut account_rlp);
        let mut expected = Vec::new();
        Encoder::new(&mut expected)
            .encode_field(&encode_compact(&key_hex))
            .encode_field(&account_rlp)
            .finish();
        assert_eq!(hb.root_hash(), keccak(&expected));

        match hb.root() {
            Some(Node::AccountLeaf(leaf)) => {
                assert_eq!(leaf.storage, Some(Node::Hash(storage_root)));
                assert_eq!(leaf.account.code_hash, code_hash);
            }
            other => panic!("expected account leaf, got {other:?}"),
        }
    }

    #[test]
    fn inline_child_is_embedded_not_hashed() {
        let mut hb = HashBuilder::new();
        // A tiny leaf whose RLP is well under 32 bytes.
        hb.leaf_hash(3, &[0x01, 0x02, LEAF_TERMINATOR], &[0x05]);
        let leaf_rlp = {
            let mut buf = Vec::new();
            Encoder::new(&mut buf)
                .encode_field(&encode_compact(&[0x01, 0x02, LEAF_TERMINATOR]))
                .encode_field(&[0x05u8].as_slice().encode_to_vec())
                .finish();
            buf
        };
        assert!(leaf_rlp.len() < 32);
        hb.extension_hash(&[0x07]);

        let mut expected = Vec::new();
        Encoder::new(&mut expected)
            .encode_field(&encode_compact(&[0x07]))
            .encode_raw(&leaf_rlp)
            .finish();
        assert_eq!(hb.root_hash(), keccak(&expected));
    }
}
