pub mod account;
pub mod db;
pub mod error;
pub mod gen_struct;
pub mod hash_builder;
mod keccak;
pub mod nibbles;
pub mod node;
mod node_hash;
pub mod retain;
pub mod state_writer;
pub mod sub_trie_loader;

use ethereum_types::H256;
use flatstate_rlp::constants::RLP_NULL;
use lazy_static::lazy_static;

pub use self::account::Account;
pub use self::db::{FlatDb, InMemoryFlatDb, MutableFlatDb, OrderedCursor};
pub use self::error::TrieError;
pub use self::hash_builder::HashBuilder;
pub use self::keccak::keccak;
pub use self::node::{AccountLeafNode, BranchNode, ExtensionNode, LeafNode, Node};
pub use self::node_hash::NodeHash;
pub use self::retain::{RetainAll, RetainDecider, RetainList, RetainNone};
pub use self::state_writer::StateWriter;
pub use self::sub_trie_loader::{CodeRequest, FlatDbSubTrieLoader, StreamItem, SubTries};

lazy_static! {
    // Hash value for an empty trie, equal to keccak(RLP_NULL)
    pub static ref EMPTY_TRIE_HASH: H256 = keccak([RLP_NULL]);
}

/// Length in bytes of a hashed account or slot key.
pub const HASH_LENGTH: usize = 32;
/// Length in bytes of the big-endian incarnation segment of a composite
/// storage key.
pub const INCARNATION_LENGTH: usize = 8;
