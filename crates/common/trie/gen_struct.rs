//! Structure generation: turns adjacent-key transitions of a depth-first
//! walk into hash-builder operations.
//!
//! `curr` is the key whose subtree is being completed, `succ` the key that
//! follows it in the walk. The point where they diverge tells how many
//! prefix groups close; `groups` carries one child bitmap per open depth.

use ethereum_types::{H256, U256};
use tracing::trace;

use crate::{hash_builder::HashBuilder, nibbles::prefix_len, retain::RetainDecider};

pub const ACCOUNT_FIELD_NONCE_ONLY: u8 = 0x01;
pub const ACCOUNT_FIELD_BALANCE_ONLY: u8 = 0x02;
pub const ACCOUNT_FIELD_STORAGE_ONLY: u8 = 0x04;
pub const ACCOUNT_FIELD_CODE_ONLY: u8 = 0x08;

#[derive(Debug, Clone, Default)]
pub struct AccountStepData {
    pub balance: U256,
    pub nonce: u64,
    pub incarnation: u64,
    pub field_set: u8,
}

/// The payload completing the subtree under `curr`.
#[derive(Debug)]
pub enum GenStructStepData<'a> {
    /// A storage leaf carrying the raw slot bytes.
    Leaf { value: &'a [u8] },
    /// An account leaf; storage root and code hash are taken off the
    /// hash-builder stack according to the field set.
    Account(AccountStepData),
    /// A cached branch hash standing in for the whole subtree.
    Hash { hash: H256, witness_len: u64 },
}

/// Completes the trie node at the divergence point between `curr` and `succ`,
/// feeding the hash builder. An empty `succ` closes everything that is still
/// open. Returns the updated per-depth child bitmaps.
pub fn gen_struct_step(
    rl: &dyn RetainDecider,
    mut curr: &[u8],
    succ: &[u8],
    hb: &mut HashBuilder,
    data: GenStructStepData<'_>,
    mut groups: Vec<u16>,
) -> Vec<u16> {
    let mut build_extensions = false;
    loop {
        let prec_exists = !groups.is_empty();
        let prec_len = groups.len().saturating_sub(1);
        let succ_len = prefix_len(succ, curr);
        let max_len = prec_len.max(succ_len);
        trace!(
            prec_len,
            succ_len,
            max_len,
            curr = %hex_fmt(curr),
            succ = %hex_fmt(succ),
            build_extensions,
            "struct step"
        );

        // Add the digit immediately following the max common prefix.
        let extra_digit = curr[max_len];
        if groups.len() <= max_len {
            groups.push(0);
        }
        groups[max_len] |= 1u16 << extra_digit;
        let mut remainder_start = max_len;
        if !succ.is_empty() || prec_exists {
            remainder_start += 1;
        }
        let remainder_len = curr.len() - remainder_start;

        if !build_extensions {
            match &data {
                GenStructStepData::Hash { hash, witness_len } => {
                    hb.hash(*hash, *witness_len);
                    build_extensions = true;
                }
                GenStructStepData::Account(account) => {
                    if rl.retain(&curr[..max_len]) {
                        hb.account_leaf(remainder_len, curr, account);
                    } else {
                        hb.account_leaf_hash(remainder_len, curr, account);
                    }
                }
                GenStructStepData::Leaf { value } => {
                    if rl.retain(&curr[..max_len]) {
                        hb.leaf(remainder_len, curr, value);
                    } else {
                        hb.leaf_hash(remainder_len, curr, value);
                    }
                }
            }
        }

        if build_extensions && remainder_len > 0 {
            if rl.retain(&curr[..max_len]) {
                hb.extension(&curr[remainder_start..remainder_start + remainder_len]);
            } else {
                hb.extension_hash(&curr[remainder_start..remainder_start + remainder_len]);
            }
        }

        // The group of curr is not closed yet: the successor still belongs
        // to it.
        if prec_len <= succ_len && !succ.is_empty() {
            return groups;
        }

        // Close the immediately encompassing prefix group.
        if !succ.is_empty() || prec_exists {
            if rl.retain(&curr[..max_len]) {
                hb.branch(groups[max_len]);
            } else {
                hb.branch_hash(groups[max_len]);
            }
        }
        groups.truncate(max_len);

        if prec_len == 0 {
            return groups;
        }

        // The closed group becomes the node to flush on the next pass.
        curr = &curr[..prec_len];
        while groups.last() == Some(&0) {
            groups.pop();
        }
        build_extensions = true;
    }
}

fn hex_fmt(nibbles: &[u8]) -> String {
    nibbles.iter().map(|n| format!("{n:x}")).collect()
}
