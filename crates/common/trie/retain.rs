//! Retention policy: decides, per nibble prefix, whether a cached branch
//! hash may stand in for the full subtree walk.

/// Caller-supplied decision function on nibble prefixes. Must be
/// deterministic and side-effect-free; it sits on the hot path of both the
/// merge iterator and the structure generation algorithm.
pub trait RetainDecider {
    fn retain(&self, prefix: &[u8]) -> bool;
}

/// Retains every prefix: the loader never uses a cached hash and the whole
/// trie is rebuilt from leaves.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetainAll;

impl RetainDecider for RetainAll {
    fn retain(&self, _prefix: &[u8]) -> bool {
        true
    }
}

/// Retains nothing: every cached hash is used as-is.
#[derive(Debug, Default, Clone, Copy)]
pub struct RetainNone;

impl RetainDecider for RetainNone {
    fn retain(&self, _prefix: &[u8]) -> bool {
        false
    }
}

/// Retains the prefixes of a fixed set of nibble keys. A prefix is retained
/// iff at least one listed key starts with it, so the listed paths stay fully
/// materialized while everything off-path may come from the hash cache.
#[derive(Debug, Default, Clone)]
pub struct RetainList {
    hexes: Vec<Vec<u8>>,
}

impl RetainList {
    pub fn new(mut hexes: Vec<Vec<u8>>) -> Self {
        hexes.sort();
        hexes.dedup();
        Self { hexes }
    }

    pub fn add_hex(&mut self, hex: Vec<u8>) {
        if let Err(pos) = self.hexes.binary_search(&hex) {
            self.hexes.insert(pos, hex);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hexes.is_empty()
    }
}

impl RetainDecider for RetainList {
    fn retain(&self, prefix: &[u8]) -> bool {
        if prefix.is_empty() {
            return true;
        }
        // The first key >= prefix is the only candidate that can extend it.
        let pos = self.hexes.partition_point(|hex| hex.as_slice() < prefix);
        self.hexes
            .get(pos)
            .is_some_and(|hex| hex.starts_with(prefix))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn retain_list_matches_prefixes_of_listed_keys() {
        let rl = RetainList::new(vec![vec![1, 2, 3], vec![5, 6]]);
        assert!(rl.retain(&[]));
        assert!(rl.retain(&[1]));
        assert!(rl.retain(&[1, 2]));
        assert!(rl.retain(&[1, 2, 3]));
        assert!(rl.retain(&[5, 6]));
        assert!(!rl.retain(&[1, 2, 4]));
        assert!(!rl.retain(&[1, 2, 3, 0]));
        assert!(!rl.retain(&[2]));
        assert!(!rl.retain(&[4]));
    }

    #[test]
    fn retain_list_add_keeps_order() {
        let mut rl = RetainList::default();
        rl.add_hex(vec![7, 7]);
        rl.add_hex(vec![0, 1]);
        rl.add_hex(vec![7, 7]);
        assert!(rl.retain(&[0]));
        assert!(rl.retain(&[7, 7]));
        assert!(!rl.retain(&[3]));
    }

    #[test]
    fn empty_list_retains_only_the_root() {
        let rl = RetainList::default();
        assert!(rl.retain(&[]));
        assert!(!rl.retain(&[0]));
    }
}
