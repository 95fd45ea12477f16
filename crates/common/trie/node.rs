use ethereum_types::H256;

use crate::account::Account;

/// A node of an in-memory partial trie. Only prefixes the caller declared
/// interesting are materialized; everything else collapses into [`Node::Hash`]
/// references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Leaf(LeafNode),
    AccountLeaf(Box<AccountLeafNode>),
    Extension(ExtensionNode),
    Branch(Box<BranchNode>),
    Hash(H256),
}

/// Storage leaf. `partial` holds unpacked nibbles without the terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode {
    pub partial: Vec<u8>,
    pub value: Vec<u8>,
}

/// Account leaf: the account fields plus its storage sub-trie (absent for
/// storage-less accounts) and, once attached, its bytecode or code size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountLeafNode {
    pub partial: Vec<u8>,
    pub account: Account,
    pub storage: Option<Node>,
    pub code: Option<Vec<u8>>,
    pub code_size: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionNode {
    pub prefix: Vec<u8>,
    pub child: Box<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchNode {
    pub choices: [Option<Box<Node>>; 16],
}

impl BranchNode {
    pub const EMPTY_CHOICES: [Option<Box<Node>>; 16] = [
        None, None, None, None, None, None, None, None, None, None, None, None, None, None, None,
        None,
    ];
}

impl From<LeafNode> for Node {
    fn from(node: LeafNode) -> Self {
        Node::Leaf(node)
    }
}

impl From<AccountLeafNode> for Node {
    fn from(node: AccountLeafNode) -> Self {
        Node::AccountLeaf(Box::new(node))
    }
}

impl From<ExtensionNode> for Node {
    fn from(node: ExtensionNode) -> Self {
        Node::Extension(node)
    }
}

impl From<BranchNode> for Node {
    fn from(node: BranchNode) -> Self {
        Node::Branch(Box::new(node))
    }
}

impl Node {
    /// Walks to the account leaf at the given unpacked nibble path, if the
    /// partial trie materializes it.
    pub fn account_leaf_mut(&mut self, path: &[u8]) -> Option<&mut AccountLeafNode> {
        match self {
            Node::AccountLeaf(leaf) => (leaf.partial == path).then_some(leaf.as_mut()),
            Node::Extension(ext) => path
                .strip_prefix(ext.prefix.as_slice())
                .and_then(|rest| ext.child.account_leaf_mut(rest)),
            Node::Branch(branch) => {
                let (first, rest) = path.split_first()?;
                branch.choices[*first as usize]
                    .as_mut()
                    .and_then(|child| child.account_leaf_mut(rest))
            }
            Node::Leaf(_) | Node::Hash(_) => None,
        }
    }
}
