use ethereum_types::H256;
use flatstate_rlp::error::RLPDecodeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrieError {
    #[error(transparent)]
    RLPDecode(#[from] RLPDecodeError),
    #[error("Malformed account record under key {0:#x}")]
    AccountDecode(H256),
    #[error("Account {0:#x} is not present in the partial trie")]
    AccountNotFound(H256),
    #[error("Code {0:#x} is not present in the code bucket")]
    CodeNotFound(H256),
    #[error("Database error: {0}")]
    DbError(anyhow::Error),
    #[error("Lock Error: Panicked when trying to acquire a lock")]
    LockError,
}
