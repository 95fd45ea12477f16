use ethereum_types::H256;
use sha3::{Digest, Keccak256};

pub fn keccak(data: impl AsRef<[u8]>) -> H256 {
    H256::from_slice(&Keccak256::digest(data.as_ref()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn known_vectors() {
        assert_eq!(
            keccak([0u8; 0]),
            H256(hex_literal("c5d2460186f7233c927e7db2dcc703c0e500b653ca82273b7bfad8045d85a470")),
        );
        assert_eq!(
            keccak([0x80u8]),
            H256(hex_literal("56e81f171bcc55a6ff8345e692c0f86e5b48e01b996cadc001622fb5e363b421")),
        );
    }

    fn hex_literal(s: &str) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&hex::decode(s).unwrap());
        out
    }
}
