use crate::utils::sha256_digest;
use data_encoding::HEXLOWER;
use serde::{Serialize, Serializer};
use std::fmt;

/// A SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Hash(pub [u8; 32]);

/// SHA-256 of the empty input. Null pointer, genesis previous hash and Merkle padding.
pub const DEFAULT_HASH: Hash = Hash([
    0xe3, 0xb0, 0xc4, 0x42, 0x98, 0xfc, 0x1c, 0x14, 0x9a, 0xfb, 0xf4, 0xc8, 0x99, 0x6f, 0xb9, 0x24,
    0x27, 0xae, 0x41, 0xe4, 0x64, 0x9b, 0x93, 0x4c, 0xa4, 0x95, 0x99, 0x1b, 0x78, 0x52, 0xb8, 0x55,
]);

impl Hash {
    pub fn digest(data: &[u8]) -> Hash {
        Hash(sha256_digest(data))
    }

    /// SHA-256 over `left ‖ right`.
    pub fn combine(left: &Hash, right: &Hash) -> Hash {
        let mut data = [0u8; 64];
        data[..32].copy_from_slice(&left.0);
        data[32..].copy_from_slice(&right.0);
        Hash::digest(&data)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Number of leading zero bits, most significant bit of byte 0 first.
    pub fn leading_zero_bits(&self) -> u32 {
        let mut total = 0;
        for byte in self.0.iter() {
            if *byte == 0 {
                total += 8;
            } else {
                total += byte.leading_zeros();
                break;
            }
        }
        total
    }

    pub fn to_hex(&self) -> String {
        HEXLOWER.encode(&self.0)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({})", self.to_hex())
    }
}
