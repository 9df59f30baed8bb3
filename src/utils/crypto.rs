use num_bigint::BigUint;
use ring::digest::{Context, SHA256};
use ring::signature::{UnparsedPublicKey, ECDSA_P256_SHA256_ASN1};
use ripemd::{Digest as RipemdDigest, Ripemd160};

use crate::error::{BlockchainError, Result};
use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch, as stored in block headers.
pub fn current_timestamp() -> Result<u64> {
    let duration = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| BlockchainError::Crypto(format!("System time error: {e}")))?;
    Ok(duration.as_secs())
}

pub fn sha256_digest(data: &[u8]) -> [u8; 32] {
    let mut context = Context::new(&SHA256);
    context.update(data);
    let digest = context.finish();
    let mut out = [0u8; 32];
    out.copy_from_slice(digest.as_ref());
    out
}

pub fn ripemd160_digest(data: &[u8]) -> Vec<u8> {
    let mut hasher = Ripemd160::new();
    hasher.update(data);
    hasher.finalize().to_vec()
}

pub fn base58_encode(data: &[u8]) -> String {
    bs58::encode(data).into_string()
}

/// Verify an ASN.1 DER ECDSA P-256 signature against an uncompressed SEC1 point.
pub fn ecdsa_p256_sha256_sign_verify(public_key: &[u8], signature: &[u8], message: &[u8]) -> bool {
    let peer_public_key = UnparsedPublicKey::new(&ECDSA_P256_SHA256_ASN1, public_key);
    peer_public_key.verify(message, signature).is_ok()
}

// field prime and curve coefficient b of P-256, big endian
const P256_P: [u8; 32] = [
    0xff, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff,
];
const P256_B: [u8; 32] = [
    0x5a, 0xc6, 0x35, 0xd8, 0xaa, 0x3a, 0x93, 0xe7, 0xb3, 0xeb, 0xbd, 0x55, 0x76, 0x98, 0x86, 0xbc,
    0x65, 0x1d, 0x06, 0xb0, 0xcc, 0x53, 0xb0, 0xf6, 0x3b, 0xce, 0x3c, 0x3e, 0x27, 0xd2, 0x60, 0x4b,
];

/// Whether a 65-byte uncompressed SEC1 point satisfies y² = x³ - 3x + b over the P-256 field.
pub fn p256_point_on_curve(point: &[u8]) -> bool {
    if point.len() != 65 || point[0] != 0x04 {
        return false;
    }
    let p = BigUint::from_bytes_be(&P256_P);
    let b = BigUint::from_bytes_be(&P256_B);
    let x = BigUint::from_bytes_be(&point[1..33]);
    let y = BigUint::from_bytes_be(&point[33..]);
    if x >= p || y >= p {
        return false;
    }

    let lhs = (&y * &y) % &p;
    // 3p keeps the subtraction of 3x non-negative
    let rhs = (&x * &x * &x + &b + &p * 3u32 - &x * 3u32) % &p;
    lhs == rhs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_of_empty_input() {
        let digest = sha256_digest(&[]);
        assert_eq!(
            data_encoding::HEXLOWER.encode(&digest),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_ripemd160_length() {
        assert_eq!(ripemd160_digest(b"ledger").len(), 20);
    }

    #[test]
    fn test_point_on_curve() {
        // the P-256 base point
        let generator = data_encoding::HEXLOWER
            .decode(
                b"046b17d1f2e12c4247f8bce6e563a440f277037d812deb33a0f4a13945d898c296\
                  4fe342e2fe1a7f9b8ee7eb4a7c0f9e162bce33576b315ececbb6406837bf51f5",
            )
            .unwrap();
        assert!(p256_point_on_curve(&generator));

        let mut off_curve = generator.clone();
        off_curve[64] ^= 0x01;
        assert!(!p256_point_on_curve(&off_curve));
        assert!(!p256_point_on_curve(&generator[..64]));

        let mut beyond_field = generator;
        beyond_field[1..33].copy_from_slice(&P256_P);
        assert!(!p256_point_on_curve(&beyond_field));
    }

    #[test]
    fn test_verify_rejects_garbage_key() {
        assert!(!ecdsa_p256_sha256_sign_verify(&[4u8; 65], &[0u8; 70], b"msg"));
    }
}
