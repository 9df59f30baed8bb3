use crate::core::DecodeError;
use crate::error::{BlockchainError, Result};
use crate::utils::{
    base58_encode, ecdsa_p256_sha256_sign_verify, p256_point_on_curve, ripemd160_digest,
    sha256_digest,
};
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_ASN1_SIGNING};
use serde::{Serialize, Serializer};
use std::fmt;
use std::fs;
use std::path::Path;
use zeroize::Zeroizing;

/// DER SubjectPublicKeyInfo of an uncompressed P-256 point.
pub const PUBLIC_KEY_LEN: usize = 91;
/// DER SEC1 ECPrivateKey carrying the curve OID and the public point.
pub const PRIVATE_KEY_LEN: usize = 121;

const SCALAR_LEN: usize = 32;

const SPKI_PREFIX: [u8; 26] = [
    0x30, 0x59, 0x30, 0x13, 0x06, 0x07, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x02, 0x01, 0x06, 0x08, 0x2a,
    0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0x03, 0x42, 0x00,
];

const SEC1_HEADER: [u8; 7] = [0x30, 0x77, 0x02, 0x01, 0x01, 0x04, 0x20];
const SEC1_MIDDLE: [u8; 17] = [
    0xa0, 0x0a, 0x06, 0x08, 0x2a, 0x86, 0x48, 0xce, 0x3d, 0x03, 0x01, 0x07, 0xa1, 0x44, 0x03, 0x42,
    0x00,
];

// version 1 followed by the OCTET STRING holding the private scalar
const PKCS8_SCALAR_MARKER: [u8; 5] = [0x02, 0x01, 0x01, 0x04, 0x20];

/// A P-256 signing key.
pub struct Key {
    key_pair: EcdsaKeyPair,
    sec1: Zeroizing<Vec<u8>>,
}

impl Key {
    pub fn generate() -> Result<Key> {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &rng)
            .map_err(|e| {
                BlockchainError::Crypto(format!("Failed to generate ECDSA key pair: {e}"))
            })?;
        let pkcs8 = Zeroizing::new(pkcs8.as_ref().to_vec());
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_ASN1_SIGNING, &pkcs8, &rng)
            .map_err(|e| {
                BlockchainError::Crypto(format!("Failed to create key pair from PKCS8: {e}"))
            })?;

        let marker = pkcs8
            .windows(PKCS8_SCALAR_MARKER.len())
            .position(|w| w == PKCS8_SCALAR_MARKER)
            .ok_or_else(|| {
                BlockchainError::Crypto("PKCS8 document has no private scalar".to_string())
            })?;
        let start = marker + PKCS8_SCALAR_MARKER.len();
        let scalar = pkcs8
            .get(start..start + SCALAR_LEN)
            .ok_or_else(|| BlockchainError::Crypto("PKCS8 document is truncated".to_string()))?;

        let mut sec1 = Zeroizing::new(Vec::with_capacity(PRIVATE_KEY_LEN));
        sec1.extend_from_slice(&SEC1_HEADER);
        sec1.extend_from_slice(scalar);
        sec1.extend_from_slice(&SEC1_MIDDLE);
        sec1.extend_from_slice(key_pair.public_key().as_ref());
        Ok(Key { key_pair, sec1 })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Key> {
        if bytes.len() != PRIVATE_KEY_LEN {
            return Err(BlockchainError::Wallet(format!(
                "Invalid private key length: expected {PRIVATE_KEY_LEN}, got {}",
                bytes.len()
            )));
        }
        let scalar_end = SEC1_HEADER.len() + SCALAR_LEN;
        let point_start = scalar_end + SEC1_MIDDLE.len();
        let header_ok = bytes[..SEC1_HEADER.len()] == SEC1_HEADER;
        let middle_ok = bytes[scalar_end..point_start] == SEC1_MIDDLE;
        if !header_ok || !middle_ok {
            return Err(BlockchainError::Wallet(
                "Private key is not a P-256 ECPrivateKey".to_string(),
            ));
        }

        let rng = SystemRandom::new();
        let key_pair = EcdsaKeyPair::from_private_key_and_public_key(
            &ECDSA_P256_SHA256_ASN1_SIGNING,
            &bytes[SEC1_HEADER.len()..scalar_end],
            &bytes[point_start..],
            &rng,
        )
        .map_err(|e| BlockchainError::Crypto(format!("Rejected private key: {e}")))?;
        Ok(Key {
            key_pair,
            sec1: Zeroizing::new(bytes.to_vec()),
        })
    }

    pub fn load(path: &Path) -> Result<Key> {
        let bytes = Zeroizing::new(fs::read(path)?);
        Key::from_bytes(&bytes)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.sec1.as_slice())?;
        Ok(())
    }

    pub fn to_bytes(&self) -> &[u8] {
        self.sec1.as_slice()
    }

    pub fn public(&self) -> PublicKey {
        let mut bytes = [0u8; PUBLIC_KEY_LEN];
        bytes[..SPKI_PREFIX.len()].copy_from_slice(&SPKI_PREFIX);
        bytes[SPKI_PREFIX.len()..].copy_from_slice(self.key_pair.public_key().as_ref());
        PublicKey(bytes)
    }

    pub fn sign(&self, digest: &[u8]) -> Result<Vec<u8>> {
        let rng = SystemRandom::new();
        let signature = self
            .key_pair
            .sign(&rng, digest)
            .map_err(|e| BlockchainError::Crypto(format!("Failed to sign message: {e}")))?;
        Ok(signature.as_ref().to_vec())
    }
}

/// DER-encoded P-256 public key; equality is byte equality of the encoding.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey([u8; PUBLIC_KEY_LEN]);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<PublicKey, DecodeError> {
        if bytes.len() != PUBLIC_KEY_LEN {
            return Err(DecodeError::InvalidPublicKey(format!(
                "expected {PUBLIC_KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        if bytes[..SPKI_PREFIX.len()] != SPKI_PREFIX {
            return Err(DecodeError::InvalidPublicKey(
                "not a P-256 SubjectPublicKeyInfo".to_string(),
            ));
        }
        if !p256_point_on_curve(&bytes[SPKI_PREFIX.len()..]) {
            return Err(DecodeError::InvalidPublicKey(
                "not an uncompressed point on P-256".to_string(),
            ));
        }
        let mut out = [0u8; PUBLIC_KEY_LEN];
        out.copy_from_slice(bytes);
        Ok(PublicKey(out))
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_LEN] {
        self.0
    }

    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LEN] {
        &self.0
    }

    pub fn verify(&self, digest: &[u8], signature: &[u8]) -> bool {
        ecdsa_p256_sha256_sign_verify(&self.0[SPKI_PREFIX.len()..], signature, digest)
    }

    /// Short base58 name: RIPEMD160(SHA256(der)).
    pub fn fingerprint(&self) -> String {
        base58_encode(&ripemd160_digest(&sha256_digest(&self.0)))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&data_encoding::HEXLOWER.encode(&self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.fingerprint())
    }
}
