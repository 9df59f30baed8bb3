//! Utility functions and helpers
//!
//! Hashing, signature verification and small encoding helpers built on `ring`.

pub mod crypto;

pub use crypto::{
    base58_encode, current_timestamp, ecdsa_p256_sha256_sign_verify, p256_point_on_curve,
    ripemd160_digest, sha256_digest,
};
