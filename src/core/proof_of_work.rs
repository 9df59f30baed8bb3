use crate::core::{BlockHeader, Encodable, Hash};

/// Fixed-prefix proof of work: the header hash needs `difficulty` leading zero bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProofOfWork {
    difficulty: u32,
}

impl ProofOfWork {
    pub fn new(difficulty: u32) -> ProofOfWork {
        ProofOfWork { difficulty }
    }

    pub fn difficulty(&self) -> u32 {
        self.difficulty
    }

    pub fn is_satisfied_by(&self, hash: &Hash) -> bool {
        meets_difficulty(hash, self.difficulty)
    }

    pub fn validate(&self, header: &BlockHeader) -> bool {
        self.is_satisfied_by(&header.hash())
    }

    /// One mining attempt: draw a random nonce and report it if it satisfies the target.
    pub fn attempt(&self, header: &BlockHeader) -> Option<u32> {
        let mut trial = header.clone();
        trial.randomize_nonce();
        if self.validate(&trial) {
            Some(trial.nonce)
        } else {
            None
        }
    }
}

pub fn meets_difficulty(hash: &Hash, difficulty: u32) -> bool {
    hash.leading_zero_bits() >= difficulty
}
