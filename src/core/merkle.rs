use crate::core::{Hash, DEFAULT_HASH};

/// Merkle tree over transaction hashes, kept as layers from the leaves up
///
/// Adjacent nodes are paired left to right and their concatenation hashed.
/// An unpaired last node is paired with `DEFAULT_HASH` instead of being
/// duplicated, so `[a, b, c]` has root `H(H(a‖b) ‖ H(c‖DEFAULT_HASH))`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MerkleTree {
    layers: Vec<Vec<Hash>>,
}

impl MerkleTree {
    pub fn build(leaves: &[Hash]) -> MerkleTree {
        let mut tree = MerkleTree::default();
        tree.append(leaves);
        tree
    }

    pub fn root(&self) -> Hash {
        self.layers
            .last()
            .and_then(|top| top.first())
            .copied()
            .unwrap_or(DEFAULT_HASH)
    }

    pub fn leaves(&self) -> &[Hash] {
        self.layers.first().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.leaves().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// Extend the leaf layer and recompute only the parents to the right of
    /// the first new leaf, adding layers on top while more than one node remains.
    pub fn append(&mut self, hashes: &[Hash]) {
        if hashes.is_empty() {
            return;
        }
        if self.layers.is_empty() {
            self.layers.push(Vec::new());
        }
        let mut dirty = self.layers[0].len();
        self.layers[0].extend_from_slice(hashes);

        let mut level = 0;
        while self.layers[level].len() > 1 {
            if self.layers.len() == level + 1 {
                self.layers.push(Vec::new());
            }
            let start = dirty / 2;
            let parents: Vec<Hash> = self.layers[level][start * 2..]
                .chunks(2)
                .map(|pair| pair_hash(pair))
                .collect();
            let next = &mut self.layers[level + 1];
            next.truncate(start);
            next.extend(parents);
            dirty = start;
            level += 1;
        }
        self.layers.truncate(level + 1);
    }

    /// Sibling hashes from the leaf at `index` up to the root.
    pub fn proof(&self, index: usize) -> Option<Vec<Hash>> {
        if index >= self.len() {
            return None;
        }
        let mut path = Vec::with_capacity(self.depth().saturating_sub(1));
        let mut position = index;
        for layer in &self.layers[..self.layers.len() - 1] {
            let sibling = position ^ 1;
            path.push(layer.get(sibling).copied().unwrap_or(DEFAULT_HASH));
            position /= 2;
        }
        Some(path)
    }

    /// Recompute the root from `leaf` and its sibling path. Bit `k` of `index`
    /// says whether the running hash is a right child at level `k`.
    pub fn verify_proof(root: &Hash, proof: &[Hash], leaf: &Hash, index: usize) -> bool {
        let mut hash = *leaf;
        let mut position = index;
        for sibling in proof {
            hash = if position & 1 == 1 {
                Hash::combine(sibling, &hash)
            } else {
                Hash::combine(&hash, sibling)
            };
            position >>= 1;
        }
        position == 0 && hash == *root
    }
}

fn pair_hash(pair: &[Hash]) -> Hash {
    match pair {
        [left, right] => Hash::combine(left, right),
        [left] => Hash::combine(left, &DEFAULT_HASH),
        _ => DEFAULT_HASH,
    }
}
