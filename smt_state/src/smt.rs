//! Poseidon sparse Merkle tree over a content-addressed node store.
//!
//! The tree is stateless with respect to roots: `get` and `set` take the
//! root as an argument and `set` returns the new root in its proof. Nodes
//! are immutable and stored under their own hash, so every historical root
//! stays readable after later writes.

use ethereum_types::U256;
use log::trace;
use plonky2::field::goldilocks_field::GoldilocksField;
use plonky2::field::types::{Field, PrimeField64};
use plonky2::hash::hash_types::HashOut;
use plonky2::hash::poseidon::PoseidonHash;
use plonky2::plonk::config::Hasher;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::keys::decode_value;
use crate::store::{NodeStore, StoreError};

pub type F = GoldilocksField;

/// Keys cover the 160-bit address space, consumed `arity` bits per level.
const KEY_BITS: usize = 160;

/// 16 children per node.
pub const DEFAULT_ARITY: u8 = 4;

#[derive(Debug, Error)]
pub enum TreeError {
    #[error("unsupported arity {0}: leaf nodes need 6 slots and the key path must tile evenly")]
    InvalidArity(u8),
    #[error("node {0} missing from the store")]
    MissingNode(U256),
    #[error("malformed encoding for node {0}")]
    MalformedNode(U256),
    #[error("code {0} missing from the code store")]
    MissingCode(U256),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type TreeResult<T> = Result<T, TreeError>;

/// Inclusion or exclusion proof for a key against a given root.
///
/// On a miss, `value` is zero; if the walk ended at a leaf for a different
/// key, that leaf is reported through `ins_key`/`ins_value` and `is_old0`
/// is false.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Proof {
    pub root: U256,
    pub key: U256,
    pub value: U256,
    pub siblings: Vec<Vec<U256>>,
    pub is_old0: bool,
    pub ins_key: U256,
    pub ins_value: U256,
}

/// Result of a `set`, carrying both roots and everything a circuit needs to
/// replay the update.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UpdateProof {
    pub old_root: U256,
    pub new_root: U256,
    pub key: U256,
    pub old_value: U256,
    pub new_value: U256,
    pub siblings: Vec<Vec<U256>>,
    pub is_old0: bool,
    pub ins_key: U256,
    pub ins_value: U256,
}

pub struct Smt<S> {
    store: S,
    arity: u8,
    max_levels: usize,
}

impl<S: NodeStore> Smt<S> {
    /// A leaf occupies 6 slots (marker, remaining key, 4 value limbs), so
    /// nodes need `2^arity >= 6`; the key path must also tile evenly into
    /// `arity`-bit digits. Valid arities are 4, 5 and 8.
    pub fn new(store: S, arity: u8) -> TreeResult<Self> {
        if !(3..=8).contains(&arity) || KEY_BITS % arity as usize != 0 {
            return Err(TreeError::InvalidArity(arity));
        }
        Ok(Self {
            store,
            arity,
            max_levels: KEY_BITS / arity as usize,
        })
    }

    pub fn arity(&self) -> u8 {
        self.arity
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn slots(&self) -> usize {
        1 << self.arity
    }

    /// Split a key into `arity`-bit digits, least significant first; digit
    /// `i` selects the child at depth `i`.
    fn split_key(&self, key: U256) -> Vec<usize> {
        let mask = U256::from((1u64 << self.arity) - 1);
        let mut k = key;
        (0..self.max_levels)
            .map(|_| {
                let digit = (k & mask).low_u64() as usize;
                k = k >> self.arity;
                digit
            })
            .collect()
    }

    fn empty_node(&self) -> Vec<U256> {
        vec![U256::zero(); self.slots()]
    }

    fn new_leaf(&self, rem_key: U256, value: U256) -> Vec<U256> {
        let mut node = self.empty_node();
        node[0] = U256::one();
        node[1] = rem_key;
        for (i, limb) in value.0.iter().enumerate() {
            node[2 + i] = U256::from(*limb);
        }
        node
    }

    fn is_leaf(node: &[U256]) -> bool {
        node[0] == U256::one()
    }

    fn leaf_value(hash: U256, node: &[U256]) -> TreeResult<U256> {
        let mut limbs = [0u64; 4];
        for (i, limb) in limbs.iter_mut().enumerate() {
            let slot = node[2 + i];
            if slot.bits() > 64 {
                return Err(TreeError::MalformedNode(hash));
            }
            *limb = slot.low_u64();
        }
        Ok(decode_value(limbs))
    }

    fn load_node(&self, hash: U256) -> TreeResult<Vec<U256>> {
        let bytes = self
            .store
            .get(hash)?
            .ok_or(TreeError::MissingNode(hash))?;
        if bytes.len() != self.slots() * 32 {
            return Err(TreeError::MalformedNode(hash));
        }
        Ok(bytes.chunks_exact(32).map(U256::from_big_endian).collect())
    }

    /// Hash a node and persist it under its hash.
    fn hash_save(&self, node: &[U256]) -> TreeResult<U256> {
        let hash = node_hash(node);
        let mut bytes = vec![0u8; node.len() * 32];
        for (i, slot) in node.iter().enumerate() {
            slot.to_big_endian(&mut bytes[i * 32..(i + 1) * 32]);
        }
        self.store.set(hash, bytes)?;
        Ok(hash)
    }

    /// Index of the unique non-zero child, or -1 if there is none or more
    /// than one.
    fn unique_sibling(node: &[U256]) -> isize {
        let mut n_found = 0;
        let mut found = -1;
        for (i, slot) in node.iter().enumerate() {
            if !slot.is_zero() {
                n_found += 1;
                found = i as isize;
            }
        }
        if n_found == 1 {
            found
        } else {
            -1
        }
    }

    /// Read `key` under `root`. A node hash the store cannot resolve is a
    /// storage error, never "key absent".
    pub fn get(&self, root: U256, key: U256) -> TreeResult<Proof> {
        let keys = self.split_key(key);
        let mut r = root;
        let mut level: isize = 0;
        let mut acc_key = U256::zero();
        let mut found: Option<(U256, U256)> = None;
        let mut siblings: Vec<Vec<U256>> = Vec::new();

        while !r.is_zero() && found.is_none() {
            let node = self.load_node(r)?;
            if Self::is_leaf(&node) {
                let shift = level as usize * self.arity as usize;
                let found_key = acc_key | (node[1] << shift);
                found = Some((found_key, Self::leaf_value(r, &node)?));
            } else {
                if level as usize >= self.max_levels {
                    return Err(TreeError::MalformedNode(r));
                }
                let digit = keys[level as usize];
                r = node[digit];
                acc_key = acc_key | (U256::from(digit) << (level as usize * self.arity as usize));
                siblings.push(node);
                level += 1;
            }
        }

        let proof = match found {
            Some((found_key, found_value)) if found_key == key => Proof {
                root,
                key,
                value: found_value,
                siblings,
                is_old0: false,
                ins_key: U256::zero(),
                ins_value: U256::zero(),
            },
            Some((found_key, found_value)) => Proof {
                root,
                key,
                value: U256::zero(),
                siblings,
                is_old0: false,
                ins_key: found_key,
                ins_value: found_value,
            },
            None => Proof {
                root,
                key,
                value: U256::zero(),
                siblings,
                is_old0: true,
                ins_key: U256::zero(),
                ins_value: U256::zero(),
            },
        };
        trace!("smt get key={:x} value={:x}", key, proof.value);
        Ok(proof)
    }

    /// Write `key = value` under `old_root` and return the update proof
    /// carrying the new root. Writing zero deletes the key; re-writing an
    /// existing `(key, value)` pair yields the identical root.
    pub fn set(&self, old_root: U256, key: U256, new_value: U256) -> TreeResult<UpdateProof> {
        let keys = self.split_key(key);
        let arity = self.arity as usize;

        let mut r = old_root;
        let mut new_root = old_root;
        let mut level: isize = 0;
        let mut acc_key = U256::zero();
        let mut last_acc_key = U256::zero();
        let mut found_key: Option<U256> = None;
        let mut old_value = U256::zero();
        let mut ins_key = U256::zero();
        let mut ins_value = U256::zero();
        let mut is_old0 = true;
        let mut siblings: Vec<Vec<U256>> = Vec::new();
        let mode;

        // Walk down collecting the path. The leaf, if one is hit, lands in
        // `siblings` one past the last internal node.
        while !r.is_zero() && found_key.is_none() {
            let node = self.load_node(r)?;
            if Self::is_leaf(&node) {
                let shift = level as usize * arity;
                found_key = Some(acc_key | (node[1] << shift));
                siblings.push(node);
            } else {
                if level as usize >= self.max_levels {
                    return Err(TreeError::MalformedNode(r));
                }
                let digit = keys[level as usize];
                r = node[digit];
                last_acc_key = acc_key;
                acc_key = acc_key | (U256::from(digit) << (level as usize * arity));
                siblings.push(node);
                level += 1;
            }
        }

        // `level` now indexes the last internal node on the path; the leaf
        // (or the empty slot) hangs off it at digit `keys[level]`.
        level -= 1;
        acc_key = last_acc_key;

        if !new_value.is_zero() {
            if let Some(found_key) = found_key {
                if found_key == key {
                    mode = "update";
                    let leaf = &siblings[(level + 1) as usize];
                    let leaf_hash = node_hash(leaf);
                    old_value = Self::leaf_value(leaf_hash, leaf)?;
                    let new_leaf = self.new_leaf(leaf[1], new_value);
                    let new_leaf_hash = self.hash_save(&new_leaf)?;
                    if level >= 0 {
                        siblings[level as usize][keys[level as usize]] = new_leaf_hash;
                    } else {
                        new_root = new_leaf_hash;
                    }
                } else {
                    mode = "insertFound";
                    let old_leaf_node = &siblings[(level + 1) as usize];
                    let old_leaf_hash = node_hash(old_leaf_node);
                    ins_key = found_key;
                    ins_value = Self::leaf_value(old_leaf_hash, old_leaf_node)?;
                    is_old0 = false;

                    // Push both leaves down past the shared digit prefix.
                    let found_keys = self.split_key(found_key);
                    let mut level2 = (level + 1) as usize;
                    loop {
                        assert!(
                            level2 < self.max_levels,
                            "distinct keys share the whole 160-bit path: key derivation collision"
                        );
                        if keys[level2] != found_keys[level2] {
                            break;
                        }
                        level2 += 1;
                    }

                    let old_leaf =
                        self.new_leaf(found_key >> ((level2 + 1) * arity), ins_value);
                    let old_leaf_hash = self.hash_save(&old_leaf)?;
                    let new_leaf = self.new_leaf(key >> ((level2 + 1) * arity), new_value);
                    let new_leaf_hash = self.hash_save(&new_leaf)?;

                    let mut node = self.empty_node();
                    node[keys[level2]] = new_leaf_hash;
                    node[found_keys[level2]] = old_leaf_hash;
                    let mut r2 = self.hash_save(&node)?;

                    let mut level2 = level2 as isize - 1;
                    while level2 != level {
                        let mut node = self.empty_node();
                        node[keys[level2 as usize]] = r2;
                        r2 = self.hash_save(&node)?;
                        level2 -= 1;
                    }

                    if level >= 0 {
                        siblings[level as usize][keys[level as usize]] = r2;
                    } else {
                        new_root = r2;
                    }
                }
            } else {
                mode = "insertNotFound";
                let rem_key = key >> ((level + 1) as usize * arity);
                let new_leaf_hash = self.hash_save(&self.new_leaf(rem_key, new_value))?;
                if level >= 0 {
                    siblings[level as usize][keys[level as usize]] = new_leaf_hash;
                } else {
                    new_root = new_leaf_hash;
                }
            }
        } else if found_key == Some(key) {
            let leaf = &siblings[(level + 1) as usize];
            old_value = Self::leaf_value(node_hash(leaf), leaf)?;
            if level >= 0 {
                siblings[level as usize][keys[level as usize]] = U256::zero();

                let mut u_key = Self::unique_sibling(&siblings[level as usize]);
                let sibling_leaf = if u_key >= 0 {
                    let node = self.load_node(siblings[level as usize][u_key as usize])?;
                    Self::is_leaf(&node).then_some(node)
                } else {
                    None
                };

                if let Some(leaf) = sibling_leaf {
                    // The orphaned leaf rises while every ancestor has it as
                    // its only non-zero child; its remaining key suffix is
                    // re-encoded for the shallower depth.
                    mode = "deleteFound";
                    let leaf_hash = node_hash(&leaf);
                    ins_key = acc_key
                        | (U256::from(u_key as usize) << (level as usize * arity))
                        | (leaf[1] << ((level + 1) as usize * arity));
                    ins_value = Self::leaf_value(leaf_hash, &leaf)?;
                    is_old0 = false;

                    while u_key >= 0 && level >= 0 {
                        level -= 1;
                        if level >= 0 {
                            u_key = Self::unique_sibling(&siblings[level as usize]);
                        }
                    }

                    let rem_key = ins_key >> ((level + 1) as usize * arity);
                    let risen_hash = self.hash_save(&self.new_leaf(rem_key, ins_value))?;
                    if level >= 0 {
                        siblings[level as usize][keys[level as usize]] = risen_hash;
                    } else {
                        new_root = risen_hash;
                    }
                } else {
                    mode = "deleteNotFound";
                }
            } else {
                mode = "deleteLast";
                new_root = U256::zero();
            }
        } else {
            // Zero write to an absent key, whether the path ended in an
            // empty slot or at a leaf for a different key.
            mode = "zeroToZero";
        }

        // Rehash the touched path bottom-up.
        siblings.truncate((level + 1) as usize);
        while level >= 0 {
            new_root = self.hash_save(&siblings[level as usize])?;
            level -= 1;
            if level >= 0 {
                siblings[level as usize][keys[level as usize]] = new_root;
            }
        }

        trace!("smt set key={:x} mode={} new_root={:x}", key, mode, new_root);

        Ok(UpdateProof {
            old_root,
            new_root,
            key,
            old_value,
            new_value,
            siblings,
            is_old0,
            ins_key,
            ins_value,
        })
    }
}

/// Poseidon hash of a node. Each 256-bit slot is lowered to eight 32-bit
/// little-endian limbs so every field element is canonical.
pub fn node_hash(node: &[U256]) -> U256 {
    let mut input = Vec::with_capacity(node.len() * 8);
    for slot in node {
        for i in 0..8 {
            input.push(F::from_canonical_u32((*slot >> (32 * i)).low_u64() as u32));
        }
    }
    hashout2u(PoseidonHash::hash_no_pad(&input))
}

/// Pack a Poseidon digest into a `U256`, limbs little-endian.
pub fn hashout2u(h: HashOut<F>) -> U256 {
    U256(h.elements.map(|e| e.to_canonical_u64()))
}
