//! Derivation of state tree keys from `(leaf type, address, position)`
//! tuples, plus the value limb encoding shared with leaf nodes.

use ethereum_types::{Address, U256};
use plonky2::field::types::Field;
use plonky2::hash::poseidon::PoseidonHash;
use plonky2::plonk::config::Hasher;
use serde::{Deserialize, Serialize};

use crate::smt::{hashout2u, F};

/// The kind of account datum a leaf holds. Discriminants are part of the
/// key derivation and must never change.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LeafType {
    Balance = 0,
    Nonce = 1,
    Code = 2,
    Storage = 3,
}

/// Derive the 256-bit tree key for `(leaf_type, address, position)`.
///
/// The Poseidon input is a 16-slot vector of 64-bit values: the address in
/// three little-endian limbs, the leaf type discriminant, the storage
/// position in four little-endian limbs, and zero padding. Each 64-bit slot
/// is absorbed as two 32-bit field elements (low half first) so the input
/// is always canonical in the Goldilocks field.
pub fn derive_key(leaf_type: LeafType, address: Address, position: U256) -> U256 {
    let addr = U256::from_big_endian(address.as_bytes());

    let mut slots = [0u64; 16];
    for i in 0..3 {
        slots[i] = (addr >> (64 * i)).low_u64();
    }
    slots[3] = leaf_type as u64;
    for i in 0..4 {
        slots[4 + i] = (position >> (64 * i)).low_u64();
    }

    let input: Vec<F> = slots
        .iter()
        .flat_map(|&slot| {
            [
                F::from_canonical_u32(slot as u32),
                F::from_canonical_u32((slot >> 32) as u32),
            ]
        })
        .collect();
    hashout2u(PoseidonHash::hash_no_pad(&input))
}

pub fn key_balance(address: Address) -> U256 {
    derive_key(LeafType::Balance, address, U256::zero())
}

pub fn key_nonce(address: Address) -> U256 {
    derive_key(LeafType::Nonce, address, U256::zero())
}

pub fn key_code(address: Address) -> U256 {
    derive_key(LeafType::Code, address, U256::zero())
}

pub fn key_storage(address: Address, position: U256) -> U256 {
    derive_key(LeafType::Storage, address, position)
}

/// Split a value into the four 64-bit little-endian limbs stored in a leaf.
pub fn encode_value(value: U256) -> [u64; 4] {
    value.0
}

/// Inverse of [`encode_value`].
pub fn decode_value(limbs: [u64; 4]) -> U256 {
    U256(limbs)
}
