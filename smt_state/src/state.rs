//! Typed account view over the sparse Merkle tree: balances, nonces, code
//! and storage slots, each under its derived key.
//!
//! Code bytes live in a separate content-addressed store keyed by their
//! keccak hash; only the hash is a tree leaf. An account with no code has a
//! zero Code leaf and a zero code hash.

use ethereum_types::{Address, H256, U256};
use keccak_hash::keccak;

use crate::keys::{key_balance, key_code, key_nonce, key_storage};
use crate::smt::{Smt, TreeError, TreeResult, UpdateProof};
use crate::store::NodeStore;

pub struct StateTree<S, C> {
    tree: Smt<S>,
    code_store: C,
}

impl<S: NodeStore, C: NodeStore> StateTree<S, C> {
    pub fn new(tree: Smt<S>, code_store: C) -> Self {
        Self { tree, code_store }
    }

    pub fn tree(&self) -> &Smt<S> {
        &self.tree
    }

    pub fn get_balance(&self, root: U256, address: Address) -> TreeResult<U256> {
        Ok(self.tree.get(root, key_balance(address))?.value)
    }

    pub fn set_balance(
        &self,
        root: U256,
        address: Address,
        balance: U256,
    ) -> TreeResult<UpdateProof> {
        self.tree.set(root, key_balance(address), balance)
    }

    pub fn get_nonce(&self, root: U256, address: Address) -> TreeResult<U256> {
        Ok(self.tree.get(root, key_nonce(address))?.value)
    }

    pub fn set_nonce(&self, root: U256, address: Address, nonce: U256) -> TreeResult<UpdateProof> {
        self.tree.set(root, key_nonce(address), nonce)
    }

    /// Zero for an account that never had code set.
    pub fn get_code_hash(&self, root: U256, address: Address) -> TreeResult<H256> {
        let leaf = self.tree.get(root, key_code(address))?.value;
        let mut bytes = [0u8; 32];
        leaf.to_big_endian(&mut bytes);
        Ok(H256(bytes))
    }

    /// A code hash that is set but whose preimage the code store cannot
    /// resolve is corruption, not empty code.
    pub fn get_code(&self, root: U256, address: Address) -> TreeResult<Vec<u8>> {
        let hash = self.get_code_hash(root, address)?;
        if hash.is_zero() {
            return Ok(Vec::new());
        }
        let hash = U256::from_big_endian(hash.as_bytes());
        self.code_store
            .get(hash)?
            .ok_or(TreeError::MissingCode(hash))
    }

    pub fn get_code_size(&self, root: U256, address: Address) -> TreeResult<usize> {
        Ok(self.get_code(root, address)?.len())
    }

    /// Setting empty code clears the Code leaf.
    pub fn set_code(&self, root: U256, address: Address, code: &[u8]) -> TreeResult<UpdateProof> {
        let key = key_code(address);
        if code.is_empty() {
            return self.tree.set(root, key, U256::zero());
        }
        let hash = U256::from_big_endian(keccak(code).as_bytes());
        self.code_store.set(hash, code.to_vec())?;
        self.tree.set(root, key, hash)
    }

    pub fn get_storage_at(
        &self,
        root: U256,
        address: Address,
        position: U256,
    ) -> TreeResult<U256> {
        Ok(self.tree.get(root, key_storage(address, position))?.value)
    }

    pub fn set_storage_at(
        &self,
        root: U256,
        address: Address,
        position: U256,
        value: U256,
    ) -> TreeResult<UpdateProof> {
        self.tree.set(root, key_storage(address, position), value)
    }
}

#[cfg(test)]
mod tests {
    use rand::{thread_rng, Rng};

    use super::*;
    use crate::smt::DEFAULT_ARITY;
    use crate::store::MemoryStore;

    fn rand_address() -> Address {
        Address::from(thread_rng().gen::<[u8; 20]>())
    }

    fn new_state_tree() -> StateTree<MemoryStore, MemoryStore> {
        StateTree::new(
            Smt::new(MemoryStore::default(), DEFAULT_ARITY).unwrap(),
            MemoryStore::default(),
        )
    }

    #[test]
    fn test_account_fields_round_trip() {
        let state = new_state_tree();
        let addr = rand_address();
        let balance = U256(thread_rng().gen());
        let pos = U256(thread_rng().gen());
        let slot_value = U256(thread_rng().gen());

        let root = state.set_balance(U256::zero(), addr, balance).unwrap().new_root;
        let root = state.set_nonce(root, addr, U256::from(7)).unwrap().new_root;
        let root = state.set_storage_at(root, addr, pos, slot_value).unwrap().new_root;

        assert_eq!(state.get_balance(root, addr).unwrap(), balance);
        assert_eq!(state.get_nonce(root, addr).unwrap(), U256::from(7));
        assert_eq!(state.get_storage_at(root, addr, pos).unwrap(), slot_value);
        // Fields of another account are untouched.
        assert_eq!(
            state.get_balance(root, rand_address()).unwrap(),
            U256::zero()
        );
    }

    #[test]
    fn test_code_round_trip() {
        let state = new_state_tree();
        let addr = rand_address();
        let code = vec![0x60, 0x01, 0x60, 0x02, 0x01, 0x00];

        let root = state.set_code(U256::zero(), addr, &code).unwrap().new_root;
        assert_eq!(state.get_code(root, addr).unwrap(), code);
        assert_eq!(state.get_code_size(root, addr).unwrap(), code.len());
        assert_eq!(
            state.get_code_hash(root, addr).unwrap(),
            keccak_hash::keccak(&code)
        );

        let root = state.set_code(root, addr, &[]).unwrap().new_root;
        assert!(state.get_code_hash(root, addr).unwrap().is_zero());
        assert!(state.get_code(root, addr).unwrap().is_empty());
    }

    #[test]
    fn test_old_roots_stay_readable() {
        let state = new_state_tree();
        let addr = rand_address();

        let root1 = state
            .set_balance(U256::zero(), addr, U256::from(100))
            .unwrap()
            .new_root;
        let root2 = state.set_balance(root1, addr, U256::from(250)).unwrap().new_root;

        assert_eq!(state.get_balance(root1, addr).unwrap(), U256::from(100));
        assert_eq!(state.get_balance(root2, addr).unwrap(), U256::from(250));
    }
}
