//! Host backed by the sparse Merkle state tree.
//!
//! The host owns a working root that advances with every write and rolls
//! back to the frame's snapshot when a child frame reverts or faults. Logs
//! follow the same snapshot discipline. Tree errors surface as
//! [`HostError::State`] and abort the whole execution.

use std::collections::HashMap;

use ethereum_types::{Address, H256, U256};
use log::debug;
use smt_state::state::StateTree;
use smt_state::store::NodeStore;

use crate::evm::execute;
use crate::runtime::{
    CallKind, Contract, ExecutionResult, ForksInTime, Host, HostError, Log, StorageStatus,
    TxContext, VmError, CODE_DEPOSIT_GAS_PER_BYTE, MAX_CALL_DEPTH, MAX_CODE_SIZE,
};

pub struct TreeHost<'a, S, C> {
    state: &'a StateTree<S, C>,
    root: U256,
    tx: TxContext,
    forks: ForksInTime,
    logs: Vec<Log>,
    block_hashes: HashMap<u64, H256>,
}

impl<'a, S: NodeStore, C: NodeStore> TreeHost<'a, S, C> {
    pub fn new(state: &'a StateTree<S, C>, root: U256, tx: TxContext, forks: ForksInTime) -> Self {
        Self {
            state,
            root,
            tx,
            forks,
            logs: Vec::new(),
            block_hashes: HashMap::new(),
        }
    }

    /// Current state root, advanced by every committed write.
    pub fn root(&self) -> U256 {
        self.root
    }

    pub fn logs(&self) -> &[Log] {
        &self.logs
    }

    pub fn take_logs(&mut self) -> Vec<Log> {
        std::mem::take(&mut self.logs)
    }

    pub fn insert_block_hash(&mut self, number: u64, hash: H256) {
        self.block_hashes.insert(number, hash);
    }

    fn state_err(e: smt_state::smt::TreeError) -> HostError {
        HostError::State(e.to_string())
    }

    fn balance(&self, address: Address) -> Result<U256, HostError> {
        self.state
            .get_balance(self.root, address)
            .map_err(Self::state_err)
    }

    fn nonce(&self, address: Address) -> Result<U256, HostError> {
        self.state
            .get_nonce(self.root, address)
            .map_err(Self::state_err)
    }

    fn set_balance(&mut self, address: Address, balance: U256) -> Result<(), HostError> {
        self.root = self
            .state
            .set_balance(self.root, address, balance)
            .map_err(Self::state_err)?
            .new_root;
        Ok(())
    }

    fn set_nonce(&mut self, address: Address, nonce: U256) -> Result<(), HostError> {
        self.root = self
            .state
            .set_nonce(self.root, address, nonce)
            .map_err(Self::state_err)?
            .new_root;
        Ok(())
    }

    fn transfer(&mut self, from: Address, to: Address, value: U256) -> Result<bool, HostError> {
        if value.is_zero() {
            return Ok(true);
        }
        let from_balance = self.balance(from)?;
        if from_balance < value {
            return Ok(false);
        }
        self.set_balance(from, from_balance - value)?;
        let to_balance = self.balance(to)?;
        self.set_balance(to, to_balance + value)?;
        Ok(true)
    }

    fn apply_call(&mut self, contract: Contract) -> Result<ExecutionResult, HostError> {
        if contract.depth > MAX_CALL_DEPTH {
            return Ok(ExecutionResult::failure(
                VmError::DepthExceeded,
                contract.gas,
                0,
            ));
        }

        let snapshot = self.root;
        let log_mark = self.logs.len();

        // The transfer happens only for plain CALL; CALLCODE and
        // DELEGATECALL run foreign code against the caller's own account.
        if contract.kind == CallKind::Call
            && !self.transfer(contract.caller, contract.address, contract.value)?
        {
            return Ok(ExecutionResult::failure(
                VmError::InsufficientBalance,
                contract.gas,
                0,
            ));
        }

        let forks = self.forks;
        let result = execute(&contract, self, &forks)?;
        if result.failed() {
            self.root = snapshot;
            self.logs.truncate(log_mark);
        }
        Ok(result)
    }

    fn apply_create(&mut self, contract: Contract) -> Result<ExecutionResult, HostError> {
        let gas_limit = contract.gas;

        if contract.depth > MAX_CALL_DEPTH {
            return Ok(ExecutionResult::failure(
                VmError::DepthExceeded,
                gas_limit,
                0,
            ));
        }

        // A deployed contract or a used nonce at the target address makes
        // the creation fail outright, consuming all gas.
        let target_nonce = self.nonce(contract.address)?;
        let target_code_hash = self
            .state
            .get_code_hash(self.root, contract.address)
            .map_err(Self::state_err)?;
        if !target_nonce.is_zero() || !target_code_hash.is_zero() {
            return Ok(ExecutionResult::failure(
                VmError::ContractAddressCollision,
                0,
                gas_limit,
            ));
        }

        // The caller's nonce bump survives a failed init frame; only what
        // follows it is rolled back.
        let caller_nonce = self.nonce(contract.caller)?;
        self.set_nonce(contract.caller, caller_nonce + 1)?;

        let snapshot = self.root;
        let log_mark = self.logs.len();

        if self.forks.eip158 {
            self.set_nonce(contract.address, U256::one())?;
        }
        if !self.transfer(contract.caller, contract.address, contract.value)? {
            self.root = snapshot;
            return Ok(ExecutionResult::failure(
                VmError::InsufficientBalance,
                gas_limit,
                0,
            ));
        }

        let forks = self.forks;
        let mut result = execute(&contract, self, &forks)?;
        if result.failed() {
            self.root = snapshot;
            self.logs.truncate(log_mark);
            return Ok(result);
        }

        let code = std::mem::take(&mut result.return_value);

        if self.forks.eip158 && code.len() > MAX_CODE_SIZE {
            self.root = snapshot;
            self.logs.truncate(log_mark);
            return Ok(ExecutionResult::failure(
                VmError::MaxCodeSizeExceeded,
                0,
                gas_limit,
            ));
        }

        let deposit_gas = code.len() as u64 * CODE_DEPOSIT_GAS_PER_BYTE;
        if result.gas_left < deposit_gas {
            // Before Homestead an unpayable deposit kept the remaining gas.
            let gas_left = if self.forks.homestead {
                0
            } else {
                result.gas_left
            };
            self.root = snapshot;
            self.logs.truncate(log_mark);
            return Ok(ExecutionResult::failure(
                VmError::CodeStoreOutOfGas,
                gas_left,
                gas_limit - gas_left,
            ));
        }
        result.gas_left -= deposit_gas;
        result.gas_used += deposit_gas;

        self.set_code(contract.address, &code)?;
        debug!(
            "deployed {} bytes of code at {:?}",
            code.len(),
            contract.address
        );

        result.create_address = Some(contract.address);
        result.return_value = code;
        Ok(result)
    }
}

impl<S: NodeStore, C: NodeStore> Host for TreeHost<'_, S, C> {
    fn account_exists(&self, address: Address) -> Result<bool, HostError> {
        Ok(!self.empty(address)?)
    }

    fn empty(&self, address: Address) -> Result<bool, HostError> {
        let nonce = self.nonce(address)?;
        if !nonce.is_zero() {
            return Ok(false);
        }
        let balance = self.balance(address)?;
        if !balance.is_zero() {
            return Ok(false);
        }
        let code_hash = self
            .state
            .get_code_hash(self.root, address)
            .map_err(Self::state_err)?;
        Ok(code_hash.is_zero())
    }

    fn get_storage(&self, address: Address, key: U256) -> Result<U256, HostError> {
        self.state
            .get_storage_at(self.root, address, key)
            .map_err(Self::state_err)
    }

    fn set_storage(
        &mut self,
        address: Address,
        key: U256,
        value: U256,
        _config: &ForksInTime,
    ) -> Result<StorageStatus, HostError> {
        let current = self.get_storage(address, key)?;
        let status = StorageStatus::from_change(current, value);
        if status != StorageStatus::Unchanged {
            self.root = self
                .state
                .set_storage_at(self.root, address, key, value)
                .map_err(Self::state_err)?
                .new_root;
        }
        Ok(status)
    }

    fn get_balance(&self, address: Address) -> Result<U256, HostError> {
        self.balance(address)
    }

    fn get_code(&self, address: Address) -> Result<Vec<u8>, HostError> {
        self.state
            .get_code(self.root, address)
            .map_err(Self::state_err)
    }

    fn set_code(&mut self, address: Address, code: &[u8]) -> Result<(), HostError> {
        self.root = self
            .state
            .set_code(self.root, address, code)
            .map_err(Self::state_err)?
            .new_root;
        Ok(())
    }

    fn get_code_hash(&self, address: Address) -> Result<H256, HostError> {
        self.state
            .get_code_hash(self.root, address)
            .map_err(Self::state_err)
    }

    fn get_code_size(&self, address: Address) -> Result<usize, HostError> {
        self.state
            .get_code_size(self.root, address)
            .map_err(Self::state_err)
    }

    fn get_nonce(&self, address: Address) -> Result<u64, HostError> {
        Ok(self.nonce(address)?.low_u64())
    }

    fn selfdestruct(&mut self, address: Address, beneficiary: Address) -> Result<(), HostError> {
        let balance = self.balance(address)?;
        if !balance.is_zero() {
            // Self-destructing to oneself burns the balance.
            if beneficiary != address {
                let beneficiary_balance = self.balance(beneficiary)?;
                self.set_balance(beneficiary, beneficiary_balance + balance)?;
            }
            self.set_balance(address, U256::zero())?;
        }
        self.set_nonce(address, U256::zero())?;
        self.set_code(address, &[])?;
        Ok(())
    }

    fn get_tx_context(&self) -> TxContext {
        self.tx
    }

    fn get_block_hash(&self, number: u64) -> Result<H256, HostError> {
        Ok(self
            .block_hashes
            .get(&number)
            .copied()
            .unwrap_or_default())
    }

    fn emit_log(&mut self, address: Address, topics: Vec<H256>, data: Vec<u8>) {
        self.logs.push(Log {
            address,
            topics,
            data,
        });
    }

    fn call(&mut self, contract: Contract) -> Result<ExecutionResult, HostError> {
        if contract.kind.is_create() {
            self.apply_create(contract)
        } else {
            self.apply_call(contract)
        }
    }
}
