//! Shared runtime types: call frames, fork configuration, execution results
//! and the host seam between the interpreter and the state tree.

use ethereum_types::{Address, H256, U256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const STACK_SIZE_LIMIT: usize = 1024;
pub const MAX_CALL_DEPTH: usize = 1024;

/// EIP-158 deployed code size cap.
pub const MAX_CODE_SIZE: usize = 24576;
pub const CODE_DEPOSIT_GAS_PER_BYTE: u64 = 200;

/// Interpreter faults. Every variant except `ExecutionReverted` consumes all
/// remaining gas in the faulting frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum VmError {
    #[error("out of gas")]
    OutOfGas,
    #[error("stack underflow")]
    StackUnderflow,
    #[error("stack overflow")]
    StackOverflow,
    #[error("opcode not found")]
    OpcodeNotFound,
    #[error("invalid jump destination")]
    InvalidJump,
    #[error("write protection")]
    WriteProtection,
    #[error("gas uint64 overflow")]
    GasUintOverflow,
    #[error("return data out of bounds")]
    ReturnDataOutOfBounds,
    #[error("max call depth exceeded")]
    DepthExceeded,
    #[error("contract address collision")]
    ContractAddressCollision,
    #[error("max code size exceeded")]
    MaxCodeSizeExceeded,
    #[error("contract creation code storage out of gas")]
    CodeStoreOutOfGas,
    #[error("insufficient balance for transfer")]
    InsufficientBalance,
    #[error("execution reverted")]
    ExecutionReverted,
}

/// A state access failure underneath the host. This is a hard error: it
/// aborts execution entirely instead of being converted into a fault, so
/// the engine never invents a value for state it could not read.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("state access failed: {0}")]
    State(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fork {
    Homestead,
    EIP150,
    EIP158,
    Byzantium,
    Constantinople,
    Petersburg,
    Istanbul,
}

/// Hard forks active for the execution. All flags default to off.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForksInTime {
    pub homestead: bool,
    pub eip150: bool,
    pub eip158: bool,
    pub byzantium: bool,
    pub constantinople: bool,
    pub petersburg: bool,
    pub istanbul: bool,
}

impl ForksInTime {
    pub fn all() -> Self {
        Self {
            homestead: true,
            eip150: true,
            eip158: true,
            byzantium: true,
            constantinople: true,
            petersburg: true,
            istanbul: true,
        }
    }

    pub fn active(&self, fork: Fork) -> bool {
        match fork {
            Fork::Homestead => self.homestead,
            Fork::EIP150 => self.eip150,
            Fork::EIP158 => self.eip158,
            Fork::Byzantium => self.byzantium,
            Fork::Constantinople => self.constantinople,
            Fork::Petersburg => self.petersburg,
            Fork::Istanbul => self.istanbul,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallKind {
    Call,
    CallCode,
    DelegateCall,
    StaticCall,
    Create,
    Create2,
}

impl CallKind {
    pub fn is_create(&self) -> bool {
        matches!(self, CallKind::Create | CallKind::Create2)
    }
}

/// A single execution frame.
#[derive(Clone, Debug)]
pub struct Contract {
    pub kind: CallKind,
    pub depth: usize,
    pub origin: Address,
    pub caller: Address,
    /// Storage and balance context.
    pub address: Address,
    /// Where the running code was loaded from; differs from `address` for
    /// CALLCODE and DELEGATECALL.
    pub code_address: Address,
    pub value: U256,
    pub gas: u64,
    pub input: Vec<u8>,
    pub code: Vec<u8>,
    pub is_static: bool,
}

impl Contract {
    #[allow(clippy::too_many_arguments)]
    pub fn new_call(
        depth: usize,
        origin: Address,
        caller: Address,
        to: Address,
        value: U256,
        gas: u64,
        code: Vec<u8>,
        input: Vec<u8>,
    ) -> Self {
        Self {
            kind: CallKind::Call,
            depth,
            origin,
            caller,
            address: to,
            code_address: to,
            value,
            gas,
            input,
            code,
            is_static: false,
        }
    }

    pub fn new_create(
        depth: usize,
        origin: Address,
        caller: Address,
        address: Address,
        value: U256,
        gas: u64,
        code: Vec<u8>,
    ) -> Self {
        Self {
            kind: CallKind::Create,
            depth,
            origin,
            caller,
            address,
            code_address: address,
            value,
            gas,
            input: Vec::new(),
            code,
            is_static: false,
        }
    }
}

/// Transaction-level context exposed to the running code.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxContext {
    pub gas_price: U256,
    pub origin: Address,
    pub coinbase: Address,
    pub number: u64,
    pub timestamp: u64,
    pub gas_limit: u64,
    pub chain_id: u64,
    pub difficulty: U256,
}

/// How an SSTORE changed the slot; drives its gas cost.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageStatus {
    Unchanged,
    Modified,
    Added,
    Deleted,
}

impl StorageStatus {
    pub fn from_change(current: U256, value: U256) -> Self {
        if current == value {
            StorageStatus::Unchanged
        } else if current.is_zero() {
            StorageStatus::Added
        } else if value.is_zero() {
            StorageStatus::Deleted
        } else {
            StorageStatus::Modified
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<H256>,
    pub data: Vec<u8>,
}

/// Outcome of running a frame. A fault leaves `gas_left` at zero; a revert
/// keeps the remaining gas and carries the revert payload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub return_value: Vec<u8>,
    pub gas_left: u64,
    pub gas_used: u64,
    pub err: Option<VmError>,
    pub create_address: Option<Address>,
}

impl ExecutionResult {
    pub fn failure(err: VmError, gas_left: u64, gas_used: u64) -> Self {
        Self {
            err: Some(err),
            gas_left,
            gas_used,
            ..Default::default()
        }
    }

    pub fn succeeded(&self) -> bool {
        self.err.is_none()
    }

    pub fn failed(&self) -> bool {
        self.err.is_some()
    }

    pub fn reverted(&self) -> bool {
        self.err == Some(VmError::ExecutionReverted)
    }
}

/// The seam between the interpreter and the state. Every mutating call is
/// immediately visible to subsequent reads through the same host.
pub trait Host {
    fn account_exists(&self, address: Address) -> Result<bool, HostError>;

    /// EIP-158 emptiness: zero nonce, zero balance, no code.
    fn empty(&self, address: Address) -> Result<bool, HostError>;

    fn get_storage(&self, address: Address, key: U256) -> Result<U256, HostError>;

    fn set_storage(
        &mut self,
        address: Address,
        key: U256,
        value: U256,
        config: &ForksInTime,
    ) -> Result<StorageStatus, HostError>;

    fn get_balance(&self, address: Address) -> Result<U256, HostError>;

    fn get_code(&self, address: Address) -> Result<Vec<u8>, HostError>;

    fn set_code(&mut self, address: Address, code: &[u8]) -> Result<(), HostError>;

    fn get_code_hash(&self, address: Address) -> Result<H256, HostError>;

    fn get_code_size(&self, address: Address) -> Result<usize, HostError>;

    fn get_nonce(&self, address: Address) -> Result<u64, HostError>;

    fn selfdestruct(&mut self, address: Address, beneficiary: Address) -> Result<(), HostError>;

    fn get_tx_context(&self) -> TxContext;

    /// Valid only for the previous 256 blocks; the interpreter pushes zero
    /// outside that window without asking.
    fn get_block_hash(&self, number: u64) -> Result<H256, HostError>;

    fn emit_log(&mut self, address: Address, topics: Vec<H256>, data: Vec<u8>);

    /// Recursive dispatch for the call and create families.
    fn call(&mut self, contract: Contract) -> Result<ExecutionResult, HostError>;
}
