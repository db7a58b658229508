//! The bytecode interpreter. One `VmState` per frame; nested calls go back
//! through the host, which re-enters [`execute`] for the child frame.
//!
//! Gas is charged before any effect: a failed charge leaves the stack,
//! memory and program counter untouched. Faults consume all remaining gas;
//! REVERT keeps it. Host errors abort the whole execution.

use ethereum_types::{Address, H256, U256};
use keccak_hash::keccak;
use log::trace;
use rlp::RlpStream;

use crate::opcodes::{inst_info, OpCode};
use crate::runtime::{
    CallKind, Contract, ExecutionResult, ForksInTime, Host, HostError, StorageStatus, VmError,
    STACK_SIZE_LIMIT,
};

const COPY_GAS_PER_WORD: u64 = 3;
const KECCAK_GAS_PER_WORD: u64 = 6;
const LOG_TOPIC_GAS: u64 = 375;
const LOG_DATA_GAS_PER_BYTE: u64 = 8;
const CALL_STIPEND: u64 = 2300;
const NEW_ACCOUNT_GAS: u64 = 25000;
const TRANSFER_GAS: u64 = 9000;

/// Memory ends past this can never be paid for; keeping the word count
/// below 2^32 also keeps the squared term of the expansion cost in u64.
const MAX_MEMORY_END: u64 = 0x1f_ffff_ffe0;

macro_rules! host_try {
    ($self:ident, $expr:expr) => {
        match $expr {
            Ok(v) => v,
            Err(e) => {
                $self.abort(e);
                return;
            }
        }
    };
}

/// Run `contract` to completion against `host`.
pub fn execute<H: Host>(
    contract: &Contract,
    host: &mut H,
    config: &ForksInTime,
) -> Result<ExecutionResult, HostError> {
    VmState::new(contract, host, config).run()
}

enum CallSetup {
    /// A fault was already recorded on the state.
    Fault,
    /// Push zero and refund the gas reserved for the child.
    InsufficientBalance(u64),
    Ready(Contract, usize, usize),
}

enum CreateSetup {
    Fault,
    InsufficientBalance,
    Ready(Contract),
}

enum CopySource {
    Input,
    Code,
}

struct VmState<'a, H> {
    contract: &'a Contract,
    host: &'a mut H,
    config: &'a ForksInTime,
    gas: u64,
    pc: usize,
    stack: Vec<U256>,
    memory: Vec<u8>,
    last_gas_cost: u64,
    jumpdests: Vec<bool>,
    /// RETURN/REVERT payload of this frame.
    ret: Vec<u8>,
    /// Return data of the most recent child call.
    return_data: Vec<u8>,
    jumped: bool,
    stopped: bool,
    err: Option<VmError>,
    fatal: Option<HostError>,
}

impl<'a, H: Host> VmState<'a, H> {
    fn new(contract: &'a Contract, host: &'a mut H, config: &'a ForksInTime) -> Self {
        Self {
            contract,
            host,
            config,
            gas: contract.gas,
            pc: 0,
            stack: Vec::with_capacity(32),
            memory: Vec::new(),
            last_gas_cost: 0,
            jumpdests: analyze_jumpdests(&contract.code),
            ret: Vec::new(),
            return_data: Vec::new(),
            jumped: false,
            stopped: false,
            err: None,
            fatal: None,
        }
    }

    fn run(mut self) -> Result<ExecutionResult, HostError> {
        let gas_limit = self.contract.gas;
        let code_size = self.contract.code.len();

        while !self.stopped {
            if self.pc >= code_size {
                break;
            }
            let Some(op) = OpCode::from_byte(self.contract.code[self.pc]) else {
                self.exit(VmError::OpcodeNotFound);
                break;
            };
            let info = inst_info(op);
            if let Some(fork) = info.min_fork {
                if !self.config.active(fork) {
                    self.exit(VmError::OpcodeNotFound);
                    break;
                }
            }
            if self.stack.len() < info.min_stack {
                self.exit(VmError::StackUnderflow);
                break;
            }
            if !self.consume_gas(info.base_gas) {
                break;
            }

            trace!("{} pc={} gas={}", op, self.pc, self.gas);

            self.jumped = false;
            self.step(op);

            if let Some(err) = self.fatal.take() {
                return Err(err);
            }
            if self.stack.len() > STACK_SIZE_LIMIT {
                self.exit(VmError::StackOverflow);
            }
            if !self.jumped {
                self.pc += 1;
            }
        }

        let gas_left = match self.err {
            None | Some(VmError::ExecutionReverted) => self.gas,
            Some(_) => 0,
        };
        Ok(ExecutionResult {
            return_value: self.ret,
            gas_left,
            gas_used: gas_limit - gas_left,
            err: self.err,
            create_address: None,
        })
    }

    fn step(&mut self, op: OpCode) {
        use OpCode::*;
        match op {
            Stop => self.stopped = true,
            Add => {
                let a = self.pop();
                let b = self.pop();
                self.push(a.overflowing_add(b).0);
            }
            Mul => {
                let a = self.pop();
                let b = self.pop();
                self.push(a.overflowing_mul(b).0);
            }
            Sub => {
                let a = self.pop();
                let b = self.pop();
                self.push(a.overflowing_sub(b).0);
            }
            Div => {
                let a = self.pop();
                let b = self.pop();
                self.push(if b.is_zero() { U256::zero() } else { a / b });
            }
            SDiv => {
                let a = self.pop();
                let b = self.pop();
                self.push(sdiv(a, b));
            }
            Mod => {
                let a = self.pop();
                let b = self.pop();
                self.push(if b.is_zero() { U256::zero() } else { a % b });
            }
            SMod => {
                let a = self.pop();
                let b = self.pop();
                self.push(smod(a, b));
            }
            AddMod => {
                let a = self.pop();
                let b = self.pop();
                let m = self.pop();
                self.push(addmod(a, b, m));
            }
            MulMod => {
                let a = self.pop();
                let b = self.pop();
                let m = self.pop();
                self.push(mulmod(a, b, m));
            }
            Exp => {
                let base = self.pop();
                let exponent = self.pop();
                let byte_gas = if self.config.eip158 { 50 } else { 10 };
                let exp_bytes = (exponent.bits() as u64 + 7) / 8;
                if !self.consume_gas(byte_gas * exp_bytes) {
                    return;
                }
                self.push(base.overflowing_pow(exponent).0);
            }
            SignExtend => {
                let ext = self.pop();
                let x = self.pop();
                self.push(sign_extend(ext, x));
            }
            Lt => {
                let a = self.pop();
                let b = self.pop();
                self.push(U256::from((a < b) as u8));
            }
            Gt => {
                let a = self.pop();
                let b = self.pop();
                self.push(U256::from((a > b) as u8));
            }
            SLt => {
                let a = self.pop();
                let b = self.pop();
                self.push(U256::from(slt(a, b) as u8));
            }
            SGt => {
                let a = self.pop();
                let b = self.pop();
                self.push(U256::from(slt(b, a) as u8));
            }
            Eq => {
                let a = self.pop();
                let b = self.pop();
                self.push(U256::from((a == b) as u8));
            }
            IsZero => {
                let a = self.pop();
                self.push(U256::from(a.is_zero() as u8));
            }
            And => {
                let a = self.pop();
                let b = self.pop();
                self.push(a & b);
            }
            Or => {
                let a = self.pop();
                let b = self.pop();
                self.push(a | b);
            }
            Xor => {
                let a = self.pop();
                let b = self.pop();
                self.push(a ^ b);
            }
            Not => {
                let a = self.pop();
                self.push(!a);
            }
            Byte => {
                let i = self.pop();
                let x = self.pop();
                let r = if i > U256::from(31) {
                    U256::zero()
                } else {
                    U256::from(x.byte(31 - i.low_u64() as usize))
                };
                self.push(r);
            }
            Shl => {
                let shift = self.pop();
                let value = self.pop();
                self.push(if shift >= U256::from(256) {
                    U256::zero()
                } else {
                    value << shift.low_u64() as usize
                });
            }
            Shr => {
                let shift = self.pop();
                let value = self.pop();
                self.push(if shift >= U256::from(256) {
                    U256::zero()
                } else {
                    value >> shift.low_u64() as usize
                });
            }
            Sar => {
                let shift = self.pop();
                let value = self.pop();
                self.push(sar(shift, value));
            }
            Keccak256 => {
                let offset = self.pop();
                let size = self.pop();
                let Some((o, s)) = self.mem_region(offset, size) else {
                    return;
                };
                if !self.consume_gas(words(s as u64) * KECCAK_GAS_PER_WORD) {
                    return;
                }
                let hash = keccak(&self.memory[o..o + s]);
                self.push(U256::from_big_endian(hash.as_bytes()));
            }
            Address => self.push(address_to_u256(self.contract.address)),
            Balance => {
                let addr = u256_to_address(self.pop());
                let gas = if self.config.istanbul {
                    700
                } else if self.config.eip150 {
                    400
                } else {
                    20
                };
                if !self.consume_gas(gas) {
                    return;
                }
                let balance = host_try!(self, self.host.get_balance(addr));
                self.push(balance);
            }
            Origin => self.push(address_to_u256(self.host.get_tx_context().origin)),
            Caller => self.push(address_to_u256(self.contract.caller)),
            CallValue => self.push(self.contract.value),
            CallDataLoad => {
                let offset = self.pop();
                let mut buf = [0u8; 32];
                copy_zero_padded(&mut buf, &self.contract.input, offset);
                self.push(U256::from_big_endian(&buf));
            }
            CallDataSize => self.push(U256::from(self.contract.input.len())),
            CallDataCopy => self.op_copy(CopySource::Input),
            CodeSize => self.push(U256::from(self.contract.code.len())),
            CodeCopy => self.op_copy(CopySource::Code),
            GasPrice => self.push(self.host.get_tx_context().gas_price),
            ExtCodeSize => {
                let addr = u256_to_address(self.pop());
                let gas = if self.config.eip150 { 700 } else { 20 };
                if !self.consume_gas(gas) {
                    return;
                }
                let size = host_try!(self, self.host.get_code_size(addr));
                self.push(U256::from(size));
            }
            ExtCodeCopy => self.op_ext_code_copy(),
            ReturnDataSize => self.push(U256::from(self.return_data.len())),
            ReturnDataCopy => self.op_return_data_copy(),
            ExtCodeHash => {
                let addr = u256_to_address(self.pop());
                let gas = if self.config.istanbul { 700 } else { 400 };
                if !self.consume_gas(gas) {
                    return;
                }
                let empty = host_try!(self, self.host.empty(addr));
                if empty {
                    self.push(U256::zero());
                } else {
                    let hash = host_try!(self, self.host.get_code_hash(addr));
                    self.push(U256::from_big_endian(hash.as_bytes()));
                }
            }
            BlockHash => {
                let n = self.pop();
                let last_block = self.host.get_tx_context().number;
                let in_window = n.bits() <= 64 && {
                    let n = n.low_u64();
                    n < last_block && last_block - n <= 256
                };
                if in_window {
                    let hash = host_try!(self, self.host.get_block_hash(n.low_u64()));
                    self.push(U256::from_big_endian(hash.as_bytes()));
                } else {
                    self.push(U256::zero());
                }
            }
            Coinbase => self.push(address_to_u256(self.host.get_tx_context().coinbase)),
            Timestamp => self.push(U256::from(self.host.get_tx_context().timestamp)),
            Number => self.push(U256::from(self.host.get_tx_context().number)),
            Difficulty => self.push(self.host.get_tx_context().difficulty),
            GasLimit => self.push(U256::from(self.host.get_tx_context().gas_limit)),
            ChainId => self.push(U256::from(self.host.get_tx_context().chain_id)),
            SelfBalance => {
                let balance = host_try!(self, self.host.get_balance(self.contract.address));
                self.push(balance);
            }
            Pop => {
                self.pop();
            }
            MLoad => {
                let offset = self.pop();
                if !self.check_memory(offset, U256::from(32)) {
                    return;
                }
                let o = offset.low_u64() as usize;
                self.push(U256::from_big_endian(&self.memory[o..o + 32]));
            }
            MStore => {
                let offset = self.pop();
                let value = self.pop();
                if !self.check_memory(offset, U256::from(32)) {
                    return;
                }
                let o = offset.low_u64() as usize;
                value.to_big_endian(&mut self.memory[o..o + 32]);
            }
            MStore8 => {
                let offset = self.pop();
                let value = self.pop();
                if !self.check_memory(offset, U256::one()) {
                    return;
                }
                self.memory[offset.low_u64() as usize] = value.byte(0);
            }
            SLoad => {
                let key = self.pop();
                let gas = if self.config.istanbul {
                    800
                } else if self.config.eip150 {
                    200
                } else {
                    50
                };
                if !self.consume_gas(gas) {
                    return;
                }
                let value = host_try!(self, self.host.get_storage(self.contract.address, key));
                self.push(value);
            }
            SStore => self.op_sstore(),
            Jump => {
                let dest = self.pop();
                self.do_jump(dest);
            }
            JumpI => {
                let dest = self.pop();
                let cond = self.pop();
                if !cond.is_zero() {
                    self.do_jump(dest);
                }
            }
            Pc => self.push(U256::from(self.pc)),
            MSize => self.push(U256::from(self.memory.len())),
            Gas => self.push(U256::from(self.gas)),
            JumpDest => {}
            Push(n) => {
                let n = n as usize;
                let code = &self.contract.code;
                let start = self.pc + 1;
                let available = code.len().saturating_sub(start).min(n);
                // Immediates truncated by the end of code are zero-filled.
                let mut buf = [0u8; 32];
                buf[..available].copy_from_slice(&code[start..start + available]);
                self.stack.push(U256::from_big_endian(&buf[..n]));
                self.pc += n;
            }
            Dup(n) => {
                let value = self.stack[self.stack.len() - n as usize];
                self.push(value);
            }
            Swap(n) => {
                let top = self.stack.len() - 1;
                self.stack.swap(top, top - n as usize);
            }
            Log(n) => self.op_log(n as usize),
            Create => self.op_create(CallKind::Create),
            Create2 => self.op_create(CallKind::Create2),
            Call => self.op_call(CallKind::Call),
            CallCode => self.op_call(CallKind::CallCode),
            DelegateCall => self.op_call(CallKind::DelegateCall),
            StaticCall => self.op_call(CallKind::StaticCall),
            Return => self.op_halt(false),
            Revert => self.op_halt(true),
            SelfDestruct => self.op_self_destruct(),
        }
    }

    // stack and gas plumbing

    fn exit(&mut self, err: VmError) {
        self.err = Some(err);
        self.stopped = true;
    }

    fn abort(&mut self, err: HostError) {
        self.fatal = Some(err);
        self.stopped = true;
    }

    fn push(&mut self, value: U256) {
        self.stack.push(value);
    }

    fn pop(&mut self) -> U256 {
        match self.stack.pop() {
            Some(value) => value,
            None => {
                self.exit(VmError::StackUnderflow);
                U256::zero()
            }
        }
    }

    fn consume_gas(&mut self, gas: u64) -> bool {
        if self.gas < gas {
            self.exit(VmError::OutOfGas);
            return false;
        }
        self.gas -= gas;
        true
    }

    // memory plumbing

    /// Charge quadratic expansion gas and grow memory to cover
    /// `offset..offset+size`. Only the delta against the largest expansion
    /// paid so far is charged.
    fn check_memory(&mut self, offset: U256, size: U256) -> bool {
        if size.is_zero() {
            return true;
        }
        if offset.bits() > 64 || size.bits() > 64 {
            self.exit(VmError::GasUintOverflow);
            return false;
        }
        let (end, overflow) = offset.low_u64().overflowing_add(size.low_u64());
        if overflow || end > MAX_MEMORY_END {
            self.exit(VmError::GasUintOverflow);
            return false;
        }
        if end as usize > self.memory.len() {
            let w = words(end);
            let new_cost = 3 * w + w * w / 512;
            if !self.consume_gas(new_cost - self.last_gas_cost) {
                return false;
            }
            self.last_gas_cost = new_cost;
            self.memory.resize((w * 32) as usize, 0);
        }
        true
    }

    /// `check_memory` plus the resolved `(offset, size)` pair.
    fn mem_region(&mut self, offset: U256, size: U256) -> Option<(usize, usize)> {
        if !self.check_memory(offset, size) {
            return None;
        }
        if size.is_zero() {
            return Some((0, 0));
        }
        Some((offset.low_u64() as usize, size.low_u64() as usize))
    }

    fn do_jump(&mut self, dest: U256) {
        let valid = dest.bits() <= 64
            && (dest.low_u64() as usize) < self.jumpdests.len()
            && self.jumpdests[dest.low_u64() as usize];
        if valid {
            self.pc = dest.low_u64() as usize;
            self.jumped = true;
        } else {
            self.exit(VmError::InvalidJump);
        }
    }

    // dynamic-gas instructions

    fn op_copy(&mut self, source: CopySource) {
        let mem_offset = self.pop();
        let data_offset = self.pop();
        let length = self.pop();

        let Some((o, s)) = self.mem_region(mem_offset, length) else {
            return;
        };
        if !self.consume_gas(words(s as u64) * COPY_GAS_PER_WORD) {
            return;
        }
        if s == 0 {
            return;
        }
        let contract = self.contract;
        let data: &[u8] = match source {
            CopySource::Input => &contract.input,
            CopySource::Code => &contract.code,
        };
        copy_zero_padded(&mut self.memory[o..o + s], data, data_offset);
    }

    fn op_ext_code_copy(&mut self) {
        let addr = u256_to_address(self.pop());
        let mem_offset = self.pop();
        let code_offset = self.pop();
        let length = self.pop();

        let Some((o, s)) = self.mem_region(mem_offset, length) else {
            return;
        };
        if !self.consume_gas(words(s as u64) * COPY_GAS_PER_WORD) {
            return;
        }
        let account_gas = if self.config.eip150 { 700 } else { 20 };
        if !self.consume_gas(account_gas) {
            return;
        }
        let code = host_try!(self, self.host.get_code(addr));
        if s != 0 {
            copy_zero_padded(&mut self.memory[o..o + s], &code, code_offset);
        }
    }

    fn op_return_data_copy(&mut self) {
        let mem_offset = self.pop();
        let data_offset = self.pop();
        let length = self.pop();

        let Some((o, s)) = self.mem_region(mem_offset, length) else {
            return;
        };
        if !self.consume_gas(words(s as u64) * COPY_GAS_PER_WORD) {
            return;
        }
        // Unlike the other copies, reading past the end of the return data
        // is a fault rather than zero-fill.
        let (end, overflow) = data_offset.overflowing_add(length);
        if overflow || end.bits() > 64 || end.low_u64() as usize > self.return_data.len() {
            self.exit(VmError::ReturnDataOutOfBounds);
            return;
        }
        if s == 0 {
            return;
        }
        let start = data_offset.low_u64() as usize;
        self.memory[o..o + s].copy_from_slice(&self.return_data[start..start + s]);
    }

    fn op_sstore(&mut self) {
        if self.contract.is_static {
            self.exit(VmError::WriteProtection);
            return;
        }
        // EIP-2200 sentry.
        if self.config.istanbul && self.gas <= 2300 {
            self.exit(VmError::OutOfGas);
            return;
        }

        let key = self.pop();
        let value = self.pop();

        // Classify off the current value and charge first; the slot is only
        // written once the gas is paid.
        let current = host_try!(self, self.host.get_storage(self.contract.address, key));
        let status = StorageStatus::from_change(current, value);

        let legacy_metering =
            !self.config.istanbul && (self.config.petersburg || !self.config.constantinople);
        let cost = match status {
            StorageStatus::Unchanged => {
                if self.config.istanbul {
                    800
                } else if legacy_metering {
                    5000
                } else {
                    200
                }
            }
            StorageStatus::Modified => 5000,
            StorageStatus::Added => 20000,
            StorageStatus::Deleted => 5000,
        };
        if !self.consume_gas(cost) {
            return;
        }
        if status != StorageStatus::Unchanged {
            host_try!(
                self,
                self.host
                    .set_storage(self.contract.address, key, value, self.config)
            );
        }
    }

    fn op_log(&mut self, n_topics: usize) {
        if self.contract.is_static {
            self.exit(VmError::WriteProtection);
            return;
        }
        let m_start = self.pop();
        let m_size = self.pop();
        let mut topics = Vec::with_capacity(n_topics);
        for _ in 0..n_topics {
            topics.push(u256_to_h256(self.pop()));
        }
        let Some((o, s)) = self.mem_region(m_start, m_size) else {
            return;
        };
        if !self.consume_gas(n_topics as u64 * LOG_TOPIC_GAS) {
            return;
        }
        if !self.consume_gas(s as u64 * LOG_DATA_GAS_PER_BYTE) {
            return;
        }
        let data = self.memory[o..o + s].to_vec();
        self.host.emit_log(self.contract.address, topics, data);
    }

    fn op_halt(&mut self, revert: bool) {
        let offset = self.pop();
        let size = self.pop();
        let Some((o, s)) = self.mem_region(offset, size) else {
            return;
        };
        self.ret = self.memory[o..o + s].to_vec();
        if revert {
            self.exit(VmError::ExecutionReverted);
        } else {
            self.stopped = true;
        }
    }

    fn op_self_destruct(&mut self) {
        if self.contract.is_static {
            self.exit(VmError::WriteProtection);
            return;
        }
        let beneficiary = u256_to_address(self.pop());

        let mut gas = 0;
        if self.config.eip150 {
            gas = 5000;
            if self.config.eip158 {
                let empty = host_try!(self, self.host.empty(beneficiary));
                let balance = host_try!(self, self.host.get_balance(self.contract.address));
                if empty && !balance.is_zero() {
                    gas += NEW_ACCOUNT_GAS;
                }
            } else {
                let exists = host_try!(self, self.host.account_exists(beneficiary));
                if !exists {
                    gas += NEW_ACCOUNT_GAS;
                }
            }
        }
        if !self.consume_gas(gas) {
            return;
        }
        host_try!(
            self,
            self.host.selfdestruct(self.contract.address, beneficiary)
        );
        self.stopped = true;
    }

    // call and create families

    fn op_call(&mut self, kind: CallKind) {
        self.return_data.clear();

        if kind == CallKind::Call && self.contract.is_static {
            let value = self.stack[self.stack.len() - 3];
            if !value.is_zero() {
                self.exit(VmError::WriteProtection);
                return;
            }
        }

        let setup = match self.build_call_contract(kind) {
            Ok(setup) => setup,
            Err(e) => {
                self.abort(e);
                return;
            }
        };
        let (contract, ret_offset, ret_size) = match setup {
            CallSetup::Fault => return,
            CallSetup::InsufficientBalance(child_gas) => {
                self.gas += child_gas;
                self.push(U256::zero());
                return;
            }
            CallSetup::Ready(contract, ret_offset, ret_size) => (contract, ret_offset, ret_size),
        };

        let result = host_try!(self, self.host.call(contract));

        self.push(U256::from(result.succeeded() as u8));
        // A zero-sized return window was never charged for, so its offset
        // may lie past the end of memory.
        if (result.succeeded() || result.reverted())
            && ret_size > 0
            && !result.return_value.is_empty()
        {
            let n = ret_size.min(result.return_value.len());
            self.memory[ret_offset..ret_offset + n].copy_from_slice(&result.return_value[..n]);
        }
        self.gas += result.gas_left;
        self.return_data = result.return_value;
    }

    fn build_call_contract(&mut self, kind: CallKind) -> Result<CallSetup, HostError> {
        let requested_gas = self.pop();
        let addr = u256_to_address(self.pop());
        let value = if matches!(kind, CallKind::Call | CallKind::CallCode) {
            self.pop()
        } else {
            U256::zero()
        };
        let in_offset = self.pop();
        let in_size = self.pop();
        let ret_offset = self.pop();
        let ret_size = self.pop();

        let args = match self.mem_region(in_offset, in_size) {
            Some((o, s)) => self.memory[o..o + s].to_vec(),
            None => return Ok(CallSetup::Fault),
        };
        if !self.check_memory(ret_offset, ret_size) {
            return Ok(CallSetup::Fault);
        }

        let mut gas_cost: u64 = if self.config.eip150 { 700 } else { 40 };
        let transfers_value =
            matches!(kind, CallKind::Call | CallKind::CallCode) && !value.is_zero();

        if kind == CallKind::Call {
            if self.config.eip158 {
                if transfers_value && self.host.empty(addr)? {
                    gas_cost += NEW_ACCOUNT_GAS;
                }
            } else if !self.host.account_exists(addr)? {
                gas_cost += NEW_ACCOUNT_GAS;
            }
        }
        if transfers_value {
            gas_cost += TRANSFER_GAS;
        }

        let fits = requested_gas.bits() <= 64;
        let gas = if self.config.eip150 {
            // All but one 64th of what remains after the upfront cost.
            let available = self.gas.saturating_sub(gas_cost);
            let available = available - available / 64;
            if !fits || available < requested_gas.low_u64() {
                available
            } else {
                requested_gas.low_u64()
            }
        } else {
            if !fits {
                self.exit(VmError::GasUintOverflow);
                return Ok(CallSetup::Fault);
            }
            requested_gas.low_u64()
        };

        if !self.consume_gas(gas_cost) || !self.consume_gas(gas) {
            return Ok(CallSetup::Fault);
        }
        let gas = if transfers_value {
            gas + CALL_STIPEND
        } else {
            gas
        };

        let code = self.host.get_code(addr)?;
        let parent = self.contract;
        let mut contract = Contract::new_call(
            parent.depth + 1,
            parent.origin,
            parent.address,
            addr,
            value,
            gas,
            code,
            args,
        );
        contract.kind = kind;
        if kind == CallKind::StaticCall || parent.is_static {
            contract.is_static = true;
        }
        if matches!(kind, CallKind::CallCode | CallKind::DelegateCall) {
            contract.address = parent.address;
            if kind == CallKind::DelegateCall {
                contract.value = parent.value;
                contract.caller = parent.caller;
            }
        }

        if transfers_value && self.host.get_balance(parent.address)? < value {
            return Ok(CallSetup::InsufficientBalance(contract.gas));
        }
        Ok(CallSetup::Ready(
            contract,
            ret_offset.low_u64() as usize,
            ret_size.low_u64() as usize,
        ))
    }

    fn op_create(&mut self, kind: CallKind) {
        if self.contract.is_static {
            self.exit(VmError::WriteProtection);
            return;
        }
        self.return_data.clear();

        let setup = match self.build_create_contract(kind) {
            Ok(setup) => setup,
            Err(e) => {
                self.abort(e);
                return;
            }
        };
        let contract = match setup {
            CreateSetup::Fault => return,
            CreateSetup::InsufficientBalance => {
                self.push(U256::zero());
                return;
            }
            CreateSetup::Ready(contract) => contract,
        };
        let address = contract.address;

        let result = host_try!(self, self.host.call(contract));

        // CREATE2 pushes zero on any child failure. For CREATE, a failed
        // code deposit only counts as a failure from Homestead on.
        let push_zero = match result.err {
            Some(VmError::CodeStoreOutOfGas) if kind == CallKind::Create => self.config.homestead,
            _ => result.failed(),
        };
        if push_zero {
            self.push(U256::zero());
        } else {
            self.push(address_to_u256(address));
        }

        self.gas += result.gas_left;
        if result.reverted() {
            self.return_data = result.return_value;
        }
    }

    fn build_create_contract(&mut self, kind: CallKind) -> Result<CreateSetup, HostError> {
        let value = self.pop();
        let offset = self.pop();
        let length = self.pop();
        let salt = if kind == CallKind::Create2 {
            self.pop()
        } else {
            U256::zero()
        };

        let init_code = match self.mem_region(offset, length) {
            Some((o, s)) => self.memory[o..o + s].to_vec(),
            None => return Ok(CreateSetup::Fault),
        };

        if !value.is_zero() && self.host.get_balance(self.contract.address)? < value {
            return Ok(CreateSetup::InsufficientBalance);
        }

        if kind == CallKind::Create2 {
            let word_count = words(init_code.len() as u64);
            if !self.consume_gas(word_count * KECCAK_GAS_PER_WORD) {
                return Ok(CreateSetup::Fault);
            }
        }

        let mut gas = self.gas;
        if self.config.eip150 || kind == CallKind::Create2 {
            gas -= gas / 64;
        }
        if !self.consume_gas(gas) {
            return Ok(CreateSetup::Fault);
        }

        let address = if kind == CallKind::Create {
            let nonce = self.host.get_nonce(self.contract.address)?;
            create_address(self.contract.address, nonce)
        } else {
            create2_address(self.contract.address, salt, &init_code)
        };
        let mut contract = Contract::new_create(
            self.contract.depth + 1,
            self.contract.origin,
            self.contract.address,
            address,
            value,
            gas,
            init_code,
        );
        contract.kind = kind;
        contract.is_static = self.contract.is_static;
        Ok(CreateSetup::Ready(contract))
    }
}

/// Positions of the JUMPDEST markers, skipping PUSH immediates.
fn analyze_jumpdests(code: &[u8]) -> Vec<bool> {
    let mut bitmap = vec![false; code.len()];
    let mut i = 0;
    while i < code.len() {
        let byte = code[i];
        if byte == 0x5b {
            bitmap[i] = true;
        }
        if (0x60..=0x7f).contains(&byte) {
            i += (byte - 0x60 + 2) as usize;
        } else {
            i += 1;
        }
    }
    bitmap
}

/// Copy `data[offset..]` into `dst`, zero-filling whatever the source
/// cannot cover.
fn copy_zero_padded(dst: &mut [u8], data: &[u8], offset: U256) {
    let begin = if offset.bits() > 64 {
        data.len()
    } else {
        (offset.low_u64() as usize).min(data.len())
    };
    let copied = (data.len() - begin).min(dst.len());
    dst[..copied].copy_from_slice(&data[begin..begin + copied]);
    for byte in &mut dst[copied..] {
        *byte = 0;
    }
}

fn words(bytes: u64) -> u64 {
    (bytes + 31) / 32
}

fn is_neg(x: U256) -> bool {
    x.bit(255)
}

fn twos_complement(x: U256) -> U256 {
    (!x).overflowing_add(U256::one()).0
}

fn sdiv(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::zero();
    }
    let negate = is_neg(a) != is_neg(b);
    let a_abs = if is_neg(a) { twos_complement(a) } else { a };
    let b_abs = if is_neg(b) { twos_complement(b) } else { b };
    let q = a_abs / b_abs;
    if negate {
        twos_complement(q)
    } else {
        q
    }
}

/// Result takes the sign of the dividend.
fn smod(a: U256, b: U256) -> U256 {
    if b.is_zero() {
        return U256::zero();
    }
    let a_abs = if is_neg(a) { twos_complement(a) } else { a };
    let b_abs = if is_neg(b) { twos_complement(b) } else { b };
    let r = a_abs % b_abs;
    if is_neg(a) {
        twos_complement(r)
    } else {
        r
    }
}

fn addmod(a: U256, b: U256, m: U256) -> U256 {
    if m.is_zero() {
        return U256::zero();
    }
    let sum = ethereum_types::U512::from(a) + ethereum_types::U512::from(b);
    u512_to_u256(sum % ethereum_types::U512::from(m))
}

fn mulmod(a: U256, b: U256, m: U256) -> U256 {
    if m.is_zero() {
        return U256::zero();
    }
    u512_to_u256(a.full_mul(b) % ethereum_types::U512::from(m))
}

fn u512_to_u256(x: ethereum_types::U512) -> U256 {
    // The callers guarantee the value has been reduced below 2^256.
    let mut bytes = [0u8; 64];
    x.to_big_endian(&mut bytes);
    U256::from_big_endian(&bytes[32..])
}

fn sign_extend(ext: U256, x: U256) -> U256 {
    if ext >= U256::from(31) {
        return x;
    }
    let bit = ext.low_u64() as usize * 8 + 7;
    let mask = (U256::one() << (bit + 1)) - 1;
    if x.bit(bit) {
        x | !mask
    } else {
        x & mask
    }
}

fn slt(a: U256, b: U256) -> bool {
    match (is_neg(a), is_neg(b)) {
        (true, false) => true,
        (false, true) => false,
        // Two's complement ordering agrees with unsigned within a sign.
        _ => a < b,
    }
}

fn sar(shift: U256, value: U256) -> U256 {
    if shift >= U256::from(256) {
        return if is_neg(value) { U256::MAX } else { U256::zero() };
    }
    let s = shift.low_u64() as usize;
    if s == 0 {
        return value;
    }
    let shifted = value >> s;
    if is_neg(value) {
        shifted | (U256::MAX << (256 - s))
    } else {
        shifted
    }
}

/// keccak(rlp([sender, nonce]))[12..].
pub fn create_address(sender: Address, nonce: u64) -> Address {
    let mut stream = RlpStream::new_list(2);
    stream.append(&sender);
    stream.append(&nonce);
    let hash = keccak(stream.out());
    Address::from_slice(&hash.as_bytes()[12..])
}

/// keccak(0xff ++ sender ++ salt ++ keccak(init_code))[12..].
pub fn create2_address(sender: Address, salt: U256, init_code: &[u8]) -> Address {
    let mut salt_bytes = [0u8; 32];
    salt.to_big_endian(&mut salt_bytes);
    let mut buf = Vec::with_capacity(85);
    buf.push(0xff);
    buf.extend_from_slice(sender.as_bytes());
    buf.extend_from_slice(&salt_bytes);
    buf.extend_from_slice(keccak(init_code).as_bytes());
    Address::from_slice(&keccak(&buf).as_bytes()[12..])
}

fn u256_to_address(value: U256) -> Address {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    Address::from_slice(&bytes[12..])
}

fn u256_to_h256(value: U256) -> H256 {
    let mut bytes = [0u8; 32];
    value.to_big_endian(&mut bytes);
    H256(bytes)
}

fn address_to_u256(address: Address) -> U256 {
    U256::from_big_endian(address.as_bytes())
}
