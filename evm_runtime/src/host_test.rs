use ethereum_types::{Address, U256};
use smt_state::smt::{Smt, DEFAULT_ARITY};
use smt_state::state::StateTree;
use smt_state::store::MemoryStore;

use crate::evm::create_address;
use crate::host::TreeHost;
use crate::runtime::{
    Contract, ForksInTime, Host, TxContext, VmError, MAX_CALL_DEPTH,
};

fn new_state() -> StateTree<MemoryStore, MemoryStore> {
    let _ = pretty_env_logger::env_logger::builder()
        .is_test(true)
        .try_init();
    StateTree::new(
        Smt::new(MemoryStore::default(), DEFAULT_ARITY).unwrap(),
        MemoryStore::default(),
    )
}

fn new_host(state: &StateTree<MemoryStore, MemoryStore>, root: U256) -> TreeHost<'_, MemoryStore, MemoryStore> {
    TreeHost::new(state, root, TxContext::default(), ForksInTime::all())
}

fn call_frame(caller: Address, to: Address, value: U256, gas: u64, code: Vec<u8>) -> Contract {
    Contract::new_call(0, caller, caller, to, value, gas, code, Vec::new())
}

/// CALL(gas=0xffff, callee, value=0, no input, no output) followed by
/// `tail`.
fn call_code(callee: Address, opcode: u8, tail: &[u8]) -> Vec<u8> {
    let mut code = vec![0x60, 0x00, 0x60, 0x00, 0x60, 0x00, 0x60, 0x00];
    if opcode == 0xf1 {
        code.extend_from_slice(&[0x60, 0x00]); // value
    }
    code.push(0x73); // PUSH20
    code.extend_from_slice(callee.as_bytes());
    code.extend_from_slice(&[0x61, 0xff, 0xff, opcode]);
    code.extend_from_slice(tail);
    code
}

#[test]
fn test_call_transfers_value() {
    let state = new_state();
    let alice = Address::repeat_byte(0xa1);
    let bob = Address::repeat_byte(0xb0);

    let root = state
        .set_balance(U256::zero(), alice, U256::from(1000))
        .unwrap()
        .new_root;
    let mut host = new_host(&state, root);

    let frame = call_frame(alice, bob, U256::from(100), 50_000, Vec::new());
    let result = host.call(frame).unwrap();
    assert!(result.succeeded());
    assert_eq!(result.gas_left, 50_000);

    assert_eq!(host.get_balance(alice).unwrap(), U256::from(900));
    assert_eq!(host.get_balance(bob).unwrap(), U256::from(100));
    assert_ne!(host.root(), root);
    // The pre-transfer state is still reachable through the old root.
    assert_eq!(
        state.get_balance(root, alice).unwrap(),
        U256::from(1000)
    );
}

#[test]
fn test_insufficient_balance_fails_without_running() {
    let state = new_state();
    let alice = Address::repeat_byte(0xa1);
    let bob = Address::repeat_byte(0xb0);

    let mut host = new_host(&state, U256::zero());
    let frame = call_frame(alice, bob, U256::from(1), 50_000, Vec::new());
    let result = host.call(frame).unwrap();
    assert_eq!(result.err, Some(VmError::InsufficientBalance));
    assert_eq!(result.gas_left, 50_000);
    assert_eq!(host.root(), U256::zero());
}

#[test]
fn test_depth_limit() {
    let state = new_state();
    let mut host = new_host(&state, U256::zero());

    let mut frame = call_frame(
        Address::repeat_byte(0xa1),
        Address::repeat_byte(0xb0),
        U256::zero(),
        50_000,
        Vec::new(),
    );
    frame.depth = MAX_CALL_DEPTH + 1;
    let result = host.call(frame).unwrap();
    assert_eq!(result.err, Some(VmError::DepthExceeded));
    assert_eq!(result.gas_left, 50_000);
}

#[test]
fn test_sstore_advances_root() {
    let state = new_state();
    let addr = Address::repeat_byte(0xc0);
    // PUSH1 42; PUSH1 0; SSTORE; STOP
    let code = vec![0x60, 0x2a, 0x60, 0x00, 0x55, 0x00];
    let root = state.set_code(U256::zero(), addr, &code).unwrap().new_root;

    let mut host = new_host(&state, root);
    let frame = call_frame(Address::repeat_byte(0xa1), addr, U256::zero(), 50_000, code);
    let result = host.call(frame).unwrap();
    assert!(result.succeeded());

    assert_eq!(
        state
            .get_storage_at(host.root(), addr, U256::zero())
            .unwrap(),
        U256::from(42)
    );
    // The code leaf is untouched by the storage write.
    assert_eq!(state.get_code(host.root(), addr).unwrap().len(), 6);
}

#[test]
fn test_revert_rolls_back_state_and_logs() {
    let state = new_state();
    let addr = Address::repeat_byte(0xc0);
    // SSTORE 1 at 0; LOG0 over empty memory; REVERT with empty payload.
    let code = vec![
        0x60, 0x01, 0x60, 0x00, 0x55, // SSTORE
        0x60, 0x00, 0x60, 0x00, 0xa0, // LOG0
        0x60, 0x00, 0x60, 0x00, 0xfd, // REVERT
    ];
    let root = state.set_code(U256::zero(), addr, &code).unwrap().new_root;

    let mut host = new_host(&state, root);
    let frame = call_frame(Address::repeat_byte(0xa1), addr, U256::zero(), 50_000, code);
    let result = host.call(frame).unwrap();
    assert!(result.reverted());
    assert!(result.gas_left > 0, "revert must keep the remaining gas");

    assert_eq!(host.root(), root);
    assert!(host.logs().is_empty());
    assert_eq!(
        state.get_storage_at(root, addr, U256::zero()).unwrap(),
        U256::zero()
    );
}

#[test]
fn test_nested_call_writes_callee_storage() {
    let state = new_state();
    let caller = Address::repeat_byte(0xc0);
    let callee = Address::repeat_byte(0xee);

    // Callee stores 7 at slot 0.
    let callee_code = vec![0x60, 0x07, 0x60, 0x00, 0x55, 0x00];
    let caller_code = call_code(callee, 0xf1, &[0x00]);

    let mut root = state
        .set_code(U256::zero(), caller, &caller_code)
        .unwrap()
        .new_root;
    root = state.set_code(root, callee, &callee_code).unwrap().new_root;

    let mut host = new_host(&state, root);
    let frame = call_frame(
        Address::repeat_byte(0xa1),
        caller,
        U256::zero(),
        100_000,
        caller_code,
    );
    let result = host.call(frame).unwrap();
    assert!(result.succeeded());

    // The write landed under the callee's address, not the caller's.
    assert_eq!(
        state
            .get_storage_at(host.root(), callee, U256::zero())
            .unwrap(),
        U256::from(7)
    );
    assert_eq!(
        state
            .get_storage_at(host.root(), caller, U256::zero())
            .unwrap(),
        U256::zero()
    );
}

#[test]
fn test_staticcall_blocks_child_writes() {
    let state = new_state();
    let caller = Address::repeat_byte(0xc0);
    let callee = Address::repeat_byte(0xee);

    let callee_code = vec![0x60, 0x07, 0x60, 0x00, 0x55, 0x00];
    // STATICCALL, then return the status word.
    let caller_code = call_code(
        callee,
        0xfa,
        &[0x60, 0x00, 0x52, 0x60, 0x20, 0x60, 0x00, 0xf3],
    );

    let mut root = state
        .set_code(U256::zero(), caller, &caller_code)
        .unwrap()
        .new_root;
    root = state.set_code(root, callee, &callee_code).unwrap().new_root;

    let mut host = new_host(&state, root);
    let frame = call_frame(
        Address::repeat_byte(0xa1),
        caller,
        U256::zero(),
        100_000,
        caller_code,
    );
    let result = host.call(frame).unwrap();
    assert!(result.succeeded(), "only the child frame faults");
    assert_eq!(U256::from_big_endian(&result.return_value), U256::zero());
    assert_eq!(
        state
            .get_storage_at(host.root(), callee, U256::zero())
            .unwrap(),
        U256::zero()
    );
}

#[test]
fn test_create_deploys_code() {
    let state = new_state();
    let alice = Address::repeat_byte(0xa1);
    // Init code that returns a single STOP byte as the runtime code.
    let init = vec![0x60, 0x00, 0x60, 0x00, 0x53, 0x60, 0x01, 0x60, 0x00, 0xf3];

    let mut host = new_host(&state, U256::zero());
    let target = create_address(alice, 0);
    let frame = Contract::new_create(0, alice, alice, target, U256::zero(), 100_000, init);
    let result = host.call(frame).unwrap();
    assert!(result.succeeded(), "{:?}", result.err);
    assert_eq!(result.create_address, Some(target));
    assert_eq!(result.return_value, vec![0x00]);

    assert_eq!(state.get_code(host.root(), target).unwrap(), vec![0x00]);
    assert_eq!(host.get_nonce(alice).unwrap(), 1);
    // EIP-158 gives fresh contracts nonce 1.
    assert_eq!(host.get_nonce(target).unwrap(), 1);

    // 18 for the init code, 200 per deposited byte.
    assert_eq!(result.gas_used, 18 + 200);
}

#[test]
fn test_create_collision() {
    let state = new_state();
    let alice = Address::repeat_byte(0xa1);
    let target = create_address(alice, 0);

    let root = state
        .set_nonce(U256::zero(), target, U256::one())
        .unwrap()
        .new_root;
    let mut host = new_host(&state, root);
    let frame = Contract::new_create(0, alice, alice, target, U256::zero(), 100_000, Vec::new());
    let result = host.call(frame).unwrap();
    assert_eq!(result.err, Some(VmError::ContractAddressCollision));
    assert_eq!(result.gas_left, 0);
    assert_eq!(result.gas_used, 100_000);
}

#[test]
fn test_create_unpayable_deposit() {
    let state = new_state();
    let alice = Address::repeat_byte(0xa1);
    let init = vec![0x60, 0x00, 0x60, 0x00, 0x53, 0x60, 0x01, 0x60, 0x00, 0xf3];

    let mut host = new_host(&state, U256::zero());
    let target = create_address(alice, 0);
    // 100 gas runs the init code (18) but cannot pay the 200 deposit.
    let frame = Contract::new_create(0, alice, alice, target, U256::zero(), 100, init);
    let result = host.call(frame).unwrap();
    assert_eq!(result.err, Some(VmError::CodeStoreOutOfGas));
    assert_eq!(result.gas_left, 0, "all gas is consumed from Homestead on");

    assert!(state.get_code(host.root(), target).unwrap().is_empty());
    // The failed creation still burns the caller's nonce.
    assert_eq!(host.get_nonce(alice).unwrap(), 1);
    assert_eq!(host.get_nonce(target).unwrap(), 0);
}

#[test]
fn test_create_reverted_init_rolls_back() {
    let state = new_state();
    let alice = Address::repeat_byte(0xa1);
    // Init code: SSTORE then REVERT.
    let init = vec![
        0x60, 0x01, 0x60, 0x00, 0x55, 0x60, 0x00, 0x60, 0x00, 0xfd,
    ];

    let mut host = new_host(&state, U256::zero());
    let target = create_address(alice, 0);
    let frame = Contract::new_create(0, alice, alice, target, U256::zero(), 100_000, init);
    let result = host.call(frame).unwrap();
    assert!(result.reverted());

    assert_eq!(
        state
            .get_storage_at(host.root(), target, U256::zero())
            .unwrap(),
        U256::zero()
    );
    assert_eq!(host.get_nonce(target).unwrap(), 0);
    assert_eq!(host.get_nonce(alice).unwrap(), 1);
}

#[test]
fn test_selfdestruct_moves_balance_and_clears_code() {
    let state = new_state();
    let caller = Address::repeat_byte(0xa1);
    let addr = Address::repeat_byte(0xc0);
    let beneficiary = Address::repeat_byte(0xbe);

    let mut code = vec![0x73];
    code.extend_from_slice(beneficiary.as_bytes());
    code.push(0xff);

    let mut root = state.set_code(U256::zero(), addr, &code).unwrap().new_root;
    root = state
        .set_balance(root, addr, U256::from(500))
        .unwrap()
        .new_root;

    let mut host = new_host(&state, root);
    let frame = call_frame(caller, addr, U256::zero(), 50_000, code);
    let result = host.call(frame).unwrap();
    assert!(result.succeeded());

    assert_eq!(host.get_balance(beneficiary).unwrap(), U256::from(500));
    assert_eq!(host.get_balance(addr).unwrap(), U256::zero());
    assert!(host.get_code(addr).unwrap().is_empty());
}

#[test]
fn test_logs_survive_successful_frames() {
    let state = new_state();
    let addr = Address::repeat_byte(0xc0);
    // LOG0 over one memory byte, then STOP.
    let code = vec![0x60, 0x01, 0x60, 0x00, 0xa0, 0x00];
    let root = state.set_code(U256::zero(), addr, &code).unwrap().new_root;

    let mut host = new_host(&state, root);
    let frame = call_frame(Address::repeat_byte(0xa1), addr, U256::zero(), 50_000, code);
    let result = host.call(frame).unwrap();
    assert!(result.succeeded());

    let logs = host.take_logs();
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].address, addr);
    assert!(logs[0].topics.is_empty());
    assert_eq!(logs[0].data, vec![0x00]);
    assert!(host.logs().is_empty());
}
