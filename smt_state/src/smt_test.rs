use ethereum_types::U256;
use rand::seq::SliceRandom;
use rand::{thread_rng, Rng};

use crate::smt::{Smt, TreeError, DEFAULT_ARITY};
use crate::store::{MemoryStore, NodeStore};

fn init_logger() {
    let _ = pretty_env_logger::env_logger::builder()
        .is_test(true)
        .try_init();
}

fn new_smt() -> Smt<MemoryStore> {
    init_logger();
    Smt::new(MemoryStore::default(), DEFAULT_ARITY).unwrap()
}

fn rand_key() -> U256 {
    // Keys live in the 160-bit address path space.
    U256(thread_rng().gen()) & ((U256::one() << 160) - 1)
}

#[test]
fn test_add_and_rem() {
    let smt = new_smt();

    let k = rand_key();
    let v = U256(thread_rng().gen());
    let root = smt.set(U256::zero(), k, v).unwrap().new_root;
    assert_eq!(smt.get(root, k).unwrap().value, v);

    let root = smt.set(root, k, U256::zero()).unwrap().new_root;
    assert_eq!(root, U256::zero());
}

#[test]
fn test_update_element() {
    let smt = new_smt();

    let k = rand_key();
    let v1 = U256(thread_rng().gen());
    let v2 = U256(thread_rng().gen());
    let root1 = smt.set(U256::zero(), k, v1).unwrap().new_root;
    let proof = smt.set(root1, k, v2).unwrap();
    assert_eq!(proof.old_value, v1);
    assert_eq!(smt.get(proof.new_root, k).unwrap().value, v2);

    let root = smt.set(proof.new_root, k, v1).unwrap().new_root;
    assert_eq!(root, root1);
}

#[test]
fn test_reinsert_same_value_is_noop() {
    let smt = new_smt();

    let k = rand_key();
    let v = U256(thread_rng().gen());
    let root1 = smt.set(U256::zero(), k, v).unwrap().new_root;
    let root2 = smt.set(root1, k, v).unwrap().new_root;
    assert_eq!(root1, root2);
}

#[test]
fn test_add_shared_element_2() {
    let smt = new_smt();

    let k1 = rand_key();
    let k2 = rand_key();
    assert_ne!(k1, k2, "Unlucky");
    let v1 = U256(thread_rng().gen());
    let v2 = U256(thread_rng().gen());
    let root = smt.set(U256::zero(), k1, v1).unwrap().new_root;
    let root = smt.set(root, k2, v2).unwrap().new_root;
    let root = smt.set(root, k1, U256::zero()).unwrap().new_root;
    let root = smt.set(root, k2, U256::zero()).unwrap().new_root;
    assert_eq!(root, U256::zero());
}

#[test]
fn test_add_remove_128() {
    let smt = new_smt();

    let mut root = U256::zero();
    let kvs = (0..128)
        .map(|_| {
            let k = rand_key();
            let v = U256(thread_rng().gen());
            root = smt.set(root, k, v).unwrap().new_root;
            (k, v)
        })
        .collect::<Vec<_>>();
    for &(k, v) in &kvs {
        root = smt.set(root, k, v).unwrap().new_root;
        assert_eq!(smt.get(root, k).unwrap().value, v);
    }
    for &(k, _) in &kvs {
        root = smt.set(root, k, U256::zero()).unwrap().new_root;
    }
    assert_eq!(root, U256::zero());
}

#[test]
fn test_insert_order_does_not_matter() {
    let smt = new_smt();

    let mut kvs = (0..64)
        .map(|_| (rand_key(), U256(thread_rng().gen())))
        .collect::<Vec<_>>();

    let mut root1 = U256::zero();
    for &(k, v) in &kvs {
        root1 = smt.set(root1, k, v).unwrap().new_root;
    }

    kvs.shuffle(&mut thread_rng());
    let mut root2 = U256::zero();
    for &(k, v) in &kvs {
        root2 = smt.set(root2, k, v).unwrap().new_root;
    }

    assert_eq!(root1, root2);
}

#[test]
fn test_delete_is_inverse_of_insert() {
    let smt = new_smt();

    let base = (0..64)
        .map(|_| (rand_key(), U256(thread_rng().gen())))
        .collect::<Vec<_>>();
    let mut extra = (0..32)
        .map(|_| (rand_key(), U256(thread_rng().gen())))
        .collect::<Vec<_>>();

    let mut root = U256::zero();
    for &(k, v) in &base {
        root = smt.set(root, k, v).unwrap().new_root;
    }
    let base_root = root;

    for &(k, v) in &extra {
        root = smt.set(root, k, v).unwrap().new_root;
    }
    assert_ne!(root, base_root);

    extra.shuffle(&mut thread_rng());
    for &(k, _) in &extra {
        root = smt.set(root, k, U256::zero()).unwrap().new_root;
    }
    assert_eq!(root, base_root);

    // The never-inserted state is still reachable through the old root.
    for &(k, v) in &base {
        assert_eq!(smt.get(base_root, k).unwrap().value, v);
    }
}

#[test]
fn test_add_element_similar_key() {
    let smt = new_smt();

    // Keys differing only in the second digit force a collision chain.
    let k1 = U256::zero();
    let k2 = U256::from(0x10);
    let k3 = U256::from(0x20);
    let v1 = U256::from(2);
    let v2 = U256::from(3);
    let root = smt.set(U256::zero(), k1, v1).unwrap().new_root;
    let root = smt.set(root, k2, v1).unwrap().new_root;
    let root = smt.set(root, k3, v2).unwrap().new_root;

    assert_eq!(smt.get(root, k1).unwrap().value, v1);
    assert_eq!(smt.get(root, k2).unwrap().value, v1);
    assert_eq!(smt.get(root, k3).unwrap().value, v2);

    // Deleting two of them collapses the chain back to a shallow leaf.
    let root = smt.set(root, k2, U256::zero()).unwrap().new_root;
    let root = smt.set(root, k3, U256::zero()).unwrap().new_root;
    let direct = smt.set(U256::zero(), k1, v1).unwrap().new_root;
    assert_eq!(root, direct);
}

#[test]
fn test_no_write_0() {
    let smt = new_smt();

    let k1 = rand_key();
    let k2 = rand_key();
    assert_ne!(k1, k2, "Unlucky");
    let v = U256(thread_rng().gen());
    let root = smt.set(U256::zero(), k1, v).unwrap().new_root;
    let root2 = smt.set(root, k2, U256::zero()).unwrap().new_root;
    assert_eq!(root2, root);
}

#[test]
fn test_get_absent_reports_divergent_leaf() {
    let smt = new_smt();

    let k1 = U256::from(0x5);
    let k2 = U256::from(0x5) | (U256::one() << 100);
    let v = U256(thread_rng().gen());
    let root = smt.set(U256::zero(), k1, v).unwrap().new_root;
    let root = smt.set(root, U256::from(0x6), U256::one()).unwrap().new_root;

    // k2 shares its first digit with k1, so the walk ends at k1's leaf.
    let proof = smt.get(root, k2).unwrap();
    assert_eq!(proof.value, U256::zero());
    assert!(!proof.is_old0);
    assert_eq!(proof.ins_key, k1);
    assert_eq!(proof.ins_value, v);

    // A key diverging at the first digit ends at an empty slot.
    let proof = smt.get(root, U256::from(0x7)).unwrap();
    assert_eq!(proof.value, U256::zero());
    assert!(proof.is_old0);
}

#[test]
fn test_update_proof_roots() {
    let smt = new_smt();

    let k = rand_key();
    let v = U256(thread_rng().gen());
    let proof = smt.set(U256::zero(), k, v).unwrap();
    assert_eq!(proof.old_root, U256::zero());
    assert_eq!(proof.old_value, U256::zero());
    assert_eq!(proof.new_value, v);
    assert_eq!(smt.get(proof.new_root, k).unwrap().value, v);
}

#[test]
fn test_invalid_arity_rejected() {
    for arity in [0, 1, 2, 6, 7, 9] {
        assert!(matches!(
            Smt::new(MemoryStore::default(), arity),
            Err(TreeError::InvalidArity(_))
        ));
    }
    for arity in [4, 5, 8] {
        assert!(Smt::new(MemoryStore::default(), arity).is_ok());
    }
}

#[test]
fn test_arity_8_round_trip() {
    let smt = Smt::new(MemoryStore::default(), 8).unwrap();

    let mut root = U256::zero();
    let kvs = (0..32)
        .map(|_| (rand_key(), U256(thread_rng().gen())))
        .collect::<Vec<_>>();
    for &(k, v) in &kvs {
        root = smt.set(root, k, v).unwrap().new_root;
    }
    for &(k, v) in &kvs {
        assert_eq!(smt.get(root, k).unwrap().value, v);
    }
    for &(k, _) in &kvs {
        root = smt.set(root, k, U256::zero()).unwrap().new_root;
    }
    assert_eq!(root, U256::zero());
}

#[test]
fn test_missing_node_is_storage_error() {
    let smt = new_smt();

    let k = rand_key();
    let v = U256(thread_rng().gen());
    let root = smt.set(U256::zero(), k, v).unwrap().new_root;

    // Same root against an empty store: the node is unresolvable, which
    // must surface as an error rather than "key absent".
    let pruned = Smt::new(MemoryStore::default(), DEFAULT_ARITY).unwrap();
    assert!(matches!(
        pruned.get(root, k),
        Err(TreeError::MissingNode(_))
    ));
}

#[test]
fn test_nodes_are_persisted_under_their_hash() {
    let smt = new_smt();

    let k = rand_key();
    let v = U256(thread_rng().gen());
    let root = smt.set(U256::zero(), k, v).unwrap().new_root;

    let bytes = smt.store().get(root).unwrap().unwrap();
    assert_eq!(bytes.len(), 16 * 32);
    assert_eq!(crate::smt::node_hash(
        &bytes
            .chunks_exact(32)
            .map(U256::from_big_endian)
            .collect::<Vec<_>>()
    ), root);
}
