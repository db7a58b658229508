#![allow(clippy::too_long_first_doc_paragraph)]

pub mod keys;
pub mod smt;
#[cfg(test)]
mod smt_test;
pub mod state;
pub mod store;
