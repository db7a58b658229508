#![allow(clippy::too_long_first_doc_paragraph)]

pub mod evm;
pub mod host;
#[cfg(test)]
mod host_test;
pub mod opcodes;
pub mod runtime;
