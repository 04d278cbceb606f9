//! Coverage-guided greybox fuzzing core for EVM smart contracts.
//!
//! The crate explores a deployed contract's runtime bytecode by repeatedly
//! generating transaction inputs, executing them against an in-process EVM
//! (consumed through [`executor::TargetExecutor`]), observing branch
//! coverage and comparison distances, and steering subsequent inputs toward
//! uncovered branches and known vulnerability patterns.

pub mod abi;
pub mod config;
pub mod r#const;
pub mod contract_utils;
pub mod corpus;
pub mod executor;
pub mod feedback;
pub mod fuzzer;
pub mod input;
pub mod logger;
pub mod mutation_utils;
pub mod mutator;
pub mod oracle;
pub mod scheduler;
pub mod state;
pub mod telemetry;
pub mod types;
pub mod utils;

#[cfg(test)]
pub mod test_utils;
