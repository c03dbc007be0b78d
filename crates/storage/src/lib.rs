//! Partition-local state and input adapters for iteration jobs.
//!
//! Architecture role:
//! - solution set store (hybrid hash table with bucket spill)
//! - cached dependency index probed by the head role
//! - record sources (memory, delimited text, parquet) and the input catalog

pub mod catalog;
pub mod dependency;
pub mod parquet_provider;
pub mod provider;
pub mod solution_set;

pub use catalog::*;
pub use dependency::DependencyIndex;
pub use parquet_provider::ParquetSource;
pub use provider::*;
pub use solution_set::{SolutionSetOptions, SolutionSetStore, SolutionSlot};
