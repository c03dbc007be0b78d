#![deny(missing_docs)]

//! Execution-layer primitives shared by every iteration role.
//!
//! Architecture role:
//! - positional record/value model
//! - key types, key specs and the deterministic key hash
//! - single-side and cross-side keyed comparators
//! - named aggregators and convergence criteria
//! - user function contracts invoked per round
//!
//! Key modules:
//! - [`record`]
//! - [`key`]
//! - [`comparator`]
//! - [`pair_comparator`]
//! - [`aggregators`]
//! - [`udf`]

pub mod aggregators;
pub mod comparator;
pub mod key;
pub mod pair_comparator;
pub mod record;
pub mod udf;

// Re-export only what you want at the crate root (no globs).
pub use aggregators::{
    AggregateSet, AggregateValue, AggregatorKind, AggregatorRegistration, BelowThreshold,
    ConvergenceCriterion, ConvergenceRegistration, NoUpdates, SOLUTION_UPDATES_AGGREGATOR,
    WORKSET_SIZE_AGGREGATOR, WorksetEmpty,
};
pub use comparator::{RecordComparator, TypeComparator};
pub use key::{Key, KeyHasher, KeySpec, KeyType, hash_keys};
pub use pair_comparator::{RecordPairComparator, TypePairComparator};
pub use record::{Record, Value};
pub use udf::{
    Collector, DependencyMatch, IdentityWorksetMap, IterationContext, SolutionSetUpdate,
    UpdateReduce, WorksetMap,
};
