use thiserror::Error;

/// Canonical deltaflow error taxonomy used across crates.
///
/// Classification guidance:
/// - [`DflError::InvalidConfig`]: required inputs or parameters missing or inconsistent,
///   detected before (or at the very start of) execution
/// - [`DflError::Planning`]: iteration graph or key-spec shape problems found while building a plan
/// - [`DflError::MissingKeyField`] / [`DflError::KeyTypeMismatch`]: schema mismatch between a
///   record producer and the key layout a consumer declared
/// - [`DflError::Execution`]: runtime protocol or invariant failures inside a round
/// - [`DflError::Io`]: raw filesystem failures, e.g. spill storage unavailable
///
/// Every variant is fatal for the run. Memory pressure is handled by spilling and is
/// never reported through this type.
#[derive(Debug, Error)]
pub enum DflError {
    /// Invalid or inconsistent job configuration.
    ///
    /// Examples:
    /// - dependency set, initial workset, initial solution set or convergence criterion missing
    /// - duplicate key in the initial solution set
    /// - workset key that does not exist in the solution set
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Plan construction failures.
    ///
    /// Examples:
    /// - key specs of joined sides with different arity or types
    /// - a role node without the inputs its role requires
    #[error("planning error: {0}")]
    Planning(String),

    /// A record that must carry a key value at `position` does not.
    #[error("missing key field at position {position}")]
    MissingKeyField {
        /// Field position declared by the key spec.
        position: usize,
    },

    /// A key field holds a value of a different type than declared.
    #[error("key field at position {position} has type {found}, expected {expected}")]
    KeyTypeMismatch {
        /// Field position declared by the key spec.
        position: usize,
        /// Declared key type.
        expected: String,
        /// Type found in the record.
        found: String,
    },

    /// Runtime failures after planning succeeded.
    ///
    /// Examples:
    /// - stale solution-set slot used for an update
    /// - exchange gate or barrier protocol violations
    /// - spill file decode failures
    #[error("execution error: {0}")]
    Execution(String),

    /// Transparent std IO failures.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Standard deltaflow result alias.
pub type Result<T> = std::result::Result<T, DflError>;
