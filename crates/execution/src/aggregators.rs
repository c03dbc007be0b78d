//! Named per-round aggregators and convergence criteria.
//!
//! Every partition accumulates its local [`AggregateSet`] during a round.
//! The barrier merges all partitions' sets with each aggregator's
//! associative combine and evaluates the registered criterion on the global
//! value of one aggregator.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use dfl_common::{DflError, Result, Round};
use serde::{Deserialize, Serialize};

/// Records handed to the next round's workset (LongSum).
pub const WORKSET_SIZE_AGGREGATOR: &str = "workset.size";
/// Solution set entries rewritten this round (LongSum).
pub const SOLUTION_UPDATES_AGGREGATOR: &str = "solution.updates";

/// Accumulation and combine rule of an aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregatorKind {
    /// Sum of integer contributions.
    LongSum,
    /// Sum of float contributions.
    DoubleSum,
    /// Number of contributions, regardless of their value.
    Count,
    /// Maximum of float contributions.
    DoubleMax,
}

impl AggregatorKind {
    /// Value of an aggregator nothing has contributed to.
    pub fn identity(self) -> AggregateValue {
        match self {
            AggregatorKind::LongSum | AggregatorKind::Count => AggregateValue::Long(0),
            AggregatorKind::DoubleSum => AggregateValue::Double(0.0),
            AggregatorKind::DoubleMax => AggregateValue::Double(f64::NEG_INFINITY),
        }
    }

    /// Fold one local contribution into `acc`.
    pub fn accumulate(self, acc: AggregateValue, value: AggregateValue) -> Result<AggregateValue> {
        match self {
            AggregatorKind::Count => Ok(AggregateValue::Long(checked_sum(self, acc.as_i64()?, 1)?)),
            _ => self.combine(acc, value),
        }
    }

    /// Associative combine of two partial aggregates.
    pub fn combine(self, a: AggregateValue, b: AggregateValue) -> Result<AggregateValue> {
        match self {
            AggregatorKind::LongSum | AggregatorKind::Count => Ok(AggregateValue::Long(
                checked_sum(self, a.as_i64()?, b.as_i64()?)?,
            )),
            AggregatorKind::DoubleSum => Ok(AggregateValue::Double(a.as_f64() + b.as_f64())),
            AggregatorKind::DoubleMax => Ok(AggregateValue::Double(a.as_f64().max(b.as_f64()))),
        }
    }
}

fn checked_sum(kind: AggregatorKind, a: i64, b: i64) -> Result<i64> {
    a.checked_add(b)
        .ok_or_else(|| DflError::Execution(format!("{kind:?} aggregate overflowed ({a} + {b})")))
}

/// Current value of one aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum AggregateValue {
    /// Integer aggregate.
    Long(i64),
    /// Float aggregate.
    Double(f64),
}

impl AggregateValue {
    /// Integer view; float aggregates are rejected.
    pub fn as_i64(self) -> Result<i64> {
        match self {
            AggregateValue::Long(v) => Ok(v),
            AggregateValue::Double(v) => Err(DflError::Execution(format!(
                "integer aggregate expected, found float {v}"
            ))),
        }
    }

    /// Float view; integer aggregates widen.
    pub fn as_f64(self) -> f64 {
        match self {
            AggregateValue::Long(v) => v as f64,
            AggregateValue::Double(v) => v,
        }
    }
}

impl fmt::Display for AggregateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AggregateValue::Long(v) => write!(f, "{v}"),
            AggregateValue::Double(v) => write!(f, "{v}"),
        }
    }
}

/// Named aggregator declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregatorRegistration {
    /// Aggregator name, unique per job.
    pub name: String,
    /// Combine rule.
    pub kind: AggregatorKind,
}

impl AggregatorRegistration {
    /// New declaration.
    pub fn new(name: impl Into<String>, kind: AggregatorKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Values of every registered aggregator, keyed by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateSet {
    values: BTreeMap<String, (AggregatorKind, AggregateValue)>,
}

impl AggregateSet {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set with each registration at its identity value.
    pub fn from_registrations<'a>(
        registrations: impl IntoIterator<Item = &'a AggregatorRegistration>,
    ) -> Self {
        let mut set = Self::new();
        for r in registrations {
            set.register(&r.name, r.kind);
        }
        set
    }

    /// Declare an aggregator; an existing one keeps its value.
    pub fn register(&mut self, name: &str, kind: AggregatorKind) {
        self.values
            .entry(name.to_string())
            .or_insert((kind, kind.identity()));
    }

    /// Fold `value` into the named aggregator.
    pub fn aggregate(&mut self, name: &str, value: AggregateValue) -> Result<()> {
        let (kind, acc) = self.values.get_mut(name).ok_or_else(|| {
            DflError::Execution(format!("aggregator '{name}' is not registered"))
        })?;
        *acc = kind.accumulate(*acc, value)?;
        Ok(())
    }

    /// Fold an integer contribution.
    pub fn add_long(&mut self, name: &str, value: i64) -> Result<()> {
        self.aggregate(name, AggregateValue::Long(value))
    }

    /// Fold a float contribution.
    pub fn add_double(&mut self, name: &str, value: f64) -> Result<()> {
        self.aggregate(name, AggregateValue::Double(value))
    }

    /// Current value of the named aggregator.
    pub fn get(&self, name: &str) -> Option<AggregateValue> {
        self.values.get(name).map(|(_, v)| *v)
    }

    /// Kind of the named aggregator.
    pub fn kind(&self, name: &str) -> Option<AggregatorKind> {
        self.values.get(name).map(|(k, _)| *k)
    }

    /// Combine another partition's set into this one.
    ///
    /// Names unknown here are adopted; the same name with a different kind
    /// is an execution error.
    pub fn merge(&mut self, other: &AggregateSet) -> Result<()> {
        for (name, (kind, value)) in &other.values {
            match self.values.get_mut(name) {
                Some((own_kind, acc)) => {
                    if own_kind != kind {
                        return Err(DflError::Execution(format!(
                            "aggregator '{name}' combined as {own_kind:?} and {kind:?}"
                        )));
                    }
                    *acc = kind.combine(*acc, *value)?;
                }
                None => {
                    self.values.insert(name.clone(), (*kind, *value));
                }
            }
        }
        Ok(())
    }

    /// Put every aggregator back to its identity.
    pub fn reset(&mut self) {
        for (kind, value) in self.values.values_mut() {
            *value = kind.identity();
        }
    }

    /// `(name, value)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, AggregateValue)> {
        self.values.iter().map(|(n, (_, v))| (n.as_str(), *v))
    }

    /// Number of aggregators.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Predicate over one globally combined aggregate.
pub trait ConvergenceCriterion: Send + Sync + fmt::Debug {
    /// Short name used in logs and explain output.
    fn name(&self) -> &str;
    /// Whether the iteration has converged after `round`.
    fn is_converged(&self, round: Round, value: AggregateValue) -> bool;
}

/// Converged when the aggregate is zero (typically `workset.size`).
#[derive(Debug, Clone, Copy, Default)]
pub struct WorksetEmpty;

impl ConvergenceCriterion for WorksetEmpty {
    fn name(&self) -> &str {
        "workset_empty"
    }

    fn is_converged(&self, _round: Round, value: AggregateValue) -> bool {
        value.as_f64() == 0.0
    }
}

/// Converged when the aggregate drops strictly below `threshold`.
#[derive(Debug, Clone, Copy)]
pub struct BelowThreshold {
    /// Exclusive upper bound.
    pub threshold: f64,
}

impl ConvergenceCriterion for BelowThreshold {
    fn name(&self) -> &str {
        "below_threshold"
    }

    fn is_converged(&self, _round: Round, value: AggregateValue) -> bool {
        value.as_f64() < self.threshold
    }
}

/// Converged when no solution entry changed (typically `solution.updates`).
#[derive(Debug, Clone, Copy, Default)]
pub struct NoUpdates;

impl ConvergenceCriterion for NoUpdates {
    fn name(&self) -> &str {
        "no_updates"
    }

    fn is_converged(&self, _round: Round, value: AggregateValue) -> bool {
        matches!(value, AggregateValue::Long(0))
    }
}

/// Criterion bound to the aggregator it reads.
#[derive(Debug, Clone)]
pub struct ConvergenceRegistration {
    /// Aggregator whose global value is tested.
    pub aggregator: String,
    /// Combine rule of that aggregator.
    pub kind: AggregatorKind,
    /// Predicate evaluated once per round.
    pub criterion: Arc<dyn ConvergenceCriterion>,
}

impl ConvergenceRegistration {
    /// Bind `criterion` to `aggregator`.
    pub fn new(
        aggregator: impl Into<String>,
        kind: AggregatorKind,
        criterion: Arc<dyn ConvergenceCriterion>,
    ) -> Self {
        Self {
            aggregator: aggregator.into(),
            kind,
            criterion,
        }
    }

    /// Stop once the next workset is empty.
    pub fn workset_empty() -> Self {
        Self::new(
            WORKSET_SIZE_AGGREGATOR,
            AggregatorKind::LongSum,
            Arc::new(WorksetEmpty),
        )
    }

    /// Stop once a round changes no solution entry.
    pub fn no_updates() -> Self {
        Self::new(
            SOLUTION_UPDATES_AGGREGATOR,
            AggregatorKind::LongSum,
            Arc::new(NoUpdates),
        )
    }

    /// Evaluate against a merged set; a missing aggregator never converges.
    pub fn evaluate(&self, round: Round, globals: &AggregateSet) -> bool {
        globals
            .get(&self.aggregator)
            .is_some_and(|v| self.criterion.is_converged(round, v))
    }
}
