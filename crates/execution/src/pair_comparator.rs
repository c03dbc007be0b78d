//! Cross-side key comparator for joins and probes.
//!
//! The reference side and the candidate side may keep the key at different
//! field positions (a solution record keyed at position 0 probed with a
//! dependency record keyed at position 1). Both position lists are fixed at
//! construction and must agree in length with the declared key types.

use std::cmp::Ordering;

use dfl_common::{DflError, Result};

use crate::key::{KeyHasher, KeyHolder, KeySpec, KeyType, holders_for};
use crate::record::Record;

/// Key comparison contract between two record shapes.
pub trait TypePairComparator<L, R>: Send {
    /// Capture the key of the reference-side record.
    fn set_reference(&mut self, reference: &L) -> Result<()>;
    /// Whether the candidate-side record carries the reference key.
    fn equal_to_reference(&mut self, candidate: &R) -> Result<bool>;
    /// Ordering of the candidate key relative to the reference key.
    fn compare_to_reference(&mut self, candidate: &R) -> Result<Ordering>;
    /// Independent comparator with the same configuration.
    fn duplicate(&self) -> Self
    where
        Self: Sized;
}

/// Pair comparator over two positional record layouts.
#[derive(Debug)]
pub struct RecordPairComparator {
    reference_positions: Vec<usize>,
    candidate_positions: Vec<usize>,
    types: Vec<KeyType>,
    reference: Vec<KeyHolder>,
    candidate: Vec<KeyHolder>,
    has_reference: bool,
}

impl RecordPairComparator {
    /// Build from per-side positions and the shared key types.
    pub fn new(reference: &[usize], candidate: &[usize], types: &[KeyType]) -> Result<Self> {
        if reference.len() != candidate.len() || reference.len() != types.len() {
            return Err(DflError::InvalidConfig(format!(
                "pair comparator key lists differ in length: reference={} candidate={} types={}",
                reference.len(),
                candidate.len(),
                types.len()
            )));
        }
        Ok(Self {
            reference_positions: reference.to_vec(),
            candidate_positions: candidate.to_vec(),
            types: types.to_vec(),
            reference: holders_for(types),
            candidate: holders_for(types),
            has_reference: false,
        })
    }

    /// Build from two key specs that must declare the same types.
    pub fn from_specs(reference: &KeySpec, candidate: &KeySpec) -> Result<Self> {
        if !reference.same_types(candidate) {
            return Err(DflError::InvalidConfig(format!(
                "pair comparator key types differ: reference={reference} candidate={candidate}"
            )));
        }
        Self::new(
            &reference.positions(),
            &candidate.positions(),
            &reference.types(),
        )
    }

    /// Key types shared by both sides.
    pub fn types(&self) -> &[KeyType] {
        &self.types
    }

    /// Hash of the captured reference key.
    ///
    /// Agrees with `RecordComparator::hash` on the same key values.
    pub fn reference_hash(&self) -> Result<u64> {
        self.require_reference()?;
        let mut hasher = KeyHasher::new();
        for holder in &self.reference {
            holder.write_hash(&mut hasher);
        }
        Ok(hasher.finish())
    }

    fn load_candidate(&mut self, record: &Record) -> Result<()> {
        for (holder, position) in self.candidate.iter_mut().zip(&self.candidate_positions) {
            holder.load(record, *position)?;
        }
        Ok(())
    }

    fn require_reference(&self) -> Result<()> {
        if self.has_reference {
            Ok(())
        } else {
            Err(DflError::Execution(
                "pair comparator used before set_reference".to_string(),
            ))
        }
    }
}

impl TypePairComparator<Record, Record> for RecordPairComparator {
    fn set_reference(&mut self, reference: &Record) -> Result<()> {
        self.has_reference = false;
        for (holder, position) in self.reference.iter_mut().zip(&self.reference_positions) {
            holder.load(reference, *position)?;
        }
        self.has_reference = true;
        Ok(())
    }

    fn equal_to_reference(&mut self, candidate: &Record) -> Result<bool> {
        self.require_reference()?;
        for i in 0..self.types.len() {
            self.candidate[i].load(candidate, self.candidate_positions[i])?;
            if self.candidate[i].cmp_holder(&self.reference[i]) != Ordering::Equal {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn compare_to_reference(&mut self, candidate: &Record) -> Result<Ordering> {
        self.require_reference()?;
        self.load_candidate(candidate)?;
        for (c, r) in self.candidate.iter().zip(self.reference.iter()) {
            let ord = c.cmp_holder(r);
            if ord != Ordering::Equal {
                return Ok(ord);
            }
        }
        Ok(Ordering::Equal)
    }

    fn duplicate(&self) -> Self {
        Self {
            reference_positions: self.reference_positions.clone(),
            candidate_positions: self.candidate_positions.clone(),
            types: self.types.clone(),
            reference: holders_for(&self.types),
            candidate: holders_for(&self.types),
            has_reference: false,
        }
    }
}
