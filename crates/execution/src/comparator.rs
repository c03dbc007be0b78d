//! Single-side keyed record comparator.
//!
//! A [`RecordComparator`] owns two private holder sets. The reference set
//! is filled by `set_reference`; the candidate set is refilled on every
//! `equal_to_reference` / `compare_to_reference` call. Neither is exposed,
//! and `duplicate` hands out a comparator with the same key configuration
//! but fresh holders, so each worker replica owns its own copy.

use std::cmp::Ordering;

use dfl_common::{DflError, Result};

use crate::key::{Key, KeyHasher, KeyHolder, KeySpec, cmp_values, holders_for, key_field};
use crate::record::Record;

/// Key comparison contract over one record type.
pub trait TypeComparator<T>: Send {
    /// Capture the key of `reference` for subsequent comparisons.
    fn set_reference(&mut self, reference: &T) -> Result<()>;
    /// Whether `candidate` carries the same key as the reference.
    fn equal_to_reference(&mut self, candidate: &T) -> Result<bool>;
    /// Ordering of `candidate` relative to the reference.
    fn compare_to_reference(&mut self, candidate: &T) -> Result<Ordering>;
    /// Ordering of `first` relative to `second`.
    fn compare(&mut self, first: &T, second: &T) -> Result<Ordering>;
    /// Deterministic hash of the key of `record`.
    fn hash(&mut self, record: &T) -> Result<u64>;
    /// Independent comparator with the same configuration.
    fn duplicate(&self) -> Self
    where
        Self: Sized;
}

/// Compares records by a composite key with per-field sort direction.
#[derive(Debug)]
pub struct RecordComparator {
    key: KeySpec,
    ascending: Vec<bool>,
    reference: Vec<KeyHolder>,
    candidate: Vec<KeyHolder>,
    has_reference: bool,
}

impl RecordComparator {
    /// Comparator with every field ascending.
    pub fn new(key: KeySpec) -> Result<Self> {
        let ascending = vec![true; key.len()];
        Self::with_order(key, ascending)
    }

    /// Comparator with explicit per-field direction.
    ///
    /// `ascending` must have one flag per key field, and no position may be
    /// declared twice.
    pub fn with_order(key: KeySpec, ascending: Vec<bool>) -> Result<Self> {
        if ascending.len() != key.len() {
            return Err(DflError::InvalidConfig(format!(
                "comparator has {} key fields but {} sort flags",
                key.len(),
                ascending.len()
            )));
        }
        let positions = key.positions();
        for (i, p) in positions.iter().enumerate() {
            if positions[..i].contains(p) {
                return Err(DflError::InvalidConfig(format!(
                    "key position {p} declared twice in {key}"
                )));
            }
        }
        let types = key.types();
        Ok(Self {
            reference: holders_for(&types),
            candidate: holders_for(&types),
            key,
            ascending,
            has_reference: false,
        })
    }

    /// Declared key.
    pub fn key(&self) -> &KeySpec {
        &self.key
    }

    /// Per-field sort direction.
    pub fn ascending(&self) -> &[bool] {
        &self.ascending
    }

    /// Owned copy of the key of `record`.
    pub fn extract_key(&self, record: &Record) -> Result<Vec<Key>> {
        self.key
            .fields()
            .iter()
            .map(|(position, key_type)| key_field(record, *position, *key_type).map(Key::from_value))
            .collect()
    }

    fn load_candidate(&mut self, record: &Record) -> Result<()> {
        for (holder, (position, _)) in self.candidate.iter_mut().zip(self.key.fields()) {
            holder.load(record, *position)?;
        }
        Ok(())
    }

    fn require_reference(&self) -> Result<()> {
        if self.has_reference {
            Ok(())
        } else {
            Err(DflError::Execution(
                "comparator used before set_reference".to_string(),
            ))
        }
    }

    fn directed(&self, field: usize, ord: Ordering) -> Ordering {
        if self.ascending[field] {
            ord
        } else {
            ord.reverse()
        }
    }
}

impl TypeComparator<Record> for RecordComparator {
    fn set_reference(&mut self, reference: &Record) -> Result<()> {
        self.has_reference = false;
        for (holder, (position, _)) in self.reference.iter_mut().zip(self.key.fields()) {
            holder.load(reference, *position)?;
        }
        self.has_reference = true;
        Ok(())
    }

    fn equal_to_reference(&mut self, candidate: &Record) -> Result<bool> {
        self.require_reference()?;
        self.load_candidate(candidate)?;
        Ok(self
            .candidate
            .iter()
            .zip(self.reference.iter())
            .all(|(c, r)| c.cmp_holder(r) == Ordering::Equal))
    }

    fn compare_to_reference(&mut self, candidate: &Record) -> Result<Ordering> {
        self.require_reference()?;
        self.load_candidate(candidate)?;
        for (i, (c, r)) in self.candidate.iter().zip(self.reference.iter()).enumerate() {
            let ord = c.cmp_holder(r);
            if ord != Ordering::Equal {
                return Ok(self.directed(i, ord));
            }
        }
        Ok(Ordering::Equal)
    }

    fn compare(&mut self, first: &Record, second: &Record) -> Result<Ordering> {
        for (i, (position, key_type)) in self.key.fields().iter().enumerate() {
            let a = key_field(first, *position, *key_type)?;
            let b = key_field(second, *position, *key_type)?;
            let ord = cmp_values(a, b);
            if ord != Ordering::Equal {
                return Ok(self.directed(i, ord));
            }
        }
        Ok(Ordering::Equal)
    }

    fn hash(&mut self, record: &Record) -> Result<u64> {
        self.load_candidate(record)?;
        let mut hasher = KeyHasher::new();
        for holder in &self.candidate {
            holder.write_hash(&mut hasher);
        }
        Ok(hasher.finish())
    }

    fn duplicate(&self) -> Self {
        let types = self.key.types();
        Self {
            key: self.key.clone(),
            ascending: self.ascending.clone(),
            reference: holders_for(&types),
            candidate: holders_for(&types),
            has_reference: false,
        }
    }
}
