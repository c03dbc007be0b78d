//! Engine-wide memory budget shared by all partitions.
//!
//! Each partition reserves bytes for its memory consumers (the solution set
//! hash table, the round-local sort buffer) when it enters `Init` and keeps
//! the reservation until it terminates. The grant may be smaller than the
//! request when the engine is under pressure; consumers then spill earlier.
//! Pressure never changes results, only how much goes to secondary storage.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Pressure level derived from requested vs granted memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryPressure {
    /// Plenty of budget available.
    Normal,
    /// Budget is tight; spill earlier.
    Elevated,
    /// Budget is heavily constrained.
    Critical,
}

/// Structures that hold reservations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryConsumer {
    /// Hybrid hash table holding a partition's solution set.
    SolutionSet,
    /// Round-local sort/grouping buffer of the intermediate role.
    SortBuffer,
}

impl fmt::Display for MemoryConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryConsumer::SolutionSet => f.write_str("solution_set"),
            MemoryConsumer::SortBuffer => f.write_str("sort_buffer"),
        }
    }
}

/// Spill guidance attached to a reservation.
#[derive(Debug, Clone, Copy)]
pub struct MemoryPressureSignal {
    /// Pressure classification.
    pub pressure: MemoryPressure,
    /// Bytes actually granted to the consumer.
    pub granted_bytes: usize,
    /// Spill trigger ratio numerator.
    pub spill_trigger_ratio_num: u32,
    /// Spill trigger ratio denominator.
    pub spill_trigger_ratio_den: u32,
}

impl MemoryPressureSignal {
    /// Signal for a consumer that was granted exactly `bytes` without pressure.
    pub fn unconstrained(bytes: usize) -> Self {
        Self {
            pressure: MemoryPressure::Normal,
            granted_bytes: bytes,
            spill_trigger_ratio_num: 1,
            spill_trigger_ratio_den: 1,
        }
    }

    /// Return `estimated_bytes > spill_threshold` in a ratio-safe way.
    #[must_use]
    pub fn should_spill(&self, estimated_bytes: usize) -> bool {
        if self.granted_bytes == 0 {
            return estimated_bytes > 0;
        }
        let estimated = estimated_bytes as u128;
        let den = self.spill_trigger_ratio_den.max(1) as u128;
        let num = self.spill_trigger_ratio_num as u128;
        let budget = self.granted_bytes as u128;
        estimated.saturating_mul(den) > budget.saturating_mul(num)
    }
}

/// Shared engine-level budget manager.
#[derive(Debug)]
pub struct MemorySpillManager {
    engine_budget_bytes: usize,
    in_use_bytes: AtomicUsize,
}

impl MemorySpillManager {
    /// Create a manager with an engine-wide budget.
    ///
    /// `usize::MAX` disables accounting: every request is granted in full.
    #[must_use]
    pub fn new(engine_budget_bytes: usize) -> Arc<Self> {
        Arc::new(Self {
            engine_budget_bytes,
            in_use_bytes: AtomicUsize::new(0),
        })
    }

    /// Bytes currently reserved by live reservations.
    pub fn in_use_bytes(&self) -> usize {
        self.in_use_bytes.load(Ordering::Acquire)
    }

    /// Reserve memory for one consumer and compute pressure guidance.
    #[must_use]
    pub fn reserve(
        self: &Arc<Self>,
        consumer: MemoryConsumer,
        requested_bytes: usize,
    ) -> MemoryReservation {
        if self.engine_budget_bytes == usize::MAX || requested_bytes == 0 {
            return MemoryReservation {
                manager: Arc::clone(self),
                consumer,
                reserved_bytes: 0,
                signal: MemoryPressureSignal::unconstrained(requested_bytes),
            };
        }

        loop {
            let current = self.in_use_bytes.load(Ordering::Acquire);
            let available = self.engine_budget_bytes.saturating_sub(current);
            let granted = requested_bytes.min(available);
            let next = current.saturating_add(granted);
            if self
                .in_use_bytes
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return MemoryReservation {
                    manager: Arc::clone(self),
                    consumer,
                    reserved_bytes: granted,
                    signal: signal_for(requested_bytes, granted),
                };
            }
        }
    }
}

fn signal_for(requested: usize, granted: usize) -> MemoryPressureSignal {
    let ratio = granted as f64 / requested as f64;
    if ratio >= 0.75 {
        MemoryPressureSignal::unconstrained(granted)
    } else if ratio >= 0.40 {
        MemoryPressureSignal {
            pressure: MemoryPressure::Elevated,
            granted_bytes: granted,
            spill_trigger_ratio_num: 4,
            spill_trigger_ratio_den: 5,
        }
    } else {
        MemoryPressureSignal {
            pressure: MemoryPressure::Critical,
            granted_bytes: granted,
            spill_trigger_ratio_num: 3,
            spill_trigger_ratio_den: 5,
        }
    }
}

/// RAII reservation that releases engine budget on drop.
#[derive(Debug)]
pub struct MemoryReservation {
    manager: Arc<MemorySpillManager>,
    consumer: MemoryConsumer,
    reserved_bytes: usize,
    signal: MemoryPressureSignal,
}

impl MemoryReservation {
    /// Pressure signal for this reservation.
    #[must_use]
    pub fn signal(&self) -> MemoryPressureSignal {
        self.signal
    }

    /// Consumer this reservation was taken for.
    pub fn consumer(&self) -> MemoryConsumer {
        self.consumer
    }
}

impl Drop for MemoryReservation {
    fn drop(&mut self) {
        if self.reserved_bytes > 0 {
            self.manager
                .in_use_bytes
                .fetch_sub(self.reserved_bytes, Ordering::AcqRel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_releases_budget_on_drop() {
        let manager = MemorySpillManager::new(100);
        {
            let r1 = manager.reserve(MemoryConsumer::SolutionSet, 80);
            assert_eq!(r1.signal().granted_bytes, 80);
            let r2 = manager.reserve(MemoryConsumer::SortBuffer, 80);
            assert_eq!(r2.signal().granted_bytes, 20);
            assert_eq!(r2.signal().pressure, MemoryPressure::Critical);
            assert_eq!(manager.in_use_bytes(), 100);
        }
        assert_eq!(manager.in_use_bytes(), 0);
        let r3 = manager.reserve(MemoryConsumer::SolutionSet, 100);
        assert_eq!(r3.signal().granted_bytes, 100);
        assert_eq!(r3.signal().pressure, MemoryPressure::Normal);
    }

    #[test]
    fn should_spill_uses_ratio() {
        let manager = MemorySpillManager::new(50);
        let reservation = manager.reserve(MemoryConsumer::SortBuffer, 100);
        let signal = reservation.signal();
        assert_eq!(signal.spill_trigger_ratio_num, 4);
        assert_eq!(signal.spill_trigger_ratio_den, 5);
        assert!(!signal.should_spill(39));
        assert!(signal.should_spill(41));
    }

    #[test]
    fn zero_grant_spills_anything() {
        let signal = MemoryPressureSignal::unconstrained(0);
        assert!(!signal.should_spill(0));
        assert!(signal.should_spill(1));
    }
}
