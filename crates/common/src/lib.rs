//! Shared configuration, error types, IDs, memory budgets and observability
//! primitives for deltaflow crates.
//!
//! Architecture role:
//! - defines engine resource configuration passed across layers
//! - provides common [`DflError`] / [`Result`] contracts
//! - hosts the engine-wide memory budget used for spill decisions
//! - hosts metrics and optional exporter utilities
//!
//! Feature flags:
//! - `profiling`: enables the metrics HTTP exporter helpers.

pub mod config;
pub mod error;
pub mod ids;
pub mod memory;
pub mod metrics;
#[cfg(feature = "profiling")]
pub mod metrics_exporter;

pub use config::EngineConfig;
pub use error::{DflError, Result};
pub use ids::*;
pub use memory::{
    MemoryConsumer, MemoryPressure, MemoryPressureSignal, MemoryReservation, MemorySpillManager,
};
pub use metrics::MetricsRegistry;
#[cfg(feature = "profiling")]
pub use metrics_exporter::run_metrics_exporter;
