//! Client facade for deltaflow: the [`Engine`] entry point, the reference
//! iteration jobs and the output sinks used by the `dfl` binary.
//!
//! Feature flags:
//! - `profiling`: enables [`Engine::serve_metrics_exporter`].

pub mod algorithms;
pub mod engine;
pub mod sink;

pub use engine::Engine;
pub use sink::{pretty_format, records_to_batch, write_parquet, write_text};
