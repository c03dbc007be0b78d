#[cfg(feature = "profiling")]
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use dfl_common::metrics::global_metrics;
use dfl_common::{EngineConfig, Result};
use dfl_distributed::{IterationResult, IterationRuntime};
use dfl_planner::{DeltaIterationBuilder, IterationPlan, explain_iteration};
use dfl_storage::{InputCatalog, InputDef, RecordSource};

/// Entry point for building and running iteration jobs.
///
/// Cloning is cheap; clones share the runtime, its memory budget and the
/// input catalog.
#[derive(Clone)]
pub struct Engine {
    runtime: Arc<IterationRuntime>,
    catalog: Arc<RwLock<InputCatalog>>,
}

impl Engine {
    pub fn new(config: EngineConfig) -> Result<Self> {
        Ok(Self {
            runtime: Arc::new(IterationRuntime::new(config)?),
            catalog: Arc::new(RwLock::new(InputCatalog::new())),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        self.runtime.config()
    }

    /// Register an input under a given name.
    /// We override `input.name` to avoid ambiguity.
    pub fn register_input(&self, name: impl Into<String>, mut input: InputDef) {
        input.name = name.into();
        self.catalog
            .write()
            .expect("catalog lock poisoned")
            .register_input(input);
    }

    /// Register every input of a catalog file.
    pub fn register_catalog(&self, catalog: InputCatalog) {
        let mut cat = self.catalog.write().expect("catalog lock poisoned");
        for input in catalog.into_inputs() {
            cat.register_input(input);
        }
    }

    /// Open a registered input as a record source.
    pub fn open_input(&self, name: &str) -> Result<Arc<dyn RecordSource>> {
        self.catalog
            .read()
            .expect("catalog lock poisoned")
            .open(name)
    }

    /// Start building a delta iteration.
    pub fn iteration(&self, name: impl Into<String>) -> DeltaIterationBuilder {
        DeltaIterationBuilder::new(name)
    }

    /// Start building a bulk iteration.
    pub fn bulk_iteration(&self, name: impl Into<String>) -> DeltaIterationBuilder {
        DeltaIterationBuilder::bulk(name)
    }

    pub async fn run(&self, plan: &IterationPlan) -> Result<IterationResult> {
        self.runtime.run(plan).await
    }

    pub fn explain(&self, plan: &IterationPlan) -> String {
        explain_iteration(plan)
    }

    pub fn prometheus_metrics(&self) -> String {
        global_metrics().render_prometheus()
    }

    #[cfg(feature = "profiling")]
    pub async fn serve_metrics_exporter(&self, addr: SocketAddr) -> Result<()> {
        dfl_common::run_metrics_exporter(addr).await?;
        Ok(())
    }
}
