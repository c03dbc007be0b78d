use std::sync::{Arc, OnceLock};

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    role_records_in: CounterVec,
    role_records_out: CounterVec,
    role_time_seconds: HistogramVec,
    rounds: CounterVec,
    solution_updates: CounterVec,
    workset_records: GaugeVec,
    exchange_records: CounterVec,
    spill_bytes: CounterVec,
    spill_time_seconds: HistogramVec,
    barrier_wait_seconds: HistogramVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    pub fn record_role(
        &self,
        job: &str,
        partition: u32,
        role: &str,
        records_in: u64,
        records_out: u64,
        secs: f64,
    ) {
        let labels = [job, &partition.to_string(), role];
        self.inner
            .role_records_in
            .with_label_values(&labels)
            .inc_by(records_in as f64);
        self.inner
            .role_records_out
            .with_label_values(&labels)
            .inc_by(records_out as f64);
        self.inner
            .role_time_seconds
            .with_label_values(&labels)
            .observe(secs.max(0.0));
    }

    pub fn inc_rounds(&self, job: &str) {
        self.inner.rounds.with_label_values(&[job]).inc();
    }

    pub fn record_solution_updates(&self, job: &str, partition: u32, updates: u64) {
        self.inner
            .solution_updates
            .with_label_values(&[job, &partition.to_string()])
            .inc_by(updates as f64);
    }

    pub fn set_workset_records(&self, job: &str, partition: u32, records: u64) {
        self.inner
            .workset_records
            .with_label_values(&[job, &partition.to_string()])
            .set(records as f64);
    }

    pub fn record_exchange(&self, job: &str, partition: u32, records: u64) {
        self.inner
            .exchange_records
            .with_label_values(&[job, &partition.to_string()])
            .inc_by(records as f64);
    }

    pub fn record_spill(&self, job: &str, partition: u32, kind: &str, bytes: u64, secs: f64) {
        let labels = [job, &partition.to_string(), kind];
        self.inner
            .spill_bytes
            .with_label_values(&labels)
            .inc_by(bytes as f64);
        self.inner
            .spill_time_seconds
            .with_label_values(&labels)
            .observe(secs.max(0.0));
    }

    pub fn record_barrier_wait(&self, job: &str, secs: f64) {
        self.inner
            .barrier_wait_seconds
            .with_label_values(&[job])
            .observe(secs.max(0.0));
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let role_records_in = counter_vec(
            &registry,
            "dfl_role_records_in_total",
            "Records consumed per task role",
            &["job", "partition", "role"],
        );
        let role_records_out = counter_vec(
            &registry,
            "dfl_role_records_out_total",
            "Records produced per task role",
            &["job", "partition", "role"],
        );
        let role_time_seconds = histogram_vec(
            &registry,
            "dfl_role_time_seconds",
            "Time spent in each task role per round",
            &["job", "partition", "role"],
        );

        let rounds = counter_vec(&registry, "dfl_rounds_total", "Completed rounds", &["job"]);
        let solution_updates = counter_vec(
            &registry,
            "dfl_solution_updates_total",
            "Solution set entries rewritten by the solution-set tail",
            &["job", "partition"],
        );
        let workset_records = gauge_vec(
            &registry,
            "dfl_workset_records",
            "Records in the workset handed to the next round",
            &["job", "partition"],
        );
        let exchange_records = counter_vec(
            &registry,
            "dfl_exchange_records_total",
            "Records received through the head to intermediate exchange",
            &["job", "partition"],
        );

        let spill_bytes = counter_vec(
            &registry,
            "dfl_spill_bytes_total",
            "Spill bytes written",
            &["job", "partition", "kind"],
        );
        let spill_time_seconds = histogram_vec(
            &registry,
            "dfl_spill_time_seconds",
            "Spill write time",
            &["job", "partition", "kind"],
        );
        let barrier_wait_seconds = histogram_vec(
            &registry,
            "dfl_barrier_wait_seconds",
            "Time partitions spend waiting for the round decision",
            &["job"],
        );

        Self {
            registry,
            role_records_in,
            role_records_out,
            role_time_seconds,
            rounds,
            solution_updates,
            workset_records,
            exchange_records,
            spill_bytes,
            spill_time_seconds,
            barrier_wait_seconds,
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn gauge_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> GaugeVec {
    let g = GaugeVec::new(Opts::new(name, help), labels).expect("gauge vec");
    registry
        .register(Box::new(g.clone()))
        .expect("register gauge");
    g
}

fn histogram_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    let h = HistogramVec::new(HistogramOpts::new(name, help), labels).expect("histogram vec");
    registry
        .register(Box::new(h.clone()))
        .expect("register histogram");
    h
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::MetricsRegistry;

    #[test]
    fn renders_prometheus_text() {
        let m = MetricsRegistry::new();
        m.record_role("cc", 0, "Head", 4, 10, 0.01);
        let text = m.render_prometheus();
        assert!(text.contains("dfl_role_records_out_total"));
        assert!(text.contains("Head"));
    }

    #[test]
    fn renders_all_metric_families() {
        let m = MetricsRegistry::new();
        m.record_role("pr", 1, "Intermediate", 10, 4, 0.02);
        m.inc_rounds("pr");
        m.record_solution_updates("pr", 1, 3);
        m.set_workset_records("pr", 1, 3);
        m.record_exchange("pr", 1, 10);
        m.record_spill("pr", 1, "solution_set", 512, 0.005);
        m.record_barrier_wait("pr", 0.001);
        let text = m.render_prometheus();

        assert!(text.contains("dfl_role_records_in_total"));
        assert!(text.contains("dfl_role_records_out_total"));
        assert!(text.contains("dfl_role_time_seconds"));
        assert!(text.contains("dfl_rounds_total"));
        assert!(text.contains("dfl_solution_updates_total"));
        assert!(text.contains("dfl_workset_records"));
        assert!(text.contains("dfl_exchange_records_total"));
        assert!(text.contains("dfl_spill_bytes_total"));
        assert!(text.contains("dfl_spill_time_seconds"));
        assert!(text.contains("dfl_barrier_wait_seconds"));
    }
}
