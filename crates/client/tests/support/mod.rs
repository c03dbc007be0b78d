#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arrow::array::{ArrayRef, Int64Array};
use arrow::record_batch::RecordBatch;
use arrow_schema::{DataType, Field, Schema};
use dfl_client::Engine;
use dfl_common::EngineConfig;
use dfl_execution::{Record, Value};
use dfl_storage::{MemorySource, RecordSource};
use parquet::arrow::ArrowWriter;

pub fn unique_path(prefix: &str, ext: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock before epoch")
        .as_nanos();
    std::env::temp_dir().join(format!("{prefix}_{nanos}.{ext}"))
}

pub fn engine(mem_budget_bytes: usize) -> Engine {
    let config = EngineConfig {
        mem_budget_bytes,
        solution_set_buckets: 4,
        exchange_batch_records: 5,
        spill_dir: unique_path("dfl_client_spill", "d")
            .to_string_lossy()
            .into_owned(),
        ..EngineConfig::default()
    };
    Engine::new(config).expect("engine")
}

pub fn memory(name: &str, records: Vec<Record>) -> Arc<dyn RecordSource> {
    Arc::new(MemorySource::new(name, records))
}

pub fn pair(a: i64, b: i64) -> Record {
    Record::from_values([Value::Int64(a), Value::Int64(b)])
}

pub fn vertex(v: i64) -> Record {
    Record::from_values([Value::Int64(v)])
}

pub fn write_lines(path: &Path, lines: &[String]) {
    std::fs::write(path, lines.join("\n")).expect("write text fixture");
}

pub fn write_parquet(path: &Path, schema: Arc<Schema>, cols: Vec<ArrayRef>) {
    let batch = RecordBatch::try_new(schema.clone(), cols).expect("build batch");
    let file = File::create(path).expect("create parquet");
    let mut writer = ArrowWriter::try_new(file, schema, None).expect("writer");
    writer.write(&batch).expect("write");
    writer.close().expect("close");
}

/// Two-column Int64 parquet file.
pub fn write_pairs_parquet(path: &Path, names: [&str; 2], rows: &[(i64, i64)]) {
    let schema = Arc::new(Schema::new(vec![
        Field::new(names[0], DataType::Int64, false),
        Field::new(names[1], DataType::Int64, false),
    ]));
    write_parquet(
        path,
        schema,
        vec![
            Arc::new(Int64Array::from(rows.iter().map(|r| r.0).collect::<Vec<_>>())),
            Arc::new(Int64Array::from(rows.iter().map(|r| r.1).collect::<Vec<_>>())),
        ],
    );
}

/// Vertices 1..=9: a chain `i-2 -> i` for i in 3..=9 links every vertex to
/// the one two below it, so odd and even ids form two components.
pub fn odd_even_edges() -> Vec<(i64, i64)> {
    (3..=9).map(|i| (i - 2, i)).collect()
}

/// `(vertex, component)` pairs sorted by vertex.
pub fn labels(records: &[Record]) -> Vec<(i64, i64)> {
    let mut out: Vec<(i64, i64)> = records
        .iter()
        .map(|r| (r.get_i64(0).expect("vertex"), r.get_i64(1).expect("label")))
        .collect();
    out.sort();
    out
}

/// Reference components: each vertex labelled with the smallest id
/// reachable over undirected edges.
pub fn union_find_components(vertices: &[i64], edges: &[(i64, i64)]) -> Vec<(i64, i64)> {
    let mut parent: BTreeMap<i64, i64> = vertices.iter().map(|&v| (v, v)).collect();
    fn find(parent: &mut BTreeMap<i64, i64>, v: i64) -> i64 {
        let p = parent[&v];
        if p == v {
            return v;
        }
        let root = find(parent, p);
        parent.insert(v, root);
        root
    }
    for &(a, b) in edges {
        let ra = find(&mut parent, a);
        let rb = find(&mut parent, b);
        let (lo, hi) = if ra < rb { (ra, rb) } else { (rb, ra) };
        parent.insert(hi, lo);
    }
    vertices
        .iter()
        .map(|&v| (v, find(&mut parent, v)))
        .collect()
}

/// `(source, target, out_degree)` edges of the PageRank fixture graph.
pub fn rank_edges() -> Vec<(i64, i64, i64)> {
    "1 2 2,1 3 2,2 3 3,2 4 3,3 1 4,3 2 4,4 2 2,5 6 2,6 5 2,7 8 2,7 9 2,8 7 2,8 9 2,\
     9 7 2,9 8 2,3 5 4,3 6 4,4 8 2,2 7 3,5 7 2,6 4 2"
        .split(',')
        .map(|e| {
            let parts: Vec<i64> = e
                .split_whitespace()
                .map(|t| t.parse().expect("fixture int"))
                .collect();
            (parts[0], parts[1], parts[2])
        })
        .collect()
}

pub fn rank_edge_records() -> Vec<Record> {
    rank_edges()
        .into_iter()
        .map(|(s, t, d)| Record::from_values([Value::Int64(s), Value::Int64(t), Value::Int64(d)]))
        .collect()
}

/// Plain power iteration from uniform ranks, `steps` times.
pub fn bulk_pagerank(vertices: &[i64], edges: &[(i64, i64, i64)], damping: f64, steps: usize) -> BTreeMap<i64, f64> {
    let n = vertices.len() as f64;
    let start = vertices.iter().map(|&v| (v, 1.0 / n)).collect();
    recompute_ranks(start, edges, damping, steps)
}

/// Recomputes every rank from `start`, `steps` times.
pub fn recompute_ranks(
    start: BTreeMap<i64, f64>,
    edges: &[(i64, i64, i64)],
    damping: f64,
    steps: usize,
) -> BTreeMap<i64, f64> {
    let n = start.len() as f64;
    let mut ranks = start;
    for _ in 0..steps {
        let mut next: BTreeMap<i64, f64> = ranks.keys().map(|&v| (v, (1.0 - damping) / n)).collect();
        for &(s, t, d) in edges {
            *next.get_mut(&t).expect("known target") += damping * ranks[&s] / d as f64;
        }
        ranks = next;
    }
    ranks
}

pub fn ranks(records: &[Record]) -> BTreeMap<i64, f64> {
    records
        .iter()
        .map(|r| (r.get_i64(0).expect("vertex"), r.get_f64(1).expect("rank")))
        .collect()
}
