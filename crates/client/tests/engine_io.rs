use std::fs::File;

use arrow::array::{Array, Int64Array};
use dfl_client::algorithms::{ConnectedComponents, label_source};
use dfl_client::sink::{write_parquet, write_text};
use dfl_storage::{FieldType, InputDef};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

#[path = "support/mod.rs"]
mod support;

use support::*;

fn register_text_inputs(engine: &dfl_client::Engine) {
    let vertices = unique_path("dfl_vertices", "txt");
    let edges = unique_path("dfl_edges", "txt");
    write_lines(&vertices, &(1..=9).map(|v| v.to_string()).collect::<Vec<_>>());
    write_lines(
        &edges,
        &odd_even_edges()
            .iter()
            .map(|(a, b)| format!("{a}\t{b}"))
            .collect::<Vec<_>>(),
    );
    engine.register_input(
        "vertices",
        InputDef {
            name: String::new(),
            uri: vertices.to_string_lossy().into_owned(),
            format: "text".to_string(),
            delimiter: None,
            fields: vec![FieldType::Int64],
        },
    );
    engine.register_input(
        "edges",
        InputDef {
            name: String::new(),
            uri: edges.to_string_lossy().into_owned(),
            format: "tbl".to_string(),
            delimiter: Some("\\t".to_string()),
            fields: vec![FieldType::Int64, FieldType::Int64],
        },
    );
}

#[tokio::test]
async fn catalog_inputs_drive_a_run() {
    let engine = engine(usize::MAX);
    register_text_inputs(&engine);
    let label_input = label_source(engine.open_input("vertices").expect("vertices").as_ref())
        .expect("labels");
    let plan = ConnectedComponents {
        parallelism: 2,
        ..ConnectedComponents::default()
    }
    .plan(label_input, engine.open_input("edges").expect("edges"))
    .expect("plan");
    let result = engine.run(&plan).await.expect("run");
    let expected: Vec<(i64, i64)> = (1..=9).map(|v| (v, if v % 2 == 1 { 1 } else { 2 })).collect();
    assert_eq!(labels(&result.records), expected);
}

#[tokio::test]
async fn parquet_inputs_and_outputs() {
    let engine = engine(usize::MAX);
    let vertices = unique_path("dfl_vertex_labels", "parquet");
    let edges = unique_path("dfl_edge_list", "parquet");
    write_pairs_parquet(
        &vertices,
        ["vertex", "component"],
        &(1..=9).map(|v| (v, v)).collect::<Vec<_>>(),
    );
    write_pairs_parquet(&edges, ["source", "target"], &odd_even_edges());
    for (name, path) in [("labels", &vertices), ("edges", &edges)] {
        engine.register_input(
            name,
            InputDef {
                name: String::new(),
                uri: path.to_string_lossy().into_owned(),
                format: "parquet".to_string(),
                delimiter: None,
                fields: Vec::new(),
            },
        );
    }
    let plan = ConnectedComponents::default()
        .plan(
            engine.open_input("labels").expect("labels"),
            engine.open_input("edges").expect("edges"),
        )
        .expect("plan");
    let mut records = engine.run(&plan).await.expect("run").records;
    records.sort_by_key(|r| r.get_i64(0).expect("vertex"));

    let out = unique_path("dfl_components", "parquet");
    write_parquet(&out, &records, &["vertex", "component"]).expect("write parquet");
    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(&out).expect("open"))
        .expect("reader")
        .build()
        .expect("build");
    let mut components = Vec::new();
    for batch in reader {
        let batch = batch.expect("batch");
        assert_eq!(batch.schema().field(1).name(), "component");
        let col = batch
            .column(1)
            .as_any()
            .downcast_ref::<Int64Array>()
            .expect("component column");
        components.extend((0..col.len()).map(|i| col.value(i)));
    }
    assert_eq!(components, vec![1, 2, 1, 2, 1, 2, 1, 2, 1]);

    let text = unique_path("dfl_components", "txt");
    write_text(&text, &records, ' ').expect("write text");
    let written = std::fs::read_to_string(&text).expect("read text");
    assert_eq!(written.lines().next(), Some("1 1"));
    assert_eq!(written.lines().count(), 9);
}

#[test]
fn explain_lists_roles_and_feedback_edges() {
    let engine = engine(usize::MAX);
    let plan = ConnectedComponents::default()
        .plan(
            memory("labels", (1..=3).map(|v| pair(v, v)).collect()),
            memory("edges", vec![pair(1, 2)]),
        )
        .expect("plan");
    let text = engine.explain(&plan);
    assert!(text.starts_with("Iteration name=connected-components"));
    assert!(text.contains("role=Head"));
    assert!(text.contains("role=SolutionSetTail"));
    assert!(text.contains("~>"));
}

#[test]
fn unknown_input_is_reported() {
    let engine = engine(usize::MAX);
    assert!(engine.open_input("missing").is_err());
}
