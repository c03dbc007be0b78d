//! Reference iteration jobs built on [`crate::Engine`].

pub mod connected_components;
pub mod pagerank;

pub use connected_components::{ConnectedComponents, SymmetricEdges, initial_labels, label_source};
pub use pagerank::{PageRank, RankComparison, initial_state};
