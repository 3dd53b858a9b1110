//! Task graph: dependency edges, per-job graph, and the pipeline shape.

pub mod dependency;
pub mod pipeline;
pub mod task_graph;

pub use dependency::DependencyGraph;
pub use pipeline::{PipelineShape, build_pipeline};
pub use task_graph::{MarkEffect, TaskGraph, TaskMark};
