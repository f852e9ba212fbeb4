//! Layered execution plan produced by the DAG compiler.

use serde::{Deserialize, Serialize};

/// Output of compiling a task set: a layered schedule plus critical path.
///
/// Every task id appears in exactly one layer, and every dependency of a
/// task sits in a strictly earlier layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Ordered list of layers; ids within a layer are sorted for
    /// reproducible scheduling.
    pub layers: Vec<Vec<String>>,
    /// Longest estimated-duration chain, start to sink.
    pub critical_path: Vec<String>,
    /// Width of the widest layer.
    pub max_parallel: usize,
}

impl ExecutionPlan {
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn task_count(&self) -> usize {
        self.layers.iter().map(Vec::len).sum()
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }
}
