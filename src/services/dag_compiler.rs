//! DAG compiler: validates a task set and produces a layered execution plan.
//!
//! Kahn-style layering with deterministic intra-layer ordering (sorted by
//! id), cycle detection, and a weighted critical path over estimated
//! durations. `compile` is a pure function: the same input always yields
//! identical layers and critical path.

use std::collections::{HashMap, HashSet};

use crate::domain::errors::{EngineError, EngineResult};
use crate::domain::models::{ExecutionPlan, TaskDefinition};

/// Anything with an id, dependencies, and a duration estimate can be
/// compiled. Workflow tasks and saga steps both qualify.
pub trait GraphNode {
    fn node_id(&self) -> &str;
    fn node_deps(&self) -> &[String];
    /// Critical-path weight; defaults to 1 when unknown.
    fn node_weight(&self) -> f64 {
        1.0
    }
}

impl GraphNode for TaskDefinition {
    fn node_id(&self) -> &str {
        &self.id
    }

    fn node_deps(&self) -> &[String] {
        &self.deps
    }

    fn node_weight(&self) -> f64 {
        self.estimated_duration
            .map_or(1.0, |d| d.as_secs_f64().max(f64::MIN_POSITIVE))
    }
}

/// Compile a node set into an execution plan.
///
/// Fails with `DuplicateTask` on repeated ids, `UnknownDependency` when a
/// dep references an id outside the set, and `CyclicDependency` (carrying
/// the offending ids) when layering cannot consume every node.
pub fn compile<N: GraphNode>(nodes: &[N]) -> EngineResult<ExecutionPlan> {
    if nodes.is_empty() {
        return Ok(ExecutionPlan::default());
    }

    let mut by_id: HashMap<&str, &N> = HashMap::with_capacity(nodes.len());
    for node in nodes {
        if by_id.insert(node.node_id(), node).is_some() {
            return Err(EngineError::DuplicateTask(node.node_id().to_string()));
        }
    }

    // Forward adjacency (dep -> dependents) and in-degree per node.
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    for node in nodes {
        in_degree.entry(node.node_id()).or_insert(0);
        for dep in node.node_deps() {
            if !by_id.contains_key(dep.as_str()) {
                return Err(EngineError::UnknownDependency {
                    task: node.node_id().to_string(),
                    dep: dep.clone(),
                });
            }
            dependents
                .entry(dep.as_str())
                .or_default()
                .push(node.node_id());
            *in_degree.entry(node.node_id()).or_insert(0) += 1;
        }
    }

    let mut layers: Vec<Vec<String>> = Vec::new();
    let mut remaining: HashSet<&str> = by_id.keys().copied().collect();

    while !remaining.is_empty() {
        let mut layer: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|id| in_degree[id] == 0)
            .collect();

        if layer.is_empty() {
            let mut cycle: Vec<String> = remaining.iter().map(|s| (*s).to_string()).collect();
            cycle.sort();
            return Err(EngineError::CyclicDependency(cycle));
        }

        layer.sort_unstable();
        for id in &layer {
            remaining.remove(id);
            if let Some(next) = dependents.get(id) {
                for dependent in next {
                    if let Some(degree) = in_degree.get_mut(dependent) {
                        *degree -= 1;
                    }
                }
            }
        }

        layers.push(layer.into_iter().map(String::from).collect());
    }

    let critical_path = critical_path(&layers, &by_id, &dependents);
    let max_parallel = layers.iter().map(Vec::len).max().unwrap_or(0);

    Ok(ExecutionPlan {
        layers,
        critical_path,
        max_parallel,
    })
}

/// Longest weighted chain to any sink, computed over the already-layered
/// (hence topologically ordered) node sequence.
fn critical_path<N: GraphNode>(
    layers: &[Vec<String>],
    by_id: &HashMap<&str, &N>,
    dependents: &HashMap<&str, Vec<&str>>,
) -> Vec<String> {
    let topo: Vec<&str> = layers
        .iter()
        .flat_map(|layer| layer.iter().map(String::as_str))
        .collect();

    // Distance = weight of the node itself plus the heaviest chain above it.
    let mut distance: HashMap<&str, f64> = HashMap::with_capacity(topo.len());
    let mut predecessor: HashMap<&str, &str> = HashMap::new();

    for &id in &topo {
        let base = distance.get(id).copied().unwrap_or(0.0) + by_id[id].node_weight();
        distance.insert(id, base);
        if let Some(next) = dependents.get(id) {
            for &dependent in next {
                let current = distance.get(dependent).copied().unwrap_or(0.0);
                if base > current {
                    distance.insert(dependent, base);
                    predecessor.insert(dependent, id);
                }
            }
        }
    }

    // Deterministic sink choice: heaviest distance, then lexical id.
    let end = topo
        .iter()
        .max_by(|a, b| {
            distance[**a]
                .partial_cmp(&distance[**b])
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.cmp(a))
        })
        .copied();

    let Some(mut current) = end else {
        return Vec::new();
    };

    let mut path = vec![current.to_string()];
    while let Some(&pred) = predecessor.get(current) {
        path.push(pred.to_string());
        current = pred;
    }
    path.reverse();
    path
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn task(id: &str, deps: &[&str]) -> TaskDefinition {
        TaskDefinition::new(id, id).with_deps(deps.iter().copied())
    }

    #[test]
    fn test_empty_set_yields_empty_plan() {
        let plan = compile::<TaskDefinition>(&[]).unwrap();
        assert!(plan.is_empty());
        assert!(plan.critical_path.is_empty());
        assert_eq!(plan.max_parallel, 0);
    }

    #[test]
    fn test_single_task() {
        let plan = compile(&[task("a", &[])]).unwrap();
        assert_eq!(plan.layers, vec![vec!["a".to_string()]]);
        assert_eq!(plan.critical_path, vec!["a".to_string()]);
        assert_eq!(plan.max_parallel, 1);
    }

    #[test]
    fn test_diamond_layers() {
        let tasks = vec![
            task("s", &[]),
            task("l", &["s"]),
            task("r", &["s"]),
            task("j", &["l", "r"]),
        ];
        let plan = compile(&tasks).unwrap();
        assert_eq!(
            plan.layers,
            vec![
                vec!["s".to_string()],
                vec!["l".to_string(), "r".to_string()],
                vec!["j".to_string()],
            ]
        );
        assert_eq!(plan.max_parallel, 2);
    }

    #[test]
    fn test_layer_ordering_is_deterministic() {
        let tasks = vec![task("zeta", &[]), task("alpha", &[]), task("mid", &[])];
        let first = compile(&tasks).unwrap();
        let second = compile(&tasks).unwrap();
        assert_eq!(first, second);
        assert_eq!(
            first.layers[0],
            vec!["alpha".to_string(), "mid".to_string(), "zeta".to_string()]
        );
    }

    #[test]
    fn test_duplicate_id() {
        let err = compile(&[task("a", &[]), task("a", &[])]).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateTask(id) if id == "a"));
    }

    #[test]
    fn test_unknown_dependency() {
        let err = compile(&[task("a", &["ghost"])]).unwrap_err();
        assert!(
            matches!(err, EngineError::UnknownDependency { task, dep } if task == "a" && dep == "ghost")
        );
    }

    #[test]
    fn test_self_loop_is_a_cycle() {
        let err = compile(&[task("a", &["a"])]).unwrap_err();
        assert!(matches!(err, EngineError::CyclicDependency(ids) if ids == vec!["a".to_string()]));
    }

    #[test]
    fn test_cycle_reports_offending_ids() {
        let tasks = vec![task("a", &["c"]), task("b", &["a"]), task("c", &["b"])];
        let err = compile(&tasks).unwrap_err();
        match err {
            EngineError::CyclicDependency(ids) => {
                assert_eq!(ids, vec!["a".to_string(), "b".to_string(), "c".to_string()]);
            }
            other => panic!("expected cycle error, got {other}"),
        }
    }

    #[test]
    fn test_critical_path_follows_weights() {
        //  a(1) -> b(5) -> d(1)
        //  c(2) ---------^
        let tasks = vec![
            task("a", &[]),
            TaskDefinition::new("b", "b")
                .with_deps(["a"])
                .with_estimated_duration(Duration::from_secs(5)),
            TaskDefinition::new("c", "c").with_estimated_duration(Duration::from_secs(2)),
            task("d", &["b", "c"]),
        ];
        let plan = compile(&tasks).unwrap();
        assert_eq!(
            plan.critical_path,
            vec!["a".to_string(), "b".to_string(), "d".to_string()]
        );
    }

    #[test]
    fn test_unweighted_critical_path_is_longest_chain() {
        let tasks = vec![
            task("a", &[]),
            task("b", &["a"]),
            task("c", &["b"]),
            task("x", &[]),
        ];
        let plan = compile(&tasks).unwrap();
        assert_eq!(
            plan.critical_path,
            vec!["a".to_string(), "b".to_string(), "c".to_string()]
        );
    }
}
