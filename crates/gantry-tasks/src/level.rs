//! Level-based grouping of an execution order

use std::collections::{HashMap, HashSet};

use tracing::{info, instrument};

use crate::graph::{DependencyGraph, GraphError};

/// Groups a topological order into levels of mutually independent tasks.
///
/// Level 0 holds tasks with no dependencies in the order; each following
/// level holds tasks whose dependencies all sit in earlier levels.
#[derive(Debug, Clone)]
pub struct LevelScheduler<'g> {
    graph: &'g DependencyGraph,
    priorities: HashMap<String, i32>,
}

impl<'g> LevelScheduler<'g> {
    /// Create a scheduler over a dependency graph
    pub fn new(graph: &'g DependencyGraph) -> Self {
        Self {
            graph,
            priorities: HashMap::new(),
        }
    }

    /// Set per-task priorities used to order tasks within a level
    pub fn with_priorities(mut self, priorities: HashMap<String, i32>) -> Self {
        self.priorities = priorities;
        self
    }

    /// Resolve `roots` and group the resulting order
    pub fn plan<S: AsRef<str>>(&self, roots: &[S]) -> Result<Vec<Vec<String>>, SchedulingError> {
        let ordered = self.graph.resolve_execution_order(roots)?;
        self.group_by_level(&ordered)
    }

    /// Partition `ordered` into levels.
    ///
    /// Within a level tasks are sorted by descending priority, then by their
    /// position in `ordered`.
    #[instrument(skip_all, fields(tasks = ordered.len()))]
    pub fn group_by_level(&self, ordered: &[String]) -> Result<Vec<Vec<String>>, SchedulingError> {
        let mut grouped: HashSet<&str> = HashSet::with_capacity(ordered.len());
        let mut remaining: Vec<(usize, &str)> =
            ordered.iter().map(String::as_str).enumerate().collect();
        let mut levels: Vec<Vec<String>> = Vec::new();

        while !remaining.is_empty() {
            let (mut ready, blocked): (Vec<_>, Vec<_>) =
                remaining.into_iter().partition(|(_, task)| {
                    self.graph
                        .dependencies(task)
                        .iter()
                        .all(|dep| grouped.contains(dep.as_str()))
                });

            if ready.is_empty() {
                return Err(SchedulingError::Stuck {
                    tasks: blocked.iter().map(|(_, t)| t.to_string()).collect(),
                });
            }

            ready.sort_by(|(pos_a, a), (pos_b, b)| {
                self.priority(b)
                    .cmp(&self.priority(a))
                    .then(pos_a.cmp(pos_b))
            });

            grouped.extend(ready.iter().map(|(_, t)| *t));
            levels.push(ready.into_iter().map(|(_, t)| t.to_string()).collect());
            remaining = blocked;
        }

        info!(levels = levels.len(), "execution levels computed");
        Ok(levels)
    }

    fn priority(&self, task: &str) -> i32 {
        self.priorities.get(task).copied().unwrap_or(0)
    }
}

/// Human-readable summary of an execution plan
pub fn execution_plan(graph: &DependencyGraph, levels: &[Vec<String>]) -> String {
    let mut plan = String::new();
    for (i, level) in levels.iter().enumerate() {
        plan.push_str(&format!("Level {} ({} tasks):\n", i, level.len()));
        for task in level {
            let deps = graph.dependencies(task);
            if deps.is_empty() {
                plan.push_str(&format!("  {}\n", task));
            } else {
                plan.push_str(&format!("  {} (after: {})\n", task, deps.join(", ")));
            }
        }
    }
    plan
}

/// Errors while grouping tasks into levels
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulingError {
    /// Graph resolution failed before grouping
    #[error(transparent)]
    Graph(#[from] GraphError),

    /// No remaining task had all of its dependencies grouped
    #[error("Scheduling cannot make progress; stuck tasks: {}", .tasks.join(", "))]
    Stuck { tasks: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_levels() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("level2a", &["level1"]).unwrap();
        graph.add_dependency("level2b", &["level1"]).unwrap();

        let levels = LevelScheduler::new(&graph)
            .plan(&["level2a", "level2b"])
            .unwrap();

        assert_eq!(levels.len(), 2);
        assert_eq!(levels[0], vec!["level1"]);
        assert_eq!(levels[1], vec!["level2a", "level2b"]);
    }

    #[test]
    fn test_uneven_depths() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("deploy", &["build", "docs"]).unwrap();
        graph.add_dependency("build", &["compile"]).unwrap();

        let levels = LevelScheduler::new(&graph).plan(&["deploy"]).unwrap();
        assert_eq!(
            levels,
            vec![
                vec!["compile".to_string(), "docs".to_string()],
                vec!["build".to_string()],
                vec!["deploy".to_string()],
            ]
        );
    }

    #[test]
    fn test_priority_breaks_ties() {
        let graph = DependencyGraph::new();
        let ordered: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
        let priorities = HashMap::from([("c".to_string(), 5), ("d".to_string(), 5)]);

        let levels = LevelScheduler::new(&graph)
            .with_priorities(priorities)
            .group_by_level(&ordered)
            .unwrap();

        assert_eq!(levels, vec![vec!["c", "d", "a", "b"]]);
    }

    #[test]
    fn test_stuck_tasks_reported() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("test", &["build"]).unwrap();

        // "build" is declared as a dependency but missing from the order
        let ordered = vec!["lint".to_string(), "test".to_string()];
        let err = LevelScheduler::new(&graph)
            .group_by_level(&ordered)
            .unwrap_err();

        assert_eq!(
            err,
            SchedulingError::Stuck {
                tasks: vec!["test".to_string()]
            }
        );
    }

    #[test]
    fn test_plan_propagates_cycle() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("a", &["b"]).unwrap();
        graph.add_dependency("b", &["a"]).unwrap();

        let err = LevelScheduler::new(&graph).plan(&["a"]).unwrap_err();
        assert!(matches!(
            err,
            SchedulingError::Graph(GraphError::CircularDependency { .. })
        ));
    }

    #[test]
    fn test_empty_order() {
        let graph = DependencyGraph::new();
        let levels = LevelScheduler::new(&graph).group_by_level(&[]).unwrap();
        assert!(levels.is_empty());
    }

    #[test]
    fn test_execution_plan_output() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("test", &["build"]).unwrap();
        let levels = LevelScheduler::new(&graph).plan(&["test"]).unwrap();

        let plan = execution_plan(&graph, &levels);
        assert!(plan.contains("Level 0 (1 tasks)"));
        assert!(plan.contains("test (after: build)"));
    }
}
