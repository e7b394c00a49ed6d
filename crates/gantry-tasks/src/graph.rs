//! Task dependency graph: declaration, validation and topological ordering

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, instrument};

/// Directed task → dependency edges.
///
/// Each task maps to an ordered dependency list. The graph is a plain value
/// owned by whoever drives scheduling; the executor keeps it behind a lock.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    edges: BTreeMap<String, Vec<String>>,
}

impl DependencyGraph {
    /// Create an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the dependency list for `task` (last write wins).
    pub fn add_dependency<S: AsRef<str>>(
        &mut self,
        task: impl Into<String>,
        deps: &[S],
    ) -> Result<(), GraphError> {
        let task = task.into();
        let mut seen = HashSet::with_capacity(deps.len());
        let mut list = Vec::with_capacity(deps.len());

        for dep in deps {
            let dep = dep.as_ref();
            if dep == task {
                return Err(GraphError::SelfDependency(task));
            }
            if !seen.insert(dep) {
                return Err(GraphError::DuplicateDependency {
                    task,
                    dependency: dep.to_string(),
                });
            }
            list.push(dep.to_string());
        }

        debug!(task = %task, deps = list.len(), "dependencies declared");
        self.edges.insert(task, list);
        Ok(())
    }

    /// Dependencies declared for `task`; empty if none
    pub fn dependencies(&self, task: &str) -> &[String] {
        self.edges.get(task).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Names of all tasks with declared edges, sorted
    pub fn tasks(&self) -> impl Iterator<Item = &str> {
        self.edges.keys().map(String::as_str)
    }

    /// Number of tasks with declared edges
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Check if no edges are declared
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Compute an execution order covering `roots` and everything they
    /// transitively depend on. Dependencies always precede their dependents.
    ///
    /// Post-order depth-first traversal over an explicit stack. A node found
    /// on the current path means a cycle.
    #[instrument(skip_all, fields(roots = roots.len()))]
    pub fn resolve_execution_order<S: AsRef<str>>(
        &self,
        roots: &[S],
    ) -> Result<Vec<String>, GraphError> {
        let mut visiting: HashSet<&str> = HashSet::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut order: Vec<String> = Vec::new();

        for root in roots {
            let root = root.as_ref();
            if visited.contains(root) {
                continue;
            }

            // (task, index of the next dependency to visit)
            let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
            visiting.insert(root);

            while let Some(frame) = stack.last_mut() {
                let task = frame.0;
                let deps = self.dependencies(task);

                if frame.1 < deps.len() {
                    let dep = deps[frame.1].as_str();
                    frame.1 += 1;

                    if visited.contains(dep) {
                        continue;
                    }

                    if visiting.contains(dep) {
                        let start = stack.iter().position(|(t, _)| *t == dep).unwrap_or(0);
                        let mut cycle: Vec<String> =
                            stack[start..].iter().map(|(t, _)| t.to_string()).collect();
                        cycle.push(dep.to_string());
                        return Err(GraphError::CircularDependency {
                            task: dep.to_string(),
                            cycle,
                        });
                    }

                    visiting.insert(dep);
                    stack.push((dep, 0));
                } else {
                    stack.pop();
                    visiting.remove(task);
                    visited.insert(task);
                    order.push(task.to_string());
                }
            }
        }

        debug!(tasks = order.len(), "execution order resolved");
        Ok(order)
    }

    /// Check that every declared dependency names one of `available`.
    ///
    /// All dangling references are reported together.
    pub fn validate_dependencies<S: AsRef<str>>(&self, available: &[S]) -> Result<(), GraphError> {
        let available: HashSet<&str> = available.iter().map(AsRef::as_ref).collect();

        let missing: Vec<(String, String)> = self
            .edges
            .iter()
            .flat_map(|(task, deps)| {
                deps.iter()
                    .filter(|dep| !available.contains(dep.as_str()))
                    .map(move |dep| (task.clone(), dep.clone()))
            })
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(GraphError::MissingDependency { missing })
        }
    }
}

fn format_missing(missing: &[(String, String)]) -> String {
    missing
        .iter()
        .map(|(task, dep)| format!("'{}' -> '{}'", task, dep))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Errors from graph declaration and resolution
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// A task was re-entered while its own dependencies were being resolved
    #[error("Circular dependency detected at task '{task}': {}", .cycle.join(" -> "))]
    CircularDependency { task: String, cycle: Vec<String> },

    /// Declared dependencies that do not name a known task
    #[error("Missing dependencies: {}", format_missing(.missing))]
    MissingDependency { missing: Vec<(String, String)> },

    /// A task listed itself as a dependency
    #[error("Task '{0}' cannot depend on itself")]
    SelfDependency(String),

    /// A dependency name appeared twice in one list
    #[error("Task '{task}' lists dependency '{dependency}' more than once")]
    DuplicateDependency { task: String, dependency: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn position(order: &[String], name: &str) -> usize {
        order.iter().position(|t| t == name).unwrap()
    }

    #[test]
    fn test_linear_chain_order() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("deploy", &["build"]).unwrap();
        graph.add_dependency("build", &["test"]).unwrap();
        graph.add_dependency("test", &["compile"]).unwrap();

        let order = graph.resolve_execution_order(&["deploy"]).unwrap();
        assert_eq!(order, vec!["compile", "test", "build", "deploy"]);
    }

    #[test]
    fn test_every_edge_respected() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("app", &["ui", "api"]).unwrap();
        graph.add_dependency("ui", &["assets", "core"]).unwrap();
        graph.add_dependency("api", &["core", "db"]).unwrap();
        graph.add_dependency("db", &["core"]).unwrap();
        graph.add_dependency("docs", &["api"]).unwrap();

        let order = graph.resolve_execution_order(&["app", "docs"]).unwrap();
        assert_eq!(order.len(), 7);

        for task in graph.tasks() {
            for dep in graph.dependencies(task) {
                assert!(
                    position(&order, dep) < position(&order, task),
                    "{} must come before {}",
                    dep,
                    task
                );
            }
        }
    }

    #[test]
    fn test_diamond_has_no_duplicates() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("top", &["left", "right"]).unwrap();
        graph.add_dependency("left", &["base"]).unwrap();
        graph.add_dependency("right", &["base"]).unwrap();

        let order = graph.resolve_execution_order(&["top", "left"]).unwrap();
        assert_eq!(order, vec!["base", "left", "right", "top"]);
    }

    #[test]
    fn test_cycle_detected() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("a", &["b"]).unwrap();
        graph.add_dependency("b", &["c"]).unwrap();
        graph.add_dependency("c", &["a"]).unwrap();

        let err = graph.resolve_execution_order(&["a"]).unwrap_err();
        match &err {
            GraphError::CircularDependency { task, cycle } => {
                assert!(["a", "b", "c"].contains(&task.as_str()));
                assert_eq!(cycle.first(), cycle.last());
            }
            other => panic!("expected cycle error, got {:?}", other),
        }
        assert!(err.to_string().contains("Circular dependency"));
    }

    #[test]
    fn test_cycle_reachable_from_second_root() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("ok", &["leaf"]).unwrap();
        graph.add_dependency("x", &["y"]).unwrap();
        graph.add_dependency("y", &["x"]).unwrap();

        assert!(graph.resolve_execution_order(&["ok"]).is_ok());
        assert!(graph.resolve_execution_order(&["ok", "y"]).is_err());
    }

    #[test]
    fn test_missing_dependencies_collected() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("build", &["nonexistent"]).unwrap();
        graph.add_dependency("test", &["build", "fixtures"]).unwrap();

        let err = graph.validate_dependencies(&["build", "test"]).unwrap_err();
        match &err {
            GraphError::MissingDependency { missing } => {
                assert_eq!(
                    missing,
                    &vec![
                        ("build".to_string(), "nonexistent".to_string()),
                        ("test".to_string(), "fixtures".to_string()),
                    ]
                );
            }
            other => panic!("expected missing dependency error, got {:?}", other),
        }
        let message = err.to_string();
        assert!(message.contains("nonexistent"));
        assert!(message.contains("fixtures"));
    }

    #[test]
    fn test_validate_ok() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("test", &["build"]).unwrap();
        assert!(graph.validate_dependencies(&["build", "test"]).is_ok());
    }

    #[test]
    fn test_last_write_wins() {
        let mut graph = DependencyGraph::new();
        graph.add_dependency("test", &["build"]).unwrap();
        graph.add_dependency("test", &["lint"]).unwrap();
        assert_eq!(graph.dependencies("test"), ["lint".to_string()]);
        assert!(graph.dependencies("unknown").is_empty());
    }

    #[test]
    fn test_invalid_edges_rejected() {
        let mut graph = DependencyGraph::new();
        assert_eq!(
            graph.add_dependency("build", &["build"]),
            Err(GraphError::SelfDependency("build".to_string()))
        );
        assert!(matches!(
            graph.add_dependency("test", &["build", "build"]),
            Err(GraphError::DuplicateDependency { .. })
        ));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_tasks_sorted_by_name() {
        let mut graph = DependencyGraph::new();
        assert!(graph.is_empty());
        graph.add_dependency("test", &["build"]).unwrap();
        graph.add_dependency("bench", &["build"]).unwrap();

        assert_eq!(graph.len(), 2);
        assert_eq!(graph.tasks().collect::<Vec<_>>(), vec!["bench", "test"]);
    }

    #[test]
    fn test_deep_chain_does_not_overflow() {
        let mut graph = DependencyGraph::new();
        for i in 1..20_000 {
            graph
                .add_dependency(format!("t{}", i), &[format!("t{}", i - 1)])
                .unwrap();
        }

        let order = graph.resolve_execution_order(&["t19999"]).unwrap();
        assert_eq!(order.len(), 20_000);
        assert_eq!(order[0], "t0");
    }
}
