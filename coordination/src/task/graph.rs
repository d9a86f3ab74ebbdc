//! Task dependency graph: loading and validation.
//!
//! The graph is validated once at load time: ids must be unique and
//! non-empty, every dependency must name a task in the document, and the
//! dependency relation must be acyclic. A cycle is reported with the
//! offending path spelled out (`A -> B -> A`, read as "A depends on B
//! depends on A").

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::path::Path;

use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::document::DocumentFormat;
use crate::task::types::{Property, Task};

/// A dependency cycle, in order, with the first task repeated at the end.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("cyclic dependency: {}", .cycle.join(" -> "))]
pub struct CyclicDependencyError {
    pub cycle: Vec<String>,
}

/// Fatal task-graph problems detected at load time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    #[error(transparent)]
    Cycle(#[from] CyclicDependencyError),

    #[error("Task {task} depends on unknown task {dependency}")]
    MissingDependency { task: String, dependency: String },

    #[error("Duplicate task id: {id}")]
    DuplicateTask { id: String },

    #[error("Task with empty id")]
    EmptyTaskId,

    #[error("Unknown task: {id}")]
    UnknownTask { id: String },

    #[error("Failed to parse {format} task graph: {message}")]
    Parse { format: String, message: String },

    #[error("Failed to read task graph {path}: {message}")]
    Io { path: String, message: String },

    #[error("Unsupported task graph format: {path} (expected .json, .yaml, .yml or .toml)")]
    UnknownFormat { path: String },
}

impl GraphError {
    pub fn recovery_suggestion(&self) -> &'static str {
        match self {
            Self::Cycle(_) => "Break the cycle by removing one of the listed dependency edges.",
            Self::MissingDependency { .. } => {
                "Add the missing task to the graph or drop the dependency."
            }
            Self::DuplicateTask { .. } => "Task ids must be unique; rename one of the tasks.",
            Self::EmptyTaskId => "Every task needs a non-empty id.",
            Self::UnknownTask { .. } => "List tasks with `mergeguard plan` to see valid ids.",
            Self::Parse { .. } => "Fix the document syntax and field names, then reload.",
            Self::Io { .. } => "Check the graph path exists and is readable.",
            Self::UnknownFormat { .. } => "Rename the file with a .json, .yaml or .toml extension.",
        }
    }
}

/// On-disk shape of a task graph.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskGraphDocument {
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// Validated, immutable task graph.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    tasks: BTreeMap<String, Task>,
    properties: BTreeMap<String, Property>,
    /// Dependencies-first order, ties broken by id.
    order: Vec<String>,
}

impl TaskGraph {
    /// Validate a document and build the graph.
    pub fn from_document(doc: TaskGraphDocument) -> Result<Self, GraphError> {
        let mut tasks = BTreeMap::new();
        for task in doc.tasks {
            if task.id.trim().is_empty() {
                return Err(GraphError::EmptyTaskId);
            }
            if tasks.contains_key(&task.id) {
                return Err(GraphError::DuplicateTask { id: task.id });
            }
            tasks.insert(task.id.clone(), task);
        }

        for task in tasks.values() {
            for dep in &task.dependencies {
                if !tasks.contains_key(dep) {
                    return Err(GraphError::MissingDependency {
                        task: task.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        let properties: BTreeMap<String, Property> = doc
            .properties
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        if !properties.is_empty() {
            for task in tasks.values() {
                for prop in task.declared_properties.iter() {
                    if !properties.contains_key(prop) {
                        warn!(task_id = %task.id, property = %prop, "task references undeclared property");
                    }
                }
            }
        }

        let order = dependency_order(&tasks)?;
        Ok(Self {
            tasks,
            properties,
            order,
        })
    }

    /// Build from a plain list of tasks.
    pub fn from_tasks(tasks: Vec<Task>) -> Result<Self, GraphError> {
        Self::from_document(TaskGraphDocument {
            properties: Vec::new(),
            tasks,
        })
    }

    /// Parse a document in the given format.
    pub fn parse(content: &str, format: DocumentFormat) -> Result<Self, GraphError> {
        let doc: TaskGraphDocument = format.parse(content).map_err(|message| GraphError::Parse {
            format: format.to_string(),
            message,
        })?;
        Self::from_document(doc)
    }

    /// Load a graph document, picking the format from the extension.
    pub fn load(path: &Path) -> Result<Self, GraphError> {
        let format = DocumentFormat::from_path(path).ok_or_else(|| GraphError::UnknownFormat {
            path: path.display().to_string(),
        })?;
        let content = std::fs::read_to_string(path).map_err(|e| GraphError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::parse(&content, format)
    }

    pub fn get(&self, id: &str) -> Option<&Task> {
        self.tasks.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks in id order.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.values()
    }

    pub fn properties(&self) -> impl Iterator<Item = &Property> {
        self.properties.values()
    }

    /// Dependencies-first order.
    pub fn topological_order(&self) -> &[String] {
        &self.order
    }

    /// Tasks that list `id` as a direct dependency.
    pub fn dependents(&self, id: &str) -> Vec<&Task> {
        self.tasks
            .values()
            .filter(|t| t.dependencies.contains(id))
            .collect()
    }

    /// Every task that transitively depends on `id`.
    pub fn transitive_dependents(&self, id: &str) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([id.to_string()]);
        while let Some(current) = queue.pop_front() {
            for dependent in self.dependents(&current) {
                if seen.insert(dependent.id.clone()) {
                    queue.push_back(dependent.id.clone());
                }
            }
        }
        seen
    }

    /// Remove a task and drop it from its dependents' dependency sets.
    pub fn excise(&mut self, id: &str) -> Result<Task, GraphError> {
        let removed = self.tasks.remove(id).ok_or_else(|| GraphError::UnknownTask {
            id: id.to_string(),
        })?;
        for task in self.tasks.values_mut() {
            task.dependencies.remove(id);
        }
        self.order.retain(|t| t != id);
        Ok(removed)
    }
}

/// Compute a dependencies-first order, or name a cycle.
fn dependency_order(tasks: &BTreeMap<String, Task>) -> Result<Vec<String>, GraphError> {
    // Edges point from a task to each task it depends on.
    let mut graph: DiGraph<String, ()> = DiGraph::new();
    let mut index: HashMap<&str, NodeIndex> = HashMap::new();
    for id in tasks.keys() {
        index.insert(id.as_str(), graph.add_node(id.clone()));
    }
    for task in tasks.values() {
        let from = index[task.id.as_str()];
        for dep in &task.dependencies {
            graph.add_edge(from, index[dep.as_str()], ());
        }
    }

    if let Some(cycle) = find_cycle(&graph) {
        return Err(CyclicDependencyError { cycle }.into());
    }

    // Kahn's algorithm over a BTreeSet so ties resolve by id.
    let mut remaining: BTreeMap<&str, usize> = tasks
        .values()
        .map(|t| (t.id.as_str(), t.dependencies.len()))
        .collect();
    let mut ready: BTreeSet<&str> = remaining
        .iter()
        .filter(|(_, n)| **n == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(tasks.len());
    while let Some(id) = ready.pop_first() {
        remaining.remove(id);
        order.push(id.to_string());
        for task in tasks.values().filter(|t| t.dependencies.contains(id)) {
            if let Some(n) = remaining.get_mut(task.id.as_str()) {
                *n -= 1;
                if *n == 0 {
                    ready.insert(task.id.as_str());
                }
            }
        }
    }
    Ok(order)
}

/// Find the cycle through the smallest task id that sits on any cycle.
fn find_cycle(graph: &DiGraph<String, ()>) -> Option<Vec<String>> {
    let start = tarjan_scc(graph)
        .into_iter()
        .filter(|scc| scc.len() > 1 || graph.contains_edge(scc[0], scc[0]))
        .filter_map(|scc| {
            let members: HashSet<NodeIndex> = scc.iter().copied().collect();
            scc.iter()
                .copied()
                .min_by(|a, b| graph[*a].cmp(&graph[*b]))
                .map(|start| (start, members))
        })
        .min_by(|(a, _), (b, _)| graph[*a].cmp(&graph[*b]))?;

    let (start, members) = start;
    let mut parent: HashMap<NodeIndex, NodeIndex> = HashMap::new();
    let mut visited = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);

    while let Some(node) = queue.pop_front() {
        let mut next: Vec<NodeIndex> = graph
            .neighbors(node)
            .filter(|n| members.contains(n))
            .collect();
        next.sort_by(|a, b| graph[*a].cmp(&graph[*b]));
        next.dedup();

        for succ in next {
            if succ == start {
                let mut path = vec![node];
                let mut cur = node;
                while cur != start {
                    cur = *parent.get(&cur)?;
                    path.push(cur);
                }
                path.reverse();
                let mut names: Vec<String> = path.iter().map(|i| graph[*i].clone()).collect();
                names.push(graph[start].clone());
                return Some(names);
            }
            if visited.insert(succ) {
                parent.insert(succ, node);
                queue.push_back(succ);
            }
        }
    }

    Some(vec![graph[start].clone()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::types::Complexity;

    fn task(id: &str, deps: &[&str]) -> Task {
        deps.iter()
            .fold(Task::new(id, Complexity::M), |t, d| t.with_dependency(*d))
    }

    #[test]
    fn test_valid_graph_order() {
        let graph = TaskGraph::from_tasks(vec![
            task("c", &["b"]),
            task("a", &[]),
            task("b", &["a"]),
        ])
        .unwrap();
        assert_eq!(graph.topological_order(), &["a", "b", "c"]);
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_cycle_is_named() {
        let err = TaskGraph::from_tasks(vec![
            task("a", &["b"]),
            task("b", &["c"]),
            task("c", &["a"]),
            task("d", &[]),
        ])
        .unwrap_err();
        match err {
            GraphError::Cycle(c) => assert_eq!(c.cycle, vec!["a", "b", "c", "a"]),
            other => panic!("expected cycle, got {other:?}"),
        }
    }

    #[test]
    fn test_self_dependency_is_cycle() {
        let err = TaskGraph::from_tasks(vec![task("solo", &["solo"])]).unwrap_err();
        assert_eq!(
            err,
            GraphError::Cycle(CyclicDependencyError {
                cycle: vec!["solo".into(), "solo".into()]
            })
        );
        assert_eq!(err.to_string(), "cyclic dependency: solo -> solo");
    }

    #[test]
    fn test_missing_dependency() {
        let err = TaskGraph::from_tasks(vec![task("a", &["ghost"])]).unwrap_err();
        assert!(matches!(err, GraphError::MissingDependency { ref dependency, .. } if dependency == "ghost"));
    }

    #[test]
    fn test_duplicate_id() {
        let err = TaskGraph::from_tasks(vec![task("a", &[]), task("a", &[])]).unwrap_err();
        assert!(matches!(err, GraphError::DuplicateTask { .. }));
    }

    #[test]
    fn test_parse_yaml_document() {
        let yaml = r#"
properties:
  - id: P-SAFE
    description: no data races
tasks:
  - id: TASK-1
    complexity: S
    properties: [P-SAFE]
  - id: TASK-2
    complexity: L
    dependencies: [TASK-1]
    files: ["src/lib.rs"]
"#;
        let graph = TaskGraph::parse(yaml, DocumentFormat::Yaml).unwrap();
        assert_eq!(graph.get("TASK-2").unwrap().complexity, Complexity::L);
        assert_eq!(graph.properties().count(), 1);
        assert_eq!(graph.transitive_dependents("TASK-1").len(), 1);
    }

    #[test]
    fn test_parse_toml_document() {
        let doc = r#"
[[tasks]]
id = "TASK-1"
complexity = "XL"

[[tasks]]
id = "TASK-2"
dependencies = ["TASK-1"]
"#;
        let graph = TaskGraph::parse(doc, DocumentFormat::Toml).unwrap();
        assert_eq!(graph.get("TASK-2").unwrap().complexity, Complexity::M);
    }

    #[test]
    fn test_excise_unblocks_dependents() {
        let mut graph =
            TaskGraph::from_tasks(vec![task("a", &[]), task("b", &["a"]), task("c", &["b"])])
                .unwrap();
        graph.excise("b").unwrap();
        assert!(graph.get("c").unwrap().dependencies.is_empty());
        assert_eq!(graph.topological_order(), &["a", "c"]);
        assert!(graph.excise("b").is_err());
    }
}
