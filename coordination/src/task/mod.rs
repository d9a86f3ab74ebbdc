//! Tasks, properties and the dependency graph they form.

pub mod graph;
pub mod lifecycle;
pub mod types;

pub use graph::{CyclicDependencyError, GraphError, TaskGraph, TaskGraphDocument};
pub use lifecycle::{IllegalTransition, Lifecycle, TransitionRecord};
pub use types::{Complexity, Property, Task, TaskState};
