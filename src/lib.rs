pub mod exec;
pub mod graph;
pub mod progress;
pub mod world;

// Re-exports for convenience
pub use exec::{ExecConfig, ExecError, Executor};
pub use graph::{Command, GraphBuilder, GraphError, Recipe, Rule, RuleGraph, RuleId, TargetId};
pub use progress::{DumbConsoleProgress, NoopProgress, Progress};
pub use world::{LocalWorld, World};
