//! Build progress reporting and command echo.

pub mod dumb;
pub mod noop;

pub use dumb::DumbConsoleProgress;
pub use noop::{NOOP_PROGRESS, NoopProgress};

use crate::graph::RuleId;

/// Trait for observing the executor.
///
/// Methods may be called from multiple threads, so implementations must
/// be thread-safe. [`Progress::command_launched`] fires immediately
/// before each pipeline is spawned and receives the rendered command
/// line.
pub trait Progress: Send + Sync {
    /// Callback when a rule is handed to a worker.
    fn rule_started(&self, id: RuleId);

    /// Callback right before one of the rule's pipelines spawns.
    fn command_launched(&self, id: RuleId, line: &str);

    /// Callback when a rule completes (including up-to-date skips).
    fn rule_finished(&self, id: RuleId);

    /// Called once the whole build has finished.
    fn finish(&self);
}
