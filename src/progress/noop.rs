//! No-op progress reporter.

use crate::graph::RuleId;
use crate::progress::Progress;

/// A silent implementation of the Progress trait, for tests and
/// embedders that capture output elsewhere.
pub struct NoopProgress;

impl Progress for NoopProgress {
    fn rule_started(&self, _id: RuleId) {}

    fn command_launched(&self, _id: RuleId, _line: &str) {}

    fn rule_finished(&self, _id: RuleId) {}

    fn finish(&self) {}
}

/// A global no-op progress instance for convenience.
pub static NOOP_PROGRESS: NoopProgress = NoopProgress;
