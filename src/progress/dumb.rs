//! Dumb console progress: echo each command line to stdout.

use crate::graph::RuleId;
use crate::progress::Progress;

pub struct DumbConsoleProgress;

impl Progress for DumbConsoleProgress {
    fn rule_started(&self, _id: RuleId) {}

    fn command_launched(&self, _id: RuleId, line: &str) {
        println!("{line}");
    }

    fn rule_finished(&self, _id: RuleId) {}

    fn finish(&self) {}
}
