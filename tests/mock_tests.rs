//! Executor behavior tests against the in-memory mock world.

use hammer::graph::{Command, GraphBuilder, RuleId};
use hammer::progress::NOOP_PROGRESS;
use hammer::{ExecConfig, ExecError, Executor, RuleGraph};

use test_log::test;

use crate::mock::MockWorld;

mod mock;

// Helper functions

fn touch(paths: &[&str]) -> Command {
    Command {
        stages: vec![
            std::iter::once("touch")
                .chain(paths.iter().copied())
                .map(Into::into)
                .collect(),
        ],
        input: None,
        output: None,
        append: false,
    }
}

fn fail() -> Command {
    Command {
        stages: vec![vec!["fail".into()]],
        input: None,
        output: None,
        append: false,
    }
}

fn rule(gb: &mut GraphBuilder, outs: &[&str], ins: &[&str], recipe: Option<Vec<Command>>) -> RuleId {
    let gens = outs
        .iter()
        .map(|p| gb.intern(p.starts_with('.'), *p))
        .collect();
    let deps = ins
        .iter()
        .map(|p| gb.intern(p.starts_with('.'), *p))
        .collect();
    let id = gb.add_rule(gens, deps).unwrap();
    if let Some(seq) = recipe {
        gb.set_recipe(id, seq).unwrap();
    }
    id
}

fn run(
    world: &MockWorld,
    graph: &RuleGraph,
    cfg: &ExecConfig,
    wants: &[&str],
) -> Result<Vec<String>, ExecError> {
    let mut exec = Executor::with_world(cfg, graph, world, &NOOP_PROGRESS);
    for want in wants {
        assert!(exec.want(want), "no rule generates {want}");
    }
    exec.run()?;
    Ok(world.take_log())
}

fn assert_order(log: &[String], before: &str, after: &str) {
    let b = log
        .iter()
        .position(|l| l == before)
        .unwrap_or_else(|| panic!("expected '{before}' in log {log:?}"));
    let a = log
        .iter()
        .position(|l| l == after)
        .unwrap_or_else(|| panic!("expected '{after}' in log {log:?}"));
    assert!(b < a, "expected '{before}' before '{after}', got {log:?}");
}

// 0) Empty graph: run completes without touching anything.
#[test]
fn test_nothing() {
    let graph = GraphBuilder::new().build().unwrap();
    let world = MockWorld::new();
    let cfg = ExecConfig::default();
    let mut exec = Executor::with_world(&cfg, &graph, &world, &NOOP_PROGRESS);
    exec.run().unwrap();
    assert!(world.take_log().is_empty());
}

// 1) Missing output gets built.
#[test]
fn test_single_rule_builds_missing_output() {
    let mut gb = GraphBuilder::new();
    rule(&mut gb, &["out.txt"], &["in.txt"], Some(vec![touch(&["out.txt"])]));
    let graph = gb.build().unwrap();

    let world = MockWorld::new();
    world.touch_file("in.txt");

    let log = run(&world, &graph, &ExecConfig::default(), &["out.txt"]).unwrap();
    assert_eq!(log, vec!["touch out.txt"]);
    assert!(world.exists("out.txt"));
}

// 2) Second run with nothing changed executes zero recipes.
#[test]
fn test_second_run_is_idempotent() {
    let mut gb = GraphBuilder::new();
    rule(&mut gb, &["out.txt"], &["in.txt"], Some(vec![touch(&["out.txt"])]));
    let graph = gb.build().unwrap();

    let world = MockWorld::new();
    world.touch_file("in.txt");

    let first = run(&world, &graph, &ExecConfig::default(), &["out.txt"]).unwrap();
    assert_eq!(first.len(), 1);

    let second = run(&world, &graph, &ExecConfig::default(), &["out.txt"]).unwrap();
    assert!(second.is_empty(), "expected no execution, got {second:?}");
}

// 3) Force reruns an up-to-date rule, once.
#[test]
fn test_force_reruns_clean_rules() {
    let mut gb = GraphBuilder::new();
    rule(&mut gb, &["a.out"], &["a.in"], Some(vec![touch(&["a.out"])]));
    rule(&mut gb, &["b.out"], &["a.out"], Some(vec![touch(&["b.out"])]));
    let graph = gb.build().unwrap();

    let world = MockWorld::new();
    world.touch_file("a.in");

    run(&world, &graph, &ExecConfig::default(), &["b.out"]).unwrap();

    let forced = ExecConfig {
        force: true,
        ..Default::default()
    };
    let log = run(&world, &graph, &forced, &["b.out"]).unwrap();
    assert_eq!(log, vec!["touch a.out", "touch b.out"]);
}

// 4) Touching an input outdates the chain.
#[test]
fn test_touched_input_triggers_rebuild() {
    let mut gb = GraphBuilder::new();
    rule(&mut gb, &["out.txt"], &["in.txt"], Some(vec![touch(&["out.txt"])]));
    let graph = gb.build().unwrap();

    let world = MockWorld::new();
    world.touch_file("in.txt");
    run(&world, &graph, &ExecConfig::default(), &["out.txt"]).unwrap();

    world.touch_file("in.txt");
    let log = run(&world, &graph, &ExecConfig::default(), &["out.txt"]).unwrap();
    assert_eq!(log, vec!["touch out.txt"]);
}

// 5) Dependencies complete before dependents.
#[test]
fn test_linear_dependency_order() {
    let mut gb = GraphBuilder::new();
    rule(&mut gb, &["a.out"], &["a.in"], Some(vec![touch(&["a.out"])]));
    rule(&mut gb, &["b.out"], &["a.out"], Some(vec![touch(&["b.out"])]));
    rule(&mut gb, &["c.out"], &["b.out"], Some(vec![touch(&["c.out"])]));
    let graph = gb.build().unwrap();

    let world = MockWorld::new();
    world.touch_file("a.in");

    let log = run(&world, &graph, &ExecConfig::default(), &["c.out"]).unwrap();
    assert_eq!(log.len(), 3);
    assert_order(&log, "touch a.out", "touch b.out");
    assert_order(&log, "touch b.out", "touch c.out");
}

// 6) A rule with several dependency rules waits for all of them.
#[test]
fn test_multi_input_gatekeeping() {
    let mut gb = GraphBuilder::new();
    rule(&mut gb, &["a.out"], &["a.in"], Some(vec![touch(&["a.out"])]));
    rule(&mut gb, &["c.out"], &["c.in"], Some(vec![touch(&["c.out"])]));
    rule(
        &mut gb,
        &["b.out"],
        &["a.out", "c.out"],
        Some(vec![touch(&["b.out"])]),
    );
    let graph = gb.build().unwrap();

    let world = MockWorld::new();
    world.touch_file("a.in");
    world.touch_file("c.in");

    let log = run(&world, &graph, &ExecConfig { parallelism: 2, force: false }, &["b.out"]).unwrap();
    assert_eq!(log.len(), 3);
    assert_order(&log, "touch a.out", "touch b.out");
    assert_order(&log, "touch c.out", "touch b.out");
}

// 7) A failing command aborts the build; dependents never run.
#[test]
fn test_failure_aborts_build() {
    let mut gb = GraphBuilder::new();
    rule(&mut gb, &["a.out"], &["a.in"], Some(vec![fail()]));
    rule(&mut gb, &["b.out"], &["a.out"], Some(vec![touch(&["b.out"])]));
    let graph = gb.build().unwrap();

    let world = MockWorld::new();
    world.touch_file("a.in");

    let err = run(&world, &graph, &ExecConfig::default(), &["b.out"]).unwrap_err();
    assert!(matches!(err, ExecError::ChildFailed { status: 1, .. }));
    let log = world.take_log();
    assert_eq!(log, vec!["fail"]);
}

// 8) Later commands of a rule do not run after an earlier one fails.
#[test]
fn test_commands_stop_at_first_failure() {
    let mut gb = GraphBuilder::new();
    rule(
        &mut gb,
        &["a.out"],
        &["a.in"],
        Some(vec![fail(), touch(&["a.out"])]),
    );
    let graph = gb.build().unwrap();

    let world = MockWorld::new();
    world.touch_file("a.in");

    run(&world, &graph, &ExecConfig::default(), &["a.out"]).unwrap_err();
    assert_eq!(world.take_log(), vec!["fail"]);
    assert!(!world.exists("a.out"));
}

// 9) Spec targets are always stale.
#[test]
fn test_spec_target_always_runs() {
    let mut gb = GraphBuilder::new();
    rule(&mut gb, &[".all"], &[], Some(vec![touch(&["marker"])]));
    let graph = gb.build().unwrap();

    let world = MockWorld::new();
    for _ in 0..2 {
        let log = run(&world, &graph, &ExecConfig::default(), &[".all"]).unwrap();
        assert_eq!(log, vec!["touch marker"]);
    }
}

// 10) A recipe-less rule completes immediately and releases dependents.
#[test]
fn test_recipeless_rule_releases_dependents() {
    let mut gb = GraphBuilder::new();
    rule(&mut gb, &[".all"], &["out.txt"], None);
    rule(&mut gb, &["out.txt"], &["in.txt"], Some(vec![touch(&["out.txt"])]));
    let graph = gb.build().unwrap();

    let world = MockWorld::new();
    world.touch_file("in.txt");

    let log = run(&world, &graph, &ExecConfig::default(), &[".all"]).unwrap();
    assert_eq!(log, vec!["touch out.txt"]);
}

// 11) Dependencies accumulated by a partial rule participate in
// staleness: touching the merged-in header outdates the object.
#[test]
fn test_partial_rule_dep_outdates_target() {
    let mut gb = GraphBuilder::new();
    let obj = rule(&mut gb, &["foo.o"], &["foo.c"], Some(vec![touch(&["foo.o"])]));
    let o = gb.intern(false, "foo.o");
    let h = gb.intern(false, "foo.h");
    assert_eq!(gb.add_rule(vec![o], vec![h]).unwrap(), obj);
    let graph = gb.build().unwrap();

    let world = MockWorld::new();
    world.touch_file("foo.c");
    world.touch_file("foo.h");

    let first = run(&world, &graph, &ExecConfig::default(), &["foo.o"]).unwrap();
    assert_eq!(first, vec!["touch foo.o"]);

    let clean = run(&world, &graph, &ExecConfig::default(), &["foo.o"]).unwrap();
    assert!(clean.is_empty());

    world.touch_file("foo.h");
    let rebuilt = run(&world, &graph, &ExecConfig::default(), &["foo.o"]).unwrap();
    assert_eq!(rebuilt, vec!["touch foo.o"]);
}

// 12) Output paths with directories get their ancestors created.
#[test]
fn test_parent_directories_created() {
    let mut gb = GraphBuilder::new();
    rule(
        &mut gb,
        &["build/obj/foo.o"],
        &["foo.c"],
        Some(vec![touch(&["build/obj/foo.o"])]),
    );
    let graph = gb.build().unwrap();

    let world = MockWorld::new();
    world.touch_file("foo.c");

    run(&world, &graph, &ExecConfig::default(), &["build/obj/foo.o"]).unwrap();
    let dirs = world.dirs();
    assert_eq!(
        dirs,
        vec![
            std::path::PathBuf::from("build"),
            std::path::PathBuf::from("build/obj")
        ]
    );
}

// 13) want() reports unknown paths; want_default picks the first
// non-spec generator.
#[test]
fn test_want_and_default_target() {
    let mut gb = GraphBuilder::new();
    rule(&mut gb, &[".all"], &["out"], None);
    rule(&mut gb, &["out"], &[], Some(vec![touch(&["out"])]));
    let graph = gb.build().unwrap();

    let world = MockWorld::new();
    let cfg = ExecConfig::default();
    let mut exec = Executor::with_world(&cfg, &graph, &world, &NOOP_PROGRESS);
    assert!(!exec.want("nonexistent"));
    assert_eq!(exec.want_default(), Some("out"));
    exec.run().unwrap();
    assert_eq!(world.take_log(), vec!["touch out"]);
}

// 14) Two independent leaves both run under parallelism.
#[test]
fn test_parallel_leaves() {
    let mut gb = GraphBuilder::new();
    rule(&mut gb, &["d.out"], &["d.in"], Some(vec![touch(&["d.out"])]));
    rule(&mut gb, &["e.out"], &["e.in"], Some(vec![touch(&["e.out"])]));
    let graph = gb.build().unwrap();

    let world = MockWorld::new();
    world.touch_file("d.in");
    world.touch_file("e.in");

    let cfg = ExecConfig {
        parallelism: 2,
        force: false,
    };
    let log = run(&world, &graph, &cfg, &["d.out", "e.out"]).unwrap();
    assert_eq!(log.len(), 2);
    assert!(log.contains(&"touch d.out".to_string()));
    assert!(log.contains(&"touch e.out".to_string()));
}

// 15) A rule requested twice (directly and as a dependency) runs once.
#[test]
fn test_shared_dependency_runs_once() {
    let mut gb = GraphBuilder::new();
    rule(&mut gb, &["base"], &["src"], Some(vec![touch(&["base"])]));
    rule(&mut gb, &["x"], &["base"], Some(vec![touch(&["x"])]));
    rule(&mut gb, &["y"], &["base"], Some(vec![touch(&["y"])]));
    let graph = gb.build().unwrap();

    let world = MockWorld::new();
    world.touch_file("src");

    let log = run(&world, &graph, &ExecConfig::default(), &["x", "y", "base"]).unwrap();
    assert_eq!(log.len(), 3);
    assert_eq!(log.iter().filter(|l| *l == "touch base").count(), 1);
    assert_order(&log, "touch base", "touch x");
    assert_order(&log, "touch base", "touch y");
}
