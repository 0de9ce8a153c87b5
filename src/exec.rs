//! Staleness checking and bounded-parallel rule execution.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::Path;
use std::sync::{Arc, mpsc};

use rayon::Scope;
use tracing::{debug, info};

use crate::graph::{Recipe, RuleGraph, RuleId, TargetId};
use crate::progress::Progress;
use crate::world::{LOCAL_WORLD, World};

#[derive(Debug)]
pub struct ExecConfig {
    /// The maximum number of rules running concurrently.
    pub parallelism: usize,
    /// Treat every rule as dirty regardless of mtimes.
    pub force: bool,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            parallelism: 1,
            force: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("Command `{line}` failed with status {status}.")]
    ChildFailed { line: String, status: i32 },

    #[error("Failed to run `{line}`: {source}")]
    Spawn {
        line: String,
        source: std::io::Error,
    },

    #[error("Failed to create directory '{path}': {source}")]
    Mkdir {
        path: String,
        source: std::io::Error,
    },
}

/// Internal shared state handed to each worker task.
struct SharedState<'a> {
    graph: &'a RuleGraph,
    world: &'a dyn World,
    progress: &'a dyn Progress,
    pool: rayon::ThreadPool,
}

/// The executor that runs a rule graph.
///
/// # The scheduling model
///
/// A single coordinator thread owns every piece of mutable state: the
/// FIFO ready queue, the pending-dependency counts, and the mtime
/// cache. Parallelism comes from worker tasks that only spawn and wait
/// on child processes, reporting back over a channel.
///
/// Seeding walks the dependency relation from each wanted rule: a rule
/// with no unfinished dependency rules goes straight onto the queue,
/// anything else records how many rules it still waits for. Whenever a
/// rule completes, each tracked dependent's count drops by one and
/// rules reaching zero join the queue. The build is done when the queue
/// is empty and nothing is in flight.
///
/// Staleness is decided by the coordinator right before dispatch: a
/// rule is dirty when the newest non-spec dependency outdates the
/// oldest generator (spec generators are always stale), or when
/// [`ExecConfig::force`] is set. Clean rules and rules without a recipe
/// complete without spawning anything.
pub struct Executor<'a> {
    cfg: &'a ExecConfig,
    state: Arc<SharedState<'a>>,

    /// Rules whose dependencies have all completed, in FIFO order.
    queue: VecDeque<RuleId>,
    /// Rules already visited by the enqueue walk.
    added: HashSet<RuleId>,
    /// Unfinished dependency-rule count per tracked rule.
    pending: HashMap<RuleId, usize>,
    /// Cached target mtimes; entries are dropped when a rule generating
    /// the target completes.
    mtimes: HashMap<TargetId, i64>,

    /// Number of rules currently running on the pool.
    running: usize,
}

#[derive(Debug)]
struct RuleResult {
    id: RuleId,
    result: Result<(), ExecError>,
}

impl<'a> Executor<'a> {
    /// Create an executor against the local filesystem.
    pub fn new(cfg: &'a ExecConfig, graph: &'a RuleGraph, progress: &'a dyn Progress) -> Self {
        Self::with_world(cfg, graph, &LOCAL_WORLD, progress)
    }

    /// Create an executor with a custom [`World`] implementation.
    pub fn with_world(
        cfg: &'a ExecConfig,
        graph: &'a RuleGraph,
        world: &'a dyn World,
        progress: &'a dyn Progress,
    ) -> Self {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.parallelism)
            .build()
            .expect("failed to build worker pool");

        Self {
            cfg,
            state: Arc::new(SharedState {
                graph,
                world,
                progress,
                pool,
            }),
            queue: VecDeque::new(),
            added: HashSet::new(),
            pending: HashMap::new(),
            mtimes: HashMap::new(),
            running: 0,
        }
    }

    /// Request that the rule generating `path` (and, recursively,
    /// everything it depends on) be brought up to date. Returns false
    /// when no rule generates `path`.
    pub fn want(&mut self, path: &str) -> bool {
        let Some(rule) = self.state.graph.rule_for_path(path) else {
            return false;
        };
        self.enqueue(rule);
        true
    }

    /// Seed the build with the graph's default target, returning its
    /// path, or `None` when the graph generates nothing.
    pub fn want_default(&mut self) -> Option<&'a str> {
        let path = self.state.graph.first_default_target()?;
        self.want(path);
        Some(path)
    }

    fn enqueue(&mut self, rule: RuleId) {
        let graph = self.state.graph;
        let mut stack = vec![rule];
        while let Some(id) = stack.pop() {
            if !self.added.insert(id) {
                continue;
            }

            let mut count = 0;
            for dep in graph.rule_dependencies(id) {
                count += 1;
                stack.push(dep);
            }
            if count == 0 {
                self.queue.push_back(id);
            } else {
                self.pending.insert(id, count);
            }
        }
    }

    /// Run until every requested rule has completed. Any command
    /// failure aborts the build; siblings already in flight are reaped
    /// on the way out.
    pub fn run(&mut self) -> Result<(), ExecError> {
        let state = self.state.clone();
        let (tx, rx) = mpsc::channel::<RuleResult>();
        let result = state.pool.in_place_scope(|pool| self.run_inner(pool, tx, &rx));
        state.progress.finish();
        result
    }

    fn run_inner<'scope>(
        &mut self,
        pool: &Scope<'scope>,
        tx: mpsc::Sender<RuleResult>,
        rx: &mpsc::Receiver<RuleResult>,
    ) -> Result<(), ExecError>
    where
        'a: 'scope,
    {
        loop {
            debug!(
                running = self.running,
                queued = self.queue.len(),
                waiting = self.pending.len(),
                "scheduler iteration"
            );

            // Fill every free slot. Rules that turn out clean complete
            // inline and may refill the queue as we go.
            while self.running < self.cfg.parallelism {
                let Some(rule) = self.queue.pop_front() else {
                    break;
                };
                self.dispatch(pool, tx.clone(), rule)?;
            }

            if self.running == 0 {
                // Nothing in flight and (necessarily) an empty queue.
                break;
            }

            let msg = rx.recv().expect("a sender is held locally");
            debug!(id = ?msg.id, "rule finished");
            self.running -= 1;
            msg.result?;
            self.complete(msg.id);
        }

        info!("build finished");
        Ok(())
    }

    /// Decide staleness for a popped rule and either complete it on the
    /// spot or hand it to a worker.
    fn dispatch<'scope>(
        &mut self,
        pool: &Scope<'scope>,
        tx: mpsc::Sender<RuleResult>,
        id: RuleId,
    ) -> Result<(), ExecError>
    where
        'a: 'scope,
    {
        if !self.cfg.force && !self.is_stale(id) {
            debug!(?id, "rule is up to date");
            self.complete(id);
            return Ok(());
        }

        self.prepare_dirs(id)?;

        let recipe = self
            .state
            .graph
            .rule(id)
            .recipe
            .clone()
            .filter(|seq| !seq.is_empty());
        let Some(recipe) = recipe else {
            self.complete(id);
            return Ok(());
        };

        info!(?id, "starting rule");
        self.state.progress.rule_started(id);
        self.running += 1;
        let state = self.state.clone();
        pool.spawn(move |_| run_rule(state, id, recipe, tx));
        Ok(())
    }

    /// A rule is dirty when the newest non-spec dependency is newer
    /// than the oldest generator.
    fn is_stale(&mut self, id: RuleId) -> bool {
        let graph = self.state.graph;
        let rule = graph.rule(id);

        let mut min = i64::MAX - 1;
        let mut max = i64::MIN + 1;

        for &g in &rule.gens {
            if graph.target(g).spec {
                min = i64::MIN;
                max = i64::MAX;
                continue;
            }
            min = min.min(self.mtime(g));
        }
        for &d in &rule.deps {
            if graph.target(d).spec {
                continue;
            }
            max = max.max(self.mtime(d));
        }

        max > min
    }

    fn mtime(&mut self, id: TargetId) -> i64 {
        if let Some(&cached) = self.mtimes.get(&id) {
            return cached;
        }
        let mtime = self.state.world.mtime(Path::new(self.state.graph.path(id)));
        self.mtimes.insert(id, mtime);
        mtime
    }

    /// Create the parent directories of every non-spec generator.
    fn prepare_dirs(&self, id: RuleId) -> Result<(), ExecError> {
        let graph = self.state.graph;
        for &g in &graph.rule(id).gens {
            if graph.target(g).spec {
                continue;
            }
            let path = graph.path(g);
            let mut from = 0;
            while let Some(pos) = path[from..].find('/') {
                let prefix = &path[..from + pos];
                if !prefix.is_empty() {
                    self.state
                        .world
                        .mkdir(Path::new(prefix))
                        .map_err(|source| ExecError::Mkdir {
                            path: prefix.to_owned(),
                            source,
                        })?;
                }
                from += pos + 1;
            }
        }
        Ok(())
    }

    /// Mark a rule completed: drop its generators' cached mtimes and
    /// release dependents whose last dependency this was.
    fn complete(&mut self, id: RuleId) {
        let graph = self.state.graph;
        for &g in &graph.rule(id).gens {
            self.mtimes.remove(&g);
        }
        self.state.progress.rule_finished(id);

        let dependents: Vec<RuleId> = graph.rule_dependents(id).collect();
        for dependent in dependents {
            // Untracked rules were never requested; leave them alone.
            let Some(count) = self.pending.get_mut(&dependent) else {
                continue;
            };
            *count -= 1;
            if *count == 0 {
                self.pending.remove(&dependent);
                self.queue.push_back(dependent);
            }
        }
    }
}

/// Worker entry: run the rule's commands strictly in source order and
/// report the outcome.
fn run_rule(
    state: Arc<SharedState<'_>>,
    id: RuleId,
    recipe: Recipe,
    report: mpsc::Sender<RuleResult>,
) {
    let result = run_recipe(&state, id, &recipe);
    // The coordinator may have aborted already; nothing to do then.
    let _ = report.send(RuleResult { id, result });
}

fn run_recipe(state: &SharedState<'_>, id: RuleId, recipe: &Recipe) -> Result<(), ExecError> {
    for cmd in recipe {
        let line = cmd.render();
        state.progress.command_launched(id, &line);
        match state.world.execute(cmd) {
            Ok(0) => {}
            Ok(status) => return Err(ExecError::ChildFailed { line, status }),
            Err(source) => return Err(ExecError::Spawn { line, source }),
        }
    }
    Ok(())
}
