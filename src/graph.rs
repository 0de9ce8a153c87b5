//! Rule graph representation and construction.

use std::fmt::Write;

use indexmap::IndexMap;
use petgraph::prelude::DiGraphMap;
use smol_str::SmolStr;

/// An index that uniquely identifies a target in the rule graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(usize);

/// An index that uniquely identifies a rule in the rule graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(usize);

/// A single file (or phony name) referenced by the graph.
///
/// The path itself is the key of the interning map; a path resolves to
/// exactly one target for the lifetime of the graph.
#[derive(Debug, Default)]
pub struct Target {
    /// Phony target (path begins with `.`); never stat'd, always stale.
    pub spec: bool,
    /// Generated by some rule rather than taken from the source tree.
    pub built: bool,
    /// The rule that generates this target, if any.
    pub rule: Option<RuleId>,
    /// Rules that list this target as a dependency.
    pub out_edges: Vec<RuleId>,
}

/// One recipe line: a pipe chain with optional redirections, fully
/// expanded down to argv strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// The `|`-separated stages; each stage is one argv.
    pub stages: Vec<Vec<SmolStr>>,
    /// Redirected stdin for the first stage.
    pub input: Option<SmolStr>,
    /// Redirected stdout for the last stage.
    pub output: Option<SmolStr>,
    /// Open the output for appending instead of truncating.
    pub append: bool,
}

impl Command {
    /// Render the line the way it is echoed before spawning.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                out.push_str(" | ");
            }
            for (j, arg) in stage.iter().enumerate() {
                if j > 0 {
                    out.push(' ');
                }
                out.push_str(arg);
            }
        }
        if let Some(input) = &self.input {
            let _ = write!(out, " < {input}");
        }
        if let Some(output) = &self.output {
            let _ = write!(out, " {} {output}", if self.append { ">>" } else { ">" });
        }
        out
    }
}

/// The ordered command list attached to a rule.
pub type Recipe = Vec<Command>;

/// A build rule: the targets it generates, the targets it depends on,
/// and an optional recipe.
#[derive(Debug)]
pub struct Rule {
    pub gens: Vec<TargetId>,
    pub deps: Vec<TargetId>,
    pub recipe: Option<Recipe>,
}

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("All rules must have at least one target.")]
    NoGenerators,

    #[error("Target '{0}' is already generated by another rule.")]
    DuplicateRule(SmolStr),

    #[error("Partial rules must have matching target lists.")]
    MergeMismatch,

    #[error("Rule for '{0}' already has a recipe.")]
    RecipeConflict(SmolStr),

    #[error("The rule graph contains a dependency cycle.")]
    ContainsCycle,
}

/// The frozen graph handed to the executor.
///
/// This type is immutable. To construct it, use [`GraphBuilder`].
#[derive(Debug, Default)]
pub struct RuleGraph {
    targets: IndexMap<SmolStr, Target>,
    rules: Vec<Rule>,
    /// Rule-to-rule dependency relation; edges point from the dependent
    /// rule to the rule it waits on.
    pub(crate) deps: DiGraphMap<RuleId, ()>,
}

impl RuleGraph {
    pub fn target(&self, id: TargetId) -> &Target {
        self.targets
            .get_index(id.0)
            .expect("target id out of range")
            .1
    }

    pub fn path(&self, id: TargetId) -> &str {
        self.targets
            .get_index(id.0)
            .expect("target id out of range")
            .0
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        self.rules.get(id.0).expect("rule id out of range")
    }

    pub fn rules(&self) -> impl Iterator<Item = (RuleId, &Rule)> {
        self.rules.iter().enumerate().map(|(i, r)| (RuleId(i), r))
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn lookup_target(&self, path: &str) -> Option<TargetId> {
        self.targets.get_index_of(path).map(TargetId)
    }

    /// The rule whose generators include the target at `path`.
    pub fn rule_for_path(&self, path: &str) -> Option<RuleId> {
        self.targets.get(path).and_then(|t| t.rule)
    }

    /// Rules that must complete before `id` may start.
    pub fn rule_dependencies(&self, id: RuleId) -> impl Iterator<Item = RuleId> + '_ {
        self.deps
            .neighbors_directed(id, petgraph::Direction::Outgoing)
    }

    /// Rules waiting on the completion of `id`.
    pub fn rule_dependents(&self, id: RuleId) -> impl Iterator<Item = RuleId> + '_ {
        self.deps
            .neighbors_directed(id, petgraph::Direction::Incoming)
    }

    /// The no-argument build policy: the first non-spec generator of the
    /// first-declared rule that has one.
    pub fn first_default_target(&self) -> Option<&str> {
        self.rules.iter().find_map(|rule| {
            rule.gens
                .iter()
                .find(|&&g| !self.target(g).spec)
                .map(|&g| self.path(g))
        })
    }
}

/// The builder that assembles a [`RuleGraph`].
///
/// The builder is append-only: targets and rules can be added and rules
/// can gain dependencies through the partial-rule merge, but nothing is
/// ever removed.
#[derive(Debug, Default)]
pub struct GraphBuilder {
    targets: IndexMap<SmolStr, Target>,
    rules: Vec<Rule>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    /// Retrieve the target for `path`, creating it if required.
    pub fn intern(&mut self, spec: bool, path: impl Into<SmolStr>) -> TargetId {
        let path = path.into();
        if let Some(id) = self.targets.get_index_of(&path) {
            return TargetId(id);
        }
        let id = self.targets.len();
        self.targets.insert(
            path,
            Target {
                spec,
                ..Default::default()
            },
        );
        TargetId(id)
    }

    pub fn path(&self, id: TargetId) -> &str {
        self.targets
            .get_index(id.0)
            .expect("target id out of range")
            .0
    }

    pub fn target(&self, id: TargetId) -> &Target {
        self.targets
            .get_index(id.0)
            .expect("target id out of range")
            .1
    }

    fn target_mut(&mut self, id: TargetId) -> &mut Target {
        self.targets
            .get_index_mut(id.0)
            .expect("target id out of range")
            .1
    }

    pub fn rule(&self, id: RuleId) -> &Rule {
        self.rules.get(id.0).expect("rule id out of range")
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// All non-spec generated target paths, in rule declaration order.
    pub fn built_paths(&self) -> impl Iterator<Item = &str> {
        self.rules
            .iter()
            .flat_map(|r| r.gens.iter())
            .filter(|&&g| !self.target(g).spec)
            .map(|&g| self.path(g))
    }

    /// Add a rule generating `gens` from `deps`.
    ///
    /// If the first generator already belongs to a rule, this is a
    /// partial-rule declaration: the existing rule must have an
    /// identical generator set, and the new dependencies are appended
    /// to it. Otherwise a fresh rule is created and each generator
    /// bound to it.
    pub fn add_rule(
        &mut self,
        gens: Vec<TargetId>,
        deps: Vec<TargetId>,
    ) -> Result<RuleId, GraphError> {
        let Some(&first) = gens.first() else {
            return Err(GraphError::NoGenerators);
        };

        if let Some(id) = self.target(first).rule {
            let rule = self.rule(id);
            if rule.gens.len() != gens.len() || gens.iter().any(|g| !rule.gens.contains(g)) {
                return Err(GraphError::MergeMismatch);
            }

            for &dep in &deps {
                self.target_mut(dep).out_edges.push(id);
            }
            self.rules[id.0].deps.extend(deps);
            return Ok(id);
        }

        let id = RuleId(self.rules.len());
        for &g in &gens {
            if self.target(g).rule.is_some() {
                return Err(GraphError::DuplicateRule(self.path(g).into()));
            }
        }
        for &g in &gens {
            let target = self.target_mut(g);
            target.rule = Some(id);
            if !target.spec {
                target.built = true;
            }
        }
        for &dep in &deps {
            self.target_mut(dep).out_edges.push(id);
        }
        self.rules.push(Rule {
            gens,
            deps,
            recipe: None,
        });
        Ok(id)
    }

    /// Attach a recipe to a rule. At most one recipe per rule.
    pub fn set_recipe(&mut self, id: RuleId, recipe: Recipe) -> Result<(), GraphError> {
        if self
            .rules
            .get(id.0)
            .expect("rule id out of range")
            .recipe
            .is_some()
        {
            let first = self.rules[id.0].gens[0];
            return Err(GraphError::RecipeConflict(self.path(first).into()));
        }
        self.rules[id.0].recipe = Some(recipe);
        Ok(())
    }

    /// Finish construction: derive the rule-to-rule dependency relation
    /// and reject cyclic graphs.
    pub fn build(self) -> Result<RuleGraph, GraphError> {
        let mut deps = DiGraphMap::new();
        for (i, rule) in self.rules.iter().enumerate() {
            let id = RuleId(i);
            deps.add_node(id);
            for &dep in &rule.deps {
                if let Some(producer) = self.target(dep).rule {
                    deps.add_edge(id, producer, ());
                }
            }
        }
        if petgraph::algo::is_cyclic_directed(&deps) {
            return Err(GraphError::ContainsCycle);
        }
        Ok(RuleGraph {
            targets: self.targets,
            rules: self.rules,
            deps,
        })
    }
}
