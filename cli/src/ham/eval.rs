//! Runtime objects, environments, and the tree-walking evaluator.
//!
//! Evaluation is a single pass over the syntax tree: bindings mutate the
//! active environment chain, rules and makedep files are emitted into
//! the shared [`GraphBuilder`], and everything else is scoping.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;

use hammer::graph::{Command, GraphBuilder};
use indexmap::IndexMap;
use smol_str::SmolStr;

use super::expand::{self, ExpandCx, RuleCtx};
use super::makedep;
use super::model::{
    Bind, BindBody, Block, DirStmt, Error, Include, Loc, Loop, RuleStmt, Stmt,
};
use super::parser;

/// One string element of a list value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    pub text: SmolStr,
    /// Names a spec (phony) target.
    pub spec: bool,
}

impl Value {
    pub fn new(text: impl Into<SmolStr>) -> Self {
        Self {
            text: text.into(),
            spec: false,
        }
    }
}

/// A host builtin: receives the implicit subject followed by the call
/// arguments.
pub type Builtin = fn(&[Obj], &Loc) -> Result<Obj, Error>;

/// A runtime object.
#[derive(Debug, Clone)]
pub enum Obj {
    Null,
    List(Vec<Value>),
    Env(Env),
    Func(Builtin),
}

impl Obj {
    pub fn type_name(&self) -> &'static str {
        match self {
            Obj::Null => "null",
            Obj::List(_) => "string list",
            Obj::Env(_) => "environment",
            Obj::Func(_) => "function",
        }
    }
}

/// Combine two objects for `+=`: lists concatenate, environment chains
/// join at the tail, and null is the identity.
pub fn obj_add(cur: Obj, new: Obj, loc: &Loc) -> Result<Obj, Error> {
    match (cur, new) {
        (Obj::Null, obj) => Ok(obj),
        (obj, Obj::Null) => Ok(obj),
        (Obj::List(mut lhs), Obj::List(rhs)) => {
            lhs.extend(rhs);
            Ok(Obj::List(lhs))
        }
        (Obj::Env(lhs), Obj::Env(rhs)) => {
            lhs.append_chain(rhs);
            Ok(Obj::Env(lhs))
        }
        (lhs, rhs) => Err(Error::Type(
            loc.clone(),
            format!(
                "Cannot append a {} to a {}.",
                rhs.type_name(),
                lhs.type_name()
            ),
        )),
    }
}

/// A lexically scoped frame. The handle is shared: the same node can be
/// the active scope, a first-class `env` value, and a loop iteration
/// variable at once. Links only run child-to-parent, so the chains stay
/// cycle-free.
#[derive(Debug, Clone)]
pub struct Env(Rc<EnvNode>);

#[derive(Debug)]
struct EnvNode {
    vars: RefCell<IndexMap<SmolStr, Binding>>,
    parent: RefCell<Option<Env>>,
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub obj: Obj,
    pub loc: Loc,
}

impl Env {
    /// The top scope, with the string builtins installed.
    pub fn root() -> Self {
        let env = Self::empty();
        let loc = Loc::new("<builtin>".into(), 0, 0);
        env.put(".sub".into(), Obj::Func(expand::builtin_sub), loc.clone());
        env.put(".pat".into(), Obj::Func(expand::builtin_pat), loc);
        env
    }

    pub fn empty() -> Self {
        Env(Rc::new(EnvNode {
            vars: RefCell::new(IndexMap::new()),
            parent: RefCell::new(None),
        }))
    }

    /// A fresh frame whose lookups fall back to `self`.
    pub fn child(&self) -> Self {
        Env(Rc::new(EnvNode {
            vars: RefCell::new(IndexMap::new()),
            parent: RefCell::new(Some(self.clone())),
        }))
    }

    pub fn parent(&self) -> Option<Env> {
        self.0.parent.borrow().clone()
    }

    /// Cut the parent link, turning this frame into a standalone chain.
    pub fn detach(&self) {
        *self.0.parent.borrow_mut() = None;
    }

    /// Walk the chain for `id`.
    pub fn get(&self, id: &str) -> Option<Obj> {
        let mut cur = Some(self.clone());
        while let Some(env) = cur {
            if let Some(binding) = env.0.vars.borrow().get(id) {
                return Some(binding.obj.clone());
            }
            cur = env.parent();
        }
        None
    }

    /// Look up `id` in this frame only.
    pub fn get_local(&self, id: &str) -> Option<Obj> {
        self.0.vars.borrow().get(id).map(|b| b.obj.clone())
    }

    /// Insert a binding into this frame, shadowing any previous one.
    pub fn put(&self, id: SmolStr, obj: Obj, loc: Loc) {
        self.0.vars.borrow_mut().insert(id, Binding { obj, loc });
    }

    /// Append `tail` after the last frame of this chain.
    fn append_chain(&self, tail: Env) {
        let mut cur = self.clone();
        while let Some(next) = cur.parent() {
            cur = next;
        }
        *cur.0.parent.borrow_mut() = Some(tail);
    }
}

#[derive(Debug, Default)]
pub struct EvalOptions {
    /// The `-d` selection matched against `dir` blocks.
    pub dir: Option<String>,
}

/// The evaluator. Holds the graph under construction and the output
/// sink that `print` writes to.
pub struct Evaluator<'a> {
    builder: &'a mut GraphBuilder,
    opts: &'a EvalOptions,
    out: &'a mut dyn Write,
    /// The directory selected by a matched `dir` block; serves `$~`.
    dir: Option<SmolStr>,
}

impl<'a> Evaluator<'a> {
    pub fn new(
        builder: &'a mut GraphBuilder,
        opts: &'a EvalOptions,
        out: &'a mut dyn Write,
    ) -> Self {
        Self {
            builder,
            opts,
            out,
            dir: None,
        }
    }

    /// Evaluate a whole script in a fresh top scope.
    pub fn eval_script(&mut self, block: &Block) -> Result<(), Error> {
        let env = Env::root();
        self.eval_block(block, &env)
    }

    fn eval_block(&mut self, block: &Block, env: &Env) -> Result<(), Error> {
        for stmt in &block.stmts {
            self.eval_stmt(stmt, env)?;
        }
        Ok(())
    }

    fn cx<'b>(&'b self, env: &'b Env) -> ExpandCx<'b> {
        ExpandCx {
            env,
            builder: self.builder,
            rule: None,
            dir: self.dir.as_deref(),
        }
    }

    fn eval_stmt(&mut self, stmt: &Stmt, env: &Env) -> Result<(), Error> {
        match stmt {
            Stmt::Bind(bind) => self.eval_bind(bind, env),
            Stmt::Rule(rule) => self.eval_rule(rule, env),
            Stmt::Loop(lp) => self.eval_loop(lp, env),

            Stmt::Print(print) => {
                let values = expand::expand_imm_values(&print.imm, &self.cx(env))?;
                let line = values
                    .iter()
                    .map(|v| v.text.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                write!(self.out, "{line}").map_err(|source| Error::Io {
                    path: "<stdout>".into(),
                    source,
                })
            }

            Stmt::Block(block) => {
                let scope = env.child();
                self.eval_block(block, &scope)
            }

            Stmt::Include(inc) => self.eval_include(inc, env),

            Stmt::MkDep(dep) => {
                let paths = expand::expand_imm_values(&dep.paths, &self.cx(env))?;
                for path in paths {
                    makedep::ingest_file(self.builder, path.text.as_str(), false)?;
                }
                Ok(())
            }

            Stmt::Dir(dir) => self.eval_dir(dir, env),
        }
    }

    fn eval_bind(&mut self, bind: &Bind, env: &Env) -> Result<(), Error> {
        let id_obj = expand::expand_raw(&bind.id, &self.cx(env))?;
        let id = expand::value_single(id_obj, &bind.id.loc, "Invalid variable name.")?;

        let obj = match &bind.body {
            BindBody::Value(imm) => expand::expand_imm_obj(imm, &self.cx(env))?,
            BindBody::Env(block) => {
                // Evaluate with lexical lookups available, then detach
                // so the value is a standalone chain.
                let scope = env.child();
                self.eval_block(block, &scope)?;
                scope.detach();
                Obj::Env(scope)
            }
        };

        let obj = match (bind.add, env.get_local(&id)) {
            (true, Some(existing)) => obj_add(existing, obj, &bind.id.loc)?,
            _ => obj,
        };
        env.put(id, obj, bind.id.loc.clone());
        Ok(())
    }

    fn eval_rule(&mut self, rule: &RuleStmt, env: &Env) -> Result<(), Error> {
        let gens = expand::expand_imm_values(&rule.gens, &self.cx(env))?;
        let deps = expand::expand_imm_values(&rule.deps, &self.cx(env))?;

        let gen_ids: Vec<_> = gens
            .iter()
            .map(|v| self.builder.intern(v.spec, v.text.clone()))
            .collect();
        let dep_ids: Vec<_> = deps
            .iter()
            .map(|v| self.builder.intern(v.spec, v.text.clone()))
            .collect();

        let id = self
            .builder
            .add_rule(gen_ids, dep_ids)
            .map_err(|source| Error::Graph {
                loc: rule.loc.clone(),
                source,
            })?;

        if rule.cmds.is_empty() {
            return Ok(());
        }

        // Publish the rule context so `$@ $^ $< $*` resolve while the
        // recipe expands.
        let rule_cx = RuleCtx {
            gens: &gens,
            deps: &deps,
        };
        let mut recipe = Vec::with_capacity(rule.cmds.len());
        for cmd in &rule.cmds {
            let cx = ExpandCx {
                env,
                builder: &*self.builder,
                rule: Some(&rule_cx),
                dir: self.dir.as_deref(),
            };

            let mut stages = Vec::with_capacity(cmd.pipes.len());
            for pipe in &cmd.pipes {
                let argv = expand::expand_imm_values(pipe, &cx)?;
                if argv.is_empty() {
                    return Err(Error::Type(
                        rule.loc.clone(),
                        "Empty command in recipe.".into(),
                    ));
                }
                stages.push(argv.into_iter().map(|v| v.text).collect());
            }
            let input = match &cmd.input {
                Some(raw) => Some(expand::expand_single(raw, &cx)?),
                None => None,
            };
            let output = match &cmd.output {
                Some(raw) => Some(expand::expand_single(raw, &cx)?),
                None => None,
            };
            recipe.push(Command {
                stages,
                input,
                output,
                append: cmd.append,
            });
        }

        self.builder
            .set_recipe(id, recipe)
            .map_err(|source| Error::Graph {
                loc: rule.loc.clone(),
                source,
            })
    }

    fn eval_loop(&mut self, lp: &Loop, env: &Env) -> Result<(), Error> {
        let obj = expand::expand_imm_obj(&lp.imm, &self.cx(env))?;
        match obj {
            Obj::List(values) => {
                for value in values {
                    let scope = env.child();
                    scope.put(lp.id.clone(), Obj::List(vec![value]), lp.loc.clone());
                    self.eval_stmt(&lp.body, &scope)?;
                }
                Ok(())
            }
            Obj::Env(head) => {
                let mut cur = Some(head);
                while let Some(node) = cur {
                    let scope = env.child();
                    scope.put(lp.id.clone(), Obj::Env(node.clone()), lp.loc.clone());
                    self.eval_stmt(&lp.body, &scope)?;
                    cur = node.parent();
                }
                Ok(())
            }
            obj => Err(Error::Type(
                lp.loc.clone(),
                format!("Cannot iterate over a {}.", obj.type_name()),
            )),
        }
    }

    fn eval_include(&mut self, inc: &Include, env: &Env) -> Result<(), Error> {
        let paths = expand::expand_imm_values(&inc.paths, &self.cx(env))?;
        for path in paths {
            let source = match std::fs::read_to_string(path.text.as_str()) {
                Ok(source) => source,
                Err(_) if inc.opt => continue,
                Err(_) => {
                    return Err(Error::IncludeMissing(inc.loc.clone(), path.text.clone()));
                }
            };
            let block = parser::parse(path.text.as_str(), &source)?;
            if inc.nest {
                // `import`: assignments stay local to the sub-script.
                let scope = env.child();
                self.eval_block(&block, &scope)?;
            } else {
                self.eval_block(&block, env)?;
            }
        }
        Ok(())
    }

    fn eval_dir(&mut self, dir: &DirStmt, env: &Env) -> Result<(), Error> {
        let name = expand::expand_single(&dir.name, &self.cx(env))?;
        let matched = if dir.default {
            self.opts.dir.is_none() && self.dir.is_none()
        } else {
            self.opts.dir.as_deref() == Some(name.as_str())
        };
        if matched {
            self.dir = Some(name);
            if let Some(block) = &dir.block {
                self.eval_block(block, env)?;
            }
        }
        Ok(())
    }
}
