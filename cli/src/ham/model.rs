//! Source locations, the syntax tree, and the frontend error type.

use std::fmt;
use std::sync::Arc;

use smallvec::SmallVec;
use smol_str::SmolStr;

/// A position in a script, attached to every token and AST node and
/// carried into diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Loc {
    pub path: Arc<str>,
    pub line: u32,
    pub col: u32,
}

impl Loc {
    pub fn new(path: Arc<str>, line: u32, col: u32) -> Self {
        Self { path, line, col }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.path, self.line, self.col)
    }
}

/// Errors raised anywhere in the frontend. Every located failure
/// renders as `file:line:col: message`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}: Invalid escape character '\\{1}'.")]
    InvalidEscape(Loc, char),

    #[error("{0}: Unterminated quote.")]
    UnterminatedQuote(Loc),

    #[error("{0}: Unterminated expansion.")]
    UnterminatedExpansion(Loc),

    #[error("{0}: Invalid variable name.")]
    InvalidVariable(Loc),

    #[error("{0}: Unknown input '{1}'.")]
    StrayChar(Loc, char),

    #[error("{0}: {1}")]
    Parse(Loc, String),

    #[error("{0}: The `{1}` statement is not supported.")]
    Unsupported(Loc, &'static str),

    #[error("{0}: Unknown variable '{1}'.")]
    UnknownVariable(Loc, SmolStr),

    #[error("{0}: {1}")]
    Type(Loc, String),

    #[error("{0}: Function `{1}` expects {2} arguments.")]
    Arity(Loc, SmolStr, usize),

    #[error("{0}: Variable `{1}` can only be used within a recipe.")]
    RecipeOnly(Loc, &'static str),

    #[error("{loc}: {source}")]
    Graph {
        loc: Loc,
        source: hammer::GraphError,
    },

    #[error("{0}: Cannot open '{1}'.")]
    IncludeMissing(Loc, SmolStr),

    #[error("{0}: Invalid makedep file.")]
    InvalidMakedep(Loc),

    #[error("Cannot open '{path}'. {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// A literal word from the source, kept verbatim: quotes, escapes, and
/// `$` references are resolved by the expander, not the lexer.
#[derive(Debug, Clone)]
pub struct Raw {
    pub text: SmolStr,
    /// The word begins with `.` and names a spec (phony) target.
    pub spec: bool,
    pub loc: Loc,
}

/// One whitespace-separated argument list from the source.
#[derive(Debug, Clone, Default)]
pub struct Imm {
    pub raws: SmallVec<[Raw; 2]>,
}

impl Imm {
    pub fn len(&self) -> usize {
        self.raws.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raws.is_empty()
    }
}

/// A brace-delimited sequence of statements.
#[derive(Debug, Default)]
pub struct Block {
    pub stmts: Vec<Stmt>,
}

#[derive(Debug)]
pub enum Stmt {
    Bind(Bind),
    Rule(RuleStmt),
    Loop(Loop),
    Print(Print),
    MkDep(MkDep),
    Block(Block),
    Include(Include),
    Dir(DirStmt),
}

/// `x = ...;`, `x += ...;`, or `x = env { ... }`.
#[derive(Debug)]
pub struct Bind {
    pub id: Raw,
    pub body: BindBody,
    /// Append (`+=`) instead of replace.
    pub add: bool,
}

#[derive(Debug)]
pub enum BindBody {
    Value(Imm),
    Env(Block),
}

/// `a b : c d ;` or `a b : c d { cmd; ... }`.
#[derive(Debug)]
pub struct RuleStmt {
    pub gens: Imm,
    pub deps: Imm,
    pub cmds: Vec<CmdStmt>,
    pub loc: Loc,
}

/// One recipe line: a pipe chain plus optional redirections.
#[derive(Debug)]
pub struct CmdStmt {
    pub pipes: Vec<Imm>,
    pub input: Option<Raw>,
    pub output: Option<Raw>,
    pub append: bool,
}

/// `for x : list stmt`.
#[derive(Debug)]
pub struct Loop {
    pub id: SmolStr,
    pub imm: Imm,
    pub body: Box<Stmt>,
    pub loc: Loc,
}

#[derive(Debug)]
pub struct Print {
    pub imm: Imm,
}

/// `makedep "file";`
#[derive(Debug)]
pub struct MkDep {
    pub paths: Imm,
    pub loc: Loc,
}

/// `include ...;` / `import ...;`, optionally prefixed with `?`.
#[derive(Debug)]
pub struct Include {
    /// `import`: evaluate into a fresh nested scope.
    pub nest: bool,
    /// Missing files are skipped instead of fatal.
    pub opt: bool,
    pub paths: Imm,
    pub loc: Loc,
}

/// `dir "name" { ... }`, with an optional `default` marker.
#[derive(Debug)]
pub struct DirStmt {
    pub name: Raw,
    pub default: bool,
    pub block: Option<Block>,
    pub loc: Loc,
}
