//! Recursive-descent parser producing the syntax tree.

use smallvec::SmallVec;

use super::model::{
    Bind, BindBody, Block, CmdStmt, DirStmt, Error, Imm, Include, Loop, MkDep, Print, Raw,
    RuleStmt, Stmt,
};
use super::tokenizer::{Lexer, Tok, TokKind};

/// Parse a whole script.
pub fn parse(path: &str, source: &str) -> Result<Block, Error> {
    let mut parser = Parser::new(path, source)?;
    parser.top()
}

struct Parser {
    lexer: Lexer,
    /// One-token lookahead; the parser never buffers more.
    tok: Tok,
}

impl Parser {
    fn new(path: &str, source: &str) -> Result<Self, Error> {
        let mut lexer = Lexer::new(path, source);
        let tok = lexer.next_tok()?;
        Ok(Self { lexer, tok })
    }

    fn bump(&mut self) -> Result<(), Error> {
        self.tok = self.lexer.next_tok()?;
        Ok(())
    }

    fn fail<T>(&self, msg: &str) -> Result<T, Error> {
        Err(Error::Parse(self.tok.loc.clone(), msg.into()))
    }

    fn expect_semi(&mut self) -> Result<(), Error> {
        if self.tok.kind != TokKind::Semi {
            return self.fail("Expected ';'.");
        }
        self.bump()
    }

    fn top(&mut self) -> Result<Block, Error> {
        let mut stmts = Vec::new();
        while self.tok.kind != TokKind::Eof {
            stmts.push(self.stmt()?);
        }
        Ok(Block { stmts })
    }

    /// A brace-delimited block; the opening `{` is the current token.
    fn block(&mut self) -> Result<Block, Error> {
        debug_assert_eq!(self.tok.kind, TokKind::LBrace);
        self.bump()?;
        let mut stmts = Vec::new();
        while self.tok.kind != TokKind::RBrace {
            if self.tok.kind == TokKind::Eof {
                return self.fail("Expected '}'.");
            }
            stmts.push(self.stmt()?);
        }
        self.bump()?;
        Ok(Block { stmts })
    }

    fn stmt(&mut self) -> Result<Stmt, Error> {
        match self.tok.kind {
            TokKind::Str { .. } => self.bind_or_rule(),

            TokKind::For => {
                let loc = self.tok.loc.clone();
                self.bump()?;
                if !matches!(self.tok.kind, TokKind::Str { .. }) {
                    return self.fail("Expected variable name.");
                }
                let id = self.tok.text.clone();
                self.bump()?;
                if self.tok.kind != TokKind::Colon {
                    return self.fail("Expected ':'.");
                }
                self.bump()?;
                let imm = self.imm()?;
                let body = Box::new(self.stmt()?);
                Ok(Stmt::Loop(Loop {
                    id,
                    imm,
                    body,
                    loc,
                }))
            }

            TokKind::Print => {
                self.bump()?;
                let imm = self.imm()?;
                self.expect_semi()?;
                Ok(Stmt::Print(Print { imm }))
            }

            TokKind::Makedep => {
                let loc = self.tok.loc.clone();
                self.bump()?;
                let paths = self.imm()?;
                self.expect_semi()?;
                Ok(Stmt::MkDep(MkDep { paths, loc }))
            }

            TokKind::Include | TokKind::Import => {
                let nest = self.tok.kind == TokKind::Import;
                let loc = self.tok.loc.clone();
                self.bump()?;
                let opt = if self.tok.kind == TokKind::Question {
                    self.bump()?;
                    true
                } else {
                    false
                };
                let paths = self.imm()?;
                self.expect_semi()?;
                Ok(Stmt::Include(Include {
                    nest,
                    opt,
                    paths,
                    loc,
                }))
            }

            TokKind::Dir => self.dir(),

            TokKind::LBrace => Ok(Stmt::Block(self.block()?)),

            // Lexed but deliberately without statement forms.
            TokKind::If => Err(Error::Unsupported(self.tok.loc.clone(), "if")),
            TokKind::Elif => Err(Error::Unsupported(self.tok.loc.clone(), "elif")),
            TokKind::Else => Err(Error::Unsupported(self.tok.loc.clone(), "else")),

            _ => self.fail("Expected statement."),
        }
    }

    /// A statement opening with a word: assignment or rule.
    fn bind_or_rule(&mut self) -> Result<Stmt, Error> {
        let lhs = self.imm()?;

        match self.tok.kind {
            TokKind::Eq | TokKind::AddEq => {
                let add = self.tok.kind == TokKind::AddEq;
                if lhs.len() >= 2 {
                    return self.fail("Invalid variable name.");
                }
                let id = lhs.raws.into_iter().next().expect("lhs begins with a word");
                self.bump()?;

                // `x = env { ... }` binds an environment literal.
                if matches!(self.tok.kind, TokKind::Str { .. }) && self.tok.text == "env" {
                    self.bump()?;
                    if self.tok.kind != TokKind::LBrace {
                        return self.fail("Expected '{'.");
                    }
                    let block = self.block()?;
                    return Ok(Stmt::Bind(Bind {
                        id,
                        body: BindBody::Env(block),
                        add,
                    }));
                }

                let rhs = self.imm()?;
                self.expect_semi()?;
                Ok(Stmt::Bind(Bind {
                    id,
                    body: BindBody::Value(rhs),
                    add,
                }))
            }

            TokKind::Colon => {
                let loc = self.tok.loc.clone();
                self.bump()?;
                let deps = self.imm()?;

                let mut cmds = Vec::new();
                match self.tok.kind {
                    TokKind::Semi => self.bump()?,
                    TokKind::LBrace => {
                        self.bump()?;
                        while self.tok.kind != TokKind::RBrace {
                            if self.tok.kind == TokKind::Eof {
                                return self.fail("Expected '}'.");
                            }
                            cmds.push(self.cmd()?);
                        }
                        self.bump()?;
                    }
                    _ => return self.fail("Expected ';' or '{'."),
                }

                Ok(Stmt::Rule(RuleStmt {
                    gens: lhs,
                    deps,
                    cmds,
                    loc,
                }))
            }

            _ => self.fail("Expected assignment or rule."),
        }
    }

    /// One recipe line: `imm (| imm)* redirect* ;`.
    fn cmd(&mut self) -> Result<CmdStmt, Error> {
        let mut pipes = vec![self.command_imm()?];
        while self.tok.kind == TokKind::Pipe {
            self.bump()?;
            pipes.push(self.command_imm()?);
        }

        let mut input = None;
        let mut output = None;
        let mut append = false;
        while self.tok.kind != TokKind::Semi {
            match self.tok.kind {
                TokKind::Gt | TokKind::Shr => {
                    if output.is_some() {
                        return self.fail("Output redirect already given.");
                    }
                    append = self.tok.kind == TokKind::Shr;
                    self.bump()?;
                    let Some(raw) = self.raw()? else {
                        return self.fail("Missing output file path.");
                    };
                    output = Some(raw);
                }
                TokKind::Lt => {
                    if input.is_some() {
                        return self.fail("Input redirect already given.");
                    }
                    self.bump()?;
                    let Some(raw) = self.raw()? else {
                        return self.fail("Missing input file path.");
                    };
                    input = Some(raw);
                }
                _ => return self.fail("Expected ';'."),
            }
        }
        self.bump()?;

        Ok(CmdStmt {
            pipes,
            input,
            output,
            append,
        })
    }

    fn command_imm(&mut self) -> Result<Imm, Error> {
        let imm = self.imm()?;
        if imm.is_empty() {
            return self.fail("Expected command.");
        }
        Ok(imm)
    }

    fn dir(&mut self) -> Result<Stmt, Error> {
        let loc = self.tok.loc.clone();
        self.bump()?;
        let Some(name) = self.raw()? else {
            return self.fail("Missing directory name.");
        };
        let default = if self.tok.kind == TokKind::Default {
            self.bump()?;
            true
        } else {
            false
        };
        let block = match self.tok.kind {
            TokKind::LBrace => Some(self.block()?),
            TokKind::Semi => {
                self.bump()?;
                None
            }
            _ => return self.fail("Expected ';' or '{'."),
        };
        Ok(Stmt::Dir(DirStmt {
            name,
            default,
            block,
            loc,
        }))
    }

    /// One word, if the current token is one.
    fn raw(&mut self) -> Result<Option<Raw>, Error> {
        let TokKind::Str { spec } = self.tok.kind else {
            return Ok(None);
        };
        let raw = Raw {
            text: self.tok.text.clone(),
            spec,
            loc: self.tok.loc.clone(),
        };
        self.bump()?;
        Ok(Some(raw))
    }

    /// Zero or more adjacent words.
    fn imm(&mut self) -> Result<Imm, Error> {
        let mut raws = SmallVec::new();
        while let Some(raw) = self.raw()? {
            raws.push(raw);
        }
        Ok(Imm { raws })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(src: &str) -> Block {
        parse("test", src).unwrap()
    }

    fn parse_err(src: &str) -> Error {
        parse("test", src).unwrap_err()
    }

    #[test]
    fn minimal_rule_with_recipe() {
        let block = parse_ok("hello.txt : { echo hi > hello.txt; }");
        assert_eq!(block.stmts.len(), 1);
        let Stmt::Rule(rule) = &block.stmts[0] else {
            panic!("expected rule, got {:?}", block.stmts[0]);
        };
        assert_eq!(rule.gens.len(), 1);
        assert_eq!(rule.gens.raws[0].text, "hello.txt");
        assert!(rule.deps.is_empty());
        assert_eq!(rule.cmds.len(), 1);
        let cmd = &rule.cmds[0];
        assert_eq!(cmd.pipes.len(), 1);
        assert_eq!(cmd.pipes[0].len(), 2);
        assert_eq!(cmd.output.as_ref().unwrap().text, "hello.txt");
        assert!(!cmd.append);
        assert!(cmd.input.is_none());
    }

    #[test]
    fn rule_without_recipe() {
        let block = parse_ok(".all : a b;");
        let Stmt::Rule(rule) = &block.stmts[0] else {
            panic!();
        };
        assert!(rule.gens.raws[0].spec);
        assert_eq!(rule.deps.len(), 2);
        assert!(rule.cmds.is_empty());
    }

    #[test]
    fn pipeline_with_redirects() {
        let block = parse_ok("out.txt : in.txt {\n  cat $< | tr a-z A-Z > $@;\n}");
        let Stmt::Rule(rule) = &block.stmts[0] else {
            panic!();
        };
        let cmd = &rule.cmds[0];
        assert_eq!(cmd.pipes.len(), 2);
        assert_eq!(cmd.pipes[0].raws[0].text, "cat");
        assert_eq!(cmd.pipes[1].raws[0].text, "tr");
        assert_eq!(cmd.output.as_ref().unwrap().text, "$@");
    }

    #[test]
    fn append_and_input_redirects() {
        let block = parse_ok("log : { sort < seed >> log; }");
        let Stmt::Rule(rule) = &block.stmts[0] else {
            panic!();
        };
        let cmd = &rule.cmds[0];
        assert_eq!(cmd.input.as_ref().unwrap().text, "seed");
        assert_eq!(cmd.output.as_ref().unwrap().text, "log");
        assert!(cmd.append);
    }

    #[test]
    fn duplicate_output_redirect_rejected() {
        let err = parse_err("a : { echo > x > y; }");
        assert!(matches!(err, Error::Parse(_, msg) if msg.contains("already given")));
    }

    #[test]
    fn assignment_forms() {
        let block = parse_ok("x = a b;\ny += c;\nz = ;");
        let Stmt::Bind(x) = &block.stmts[0] else {
            panic!();
        };
        assert!(!x.add);
        let BindBody::Value(imm) = &x.body else {
            panic!();
        };
        assert_eq!(imm.len(), 2);

        let Stmt::Bind(y) = &block.stmts[1] else {
            panic!();
        };
        assert!(y.add);

        let Stmt::Bind(z) = &block.stmts[2] else {
            panic!();
        };
        let BindBody::Value(imm) = &z.body else {
            panic!();
        };
        assert!(imm.is_empty());
    }

    #[test]
    fn env_literal_binding() {
        let block = parse_ok("cfg = env { cc = gcc; }");
        let Stmt::Bind(bind) = &block.stmts[0] else {
            panic!();
        };
        let BindBody::Env(body) = &bind.body else {
            panic!("expected env body");
        };
        assert_eq!(body.stmts.len(), 1);
    }

    #[test]
    fn multi_word_assignment_lhs_rejected() {
        let err = parse_err("a b = c;");
        assert!(matches!(err, Error::Parse(_, msg) if msg == "Invalid variable name."));
    }

    #[test]
    fn for_loop_with_block_body() {
        let block = parse_ok("for x : a b c {\n  ${x}.txt : { echo $x > $@; }\n}");
        let Stmt::Loop(lp) = &block.stmts[0] else {
            panic!();
        };
        assert_eq!(lp.id, "x");
        assert_eq!(lp.imm.len(), 3);
        assert!(matches!(&*lp.body, Stmt::Block(_)));
    }

    #[test]
    fn include_and_import() {
        let block = parse_ok("include a.ham;\nimport ? b.ham;");
        let Stmt::Include(inc) = &block.stmts[0] else {
            panic!();
        };
        assert!(!inc.nest);
        assert!(!inc.opt);
        let Stmt::Include(imp) = &block.stmts[1] else {
            panic!();
        };
        assert!(imp.nest);
        assert!(imp.opt);
    }

    #[test]
    fn makedep_statement() {
        let block = parse_ok("makedep \"foo.d\";");
        let Stmt::MkDep(dep) = &block.stmts[0] else {
            panic!();
        };
        assert_eq!(dep.paths.len(), 1);
    }

    #[test]
    fn dir_blocks() {
        let block = parse_ok("dir linux { a = 1; }\ndir win default { a = 2; }\ndir plan9;");
        let Stmt::Dir(d) = &block.stmts[0] else {
            panic!();
        };
        assert!(!d.default);
        assert!(d.block.is_some());
        let Stmt::Dir(d) = &block.stmts[1] else {
            panic!();
        };
        assert!(d.default);
        let Stmt::Dir(d) = &block.stmts[2] else {
            panic!();
        };
        assert!(d.block.is_none());
    }

    #[test]
    fn nested_block_statement() {
        let block = parse_ok("{ x = 1; }");
        let Stmt::Block(inner) = &block.stmts[0] else {
            panic!();
        };
        assert_eq!(inner.stmts.len(), 1);
    }

    #[test]
    fn conditionals_are_rejected() {
        assert!(matches!(parse_err("if x { }"), Error::Unsupported(_, "if")));
        assert!(matches!(parse_err("else { }"), Error::Unsupported(_, "else")));
    }

    #[test]
    fn missing_semicolon_is_fatal() {
        let err = parse_err("x = a");
        assert!(matches!(err, Error::Parse(_, msg) if msg == "Expected ';'."));
    }

    #[test]
    fn unclosed_block_is_fatal() {
        let err = parse_err("{ x = 1;");
        assert!(matches!(err, Error::Parse(_, msg) if msg == "Expected '}'."));
    }

    #[test]
    fn rule_location_points_at_colon() {
        let block = parse_ok("a : b;");
        let Stmt::Rule(rule) = &block.stmts[0] else {
            panic!();
        };
        assert_eq!((rule.loc.line, rule.loc.col), (1, 3));
    }
}
