//! Makefile-format dependency file ingestion.
//!
//! The accepted grammar is the one compilers emit with `-MD`: one or
//! more target names, a colon, dependency names up to the end of the
//! line, with backslash-newline continuations. No variable expansion,
//! no recipe lines.

use std::sync::Arc;

use hammer::graph::GraphBuilder;

use super::model::{Error, Loc};

/// Ingest a dependency file. A missing file is silently skipped unless
/// `strict` is set.
pub fn ingest_file(builder: &mut GraphBuilder, path: &str, strict: bool) -> Result<(), Error> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(source) if strict => {
            return Err(Error::Io {
                path: path.into(),
                source,
            });
        }
        Err(_) => return Ok(()),
    };
    ingest_str(builder, path, &content)
}

/// Parse `target...: dep...` lines and emit recipe-less rules. The
/// partial-rule merge accumulates the dependencies onto rules the
/// script already declared.
pub fn ingest_str(builder: &mut GraphBuilder, path: &str, content: &str) -> Result<(), Error> {
    let path: Arc<str> = Arc::from(path);
    let mut scanner = Scanner::new(content);

    loop {
        scanner.skip_blank();
        if scanner.cur().is_none() {
            return Ok(());
        }
        let loc = Loc::new(path.clone(), scanner.line, scanner.col);

        let mut gens = Vec::new();
        while let Some(name) = scanner.name() {
            gens.push(builder.intern(false, name));
        }
        if scanner.cur() != Some(':') {
            return Err(Error::InvalidMakedep(loc));
        }
        scanner.bump();

        let mut deps = Vec::new();
        while let Some(name) = scanner.name() {
            deps.push(builder.intern(false, name));
        }

        builder
            .add_rule(gens, deps)
            .map_err(|source| Error::Graph { loc, source })?;
    }
}

struct Scanner {
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
}

impl Scanner {
    fn new(content: &str) -> Self {
        Self {
            chars: content.chars().collect(),
            pos: 0,
            line: 1,
            col: 1,
        }
    }

    fn cur(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos + 1).copied()
    }

    fn bump(&mut self) {
        if let Some(ch) = self.cur() {
            if ch == '\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
            self.pos += 1;
        }
    }

    /// Skip spaces and continuations within a line; newlines stay.
    fn skip_space(&mut self) {
        loop {
            match self.cur() {
                Some(' ' | '\t' | '\r') => self.bump(),
                Some('\\') if self.peek() == Some('\n') => {
                    self.bump();
                    self.bump();
                }
                _ => break,
            }
        }
    }

    /// Skip any whitespace, newlines included, between rules.
    fn skip_blank(&mut self) {
        loop {
            match self.cur() {
                Some(ch) if ch.is_whitespace() => self.bump(),
                Some('\\') if self.peek() == Some('\n') => {
                    self.bump();
                    self.bump();
                }
                _ => break,
            }
        }
    }

    /// The next name on the current (possibly continued) line.
    fn name(&mut self) -> Option<String> {
        self.skip_space();
        let mut name = String::new();
        while let Some(ch) = self.cur() {
            if ch.is_whitespace() || ch == ':' {
                break;
            }
            if ch == '\\' && self.peek() == Some('\n') {
                break;
            }
            name.push(ch);
            self.bump();
        }
        if name.is_empty() { None } else { Some(name) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hammer::graph::Command;

    #[test]
    fn simple_rule() {
        let mut gb = GraphBuilder::new();
        ingest_str(&mut gb, "foo.d", "foo.o: foo.c foo.h\n").unwrap();
        let graph = gb.build().unwrap();
        let rule = graph.rule_for_path("foo.o").unwrap();
        assert_eq!(graph.rule(rule).deps.len(), 2);
        assert!(graph.rule(rule).recipe.is_none());
    }

    #[test]
    fn merges_into_scripted_rule() {
        // The `foo.o : foo.c { cc ... }` rule already exists; the depfile
        // only adds `foo.h`.
        let mut gb = GraphBuilder::new();
        let o = gb.intern(false, "foo.o");
        let c = gb.intern(false, "foo.c");
        let rule = gb.add_rule(vec![o], vec![c]).unwrap();
        gb.set_recipe(
            rule,
            vec![Command {
                stages: vec![vec!["cc".into(), "-c".into(), "foo.c".into()]],
                input: None,
                output: None,
                append: false,
            }],
        )
        .unwrap();

        ingest_str(&mut gb, "foo.d", "foo.o: foo.c foo.h\n").unwrap();
        assert_eq!(gb.rule_count(), 1);
        let graph = gb.build().unwrap();
        let id = graph.rule_for_path("foo.o").unwrap();
        assert_eq!(id, rule);
        let h = graph.lookup_target("foo.h").unwrap();
        assert!(graph.rule(id).deps.contains(&h));
        assert!(graph.rule(id).recipe.is_some());
    }

    #[test]
    fn continuation_lines_join() {
        let mut gb = GraphBuilder::new();
        ingest_str(&mut gb, "a.d", "a.o: a.c \\\n  a.h \\\n  b.h\n").unwrap();
        let graph = gb.build().unwrap();
        let rule = graph.rule_for_path("a.o").unwrap();
        assert_eq!(graph.rule(rule).deps.len(), 3);
    }

    #[test]
    fn several_rules_per_file() {
        let mut gb = GraphBuilder::new();
        ingest_str(&mut gb, "x.d", "a.o: a.c\n\nb.o: b.c b.h\n").unwrap();
        assert_eq!(gb.rule_count(), 2);
    }

    #[test]
    fn multiple_targets_share_a_rule() {
        let mut gb = GraphBuilder::new();
        ingest_str(&mut gb, "x.d", "a.tab.c a.tab.h: a.y\n").unwrap();
        assert_eq!(gb.rule_count(), 1);
        let graph = gb.build().unwrap();
        assert_eq!(
            graph.rule_for_path("a.tab.c"),
            graph.rule_for_path("a.tab.h")
        );
    }

    #[test]
    fn missing_colon_is_fatal() {
        let mut gb = GraphBuilder::new();
        let err = ingest_str(&mut gb, "bad.d", "foo.o foo.c\n").unwrap_err();
        assert!(matches!(err, Error::InvalidMakedep(_)));
    }

    #[test]
    fn missing_file_only_fatal_in_strict_mode() {
        let mut gb = GraphBuilder::new();
        ingest_file(&mut gb, "/nonexistent/never.d", false).unwrap();
        assert_eq!(gb.rule_count(), 0);

        let err = ingest_file(&mut gb, "/nonexistent/never.d", true).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
