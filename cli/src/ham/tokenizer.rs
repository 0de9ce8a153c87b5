//! The pull-based lexer for `Hammer` scripts.
//!
//! Words are accumulated verbatim: quoted spans, escapes, and `$`
//! references stay in the token text and are only interpreted by the
//! expander at evaluation time. The lexer's job is to delimit words,
//! validate quoting, and attach locations.

use std::sync::Arc;

use smol_str::SmolStr;

use super::model::{Error, Loc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokKind {
    LBrace,
    RBrace,
    Colon,
    Semi,
    Eq,
    Lt,
    Gt,
    Pipe,
    Question,
    /// `>>`
    Shr,
    /// `<<`
    Shl,
    /// `+=`
    AddEq,
    /// A word fragment; `spec` is set when it begins with `.`.
    Str { spec: bool },
    Dir,
    For,
    If,
    Elif,
    Else,
    Print,
    Default,
    Makedep,
    Include,
    Import,
    Eof,
}

#[derive(Debug, Clone)]
pub struct Tok {
    pub kind: TokKind,
    pub text: SmolStr,
    pub loc: Loc,
}

const KEYWORDS: &[(&str, TokKind)] = &[
    ("dir", TokKind::Dir),
    ("for", TokKind::For),
    ("if", TokKind::If),
    ("elif", TokKind::Elif),
    ("else", TokKind::Else),
    ("print", TokKind::Print),
    ("default", TokKind::Default),
    ("makedep", TokKind::Makedep),
    ("include", TokKind::Include),
    ("import", TokKind::Import),
];

/// Plain word characters; everything else needs quoting or escaping.
fn is_str_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || "~/._-+=%".contains(ch)
}

/// Variable name characters, shared with the expander.
pub(super) fn is_var_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '_'
}

/// Escapable characters.
fn is_escape_char(ch: char) -> bool {
    "tn'\"\\$, ".contains(ch)
}

pub struct Lexer {
    path: Arc<str>,
    chars: Vec<char>,
    pos: usize,
    line: u32,
    col: u32,
}

impl Lexer {
    pub fn new(path: &str, source: &str) -> Self {
        Self {
            path: Arc::from(path),
            chars: source.chars().collect(),
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

    /// Location of the character under the cursor.
    fn loc(&self) -> Loc {
        Loc::new(self.path.clone(), self.line, self.col)
    }

    /// Produce the next token.
    pub fn next_tok(&mut self) -> Result<Tok, Error> {
        // Whitespace separates tokens; `#` comments run to end of line.
        loop {
            while matches!(self.cur(), Some(ch) if ch.is_whitespace()) {
                self.bump();
            }
            if self.cur() != Some('#') {
                break;
            }
            while !matches!(self.cur(), None | Some('\n')) {
                self.bump();
            }
        }

        let loc = self.loc();
        let Some(ch) = self.cur() else {
            return Ok(Tok {
                kind: TokKind::Eof,
                text: SmolStr::default(),
                loc,
            });
        };

        let simple = |kind, text: &str| Tok {
            kind,
            text: SmolStr::new(text),
            loc: loc.clone(),
        };

        match ch {
            '{' => {
                self.bump();
                return Ok(simple(TokKind::LBrace, "{"));
            }
            '}' => {
                self.bump();
                return Ok(simple(TokKind::RBrace, "}"));
            }
            ':' => {
                self.bump();
                return Ok(simple(TokKind::Colon, ":"));
            }
            ';' => {
                self.bump();
                return Ok(simple(TokKind::Semi, ";"));
            }
            '|' => {
                self.bump();
                return Ok(simple(TokKind::Pipe, "|"));
            }
            '?' => {
                self.bump();
                return Ok(simple(TokKind::Question, "?"));
            }
            '=' => {
                self.bump();
                return Ok(simple(TokKind::Eq, "="));
            }
            '>' => {
                self.bump();
                if self.cur() == Some('>') {
                    self.bump();
                    return Ok(simple(TokKind::Shr, ">>"));
                }
                return Ok(simple(TokKind::Gt, ">"));
            }
            '<' => {
                self.bump();
                if self.cur() == Some('<') {
                    self.bump();
                    return Ok(simple(TokKind::Shl, "<<"));
                }
                return Ok(simple(TokKind::Lt, "<"));
            }
            '+' if self.peek() == Some('=') => {
                self.bump();
                self.bump();
                return Ok(simple(TokKind::AddEq, "+="));
            }
            _ => {}
        }

        if is_str_char(ch) || matches!(ch, '$' | '\'' | '"' | '\\') {
            let mut buf = String::new();
            self.scan_word(&mut buf)?;
            for &(word, kind) in KEYWORDS {
                if buf == word {
                    return Ok(Tok {
                        kind,
                        text: buf.into(),
                        loc,
                    });
                }
            }
            let spec = buf.starts_with('.');
            return Ok(Tok {
                kind: TokKind::Str { spec },
                text: buf.into(),
                loc,
            });
        }

        Err(Error::StrayChar(loc, ch))
    }

    /// Accumulate one logical word into `buf`.
    fn scan_word(&mut self, buf: &mut String) -> Result<(), Error> {
        loop {
            match self.cur() {
                Some('$') => self.scan_var(buf)?,
                Some('\'') => self.scan_quote(buf, '\'')?,
                Some('"') => self.scan_quote(buf, '"')?,
                Some('\\') => self.scan_escape(buf)?,
                Some(ch) if is_str_char(ch) => {
                    buf.push(ch);
                    self.bump();
                }
                _ => break,
            }
        }
        Ok(())
    }

    /// Buffer a validated `\x` escape, keeping the backslash.
    fn scan_escape(&mut self, buf: &mut String) -> Result<(), Error> {
        self.bump();
        let loc = self.loc();
        match self.cur() {
            Some(ch) if is_escape_char(ch) => {
                buf.push('\\');
                buf.push(ch);
                self.bump();
                Ok(())
            }
            Some(ch) => Err(Error::InvalidEscape(loc, ch)),
            None => Err(Error::InvalidEscape(loc, ' ')),
        }
    }

    /// Buffer a quoted span including the quotes. Inside double quotes,
    /// `$` references are buffered too (expanded later); single quotes
    /// are verbatim.
    fn scan_quote(&mut self, buf: &mut String, quote: char) -> Result<(), Error> {
        buf.push(quote);
        self.bump();
        loop {
            match self.cur() {
                None | Some('\n') => return Err(Error::UnterminatedQuote(self.loc())),
                Some('\\') => self.scan_escape(buf)?,
                Some('$') if quote == '"' => self.scan_var(buf)?,
                Some(ch) if ch == quote => {
                    buf.push(ch);
                    self.bump();
                    return Ok(());
                }
                Some(ch) => {
                    buf.push(ch);
                    self.bump();
                }
            }
        }
    }

    /// Buffer a `$` reference: `$$`, `$name`, one of the special
    /// one-character variables, or a `${...}` span up to its `}`.
    fn scan_var(&mut self, buf: &mut String) -> Result<(), Error> {
        buf.push('$');
        self.bump();
        match self.cur() {
            Some('{') => {
                buf.push('{');
                self.bump();
                loop {
                    match self.cur() {
                        None | Some('\n') => {
                            return Err(Error::UnterminatedExpansion(self.loc()));
                        }
                        Some('\\') => self.scan_escape(buf)?,
                        Some('}') => {
                            buf.push('}');
                            self.bump();
                            return Ok(());
                        }
                        Some(ch) => {
                            buf.push(ch);
                            self.bump();
                        }
                    }
                }
            }
            Some(ch) if is_var_char(ch) => {
                while let Some(ch) = self.cur()
                    && is_var_char(ch)
                {
                    buf.push(ch);
                    self.bump();
                }
                Ok(())
            }
            Some(ch) if "@^<*~$".contains(ch) => {
                buf.push(ch);
                self.bump();
                Ok(())
            }
            _ => Err(Error::InvalidVariable(self.loc())),
        }
    }
}
