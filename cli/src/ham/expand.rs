//! String interpolation.
//!
//! Raw words keep their quotes, escapes, and `$` references from the
//! lexer; this module re-scans them at evaluation time against the
//! active environment. An expansion that starts at the beginning of a
//! word and consumes all of it passes its object through unchanged
//! (multi-element lists, environments, null); anything else flattens to
//! a single space-joined string.

use hammer::graph::GraphBuilder;
use smol_str::SmolStr;

use super::eval::{Env, Obj, Value};
use super::model::{Error, Imm, Loc, Raw};
use super::tokenizer::is_var_char;

/// The expanded generator and dependency values of the rule whose
/// recipe is currently being expanded.
pub struct RuleCtx<'a> {
    pub gens: &'a [Value],
    pub deps: &'a [Value],
}

/// Everything a single expansion can see.
pub struct ExpandCx<'a> {
    pub env: &'a Env,
    pub builder: &'a GraphBuilder,
    pub rule: Option<&'a RuleCtx<'a>>,
    pub dir: Option<&'a str>,
}

/// Expand one raw word to an object.
pub fn expand_raw(raw: &Raw, cx: &ExpandCx) -> Result<Obj, Error> {
    let text = raw.text.as_str();
    if !text.contains(['$', '\'', '"', '\\']) {
        return Ok(Obj::List(vec![Value {
            text: raw.text.clone(),
            spec: raw.spec,
        }]));
    }

    let chars: Vec<char> = text.chars().collect();
    let mut out = String::new();
    let mut pos = 0;

    // The whole-raw rule: a `$...` at offset zero that consumes the
    // entire word returns its object as-is.
    if chars[0] == '$' {
        let (obj, next) = expand_dollar(&chars, 0, &raw.loc, cx)?;
        if next == chars.len() {
            return Ok(obj);
        }
        flatten_into(&mut out, obj, &raw.loc)?;
        pos = next;
    }

    while pos < chars.len() {
        match chars[pos] {
            '$' => {
                let (obj, next) = expand_dollar(&chars, pos, &raw.loc, cx)?;
                flatten_into(&mut out, obj, &raw.loc)?;
                pos = next;
            }
            '\\' => {
                pos += 1;
                if let Some(&ch) = chars.get(pos) {
                    out.push(unescape(ch));
                    pos += 1;
                }
            }
            '\'' => pos = copy_quoted(&chars, pos, &mut out, &raw.loc)?,
            '"' => pos = expand_quoted(&chars, pos, &mut out, &raw.loc, cx)?,
            ch => {
                out.push(ch);
                pos += 1;
            }
        }
    }

    Ok(Obj::List(vec![Value {
        text: out.into(),
        spec: false,
    }]))
}

/// Expand an argument list. A single-word list passes exotic objects
/// through; multiple words always concatenate into one value list.
pub fn expand_imm_obj(imm: &Imm, cx: &ExpandCx) -> Result<Obj, Error> {
    if imm.raws.len() == 1 {
        return expand_raw(&imm.raws[0], cx);
    }
    let mut values = Vec::new();
    for raw in &imm.raws {
        match expand_raw(raw, cx)? {
            Obj::Null => {}
            Obj::List(vs) => values.extend(vs),
            obj => {
                return Err(Error::Type(
                    raw.loc.clone(),
                    format!("Cannot use a {} in a list.", obj.type_name()),
                ));
            }
        }
    }
    Ok(Obj::List(values))
}

/// Expand an argument list down to plain values.
pub fn expand_imm_values(imm: &Imm, cx: &ExpandCx) -> Result<Vec<Value>, Error> {
    match expand_imm_obj(imm, cx)? {
        Obj::Null => Ok(Vec::new()),
        Obj::List(values) => Ok(values),
        obj => {
            let loc = imm
                .raws
                .first()
                .map(|r| r.loc.clone())
                .unwrap_or_else(|| Loc::new("<internal>".into(), 0, 0));
            Err(Error::Type(
                loc,
                format!("Cannot use a {} in a list.", obj.type_name()),
            ))
        }
    }
}

/// Unwrap an object that must be exactly one string.
pub fn value_single(obj: Obj, loc: &Loc, what: &str) -> Result<SmolStr, Error> {
    match obj {
        Obj::List(mut values) if values.len() == 1 => Ok(values.remove(0).text),
        _ => Err(Error::Type(loc.clone(), what.into())),
    }
}

/// Expand a raw that must yield exactly one string.
pub fn expand_single(raw: &Raw, cx: &ExpandCx) -> Result<SmolStr, Error> {
    let obj = expand_raw(raw, cx)?;
    value_single(obj, &raw.loc, "Must be a single string.")
}

fn unescape(ch: char) -> char {
    match ch {
        't' => '\t',
        'n' => '\n',
        other => other,
    }
}

/// Copy a single-quoted span verbatim. Returns the position after the
/// closing quote.
fn copy_quoted(
    chars: &[char],
    mut pos: usize,
    out: &mut String,
    loc: &Loc,
) -> Result<usize, Error> {
    pos += 1;
    while let Some(&ch) = chars.get(pos) {
        match ch {
            '\\' => {
                pos += 1;
                if let Some(&esc) = chars.get(pos) {
                    out.push(unescape(esc));
                    pos += 1;
                }
            }
            '\'' => return Ok(pos + 1),
            ch => {
                out.push(ch);
                pos += 1;
            }
        }
    }
    Err(Error::UnterminatedQuote(loc.clone()))
}

/// Copy a double-quoted span, expanding `$` references inside it.
fn expand_quoted(
    chars: &[char],
    mut pos: usize,
    out: &mut String,
    loc: &Loc,
    cx: &ExpandCx,
) -> Result<usize, Error> {
    pos += 1;
    while let Some(&ch) = chars.get(pos) {
        match ch {
            '\\' => {
                pos += 1;
                if let Some(&esc) = chars.get(pos) {
                    out.push(unescape(esc));
                    pos += 1;
                }
            }
            '$' => {
                let (obj, next) = expand_dollar(chars, pos, loc, cx)?;
                flatten_into(out, obj, loc)?;
                pos = next;
            }
            '"' => return Ok(pos + 1),
            ch => {
                out.push(ch);
                pos += 1;
            }
        }
    }
    Err(Error::UnterminatedQuote(loc.clone()))
}

fn flatten_into(out: &mut String, obj: Obj, loc: &Loc) -> Result<(), Error> {
    match obj {
        Obj::Null => Ok(()),
        Obj::List(values) => {
            for (i, value) in values.iter().enumerate() {
                if i > 0 {
                    out.push(' ');
                }
                out.push_str(&value.text);
            }
            Ok(())
        }
        obj => Err(Error::Type(
            loc.clone(),
            format!("Cannot use a {} as a string.", obj.type_name()),
        )),
    }
}

fn recipe_cx<'a>(
    cx: &'a ExpandCx<'_>,
    loc: &Loc,
    what: &'static str,
) -> Result<&'a RuleCtx<'a>, Error> {
    cx.rule.ok_or_else(|| Error::RecipeOnly(loc.clone(), what))
}

/// Expand the `$` reference starting at `pos`. Returns the object and
/// the position just past the reference.
fn expand_dollar(
    chars: &[char],
    pos: usize,
    loc: &Loc,
    cx: &ExpandCx,
) -> Result<(Obj, usize), Error> {
    match chars.get(pos + 1).copied() {
        None => Err(Error::InvalidVariable(loc.clone())),

        Some('$') => Ok((Obj::List(vec![Value::new("$")]), pos + 2)),

        Some('{') => {
            let mut end = pos + 2;
            while end < chars.len() && chars[end] != '}' {
                end += if chars[end] == '\\' { 2 } else { 1 };
            }
            if end >= chars.len() {
                return Err(Error::UnterminatedExpansion(loc.clone()));
            }
            let obj = expand_expr(&chars[pos + 2..end], loc, cx)?;
            Ok((obj, end + 1))
        }

        Some('@') => {
            let rule = recipe_cx(cx, loc, "$@")?;
            Ok((Obj::List(rule.gens.to_vec()), pos + 2))
        }
        Some('^') => {
            let rule = recipe_cx(cx, loc, "$^")?;
            Ok((Obj::List(rule.deps.to_vec()), pos + 2))
        }
        Some('<') => {
            let rule = recipe_cx(cx, loc, "$<")?;
            let obj = match rule.deps.first() {
                Some(dep) => Obj::List(vec![dep.clone()]),
                None => Obj::Null,
            };
            Ok((obj, pos + 2))
        }
        Some('*') => {
            recipe_cx(cx, loc, "$*")?;
            let values = cx.builder.built_paths().map(Value::new).collect();
            Ok((Obj::List(values), pos + 2))
        }

        Some('~') => {
            let obj = match cx.dir {
                Some(dir) => Obj::List(vec![Value::new(dir)]),
                None => Obj::Null,
            };
            Ok((obj, pos + 2))
        }

        Some(ch) if is_var_char(ch) => {
            let mut end = pos + 1;
            while end < chars.len() && is_var_char(chars[end]) {
                end += 1;
            }
            let name: SmolStr = chars[pos + 1..end].iter().collect::<String>().into();
            let obj = cx
                .env
                .get(&name)
                .ok_or_else(|| Error::UnknownVariable(loc.clone(), name))?;
            Ok((obj, end))
        }

        Some(_) => Err(Error::InvalidVariable(loc.clone())),
    }
}

/// Evaluate the inside of a `${...}`: a variable lookup followed by
/// `.member` and `.func(args)` suffixes.
fn expand_expr(chars: &[char], loc: &Loc, cx: &ExpandCx) -> Result<Obj, Error> {
    let mut pos = 0;
    skip_spaces(chars, &mut pos);

    let start = pos;
    while pos < chars.len() && is_var_char(chars[pos]) {
        pos += 1;
    }
    if start == pos {
        return Err(Error::InvalidVariable(loc.clone()));
    }
    let name: SmolStr = chars[start..pos].iter().collect::<String>().into();
    let mut obj = cx
        .env
        .get(&name)
        .ok_or_else(|| Error::UnknownVariable(loc.clone(), name))?;

    loop {
        skip_spaces(chars, &mut pos);
        if pos >= chars.len() {
            break;
        }
        if chars[pos] != '.' {
            return Err(Error::Type(
                loc.clone(),
                "Invalid expansion expression.".into(),
            ));
        }
        pos += 1;

        let start = pos;
        while pos < chars.len() && is_var_char(chars[pos]) {
            pos += 1;
        }
        if start == pos {
            return Err(Error::InvalidVariable(loc.clone()));
        }
        let member: SmolStr = chars[start..pos].iter().collect::<String>().into();
        skip_spaces(chars, &mut pos);

        if chars.get(pos) == Some(&'(') {
            // A call: resolve the function, then marshal the subject
            // plus the comma-separated argument expansions.
            let func = match &obj {
                Obj::Env(env) => env.get(&member),
                _ => None,
            }
            .or_else(|| cx.env.get(&format!(".{member}")));
            let Some(Obj::Func(func)) = func else {
                return Err(Error::Type(
                    loc.clone(),
                    format!("`{member}` is not a function."),
                ));
            };

            pos += 1;
            let mut args = vec![obj];
            skip_spaces(chars, &mut pos);
            if chars.get(pos) == Some(&')') {
                pos += 1;
            } else {
                loop {
                    let (text, next) = scan_arg(chars, pos, loc)?;
                    pos = next;
                    let arg = Raw {
                        text: text.trim().into(),
                        spec: false,
                        loc: loc.clone(),
                    };
                    args.push(expand_raw(&arg, cx)?);
                    match chars.get(pos).copied() {
                        Some(',') => pos += 1,
                        Some(')') => {
                            pos += 1;
                            break;
                        }
                        _ => return Err(Error::UnterminatedExpansion(loc.clone())),
                    }
                }
            }
            obj = func(&args, loc)?;
        } else {
            // Plain member access.
            match &obj {
                Obj::Env(env) => {
                    obj = env.get(&member).ok_or_else(|| {
                        Error::UnknownVariable(loc.clone(), member.clone())
                    })?;
                }
                other => {
                    return Err(Error::Type(
                        loc.clone(),
                        format!(
                            "Cannot access member `{member}` of a {}.",
                            other.type_name()
                        ),
                    ));
                }
            }
        }
    }

    Ok(obj)
}

/// Collect one call argument: everything up to a top-level `,` or `)`,
/// skipping over quoted spans and nested parentheses.
fn scan_arg(chars: &[char], mut pos: usize, loc: &Loc) -> Result<(String, usize), Error> {
    let mut text = String::new();
    let mut depth = 0usize;
    while let Some(&ch) = chars.get(pos) {
        match ch {
            ',' | ')' if depth == 0 => return Ok((text, pos)),
            '(' => {
                depth += 1;
                text.push(ch);
                pos += 1;
            }
            ')' => {
                depth -= 1;
                text.push(ch);
                pos += 1;
            }
            '\'' | '"' => {
                text.push(ch);
                pos += 1;
                while let Some(&inner) = chars.get(pos) {
                    text.push(inner);
                    pos += 1;
                    if inner == '\\' {
                        if let Some(&esc) = chars.get(pos) {
                            text.push(esc);
                            pos += 1;
                        }
                    } else if inner == ch {
                        break;
                    }
                }
            }
            '\\' => {
                text.push(ch);
                pos += 1;
                if let Some(&esc) = chars.get(pos) {
                    text.push(esc);
                    pos += 1;
                }
            }
            _ => {
                text.push(ch);
                pos += 1;
            }
        }
    }
    Err(Error::UnterminatedExpansion(loc.clone()))
}

fn skip_spaces(chars: &[char], pos: &mut usize) {
    while matches!(chars.get(*pos), Some(ch) if ch.is_whitespace()) {
        *pos += 1;
    }
}

fn as_list<'a>(obj: &'a Obj, loc: &Loc) -> Result<&'a [Value], Error> {
    match obj {
        Obj::List(values) => Ok(values),
        obj => Err(Error::Type(
            loc.clone(),
            format!("Expected a string list, found a {}.", obj.type_name()),
        )),
    }
}

fn as_single(obj: &Obj, loc: &Loc) -> Result<SmolStr, Error> {
    match obj {
        Obj::List(values) if values.len() == 1 => Ok(values[0].text.clone()),
        _ => Err(Error::Type(loc.clone(), "Must be a single string.".into())),
    }
}

/// `.sub(haystack, needle, replacement)`: plain substring replacement
/// over each element of the haystack.
pub fn builtin_sub(args: &[Obj], loc: &Loc) -> Result<Obj, Error> {
    let [hay, needle, repl] = args else {
        return Err(Error::Arity(loc.clone(), ".sub".into(), 3));
    };
    let hay = as_list(hay, loc)?;
    let needle = as_single(needle, loc)?;
    let repl = as_single(repl, loc)?;

    let result = hay
        .iter()
        .map(|v| Value {
            text: v.text.replace(needle.as_str(), repl.as_str()).into(),
            spec: v.spec,
        })
        .collect();
    Ok(Obj::List(result))
}

/// `.pat(list, pattern, replacement)`: `%`-pattern rewrite. Elements
/// that do not match the pattern pass through unchanged.
pub fn builtin_pat(args: &[Obj], loc: &Loc) -> Result<Obj, Error> {
    let [list, pattern, repl] = args else {
        return Err(Error::Arity(loc.clone(), ".pat".into(), 3));
    };
    let list = as_list(list, loc)?;
    let pattern = as_single(pattern, loc)?;
    let repl = as_single(repl, loc)?;

    let Some((pre, suf)) = split_percent(&pattern) else {
        return Err(Error::Type(
            loc.clone(),
            "Pattern must contain exactly one '%'.".into(),
        ));
    };

    let result = list
        .iter()
        .map(|v| {
            let s = v.text.as_str();
            if s.len() < pre.len() + suf.len() || !s.starts_with(pre) || !s.ends_with(suf) {
                return v.clone();
            }
            let middle = &s[pre.len()..s.len() - suf.len()];
            let text = match repl.split_once('%') {
                Some((rp, rs)) => format!("{rp}{middle}{rs}"),
                None => repl.to_string(),
            };
            Value {
                text: text.into(),
                spec: v.spec,
            }
        })
        .collect();
    Ok(Obj::List(result))
}

fn split_percent(pattern: &str) -> Option<(&str, &str)> {
    let first = pattern.find('%')?;
    if pattern[first + 1..].contains('%') {
        return None;
    }
    Some((&pattern[..first], &pattern[first + 1..]))
}
