//! Rule parsing for the two supported surface syntaxes.
//!
//! The `Proppr` syntax is the annotated-source form:
//!
//! ```text
//! p(X,Y) :- q(X,Z), r(Z,Y) {f}.
//! p(X,Y) :- q(X,Y) {w(F): hasWord(X,F)}.
//! ```
//!
//! The `Canonical` syntax is what [`Rule`]'s `Display` emits and what
//! serialized programs are written in:
//!
//! ```text
//! p(X,Y) <= q(X,Z) & r(Z,Y) // f
//! p(X,Y) <= q(X,Y) // w(F) : hasWord(X,F)
//! ```

use std::fs;
use std::path::Path;

use crate::error::IrError;
use crate::rule::{Goal, Rule, RuleCollection};
use crate::term::Term;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Syntax {
    Proppr,
    Canonical,
}

#[derive(Clone, Copy, Debug)]
pub struct Parser {
    syntax: Syntax,
}

impl Parser {
    pub fn new(syntax: Syntax) -> Self {
        Parser { syntax }
    }

    pub fn proppr() -> Self {
        Parser::new(Syntax::Proppr)
    }

    pub fn canonical() -> Self {
        Parser::new(Syntax::Canonical)
    }

    pub fn parse_rule(&self, text: &str) -> Result<Rule, IrError> {
        self.parse_rule_at(text, 0)
    }

    /// Parse a whole program, one rule per line. Blank lines and `#` comments
    /// are skipped.
    pub fn parse_str(&self, text: &str) -> Result<RuleCollection, IrError> {
        let mut rules = RuleCollection::new();
        self.parse_str_into(text, &mut rules)?;
        Ok(rules)
    }

    pub fn parse_str_into(&self, text: &str, rules: &mut RuleCollection) -> Result<(), IrError> {
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            rules.add(self.parse_rule_at(line, i + 1)?);
        }
        Ok(())
    }

    pub fn parse_file(&self, path: impl AsRef<Path>) -> Result<RuleCollection, IrError> {
        let mut rules = RuleCollection::new();
        self.parse_file_into(path, &mut rules)?;
        Ok(rules)
    }

    pub fn parse_file_into(
        &self,
        path: impl AsRef<Path>,
        rules: &mut RuleCollection,
    ) -> Result<(), IrError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| IrError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.parse_str_into(&text, rules)
    }

    fn parse_rule_at(&self, text: &str, line: usize) -> Result<Rule, IrError> {
        match self.syntax {
            Syntax::Proppr => parse_proppr_rule(text, line),
            Syntax::Canonical => parse_canonical_rule(text, line),
        }
    }
}

fn parse_error(line: usize, text: &str, reason: impl Into<String>) -> IrError {
    IrError::Parse {
        line,
        text: text.to_string(),
        reason: reason.into(),
    }
}

fn parse_proppr_rule(text: &str, line: usize) -> Result<Rule, IrError> {
    let full = text;
    let text = text.trim().strip_suffix('.').unwrap_or(text.trim()).trim();

    let (main, annotation) = match find_top(text, "{") {
        Some(i) => {
            let inner = text[i + 1..]
                .trim()
                .strip_suffix('}')
                .ok_or_else(|| parse_error(line, full, "unterminated feature annotation"))?;
            (text[..i].trim(), Some(inner.trim()))
        }
        None => (text, None),
    };

    let sep = find_top(main, ":-").ok_or_else(|| parse_error(line, full, "missing ':-'"))?;
    let head = parse_goal(main[..sep].trim(), line, full)?;
    let body = parse_goal_list(main[sep + 2..].trim(), ',', line, full)?;
    let mut rule = Rule::new(head, body);

    if let Some(annotation) = annotation {
        let (features, findall) = match find_top(annotation, ":") {
            Some(i) => (
                parse_goal_list(annotation[..i].trim(), ',', line, full)?,
                Some(parse_goal_list(annotation[i + 1..].trim(), ',', line, full)?),
            ),
            None => (parse_goal_list(annotation, ',', line, full)?, None),
        };
        rule = rule.with_features(features, findall);
    }
    Ok(rule)
}

fn parse_canonical_rule(text: &str, line: usize) -> Result<Rule, IrError> {
    let full = text;
    let text = text.trim();

    let sep = find_top(text, "<=").ok_or_else(|| parse_error(line, full, "missing '<='"))?;
    let head = parse_goal(text[..sep].trim(), line, full)?;
    let rest = text[sep + 2..].trim();

    let (body_part, annotation) = match find_top(rest, "//") {
        Some(i) => (rest[..i].trim(), Some(rest[i + 2..].trim())),
        None => (rest, None),
    };
    let body = parse_goal_list(body_part, '&', line, full)?;
    let mut rule = Rule::new(head, body);

    if let Some(annotation) = annotation {
        let (features, findall) = match find_top(annotation, ":") {
            Some(i) => (
                parse_goal_list(annotation[..i].trim(), '&', line, full)?,
                Some(parse_goal_list(annotation[i + 1..].trim(), '&', line, full)?),
            ),
            None => (parse_goal_list(annotation, '&', line, full)?, None),
        };
        rule = rule.with_features(features, findall);
    }
    Ok(rule)
}

/// Find `pat` at paren/brace depth zero.
fn find_top(s: &str, pat: &str) -> Option<usize> {
    let mut depth = 0usize;
    for (i, ch) in s.char_indices() {
        if depth == 0 && s[i..].starts_with(pat) {
            return Some(i);
        }
        match ch {
            '(' | '{' => depth += 1,
            ')' | '}' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    None
}

/// Split on `sep` at paren depth zero, dropping empty pieces.
fn split_top(s: &str, sep: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut cur = String::new();
    let mut depth = 0usize;
    for ch in s.chars() {
        match ch {
            '(' => {
                depth += 1;
                cur.push(ch);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                cur.push(ch);
            }
            c if c == sep && depth == 0 => {
                if !cur.trim().is_empty() {
                    parts.push(cur.trim().to_string());
                }
                cur.clear();
            }
            _ => cur.push(ch),
        }
    }
    if !cur.trim().is_empty() {
        parts.push(cur.trim().to_string());
    }
    parts
}

fn parse_goal_list(s: &str, sep: char, line: usize, full: &str) -> Result<Vec<Goal>, IrError> {
    split_top(s, sep)
        .iter()
        .map(|g| parse_goal(g, line, full))
        .collect()
}

fn parse_goal(s: &str, line: usize, full: &str) -> Result<Goal, IrError> {
    let s = s.trim();
    if s.is_empty() {
        return Err(parse_error(line, full, "empty goal"));
    }
    let Some(open) = s.find('(') else {
        if s.contains(')') || s.contains(char::is_whitespace) {
            return Err(parse_error(line, full, format!("malformed goal '{}'", s)));
        }
        return Ok(Goal::new(s, Vec::new()));
    };
    let inner = s[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| parse_error(line, full, format!("unmatched parenthesis in '{}'", s)))?;
    let functor = s[..open].trim();
    if functor.is_empty() {
        return Err(parse_error(line, full, format!("goal '{}' has no functor", s)));
    }
    let args = split_top(inner, ',')
        .iter()
        .map(|a| Term::from_ident(a))
        .collect();
    Ok(Goal::new(functor, args))
}
