//! Horn-clause rules and ordered rule collections.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::mode::Mode;
use crate::term::Term;

/// One atomic goal: a functor applied to terms.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Goal {
    pub functor: String,
    pub args: Vec<Term>,
}

impl Goal {
    pub fn new(functor: impl Into<String>, args: Vec<Term>) -> Self {
        Goal {
            functor: functor.into(),
            args,
        }
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.args.is_empty() {
            return f.write_str(&self.functor);
        }
        write!(f, "{}(", self.functor)?;
        for (i, arg) in self.args.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", arg)?;
        }
        f.write_str(")")
    }
}

/// A rule, immutable once parsed.
///
/// `features` holds the feature annotation of the weighted-rule sugar, and
/// `findall` its conditioning goals. `findall == None` distinguishes the
/// constant form `{f}` from the generator form `{foo(F): ...}` even when the
/// goal lists are empty. Transformations build new `Rule` values; rules are
/// never edited in place.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub head: Goal,
    pub body: Vec<Goal>,
    pub features: Option<Vec<Goal>>,
    pub findall: Option<Vec<Goal>>,
}

impl Rule {
    pub fn new(head: Goal, body: Vec<Goal>) -> Self {
        Rule {
            head,
            body,
            features: None,
            findall: None,
        }
    }

    pub fn with_features(mut self, features: Vec<Goal>, findall: Option<Vec<Goal>>) -> Self {
        self.features = Some(features);
        self.findall = findall;
        self
    }
}

impl fmt::Display for Rule {
    /// Canonical (arrow) syntax, the serialization format.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <= ", self.head)?;
        for (i, g) in self.body.iter().enumerate() {
            if i > 0 {
                f.write_str(" & ")?;
            }
            write!(f, "{}", g)?;
        }
        if let Some(features) = &self.features {
            f.write_str(" // ")?;
            for (i, g) in features.iter().enumerate() {
                if i > 0 {
                    f.write_str(" & ")?;
                }
                write!(f, "{}", g)?;
            }
            if let Some(findall) = &self.findall {
                f.write_str(" : ")?;
                for (i, g) in findall.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" & ")?;
                    }
                    write!(f, "{}", g)?;
                }
            }
        }
        Ok(())
    }
}

/// An ordered set of rules with functor/arity lookup.
///
/// Clause heads carry no io annotations, so `rules_for` matches on functor
/// and arity; the full mode keys compilation and caching downstream.
#[derive(Clone, Debug, Default)]
pub struct RuleCollection {
    rules: Vec<Rule>,
    index: HashMap<(String, usize), Vec<usize>>,
}

impl RuleCollection {
    pub fn new() -> Self {
        RuleCollection::default()
    }

    pub fn add(&mut self, rule: Rule) {
        let key = (rule.head.functor.clone(), rule.head.arity());
        self.index.entry(key).or_default().push(self.rules.len());
        self.rules.push(rule);
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    /// The rules whose head matches the mode's functor and arity, in
    /// declaration order.
    pub fn rules_for(&self, mode: &Mode) -> Vec<&Rule> {
        match self.index.get(&(mode.functor().to_string(), mode.arity())) {
            Some(ids) => ids.iter().map(|&i| &self.rules[i]).collect(),
            None => Vec::new(),
        }
    }

    /// Apply a transformation to every rule, producing a new collection.
    pub fn map_rules(&self, mut f: impl FnMut(&Rule) -> Rule) -> RuleCollection {
        self.rules.iter().map(|r| f(r)).collect()
    }

    /// Fallible variant of [`map_rules`](Self::map_rules).
    pub fn try_map_rules<E>(
        &self,
        mut f: impl FnMut(&Rule) -> Result<Rule, E>,
    ) -> Result<RuleCollection, E> {
        let mut out = RuleCollection::new();
        for rule in &self.rules {
            out.add(f(rule)?);
        }
        Ok(out)
    }
}

impl FromIterator<Rule> for RuleCollection {
    fn from_iter<T: IntoIterator<Item = Rule>>(iter: T) -> Self {
        let mut out = RuleCollection::new();
        for rule in iter {
            out.add(rule);
        }
        out
    }
}

impl<'a> IntoIterator for &'a RuleCollection {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}
