//! ProPPR-style weighted features: annotation rewriting and weight
//! initialization heuristics.

use std::ops::{Deref, DerefMut};
use std::path::Path;

use anyhow::{anyhow, bail, Result};
use indexmap::IndexMap;
use tracing::{debug, warn};

use matlog_db::{Database, Relation, SparseVector};
use matlog_ir::{Goal, Mode, Parser, Rule, RuleCollection, Syntax, Term};

use crate::config::CompilerConfig;
use crate::plugins::Plugins;
use crate::program::Program;
use crate::rule_compiler::{self, ASSIGN};

/// The reserved arity-1 parameter every constant rule feature routes its
/// weight through.
pub const WEIGHTED: &str = "weighted";

/// A [`Program`] whose rules may carry feature annotations.
///
/// Construction rewrites every annotation into explicit body goals, so the
/// wrapped program only ever sees plain rules:
///
/// - a constant feature `{f}` appends `assign(F, f), weighted(F)` and
///   records `f` as a rule id;
/// - a generator `{foo(F): cond…}` appends the conditioning goals followed
///   by `foo(F)` and marks `foo/1` as a parameter.
///
/// The weight-initialization heuristics ([`set_rule_weights`],
/// [`set_feature_weights`]) then give those parameters plausible starting
/// values.
///
/// [`set_rule_weights`]: ProPPRProgram::set_rule_weights
/// [`set_feature_weights`]: ProPPRProgram::set_feature_weights
#[derive(Debug)]
pub struct ProPPRProgram {
    program: Program,
    /// Constant-feature rule ids, in source declaration order.
    rule_ids: Vec<String>,
    /// For each generator parameter on a typeless database, the modes whose
    /// preimages bound its feature variable.
    param_domains: IndexMap<String, Vec<Mode>>,
}

impl Deref for ProPPRProgram {
    type Target = Program;

    fn deref(&self) -> &Program {
        &self.program
    }
}

impl DerefMut for ProPPRProgram {
    fn deref_mut(&mut self) -> &mut Program {
        &mut self.program
    }
}

impl ProPPRProgram {
    pub fn new(db: Database, rules: RuleCollection) -> Result<Self> {
        Self::with_plugins(db, rules, Plugins::new())
    }

    pub fn with_plugins(
        mut db: Database,
        rules: RuleCollection,
        plugins: Plugins,
    ) -> Result<Self> {
        let mut rule_ids = Vec::new();
        let mut param_domains: IndexMap<String, Vec<Mode>> = IndexMap::new();
        let rules = rules.try_map_rules(|rule| {
            move_features_to_rhs(rule, &mut db, &mut rule_ids, &mut param_domains)
        })?;
        Ok(ProPPRProgram {
            program: Program::from_parts(db, rules, plugins, CompilerConfig::default()),
            rule_ids,
            param_domains,
        })
    }

    /// Parse annotated rule files (ProPPR syntax) and build a program.
    pub fn load_rule_files(paths: &[impl AsRef<Path>], db: Database) -> Result<Self> {
        let parser = Parser::new(Syntax::Proppr);
        let mut rules = RuleCollection::new();
        for path in paths {
            parser.parse_file_into(path, &mut rules)?;
        }
        ProPPRProgram::new(db, rules)
    }

    /// Constant-feature rule ids, in source declaration order.
    pub fn rule_ids(&self) -> &[String] {
        &self.rule_ids
    }

    pub fn param_domains(&self) -> &IndexMap<String, Vec<Mode>> {
        &self.param_domains
    }

    /// Initialize the reserved `weighted` parameter.
    ///
    /// With `rule_id_pred`, the named unary relation's indicator vector
    /// (scaled by `epsilon`) becomes the weight vector; the relation must
    /// exist. Otherwise the database must be typeless and the default is
    /// the clipped union of one-hots for every recorded rule id (or the
    /// explicit `weights` vector), scaled by `epsilon`. A no-op when no
    /// constant features were ever recorded.
    pub fn set_rule_weights(
        &mut self,
        weights: Option<SparseVector>,
        epsilon: f64,
        rule_id_pred: Option<&str>,
    ) -> Result<()> {
        if self.rule_ids.is_empty() {
            return Ok(());
        }
        let db = self.program.db_mut();
        if let Some(pred) = rule_id_pred {
            if !db.has_relation(pred, 1) {
                bail!("there is no unary relation named '{}'", pred);
            }
            db.mark_as_parameter(WEIGHTED, 1);
            let v = db.vector(&Mode::from_pattern(pred, "o")?)?.scale(epsilon);
            db.set_parameter_vector(WEIGHTED, v)?;
            return Ok(());
        }
        if !db.is_typeless() {
            bail!(
                "cannot set rule weights on a database with declared types \
                 unless a rule-id relation is given"
            );
        }
        db.mark_as_parameter(WEIGHTED, 1);
        let v = match weights {
            Some(w) => w,
            None => {
                let mut union = db.onehot(&self.rule_ids[0], None)?;
                for rule_id in &self.rule_ids[1..] {
                    union = union.add(&db.onehot(rule_id, None)?)?;
                }
                union.clip(0.0, 1.0)
            }
        };
        db.set_parameter_vector(WEIGHTED, v.scale(epsilon))?;
        Ok(())
    }

    /// The current `weighted` parameter value.
    pub fn get_rule_weights(&self) -> Result<SparseVector> {
        self.program
            .db()
            .get_parameter(WEIGHTED, 1)?
            .as_vector()
            .cloned()
            .ok_or_else(|| anyhow!("'{}' is not a vector parameter", WEIGHTED))
    }

    /// Initialize generator-feature parameters, dispatching on database
    /// typing. The typeless and typed heuristics are mutually exclusive
    /// code paths; each is fatal on the wrong kind of database.
    pub fn set_feature_weights(&mut self, epsilon: f64) -> Result<()> {
        if self.program.db().is_typeless() {
            self.set_feature_weights_typeless(epsilon)
        } else {
            self.set_feature_weights_typed(epsilon)
        }
    }

    /// Typeless heuristic: each parameter starts as the clipped average of
    /// its recorded domain-mode preimages.
    fn set_feature_weights_typeless(&mut self, epsilon: f64) -> Result<()> {
        for (param, domain_modes) in &self.param_domains {
            let db = self.program.db();
            let first = &domain_modes[0];
            let first_type = weight_type(db, first)?;
            let mut weights = db.matrix_preimage(first)?;
            for mode in &domain_modes[1..] {
                if weight_type(db, mode)? != first_type {
                    bail!(
                        "feature weights have incompatible types: derived from {} and {}",
                        mode,
                        first
                    );
                }
                weights = weights.add(&db.matrix_preimage(mode)?)?;
            }
            let weights = weights
                .scale(1.0 / domain_modes.len() as f64)
                .clip(0.0, 1.0)
                .scale(epsilon);
            self.program.db_mut().set_parameter_vector(param, weights)?;
        }
        for (name, arity) in self.program.db().param_list() {
            if !self.program.db().parameter_is_initialized(&name, arity) {
                warn!(param = %name, arity, "parameter could not be initialized automatically");
            }
        }
        debug!(total = self.program.db().parameter_size(), "parameter size");
        Ok(())
    }

    /// Typed heuristic: infer each arity-1 parameter's argument type from
    /// the rules that reference it, declare that type on the schema (a
    /// deliberate schema-mutating side effect), then initialize the
    /// parameter uniformly over the type's domain.
    fn set_feature_weights_typed(&mut self, epsilon: f64) -> Result<()> {
        let rules: Vec<Rule> = self.program.rules().iter().cloned().collect();
        for rule in &rules {
            for mode in possible_modes(&rule.head) {
                let var_types = rule_compiler::infer_types(&self.program, &mode, rule)?;
                for goal in &rule.body {
                    if goal.arity() != 1 || !self.program.db().is_parameter(&goal.functor, 1) {
                        continue;
                    }
                    if let Term::Var(v) = &goal.args[0] {
                        if let Some(t) = var_types.get(v) {
                            self.program
                                .db_mut()
                                .declare_relation_types(&goal.functor, 1, vec![t.clone()])?;
                        }
                    }
                }
            }
        }
        for (name, arity) in self.program.db().param_list() {
            if arity != 1 {
                warn!(
                    param = %name,
                    arity,
                    "cannot set weights of a matrix parameter automatically"
                );
                continue;
            }
            let Some(type_name) = self.program.db().arg_type(&name, 1, 0) else {
                warn!(param = %name, "no argument type could be inferred");
                continue;
            };
            let v = self.program.db().ones(Some(&type_name))?.scale(epsilon);
            self.program.db_mut().set_parameter_vector(&name, v)?;
        }
        Ok(())
    }

    /// Feature weights, then rule weights, then a typing diagnostic pass.
    pub fn set_all_weights(&mut self, epsilon: f64) -> Result<()> {
        debug!("setting feature weights");
        self.set_feature_weights(epsilon)?;
        debug!("setting rule weights");
        self.set_rule_weights(None, epsilon, None)?;
        self.program.db().check_typing();
        Ok(())
    }

    /// Mark and set one parameter directly, bypassing the heuristics.
    pub fn set_feature_weight(
        &mut self,
        name: &str,
        arity: usize,
        value: Relation,
    ) -> Result<()> {
        let db = self.program.db_mut();
        db.mark_as_parameter(name, arity);
        db.set_parameter(name, arity, value)?;
        Ok(())
    }
}

/// Every head mode with a single output position.
fn possible_modes(head: &Goal) -> Vec<Mode> {
    let arity = head.arity();
    (0..arity)
        .map(|k| {
            let pattern: String = (0..arity).map(|i| if i == k { 'o' } else { 'i' }).collect();
            Mode::from_pattern(&head.functor, &pattern).expect("pattern is i/o only")
        })
        .collect()
}

/// The type flowing through a domain mode's input side.
fn weight_type(db: &Database, mode: &Mode) -> Result<String> {
    for pos in mode.input_positions() {
        if let Some(t) = db.arg_type(mode.functor(), mode.arity(), pos) {
            return Ok(t);
        }
    }
    bail!("no input type for domain mode {}", mode)
}

/// Rewrite one rule's feature annotation into explicit body goals.
fn move_features_to_rhs(
    rule: &Rule,
    db: &mut Database,
    rule_ids: &mut Vec<String>,
    param_domains: &mut IndexMap<String, Vec<Mode>>,
) -> Result<Rule> {
    let mut out = Rule::new(rule.head.clone(), rule.body.clone());
    let Some(features) = &rule.features else {
        return Ok(out);
    };
    match &rule.findall {
        None => {
            // Constant feature {f}.
            if features.len() != 1 {
                bail!("multiple constant features are not supported: {}", rule);
            }
            let feature = &features[0];
            if feature.arity() != 0 {
                bail!(
                    "{{{}(..)}} is not allowed, use {{{}(..): true}}: {}",
                    feature.functor,
                    feature.functor,
                    rule
                );
            }
            let name = feature.functor.clone();
            let fresh_var = name.to_uppercase();
            out.body.push(Goal::new(
                ASSIGN,
                vec![Term::var(fresh_var.clone()), Term::constant(name.clone())],
            ));
            out.body.push(Goal::new(WEIGHTED, vec![Term::var(fresh_var)]));
            if db.is_typeless() {
                db.insert_symbol(None, &name)?;
            }
            rule_ids.push(name);
        }
        Some(conds) => {
            // Generator feature {foo(F): cond...}.
            if features.len() != 1 {
                bail!(
                    "feature generators of the form {{a,b: ...}} are not supported: {}",
                    rule
                );
            }
            let generator = &features[0];
            if generator.arity() != 1 {
                bail!(
                    "non-constant features must have exactly one argument: {}",
                    rule
                );
            }
            let feature_var = generator.args[0].name().to_string();
            for goal in conds {
                if goal.arity() != 0 && goal.functor != "true" {
                    out.body.push(goal.clone());
                }
            }
            out.body
                .push(Goal::new(generator.functor.clone(), vec![generator.args[0].clone()]));
            db.mark_as_parameter(&generator.functor, 1);
            if db.is_typeless() {
                for goal in conds {
                    if goal.arity() != 2 {
                        continue;
                    }
                    let bound_at = goal
                        .args
                        .iter()
                        .position(|a| a.is_var() && a.name() == feature_var);
                    if let Some(k) = bound_at {
                        let pattern = if k == 0 { "io" } else { "oi" };
                        param_domains
                            .entry(generator.functor.clone())
                            .or_default()
                            .push(Mode::from_pattern(&goal.functor, pattern)?);
                    }
                }
            }
        }
    }
    Ok(out)
}
