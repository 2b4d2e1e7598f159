//! Programs: mode-indexed rule lookup and memoized, depth-bounded
//! compilation into function graphs.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::warn;

use matlog_db::{Database, SparseVector};
use matlog_ir::{Mode, Parser, Rule, RuleCollection, Syntax};

use crate::config::{CompilerConfig, Normalization};
use crate::function::{Function, Gradients, Scratchpad};
use crate::plugins::Plugins;
use crate::rule_compiler;

/// File name of the serialized rule text inside a program directory.
pub const RULES_FILE: &str = "rules.mlog";
/// File name of the serialized database inside a program directory.
pub const DATABASE_FILE: &str = "database.json";

/// A compiled logic program over a sparse database.
///
/// Owns a write-once compiled-function cache keyed by `(mode, depth)`. The
/// cache is invalidated only by [`clear_function_cache`]; callers that
/// mutate the database, the rules, or the configuration after compiling
/// must clear it themselves or keep evaluating stale functions.
///
/// [`clear_function_cache`]: Program::clear_function_cache
///
/// # Examples
///
/// ```
/// use matlog_compiler::{Normalization, Program};
/// use matlog_db::Database;
/// use matlog_ir::{Mode, Parser, Syntax};
///
/// let mut db = Database::new();
/// db.add_fact("edge", &["a", "b"], 1.0).unwrap();
///
/// let rules = Parser::new(Syntax::Canonical)
///     .parse_str("path(X,Y) <= edge(X,Y)")
///     .unwrap();
/// let mut program = Program::new(db, rules).unwrap();
/// program.set_normalize(Normalization::None);
///
/// let mode: Mode = "path/io".parse().unwrap();
/// let out = program.eval_symbols(&mode, &["a"], None).unwrap();
/// assert_eq!(out.sum(), 1.0);
/// ```
#[derive(Debug)]
pub struct Program {
    db: Database,
    rules: RuleCollection,
    plugins: Plugins,
    config: CompilerConfig,
    cache: HashMap<(Mode, usize), Arc<Function>>,
}

impl Program {
    pub fn new(db: Database, rules: RuleCollection) -> Result<Self> {
        Self::with_plugins(db, rules, Plugins::new())
    }

    pub fn with_plugins(db: Database, rules: RuleCollection, plugins: Plugins) -> Result<Self> {
        for rule in rules.iter() {
            if rule.features.is_some() {
                bail!(
                    "rule {} carries a feature annotation; build a ProPPRProgram instead",
                    rule
                );
            }
        }
        Ok(Self::from_parts(db, rules, plugins, CompilerConfig::default()))
    }

    /// Assemble a program without the feature-annotation check; used by the
    /// ProPPR constructor after rewriting strips the annotations.
    pub(crate) fn from_parts(
        db: Database,
        rules: RuleCollection,
        plugins: Plugins,
        config: CompilerConfig,
    ) -> Self {
        Program {
            db,
            rules,
            plugins,
            config,
            cache: HashMap::new(),
        }
    }

    /// Parse rule files into one collection and build a program.
    pub fn load_rule_files(
        paths: &[impl AsRef<Path>],
        syntax: Syntax,
        db: Database,
    ) -> Result<Self> {
        let parser = Parser::new(syntax);
        let mut rules = RuleCollection::new();
        for path in paths {
            parser.parse_file_into(path, &mut rules)?;
        }
        Program::new(db, rules)
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Mutable database access; clear the function cache afterwards if
    /// anything already compiled depends on what changed.
    pub fn db_mut(&mut self) -> &mut Database {
        &mut self.db
    }

    pub fn rules(&self) -> &RuleCollection {
        &self.rules
    }

    pub fn plugins(&self) -> &Plugins {
        &self.plugins
    }

    /// Mutable plugin registry; clear the function cache afterwards if
    /// compiled functions captured superseded definitions.
    pub fn plugins_mut(&mut self) -> &mut Plugins {
        &mut self.plugins
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn set_max_depth(&mut self, max_depth: usize) {
        self.config.max_depth = max_depth;
    }

    pub fn set_normalize(&mut self, normalize: Normalization) {
        self.config.normalize = normalize;
    }

    /// Declared parameters, as `(name, arity)` pairs.
    pub fn param_list(&self) -> Vec<(String, usize)> {
        self.db.param_list()
    }

    /// Compile the depth-0 function for a mode.
    pub fn compile(&mut self, mode: &Mode) -> Result<Arc<Function>> {
        self.compile_at(mode, 0)
    }

    /// Compile a mode at a given depth. Beyond the configured maximum depth
    /// every mode compiles to the zero function, which bounds the work of
    /// recursive and cyclic rule sets. Normalization and node-id
    /// installation happen only at depth 0, after clause summation.
    pub fn compile_at(&mut self, mode: &Mode, depth: usize) -> Result<Arc<Function>> {
        let key = (mode.clone(), depth);
        if let Some(fun) = self.cache.get(&key) {
            return Ok(fun.clone());
        }
        if depth > self.config.max_depth {
            let fun = Arc::new(Function::null(mode.clone()));
            self.cache.insert(key, fun.clone());
            return Ok(fun);
        }
        let matching: Vec<Rule> = self
            .rules
            .rules_for(mode)
            .into_iter()
            .cloned()
            .collect();
        if matching.is_empty() {
            bail!("no rule matches mode {}", mode);
        }
        let raw = if matching.len() == 1 {
            // A sum of one branch is just the branch.
            Arc::new(rule_compiler::compile_rule(self, mode, depth, &matching[0])?)
        } else {
            let mut branches = Vec::with_capacity(matching.len());
            for rule in &matching {
                branches.push(Arc::new(rule_compiler::compile_rule(self, mode, depth, rule)?));
            }
            Arc::new(Function::sum(branches))
        };
        let fun = if depth == 0 {
            let wrapped = match self.config.normalize {
                Normalization::Softmax => Arc::new(Function::softmax(raw)),
                Normalization::LogSoftmax => {
                    Arc::new(Function::softmax(Arc::new(Function::log(raw))))
                }
                Normalization::None => raw,
            };
            wrapped.install();
            wrapped
        } else {
            raw
        };
        self.cache.insert(key, fun.clone());
        Ok(fun)
    }

    /// The compiled depth-0 function for a mode, compiling on first use.
    pub fn get_function(&mut self, mode: &Mode) -> Result<Arc<Function>> {
        self.compile_at(mode, 0)
    }

    /// Alias of [`get_function`](Program::get_function), named for the
    /// prediction entry point.
    pub fn get_predict_function(&mut self, mode: &Mode) -> Result<Arc<Function>> {
        self.get_function(mode)
    }

    /// Evaluate a mode on one-hot input vectors.
    pub fn eval(&mut self, mode: &Mode, inputs: &[SparseVector]) -> Result<SparseVector> {
        let fun = self.get_function(mode)?;
        let mut pad = Scratchpad::new();
        fun.eval(&self.db, inputs, &mut pad)
    }

    /// Evaluate a mode on symbols, one-hot encoding each through the
    /// database's symbol table; an unrecognized symbol is an error.
    pub fn eval_symbols(
        &mut self,
        mode: &Mode,
        symbols: &[&str],
        type_name: Option<&str>,
    ) -> Result<SparseVector> {
        let inputs = symbols
            .iter()
            .map(|s| self.db.onehot(s, type_name))
            .collect::<Result<Vec<_>, _>>()?;
        self.eval(mode, &inputs)
    }

    /// Evaluate and compute parameter gradients. Requires a typeless
    /// database.
    pub fn eval_grad(
        &mut self,
        mode: &Mode,
        inputs: &[SparseVector],
    ) -> Result<(SparseVector, Gradients)> {
        if !self.db.is_typeless() {
            bail!("gradient evaluation requires a typeless database");
        }
        let fun = self.get_function(mode)?;
        fun.eval_grad(&self.db, inputs)
    }

    /// Symbol-input variant of [`eval_grad`](Program::eval_grad).
    pub fn eval_grad_symbols(
        &mut self,
        mode: &Mode,
        symbols: &[&str],
    ) -> Result<(SparseVector, Gradients)> {
        if !self.db.is_typeless() {
            bail!("gradient evaluation requires a typeless database");
        }
        let inputs = symbols
            .iter()
            .map(|s| self.db.onehot(s, None))
            .collect::<Result<Vec<_>, _>>()?;
        self.eval_grad(mode, &inputs)
    }

    /// Discard every memoized function. Required after changing rules,
    /// parameter declarations, or configuration.
    pub fn clear_function_cache(&mut self) {
        self.cache.clear();
    }

    /// Weight initialization is ProPPR-specific; on a plain program these
    /// are diagnostics-only no-ops so both program kinds share one API.
    pub fn set_all_weights(&mut self) {
        warn!("trying to set weights on a non-ProPPR program");
    }

    pub fn set_feature_weights(&mut self, _epsilon: f64) {
        warn!("trying to set feature weights on a non-ProPPR program");
    }

    pub fn set_rule_weights(&mut self, _weights: Option<&SparseVector>, _epsilon: f64) {
        warn!("trying to set rule weights on a non-ProPPR program");
    }

    /// Persist the program: rule text in canonical syntax plus the
    /// database. The compiled-function cache is never persisted. Plugin
    /// bindings cannot round-trip; serializing a program that has any
    /// emits a warning and the host must re-register them after reload.
    pub fn serialize(&self, dir: &Path) -> Result<()> {
        if !self.plugins.is_empty() {
            warn!(
                dir = %dir.display(),
                "plugins cannot be serialized, so semantics after deserialization may differ"
            );
        }
        fs::create_dir_all(dir)
            .with_context(|| format!("cannot create program directory {}", dir.display()))?;
        let mut text = String::new();
        for rule in self.rules.iter() {
            text.push_str(&rule.to_string());
            text.push('\n');
        }
        let rules_path = dir.join(RULES_FILE);
        fs::write(&rules_path, text)
            .with_context(|| format!("cannot write {}", rules_path.display()))?;
        self.db.serialize(&dir.join(DATABASE_FILE))?;
        Ok(())
    }

    /// Reload a program from a directory written by
    /// [`serialize`](Program::serialize). The function cache is rebuilt
    /// lazily on the next compile.
    pub fn deserialize(dir: &Path) -> Result<Program> {
        let db = Database::deserialize(&dir.join(DATABASE_FILE))?;
        let rules_path = dir.join(RULES_FILE);
        let text = fs::read_to_string(&rules_path)
            .with_context(|| format!("cannot read {}", rules_path.display()))?;
        let rules = Parser::new(Syntax::Canonical).parse_str(&text)?;
        Ok(Program::from_parts(
            db,
            rules,
            Plugins::new(),
            CompilerConfig::default(),
        ))
    }
}
