//! Registry of externally supplied primitive predicates.
//!
//! A plugin binds a [`Mode`] to a closure that maps input vectors to an
//! output vector, letting a backend inject built-in predicates the rule
//! compiler calls directly instead of compiling rules. Definitions are
//! captured at registration time and are deliberately not serializable;
//! hosts must re-register them after reloading a program.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use indexmap::IndexMap;

use matlog_db::{Database, SparseVector};
use matlog_ir::Mode;

/// Maps the input dataflow values to the output value.
pub type PluginFn = Arc<dyn Fn(&Database, &[SparseVector]) -> Result<SparseVector> + Send + Sync>;

/// Maps the input argument types to the output argument type.
pub type PluginTypeFn = Arc<dyn Fn(&[&str]) -> String + Send + Sync>;

/// Plugin registry, keyed both by exact mode and by `(functor, arity)`.
/// Multiple io-patterns of one functor may be registered independently;
/// re-registering the identical exact mode overwrites it (last wins).
#[derive(Clone, Default)]
pub struct Plugins {
    by_signature: IndexMap<(String, usize), Vec<Mode>>,
    output_fun: HashMap<Mode, PluginFn>,
    output_type_fun: HashMap<Mode, Option<PluginTypeFn>>,
}

impl Plugins {
    pub fn new() -> Self {
        Plugins::default()
    }

    pub fn is_empty(&self) -> bool {
        self.by_signature.is_empty()
    }

    /// Register a primitive implementation for an exact mode.
    pub fn define(
        &mut self,
        mode: Mode,
        output_fun: PluginFn,
        output_type_fun: Option<PluginTypeFn>,
    ) {
        let key = (mode.functor().to_string(), mode.arity());
        let modes = self.by_signature.entry(key).or_default();
        if !modes.contains(&mode) {
            modes.push(mode.clone());
        }
        self.output_fun.insert(mode.clone(), output_fun);
        self.output_type_fun.insert(mode, output_type_fun);
    }

    /// Is this exact mode defined?
    pub fn is_defined(&self, mode: &Mode) -> bool {
        self.output_fun.contains_key(mode)
    }

    /// Is any mode of this functor/arity defined?
    pub fn is_defined_functor(&self, functor: &str, arity: usize) -> bool {
        self.by_signature
            .contains_key(&(functor.to_string(), arity))
    }

    /// The registered modes for a functor/arity, in registration order.
    pub fn modes_for(&self, functor: &str, arity: usize) -> &[Mode] {
        self.by_signature
            .get(&(functor.to_string(), arity))
            .map(|m| m.as_slice())
            .unwrap_or(&[])
    }

    /// The registered implementation for an exact mode.
    pub fn definition(&self, mode: &Mode) -> Result<PluginFn> {
        self.output_fun
            .get(mode)
            .cloned()
            .ok_or_else(|| anyhow!("no plugin definition for mode {}", mode))
    }

    /// Apply the registered output-type function.
    pub fn output_type(&self, mode: &Mode, input_types: &[&str]) -> Result<String> {
        match self.output_type_fun.get(mode) {
            Some(Some(f)) => Ok(f.as_ref()(input_types)),
            Some(None) => Err(anyhow!("no output type function registered for {}", mode)),
            None => Err(anyhow!("no plugin definition for mode {}", mode)),
        }
    }
}

impl fmt::Debug for Plugins {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugins")
            .field("modes", &self.output_fun.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop() -> PluginFn {
        Arc::new(|_db, inputs| Ok(inputs[0].clone()))
    }

    #[test]
    fn test_define_and_lookup() {
        let mut plugins = Plugins::new();
        assert!(plugins.is_empty());

        let mode: Mode = "near/io".parse().unwrap();
        let f = noop();
        plugins.define(mode.clone(), f.clone(), None);

        assert!(!plugins.is_empty());
        assert!(plugins.is_defined(&mode));
        assert!(plugins.is_defined_functor("near", 2));
        assert!(!plugins.is_defined_functor("near", 1));
        assert!(!plugins.is_defined(&"near/oi".parse().unwrap()));
        assert!(Arc::ptr_eq(&plugins.definition(&mode).unwrap(), &f));
    }

    #[test]
    fn test_second_io_pattern_is_independent() {
        let mut plugins = Plugins::new();
        let io: Mode = "near/io".parse().unwrap();
        let oi: Mode = "near/oi".parse().unwrap();
        let f = noop();
        let g: PluginFn = Arc::new(|db, _| Ok(matlog_db::SparseVector::zeros(db.num_symbols(None)?)));

        plugins.define(io.clone(), f.clone(), None);
        plugins.define(oi.clone(), g.clone(), None);

        assert!(Arc::ptr_eq(&plugins.definition(&io).unwrap(), &f));
        assert!(Arc::ptr_eq(&plugins.definition(&oi).unwrap(), &g));
        assert_eq!(plugins.modes_for("near", 2).len(), 2);
    }

    #[test]
    fn test_redefinition_overwrites() {
        let mut plugins = Plugins::new();
        let mode: Mode = "near/io".parse().unwrap();
        let f = noop();
        let g = noop();
        plugins.define(mode.clone(), f, None);
        plugins.define(mode.clone(), g.clone(), None);
        assert!(Arc::ptr_eq(&plugins.definition(&mode).unwrap(), &g));
        assert_eq!(plugins.modes_for("near", 2).len(), 1);
    }

    #[test]
    fn test_output_type() {
        let mut plugins = Plugins::new();
        let mode: Mode = "near/io".parse().unwrap();
        plugins.define(
            mode.clone(),
            noop(),
            Some(Arc::new(|inputs: &[&str]| inputs[0].to_string())),
        );
        assert_eq!(plugins.output_type(&mode, &["place"]).unwrap(), "place");
        assert!(plugins
            .output_type(&"far/io".parse().unwrap(), &["place"])
            .is_err());
    }
}
