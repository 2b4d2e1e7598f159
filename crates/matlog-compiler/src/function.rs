//! The compiled function graph: evaluation, gradients, installation.
//!
//! The variant set is closed: the zero function (the recursion floor), an op
//! sequence compiled from one rule, a sum over clause branches, and the two
//! normalization wrappers. Children are shared through `Arc`, so a
//! sub-predicate compiled once at some depth appears once in memory however
//! many parents reference it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use indexmap::IndexMap;

use matlog_db::{Database, SparseMatrix, SparseVector};
use matlog_ir::Mode;

use crate::ops::{add_delta, Op};

/// Per-call working state for evaluation. Each top-level call supplies its
/// own scratchpad, so concurrent evaluations of one compiled graph never
/// alias intermediate results.
#[derive(Debug, Default)]
pub struct Scratchpad {
    frames: Vec<HashMap<String, SparseVector>>,
}

impl Scratchpad {
    pub fn new() -> Self {
        Scratchpad::default()
    }

    pub(crate) fn enter_frame(&mut self) {
        self.frames.push(HashMap::new());
    }

    pub(crate) fn exit_frame(&mut self) {
        self.frames.pop();
    }

    pub(crate) fn bind(&mut self, name: &str, value: SparseVector) {
        if let Some(frame) = self.frames.last_mut() {
            frame.insert(name.to_string(), value);
        }
    }

    /// Names are rule-local: lookup only searches the current frame.
    pub(crate) fn lookup(&self, name: &str) -> Option<&SparseVector> {
        self.frames.last().and_then(|frame| frame.get(name))
    }

    pub(crate) fn frame(&self) -> Option<&HashMap<String, SparseVector>> {
        self.frames.last()
    }
}

/// Gradients of the evaluation result with respect to declared parameters,
/// keyed by parameter name; arity-1 parameters accumulate vectors, arity-2
/// matrices.
#[derive(Debug, Default)]
pub struct Gradients {
    vectors: IndexMap<String, SparseVector>,
    matrices: IndexMap<String, SparseMatrix>,
}

impl Gradients {
    pub fn new() -> Self {
        Gradients::default()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty() && self.matrices.is_empty()
    }

    pub fn vector(&self, name: &str) -> Option<&SparseVector> {
        self.vectors.get(name)
    }

    pub fn matrix(&self, name: &str) -> Option<&SparseMatrix> {
        self.matrices.get(name)
    }

    /// The parameters that received gradient mass, as `(name, arity)` pairs.
    pub fn params(&self) -> Vec<(String, usize)> {
        self.vectors
            .keys()
            .map(|n| (n.clone(), 1))
            .chain(self.matrices.keys().map(|n| (n.clone(), 2)))
            .collect()
    }

    pub(crate) fn add_vector(&mut self, name: &str, delta: &SparseVector) -> Result<()> {
        match self.vectors.get_mut(name) {
            Some(existing) => existing.add_assign(delta)?,
            None => {
                self.vectors.insert(name.to_string(), delta.clone());
            }
        }
        Ok(())
    }

    pub(crate) fn add_outer(
        &mut self,
        name: &str,
        row: &SparseVector,
        col: &SparseVector,
    ) -> Result<()> {
        let m = self
            .matrices
            .entry(name.to_string())
            .or_insert_with(|| SparseMatrix::zeros(row.dim(), col.dim()));
        m.outer_add(row, col, 1.0)?;
        Ok(())
    }
}

#[derive(Debug)]
pub struct Function {
    id: AtomicU64,
    kind: FunKind,
}

#[derive(Debug)]
pub enum FunKind {
    /// The zero function, the floor of depth-bounded recursion.
    Null { mode: Mode },
    /// One rule body compiled to a sequence of dataflow ops.
    OpSeq {
        mode: Mode,
        inputs: Vec<String>,
        output: String,
        ops: Vec<Op>,
    },
    /// Clause summation: a predicate succeeds through any clause.
    Sum { branches: Vec<Arc<Function>> },
    Softmax { inner: Arc<Function> },
    Log { inner: Arc<Function> },
}

impl Function {
    fn with_kind(kind: FunKind) -> Self {
        Function {
            id: AtomicU64::new(0),
            kind,
        }
    }

    pub fn null(mode: Mode) -> Self {
        Function::with_kind(FunKind::Null { mode })
    }

    pub fn op_seq(mode: Mode, inputs: Vec<String>, output: String, ops: Vec<Op>) -> Self {
        Function::with_kind(FunKind::OpSeq {
            mode,
            inputs,
            output,
            ops,
        })
    }

    pub fn sum(branches: Vec<Arc<Function>>) -> Self {
        Function::with_kind(FunKind::Sum { branches })
    }

    pub fn softmax(inner: Arc<Function>) -> Self {
        Function::with_kind(FunKind::Softmax { inner })
    }

    pub fn log(inner: Arc<Function>) -> Self {
        Function::with_kind(FunKind::Log { inner })
    }

    /// Structural id assigned by installation; 0 until installed.
    pub fn id(&self) -> u64 {
        self.id.load(Ordering::Relaxed)
    }

    pub fn kind(&self) -> &FunKind {
        &self.kind
    }

    /// Assign stable depth-first ids to every node of the graph, returning
    /// the number of nodes visited. Already-installed subgraphs keep their
    /// ids and are not renumbered.
    pub fn install(&self) -> u64 {
        let mut next = 1;
        self.install_with(&mut next);
        next - 1
    }

    pub(crate) fn install_with(&self, next: &mut u64) {
        if self.id.load(Ordering::Relaxed) != 0 {
            return;
        }
        self.id.store(*next, Ordering::Relaxed);
        *next += 1;
        match &self.kind {
            FunKind::Null { .. } => {}
            FunKind::OpSeq { ops, .. } => {
                for op in ops {
                    op.install_with(next);
                }
            }
            FunKind::Sum { branches } => {
                for branch in branches {
                    branch.install_with(next);
                }
            }
            FunKind::Softmax { inner } | FunKind::Log { inner } => inner.install_with(next),
        }
    }

    /// Evaluate against the database, binding `inputs` to the function's
    /// input variables in mode order.
    pub fn eval(
        &self,
        db: &Database,
        inputs: &[SparseVector],
        pad: &mut Scratchpad,
    ) -> Result<SparseVector> {
        match &self.kind {
            FunKind::Null { mode } => null_output(db, mode),
            FunKind::OpSeq {
                inputs: names,
                output,
                ops,
                ..
            } => {
                if names.len() != inputs.len() {
                    bail!(
                        "function expects {} inputs, got {}",
                        names.len(),
                        inputs.len()
                    );
                }
                pad.enter_frame();
                let result = (|| {
                    for (name, value) in names.iter().zip(inputs) {
                        pad.bind(name, value.clone());
                    }
                    for op in ops {
                        op.eval(db, pad)?;
                    }
                    pad.lookup(output)
                        .cloned()
                        .ok_or_else(|| anyhow!("output variable '{}' was never bound", output))
                })();
                pad.exit_frame();
                result
            }
            FunKind::Sum { branches } => {
                let mut acc: Option<SparseVector> = None;
                for branch in branches {
                    let out = branch.eval(db, inputs, pad)?;
                    acc = Some(match acc {
                        Some(a) => a.add(&out)?,
                        None => out,
                    });
                }
                acc.ok_or_else(|| anyhow!("empty clause sum"))
            }
            FunKind::Softmax { inner } => Ok(inner.eval(db, inputs, pad)?.softmax()),
            FunKind::Log { inner } => Ok(inner.eval(db, inputs, pad)?.ln()),
        }
    }

    /// Evaluate, then reverse-propagate an all-ones delta, accumulating
    /// gradients for every declared parameter the computation touched.
    pub fn eval_grad(
        &self,
        db: &Database,
        inputs: &[SparseVector],
    ) -> Result<(SparseVector, Gradients)> {
        let output = self.eval(db, inputs, &mut Scratchpad::new())?;
        let delta = SparseVector::unit(output.dim());
        let mut grads = Gradients::new();
        self.backprop(db, inputs, &delta, &mut grads)?;
        Ok((output, grads))
    }

    /// Reverse pass: given a delta on the output, accumulate parameter
    /// gradients and return the deltas on the inputs.
    pub(crate) fn backprop(
        &self,
        db: &Database,
        inputs: &[SparseVector],
        delta: &SparseVector,
        grads: &mut Gradients,
    ) -> Result<Vec<SparseVector>> {
        match &self.kind {
            FunKind::Null { .. } => Ok(inputs
                .iter()
                .map(|v| SparseVector::zeros(v.dim()))
                .collect()),
            FunKind::OpSeq {
                inputs: names,
                output,
                ops,
                ..
            } => {
                // forward pass, keeping every intermediate value
                let mut pad = Scratchpad::new();
                pad.enter_frame();
                for (name, value) in names.iter().zip(inputs) {
                    pad.bind(name, value.clone());
                }
                for op in ops {
                    op.eval(db, &mut pad)?;
                }
                let env = pad.frame().cloned().unwrap_or_default();

                let mut deltas: HashMap<String, SparseVector> = HashMap::new();
                add_delta(&mut deltas, output, delta.clone())?;
                for op in ops.iter().rev() {
                    op.backprop(db, &env, &mut deltas, grads)?;
                }
                Ok(names
                    .iter()
                    .zip(inputs)
                    .map(|(name, value)| {
                        deltas
                            .remove(name)
                            .unwrap_or_else(|| SparseVector::zeros(value.dim()))
                    })
                    .collect())
            }
            FunKind::Sum { branches } => {
                let mut totals: Vec<SparseVector> = inputs
                    .iter()
                    .map(|v| SparseVector::zeros(v.dim()))
                    .collect();
                for branch in branches {
                    let branch_deltas = branch.backprop(db, inputs, delta, grads)?;
                    for (total, d) in totals.iter_mut().zip(&branch_deltas) {
                        total.add_assign(d)?;
                    }
                }
                Ok(totals)
            }
            FunKind::Softmax { inner } => {
                let y = inner.eval(db, inputs, &mut Scratchpad::new())?.softmax();
                let dot = delta.dot(&y)?;
                let mut inner_delta = SparseVector::zeros(y.dim());
                for (i, yi) in y.iter() {
                    inner_delta.set(i, yi * (delta.get(i) - dot))?;
                }
                inner.backprop(db, inputs, &inner_delta, grads)
            }
            FunKind::Log { inner } => {
                let x = inner.eval(db, inputs, &mut Scratchpad::new())?;
                let mut inner_delta = SparseVector::zeros(x.dim());
                for (i, xi) in x.iter() {
                    if xi != 0.0 {
                        inner_delta.set(i, delta.get(i) / xi)?;
                    }
                }
                inner.backprop(db, inputs, &inner_delta, grads)
            }
        }
    }
}

/// The zero vector over the mode's output type.
fn null_output(db: &Database, mode: &Mode) -> Result<SparseVector> {
    let type_name = mode
        .output_positions()
        .next()
        .and_then(|pos| db.arg_type(mode.functor(), mode.arity(), pos));
    Ok(db.zeros(type_name.as_deref())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::OpKind;

    fn edge_db() -> Database {
        let mut db = Database::new();
        db.add_fact("edge", &["a", "b"], 1.0).unwrap();
        db.add_fact("edge", &["b", "c"], 1.0).unwrap();
        db
    }

    fn edge_fun() -> Function {
        Function::op_seq(
            "path/io".parse().unwrap(),
            vec!["X".into()],
            "Y".into(),
            vec![Op::new(OpKind::VecMatMul {
                dst: "Y".into(),
                src: "X".into(),
                functor: "edge".into(),
                transpose: false,
            })],
        )
    }

    #[test]
    fn test_null_evaluates_to_zero() {
        let db = edge_db();
        let f = Function::null("path/io".parse().unwrap());
        let x = db.onehot("a", None).unwrap();
        let out = f.eval(&db, &[x], &mut Scratchpad::new()).unwrap();
        assert!(out.is_empty());
        assert_eq!(out.dim(), db.num_symbols(None).unwrap());
    }

    #[test]
    fn test_op_seq_follows_edges() {
        let db = edge_db();
        let f = edge_fun();
        let x = db.onehot("a", None).unwrap();
        let out = f.eval(&db, &[x], &mut Scratchpad::new()).unwrap();
        assert_eq!(out, db.onehot("b", None).unwrap());
    }

    #[test]
    fn test_sum_adds_branches() {
        let db = edge_db();
        let f = Function::sum(vec![Arc::new(edge_fun()), Arc::new(edge_fun())]);
        let x = db.onehot("a", None).unwrap();
        let out = f.eval(&db, &[x], &mut Scratchpad::new()).unwrap();
        assert_eq!(out, db.onehot("b", None).unwrap().scale(2.0));
    }

    #[test]
    fn test_softmax_wrapper_normalizes() {
        let db = edge_db();
        let f = Function::softmax(Arc::new(Function::sum(vec![
            Arc::new(edge_fun()),
            Arc::new(edge_fun()),
        ])));
        let x = db.onehot("a", None).unwrap();
        let out = f.eval(&db, &[x], &mut Scratchpad::new()).unwrap();
        assert!((out.sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_install_assigns_ids_once() {
        let shared = Arc::new(edge_fun());
        let f = Function::sum(vec![shared.clone(), shared.clone()]);
        assert_eq!(f.id(), 0);
        let count = f.install();
        // sum node + one shared branch + its op
        assert_eq!(count, 3);
        assert_eq!(f.id(), 1);
        assert_eq!(shared.id(), 2);
        // a second install does not renumber
        f.install();
        assert_eq!(shared.id(), 2);
    }

    #[test]
    fn test_eval_grad_flows_to_matrix_parameter() {
        let mut db = edge_db();
        db.mark_as_parameter("edge", 2);
        let f = edge_fun();
        let x = db.onehot("a", None).unwrap();
        let (out, grads) = f.eval_grad(&db, &[x]).unwrap();
        assert_eq!(out.nnz(), 1);
        let g = grads.matrix("edge").unwrap();
        let a = db.schema().symbol_id(None, "a").unwrap();
        let b = db.schema().symbol_id(None, "b").unwrap();
        // d out[b] / d edge[a,b] = x[a] = 1
        assert_eq!(g.get(a, b), 1.0);
    }
}
