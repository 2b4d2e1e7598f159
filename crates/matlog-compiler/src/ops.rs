//! Primitive dataflow operations emitted by the rule compiler.
//!
//! An op computes one named value in the evaluation environment from
//! previously computed values and the database. Ops also know how to
//! backpropagate a delta for gradient evaluation; gradients accumulate only
//! for relations the database has declared as parameters. Plugin calls are
//! opaque to differentiation.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};

use matlog_db::{Database, SparseVector};
use matlog_ir::Mode;

use crate::function::{Function, Gradients, Scratchpad};
use crate::plugins::PluginFn;

pub struct Op {
    id: AtomicU64,
    kind: OpKind,
}

pub enum OpKind {
    /// `dst = onehot(symbol)`
    AssignOnehot {
        dst: String,
        symbol: String,
        type_name: Option<String>,
    },
    /// `dst =` the unary relation (or parameter) vector named by `mode`
    AssignVector { dst: String, mode: Mode },
    /// `dst = src · M` (or `src · Mᵀ` when `transpose`)
    VecMatMul {
        dst: String,
        src: String,
        functor: String,
        transpose: bool,
    },
    /// `dst = src1 ∘ src2`
    ComponentwiseVecMul {
        dst: String,
        src1: String,
        src2: String,
    },
    /// `dst = vec` scaled by the total mass of `weighter`
    WeightedVec {
        dst: String,
        weighter: String,
        vec: String,
    },
    /// `dst = fun(srcs)`, a sub-predicate compiled one level deeper
    DefinedPred {
        dst: String,
        srcs: Vec<String>,
        mode: Mode,
        depth: usize,
        fun: Arc<Function>,
    },
    /// `dst = plugin(srcs)`
    CallPlugin {
        dst: String,
        srcs: Vec<String>,
        mode: Mode,
        fun: PluginFn,
    },
}

impl Op {
    pub fn new(kind: OpKind) -> Self {
        Op {
            id: AtomicU64::new(0),
            kind,
        }
    }

    /// Structural id assigned by installation; 0 until installed.
    pub fn id(&self) -> u64 {
        self.id.load(Ordering::Relaxed)
    }

    pub fn kind(&self) -> &OpKind {
        &self.kind
    }

    /// The environment name this op computes.
    pub fn dst(&self) -> &str {
        match &self.kind {
            OpKind::AssignOnehot { dst, .. }
            | OpKind::AssignVector { dst, .. }
            | OpKind::VecMatMul { dst, .. }
            | OpKind::ComponentwiseVecMul { dst, .. }
            | OpKind::WeightedVec { dst, .. }
            | OpKind::DefinedPred { dst, .. }
            | OpKind::CallPlugin { dst, .. } => dst,
        }
    }

    pub(crate) fn install_with(&self, next: &mut u64) {
        if self.id.load(Ordering::Relaxed) != 0 {
            return;
        }
        self.id.store(*next, Ordering::Relaxed);
        *next += 1;
        if let OpKind::DefinedPred { fun, .. } = &self.kind {
            fun.install_with(next);
        }
    }

    pub(crate) fn eval(&self, db: &Database, pad: &mut Scratchpad) -> Result<()> {
        let out = match &self.kind {
            OpKind::AssignOnehot {
                symbol, type_name, ..
            } => db.onehot(symbol, type_name.as_deref())?,
            OpKind::AssignVector { mode, .. } => db.vector(mode)?,
            OpKind::VecMatMul {
                src,
                functor,
                transpose,
                ..
            } => {
                let v = fetch(pad, src)?;
                let m = db.matrix(functor)?;
                if *transpose {
                    m.vec_mul_t(v)?
                } else {
                    m.vec_mul(v)?
                }
            }
            OpKind::ComponentwiseVecMul { src1, src2, .. } => {
                fetch(pad, src1)?.hadamard(fetch(pad, src2)?)?
            }
            OpKind::WeightedVec { weighter, vec, .. } => {
                let mass = fetch(pad, weighter)?.sum();
                fetch(pad, vec)?.scale(mass)
            }
            OpKind::DefinedPred { srcs, fun, .. } => {
                let values = fetch_all(pad, srcs)?;
                fun.eval(db, &values, pad)?
            }
            OpKind::CallPlugin { srcs, fun, .. } => {
                let values = fetch_all(pad, srcs)?;
                fun.as_ref()(db, &values)?
            }
        };
        pad.bind(self.dst(), out);
        Ok(())
    }

    pub(crate) fn backprop(
        &self,
        db: &Database,
        env: &HashMap<String, SparseVector>,
        deltas: &mut HashMap<String, SparseVector>,
        grads: &mut Gradients,
    ) -> Result<()> {
        let Some(delta) = deltas.get(self.dst()).cloned() else {
            return Ok(());
        };
        match &self.kind {
            OpKind::AssignOnehot { .. } => {}
            OpKind::AssignVector { mode, .. } => {
                if db.is_parameter(mode.functor(), 1) {
                    grads.add_vector(mode.functor(), &delta)?;
                }
            }
            OpKind::VecMatMul {
                src,
                functor,
                transpose,
                ..
            } => {
                let m = db.matrix(functor)?;
                let src_delta = if *transpose {
                    m.vec_mul(&delta)?
                } else {
                    m.vec_mul_t(&delta)?
                };
                add_delta(deltas, src, src_delta)?;
                if db.is_parameter(functor, 2) {
                    let src_val = env_get(env, src)?;
                    if *transpose {
                        grads.add_outer(functor, &delta, src_val)?;
                    } else {
                        grads.add_outer(functor, src_val, &delta)?;
                    }
                }
            }
            OpKind::ComponentwiseVecMul { src1, src2, .. } => {
                let v1 = env_get(env, src1)?;
                let v2 = env_get(env, src2)?;
                add_delta(deltas, src1, delta.hadamard(v2)?)?;
                add_delta(deltas, src2, delta.hadamard(v1)?)?;
            }
            OpKind::WeightedVec { weighter, vec, .. } => {
                let w = env_get(env, weighter)?;
                let v = env_get(env, vec)?;
                add_delta(deltas, vec, delta.scale(w.sum()))?;
                let g = delta.dot(v)?;
                let mut wd = SparseVector::zeros(w.dim());
                for (i, _) in w.iter() {
                    wd.set(i, g)?;
                }
                add_delta(deltas, weighter, wd)?;
            }
            OpKind::DefinedPred { srcs, fun, .. } => {
                let values: Vec<SparseVector> = srcs
                    .iter()
                    .map(|s| env_get(env, s).cloned())
                    .collect::<Result<_>>()?;
                let input_deltas = fun.backprop(db, &values, &delta, grads)?;
                for (src, d) in srcs.iter().zip(input_deltas) {
                    add_delta(deltas, src, d)?;
                }
            }
            OpKind::CallPlugin { .. } => {}
        }
        Ok(())
    }
}

impl fmt::Debug for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Op")
            .field("id", &self.id())
            .field("kind", &self.kind)
            .finish()
    }
}

impl fmt::Debug for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpKind::AssignOnehot { dst, symbol, .. } => {
                write!(f, "AssignOnehot({} = onehot({}))", dst, symbol)
            }
            OpKind::AssignVector { dst, mode } => write!(f, "AssignVector({} = {})", dst, mode),
            OpKind::VecMatMul {
                dst,
                src,
                functor,
                transpose,
            } => {
                let t = if *transpose { "ᵀ" } else { "" };
                write!(f, "VecMatMul({} = {} · {}{})", dst, src, functor, t)
            }
            OpKind::ComponentwiseVecMul { dst, src1, src2 } => {
                write!(f, "ComponentwiseVecMul({} = {} ∘ {})", dst, src1, src2)
            }
            OpKind::WeightedVec { dst, weighter, vec } => {
                write!(f, "WeightedVec({} = {} weighted by {})", dst, vec, weighter)
            }
            OpKind::DefinedPred {
                dst, srcs, mode, depth, ..
            } => write!(f, "DefinedPred({} = {}@{}({:?}))", dst, mode, depth, srcs),
            OpKind::CallPlugin { dst, srcs, mode, .. } => {
                write!(f, "CallPlugin({} = {}({:?}))", dst, mode, srcs)
            }
        }
    }
}

fn fetch<'a>(pad: &'a Scratchpad, name: &str) -> Result<&'a SparseVector> {
    pad.lookup(name)
        .ok_or_else(|| anyhow!("internal: variable '{}' is unbound", name))
}

fn fetch_all(pad: &Scratchpad, names: &[String]) -> Result<Vec<SparseVector>> {
    names.iter().map(|n| fetch(pad, n).cloned()).collect()
}

fn env_get<'a>(env: &'a HashMap<String, SparseVector>, name: &str) -> Result<&'a SparseVector> {
    env.get(name)
        .ok_or_else(|| anyhow!("internal: variable '{}' is unbound", name))
}

pub(crate) fn add_delta(
    deltas: &mut HashMap<String, SparseVector>,
    name: &str,
    delta: SparseVector,
) -> Result<()> {
    match deltas.get_mut(name) {
        Some(existing) => existing.add_assign(&delta).map_err(Into::into),
        None => {
            deltas.insert(name.to_string(), delta);
            Ok(())
        }
    }
}
