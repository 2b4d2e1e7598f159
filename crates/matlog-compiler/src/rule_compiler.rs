//! Compiles one rule body into an op sequence for a given mode.
//!
//! Goals are scheduled left to right as a dataflow: the mode's input
//! variables start bound, each goal either extends the chain toward the
//! output variable, filters an already-bound variable, or introduces a
//! constant. A goal's predicate resolves, in order, to a plugin definition
//! (exact induced mode), to the program's rules (compiled one depth level
//! deeper), or to a database relation. Bound values that feed neither the
//! output nor a later goal scale the result by their total mass, which is
//! how `weighted(V)` chains contribute a rule's feature weight.

use std::collections::{HashMap, HashSet};

use anyhow::{anyhow, bail, Result};

use matlog_ir::{Goal, Mode, Rule, Term};

use crate::function::Function;
use crate::ops::{Op, OpKind};
use crate::program::Program;

/// Functor of the variable-binding goals produced by feature rewriting.
pub const ASSIGN: &str = "assign";

/// Compile `rule` under `mode`; nested predicate references compile through
/// `program` at `depth + 1`.
pub fn compile_rule(
    program: &mut Program,
    mode: &Mode,
    depth: usize,
    rule: &Rule,
) -> Result<Function> {
    if rule.head.arity() != mode.arity() {
        bail!("rule head {} does not match mode {}", rule.head, mode);
    }
    let out_positions: Vec<usize> = mode.output_positions().collect();
    if out_positions.len() != 1 {
        bail!("mode {} must have exactly one output argument", mode);
    }

    let mut c = Compiler {
        program,
        depth,
        cur: HashMap::new(),
        produced: Vec::new(),
        consumed: HashSet::new(),
        ops: Vec::new(),
        tmp: 0,
    };

    let mut input_names = Vec::new();
    for pos in mode.input_positions() {
        match &rule.head.args[pos] {
            Term::Var(v) => {
                c.cur.insert(v.clone(), v.clone());
                input_names.push(v.clone());
            }
            Term::Const(_) => bail!(
                "constant in input position {} of rule head {}",
                pos,
                rule.head
            ),
        }
    }
    let out_var = match &rule.head.args[out_positions[0]] {
        Term::Var(v) => v.clone(),
        Term::Const(_) => bail!("constant in output position of rule head {}", rule.head),
    };

    for goal in &rule.body {
        c.compile_goal(goal)?;
    }

    let out_name = c.cur.get(&out_var).cloned().ok_or_else(|| {
        anyhow!(
            "rule {}: output variable {} is never bound under mode {}",
            rule,
            out_var,
            mode
        )
    })?;

    // Dangling values weight the proof: scale the output by their mass.
    let weighters: Vec<String> = c
        .produced
        .iter()
        .filter(|name| !c.consumed.contains(*name) && **name != out_name)
        .cloned()
        .collect();
    let mut result = out_name;
    for weighter in weighters {
        let dst = c.fresh();
        c.emit(OpKind::WeightedVec {
            dst: dst.clone(),
            weighter,
            vec: result,
        });
        result = dst;
    }

    Ok(Function::op_seq(mode.clone(), input_names, result, c.ops))
}

/// Best-effort per-variable type inference for `rule`, from declared
/// relation types and plugin output-type functions.
pub fn infer_types(program: &Program, mode: &Mode, rule: &Rule) -> Result<HashMap<String, String>> {
    if rule.head.arity() != mode.arity() {
        bail!("rule head {} does not match mode {}", rule.head, mode);
    }
    let db = program.db();
    let mut types: HashMap<String, String> = HashMap::new();
    for (pos, arg) in rule.head.args.iter().enumerate() {
        if let Term::Var(v) = arg {
            if let Some(t) = db.arg_type(&rule.head.functor, rule.head.arity(), pos) {
                types.entry(v.clone()).or_insert(t);
            }
        }
    }
    // Iterate so plugin output types can chain through the body.
    for _ in 0..=rule.body.len() {
        let mut changed = false;
        for goal in &rule.body {
            if goal.functor == ASSIGN {
                continue;
            }
            for (pos, arg) in goal.args.iter().enumerate() {
                if let Term::Var(v) = arg {
                    if !types.contains_key(v) {
                        if let Some(t) = db.arg_type(&goal.functor, goal.arity(), pos) {
                            types.insert(v.clone(), t);
                            changed = true;
                        }
                    }
                }
            }
            for m in program.plugins().modes_for(&goal.functor, goal.arity()) {
                let mut input_types = Vec::new();
                let mut known = true;
                for pos in m.input_positions() {
                    match goal.args.get(pos) {
                        Some(Term::Var(v)) => match types.get(v) {
                            Some(t) => input_types.push(t.clone()),
                            None => {
                                known = false;
                                break;
                            }
                        },
                        _ => {
                            known = false;
                            break;
                        }
                    }
                }
                if !known {
                    continue;
                }
                let refs: Vec<&str> = input_types.iter().map(|s| s.as_str()).collect();
                if let Ok(out_type) = program.plugins().output_type(m, &refs) {
                    for pos in m.output_positions() {
                        if let Some(Term::Var(v)) = goal.args.get(pos) {
                            if !types.contains_key(v) {
                                types.insert(v.clone(), out_type.clone());
                                changed = true;
                            }
                        }
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }
    Ok(types)
}

enum ArgState {
    Bound { name: String, var: Option<String> },
    Unbound { var: String },
}

struct Compiler<'a> {
    program: &'a mut Program,
    depth: usize,
    /// Current environment name of each rule variable (values are never
    /// rebound in place; filters produce fresh names).
    cur: HashMap<String, String>,
    produced: Vec<String>,
    consumed: HashSet<String>,
    ops: Vec<Op>,
    tmp: usize,
}

impl Compiler<'_> {
    fn fresh(&mut self) -> String {
        let name = format!("_t{}", self.tmp);
        self.tmp += 1;
        name
    }

    fn emit(&mut self, kind: OpKind) {
        let op = Op::new(kind);
        self.produced.push(op.dst().to_string());
        self.ops.push(op);
    }

    fn use_name(&mut self, name: &str) {
        self.consumed.insert(name.to_string());
    }

    /// The environment name for a variable's next value: the variable's own
    /// name on first binding, a fresh name on rebinding.
    fn bind_var(&mut self, var: &str) -> String {
        let name = if self.cur.contains_key(var) {
            self.fresh()
        } else {
            var.to_string()
        };
        self.cur.insert(var.to_string(), name.clone());
        name
    }

    fn compile_goal(&mut self, goal: &Goal) -> Result<()> {
        if goal.functor == ASSIGN {
            if goal.arity() != 2 {
                bail!("assign goal {} must have two arguments", goal);
            }
            let (Term::Var(v), Term::Const(symbol)) = (&goal.args[0], &goal.args[1]) else {
                bail!("assign goal {} must bind a variable to a constant", goal);
            };
            let (v, symbol) = (v.clone(), symbol.clone());
            let dst = self.bind_var(&v);
            self.emit(OpKind::AssignOnehot {
                dst,
                symbol,
                type_name: None,
            });
            return Ok(());
        }
        match goal.arity() {
            1 => self.compile_unary(goal),
            2 => self.compile_binary(goal),
            n => bail!("goals of arity {} are not supported: {}", n, goal),
        }
    }

    fn compile_unary(&mut self, goal: &Goal) -> Result<()> {
        match &goal.args[0] {
            Term::Const(symbol) => {
                // Membership check on a constant: its fact weight scales the proof.
                let symbol = symbol.clone();
                let type_name = self.program.db().arg_type(&goal.functor, 1, 0);
                let hot = self.fresh();
                self.emit(OpKind::AssignOnehot {
                    dst: hot.clone(),
                    symbol,
                    type_name,
                });
                let vec = self.fresh();
                self.emit(OpKind::AssignVector {
                    dst: vec.clone(),
                    mode: Mode::from_pattern(&goal.functor, "i")?,
                });
                let checked = self.fresh();
                self.use_name(&hot);
                self.use_name(&vec);
                self.emit(OpKind::ComponentwiseVecMul {
                    dst: checked,
                    src1: hot,
                    src2: vec,
                });
                Ok(())
            }
            Term::Var(v) => {
                let v = v.clone();
                match self.cur.get(&v).cloned() {
                    Some(src) => {
                        // Bound: filter the current value through the relation.
                        let mode = Mode::from_pattern(&goal.functor, "i")?;
                        if self.program.plugins().is_defined(&mode) {
                            let fun = self.program.plugins().definition(&mode)?;
                            self.use_name(&src);
                            let dst = self.bind_var(&v);
                            self.emit(OpKind::CallPlugin {
                                dst,
                                srcs: vec![src],
                                mode,
                                fun,
                            });
                        } else if !self.program.rules().rules_for(&mode).is_empty() {
                            bail!(
                                "unary goal {} over a rule-defined predicate is not supported \
                                 with a bound argument",
                                goal
                            );
                        } else {
                            let vec = self.fresh();
                            self.emit(OpKind::AssignVector {
                                dst: vec.clone(),
                                mode,
                            });
                            self.use_name(&src);
                            self.use_name(&vec);
                            let dst = self.bind_var(&v);
                            self.emit(OpKind::ComponentwiseVecMul {
                                dst,
                                src1: src,
                                src2: vec,
                            });
                        }
                        Ok(())
                    }
                    None => {
                        // Unbound: the relation's vector becomes the value.
                        let mode = Mode::from_pattern(&goal.functor, "o")?;
                        if self.program.plugins().is_defined(&mode) {
                            let fun = self.program.plugins().definition(&mode)?;
                            let dst = self.bind_var(&v);
                            self.emit(OpKind::CallPlugin {
                                dst,
                                srcs: Vec::new(),
                                mode,
                                fun,
                            });
                        } else if !self.program.rules().rules_for(&mode).is_empty() {
                            let fun = self.program.compile_at(&mode, self.depth + 1)?;
                            let dst = self.bind_var(&v);
                            self.emit(OpKind::DefinedPred {
                                dst,
                                srcs: Vec::new(),
                                depth: self.depth + 1,
                                mode,
                                fun,
                            });
                        } else {
                            let dst = self.bind_var(&v);
                            self.emit(OpKind::AssignVector { dst, mode });
                        }
                        Ok(())
                    }
                }
            }
        }
    }

    fn compile_binary(&mut self, goal: &Goal) -> Result<()> {
        let mut states = Vec::with_capacity(2);
        for (pos, arg) in goal.args.iter().enumerate() {
            match arg {
                Term::Const(symbol) => {
                    let symbol = symbol.clone();
                    let type_name = self.program.db().arg_type(&goal.functor, 2, pos);
                    let hot = self.fresh();
                    self.emit(OpKind::AssignOnehot {
                        dst: hot.clone(),
                        symbol,
                        type_name,
                    });
                    states.push(ArgState::Bound {
                        name: hot,
                        var: None,
                    });
                }
                Term::Var(v) => match self.cur.get(v) {
                    Some(name) => states.push(ArgState::Bound {
                        name: name.clone(),
                        var: Some(v.clone()),
                    }),
                    None => states.push(ArgState::Unbound { var: v.clone() }),
                },
            }
        }
        let second = states.pop().expect("binary goal");
        let first = states.pop().expect("binary goal");
        match (first, second) {
            (ArgState::Bound { name, .. }, ArgState::Unbound { var }) => {
                self.chain(goal, name, &var, false)
            }
            (ArgState::Unbound { var }, ArgState::Bound { name, .. }) => {
                self.chain(goal, name, &var, true)
            }
            (ArgState::Bound { name: x, .. }, ArgState::Bound { name: y, var }) => {
                self.constrain(goal, x, y, var.as_deref())
            }
            (ArgState::Unbound { .. }, ArgState::Unbound { .. }) => {
                bail!("goal {} has no bound argument", goal)
            }
        }
    }

    /// Extend the chain: compute the unbound side from the bound side.
    fn chain(&mut self, goal: &Goal, src: String, var: &str, transpose: bool) -> Result<()> {
        let pattern = if transpose { "oi" } else { "io" };
        let mode = Mode::from_pattern(&goal.functor, pattern)?;
        self.use_name(&src);
        if self.program.plugins().is_defined(&mode) {
            let fun = self.program.plugins().definition(&mode)?;
            let dst = self.bind_var(var);
            self.emit(OpKind::CallPlugin {
                dst,
                srcs: vec![src],
                mode,
                fun,
            });
        } else if !self.program.rules().rules_for(&mode).is_empty() {
            let fun = self.program.compile_at(&mode, self.depth + 1)?;
            let dst = self.bind_var(var);
            self.emit(OpKind::DefinedPred {
                dst,
                srcs: vec![src],
                depth: self.depth + 1,
                mode,
                fun,
            });
        } else {
            let dst = self.bind_var(var);
            self.emit(OpKind::VecMatMul {
                dst,
                src,
                functor: goal.functor.clone(),
                transpose,
            });
        }
        Ok(())
    }

    /// Both sides bound: intersect the forward image with the second value.
    /// If the second argument is a variable it is rebound to the filtered
    /// value, otherwise the check dangles and weights the proof.
    fn constrain(&mut self, goal: &Goal, x: String, y: String, var: Option<&str>) -> Result<()> {
        let mode = Mode::from_pattern(&goal.functor, "io")?;
        let image = self.fresh();
        self.use_name(&x);
        if self.program.plugins().is_defined(&mode) {
            let fun = self.program.plugins().definition(&mode)?;
            self.emit(OpKind::CallPlugin {
                dst: image.clone(),
                srcs: vec![x],
                mode,
                fun,
            });
        } else if !self.program.rules().rules_for(&mode).is_empty() {
            let fun = self.program.compile_at(&mode, self.depth + 1)?;
            self.emit(OpKind::DefinedPred {
                dst: image.clone(),
                srcs: vec![x],
                depth: self.depth + 1,
                mode,
                fun,
            });
        } else {
            self.emit(OpKind::VecMatMul {
                dst: image.clone(),
                src: x,
                functor: goal.functor.clone(),
                transpose: false,
            });
        }
        self.use_name(&image);
        self.use_name(&y);
        let dst = match var {
            Some(v) => self.bind_var(v),
            None => self.fresh(),
        };
        self.emit(OpKind::ComponentwiseVecMul {
            dst,
            src1: y,
            src2: image,
        });
        Ok(())
    }
}
