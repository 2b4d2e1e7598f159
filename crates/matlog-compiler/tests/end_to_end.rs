//! End-to-end tests: parse rules, load facts, compile, evaluate, and
//! exercise the weighting and persistence workflows against small knowledge
//! graphs.

use std::sync::Arc;

use matlog_compiler::{
    FunKind, Normalization, PluginFn, Plugins, ProPPRProgram, Program, WEIGHTED,
};
use matlog_db::{Database, Relation, SparseVector};
use matlog_ir::{Mode, Parser, Syntax};

fn graph_db() -> Database {
    let mut db = Database::new();
    db.add_fact("edge", &["a", "b"], 1.0).unwrap();
    db.add_fact("edge", &["b", "c"], 1.0).unwrap();
    db.add_fact("edge", &["c", "d"], 1.0).unwrap();
    db
}

fn path_program(normalize: Normalization) -> Program {
    let rules = Parser::new(Syntax::Proppr)
        .parse_str("path(X,Y) :- edge(X,Y).\npath(X,Y) :- edge(X,Z), path(Z,Y).")
        .unwrap();
    let mut program = Program::new(graph_db(), rules).unwrap();
    program.set_normalize(normalize);
    program
}

fn sym(db: &Database, s: &str) -> usize {
    db.schema().symbol_id(None, s).unwrap()
}

#[test]
fn test_compile_memoizes_per_mode_and_depth() {
    let mut program = path_program(Normalization::None);
    let mode: Mode = "path/io".parse().unwrap();

    let f1 = program.compile(&mode).unwrap();
    let f2 = program.compile(&mode).unwrap();
    assert!(Arc::ptr_eq(&f1, &f2));

    // depth-1 entry was memoized by the recursive clause independently
    let d1 = program.compile_at(&mode, 1).unwrap();
    assert!(!Arc::ptr_eq(&f1, &d1));
    let d1_again = program.compile_at(&mode, 1).unwrap();
    assert!(Arc::ptr_eq(&d1, &d1_again));
}

#[test]
fn test_clear_cache_rebuilds_equivalent_function() {
    let mut program = path_program(Normalization::None);
    let mode: Mode = "path/io".parse().unwrap();

    let f1 = program.compile(&mode).unwrap();
    let before = program.eval_symbols(&mode, &["a"], None).unwrap();

    program.clear_function_cache();
    let f2 = program.compile(&mode).unwrap();
    assert!(!Arc::ptr_eq(&f1, &f2));

    let after = program.eval_symbols(&mode, &["a"], None).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_depth_beyond_max_yields_null_function() {
    let mut program = path_program(Normalization::None);
    let mode: Mode = "path/io".parse().unwrap();
    let max_depth = program.config().max_depth;

    for depth in [max_depth + 1, max_depth + 5] {
        let fun = program.compile_at(&mode, depth).unwrap();
        assert!(matches!(fun.kind(), FunKind::Null { .. }));
        let x = program.db().onehot("a", None).unwrap();
        let out = fun
            .eval(program.db(), &[x], &mut matlog_compiler::Scratchpad::new())
            .unwrap();
        assert!(out.is_empty());
    }
}

#[test]
fn test_recursive_program_reaches_transitive_closure() {
    let mut program = path_program(Normalization::None);
    let mode: Mode = "path/io".parse().unwrap();
    let out = program.eval_symbols(&mode, &["a"], None).unwrap();

    let db = program.db();
    assert_eq!(out.get(sym(db, "b")), 1.0);
    assert_eq!(out.get(sym(db, "c")), 1.0);
    assert_eq!(out.get(sym(db, "d")), 1.0);
    assert_eq!(out.nnz(), 3);
}

#[test]
fn test_max_depth_zero_truncates_recursion() {
    let mut program = path_program(Normalization::None);
    program.set_max_depth(0);
    let mode: Mode = "path/io".parse().unwrap();
    let out = program.eval_symbols(&mode, &["a"], None).unwrap();
    // only the non-recursive clause survives
    assert_eq!(out.nnz(), 1);
    assert_eq!(out.get(sym(program.db(), "b")), 1.0);
}

#[test]
fn test_multi_clause_sum_is_elementwise_sum() {
    let mut db = Database::new();
    db.add_fact("q", &["a", "b"], 1.0).unwrap();
    db.add_fact("q", &["a", "c"], 3.0).unwrap();
    db.add_fact("s", &["a", "c"], 2.0).unwrap();
    let rules = Parser::new(Syntax::Proppr)
        .parse_str("rel(X,Y) :- q(X,Y).\nrel(X,Y) :- s(X,Y).")
        .unwrap();
    let mut program = Program::new(db, rules).unwrap();
    program.set_normalize(Normalization::None);

    let mode: Mode = "rel/io".parse().unwrap();
    let out = program.eval_symbols(&mode, &["a"], None).unwrap();

    let db = program.db();
    let x = db.onehot("a", None).unwrap();
    let expected = db
        .matrix("q")
        .unwrap()
        .vec_mul(&x)
        .unwrap()
        .add(&db.matrix("s").unwrap().vec_mul(&x).unwrap())
        .unwrap();
    assert_eq!(out, expected);
    assert_eq!(out.get(sym(db, "c")), 5.0);
}

#[test]
fn test_normalization_variants() {
    let mut db = Database::new();
    db.add_fact("q", &["a", "b"], 1.0).unwrap();
    db.add_fact("q", &["a", "c"], 3.0).unwrap();
    let rules = || {
        Parser::new(Syntax::Proppr)
            .parse_str("p(X,Y) :- q(X,Y).")
            .unwrap()
    };
    let mode: Mode = "p/io".parse().unwrap();

    let mut none = Program::new(db.clone(), rules()).unwrap();
    none.set_normalize(Normalization::None);
    let raw = none.eval_symbols(&mode, &["a"], None).unwrap();
    assert_eq!(raw.get(sym(none.db(), "c")), 3.0);

    let mut soft = Program::new(db.clone(), rules()).unwrap();
    soft.set_normalize(Normalization::Softmax);
    let softened = soft.eval_symbols(&mode, &["a"], None).unwrap();
    assert!((softened.sum() - 1.0).abs() < 1e-12);
    assert!(softened.iter().all(|(_, v)| v >= 0.0));
    assert!(softened.approx_eq(&raw.softmax(), 1e-12));

    let mut log_soft = Program::new(db, rules()).unwrap();
    log_soft.set_normalize(Normalization::LogSoftmax);
    let log_softened = log_soft.eval_symbols(&mode, &["a"], None).unwrap();
    // softmax ∘ log turns the raw scores into their direct normalization
    assert!(log_softened.approx_eq(&raw.ln().softmax(), 1e-12));
    assert!(log_softened.approx_eq(&raw.scale(1.0 / raw.sum()), 1e-9));
}

#[test]
fn test_install_assigns_ids_after_normalization() {
    let mut program = path_program(Normalization::Softmax);
    let mode: Mode = "path/io".parse().unwrap();
    let fun = program.compile(&mode).unwrap();
    assert_eq!(fun.id(), 1);
    let FunKind::Softmax { inner } = fun.kind() else {
        panic!("expected softmax at the top level");
    };
    assert!(inner.id() > 1);
    // recompiling returns the installed object unchanged
    let again = program.compile(&mode).unwrap();
    assert_eq!(again.id(), 1);
}

#[test]
fn test_no_rule_for_mode_is_fatal() {
    let mut program = path_program(Normalization::None);
    let err = program
        .eval_symbols(&"unknown/io".parse().unwrap(), &["a"], None)
        .unwrap_err();
    assert!(err.to_string().contains("no rule matches"));
}

#[test]
fn test_eval_symbols_rejects_unknown_symbol() {
    let mut program = path_program(Normalization::None);
    let mode: Mode = "path/io".parse().unwrap();
    assert!(program.eval_symbols(&mode, &["nobody"], None).is_err());
}

#[test]
fn test_proppr_rule_weights_scale_clauses() {
    let mut db = Database::new();
    db.add_fact("q", &["a", "b"], 1.0).unwrap();
    db.add_fact("s", &["a", "c"], 1.0).unwrap();
    let rules = Parser::new(Syntax::Proppr)
        .parse_str("p(X,Y) :- q(X,Y) {r1}.\np(X,Y) :- s(X,Y) {r2}.")
        .unwrap();
    let mut program = ProPPRProgram::new(db, rules).unwrap();
    program.set_normalize(Normalization::None);
    assert_eq!(program.rule_ids(), ["r1", "r2"]);

    program.set_rule_weights(None, 2.0, None).unwrap();
    let weights = program.get_rule_weights().unwrap();
    assert_eq!(weights.nnz(), 2);
    assert_eq!(weights.get(sym(program.db(), "r1")), 2.0);
    assert_eq!(weights.get(sym(program.db(), "r2")), 2.0);

    let mode: Mode = "p/io".parse().unwrap();
    let out = program.eval_symbols(&mode, &["a"], None).unwrap();
    assert_eq!(out.get(sym(program.db(), "b")), 2.0);
    assert_eq!(out.get(sym(program.db(), "c")), 2.0);
}

#[test]
fn test_proppr_explicit_weight_vector() {
    let mut db = Database::new();
    db.add_fact("q", &["a", "b"], 1.0).unwrap();
    let rules = Parser::new(Syntax::Proppr)
        .parse_str("p(X,Y) :- q(X,Y) {r1}.")
        .unwrap();
    let mut program = ProPPRProgram::new(db, rules).unwrap();
    program.set_normalize(Normalization::None);

    let dim = program.db().num_symbols(None).unwrap();
    let mut explicit = SparseVector::zeros(dim);
    explicit.set(sym(program.db(), "r1"), 0.25).unwrap();
    program.set_rule_weights(Some(explicit), 2.0, None).unwrap();
    // explicit vectors are also scaled by epsilon
    assert_eq!(
        program.get_rule_weights().unwrap().get(sym(program.db(), "r1")),
        0.5
    );
}

#[test]
fn test_rule_weights_from_rule_id_relation() {
    let mut db = Database::new();
    db.add_fact("q", &["a", "b"], 1.0).unwrap();
    db.add_fact("ruleids", &["r1"], 1.0).unwrap();
    db.add_fact("ruleids", &["r2"], 1.0).unwrap();
    let rules = Parser::new(Syntax::Proppr)
        .parse_str("p(X,Y) :- q(X,Y) {r1}.\np(X,Y) :- q(X,Y) {r2}.")
        .unwrap();
    let mut program = ProPPRProgram::new(db, rules).unwrap();

    assert!(program
        .set_rule_weights(None, 1.0, Some("missing"))
        .is_err());

    program.set_rule_weights(None, 0.5, Some("ruleids")).unwrap();
    let weights = program.get_rule_weights().unwrap();
    assert_eq!(weights.get(sym(program.db(), "r1")), 0.5);
    assert_eq!(weights.get(sym(program.db(), "r2")), 0.5);
    assert!(program.db().is_parameter(WEIGHTED, 1));
}

#[test]
fn test_generator_feature_weights_typeless() {
    let mut db = Database::new();
    db.add_fact("related", &["d1", "d2"], 1.0).unwrap();
    db.add_fact("hasWord", &["d1", "w1"], 1.0).unwrap();
    db.add_fact("hasWord", &["d2", "w1"], 1.0).unwrap();
    db.add_fact("hasWord", &["d2", "w2"], 1.0).unwrap();
    let rules = Parser::new(Syntax::Proppr)
        .parse_str("predict(X,Y) :- related(X,Y) {w(F): hasWord(X,F)}.")
        .unwrap();
    let mut program = ProPPRProgram::new(db, rules).unwrap();
    program.set_normalize(Normalization::None);

    program.set_feature_weights(0.5).unwrap();
    let Relation::Vector(w) = program.db().get_parameter("w", 1).unwrap() else {
        panic!("expected a vector parameter");
    };
    // preimage counts are clipped to 1 before scaling
    assert_eq!(w.get(sym(program.db(), "w1")), 0.5);
    assert_eq!(w.get(sym(program.db(), "w2")), 0.5);

    let mode: Mode = "predict/io".parse().unwrap();
    let out = program.eval_symbols(&mode, &["d1"], None).unwrap();
    assert_eq!(out.get(sym(program.db(), "d2")), 0.5);
}

#[test]
fn test_feature_weights_typed_declares_inferred_types() {
    let mut db = Database::typed();
    db.declare_relation_types("related", 2, vec!["doc".into(), "doc".into()])
        .unwrap();
    db.declare_relation_types("hasWord", 2, vec!["doc".into(), "word".into()])
        .unwrap();
    db.add_fact("related", &["d1", "d2"], 1.0).unwrap();
    db.add_fact("hasWord", &["d1", "w1"], 1.0).unwrap();
    db.add_fact("hasWord", &["d2", "w2"], 1.0).unwrap();
    let rules = Parser::new(Syntax::Proppr)
        .parse_str("predict(X,Y) :- related(X,Y) {w(F): hasWord(X,F)}.")
        .unwrap();
    let mut program = ProPPRProgram::new(db, rules).unwrap();

    assert_eq!(program.db().arg_type("w", 1, 0), None);
    program.set_feature_weights(1.5).unwrap();
    // the inferred type was declared on the schema as a side effect
    assert_eq!(program.db().arg_type("w", 1, 0).as_deref(), Some("word"));

    let Relation::Vector(w) = program.db().get_parameter("w", 1).unwrap() else {
        panic!("expected a vector parameter");
    };
    assert_eq!(w.dim(), program.db().num_symbols(Some("word")).unwrap());
    assert!(w.iter().all(|(_, v)| v == 1.5));

    // gradient evaluation fails fast on a typed database
    assert!(program
        .eval_grad_symbols(&"predict/io".parse().unwrap(), &["d1"])
        .is_err());
}

#[test]
fn test_eval_grad_reaches_parameters() {
    let mut db = Database::new();
    db.add_fact("q", &["a", "b"], 1.0).unwrap();
    let rules = Parser::new(Syntax::Proppr)
        .parse_str("p(X,Y) :- q(X,Y) {r1}.")
        .unwrap();
    let mut program = ProPPRProgram::new(db, rules).unwrap();
    program.set_normalize(Normalization::None);
    program.set_rule_weights(None, 2.0, None).unwrap();

    let mode: Mode = "p/io".parse().unwrap();
    let (out, grads) = program.eval_grad_symbols(&mode, &["a"]).unwrap();
    assert_eq!(out.get(sym(program.db(), "b")), 2.0);

    let g = grads.vector(WEIGHTED).unwrap();
    // d out[b] / d weighted[r1] = q(a,b) = 1
    assert_eq!(g.get(sym(program.db(), "r1")), 1.0);
}

#[test]
fn test_get_predict_function_is_the_depth_zero_entry() {
    let mut program = path_program(Normalization::Softmax);
    let mode: Mode = "path/io".parse().unwrap();
    let predict = program.get_predict_function(&mode).unwrap();
    assert!(Arc::ptr_eq(&predict, &program.get_function(&mode).unwrap()));
    assert!(Arc::ptr_eq(&predict, &program.compile(&mode).unwrap()));
}

#[test]
fn test_load_rule_files_merges_collections() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("base.mlog");
    let extra = dir.path().join("extra.mlog");
    std::fs::write(&base, "path(X,Y) :- edge(X,Y).\n").unwrap();
    std::fs::write(&extra, "path(X,Y) :- edge(X,Z), path(Z,Y).\n").unwrap();

    let mut program =
        Program::load_rule_files(&[&base, &extra], Syntax::Proppr, graph_db()).unwrap();
    program.set_normalize(Normalization::None);
    assert_eq!(program.rules().len(), 2);
    let out = program
        .eval_symbols(&"path/io".parse().unwrap(), &["a"], None)
        .unwrap();
    assert_eq!(out.nnz(), 3);
}

#[test]
fn test_proppr_load_rule_files_rewrites_annotations() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("rules.mlog");
    std::fs::write(&path, "p(X,Y) :- q(X,Y) {r1}.\n").unwrap();

    let mut db = Database::new();
    db.add_fact("q", &["a", "b"], 1.0).unwrap();
    let program = ProPPRProgram::load_rule_files(&[&path], db).unwrap();
    assert_eq!(program.rule_ids(), ["r1"]);
    assert!(program.rules().iter().all(|r| r.features.is_none()));
}

#[test]
fn test_set_feature_weight_bypasses_heuristics() {
    let mut db = Database::new();
    db.add_fact("q", &["a", "b"], 1.0).unwrap();
    let rules = Parser::new(Syntax::Proppr)
        .parse_str("p(X,Y) :- q(X,Y) {r1}.")
        .unwrap();
    let mut program = ProPPRProgram::new(db, rules).unwrap();
    program.set_normalize(Normalization::None);

    let dim = program.db().num_symbols(None).unwrap();
    let mut v = SparseVector::zeros(dim);
    v.set(sym(program.db(), "r1"), 3.0).unwrap();
    program
        .set_feature_weight(WEIGHTED, 1, Relation::Vector(v))
        .unwrap();

    assert_eq!(
        program.get_rule_weights().unwrap().get(sym(program.db(), "r1")),
        3.0
    );
    let out = program
        .eval_symbols(&"p/io".parse().unwrap(), &["a"], None)
        .unwrap();
    assert_eq!(out.get(sym(program.db(), "b")), 3.0);
}

#[test]
fn test_gradients_report_touched_parameters() {
    let mut db = Database::new();
    db.add_fact("q", &["a", "b"], 1.0).unwrap();
    let rules = Parser::new(Syntax::Proppr)
        .parse_str("p(X,Y) :- q(X,Y) {r1}.")
        .unwrap();
    let mut program = ProPPRProgram::new(db, rules).unwrap();
    program.set_normalize(Normalization::None);
    program.set_rule_weights(None, 1.0, None).unwrap();
    program.db_mut().mark_as_parameter("q", 2);
    program.clear_function_cache();

    let (_, grads) = program
        .eval_grad_symbols(&"p/io".parse().unwrap(), &["a"])
        .unwrap();
    let mut touched = grads.params();
    touched.sort();
    assert_eq!(
        touched,
        vec![("q".to_string(), 2), (WEIGHTED.to_string(), 1)]
    );
    assert!(grads.matrix("q").is_some());
}

#[test]
fn test_plugin_backed_goal_bypasses_rules() {
    let mut db = Database::new();
    db.add_fact("edge", &["a", "b"], 1.0).unwrap();

    // near(X,Y) follows an edge and doubles the mass
    let near: PluginFn = Arc::new(|db: &Database, inputs: &[SparseVector]| {
        Ok(db.matrix("edge")?.vec_mul(&inputs[0])?.scale(2.0))
    });
    let mut plugins = Plugins::new();
    plugins.define("near/io".parse().unwrap(), near, None);

    let rules = Parser::new(Syntax::Proppr)
        .parse_str("p(X,Y) :- near(X,Y).")
        .unwrap();
    let mut program = Program::with_plugins(db, rules, plugins).unwrap();
    program.set_normalize(Normalization::None);

    let out = program
        .eval_symbols(&"p/io".parse().unwrap(), &["a"], None)
        .unwrap();
    assert_eq!(out.get(sym(program.db(), "b")), 2.0);
}

#[test]
fn test_serialize_round_trip_reproduces_evaluation() {
    let mut program = path_program(Normalization::Softmax);
    let mode: Mode = "path/io".parse().unwrap();
    let before = program.eval_symbols(&mode, &["a"], None).unwrap();

    let dir = tempfile::tempdir().unwrap();
    program.serialize(dir.path()).unwrap();

    let mut reloaded = Program::deserialize(dir.path()).unwrap();
    assert_eq!(reloaded.rules().len(), program.rules().len());
    for (a, b) in program.rules().iter().zip(reloaded.rules().iter()) {
        assert_eq!(a.to_string(), b.to_string());
    }
    let after = reloaded.eval_symbols(&mode, &["a"], None).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_proppr_serialize_round_trip_keeps_weights() {
    let mut db = Database::new();
    db.add_fact("q", &["a", "b"], 1.0).unwrap();
    db.add_fact("s", &["a", "c"], 1.0).unwrap();
    let rules = Parser::new(Syntax::Proppr)
        .parse_str("p(X,Y) :- q(X,Y) {r1}.\np(X,Y) :- s(X,Y) {r2}.")
        .unwrap();
    let mut program = ProPPRProgram::new(db, rules).unwrap();
    program.set_normalize(Normalization::None);
    program.set_rule_weights(None, 2.0, None).unwrap();

    let mode: Mode = "p/io".parse().unwrap();
    let before = program.eval_symbols(&mode, &["a"], None).unwrap();

    let dir = tempfile::tempdir().unwrap();
    program.serialize(dir.path()).unwrap();

    // reloads as a plain program: the rewritten goals and the initialized
    // weighted parameter are all in the two persisted artifacts
    let mut reloaded = Program::deserialize(dir.path()).unwrap();
    reloaded.set_normalize(Normalization::None);
    assert!(reloaded.db().is_parameter(WEIGHTED, 1));
    let after = reloaded.eval_symbols(&mode, &["a"], None).unwrap();
    assert_eq!(before, after);
}
