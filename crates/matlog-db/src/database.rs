//! The sparse relational database: facts, parameters, and encodings.
//!
//! Relations of arity 1 are stored as vectors, arity 2 as matrices, both
//! indexed by interned symbol ids. Parameters are ordinary relations with a
//! `declared` marker; the marker and the value have independent lifecycles
//! (declared → initialized → retrained → serialized).

use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::Path;

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use tracing::debug;

use matlog_ir::Mode;

use crate::error::DbError;
use crate::schema::Schema;
use crate::sparse::{SparseMatrix, SparseVector};

/// A stored relation: unary relations are vectors, binary are matrices.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Relation {
    Vector(SparseVector),
    Matrix(SparseMatrix),
}

impl Relation {
    pub fn nnz(&self) -> usize {
        match self {
            Relation::Vector(v) => v.nnz(),
            Relation::Matrix(m) => m.nnz(),
        }
    }

    pub fn as_vector(&self) -> Option<&SparseVector> {
        match self {
            Relation::Vector(v) => Some(v),
            Relation::Matrix(_) => None,
        }
    }

    pub fn as_matrix(&self) -> Option<&SparseMatrix> {
        match self {
            Relation::Matrix(m) => Some(m),
            Relation::Vector(_) => None,
        }
    }
}

fn rel_key(functor: &str, arity: usize) -> String {
    format!("{}/{}", functor, arity)
}

fn parse_key(key: &str) -> (String, usize) {
    match key.rsplit_once('/') {
        Some((functor, arity)) => (functor.to_string(), arity.parse().unwrap_or(0)),
        None => (key.to_string(), 0),
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Database {
    schema: Schema,
    relations: IndexMap<String, Relation>,
    params: IndexSet<String>,
}

impl Database {
    /// An empty typeless database.
    pub fn new() -> Self {
        Database {
            schema: Schema::typeless(),
            relations: IndexMap::new(),
            params: IndexSet::new(),
        }
    }

    /// An empty database with declared types.
    pub fn typed() -> Self {
        Database {
            schema: Schema::typed(),
            relations: IndexMap::new(),
            params: IndexSet::new(),
        }
    }

    pub fn is_typeless(&self) -> bool {
        self.schema.is_typeless()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Declare argument types for a relation. Typed databases require a
    /// declaration before facts can be added; re-declaring overwrites.
    pub fn declare_relation_types(
        &mut self,
        functor: &str,
        arity: usize,
        arg_types: Vec<String>,
    ) -> Result<(), DbError> {
        self.schema.declare_relation_types(functor, arity, arg_types)
    }

    /// The type of one argument position: the declared type, or the
    /// universal type on a typeless database.
    pub fn arg_type(&self, functor: &str, arity: usize, pos: usize) -> Option<String> {
        self.schema.arg_type(functor, arity, pos)
    }

    /// Intern a symbol outside of fact loading (e.g. a rule-id constant).
    pub fn insert_symbol(&mut self, type_name: Option<&str>, symbol: &str) -> Result<usize, DbError> {
        let id = self.schema.insert_symbol(type_name, symbol)?;
        self.sync_dims();
        Ok(id)
    }

    /// Add one fact, interning its argument symbols.
    pub fn add_fact(&mut self, functor: &str, args: &[&str], weight: f64) -> Result<(), DbError> {
        match args.len() {
            1 => {
                let t = self.fact_type(functor, 1, 0)?;
                let id = self.schema.insert_symbol(t.as_deref(), args[0])?;
                self.sync_dims();
                let dim = self.schema.num_symbols(t.as_deref())?;
                let entry = self
                    .relations
                    .entry(rel_key(functor, 1))
                    .or_insert_with(|| Relation::Vector(SparseVector::zeros(dim)));
                match entry {
                    Relation::Vector(v) => {
                        v.set(id, weight)?;
                        Ok(())
                    }
                    Relation::Matrix(_) => Err(DbError::UnsupportedArity {
                        functor: functor.to_string(),
                        arity: 1,
                    }),
                }
            }
            2 => {
                let t0 = self.fact_type(functor, 2, 0)?;
                let t1 = self.fact_type(functor, 2, 1)?;
                let r = self.schema.insert_symbol(t0.as_deref(), args[0])?;
                let c = self.schema.insert_symbol(t1.as_deref(), args[1])?;
                self.sync_dims();
                let rows = self.schema.num_symbols(t0.as_deref())?;
                let cols = self.schema.num_symbols(t1.as_deref())?;
                let entry = self
                    .relations
                    .entry(rel_key(functor, 2))
                    .or_insert_with(|| Relation::Matrix(SparseMatrix::zeros(rows, cols)));
                match entry {
                    Relation::Matrix(m) => {
                        m.set(r, c, weight)?;
                        Ok(())
                    }
                    Relation::Vector(_) => Err(DbError::UnsupportedArity {
                        functor: functor.to_string(),
                        arity: 2,
                    }),
                }
            }
            n => Err(DbError::UnsupportedArity {
                functor: functor.to_string(),
                arity: n,
            }),
        }
    }

    /// Load tab- (or whitespace-) separated facts, one per line:
    /// `functor  arg…  [weight]`. Lines starting with `#` are skipped; a
    /// trailing numeric field on a line with three or more fields is read as
    /// the fact weight.
    pub fn load_fact_file(&mut self, path: impl AsRef<Path>) -> Result<(), DbError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| DbError::Io {
            path: path.display().to_string(),
            source,
        })?;
        for (i, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = if line.contains('\t') {
                line.split('\t').map(|p| p.trim()).collect()
            } else {
                line.split_whitespace().collect()
            };
            if parts.len() < 2 {
                return Err(DbError::BadFactLine {
                    path: path.display().to_string(),
                    line: i + 1,
                    reason: "expected 'functor<TAB>arg...'".into(),
                });
            }
            let (args, weight) = match parts.last().unwrap().parse::<f64>() {
                Ok(w) if parts.len() >= 3 => (&parts[1..parts.len() - 1], w),
                _ => (&parts[1..], 1.0),
            };
            self.add_fact(parts[0], args, weight)?;
        }
        Ok(())
    }

    pub fn has_relation(&self, functor: &str, arity: usize) -> bool {
        self.relations.contains_key(&rel_key(functor, arity))
    }

    pub fn relation(&self, functor: &str, arity: usize) -> Option<&Relation> {
        self.relations.get(&rel_key(functor, arity))
    }

    /// The binary relation for a functor, for vector-matrix products.
    pub fn matrix(&self, functor: &str) -> Result<&SparseMatrix, DbError> {
        match self.relations.get(&rel_key(functor, 2)) {
            Some(Relation::Matrix(m)) => Ok(m),
            _ => Err(DbError::NoSuchRelation {
                functor: functor.to_string(),
                arity: 2,
            }),
        }
    }

    /// The unary relation named by a mode, as an indicator-style vector.
    pub fn vector(&self, mode: &Mode) -> Result<SparseVector, DbError> {
        match self.relations.get(&rel_key(mode.functor(), 1)) {
            Some(Relation::Vector(v)) => Ok(v.clone()),
            _ => Err(DbError::NoSuchRelation {
                functor: mode.functor().to_string(),
                arity: 1,
            }),
        }
    }

    /// The preimage of a binary relation toward the mode's input side:
    /// row sums for `p/io`, column sums for `p/oi`.
    pub fn matrix_preimage(&self, mode: &Mode) -> Result<SparseVector, DbError> {
        let m = self.matrix(mode.functor())?;
        if mode.is_input(0) {
            Ok(m.row_sums())
        } else {
            Ok(m.col_sums())
        }
    }

    /// One-hot encode a symbol. On a typed database the type name may be
    /// omitted, in which case every type table is searched.
    pub fn onehot(&self, symbol: &str, type_name: Option<&str>) -> Result<SparseVector, DbError> {
        if type_name.is_none() && !self.is_typeless() {
            let (t, id) = self
                .schema
                .find_symbol(symbol)
                .ok_or_else(|| DbError::UnknownSymbol {
                    symbol: symbol.to_string(),
                    type_name: "?".into(),
                })?;
            let dim = self.schema.num_symbols(Some(t))?;
            return SparseVector::onehot(dim, id);
        }
        let id = self.schema.symbol_id(type_name, symbol)?;
        let dim = self.schema.num_symbols(type_name)?;
        SparseVector::onehot(dim, id)
    }

    /// Decode the symbol behind an id, for reporting results.
    pub fn symbol(&self, type_name: Option<&str>, id: usize) -> Result<&str, DbError> {
        self.schema.symbol(type_name, id)
    }

    pub fn num_symbols(&self, type_name: Option<&str>) -> Result<usize, DbError> {
        self.schema.num_symbols(type_name)
    }

    pub fn ones(&self, type_name: Option<&str>) -> Result<SparseVector, DbError> {
        Ok(SparseVector::unit(self.schema.num_symbols(type_name)?))
    }

    pub fn zeros(&self, type_name: Option<&str>) -> Result<SparseVector, DbError> {
        Ok(SparseVector::zeros(self.schema.num_symbols(type_name)?))
    }

    pub fn mark_as_parameter(&mut self, name: &str, arity: usize) {
        self.params.insert(rel_key(name, arity));
    }

    pub fn is_parameter(&self, name: &str, arity: usize) -> bool {
        self.params.contains(&rel_key(name, arity))
    }

    /// Store a parameter value. Marking and setting are independent, in
    /// either order.
    pub fn set_parameter(&mut self, name: &str, arity: usize, value: Relation) -> Result<(), DbError> {
        let ok = matches!(
            (&value, arity),
            (Relation::Vector(_), 1) | (Relation::Matrix(_), 2)
        );
        if !ok {
            return Err(DbError::UnsupportedArity {
                functor: name.to_string(),
                arity,
            });
        }
        self.relations.insert(rel_key(name, arity), value);
        Ok(())
    }

    pub fn set_parameter_vector(&mut self, name: &str, value: SparseVector) -> Result<(), DbError> {
        self.set_parameter(name, 1, Relation::Vector(value))
    }

    pub fn get_parameter(&self, name: &str, arity: usize) -> Result<&Relation, DbError> {
        self.relations
            .get(&rel_key(name, arity))
            .ok_or_else(|| DbError::NoSuchRelation {
                functor: name.to_string(),
                arity,
            })
    }

    pub fn parameter_is_initialized(&self, name: &str, arity: usize) -> bool {
        let key = rel_key(name, arity);
        self.params.contains(&key) && self.relations.contains_key(&key)
    }

    /// Declared parameters in declaration order.
    pub fn param_list(&self) -> Vec<(String, usize)> {
        self.params.iter().map(|k| parse_key(k)).collect()
    }

    /// Total nonzeros across initialized parameters.
    pub fn parameter_size(&self) -> usize {
        self.params
            .iter()
            .filter_map(|k| self.relations.get(k))
            .map(|r| r.nnz())
            .sum()
    }

    /// Debug-level report of relation shapes against the schema.
    pub fn check_typing(&self) {
        for (key, rel) in &self.relations {
            match rel {
                Relation::Vector(v) => debug!(relation = %key, dim = v.dim(), nnz = v.nnz()),
                Relation::Matrix(m) => {
                    debug!(relation = %key, rows = m.rows(), cols = m.cols(), nnz = m.nnz())
                }
            }
        }
    }

    pub fn serialize(&self, path: &Path) -> Result<(), DbError> {
        let file = File::create(path).map_err(|source| DbError::Io {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::to_writer(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn deserialize(path: &Path) -> Result<Database, DbError> {
        let file = File::open(path).map_err(|source| DbError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    /// The argument type used when interning fact symbols; typed databases
    /// must have a declaration.
    fn fact_type(&self, functor: &str, arity: usize, pos: usize) -> Result<Option<String>, DbError> {
        if self.is_typeless() {
            return Ok(None);
        }
        match self.schema.arg_type(functor, arity, pos) {
            Some(t) => Ok(Some(t)),
            None => Err(DbError::UndeclaredTypes {
                functor: functor.to_string(),
                arity,
            }),
        }
    }

    /// Grow every relation to the current symbol counts. Symbol tables only
    /// grow, so this keeps all stored dimensions current after interning.
    fn sync_dims(&mut self) {
        let keys: Vec<String> = self.relations.keys().cloned().collect();
        for key in keys {
            let (functor, arity) = parse_key(&key);
            match arity {
                1 => {
                    if let Some(t) = self.schema.arg_type(&functor, 1, 0) {
                        if let Ok(dim) = self.schema.num_symbols(Some(&t)) {
                            if let Some(Relation::Vector(v)) = self.relations.get_mut(&key) {
                                v.grow(dim);
                            }
                        }
                    }
                }
                2 => {
                    let rows = self
                        .schema
                        .arg_type(&functor, 2, 0)
                        .and_then(|t| self.schema.num_symbols(Some(&t)).ok());
                    let cols = self
                        .schema
                        .arg_type(&functor, 2, 1)
                        .and_then(|t| self.schema.num_symbols(Some(&t)).ok());
                    if let (Some(rows), Some(cols)) = (rows, cols) {
                        if let Some(Relation::Matrix(m)) = self.relations.get_mut(&key) {
                            m.grow(rows, cols);
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

impl Default for Database {
    fn default() -> Self {
        Database::new()
    }
}
