//! Sparse vectors and matrices over symbol domains.
//!
//! Entries are kept in `BTreeMap`s so iteration order, and therefore every
//! derived computation, is deterministic. A value written as `0.0` removes
//! its entry; the stored support is always the nonzero support.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::DbError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    dim: usize,
    entries: BTreeMap<usize, f64>,
}

impl SparseVector {
    pub fn zeros(dim: usize) -> Self {
        SparseVector {
            dim,
            entries: BTreeMap::new(),
        }
    }

    /// A vector with 1.0 everywhere.
    pub fn unit(dim: usize) -> Self {
        SparseVector {
            dim,
            entries: (0..dim).map(|i| (i, 1.0)).collect(),
        }
    }

    pub fn onehot(dim: usize, index: usize) -> Result<Self, DbError> {
        if index >= dim {
            return Err(DbError::IndexOutOfBounds { index, dim });
        }
        let mut v = SparseVector::zeros(dim);
        v.entries.insert(index, 1.0);
        Ok(v)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> f64 {
        self.entries.get(&index).copied().unwrap_or(0.0)
    }

    pub fn set(&mut self, index: usize, value: f64) -> Result<(), DbError> {
        if index >= self.dim {
            return Err(DbError::IndexOutOfBounds {
                index,
                dim: self.dim,
            });
        }
        if value == 0.0 {
            self.entries.remove(&index);
        } else {
            self.entries.insert(index, value);
        }
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.entries.iter().map(|(&i, &v)| (i, v))
    }

    pub fn sum(&self) -> f64 {
        self.entries.values().sum()
    }

    pub fn scale(&self, k: f64) -> Self {
        let mut out = SparseVector::zeros(self.dim);
        for (i, v) in self.iter() {
            let s = v * k;
            if s != 0.0 {
                out.entries.insert(i, s);
            }
        }
        out
    }

    pub fn clip(&self, lo: f64, hi: f64) -> Self {
        let mut out = SparseVector::zeros(self.dim);
        for (i, v) in self.iter() {
            let c = v.clamp(lo, hi);
            if c != 0.0 {
                out.entries.insert(i, c);
            }
        }
        out
    }

    pub fn add(&self, other: &SparseVector) -> Result<SparseVector, DbError> {
        let mut out = self.clone();
        out.add_assign(other)?;
        Ok(out)
    }

    pub fn add_assign(&mut self, other: &SparseVector) -> Result<(), DbError> {
        if self.dim != other.dim {
            return Err(DbError::DimMismatch {
                left: self.dim,
                right: other.dim,
            });
        }
        for (i, v) in other.iter() {
            let total = self.get(i) + v;
            self.set(i, total)?;
        }
        Ok(())
    }

    pub fn hadamard(&self, other: &SparseVector) -> Result<SparseVector, DbError> {
        if self.dim != other.dim {
            return Err(DbError::DimMismatch {
                left: self.dim,
                right: other.dim,
            });
        }
        let mut out = SparseVector::zeros(self.dim);
        for (i, v) in self.iter() {
            let p = v * other.get(i);
            if p != 0.0 {
                out.entries.insert(i, p);
            }
        }
        Ok(out)
    }

    pub fn dot(&self, other: &SparseVector) -> Result<f64, DbError> {
        if self.dim != other.dim {
            return Err(DbError::DimMismatch {
                left: self.dim,
                right: other.dim,
            });
        }
        Ok(self.iter().map(|(i, v)| v * other.get(i)).sum())
    }

    /// Softmax over the stored support. The result is non-negative and sums
    /// to 1 unless the vector is empty.
    pub fn softmax(&self) -> SparseVector {
        if self.entries.is_empty() {
            return self.clone();
        }
        let max = self
            .entries
            .values()
            .fold(f64::NEG_INFINITY, |m, &v| m.max(v));
        let mut out = SparseVector::zeros(self.dim);
        let mut total = 0.0;
        for (i, v) in self.iter() {
            let e = (v - max).exp();
            total += e;
            out.entries.insert(i, e);
        }
        for v in out.entries.values_mut() {
            *v /= total;
        }
        out
    }

    /// Elementwise natural log. Non-positive entries are dropped; positive
    /// entries stay in the support even when the log is 0, so a following
    /// softmax sees them.
    pub fn ln(&self) -> SparseVector {
        let mut out = SparseVector::zeros(self.dim);
        for (i, v) in self.iter() {
            if v > 0.0 {
                out.entries.insert(i, v.ln());
            }
        }
        out
    }

    pub fn to_dense(&self) -> Vec<f64> {
        let mut out = vec![0.0; self.dim];
        for (i, v) in self.iter() {
            out[i] = v;
        }
        out
    }

    pub fn approx_eq(&self, other: &SparseVector, tol: f64) -> bool {
        if self.dim != other.dim {
            return false;
        }
        let keys: std::collections::BTreeSet<usize> = self
            .entries
            .keys()
            .chain(other.entries.keys())
            .copied()
            .collect();
        keys.iter()
            .all(|&i| (self.get(i) - other.get(i)).abs() <= tol)
    }

    /// Grow the dimension; entries are untouched. Shrinking is a no-op.
    pub(crate) fn grow(&mut self, dim: usize) {
        if dim > self.dim {
            self.dim = dim;
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SparseMatrix {
    rows: usize,
    cols: usize,
    data: Vec<BTreeMap<usize, f64>>,
}

impl SparseMatrix {
    pub fn zeros(rows: usize, cols: usize) -> Self {
        SparseMatrix {
            rows,
            cols,
            data: vec![BTreeMap::new(); rows],
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn nnz(&self) -> usize {
        self.data.iter().map(|row| row.len()).sum()
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.data
            .get(row)
            .and_then(|r| r.get(&col))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn set(&mut self, row: usize, col: usize, value: f64) -> Result<(), DbError> {
        if row >= self.rows {
            return Err(DbError::IndexOutOfBounds {
                index: row,
                dim: self.rows,
            });
        }
        if col >= self.cols {
            return Err(DbError::IndexOutOfBounds {
                index: col,
                dim: self.cols,
            });
        }
        if value == 0.0 {
            self.data[row].remove(&col);
        } else {
            self.data[row].insert(col, value);
        }
        Ok(())
    }

    pub fn add_to(&mut self, row: usize, col: usize, delta: f64) -> Result<(), DbError> {
        let total = self.get(row, col) + delta;
        self.set(row, col, total)
    }

    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        self.data
            .iter()
            .enumerate()
            .flat_map(|(r, row)| row.iter().map(move |(&c, &v)| (r, c, v)))
    }

    /// Row-vector times matrix: `v · M`, over the column space.
    pub fn vec_mul(&self, v: &SparseVector) -> Result<SparseVector, DbError> {
        if v.dim() != self.rows {
            return Err(DbError::DimMismatch {
                left: v.dim(),
                right: self.rows,
            });
        }
        let mut out = SparseVector::zeros(self.cols);
        for (i, x) in v.iter() {
            for (&j, &m) in &self.data[i] {
                let total = out.get(j) + x * m;
                out.set(j, total)?;
            }
        }
        Ok(out)
    }

    /// Row-vector times the transpose: `v · Mᵀ`, over the row space.
    pub fn vec_mul_t(&self, v: &SparseVector) -> Result<SparseVector, DbError> {
        if v.dim() != self.cols {
            return Err(DbError::DimMismatch {
                left: v.dim(),
                right: self.cols,
            });
        }
        let mut out = SparseVector::zeros(self.rows);
        for (i, row) in self.data.iter().enumerate() {
            let mut acc = 0.0;
            for (&j, &m) in row {
                acc += m * v.get(j);
            }
            if acc != 0.0 {
                out.set(i, acc)?;
            }
        }
        Ok(out)
    }

    pub fn row_sums(&self) -> SparseVector {
        let mut out = SparseVector::zeros(self.rows);
        for (i, row) in self.data.iter().enumerate() {
            let total: f64 = row.values().sum();
            if total != 0.0 {
                out.entries.insert(i, total);
            }
        }
        out
    }

    pub fn col_sums(&self) -> SparseVector {
        let mut out = SparseVector::zeros(self.cols);
        for row in &self.data {
            for (&j, &v) in row {
                let total = out.get(j) + v;
                if total == 0.0 {
                    out.entries.remove(&j);
                } else {
                    out.entries.insert(j, total);
                }
            }
        }
        out
    }

    pub fn transpose(&self) -> SparseMatrix {
        let mut out = SparseMatrix::zeros(self.cols, self.rows);
        for (r, c, v) in self.iter() {
            out.data[c].insert(r, v);
        }
        out
    }

    pub fn scale(&self, k: f64) -> SparseMatrix {
        let mut out = SparseMatrix::zeros(self.rows, self.cols);
        for (r, c, v) in self.iter() {
            if v * k != 0.0 {
                out.data[r].insert(c, v * k);
            }
        }
        out
    }

    pub fn add(&self, other: &SparseMatrix) -> Result<SparseMatrix, DbError> {
        if self.rows != other.rows {
            return Err(DbError::DimMismatch {
                left: self.rows,
                right: other.rows,
            });
        }
        if self.cols != other.cols {
            return Err(DbError::DimMismatch {
                left: self.cols,
                right: other.cols,
            });
        }
        let mut out = self.clone();
        for (r, c, v) in other.iter() {
            out.add_to(r, c, v)?;
        }
        Ok(out)
    }

    /// Accumulate `k · (row ⊗ col)`, the outer-product update used for
    /// matrix-parameter gradients.
    pub fn outer_add(
        &mut self,
        row: &SparseVector,
        col: &SparseVector,
        k: f64,
    ) -> Result<(), DbError> {
        if row.dim() != self.rows {
            return Err(DbError::DimMismatch {
                left: row.dim(),
                right: self.rows,
            });
        }
        if col.dim() != self.cols {
            return Err(DbError::DimMismatch {
                left: col.dim(),
                right: self.cols,
            });
        }
        for (r, rv) in row.iter() {
            for (c, cv) in col.iter() {
                self.add_to(r, c, k * rv * cv)?;
            }
        }
        Ok(())
    }

    /// Grow both dimensions; shrinking is a no-op.
    pub(crate) fn grow(&mut self, rows: usize, cols: usize) {
        if rows > self.rows {
            self.data.resize(rows, BTreeMap::new());
            self.rows = rows;
        }
        if cols > self.cols {
            self.cols = cols;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_onehot_and_get() {
        let v = SparseVector::onehot(4, 2).unwrap();
        assert_eq!(v.get(2), 1.0);
        assert_eq!(v.get(0), 0.0);
        assert_eq!(v.nnz(), 1);
        assert!(SparseVector::onehot(4, 4).is_err());
    }

    #[test]
    fn test_set_zero_removes_entry() {
        let mut v = SparseVector::zeros(3);
        v.set(1, 2.0).unwrap();
        assert_eq!(v.nnz(), 1);
        v.set(1, 0.0).unwrap();
        assert_eq!(v.nnz(), 0);
    }

    #[test]
    fn test_add_and_dim_mismatch() {
        let a = SparseVector::onehot(3, 0).unwrap();
        let b = SparseVector::onehot(3, 1).unwrap();
        let sum = a.add(&b).unwrap();
        assert_eq!(sum.to_dense(), vec![1.0, 1.0, 0.0]);
        assert!(a.add(&SparseVector::zeros(4)).is_err());
    }

    #[test]
    fn test_clip_drops_negatives_to_zero() {
        let mut v = SparseVector::zeros(3);
        v.set(0, -1.0).unwrap();
        v.set(1, 2.0).unwrap();
        let c = v.clip(0.0, 1.0);
        assert_eq!(c.get(0), 0.0);
        assert_eq!(c.get(1), 1.0);
        assert_eq!(c.nnz(), 1);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let mut v = SparseVector::zeros(5);
        v.set(0, 1.0).unwrap();
        v.set(3, 2.0).unwrap();
        let s = v.softmax();
        assert!((s.sum() - 1.0).abs() < 1e-12);
        assert!(s.iter().all(|(_, x)| x > 0.0));
        assert!(s.get(3) > s.get(0));
    }

    #[test]
    fn test_vec_mul_and_transpose() {
        let mut m = SparseMatrix::zeros(3, 3);
        m.set(0, 1, 1.0).unwrap();
        m.set(1, 2, 0.5).unwrap();
        let x = SparseVector::onehot(3, 0).unwrap();
        let y = m.vec_mul(&x).unwrap();
        assert_eq!(y.to_dense(), vec![0.0, 1.0, 0.0]);

        let back = m.vec_mul_t(&y).unwrap();
        assert_eq!(back.to_dense(), vec![1.0, 0.0, 0.0]);
        assert_eq!(m.transpose().get(1, 0), 1.0);
    }

    #[test]
    fn test_row_and_col_sums() {
        let mut m = SparseMatrix::zeros(2, 3);
        m.set(0, 0, 1.0).unwrap();
        m.set(0, 2, 2.0).unwrap();
        m.set(1, 2, 3.0).unwrap();
        assert_eq!(m.row_sums().to_dense(), vec![3.0, 3.0]);
        assert_eq!(m.col_sums().to_dense(), vec![1.0, 0.0, 5.0]);
    }

    #[test]
    fn test_outer_add() {
        let mut m = SparseMatrix::zeros(2, 2);
        let r = SparseVector::onehot(2, 0).unwrap();
        let c = SparseVector::onehot(2, 1).unwrap();
        m.outer_add(&r, &c, 2.0).unwrap();
        assert_eq!(m.get(0, 1), 2.0);
        assert_eq!(m.nnz(), 1);
    }

    #[test]
    fn test_ln_drops_nonpositive() {
        let mut v = SparseVector::zeros(3);
        v.set(0, 1.0).unwrap();
        v.set(1, std::f64::consts::E).unwrap();
        let l = v.ln();
        assert_eq!(l.get(0), 0.0);
        assert!((l.get(1) - 1.0).abs() < 1e-12);
    }
}
