//! A small ordered table with a named multi-level index.
//!
//! Recorded variables, reporters, and the varying-parameter table are all
//! [DataFrame]s. The type covers exactly what the result container needs:
//! column selection, index reshaping, row concatenation with column union,
//! keyed concatenation (extra outer index levels), and CSV round-trips.

use std::path::Path;

use crate::error::SimError;
use crate::value::Value;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataFrame {
    index_names: Vec<String>,
    index: Vec<Vec<Value>>,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl DataFrame {
    /// An empty frame: no rows, no columns, no index.
    pub fn new() -> Self {
        Self::default()
    }

    /// A frame with the given columns and index level names, no rows yet.
    pub fn with_columns(
        index_names: impl IntoIterator<Item = impl Into<String>>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            index_names: index_names.into_iter().map(Into::into).collect(),
            index: Vec::new(),
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    pub fn n_cols(&self) -> usize {
        self.columns.len()
    }

    /// True when the frame has neither rows nor columns.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.columns.is_empty()
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn index_names(&self) -> &[String] {
        &self.index_names
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// Append one row. Index and value lengths must match the frame shape.
    pub fn push_row(&mut self, index: Vec<Value>, values: Vec<Value>) {
        debug_assert_eq!(index.len(), self.index_names.len());
        debug_assert_eq!(values.len(), self.columns.len());
        self.index.push(index);
        self.rows.push(values);
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        let col = self.columns.iter().position(|c| c == column)?;
        self.rows.get(row).and_then(|r| r.get(col))
    }

    /// All values of one column, in row order.
    pub fn column(&self, name: &str) -> Option<Vec<Value>> {
        let col = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|r| r[col].clone()).collect())
    }

    /// The index value of `row` at the named level.
    pub fn index_value(&self, row: usize, level: &str) -> Option<&Value> {
        let pos = self.index_names.iter().position(|n| n == level)?;
        self.index.get(row).and_then(|r| r.get(pos))
    }

    /// Keep only the requested columns (missing names are ignored), same index.
    pub fn select_columns(&self, keys: &[String]) -> DataFrame {
        let kept: Vec<usize> = keys
            .iter()
            .filter_map(|k| self.columns.iter().position(|c| c == k))
            .collect();
        DataFrame {
            index_names: self.index_names.clone(),
            index: self.index.clone(),
            columns: kept.iter().map(|&i| self.columns[i].clone()).collect(),
            rows: self
                .rows
                .iter()
                .map(|r| kept.iter().map(|&i| r[i].clone()).collect())
                .collect(),
        }
    }

    /// Move all index levels into leading columns, leaving a bare row order.
    pub fn reset_index(&self) -> DataFrame {
        if self.index_names.is_empty() {
            return self.clone();
        }
        let mut columns = self.index_names.clone();
        columns.extend(self.columns.iter().cloned());
        let rows = self
            .index
            .iter()
            .zip(self.rows.iter())
            .map(|(idx, row)| {
                let mut r = idx.clone();
                r.extend(row.iter().cloned());
                r
            })
            .collect();
        DataFrame {
            index_names: Vec::new(),
            index: self.rows.iter().map(|_| Vec::new()).collect(),
            columns,
            rows,
        }
    }

    /// Move the named columns (in the given order) into the index.
    /// Names that are not columns are skipped.
    pub fn set_index(&self, names: &[String]) -> DataFrame {
        let level_cols: Vec<usize> = names
            .iter()
            .filter_map(|n| self.columns.iter().position(|c| c == n))
            .collect();
        let mut index_names = self.index_names.clone();
        index_names.extend(level_cols.iter().map(|&i| self.columns[i].clone()));
        let kept: Vec<usize> = (0..self.columns.len())
            .filter(|i| !level_cols.contains(i))
            .collect();
        let mut index = Vec::with_capacity(self.rows.len());
        let mut rows = Vec::with_capacity(self.rows.len());
        for (old_idx, row) in self.index.iter().zip(self.rows.iter()) {
            let mut idx = old_idx.clone();
            idx.extend(level_cols.iter().map(|&i| row[i].clone()));
            index.push(idx);
            rows.push(kept.iter().map(|&i| row[i].clone()).collect());
        }
        DataFrame {
            index_names,
            index,
            columns: kept.iter().map(|&i| self.columns[i].clone()).collect(),
            rows,
        }
    }

    /// Insert a constant index level at `pos` for every row.
    pub fn insert_index_level(&mut self, pos: usize, name: impl Into<String>, value: Value) {
        let pos = pos.min(self.index_names.len());
        self.index_names.insert(pos, name.into());
        for idx in &mut self.index {
            idx.insert(pos, value.clone());
        }
    }

    /// Add a column with one value broadcast to every row.
    pub fn add_constant_column(&mut self, name: impl Into<String>, value: Value) {
        self.columns.push(name.into());
        for row in &mut self.rows {
            row.push(value.clone());
        }
    }

    /// Add a column with one value per row.
    pub fn add_column(&mut self, name: impl Into<String>, values: Vec<Value>) {
        debug_assert_eq!(values.len(), self.rows.len());
        self.columns.push(name.into());
        for (row, value) in self.rows.iter_mut().zip(values) {
            row.push(value);
        }
    }

    /// Concatenate frames row-wise. All frames must share index level names;
    /// columns are unioned in order of first appearance and missing cells
    /// filled with [Value::Null].
    pub fn concat_rows(frames: &[&DataFrame]) -> DataFrame {
        let mut out = DataFrame::new();
        for frame in frames {
            if out.index_names.is_empty() && out.rows.is_empty() {
                out.index_names = frame.index_names.clone();
            }
            debug_assert_eq!(out.index_names, frame.index_names);
            for col in &frame.columns {
                if !out.has_column(col) {
                    out.add_constant_column(col.clone(), Value::Null);
                }
            }
            for (idx, row) in frame.index.iter().zip(frame.rows.iter()) {
                let values = out
                    .columns
                    .iter()
                    .map(|c| {
                        frame
                            .columns
                            .iter()
                            .position(|fc| fc == c)
                            .map(|i| row[i].clone())
                            .unwrap_or(Value::Null)
                    })
                    .collect();
                out.index.push(idx.clone());
                out.rows.push(values);
            }
        }
        out
    }

    /// Concatenate frames row-wise, prepending the given index levels with a
    /// per-frame key tuple. Inner index names must agree across frames.
    pub fn concat_with_keys(
        level_names: &[&str],
        parts: &[(Vec<Value>, &DataFrame)],
    ) -> DataFrame {
        let mut out = DataFrame::new();
        let mut initialized = false;
        for (key, frame) in parts {
            debug_assert_eq!(key.len(), level_names.len());
            if !initialized {
                out.index_names = level_names
                    .iter()
                    .map(|s| s.to_string())
                    .chain(frame.index_names.iter().cloned())
                    .collect();
                initialized = true;
            }
            for col in &frame.columns {
                if !out.has_column(col) {
                    out.add_constant_column(col.clone(), Value::Null);
                }
            }
            for (idx, row) in frame.index.iter().zip(frame.rows.iter()) {
                let mut full_idx = key.clone();
                full_idx.extend(idx.iter().cloned());
                let values = out
                    .columns
                    .iter()
                    .map(|c| {
                        frame
                            .columns
                            .iter()
                            .position(|fc| fc == c)
                            .map(|i| row[i].clone())
                            .unwrap_or(Value::Null)
                    })
                    .collect();
                out.index.push(full_idx);
                out.rows.push(values);
            }
        }
        out
    }

    /// Stable sort of rows by the full index tuple.
    pub fn sort_by_index(&mut self) {
        let mut order: Vec<usize> = (0..self.rows.len()).collect();
        order.sort_by(|&a, &b| {
            let (ia, ib) = (&self.index[a], &self.index[b]);
            for (x, y) in ia.iter().zip(ib.iter()) {
                let ord = x.cmp_order(y);
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
        self.index = order.iter().map(|&i| self.index[i].clone()).collect();
        self.rows = order.iter().map(|&i| self.rows[i].clone()).collect();
    }

    /// Position of the first row whose full index equals `key`.
    pub fn find_index_row(&self, key: &[Value]) -> Option<usize> {
        self.index.iter().position(|idx| idx.as_slice() == key)
    }

    // CSV round-trip ------------------------------------------------------- //

    /// Write the frame with index levels as leading columns and a header row.
    pub fn write_csv(&self, path: &Path) -> Result<(), SimError> {
        let mut writer = csv::Writer::from_path(path)?;
        let header: Vec<&str> = self
            .index_names
            .iter()
            .chain(self.columns.iter())
            .map(String::as_str)
            .collect();
        writer.write_record(&header)?;
        for (idx, row) in self.index.iter().zip(self.rows.iter()) {
            let record: Vec<String> = idx
                .iter()
                .chain(row.iter())
                .map(Value::to_csv_cell)
                .collect();
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Read a frame back, restoring any of `index_candidates` found among the
    /// columns as index levels (in candidate order).
    pub fn read_csv(path: &Path, index_candidates: &[&str]) -> Result<DataFrame, SimError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_path(path)?;
        let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
        let mut frame = DataFrame::with_columns(Vec::<String>::new(), headers.clone());
        for record in reader.records() {
            let record = record?;
            let values: Vec<Value> = record.iter().map(Value::from_csv_cell).collect();
            frame.push_row(Vec::new(), values);
        }
        let index: Vec<String> = index_candidates
            .iter()
            .filter(|c| headers.iter().any(|h| h == *c))
            .map(|c| c.to_string())
            .collect();
        if index.is_empty() {
            Ok(frame)
        } else {
            Ok(frame.set_index(&index))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame() -> DataFrame {
        let mut df = DataFrame::with_columns(["obj_id", "t"], ["x", "y"]);
        df.push_row(
            vec![Value::Int(1), Value::Int(0)],
            vec![Value::Float(1.5), Value::Str("a".into())],
        );
        df.push_row(
            vec![Value::Int(1), Value::Int(1)],
            vec![Value::Float(2.5), Value::Str("b".into())],
        );
        df
    }

    #[test]
    fn reset_and_set_index_are_inverse() {
        let df = sample_frame();
        let flat = df.reset_index();
        assert!(flat.index_names().is_empty());
        assert_eq!(flat.columns(), &["obj_id", "t", "x", "y"]);
        let back = flat.set_index(&["obj_id".to_string(), "t".to_string()]);
        assert_eq!(back, df);
    }

    #[test]
    fn concat_rows_unions_columns_with_null_fill() {
        let mut a = DataFrame::with_columns(Vec::<String>::new(), ["x"]);
        a.push_row(vec![], vec![Value::Int(1)]);
        let mut b = DataFrame::with_columns(Vec::<String>::new(), ["y"]);
        b.push_row(vec![], vec![Value::Int(2)]);

        let out = DataFrame::concat_rows(&[&a, &b]);
        assert_eq!(out.columns(), &["x", "y"]);
        assert_eq!(out.get(0, "y"), Some(&Value::Null));
        assert_eq!(out.get(1, "x"), Some(&Value::Null));
        assert_eq!(out.get(1, "y"), Some(&Value::Int(2)));
    }

    #[test]
    fn concat_with_keys_prepends_levels() {
        let df1 = sample_frame();
        let df2 = sample_frame();
        let out = DataFrame::concat_with_keys(
            &["sample_id"],
            &[
                (vec![Value::Int(0)], &df1),
                (vec![Value::Int(1)], &df2),
            ],
        );
        assert_eq!(out.index_names(), &["sample_id", "obj_id", "t"]);
        assert_eq!(out.n_rows(), 4);
        assert_eq!(out.index_value(3, "sample_id"), Some(&Value::Int(1)));
        assert_eq!(out.index_value(3, "t"), Some(&Value::Int(1)));
    }

    #[test]
    fn insert_index_level_before_last() {
        let mut df = DataFrame::with_columns(["t"], ["x"]);
        df.push_row(vec![Value::Int(0)], vec![Value::Int(7)]);
        let pos = df.index_names().len() - 1;
        df.insert_index_level(pos, "obj_id", Value::Int(0));
        assert_eq!(df.index_names(), &["obj_id", "t"]);
        assert_eq!(df.index_value(0, "obj_id"), Some(&Value::Int(0)));
    }

    #[test]
    fn sort_by_index_orders_rows() {
        let mut df = DataFrame::with_columns(["sample_id", "iteration"], ["x"]);
        df.push_row(vec![Value::Int(1), Value::Int(0)], vec![Value::Int(10)]);
        df.push_row(vec![Value::Int(0), Value::Int(1)], vec![Value::Int(1)]);
        df.push_row(vec![Value::Int(0), Value::Int(0)], vec![Value::Int(0)]);
        df.sort_by_index();
        assert_eq!(df.get(0, "x"), Some(&Value::Int(0)));
        assert_eq!(df.get(1, "x"), Some(&Value::Int(1)));
        assert_eq!(df.get(2, "x"), Some(&Value::Int(10)));
    }

    #[test]
    fn csv_round_trip_restores_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.csv");
        let df = sample_frame();
        df.write_csv(&path).unwrap();
        let back = DataFrame::read_csv(&path, &["sample_id", "iteration", "obj_id", "t"]).unwrap();
        assert_eq!(back, df);
    }

    #[test]
    fn csv_round_trip_without_index() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reporters.csv");
        let mut df = DataFrame::with_columns(Vec::<String>::new(), ["score"]);
        df.push_row(vec![], vec![Value::Float(0.5)]);
        df.write_csv(&path).unwrap();
        let back = DataFrame::read_csv(&path, &["sample_id", "iteration", "obj_id", "t"]).unwrap();
        assert_eq!(back, df);
    }
}
