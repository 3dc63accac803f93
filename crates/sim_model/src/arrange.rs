//! Reshaping a result container into one flat table.
//!
//! [DataDict::arrange] selects and joins the `variables`, `reporters` and
//! `parameters` sections into a single [DataFrame]: variables and reporters
//! concatenate along rows after aligning index levels, parameters broadcast
//! along columns by sample id.

use crate::datadict::DataDict;
use crate::frame::DataFrame;
use crate::value::Value;

/// What to include from a section: everything, nothing, or named keys.
#[derive(Clone, Debug, PartialEq)]
pub enum Selection {
    All,
    None,
    Keys(Vec<String>),
}

impl From<bool> for Selection {
    fn from(v: bool) -> Self {
        if v {
            Selection::All
        } else {
            Selection::None
        }
    }
}

impl From<&str> for Selection {
    fn from(key: &str) -> Self {
        Selection::Keys(vec![key.to_string()])
    }
}

impl From<Vec<&str>> for Selection {
    fn from(keys: Vec<&str>) -> Self {
        Selection::Keys(keys.into_iter().map(str::to_string).collect())
    }
}

impl From<Vec<String>> for Selection {
    fn from(keys: Vec<String>) -> Self {
        Selection::Keys(keys)
    }
}

/// Arguments for [DataDict::arrange], with the same defaults as the
/// underlying operation: nothing selected, index flattened.
#[derive(Clone, Debug)]
pub struct Arrange {
    pub variables: Selection,
    pub reporters: Selection,
    pub parameters: Selection,
    pub constants: bool,
    pub obj_types: Selection,
    pub index: bool,
}

impl Default for Arrange {
    fn default() -> Self {
        Self {
            variables: Selection::None,
            reporters: Selection::None,
            parameters: Selection::None,
            constants: false,
            obj_types: Selection::All,
            index: false,
        }
    }
}

impl Arrange {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn variables(mut self, sel: impl Into<Selection>) -> Self {
        self.variables = sel.into();
        self
    }

    pub fn reporters(mut self, sel: impl Into<Selection>) -> Self {
        self.reporters = sel.into();
        self
    }

    pub fn parameters(mut self, sel: impl Into<Selection>) -> Self {
        self.parameters = sel.into();
        self
    }

    pub fn constants(mut self, include: bool) -> Self {
        self.constants = include;
        self
    }

    pub fn obj_types(mut self, sel: impl Into<Selection>) -> Self {
        self.obj_types = sel.into();
        self
    }

    pub fn index(mut self, keep: bool) -> Self {
        self.index = keep;
        self
    }
}

impl DataDict {
    /// Combine and/or filter sections into one flat table.
    ///
    /// Returns an empty frame (no rows, no columns) when nothing was
    /// requested or every selection resolved to nothing.
    pub fn arrange(&self, plan: &Arrange) -> DataFrame {
        let dfv = match &plan.variables {
            Selection::None => None,
            sel => self.combine_vars(&plan.obj_types, sel),
        };

        let dfm = match &plan.reporters {
            Selection::None => None,
            Selection::All => self.frame("reporters").cloned(),
            Selection::Keys(keys) => self.frame("reporters").map(|f| f.select_columns(keys)),
        };

        let dfp = match &plan.parameters {
            Selection::None => None,
            Selection::All => self.combine_pars(plan.constants),
            Selection::Keys(keys) => self
                .combine_pars(true)
                .map(|f| f.select_columns(keys))
                .filter(|f| f.n_cols() > 0),
        };

        let mut df = match (dfv, dfm) {
            (Some(v), Some(m)) => {
                // Align on the variables index: reset both, stack rows, then
                // restore the index so reporter rows share the same levels.
                let index_keys = v.index_names().to_vec();
                let stacked = DataFrame::concat_rows(&[&m.reset_index(), &v.reset_index()]);
                Some(stacked.set_index(&index_keys))
            }
            (Some(v), None) => Some(v),
            (None, Some(m)) => Some(m),
            (None, None) => None,
        };

        if let Some(p) = dfp {
            df = Some(match df {
                None => p,
                Some(base) => join_params(&base, &p),
            });
        }

        let Some(df) = df else {
            return DataFrame::new();
        };
        if plan.index {
            df
        } else {
            df.reset_index()
        }
    }

    /// `arrange` with all reporters and all parameters including constants.
    pub fn arrange_reporters(&self) -> DataFrame {
        self.arrange(&Arrange::new().reporters(true).parameters(true).constants(true))
    }

    /// `arrange` with all variables and all parameters including constants.
    pub fn arrange_variables(&self) -> DataFrame {
        self.arrange(&Arrange::new().variables(true).parameters(true).constants(true))
    }

    /// Combine the per-object-type variable tables into one frame.
    ///
    /// With exactly one object type the table is returned unchanged. With
    /// several, an `obj_type` outer index level is added; the model's own
    /// table additionally gains an `obj_id = 0` level so model-level rows sit
    /// alongside per-agent rows.
    pub(crate) fn combine_vars(
        &self,
        obj_types: &Selection,
        var_keys: &Selection,
    ) -> Option<DataFrame> {
        let vs = self.dict("variables")?;
        if vs.len() == 1 {
            return vs.iter().next().and_then(|(_, e)| e.as_frame()).cloned();
        }

        let mut parts: Vec<(String, DataFrame)> = vs
            .iter()
            .filter_map(|(k, e)| e.as_frame().map(|f| (k.to_string(), f.clone())))
            .collect();

        if let Selection::Keys(keys) = var_keys {
            parts.retain(|(_, f)| keys.iter().any(|k| f.has_column(k)));
        }
        match obj_types {
            Selection::All => {}
            Selection::None => return None,
            Selection::Keys(types) => parts.retain(|(k, _)| types.contains(k)),
        }

        if let Some(model_type) = self.info_value("model_type").and_then(Value::as_str) {
            if let Some((_, frame)) = parts.iter_mut().find(|(k, _)| k == model_type) {
                if !frame.index_names().iter().any(|n| n == "obj_id") {
                    let pos = frame.index_names().len().saturating_sub(1);
                    frame.insert_index_level(pos, "obj_id", Value::Int(0));
                }
            }
        }

        if parts.is_empty() {
            return None;
        }

        let keyed: Vec<(Vec<Value>, &DataFrame)> = parts
            .iter()
            .map(|(k, f)| (vec![Value::Str(k.clone())], f))
            .collect();
        let df = DataFrame::concat_with_keys(&["obj_type"], &keyed);
        match var_keys {
            Selection::Keys(keys) => Some(df.select_columns(keys)),
            _ => Some(df),
        }
    }

    /// Build the combined parameter table: the varying sample table plus,
    /// when requested, constants broadcast as extra columns. The `seed`
    /// provenance column is never included.
    pub(crate) fn combine_pars(&self, constants: bool) -> Option<DataFrame> {
        let pars = self.dict("parameters")?;
        let mut dfp = match pars.frame("sample") {
            Some(sample) => {
                let mut df = sample.clone();
                if constants {
                    if let Some(consts) = pars.map("constants") {
                        for (k, v) in consts.iter() {
                            df.add_constant_column(k, v.clone());
                        }
                    }
                }
                df
            }
            None => {
                if !constants {
                    return None;
                }
                let consts = pars.map("constants")?;
                let n = self
                    .info_value("sample_size")
                    .and_then(Value::as_usize)
                    .unwrap_or(1);
                let mut df = DataFrame::with_columns(["sample_id"], consts.keys());
                for i in 0..n {
                    df.push_row(
                        vec![Value::Int(i as i64)],
                        consts.iter().map(|(_, v)| v.clone()).collect(),
                    );
                }
                df
            }
        };

        if dfp.has_column("seed") {
            let keep: Vec<String> = dfp
                .columns()
                .iter()
                .filter(|c| c.as_str() != "seed")
                .cloned()
                .collect();
            dfp = dfp.select_columns(&keep);
        }
        if dfp.n_cols() == 0 {
            None
        } else {
            Some(dfp)
        }
    }
}

/// Broadcast parameter columns onto `base` rows by the `sample_id` index
/// level. Rows of a single-run frame (no `sample_id` level) all map to
/// sample 0.
fn join_params(base: &DataFrame, params: &DataFrame) -> DataFrame {
    let mut out = base.clone();
    for col in params.columns().to_vec() {
        let values: Vec<Value> = (0..base.n_rows())
            .map(|row| {
                let sid = base
                    .index_value(row, "sample_id")
                    .cloned()
                    .unwrap_or(Value::Int(0));
                params
                    .find_index_row(&[sid])
                    .and_then(|pr| params.get(pr, &col))
                    .cloned()
                    .unwrap_or(Value::Null)
            })
            .collect();
        out.add_column(col, values);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datadict::Entry;
    use crate::value::AttrMap;

    /// Container shaped like a two-sample experiment result: two agent types
    /// plus the model's own variables, reporters, and parameters.
    fn experiment_results() -> DataDict {
        let mut agents = DataFrame::with_columns(["sample_id", "obj_id", "t"], ["x"]);
        for sid in 0..2i64 {
            for obj in 0..2i64 {
                agents.push_row(
                    vec![Value::Int(sid), Value::Int(obj), Value::Int(1)],
                    vec![Value::Float(obj as f64 + sid as f64)],
                );
            }
        }

        let mut envs = DataFrame::with_columns(["sample_id", "obj_id", "t"], ["z"]);
        for sid in 0..2i64 {
            envs.push_row(
                vec![Value::Int(sid), Value::Int(9), Value::Int(1)],
                vec![Value::Str("env".into())],
            );
        }

        let mut model = DataFrame::with_columns(["sample_id", "t"], ["x"]);
        for sid in 0..2i64 {
            model.push_row(
                vec![Value::Int(sid), Value::Int(1)],
                vec![Value::Float(0.5)],
            );
        }

        let mut variables = DataDict::new();
        variables.set("AgentType", agents);
        variables.set("EnvType", envs);
        variables.set("MyModel", model);

        let mut reporters = DataFrame::with_columns(["sample_id"], ["m_key"]);
        reporters.push_row(vec![Value::Int(0)], vec![Value::Int(10)]);
        reporters.push_row(vec![Value::Int(1)], vec![Value::Int(20)]);

        let mut sample = DataFrame::with_columns(["sample_id"], ["px", "seed"]);
        sample.push_row(vec![Value::Int(0)], vec![Value::Int(1), Value::Int(41)]);
        sample.push_row(vec![Value::Int(1)], vec![Value::Int(2), Value::Int(42)]);
        let mut parameters = DataDict::new();
        parameters.set("constants", Entry::Map(AttrMap::from([("steps", 1)])));
        parameters.set("sample", sample);

        let mut dd = DataDict::new();
        dd.set(
            "info",
            Entry::Map(AttrMap::from([
                ("model_type", Value::Str("MyModel".into())),
                ("sample_size", Value::Int(2)),
            ])),
        );
        dd.set("parameters", parameters);
        dd.set("variables", variables);
        dd.set("reporters", reporters);
        dd
    }

    #[test]
    fn arrange_nothing_returns_empty_frame() {
        let dd = experiment_results();
        let df = dd.arrange(&Arrange::new());
        assert!(df.is_empty());
        assert_eq!(df.n_rows(), 0);
    }

    #[test]
    fn single_object_type_table_is_returned_unchanged() {
        let mut frame = DataFrame::with_columns(["t"], ["x"]);
        frame.push_row(vec![Value::Int(0)], vec![Value::Int(1)]);
        let mut variables = DataDict::new();
        variables.set("OnlyType", frame.clone());
        let mut dd = DataDict::new();
        dd.set("variables", variables);

        let combined = dd.combine_vars(&Selection::All, &Selection::All).unwrap();
        assert_eq!(combined, frame);
    }

    #[test]
    fn multiple_object_types_gain_obj_type_level() {
        let dd = experiment_results();
        let df = dd.arrange(&Arrange::new().variables(true).index(true));
        assert_eq!(
            df.index_names(),
            &["obj_type", "sample_id", "obj_id", "t"]
        );
        // 4 agent rows + 2 env rows + 2 model rows.
        assert_eq!(df.n_rows(), 8);
    }

    #[test]
    fn model_rows_get_explicit_obj_id_zero() {
        let dd = experiment_results();
        let df = dd.arrange(&Arrange::new().variables(true).index(true));
        let model_row = (0..df.n_rows())
            .find(|&r| {
                df.index_value(r, "obj_type") == Some(&Value::Str("MyModel".into()))
            })
            .unwrap();
        assert_eq!(df.index_value(model_row, "obj_id"), Some(&Value::Int(0)));
    }

    #[test]
    fn variable_key_selection_filters_tables_and_columns() {
        let dd = experiment_results();
        let df = dd.arrange(&Arrange::new().variables("z"));
        // Only EnvType records z: two rows, one value column.
        assert_eq!(df.column("z").unwrap().len(), 2);
        assert!(!df.has_column("x"));
    }

    #[test]
    fn obj_type_filter_drops_other_types() {
        let dd = experiment_results();
        let df = dd.arrange(
            &Arrange::new()
                .variables(true)
                .obj_types(vec!["AgentType"])
                .index(true),
        );
        assert_eq!(df.n_rows(), 4);
    }

    #[test]
    fn parameters_broadcast_by_sample_id() {
        let dd = experiment_results();
        let df = dd.arrange(&Arrange::new().variables(true).parameters(true).index(true));
        assert!(df.has_column("px"));
        for row in 0..df.n_rows() {
            let sid = df.index_value(row, "sample_id").unwrap().as_i64().unwrap();
            assert_eq!(df.get(row, "px"), Some(&Value::Int(sid + 1)));
        }
        // seed is provenance, never a parameter column.
        assert!(!df.has_column("seed"));
        // constants not included unless asked for.
        assert!(!df.has_column("steps"));
    }

    #[test]
    fn constants_included_when_requested() {
        let dd = experiment_results();
        let df = dd.arrange(
            &Arrange::new()
                .variables(true)
                .parameters(true)
                .constants(true),
        );
        assert!(df.has_column("steps"));
        assert_eq!(df.get(0, "steps"), Some(&Value::Int(1)));
    }

    #[test]
    fn explicit_parameter_keys_select_columns_only() {
        let dd = experiment_results();
        let df = dd.arrange(&Arrange::new().reporters(true).parameters("px"));
        assert!(df.has_column("px"));
        assert!(!df.has_column("steps"));
        assert_eq!(df.n_rows(), 2);
    }

    #[test]
    fn reporters_and_variables_share_index_levels() {
        let dd = experiment_results();
        let df = dd.arrange(
            &Arrange::new()
                .variables(true)
                .reporters(true)
                .index(true),
        );
        // Reporter rows come first and carry Null at variable-only levels.
        assert_eq!(df.get(0, "m_key"), Some(&Value::Int(10)));
        assert_eq!(df.index_value(0, "obj_type"), Some(&Value::Null));
        assert_eq!(df.n_rows(), 10);
    }

    #[test]
    fn arrange_variables_matches_explicit_call() {
        let dd = experiment_results();
        let explicit = dd.arrange(
            &Arrange::new()
                .variables(true)
                .parameters(true)
                .constants(true),
        );
        assert_eq!(explicit, dd.arrange_variables());
    }

    #[test]
    fn arrange_reporters_matches_explicit_call() {
        let dd = experiment_results();
        let explicit = dd.arrange(
            &Arrange::new()
                .reporters(true)
                .parameters(true)
                .constants(true),
        );
        assert_eq!(explicit, dd.arrange_reporters());
    }
}
