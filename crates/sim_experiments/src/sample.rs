//! Parameter space definition and sample generation.
//!
//! A [ParameterSpace] maps parameter names to [ParameterSpec]s; a [Sample]
//! expands it into concrete parameter combinations, either as the full
//! cartesian product or by zipping the expanded value lists index-wise.

use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use sim_model::model::assign_seed;
use sim_model::{AttrMap, ParameterCombination, SimError, Value};

/// How one parameter varies across a sample.
#[derive(Clone, Debug, PartialEq)]
pub enum ParameterSpec {
    /// The same value in every combination.
    Constant(Value),
    /// A continuous range, discretized into `n` evenly spaced floats.
    Range { vmin: f64, vmax: f64, vdef: f64 },
    /// An integer range, discretized into `n` integers over `[vmin, vmax]`.
    /// Discretization can repeat boundary values when `n` exceeds the range.
    IntRange { vmin: i64, vmax: i64, vdef: i64 },
    /// An explicit list of values, used as-is.
    Values(Vec<Value>),
}

impl ParameterSpec {
    pub fn constant(value: impl Into<Value>) -> Self {
        ParameterSpec::Constant(value.into())
    }

    /// A float range with `vmin` as its default value.
    pub fn range(vmin: f64, vmax: f64) -> Self {
        debug_assert!(vmin <= vmax);
        ParameterSpec::Range { vmin, vmax, vdef: vmin }
    }

    pub fn range_with_default(vmin: f64, vmax: f64, vdef: f64) -> Self {
        ParameterSpec::Range { vmin, vmax, vdef }
    }

    /// An integer range with `vmin` as its default value.
    pub fn int_range(vmin: i64, vmax: i64) -> Self {
        debug_assert!(vmin <= vmax);
        ParameterSpec::IntRange { vmin, vmax, vdef: vmin }
    }

    pub fn int_range_with_default(vmin: i64, vmax: i64, vdef: i64) -> Self {
        ParameterSpec::IntRange { vmin, vmax, vdef }
    }

    pub fn values(values: impl IntoIterator<Item = impl Into<Value>>) -> Self {
        ParameterSpec::Values(values.into_iter().map(Into::into).collect())
    }

    /// The value used when the space is run without sampling.
    pub fn default_value(&self) -> Value {
        match self {
            ParameterSpec::Constant(v) => v.clone(),
            ParameterSpec::Range { vdef, .. } => Value::Float(*vdef),
            ParameterSpec::IntRange { vdef, .. } => Value::Int(*vdef),
            ParameterSpec::Values(vs) => vs.first().cloned().unwrap_or(Value::Null),
        }
    }

    /// Expand into the list of values this parameter takes across a sample.
    /// Ranges need `n`; constants and explicit value sets ignore it.
    fn expand(&self, key: &str, n: Option<usize>) -> Result<Vec<Value>, SimError> {
        let need_n = |n: Option<usize>| {
            n.filter(|n| *n > 0).ok_or_else(|| {
                SimError::Configuration(format!(
                    "parameter '{key}' is a range; a sample size n is required"
                ))
            })
        };
        match self {
            ParameterSpec::Constant(v) => Ok(vec![v.clone()]),
            ParameterSpec::Values(vs) => Ok(vs.clone()),
            ParameterSpec::Range { vmin, vmax, .. } => {
                Ok(linspace(*vmin, *vmax, need_n(n)?).map(Value::Float).collect())
            }
            ParameterSpec::IntRange { vmin, vmax, .. } => {
                // Discretize over [vmin, vmax + 1] and floor, so every integer
                // in the range gets an equally wide slot. Keeps duplicates.
                let values = linspace(*vmin as f64, (*vmax + 1) as f64, need_n(n)?)
                    .map(|x| Value::Int((x.floor() as i64).min(*vmax)))
                    .collect();
                Ok(values)
            }
        }
    }
}

impl fmt::Display for ParameterSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterSpec::Constant(v) => write!(f, "Constant parameter {v}"),
            ParameterSpec::Range { vmin, vmax, .. } => {
                write!(f, "Parameter range from {vmin} to {vmax}")
            }
            ParameterSpec::IntRange { vmin, vmax, .. } => {
                write!(f, "Integer parameter range from {vmin} to {vmax}")
            }
            ParameterSpec::Values(vs) => write!(f, "Set of {} parameter values", vs.len()),
        }
    }
}

/// `n` evenly spaced values from `vmin` to `vmax` inclusive.
fn linspace(vmin: f64, vmax: f64, n: usize) -> impl Iterator<Item = f64> {
    let step = if n > 1 { (vmax - vmin) / (n - 1) as f64 } else { 0.0 };
    (0..n).map(move |i| {
        if i + 1 == n && n > 1 {
            vmax
        } else {
            vmin + step * i as f64
        }
    })
}

/// An ordered set of named parameter definitions.
#[derive(Clone, Debug, Default)]
pub struct ParameterSpace {
    specs: Vec<(String, ParameterSpec)>,
}

impl ParameterSpace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a parameter definition. Chained in builder style.
    pub fn set(mut self, key: impl Into<String>, spec: ParameterSpec) -> Self {
        let key = key.into();
        match self.specs.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = spec,
            None => self.specs.push((key, spec)),
        }
        self
    }

    /// Shorthand for a constant-valued parameter.
    pub fn constant(self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.set(key, ParameterSpec::constant(value))
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParameterSpec)> {
        self.specs.iter().map(|(k, s)| (k.as_str(), s))
    }

    /// The single combination of per-parameter default values.
    pub fn defaults(&self) -> AttrMap {
        self.specs
            .iter()
            .map(|(k, s)| (k.clone(), s.default_value()))
            .collect()
    }
}

/// Yields the cartesian product of the given value axes, last axis varying
/// fastest.
struct CartesianProduct {
    axes: Vec<Vec<Value>>,
    cursor: Vec<usize>,
    done: bool,
}

impl CartesianProduct {
    fn new(axes: Vec<Vec<Value>>) -> Self {
        let done = axes.iter().any(Vec::is_empty);
        let cursor = vec![0; axes.len()];
        Self { axes, cursor, done }
    }
}

impl Iterator for CartesianProduct {
    type Item = Vec<Value>;

    fn next(&mut self) -> Option<Vec<Value>> {
        if self.done {
            return None;
        }
        let item = self
            .cursor
            .iter()
            .zip(&self.axes)
            .map(|(&i, axis)| axis[i].clone())
            .collect();
        // Odometer increment from the rightmost axis.
        self.done = true;
        for (pos, axis) in self.cursor.iter_mut().zip(&self.axes).rev() {
            *pos += 1;
            if *pos < axis.len() {
                self.done = false;
                break;
            }
            *pos = 0;
        }
        if self.axes.is_empty() {
            self.done = true;
        }
        Some(item)
    }
}

/// A concrete list of parameter combinations, ready to run.
#[derive(Clone, Debug, Default)]
pub struct Sample {
    combinations: Vec<ParameterCombination>,
    log: AttrMap,
}

impl Sample {
    /// The cartesian product of all expanded parameter values. `n` controls
    /// range discretization and is required when ranges are present.
    pub fn new(space: &ParameterSpace, n: Option<usize>) -> Result<Self, SimError> {
        let keys: Vec<&str> = space.iter().map(|(k, _)| k).collect();
        let axes = space
            .iter()
            .map(|(k, s)| s.expand(k, n))
            .collect::<Result<Vec<_>, _>>()?;

        let combinations = CartesianProduct::new(axes)
            .map(|values| combination(&keys, values))
            .collect();
        Ok(Self {
            combinations,
            log: sample_log("product", n),
        })
    }

    /// Zip the expanded value lists index-wise instead of crossing them.
    /// All lists truncate to the shortest, so a constant's singleton list
    /// truncates the sample to a single combination.
    pub fn zipped(space: &ParameterSpace, n: Option<usize>) -> Result<Self, SimError> {
        let keys: Vec<&str> = space.iter().map(|(k, _)| k).collect();
        let axes = space
            .iter()
            .map(|(k, s)| s.expand(k, n))
            .collect::<Result<Vec<_>, _>>()?;

        let rows = axes.iter().map(Vec::len).min().unwrap_or(0);
        let combinations = (0..rows)
            .map(|row| {
                combination(&keys, axes.iter().map(|axis| axis[row].clone()).collect())
            })
            .collect();
        Ok(Self {
            combinations,
            log: sample_log("zip", n),
        })
    }

    /// A sample holding exactly one combination.
    pub fn single(parameters: AttrMap) -> Self {
        Self {
            combinations: vec![ParameterCombination::new(parameters)],
            log: sample_log("single", None),
        }
    }

    /// Assign every combination a distinct random seed drawn from a
    /// generator seeded with `master_seed`. Used to vary stochastic runs
    /// reproducibly across a sample.
    pub fn randomize_seeds(&mut self, master_seed: u64) {
        let mut rng = StdRng::seed_from_u64(master_seed);
        for combo in &mut self.combinations {
            assign_seed(combo, rng.gen::<u128>());
        }
        self.log.set("randomized", true);
    }

    pub fn len(&self) -> usize {
        self.combinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combinations.is_empty()
    }

    pub fn combinations(&self) -> &[ParameterCombination] {
        &self.combinations
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterCombination> {
        self.combinations.iter()
    }

    /// Provenance of the sample, stored under `parameters.log` in results.
    pub fn log(&self) -> &AttrMap {
        &self.log
    }
}

impl From<AttrMap> for Sample {
    fn from(parameters: AttrMap) -> Self {
        Sample::single(parameters)
    }
}

fn combination(keys: &[&str], values: Vec<Value>) -> ParameterCombination {
    ParameterCombination::new(
        keys.iter()
            .map(|k| k.to_string())
            .zip(values)
            .collect(),
    )
}

fn sample_log(method: &str, n: Option<usize>) -> AttrMap {
    AttrMap::from([
        ("type", Value::Str(method.into())),
        ("n", n.map_or(Value::Null, |n| Value::Int(n as i64))),
        ("randomized", Value::Bool(false)),
    ])
}
