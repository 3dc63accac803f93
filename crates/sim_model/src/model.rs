//! Model lifecycle protocol and the single-run driver.
//!
//! A [Model] is the user-supplied simulation unit. The framework drives it
//! through a fixed lifecycle (`setup`, then `step`/`update` per time step,
//! then `end`) and collects whatever it reports or records into one
//! [DataDict] per run.

use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::datadict::{DataDict, Entry};
use crate::frame::DataFrame;
use crate::value::{AttrMap, Value};

/// Identifies one run by (sample index, iteration index). An axis with only
/// one value is collapsed and carries `None`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunId {
    pub sample: Option<usize>,
    pub iteration: Option<usize>,
}

impl RunId {
    pub fn new(sample: Option<usize>, iteration: Option<usize>) -> Self {
        Self { sample, iteration }
    }

    /// The id of a standalone run outside any experiment.
    pub fn single() -> Self {
        Self::default()
    }
}

/// One concrete set of parameter values for a run, with an optional
/// provenance seed. Immutable once produced by the sample generator.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ParameterCombination {
    values: AttrMap,
    seed: Option<u128>,
}

impl ParameterCombination {
    pub fn new(values: AttrMap) -> Self {
        Self { values, seed: None }
    }

    pub fn values(&self) -> &AttrMap {
        &self.values
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn seed(&self) -> Option<u128> {
        self.seed
    }

    pub(crate) fn set_seed(&mut self, seed: u128) {
        self.seed = Some(seed);
    }

    /// The seed a run should use: the assigned provenance seed if present,
    /// else a `seed` parameter value, else a default derived from the run id.
    fn resolve_seed(&self, run_id: RunId) -> u128 {
        if let Some(seed) = self.seed {
            return seed;
        }
        if let Some(v) = self.values.get("seed").and_then(Value::as_i64) {
            return v as u128;
        }
        // Deterministic fallback so sequential and parallel execution agree
        // even for unseeded runs.
        let idx = run_id.sample.unwrap_or(0) as u64 ^ ((run_id.iteration.unwrap_or(0) as u64) << 32);
        idx.wrapping_mul(0x9e3779b9) as u128
    }
}

impl From<AttrMap> for ParameterCombination {
    fn from(values: AttrMap) -> Self {
        Self::new(values)
    }
}

/// Seed-assignment helper exposed to the sample generator.
#[doc(hidden)]
pub fn assign_seed(combination: &mut ParameterCombination, seed: u128) {
    combination.set_seed(seed);
}

#[derive(Debug, Default)]
struct Recorder {
    keys: Vec<String>,
    // (obj_id, t) in first-recorded order; values keyed by column position.
    rows: Vec<(Option<i64>, usize, Vec<Option<Value>>)>,
}

impl Recorder {
    fn record(&mut self, obj_id: Option<i64>, t: usize, key: &str, value: Value) {
        let col = match self.keys.iter().position(|k| k == key) {
            Some(c) => c,
            None => {
                self.keys.push(key.to_string());
                for (_, _, row) in &mut self.rows {
                    row.push(None);
                }
                self.keys.len() - 1
            }
        };
        let row = match self
            .rows
            .iter()
            .position(|(id, rt, _)| *id == obj_id && *rt == t)
        {
            Some(r) => r,
            None => {
                self.rows.push((obj_id, t, vec![None; self.keys.len()]));
                self.rows.len() - 1
            }
        };
        self.rows[row].2[col] = Some(value);
    }

    fn into_frame(self) -> DataFrame {
        let has_obj_ids = self.rows.iter().any(|(id, _, _)| id.is_some());
        let index_names: Vec<&str> = if has_obj_ids {
            vec!["obj_id", "t"]
        } else {
            vec!["t"]
        };
        let mut frame = DataFrame::with_columns(index_names, self.keys.iter().map(String::as_str));
        for (obj_id, t, values) in self.rows {
            let mut index = Vec::new();
            if has_obj_ids {
                index.push(Value::Int(obj_id.unwrap_or(0)));
            }
            index.push(Value::Int(t as i64));
            frame.push_row(
                index,
                values.into_iter().map(|v| v.unwrap_or(Value::Null)).collect(),
            );
        }
        frame
    }
}

/// Runtime context handed to every lifecycle hook.
///
/// Carries the clock, the run's parameters, a seeded random generator, the
/// reporter and variable collectors, and the stop flag.
pub struct Sim {
    t: usize,
    parameters: ParameterCombination,
    run_id: RunId,
    rng: StdRng,
    stopped: bool,
    reporters: AttrMap,
    recorders: Vec<(String, Recorder)>,
    model_name: String,
}

impl Sim {
    fn new(parameters: ParameterCombination, run_id: RunId, model_name: &str) -> Self {
        let seed = parameters.resolve_seed(run_id);
        let mut seed_bytes = [0u8; 32];
        seed_bytes[..16].copy_from_slice(&seed.to_le_bytes());
        Self {
            t: 0,
            parameters,
            run_id,
            rng: StdRng::from_seed(seed_bytes),
            stopped: false,
            reporters: AttrMap::new(),
            recorders: Vec::new(),
            model_name: model_name.to_string(),
        }
    }

    /// Current time step. `t == 0` before the first `step`.
    pub fn t(&self) -> usize {
        self.t
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn parameters(&self) -> &ParameterCombination {
        &self.parameters
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.parameters.get(key)
    }

    pub fn param_f64(&self, key: &str) -> Option<f64> {
        self.param(key).and_then(Value::as_f64)
    }

    pub fn param_i64(&self, key: &str) -> Option<i64> {
        self.param(key).and_then(Value::as_i64)
    }

    pub fn param_usize(&self, key: &str) -> Option<usize> {
        self.param(key).and_then(Value::as_usize)
    }

    /// The run's random generator, seeded once per run for reproducibility.
    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    /// Register a per-run outcome. Reporting the same key twice overwrites.
    pub fn report(&mut self, key: &str, value: impl Into<Value>) {
        self.reporters.set(key, value);
    }

    /// Register the same outcome under several keys at once.
    pub fn report_many(&mut self, keys: &[&str], value: impl Into<Value>) {
        let value = value.into();
        for key in keys {
            self.reporters.set(*key, value.clone());
        }
    }

    /// Record a model-level time-series value at the current step.
    pub fn record(&mut self, key: &str, value: impl Into<Value>) {
        let name = self.model_name.clone();
        self.record_for(&name, None, key, value);
    }

    /// Record a time-series value for one object of the given type.
    pub fn record_obj(&mut self, obj_type: &str, obj_id: usize, key: &str, value: impl Into<Value>) {
        self.record_for(obj_type, Some(obj_id as i64), key, value);
    }

    fn record_for(
        &mut self,
        obj_type: &str,
        obj_id: Option<i64>,
        key: &str,
        value: impl Into<Value>,
    ) {
        let t = self.t;
        let recorder = match self.recorders.iter().position(|(k, _)| k == obj_type) {
            Some(pos) => &mut self.recorders[pos].1,
            None => {
                self.recorders
                    .push((obj_type.to_string(), Recorder::default()));
                &mut self.recorders.last_mut().unwrap().1
            }
        };
        recorder.record(obj_id, t, key, value.into());
    }

    /// End the simulation after the current step completes.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

/// The lifecycle protocol a simulation model must satisfy.
///
/// All hooks default to no-ops; a model overrides the ones it needs. The
/// orchestrator is generic over any implementation.
pub trait Model {
    /// Name used for `info.model_type` and for model-level recorded
    /// variables.
    const NAME: &'static str = "Model";

    /// Construct a fresh model instance for one run.
    fn new(parameters: &ParameterCombination) -> Self;

    /// Called once before the first step, at `t == 0`.
    fn setup(&mut self, sim: &mut Sim) {
        let _ = sim;
    }

    /// Called at each step after `t == 0`.
    fn step(&mut self, sim: &mut Sim) {
        let _ = sim;
    }

    /// Called after every step, including `t == 0`.
    fn update(&mut self, sim: &mut Sim) {
        let _ = sim;
    }

    /// Called once after the last step.
    fn end(&mut self, sim: &mut Sim) {
        let _ = sim;
    }
}

/// Drive one full run of `M` and return its structured output.
///
/// `steps` falls back to the `steps` parameter when not given; with neither,
/// the run continues until the model calls [Sim::stop]. An explicit `seed`
/// takes precedence over any `seed` parameter. With `display` on, a
/// completion line is printed when the run ends.
pub fn run_model<M: Model>(
    mut parameters: ParameterCombination,
    run_id: RunId,
    steps: Option<usize>,
    seed: Option<u128>,
    display: bool,
) -> DataDict {
    let started = Instant::now();
    let time_stamp = chrono::Local::now().to_string();
    let steps = steps.or_else(|| parameters.get("steps").and_then(Value::as_usize));
    if let Some(seed) = seed {
        parameters.set_seed(seed);
    }

    let mut model = M::new(&parameters);
    let mut sim = Sim::new(parameters, run_id, M::NAME);

    model.setup(&mut sim);
    model.update(&mut sim);
    while !sim.stopped && steps.map_or(true, |s| sim.t < s) {
        sim.t += 1;
        model.step(&mut sim);
        model.update(&mut sim);
        if steps.is_none() && !sim.stopped && sim.t >= MAX_UNBOUNDED_STEPS {
            break;
        }
    }
    model.end(&mut sim);

    if display {
        println!(
            "Completed: {} steps\nRun time: {:?}",
            sim.t,
            started.elapsed()
        );
    }

    create_output::<M>(sim, time_stamp, started)
}

// Guard against models that neither take a steps parameter nor stop.
const MAX_UNBOUNDED_STEPS: usize = 1_000_000;

fn create_output<M: Model>(sim: Sim, time_stamp: String, started: Instant) -> DataDict {
    let mut output = DataDict::new();

    let mut info = AttrMap::new();
    info.set("model_type", M::NAME);
    info.set("time_stamp", time_stamp);
    info.set("completed", true);
    info.set("completed_steps", sim.t);
    info.set("run_time", format!("{:?}", started.elapsed()));
    output.set("info", Entry::Map(info));

    let mut parameters = DataDict::new();
    parameters.set("constants", Entry::Map(sim.parameters.values().clone()));
    output.set("parameters", parameters);

    if !sim.recorders.is_empty() {
        let mut variables = DataDict::new();
        for (obj_type, recorder) in sim.recorders {
            variables.set(obj_type, recorder.into_frame());
        }
        output.set("variables", variables);
    }

    if !sim.reporters.is_empty() {
        let mut reporters = DataFrame::with_columns(Vec::<String>::new(), sim.reporters.keys());
        reporters.push_row(
            Vec::new(),
            sim.reporters.iter().map(|(_, v)| v.clone()).collect(),
        );
        output.set("reporters", reporters);
    }

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    struct CounterModel {
        total: i64,
    }

    impl Model for CounterModel {
        const NAME: &'static str = "CounterModel";

        fn new(_parameters: &ParameterCombination) -> Self {
            Self { total: 0 }
        }

        fn step(&mut self, sim: &mut Sim) {
            self.total += sim.param_i64("increment").unwrap_or(1);
            if let Some(limit) = sim.param_i64("limit") {
                if self.total >= limit {
                    sim.stop();
                }
            }
        }

        fn update(&mut self, sim: &mut Sim) {
            sim.record("total", self.total);
        }

        fn end(&mut self, sim: &mut Sim) {
            sim.report("final_total", self.total);
        }
    }

    fn params(items: AttrMap) -> ParameterCombination {
        ParameterCombination::new(items)
    }

    #[test]
    fn runs_for_steps_parameter() {
        let out = run_model::<CounterModel>(
            params(AttrMap::from([("steps", 3), ("increment", 2)])),
            RunId::single(),
            None,
            None,
            false,
        );
        assert_eq!(out.info_value("completed_steps"), Some(&Value::Int(3)));
        assert_eq!(out.info_value("model_type"), Some(&Value::Str("CounterModel".into())));
        assert_eq!(out.info_value("completed"), Some(&Value::Bool(true)));

        let reporters = out.frame("reporters").unwrap();
        assert_eq!(reporters.get(0, "final_total"), Some(&Value::Int(6)));
    }

    #[test]
    fn explicit_steps_overrides_parameter() {
        let out = run_model::<CounterModel>(
            params(AttrMap::from([("steps", 10)])),
            RunId::single(),
            Some(2),
            None,
            false,
        );
        assert_eq!(out.info_value("completed_steps"), Some(&Value::Int(2)));
    }

    #[test]
    fn stop_ends_run_early() {
        let out = run_model::<CounterModel>(
            params(AttrMap::from([("steps", 100), ("limit", 3)])),
            RunId::single(),
            None,
            None,
            false,
        );
        assert_eq!(out.info_value("completed_steps"), Some(&Value::Int(3)));
    }

    #[test]
    fn update_records_at_every_step_including_zero() {
        let out = run_model::<CounterModel>(
            params(AttrMap::from([("steps", 2)])),
            RunId::single(),
            None,
            None,
            false,
        );
        let vars = out.dict("variables").unwrap();
        let frame = vars.frame("CounterModel").unwrap();
        // t = 0, 1, 2 -> three rows, model frame indexed by t alone.
        assert_eq!(frame.index_names(), &["t"]);
        assert_eq!(frame.column("total").unwrap(), vec![
            Value::Int(0),
            Value::Int(1),
            Value::Int(2),
        ]);
    }

    struct RandModel;

    impl Model for RandModel {
        const NAME: &'static str = "RandModel";

        fn new(_parameters: &ParameterCombination) -> Self {
            Self
        }

        fn setup(&mut self, sim: &mut Sim) {
            let x: f64 = sim.rng().gen();
            sim.report("x", x);
            sim.stop();
        }
    }

    #[test]
    fn seed_parameter_makes_runs_reproducible() {
        let p = params(AttrMap::from([("seed", 1)]));
        let a = run_model::<RandModel>(p.clone(), RunId::single(), Some(0), None, false);
        let b = run_model::<RandModel>(p, RunId::single(), Some(0), None, false);
        assert_eq!(
            a.frame("reporters").unwrap().get(0, "x"),
            b.frame("reporters").unwrap().get(0, "x"),
        );

        let c = run_model::<RandModel>(
            params(AttrMap::from([("seed", 2)])),
            RunId::single(),
            Some(0),
            None,
            false,
        );
        assert_ne!(
            a.frame("reporters").unwrap().get(0, "x"),
            c.frame("reporters").unwrap().get(0, "x"),
        );
    }

    #[test]
    fn seed_argument_overrides_seed_parameter() {
        let p = params(AttrMap::from([("seed", 1)]));
        let overridden = run_model::<RandModel>(p.clone(), RunId::single(), Some(0), Some(7), false);
        let from_param = run_model::<RandModel>(p, RunId::single(), Some(0), None, false);
        let direct = run_model::<RandModel>(
            params(AttrMap::new()),
            RunId::single(),
            Some(0),
            Some(7),
            false,
        );

        assert_ne!(
            overridden.frame("reporters").unwrap().get(0, "x"),
            from_param.frame("reporters").unwrap().get(0, "x"),
        );
        assert_eq!(
            overridden.frame("reporters").unwrap().get(0, "x"),
            direct.frame("reporters").unwrap().get(0, "x"),
        );
    }

    struct FanOutModel;

    impl Model for FanOutModel {
        const NAME: &'static str = "FanOutModel";

        fn new(_parameters: &ParameterCombination) -> Self {
            Self
        }

        fn end(&mut self, sim: &mut Sim) {
            sim.report_many(&["mean", "median"], 4.5);
        }
    }

    #[test]
    fn report_many_registers_each_key() {
        let out = run_model::<FanOutModel>(params(AttrMap::new()), RunId::single(), Some(0), None, false);
        let reporters = out.frame("reporters").unwrap();
        assert_eq!(reporters.get(0, "mean"), Some(&Value::Float(4.5)));
        assert_eq!(reporters.get(0, "median"), Some(&Value::Float(4.5)));
    }

    struct MultiTypeModel;

    impl Model for MultiTypeModel {
        const NAME: &'static str = "MultiTypeModel";

        fn new(_parameters: &ParameterCombination) -> Self {
            Self
        }

        fn step(&mut self, sim: &mut Sim) {
            for agent in 0..2usize {
                sim.record_obj("Agent", agent, "x", agent as i64 * 10);
            }
            sim.record("mean_x", 5.0);
        }
    }

    #[test]
    fn agent_frames_are_indexed_by_obj_id_and_t() {
        let out = run_model::<MultiTypeModel>(
            params(AttrMap::new()),
            RunId::single(),
            Some(2),
            None,
            false,
        );
        let vars = out.dict("variables").unwrap();
        let agents = vars.frame("Agent").unwrap();
        assert_eq!(agents.index_names(), &["obj_id", "t"]);
        assert_eq!(agents.n_rows(), 4);
        let model = vars.frame("MultiTypeModel").unwrap();
        assert_eq!(model.index_names(), &["t"]);
        assert_eq!(model.n_rows(), 2);
    }
}
