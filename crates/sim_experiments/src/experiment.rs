//! Experiment orchestration: run a sample of parameter combinations over
//! repeated iterations and merge the per-run outputs into one container.
//!
//! Runs are independent, so the run matrix can execute sequentially or on a
//! rayon thread pool; both orderings produce identical output.

use std::marker::PhantomData;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use sim_model::model::assign_seed;
use sim_model::{
    run_model, AttrMap, DataDict, DataFrame, Entry, Model, ParameterCombination, RunId, SimError,
    Value,
};

use crate::progress::{ConsoleProgress, ProgressReporter, SilentProgress};
use crate::sample::Sample;

/// Runs a model over every combination of a sample, `iterations` times each.
pub struct Experiment<M: Model> {
    sample: Sample,
    iterations: usize,
    steps: Option<usize>,
    record: bool,
    randomize: bool,
    display: bool,
    progress: Box<dyn ProgressReporter>,
    end_hook: Option<Box<dyn FnMut(&mut DataDict)>>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> Experiment<M> {
    pub fn new(sample: impl Into<Sample>) -> Self {
        Self {
            sample: sample.into(),
            iterations: 1,
            steps: None,
            record: false,
            randomize: true,
            display: true,
            progress: Box::new(ConsoleProgress::new()),
            end_hook: None,
            _model: PhantomData,
        }
    }

    /// How often each combination is repeated. Defaults to 1.
    pub fn iterations(mut self, iterations: usize) -> Self {
        self.iterations = iterations.max(1);
        self
    }

    /// Fixed step count for every run, overriding the `steps` parameter.
    pub fn steps(mut self, steps: usize) -> Self {
        self.steps = Some(steps);
        self
    }

    /// Whether per-step recorded variables are kept in the output. The
    /// detailed trace is large, so it defaults to false; reporters are
    /// always kept.
    pub fn record(mut self, record: bool) -> Self {
        self.record = record;
        self
    }

    /// Whether seeded combinations get a distinct derived seed per
    /// iteration. With false, every iteration of a seeded combination
    /// repeats the same run. Defaults to true.
    pub fn randomize(mut self, randomize: bool) -> Self {
        self.randomize = randomize;
        self
    }

    /// Whether progress and a completion summary are shown while running.
    /// Defaults to true.
    pub fn display(mut self, display: bool) -> Self {
        self.display = display;
        self.progress = if display {
            Box::new(ConsoleProgress::new())
        } else {
            Box::new(SilentProgress)
        };
        self
    }

    /// Replace the progress reporter, e.g. to forward progress to a UI.
    pub fn progress(mut self, reporter: impl ProgressReporter + 'static) -> Self {
        self.progress = Box::new(reporter);
        self
    }

    /// Hook applied to the combined output before completion is stamped.
    pub fn on_end(mut self, hook: impl FnMut(&mut DataDict) + 'static) -> Self {
        self.end_hook = Some(Box::new(hook));
        self
    }

    pub fn scheduled_runs(&self) -> usize {
        self.sample.len() * self.iterations
    }

    /// The full run matrix, sample-major and iteration-minor. An axis with a
    /// single value is collapsed out of the run ids.
    fn jobs(&self) -> Vec<(ParameterCombination, RunId)> {
        let keep_sample = self.sample.len() > 1;
        let keep_iteration = self.iterations > 1;
        let mut jobs = Vec::with_capacity(self.scheduled_runs());
        for (sample_idx, combo) in self.sample.iter().enumerate() {
            // Seeded combinations spawn one derived seed per iteration, so
            // repetitions differ but stay reproducible.
            let mut seed_rng = combo
                .seed()
                .filter(|_| self.randomize && keep_iteration)
                .map(|seed| {
                    let mut bytes = [0u8; 32];
                    bytes[..16].copy_from_slice(&seed.to_le_bytes());
                    StdRng::from_seed(bytes)
                });
            for iteration in 0..self.iterations {
                let mut combo = combo.clone();
                if let Some(rng) = &mut seed_rng {
                    assign_seed(&mut combo, rng.gen::<u128>());
                }
                jobs.push((
                    combo,
                    RunId::new(
                        keep_sample.then_some(sample_idx),
                        keep_iteration.then_some(iteration),
                    ),
                ));
            }
        }
        jobs
    }

    /// Execute all runs sequentially.
    pub fn run(&mut self) -> DataDict {
        let started = Instant::now();
        let jobs = self.jobs();
        let steps = self.steps;
        self.progress.begin(jobs.len());

        let outputs: Vec<(RunId, DataDict)> = jobs
            .into_iter()
            .map(|(combo, run_id)| {
                let out = run_model::<M>(combo, run_id, steps, None, false);
                self.progress.run_completed();
                (run_id, out)
            })
            .collect();

        self.progress.finish();
        self.finalize(outputs, started)
    }

    /// Execute all runs on a rayon thread pool. Output is identical to
    /// [Experiment::run]: results are collected in run order and merged
    /// sequentially.
    pub fn run_parallel(&mut self, num_threads: Option<usize>) -> Result<DataDict, SimError> {
        let started = Instant::now();
        let jobs = self.jobs();
        let steps = self.steps;
        self.progress.begin(jobs.len());

        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(threads) = num_threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder
            .build()
            .map_err(|e| SimError::Configuration(format!("failed to create thread pool: {e}")))?;

        let reporter: &dyn ProgressReporter = self.progress.as_ref();
        let outputs: Vec<(RunId, DataDict)> = pool.install(|| {
            jobs.into_par_iter()
                .map(|(combo, run_id)| {
                    let out = run_model::<M>(combo, run_id, steps, None, false);
                    reporter.run_completed();
                    (run_id, out)
                })
                .collect()
        });

        self.progress.finish();
        Ok(self.finalize(outputs, started))
    }

    /// Merge per-run outputs into the experiment container.
    fn finalize(&mut self, outputs: Vec<(RunId, DataDict)>, started: Instant) -> DataDict {
        let mut out = DataDict::new();

        let mut info = AttrMap::new();
        info.set("model_type", M::NAME);
        info.set("time_stamp", chrono::Local::now().to_string());
        info.set("experiment", true);
        info.set("scheduled_runs", self.scheduled_runs() as i64);
        info.set("completed", false);
        info.set("record", self.record);
        info.set("sample_size", self.sample.len() as i64);
        info.set("iterations", self.iterations as i64);
        out.set("info", Entry::Map(info));

        out.set("parameters", self.parameters_to_output());

        let level_names = run_level_names(&outputs);
        for (key, merged) in fold_runs(&outputs, &level_names, self.record) {
            out.set(key, merged);
        }

        if let Some(hook) = &mut self.end_hook {
            hook(&mut out);
        }

        if let Some(Entry::Map(info)) = out.get_mut("info") {
            info.set("completed", true);
            info.set("run_time", format!("{:?}", started.elapsed()));
        }
        if self.display {
            println!(
                "Scheduled runs: {}\nCompleted: {}, run time: {:?}",
                self.scheduled_runs(),
                self.scheduled_runs(),
                started.elapsed()
            );
        }
        out
    }

    /// Split the sample into constants (one value across all combinations)
    /// and a per-sample table of the varying parameters.
    fn parameters_to_output(&self) -> DataDict {
        let mut parameters = DataDict::new();
        let combos = self.sample.combinations();

        let keys: Vec<&str> = combos
            .first()
            .map(|c| c.values().keys().collect())
            .unwrap_or_default();
        let mut constants = AttrMap::new();
        let mut varying = Vec::new();
        for key in keys {
            let first = combos[0].get(key).cloned().unwrap_or(Value::Null);
            let same = combos.iter().all(|c| {
                c.get(key).map_or(first == Value::Null, |v| {
                    v.to_csv_cell() == first.to_csv_cell()
                })
            });
            if same {
                constants.set(key, first);
            } else {
                varying.push(key.to_string());
            }
        }

        parameters.set("constants", Entry::Map(constants));
        if !varying.is_empty() {
            let mut sample_frame = DataFrame::with_columns(["sample_id"], varying.clone());
            for (sample_idx, combo) in combos.iter().enumerate() {
                sample_frame.push_row(
                    vec![Value::Int(sample_idx as i64)],
                    varying
                        .iter()
                        .map(|k| combo.get(k).cloned().unwrap_or(Value::Null))
                        .collect(),
                );
            }
            parameters.set("sample", sample_frame);
        }
        parameters.set("log", Entry::Map(self.sample.log().clone()));
        parameters
    }
}

/// Names of the run id levels present across the outputs.
fn run_level_names(outputs: &[(RunId, DataDict)]) -> Vec<&'static str> {
    let mut names = Vec::new();
    if outputs.iter().any(|(id, _)| id.sample.is_some()) {
        names.push("sample_id");
    }
    if outputs.iter().any(|(id, _)| id.iteration.is_some()) {
        names.push("iteration");
    }
    names
}

fn run_level_values(run_id: RunId, level_names: &[&'static str]) -> Vec<Value> {
    let mut values = Vec::with_capacity(level_names.len());
    if level_names.contains(&"sample_id") {
        values.push(Value::Int(run_id.sample.unwrap_or(0) as i64));
    }
    if level_names.contains(&"iteration") {
        values.push(Value::Int(run_id.iteration.unwrap_or(0) as i64));
    }
    values
}

/// Merge the per-run output sections, skipping each run's own `info` and
/// `parameters`. Tables concatenate under the run id levels; anything else
/// becomes a list of per-run entries.
fn fold_runs(
    outputs: &[(RunId, DataDict)],
    level_names: &[&'static str],
    record: bool,
) -> Vec<(String, Entry)> {
    let mut keys: Vec<String> = Vec::new();
    for (_, output) in outputs {
        for key in output.keys() {
            if key == "info" || key == "parameters" {
                continue;
            }
            if key == "variables" && !record {
                continue;
            }
            if !keys.iter().any(|k| k == key) {
                keys.push(key.to_string());
            }
        }
    }

    keys.into_iter()
        .map(|key| {
            let entries: Vec<(RunId, &Entry)> = outputs
                .iter()
                .filter_map(|(id, o)| o.get(&key).map(|e| (*id, e)))
                .collect();
            let merged = if entries.iter().all(|(_, e)| e.as_dict().is_some()) {
                Entry::Dict(fold_sections(&entries, level_names))
            } else {
                combine(&entries, level_names)
            };
            (key, merged)
        })
        .collect()
}

/// Merge a nested section, e.g. `variables`, sub-key by sub-key.
fn fold_sections(entries: &[(RunId, &Entry)], level_names: &[&'static str]) -> DataDict {
    let mut sub_keys: Vec<String> = Vec::new();
    for (_, entry) in entries {
        for key in entry.as_dict().into_iter().flat_map(DataDict::keys) {
            if !sub_keys.iter().any(|k| k == key) {
                sub_keys.push(key.to_string());
            }
        }
    }

    let mut section = DataDict::new();
    for sub_key in sub_keys {
        let sub_entries: Vec<(RunId, &Entry)> = entries
            .iter()
            .filter_map(|(id, e)| e.as_dict().and_then(|d| d.get(&sub_key)).map(|e| (*id, e)))
            .collect();
        section.set(sub_key, combine(&sub_entries, level_names));
    }
    section
}

/// Combine one key's per-run entries. Frames concatenate with the run id
/// prepended as index levels; a single collapsed run passes through as-is.
fn combine(entries: &[(RunId, &Entry)], level_names: &[&'static str]) -> Entry {
    if level_names.is_empty() {
        return match entries {
            [(_, entry)] => (*entry).clone(),
            _ => Entry::List(entries.iter().map(|(_, e)| (*e).clone()).collect()),
        };
    }
    if entries.iter().all(|(_, e)| e.as_frame().is_some()) {
        let parts: Vec<(Vec<Value>, &DataFrame)> = entries
            .iter()
            .map(|(id, e)| (run_level_values(*id, level_names), e.as_frame().unwrap()))
            .collect();
        Entry::Frame(DataFrame::concat_with_keys(level_names, &parts))
    } else {
        Entry::List(entries.iter().map(|(_, e)| (*e).clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{ParameterSpace, ParameterSpec};
    use sim_model::Sim;

    struct WealthModel {
        wealth: i64,
    }

    impl Model for WealthModel {
        const NAME: &'static str = "WealthModel";

        fn new(parameters: &ParameterCombination) -> Self {
            Self {
                wealth: parameters
                    .get("start")
                    .and_then(Value::as_i64)
                    .unwrap_or(0),
            }
        }

        fn step(&mut self, sim: &mut Sim) {
            let gain = sim.param_i64("gain").unwrap_or(1);
            self.wealth += gain + sim.rng().gen_range(0..100);
        }

        fn update(&mut self, sim: &mut Sim) {
            sim.record("wealth", self.wealth);
        }

        fn end(&mut self, sim: &mut Sim) {
            sim.report("final_wealth", self.wealth);
        }
    }

    fn space() -> ParameterSpace {
        ParameterSpace::new()
            .constant("steps", 3)
            .constant("start", 10)
            .set("gain", ParameterSpec::values([1, 2]))
    }

    fn sample() -> Sample {
        let mut sample = Sample::new(&space(), None).unwrap();
        sample.randomize_seeds(7);
        sample
    }

    #[test]
    fn output_carries_experiment_metadata_and_parameter_partition() {
        let results = Experiment::<WealthModel>::new(sample())
            .iterations(2)
            .display(false)
            .run();

        assert_eq!(results.info_value("experiment"), Some(&Value::Bool(true)));
        assert_eq!(results.info_value("scheduled_runs"), Some(&Value::Int(4)));
        assert_eq!(results.info_value("sample_size"), Some(&Value::Int(2)));
        assert_eq!(results.info_value("iterations"), Some(&Value::Int(2)));
        assert_eq!(results.info_value("completed"), Some(&Value::Bool(true)));

        let parameters = results.dict("parameters").unwrap();
        let constants = parameters.map("constants").unwrap();
        assert_eq!(constants.get("steps"), Some(&Value::Int(3)));
        assert_eq!(constants.get("start"), Some(&Value::Int(10)));
        assert!(constants.get("gain").is_none());

        let sample_frame = parameters.frame("sample").unwrap();
        assert_eq!(sample_frame.index_names(), &["sample_id"]);
        assert_eq!(sample_frame.column("gain").unwrap(), vec![
            Value::Int(1),
            Value::Int(2),
        ]);
    }

    #[test]
    fn reporters_concatenate_under_run_id_levels() {
        let results = Experiment::<WealthModel>::new(sample())
            .iterations(2)
            .display(false)
            .run();

        let reporters = results.frame("reporters").unwrap();
        assert_eq!(reporters.index_names(), &["sample_id", "iteration"]);
        assert_eq!(reporters.n_rows(), 4);
        assert_eq!(reporters.index_value(0, "sample_id"), Some(&Value::Int(0)));
        assert_eq!(reporters.index_value(3, "sample_id"), Some(&Value::Int(1)));
        assert_eq!(reporters.index_value(3, "iteration"), Some(&Value::Int(1)));
    }

    #[test]
    fn variables_gain_run_levels_before_time() {
        let results = Experiment::<WealthModel>::new(sample())
            .record(true)
            .display(false)
            .run();

        let vars = results.dict("variables").unwrap();
        let frame = vars.frame("WealthModel").unwrap();
        assert_eq!(frame.index_names(), &["sample_id", "t"]);
        // 2 samples x 4 recorded steps (t = 0..=3).
        assert_eq!(frame.n_rows(), 8);
    }

    #[test]
    fn single_value_axes_collapse_out_of_the_index() {
        let space = ParameterSpace::new().constant("steps", 1);
        let results = Experiment::<WealthModel>::new(Sample::new(&space, None).unwrap())
            .iterations(3)
            .display(false)
            .run();

        // One combination: only the iteration level remains.
        let reporters = results.frame("reporters").unwrap();
        assert_eq!(reporters.index_names(), &["iteration"]);
        assert_eq!(reporters.n_rows(), 3);
    }

    #[test]
    fn single_run_output_passes_through_unindexed() {
        let space = ParameterSpace::new().constant("steps", 2);
        let results = Experiment::<WealthModel>::new(Sample::new(&space, None).unwrap())
            .display(false)
            .run();

        let reporters = results.frame("reporters").unwrap();
        assert!(reporters.index_names().is_empty());
        assert_eq!(reporters.n_rows(), 1);
    }

    #[test]
    fn variables_kept_only_when_recording() {
        let results = Experiment::<WealthModel>::new(sample())
            .display(false)
            .run();
        assert!(!results.has("variables"));
        assert!(results.has("reporters"));
        assert_eq!(results.info_value("record"), Some(&Value::Bool(false)));

        let recorded = Experiment::<WealthModel>::new(sample())
            .record(true)
            .display(false)
            .run();
        assert!(recorded.dict("variables").is_some());
        assert_eq!(recorded.info_value("record"), Some(&Value::Bool(true)));
    }

    #[test]
    fn randomized_iterations_differ_but_reproduce() {
        let run = || {
            Experiment::<WealthModel>::new(sample())
                .iterations(2)
                .record(true)
                .display(false)
                .run()
        };
        let a = run();
        let b = run();

        let wealth = |r: &DataDict, row: usize| {
            r.frame("reporters").unwrap().get(row, "final_wealth").cloned()
        };
        // Same construction reproduces exactly.
        assert_eq!(wealth(&a, 0), wealth(&b, 0));
        assert_eq!(wealth(&a, 1), wealth(&b, 1));
        // Iterations of one combination use different derived seeds; the
        // recorded trajectories diverge even when endpoints coincide.
        let vars = a.dict("variables").unwrap().frame("WealthModel").unwrap();
        let run0: Vec<_> = (0..4).map(|r| vars.get(r, "wealth").cloned()).collect();
        let run1: Vec<_> = (4..8).map(|r| vars.get(r, "wealth").cloned()).collect();
        assert_ne!(run0, run1);
    }

    #[test]
    fn explicit_seed_parameter_repeats_across_iterations() {
        let space = ParameterSpace::new()
            .constant("steps", 3)
            .constant("seed", 11);
        let results = Experiment::<WealthModel>::new(Sample::new(&space, None).unwrap())
            .iterations(2)
            .display(false)
            .run();

        // A fixed seed parameter pins the run exactly; both iterations and
        // any rebuilt experiment repeat it.
        let reporters = results.frame("reporters").unwrap();
        assert_eq!(
            reporters.get(0, "final_wealth"),
            reporters.get(1, "final_wealth"),
        );

        let again = Experiment::<WealthModel>::new(Sample::new(&space, None).unwrap())
            .iterations(2)
            .display(false)
            .run();
        assert_eq!(
            reporters.get(0, "final_wealth"),
            again.frame("reporters").unwrap().get(0, "final_wealth"),
        );
    }

    #[test]
    fn parallel_execution_matches_sequential() {
        let sequential = Experiment::<WealthModel>::new(sample())
            .iterations(2)
            .display(false)
            .run();
        let mut parallel = Experiment::<WealthModel>::new(sample())
            .iterations(2)
            .display(false)
            .run_parallel(Some(2))
            .unwrap();

        // Time stamps differ; everything else must match exactly.
        let mut sequential = sequential;
        sequential.delete("info");
        parallel.delete("info");
        assert_eq!(sequential, parallel);
    }

    #[test]
    fn end_hook_can_add_derived_entries() {
        let results = Experiment::<WealthModel>::new(sample())
            .display(false)
            .on_end(|out| {
                let n = out.frame("reporters").map_or(0, DataFrame::n_rows);
                out.set("n_reports", Value::Int(n as i64));
            })
            .run();
        assert_eq!(results.value("n_reports"), Some(&Value::Int(2)));
    }
}
