//! Sweep a wealth-transfer model across a parameter grid, then arrange and
//! save the results.
//!
//! Run with: cargo run --example parameter_sweep

use rand::Rng;

use sim_experiments::{Experiment, ParameterSpace, ParameterSpec, Sample};
use sim_model::{model_output_dir, Model, ParameterCombination, Sim, Value};

/// Agents start with one unit of wealth and hand a unit to a random peer
/// each step. Gini coefficient of the final distribution is reported.
struct WealthModel {
    wealth: Vec<i64>,
}

impl Model for WealthModel {
    const NAME: &'static str = "WealthModel";

    fn new(parameters: &ParameterCombination) -> Self {
        let agents = parameters
            .get("agents")
            .and_then(Value::as_usize)
            .unwrap_or(100);
        Self {
            wealth: vec![1; agents],
        }
    }

    fn step(&mut self, sim: &mut Sim) {
        let n = self.wealth.len();
        for giver in 0..n {
            if self.wealth[giver] > 0 {
                let receiver = sim.rng().gen_range(0..n);
                self.wealth[giver] -= 1;
                self.wealth[receiver] += 1;
            }
        }
    }

    fn update(&mut self, sim: &mut Sim) {
        sim.record("gini", gini(&self.wealth));
    }

    fn end(&mut self, sim: &mut Sim) {
        sim.report("final_gini", gini(&self.wealth));
        let richest = self.wealth.iter().copied().max().unwrap_or(0);
        sim.report("max_wealth", richest);
    }
}

fn gini(wealth: &[i64]) -> f64 {
    let n = wealth.len() as f64;
    let total: i64 = wealth.iter().sum();
    if n == 0.0 || total == 0 {
        return 0.0;
    }
    let mut diff_sum = 0.0;
    for a in wealth {
        for b in wealth {
            diff_sum += (a - b).abs() as f64;
        }
    }
    diff_sum / (2.0 * n * n * (total as f64 / n))
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let space = ParameterSpace::new()
        .constant("steps", 50)
        .set("agents", ParameterSpec::values([50, 100, 200]));

    let mut sample = Sample::new(&space, None)?;
    sample.randomize_seeds(42);

    let results = Experiment::<WealthModel>::new(sample)
        .iterations(5)
        .record(true)
        .run_parallel(None)?;

    let summary = results.arrange_reporters();
    println!("\nReporters by run:");
    for row in 0..summary.n_rows() {
        let agents = summary.get(row, "agents").cloned().unwrap_or(Value::Null);
        let gini = summary.get(row, "final_gini").cloned().unwrap_or(Value::Null);
        println!("  agents = {agents:>5}  final gini = {gini}");
    }

    let dir = results.save(None, None, &model_output_dir(), false)?;
    println!("Results written to {}", dir.display());
    Ok(())
}
