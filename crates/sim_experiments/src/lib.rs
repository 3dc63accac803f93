//! Experiment framework for agent-based simulation parameter sweeps.
//!
//! This crate runs a [sim_model::Model] over a sample of parameter
//! combinations, sequentially or in parallel, and merges the per-run outputs
//! into one [sim_model::DataDict] ready for arrangement and persistence.
//!
//! # Quick Start
//!
//! ```no_run
//! use sim_experiments::{Experiment, ParameterSpace, ParameterSpec, Sample};
//! # use sim_model::{Model, ParameterCombination, Sim};
//! # struct MyModel;
//! # impl Model for MyModel {
//! #     const NAME: &'static str = "MyModel";
//! #     fn new(_: &ParameterCombination) -> Self { MyModel }
//! # }
//!
//! // Define the parameter space.
//! let space = ParameterSpace::new()
//!     .constant("steps", 100)
//!     .set("growth", ParameterSpec::range(0.0, 0.1))
//!     .set("agents", ParameterSpec::values([50, 100]));
//!
//! // Discretize ranges into 5 points, full cartesian product.
//! let mut sample = Sample::new(&space, Some(5)).unwrap();
//! sample.randomize_seeds(42);
//!
//! // Run each combination 3 times on all cores.
//! let results = Experiment::<MyModel>::new(sample)
//!     .iterations(3)
//!     .run_parallel(None)
//!     .unwrap();
//!
//! let summary = results.arrange_reporters();
//! ```
//!
//! # Architecture
//!
//! - [`sample`]: parameter space definition and sample generation
//! - [`experiment`]: the run matrix, its execution, and output merging
//! - [`progress`]: injectable progress reporting

pub mod experiment;
pub mod progress;
pub mod sample;

pub use experiment::Experiment;
pub use progress::{ConsoleProgress, ProgressReporter, SilentProgress};
pub use sample::{ParameterSpace, ParameterSpec, Sample};
