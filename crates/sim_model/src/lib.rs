//! Core building blocks for agent-based simulation experiments.
//!
//! This crate provides the model execution context ([Sim], [Model],
//! [run_model]), the dynamically typed values flowing through it ([Value],
//! [AttrMap]), tabular output ([DataFrame]), the nested result container
//! ([DataDict]) with its arrangement API ([Arrange]), and directory-based
//! persistence for results.

pub mod arrange;
pub mod datadict;
pub mod error;
pub mod frame;
pub mod io;
pub mod model;
pub mod value;

pub use arrange::{Arrange, Selection};
pub use datadict::{DataDict, Entry};
pub use error::SimError;
pub use frame::DataFrame;
pub use io::model_output_dir;
pub use model::{run_model, Model, ParameterCombination, RunId, Sim};
pub use value::{AttrMap, Value};
