//! Model assembly and the per-timestep schedule.

mod builder;
mod runtime;

pub use builder::ModelBuilder;
pub use runtime::{Model, RunReport};
