//! Plan pipeline: prompt rendering and generation.

pub mod generator;
pub mod prompt;

pub use generator::{GeneratorConfig, PlanGenerator};
