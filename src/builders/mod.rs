//! Builders wiring the executor pool and buckets together from configuration.

pub mod engine_builder;

pub use engine_builder::{build_engine, Engine};
