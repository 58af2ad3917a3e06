//! Library half of the `debounce-bench` harness

pub mod bench;
pub mod report;

pub use bench::{run, BenchConfig, BenchReport};
