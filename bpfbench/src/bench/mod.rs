//! Measurement modes built on the stats primitives.
//!
//! - **Streaming** ([`sampler`]): a background task samples every registered
//!   program on a fixed interval until cancelled.
//! - **Delta** ([`delta`]): one baseline and one post snapshot around a
//!   benchmark body, reported per program.

pub mod delta;
pub mod registry;
pub mod report;
pub mod sampler;

pub use delta::{DeltaResult, DeltaRunner};
pub use registry::{ProgramRegistry, ProgramStats};
pub use report::DeltaReport;
pub use sampler::{PeriodicStatsEvent, Registrar, SamplerHandle, StatsStreams, StreamingSampler};
