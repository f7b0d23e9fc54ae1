//! Kernel-reported cost of attached eBPF programs.
//!
//! Reads the run count and accumulated run time the kernel keeps per BPF
//! program, so a benchmark can attribute overhead to individual programs
//! instead of only to wall-clock time. Loading and attaching programs is left
//! to the caller; this crate only needs each program's fd.

pub mod bench;
pub mod error;
pub mod kernel;
pub mod settings;
pub mod snapshot;
pub mod stats;
pub mod sys;

#[cfg(test)]
mod testing;

pub use crate::{
    bench::{
        DeltaReport, DeltaResult, DeltaRunner, PeriodicStatsEvent, ProgramRegistry, ProgramStats,
        Registrar, SamplerHandle, StatsStreams, StreamingSampler,
    },
    error::{Error, Result},
    kernel::{Kernel, SystemKernel},
    settings::Settings,
    snapshot::HandlerStatSnapshot,
    stats::{StatsEnabler, StatsGuard},
};
