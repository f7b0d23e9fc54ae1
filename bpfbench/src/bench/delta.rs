//! Before/after measurement around a benchmark body.

use std::{
    io,
    os::fd::{AsFd, AsRawFd, RawFd},
    sync::Arc,
    time::Duration,
};

use log::{debug, info, warn};

use crate::{
    bench::{
        registry::{ProgramRegistry, ProgramStats},
        report::DeltaReport,
    },
    error::{Error, Result},
    kernel::Kernel,
    settings::Settings,
    stats::StatsEnabler,
};

/// Work one program did between the baseline and post snapshots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeltaResult {
    pub fd: RawFd,
    pub name: String,
    pub iterations: u64,
    pub elapsed: Duration,
}

impl DeltaResult {
    /// Average run time per invocation, 0 when the program never ran.
    pub fn ns_per_op(&self) -> f64 {
        if self.iterations == 0 {
            return 0.0;
        }
        self.elapsed.as_nanos() as f64 / self.iterations as f64
    }
}

pub struct DeltaRunner<K: Kernel> {
    kernel: Arc<K>,
    enabler: StatsEnabler<K>,
    registry: ProgramRegistry,
}

impl<K: Kernel> DeltaRunner<K> {
    pub fn new(kernel: Arc<K>, settings: &Settings) -> Self {
        let enabler = StatsEnabler::from_settings(kernel.clone(), settings);
        Self::with_enabler(kernel, enabler)
    }

    pub fn with_enabler(kernel: Arc<K>, enabler: StatsEnabler<K>) -> Self {
        Self {
            kernel,
            enabler,
            registry: ProgramRegistry::new(),
        }
    }

    pub fn register(&mut self, fd: RawFd, name: impl Into<String>) {
        self.registry.register(fd, name);
    }

    pub fn register_fd(&mut self, fd: impl AsFd, name: impl Into<String>) {
        self.register(fd.as_fd().as_raw_fd(), name);
    }

    pub fn reset_all(&mut self) {
        self.registry.reset_all();
    }

    pub fn registry(&self) -> &ProgramRegistry {
        &self.registry
    }

    /// Enables accounting, snapshots every registered program, runs `body`,
    /// snapshots again and returns the body's value with the per-program
    /// deltas.
    ///
    /// Accounting is disabled on every exit path, including an error or a
    /// panic in `body`. Any failure to enable, read, or disable aborts the run.
    pub fn run<F, R, E>(&self, body: F) -> Result<(R, DeltaReport)>
    where
        F: FnOnce() -> std::result::Result<R, E>,
        E: Into<anyhow::Error>,
    {
        let guard = self.enabler.enable()?;

        let baseline = self.registry.snapshot_all(&*self.kernel)?;
        debug!("Baseline taken for {} programs", baseline.len());

        let value = body().map_err(|e| Error::Body(e.into()))?;

        let post = self.registry.snapshot_all(&*self.kernel)?;
        guard.disable()?;

        let results = compute_deltas(&self.registry, &baseline, &post);
        Ok((value, DeltaReport::new(results)))
    }

    /// [`DeltaRunner::run`], then writes the rendered table to `out`.
    pub fn run_and_print<F, R, E, W>(&self, bench_name: &str, out: &mut W, body: F) -> Result<R>
    where
        F: FnOnce() -> std::result::Result<R, E>,
        E: Into<anyhow::Error>,
        W: io::Write,
    {
        let (value, report) = self.run(body)?;
        info!("{}: measured {} programs", bench_name, report.results().len());
        out.write_all(report.render(bench_name).as_bytes())
            .map_err(Error::Report)?;
        Ok(value)
    }
}

/// One result per fd present in `baseline`. Programs that only appear in
/// `post` are ignored. The registered name wins over the kernel's name.
pub fn compute_deltas(
    registry: &ProgramRegistry,
    baseline: &ProgramStats,
    post: &ProgramStats,
) -> Vec<DeltaResult> {
    baseline
        .iter()
        .filter_map(|(&fd, before)| {
            let Some(after) = post.get(&fd) else {
                warn!("Program fd={} missing from post snapshot", fd);
                return None;
            };
            if after.run_count < before.run_count || after.run_time < before.run_time {
                warn!(
                    "Stats of program fd={} went backwards; was accounting toggled mid-run?",
                    fd
                );
            }

            let name = registry.name(fd).unwrap_or(after.name.as_str()).to_string();
            Some(DeltaResult {
                fd,
                name,
                iterations: after.run_count.saturating_sub(before.run_count),
                elapsed: after.run_time.saturating_sub(before.run_time),
            })
        })
        .collect()
}
