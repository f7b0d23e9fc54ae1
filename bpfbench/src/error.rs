use std::{io, os::fd::RawFd, path::PathBuf};

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The kernel rejected `BPF_ENABLE_STATS` with `EINVAL`. Callers fall back
    /// to the sysctl flag.
    #[error("BPF_ENABLE_STATS is not supported by the running kernel")]
    CapabilityUnsupported,

    #[error("BPF_ENABLE_STATS failed: {0}")]
    EnableStats(#[source] io::Error),

    #[error("invalid sysctl path {}, it does not exist", path.display())]
    SysctlMissing { path: PathBuf },

    #[error("{op} on sysctl {} too short, expected {expected} got {actual}", path.display())]
    ShortIo {
        path: PathBuf,
        op: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("sysctl {} I/O failed: {source}", path.display())]
    Sysctl {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to query stats of program fd {fd}: {source}")]
    Query {
        fd: RawFd,
        #[source]
        source: io::Error,
    },

    /// Accounting could not be enabled, so the sampler never ran.
    #[error("stats sampler did not start: {0}")]
    Startup(#[source] Box<Error>),

    #[error("stats sampler has stopped")]
    SamplerStopped,

    #[error("benchmark body failed: {0:#}")]
    Body(anyhow::Error),

    #[error("failed to write report: {0}")]
    Report(#[source] io::Error),

    #[error(transparent)]
    Settings(#[from] config::ConfigError),
}

impl Error {
    /// True for failures of the sysctl flag itself: a missing path or a
    /// partial read/write.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::SysctlMissing { .. } | Error::ShortIo { .. })
    }
}
