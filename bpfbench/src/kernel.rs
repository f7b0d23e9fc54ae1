//! The boundary between stats collection and the running kernel.

use std::os::fd::{OwnedFd, RawFd};

use aya::sys::{Stats, enable_stats};
use log::debug;

use crate::{
    error::{Error, Result},
    snapshot::HandlerStatSnapshot,
    sys,
};

pub trait Kernel: Send + Sync + 'static {
    /// A held `BPF_ENABLE_STATS` reference. Dropping it releases the reference.
    type StatsToken: Send + 'static;

    /// One-shot check whether the scoped stats mechanism exists at all.
    /// Callers memoize the answer, see [`crate::stats::capability::Capabilities`].
    fn probe_scoped_stats(&self) -> bool;

    /// Takes a scoped stats reference. `EINVAL` maps to
    /// [`Error::CapabilityUnsupported`].
    fn acquire_scoped_stats(&self) -> Result<Self::StatsToken>;

    /// Reads the current counters of the program behind `fd`.
    fn read_program_stats(&self, fd: RawFd) -> Result<HandlerStatSnapshot>;
}

/// The running kernel, reached through aya and raw `bpf(2)`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemKernel;

impl Kernel for SystemKernel {
    type StatsToken = OwnedFd;

    fn probe_scoped_stats(&self) -> bool {
        match self.acquire_scoped_stats() {
            Ok(_fd) => true,
            Err(Error::CapabilityUnsupported) => false,
            // The command exists; the real acquisition will surface this error.
            Err(e) => {
                debug!("BPF_ENABLE_STATS probe failed: {}", e);
                true
            }
        }
    }

    fn acquire_scoped_stats(&self) -> Result<OwnedFd> {
        enable_stats(Stats::RunTime).map_err(|e| match e.io_error.raw_os_error() {
            Some(libc::EINVAL) => Error::CapabilityUnsupported,
            _ => Error::EnableStats(e.io_error),
        })
    }

    fn read_program_stats(&self, fd: RawFd) -> Result<HandlerStatSnapshot> {
        let info = sys::prog_info_by_fd(fd).map_err(|source| Error::Query { fd, source })?;
        Ok(HandlerStatSnapshot::from(&info))
    }
}
