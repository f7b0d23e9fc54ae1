use std::{collections::BTreeMap, os::fd::RawFd};

use crate::{error::Result, kernel::Kernel, snapshot::HandlerStatSnapshot};

/// Stats of every registered program from one snapshot pass, keyed by fd.
pub type ProgramStats = BTreeMap<RawFd, HandlerStatSnapshot>;

/// Programs under measurement, keyed by fd, with the caller's display name
/// (possibly empty).
#[derive(Debug, Default, Clone)]
pub struct ProgramRegistry {
    programs: BTreeMap<RawFd, String>,
}

impl ProgramRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `fd`, replacing the name of an earlier registration.
    pub fn register(&mut self, fd: RawFd, name: impl Into<String>) {
        self.programs.insert(fd, name.into());
    }

    pub fn reset_all(&mut self) {
        self.programs.clear();
    }

    /// The registered name, `None` when absent or registered empty.
    pub fn name(&self, fd: RawFd) -> Option<&str> {
        self.programs
            .get(&fd)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }

    pub fn descriptors(&self) -> impl Iterator<Item = RawFd> + '_ {
        self.programs.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Reads every registered program once.
    ///
    /// All or nothing: the first failed read is returned and the stats read
    /// so far are discarded, so a caller never sees a partial pass.
    pub fn snapshot_all<K: Kernel + ?Sized>(&self, kernel: &K) -> Result<ProgramStats> {
        self.descriptors()
            .map(|fd| kernel.read_program_stats(fd).map(|stats| (fd, stats)))
            .collect()
    }
}
