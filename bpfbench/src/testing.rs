//! In-memory kernel for unit tests.

use std::{
    collections::{HashMap, HashSet},
    io::Write,
    os::fd::RawFd,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use tempfile::NamedTempFile;

use crate::{
    error::{Error, Result},
    kernel::Kernel,
    settings::Settings,
    snapshot::HandlerStatSnapshot,
    stats::sysctl::SysctlFlag,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopedMode {
    /// Probe and acquisition both succeed.
    Supported,
    /// Pre-5.8 kernel: the probe already says no.
    Unsupported,
    /// Probe succeeds, acquisition returns `EINVAL`.
    RefusedAtCall,
    /// Probe succeeds, acquisition returns `EPERM`.
    Denied,
}

#[derive(Debug)]
pub struct FakeToken(Arc<AtomicUsize>);

impl Drop for FakeToken {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct FakeKernel {
    mode: ScopedMode,
    programs: Mutex<HashMap<RawFd, HandlerStatSnapshot>>,
    failing: Mutex<HashSet<RawFd>>,
    probes: AtomicUsize,
    tokens: Arc<AtomicUsize>,
}

impl FakeKernel {
    pub fn new(mode: ScopedMode) -> Self {
        Self {
            mode,
            programs: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            probes: AtomicUsize::new(0),
            tokens: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn load(&self, fd: RawFd, name: &str, run_count: u64, run_time_ns: u64) {
        self.programs.lock().unwrap().insert(
            fd,
            HandlerStatSnapshot::new(name, run_count, Duration::from_nanos(run_time_ns)),
        );
    }

    /// Simulates `runs` invocations costing `ns` in total.
    pub fn run(&self, fd: RawFd, runs: u64, ns: u64) {
        let mut programs = self.programs.lock().unwrap();
        let stats = programs.get_mut(&fd).expect("unknown fd");
        stats.run_count += runs;
        stats.run_time += Duration::from_nanos(ns);
    }

    pub fn fail(&self, fd: RawFd) {
        self.failing.lock().unwrap().insert(fd);
    }

    pub fn heal(&self, fd: RawFd) {
        self.failing.lock().unwrap().remove(&fd);
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn active_tokens(&self) -> usize {
        self.tokens.load(Ordering::SeqCst)
    }
}

impl Kernel for FakeKernel {
    type StatsToken = FakeToken;

    fn probe_scoped_stats(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.mode != ScopedMode::Unsupported
    }

    fn acquire_scoped_stats(&self) -> Result<FakeToken> {
        match self.mode {
            ScopedMode::Supported => {
                self.tokens.fetch_add(1, Ordering::SeqCst);
                Ok(FakeToken(self.tokens.clone()))
            }
            ScopedMode::Unsupported | ScopedMode::RefusedAtCall => {
                Err(Error::CapabilityUnsupported)
            }
            ScopedMode::Denied => Err(Error::EnableStats(std::io::Error::from_raw_os_error(
                libc::EPERM,
            ))),
        }
    }

    fn read_program_stats(&self, fd: RawFd) -> Result<HandlerStatSnapshot> {
        if self.failing.lock().unwrap().contains(&fd) {
            return Err(Error::Query {
                fd,
                source: std::io::Error::from_raw_os_error(libc::EBADF),
            });
        }
        self.programs
            .lock()
            .unwrap()
            .get(&fd)
            .cloned()
            .ok_or_else(|| Error::Query {
                fd,
                source: std::io::Error::from_raw_os_error(libc::EBADF),
            })
    }
}

/// A stand-in for `/proc/sys/kernel/bpf_stats_enabled`. Keep the file alive
/// for as long as the flag is used.
pub fn sysctl_file(contents: &str) -> (NamedTempFile, SysctlFlag) {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    let flag = SysctlFlag::new(file.path());
    (file, flag)
}

/// Points `BPFBENCH_STATS__SYSCTL_PATH` at a fresh flag file and loads
/// [`Settings`] from the environment. Callers must be `#[serial]`.
pub fn settings_with_sysctl(contents: &str) -> (NamedTempFile, SysctlFlag, Settings) {
    let (file, flag) = sysctl_file(contents);
    unsafe {
        std::env::set_var("BPFBENCH_STATS__SYSCTL_PATH", file.path());
    }
    let settings = Settings::new().unwrap();
    unsafe {
        std::env::remove_var("BPFBENCH_STATS__SYSCTL_PATH");
    }
    (file, flag, settings)
}
