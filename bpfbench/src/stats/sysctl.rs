//! The global `kernel.bpf_stats_enabled` switch.
//!
//! Not reference counted: writing `0` turns stats off for every user on the
//! host, whoever turned them on.

use std::{
    fs::{self, File, OpenOptions},
    io::{self, Read, Write},
    path::{Path, PathBuf},
};

use crate::error::{Error, Result};

pub const BPF_STATS_SYSCTL: &str = "/proc/sys/kernel/bpf_stats_enabled";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysctlFlag {
    path: PathBuf,
}

impl Default for SysctlFlag {
    fn default() -> Self {
        Self::new(BPF_STATS_SYSCTL)
    }
}

impl SysctlFlag {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write(&self, enabled: bool) -> Result<()> {
        self.validate()?;
        let mut file = OpenOptions::new()
            .write(true)
            .open(&self.path)
            .map_err(|e| self.io_error(e))?;

        let val = [if enabled { b'1' } else { b'0' }];
        let n = file.write(&val).map_err(|e| self.io_error(e))?;
        if n != val.len() {
            return Err(Error::ShortIo {
                path: self.path.clone(),
                op: "write",
                expected: val.len(),
                actual: n,
            });
        }
        Ok(())
    }

    /// Reads the first byte of the flag; `'1'` means enabled.
    pub fn read(&self) -> Result<bool> {
        self.validate()?;
        let mut file = File::open(&self.path).map_err(|e| self.io_error(e))?;

        let mut val = [0u8; 1];
        let n = file.read(&mut val).map_err(|e| self.io_error(e))?;
        if n != val.len() {
            return Err(Error::ShortIo {
                path: self.path.clone(),
                op: "read",
                expected: val.len(),
                actual: n,
            });
        }
        Ok(val[0] == b'1')
    }

    fn validate(&self) -> Result<()> {
        match fs::metadata(&self.path) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::SysctlMissing {
                path: self.path.clone(),
            }),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn io_error(&self, source: io::Error) -> Error {
        Error::Sysctl {
            path: self.path.clone(),
            source,
        }
    }
}
