use std::time::Duration;

use crate::sys::BpfProgInfo;

/// Point-in-time stats counters of one attached program, as the kernel
/// reports them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerStatSnapshot {
    /// Kernel-side program name; may differ from the name it was registered under.
    pub name: String,
    pub run_count: u64,
    pub run_time: Duration,
}

impl HandlerStatSnapshot {
    pub fn new(name: impl Into<String>, run_count: u64, run_time: Duration) -> Self {
        Self {
            name: name.into(),
            run_count,
            run_time,
        }
    }
}

impl From<&BpfProgInfo> for HandlerStatSnapshot {
    fn from(info: &BpfProgInfo) -> Self {
        Self {
            name: name_from_c_buf(&info.name),
            run_count: info.run_cnt,
            run_time: Duration::from_nanos(info.run_time_ns),
        }
    }
}

/// Reads a fixed-size, possibly NUL-terminated name buffer.
pub fn name_from_c_buf(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}
