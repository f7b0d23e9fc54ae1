use std::sync::Arc;

use log::info;
use once_cell::sync::{Lazy, OnceCell};

use crate::kernel::Kernel;

static SHARED: Lazy<Arc<Capabilities>> = Lazy::new(|| Arc::new(Capabilities::new()));

/// Kernel feature answers computed once and reused.
///
/// The process-wide instance comes from [`Capabilities::shared`]; tests build
/// their own so each starts unprobed.
#[derive(Debug, Default)]
pub struct Capabilities {
    scoped_stats: OnceCell<bool>,
}

impl Capabilities {
    pub const fn new() -> Self {
        Self {
            scoped_stats: OnceCell::new(),
        }
    }

    pub fn shared() -> Arc<Capabilities> {
        SHARED.clone()
    }

    /// Whether `BPF_ENABLE_STATS` exists. Probes `kernel` on first call only.
    pub fn scoped_stats<K: Kernel + ?Sized>(&self, kernel: &K) -> bool {
        *self.scoped_stats.get_or_init(|| {
            let supported = kernel.probe_scoped_stats();
            info!("BPF_ENABLE_STATS supported: {}", supported);
            supported
        })
    }

    /// The cached probe result, if the probe has run.
    pub fn probed_scoped_stats(&self) -> Option<bool> {
        self.scoped_stats.get().copied()
    }
}
