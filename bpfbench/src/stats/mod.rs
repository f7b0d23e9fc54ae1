//! Turning kernel BPF run-time accounting on and off.
//!
//! Two mechanisms exist:
//! - **Scoped** (`BPF_ENABLE_STATS`, Linux 5.8+): accounting stays on while
//!   the returned fd is open. The kernel counts references, so closing ours
//!   never disables stats for anyone else.
//! - **Legacy** (`kernel.bpf_stats_enabled`): a global flag with no reference
//!   count. A process that only has this path can switch stats off under
//!   unrelated consumers. That race is inherent to such kernels.
//!
//! [`StatsEnabler::enable`] always writes the legacy flag as well, so
//! accounting is on even where the scoped path is missing or refused.

pub mod capability;
pub mod sysctl;

use std::sync::Arc;

use log::{debug, info, warn};

use crate::{
    error::{Error, Result},
    kernel::Kernel,
    settings::Settings,
};

use self::{capability::Capabilities, sysctl::SysctlFlag};

/// How accounting was turned on, and therefore how to turn it off.
#[derive(Debug)]
pub enum Accounting<T> {
    /// A scoped reference; releasing drops it.
    Scoped(T),
    /// Only the global flag; releasing writes `0`.
    Legacy(SysctlFlag),
}

impl<T> Accounting<T> {
    fn release(self) -> Result<()> {
        match self {
            Accounting::Scoped(token) => {
                drop(token);
                info!("BPF stats reference released");
                Ok(())
            }
            Accounting::Legacy(flag) => {
                flag.write(false)?;
                info!("BPF stats disabled via {}", flag.path().display());
                Ok(())
            }
        }
    }
}

/// Keeps accounting enabled until [`StatsGuard::disable`] is called or the
/// guard is dropped. Drop ignores (but logs) a failed disable.
#[must_use = "dropping the guard disables BPF stats immediately"]
#[derive(Debug)]
pub struct StatsGuard<T> {
    accounting: Option<Accounting<T>>,
}

impl<T> StatsGuard<T> {
    fn new(accounting: Accounting<T>) -> Self {
        Self {
            accounting: Some(accounting),
        }
    }

    pub fn is_scoped(&self) -> bool {
        matches!(self.accounting, Some(Accounting::Scoped(_)))
    }

    pub fn disable(mut self) -> Result<()> {
        match self.accounting.take() {
            Some(accounting) => accounting.release(),
            None => Ok(()),
        }
    }
}

impl<T> Drop for StatsGuard<T> {
    fn drop(&mut self) {
        if let Some(accounting) = self.accounting.take()
            && let Err(e) = accounting.release()
        {
            warn!("Failed to disable BPF stats: {}", e);
        }
    }
}

pub struct StatsEnabler<K: Kernel> {
    kernel: Arc<K>,
    capabilities: Arc<Capabilities>,
    flag: SysctlFlag,
}

impl<K: Kernel> Clone for StatsEnabler<K> {
    fn clone(&self) -> Self {
        Self {
            kernel: self.kernel.clone(),
            capabilities: self.capabilities.clone(),
            flag: self.flag.clone(),
        }
    }
}

impl<K: Kernel> StatsEnabler<K> {
    pub fn new(kernel: Arc<K>, capabilities: Arc<Capabilities>, flag: SysctlFlag) -> Self {
        Self {
            kernel,
            capabilities,
            flag,
        }
    }

    /// Uses the process-wide capability cache and the configured sysctl path.
    pub fn from_settings(kernel: Arc<K>, settings: &Settings) -> Self {
        Self::new(
            kernel,
            Capabilities::shared(),
            SysctlFlag::new(settings.sysctl_path()),
        )
    }

    pub fn flag(&self) -> &SysctlFlag {
        &self.flag
    }

    pub fn enable(&self) -> Result<StatsGuard<K::StatsToken>> {
        let mut token = None;

        if self.capabilities.scoped_stats(&*self.kernel) {
            match self.kernel.acquire_scoped_stats() {
                Ok(t) => token = Some(t),
                Err(Error::CapabilityUnsupported) => {
                    debug!("BPF_ENABLE_STATS refused; relying on sysctl flag");
                }
                Err(e) => return Err(e),
            }
        }

        // A no-op duplicate when the scoped reference already turned stats on.
        // On failure `token` is dropped here, releasing the reference.
        self.flag.write(true)?;

        let accounting = match token {
            Some(t) => {
                info!("BPF stats enabled (scoped)");
                Accounting::Scoped(t)
            }
            None => {
                info!("BPF stats enabled via {}", self.flag.path().display());
                Accounting::Legacy(self.flag.clone())
            }
        };
        Ok(StatsGuard::new(accounting))
    }

    pub fn is_stats_enabled(&self) -> Result<bool> {
        self.flag.read()
    }
}
