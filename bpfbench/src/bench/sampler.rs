//! Continuous per-program stats streaming.
//!
//! One spawned task owns the [`ProgramRegistry`] and wakes on three sources:
//! cancellation, registrations, and the sample tick. On each wake it looks at
//! them in that order, so a registration queued before a tick fires is part of
//! that tick's snapshot.
//!
//! ## Concurrency contract
//! - The event channel holds one event. The loop waits on each send, so a
//!   slow or absent consumer throttles sampling and delays pending
//!   registrations. Cancellation is still observed while waiting.
//! - The error channel holds one error. An error arriving while the previous
//!   one is still queued is logged and dropped.
//! - Snapshot reads have no timeout; a stuck read stalls its tick.
//! - Shutdown happens once: accounting is disabled, both channels close, and
//!   the task ends. Dropping the event receiver also shuts the loop down.

use std::{
    os::fd::{AsFd, AsRawFd, RawFd},
    sync::Arc,
    time::Duration,
};

use chrono::Utc;
use log::{debug, info, warn};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    bench::registry::{ProgramRegistry, ProgramStats},
    error::{Error, Result},
    kernel::Kernel,
    settings::Settings,
    stats::{StatsEnabler, StatsGuard},
};

/// One sample of every registered program.
#[derive(Debug, Clone)]
pub struct PeriodicStatsEvent {
    pub stats: ProgramStats,
    /// Wall clock, seconds since the Unix epoch.
    pub timestamp: i64,
}

#[derive(Debug)]
struct Registration {
    fd: RawFd,
    name: String,
}

/// Sends registrations to a running sampler. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Registrar {
    tx: mpsc::UnboundedSender<Registration>,
}

impl Registrar {
    /// Queues `fd` for sampling under `name` (empty to use the kernel's name).
    pub fn register(&self, fd: RawFd, name: impl Into<String>) -> Result<()> {
        self.tx
            .send(Registration {
                fd,
                name: name.into(),
            })
            .map_err(|_| Error::SamplerStopped)
    }

    /// Same as [`Registrar::register`] for a borrowed program fd, such as an
    /// aya `ProgramFd`. The fd must stay open while it is sampled.
    pub fn register_fd(&self, fd: impl AsFd, name: impl Into<String>) -> Result<()> {
        self.register(fd.as_fd().as_raw_fd(), name)
    }
}

/// Output side of a running sampler. Both receivers yield `None` after shutdown.
#[derive(Debug)]
pub struct StatsStreams {
    pub events: mpsc::Receiver<PeriodicStatsEvent>,
    pub errors: mpsc::Receiver<Error>,
}

#[derive(Debug)]
pub struct SamplerHandle {
    registrar: Registrar,
    task: JoinHandle<()>,
}

impl SamplerHandle {
    pub fn registrar(&self) -> Registrar {
        self.registrar.clone()
    }

    pub fn register(&self, fd: RawFd, name: impl Into<String>) -> Result<()> {
        self.registrar.register(fd, name)
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the loop to finish its shutdown.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            warn!("Stats sampler task failed: {}", e);
        }
    }
}

pub struct StreamingSampler<K: Kernel> {
    kernel: Arc<K>,
    enabler: StatsEnabler<K>,
    interval: Duration,
}

impl<K: Kernel> StreamingSampler<K> {
    pub fn new(kernel: Arc<K>, settings: &Settings) -> Self {
        let enabler = StatsEnabler::from_settings(kernel.clone(), settings);
        Self::with_enabler(kernel, enabler, settings.sample_interval())
    }

    pub fn with_enabler(kernel: Arc<K>, enabler: StatsEnabler<K>, interval: Duration) -> Self {
        Self {
            kernel,
            enabler,
            interval,
        }
    }

    /// Enables accounting and spawns the sampling loop on the current tokio
    /// runtime. The first sample is taken one interval after start.
    ///
    /// If accounting cannot be enabled nothing is spawned and the cause is
    /// returned as [`Error::Startup`].
    pub fn start(self, cancel: CancellationToken) -> Result<(SamplerHandle, StatsStreams)> {
        let guard = self.enabler.enable().map_err(|e| {
            warn!("Stats sampler not started: {}", e);
            Error::Startup(Box::new(e))
        })?;

        let (reg_tx, reg_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(1);
        let (error_tx, error_rx) = mpsc::channel(1);

        let sampler = SamplerLoop {
            kernel: self.kernel,
            registry: ProgramRegistry::new(),
            guard,
            registrations: reg_rx,
            events: event_tx,
            errors: error_tx,
            interval: self.interval,
            cancel,
        };
        info!("Stats sampler started (interval={:?})", self.interval);
        let task = tokio::spawn(sampler.run());

        Ok((
            SamplerHandle {
                registrar: Registrar { tx: reg_tx },
                task,
            },
            StatsStreams {
                events: event_rx,
                errors: error_rx,
            },
        ))
    }
}

enum Flow {
    Continue,
    Stop,
}

struct SamplerLoop<K: Kernel> {
    kernel: Arc<K>,
    registry: ProgramRegistry,
    guard: StatsGuard<K::StatsToken>,
    registrations: mpsc::UnboundedReceiver<Registration>,
    events: mpsc::Sender<PeriodicStatsEvent>,
    errors: mpsc::Sender<Error>,
    interval: Duration,
    cancel: CancellationToken,
}

impl<K: Kernel> SamplerLoop<K> {
    async fn run(mut self) {
        let mut ticker = time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let flow = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => Flow::Stop,
                Some(registration) = self.registrations.recv() => {
                    debug!("Registered program fd={} name={:?}", registration.fd, registration.name);
                    self.registry.register(registration.fd, registration.name);
                    Flow::Continue
                }
                _ = ticker.tick() => self.sample().await,
            };
            if let Flow::Stop = flow {
                break;
            }
        }

        self.shutdown();
    }

    async fn sample(&mut self) -> Flow {
        let stats = match self.registry.snapshot_all(&*self.kernel) {
            Ok(stats) => stats,
            Err(e) => {
                self.report(e);
                return Flow::Continue;
            }
        };
        debug!("Sampled {} programs", stats.len());

        let event = PeriodicStatsEvent {
            stats,
            timestamp: Utc::now().timestamp(),
        };
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Flow::Stop,
            sent = self.events.send(event) => match sent {
                Ok(()) => Flow::Continue,
                Err(_) => {
                    info!("Stats consumer went away; stopping sampler");
                    Flow::Stop
                }
            },
        }
    }

    fn report(&self, err: Error) {
        match self.errors.try_send(err) {
            Ok(()) => {}
            Err(TrySendError::Full(err)) => {
                warn!("Dropping stats error, previous one not drained: {}", err);
            }
            Err(TrySendError::Closed(err)) => debug!("No error consumer: {}", err),
        }
    }

    fn shutdown(self) {
        let SamplerLoop { guard, errors, .. } = self;
        if let Err(e) = guard.disable()
            && let Err(TrySendError::Full(e) | TrySendError::Closed(e)) = errors.try_send(e)
        {
            warn!("Failed to disable BPF stats: {}", e);
        }
        info!("Stats sampler stopped");
        // Dropping the senders closes both output channels.
    }
}

#[cfg(test)]
mod tests {
    use serial_test::serial;

    use super::*;
    use crate::{
        stats::{capability::Capabilities, sysctl::SysctlFlag},
        testing::{FakeKernel, ScopedMode, settings_with_sysctl, sysctl_file},
    };

    const TICK: Duration = Duration::from_secs(1);

    fn sampler(mode: ScopedMode, flag: SysctlFlag) -> (Arc<FakeKernel>, StreamingSampler<FakeKernel>) {
        let kernel = Arc::new(FakeKernel::new(mode));
        let enabler = StatsEnabler::new(kernel.clone(), Arc::new(Capabilities::new()), flag);
        let sampler = StreamingSampler::with_enabler(kernel.clone(), enabler, TICK);
        (kernel, sampler)
    }

    #[tokio::test(start_paused = true)]
    async fn test_registered_programs_are_in_next_tick() {
        let (_file, flag) = sysctl_file("0");
        let (kernel, sampler) = sampler(ScopedMode::Supported, flag);
        kernel.load(3, "a", 10, 100);
        kernel.load(4, "b", 20, 200);

        let cancel = CancellationToken::new();
        let (handle, mut streams) = sampler.start(cancel.clone()).unwrap();
        handle.register(3, "first").unwrap();
        handle.register(4, "").unwrap();

        let event = streams.events.recv().await.unwrap();
        assert_eq!(event.stats.keys().copied().collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(event.stats[&3].run_count, 10);
        assert_eq!(event.stats[&4].run_time, Duration::from_nanos(200));
        assert!(event.timestamp > 0);

        kernel.run(3, 5, 50);
        let event = streams.events.recv().await.unwrap();
        assert_eq!(event.stats[&3].run_count, 15);

        cancel.cancel();
        handle.join().await;
        assert_eq!(kernel.active_tokens(), 0);
    }

    #[tokio::test(start_paused = true)]
    #[serial]
    async fn test_sampler_from_settings_streams_registered_fd() {
        let (_file, flag, settings) = settings_with_sysctl("0");
        let kernel = Arc::new(FakeKernel::new(ScopedMode::Supported));
        let sampler = StreamingSampler::new(kernel.clone(), &settings);

        let prog = tempfile::tempfile().unwrap();
        let fd = prog.as_raw_fd();
        kernel.load(fd, "kprobe_open", 3, 30);

        let cancel = CancellationToken::new();
        let (handle, mut streams) = sampler.start(cancel.clone()).unwrap();
        assert!(flag.read().unwrap());
        handle.registrar().register_fd(&prog, "open").unwrap();

        let event = streams.events.recv().await.unwrap();
        assert_eq!(event.stats.keys().copied().collect::<Vec<_>>(), vec![fd]);
        assert_eq!(event.stats[&fd].run_count, 3);

        cancel.cancel();
        handle.join().await;
        assert_eq!(kernel.active_tokens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_registry_emits_empty_events() {
        let (_file, flag) = sysctl_file("0");
        let (_kernel, sampler) = sampler(ScopedMode::Supported, flag);

        let cancel = CancellationToken::new();
        let (handle, mut streams) = sampler.start(cancel.clone()).unwrap();

        let event = streams.events.recv().await.unwrap();
        assert!(event.stats.is_empty());

        cancel.cancel();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_enable_failure_prevents_start() {
        let dir = tempfile::tempdir().unwrap();
        let (kernel, sampler) = sampler(ScopedMode::Unsupported, SysctlFlag::new(dir.path().join("missing")));

        match sampler.start(CancellationToken::new()) {
            Err(Error::Startup(cause)) => {
                assert!(matches!(*cause, Error::SysctlMissing { .. }));
            }
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("sampler started without accounting"),
        }
        assert_eq!(kernel.active_tokens(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_failure_does_not_stop_stream() {
        let (_file, flag) = sysctl_file("0");
        let (kernel, sampler) = sampler(ScopedMode::Supported, flag);
        kernel.load(3, "a", 1, 10);
        kernel.load(4, "b", 1, 10);

        let cancel = CancellationToken::new();
        let (handle, mut streams) = sampler.start(cancel.clone()).unwrap();
        handle.register(3, "").unwrap();
        handle.register(4, "").unwrap();

        for _ in 0..2 {
            let event = streams.events.recv().await.unwrap();
            assert_eq!(event.stats.len(), 2);
        }

        kernel.fail(4);
        let err = streams.errors.recv().await.unwrap();
        assert!(matches!(err, Error::Query { fd: 4, .. }));
        kernel.heal(4);

        let event = streams.events.recv().await.unwrap();
        assert_eq!(event.stats.keys().copied().collect::<Vec<_>>(), vec![3, 4]);
        assert!(streams.errors.try_recv().is_err());

        cancel.cancel();
        handle.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_undrained_error_is_dropped() {
        let (_file, flag) = sysctl_file("0");
        let (kernel, sampler) = sampler(ScopedMode::Supported, flag);
        kernel.load(3, "a", 1, 10);
        kernel.fail(3);

        let cancel = CancellationToken::new();
        let (handle, mut streams) = sampler.start(cancel.clone()).unwrap();
        handle.register(3, "").unwrap();

        time::sleep(TICK * 3 + Duration::from_millis(100)).await;
        cancel.cancel();
        handle.join().await;

        assert!(matches!(streams.errors.recv().await, Some(Error::Query { fd: 3, .. })));
        assert!(streams.errors.recv().await.is_none());
        assert!(streams.events.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_idle_closes_outputs_once() {
        let (_file, flag) = sysctl_file("0");
        let (kernel, sampler) = sampler(ScopedMode::Unsupported, flag.clone());

        let cancel = CancellationToken::new();
        let (handle, mut streams) = sampler.start(cancel.clone()).unwrap();
        let registrar = handle.registrar();
        assert!(flag.read().unwrap());

        cancel.cancel();
        handle.join().await;

        assert!(streams.events.recv().await.is_none());
        assert!(streams.errors.recv().await.is_none());
        assert!(!flag.read().unwrap());
        assert_eq!(kernel.probe_count(), 1);

        // Nothing more arrives, and late registrations are refused.
        time::sleep(TICK * 5).await;
        assert!(streams.events.recv().await.is_none());
        assert!(matches!(registrar.register(3, "late"), Err(Error::SamplerStopped)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_blocked_on_consumer() {
        let (_file, flag) = sysctl_file("0");
        let (kernel, sampler) = sampler(ScopedMode::Supported, flag);

        let cancel = CancellationToken::new();
        let (handle, streams) = sampler.start(cancel.clone()).unwrap();

        // Nobody reads: first event fills the buffer, second send blocks.
        time::sleep(TICK * 3).await;
        assert!(!handle.is_finished());

        cancel.cancel();
        handle.join().await;
        assert_eq!(kernel.active_tokens(), 0);
        drop(streams);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_consumer_stops_sampler() {
        let (_file, flag) = sysctl_file("0");
        let (kernel, sampler) = sampler(ScopedMode::Supported, flag);

        let (handle, streams) = sampler.start(CancellationToken::new()).unwrap();
        drop(streams);

        handle.join().await;
        assert_eq!(kernel.active_tokens(), 0);
    }
}
