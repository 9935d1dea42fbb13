use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, RecvTimeoutError},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, error, info, warn};

use crate::{
    decoder::Decoder,
    device::EventSource,
    monitor::{EventSink, ExitReason, Monitor, MonitorConfig, MonitorReport},
    udev_detector::DeviceRegistry,
};

/// Longest uninterrupted sleep while waiting between cycles.
const PAUSE_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    /// Wait before rediscovering when a cycle found nothing.
    pub discovery_retry_delay: Duration,
    /// Wait before rediscovering after every monitor of a cycle has finished.
    pub cycle_restart_delay: Duration,
    pub read_timeout: Duration,
    pub idle_pause: Duration,
    /// Give up on a discovery that takes longer than this. `None` waits forever.
    pub discovery_timeout: Option<Duration>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            discovery_retry_delay: Duration::from_secs(5),
            cycle_restart_delay: Duration::from_secs(1),
            read_timeout: Duration::from_millis(50),
            idle_pause: Duration::from_millis(3),
            discovery_timeout: Some(Duration::from_secs(10)),
        }
    }
}

impl SupervisorConfig {
    fn monitor(&self) -> MonitorConfig {
        MonitorConfig {
            read_timeout: self.read_timeout,
            idle_pause: self.idle_pause,
        }
    }
}

#[derive(Debug)]
pub enum CycleOutcome {
    NoDevices,
    /// Every monitor of the cycle reached its terminal state.
    Completed(Vec<MonitorReport>),
}

/// Runs discovery cycles: one monitor thread per device, all joined before the next discovery.
pub struct Supervisor<R> {
    registry: Arc<R>,
    decoder: Decoder,
    sink: Box<dyn EventSink>,
    config: SupervisorConfig,
    running: Arc<AtomicBool>,
    /// A discovery that outlived its timeout. It is awaited again instead of starting another.
    pending_discovery: Option<mpsc::Receiver<Vec<Box<dyn EventSource>>>>,
}

impl<R: DeviceRegistry> Supervisor<R> {
    pub fn new(
        registry: R,
        decoder: Decoder,
        sink: Box<dyn EventSink>,
        config: SupervisorConfig,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            registry: Arc::new(registry),
            decoder,
            sink,
            config,
            running,
            pending_discovery: None,
        }
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Loops until `running` is cleared.
    pub fn run(&mut self) {
        info!("Starting keyboard monitoring system...");

        while self.is_running() {
            match self.run_cycle() {
                CycleOutcome::NoDevices => {
                    info!(
                        "No keyboards found, retrying in {:?}...",
                        self.config.discovery_retry_delay
                    );
                    self.pause(self.config.discovery_retry_delay);
                }
                CycleOutcome::Completed(reports) => {
                    if !self.is_running() {
                        break;
                    }
                    info!(
                        "All {} monitors finished, restarting in {:?}...",
                        reports.len(),
                        self.config.cycle_restart_delay
                    );
                    self.pause(self.config.cycle_restart_delay);
                }
            }
        }

        info!("Keyboard monitoring system stopped");
    }

    /// Discover once and monitor everything found until the last monitor exits.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        let devices = self.discover();
        if devices.is_empty() {
            return CycleOutcome::NoDevices;
        }

        info!("Monitoring {} keyboards...", devices.len());
        let reports = thread::scope(|scope| {
            let handles: Vec<_> = devices
                .into_iter()
                .filter_map(|source| {
                    let monitor =
                        Monitor::new(source, &self.decoder, &*self.sink, self.config.monitor());
                    let name = monitor.device_name().to_owned();
                    let running = &*self.running;

                    // A failed spawn drops the monitor, which releases its handle.
                    match thread::Builder::new()
                        .name(format!("monitor {name}"))
                        .spawn_scoped(scope, move || monitor.run(running))
                    {
                        Ok(handle) => Some((name, handle)),
                        Err(e) => {
                            error!("Failed to start monitoring {name}: {e}");
                            None
                        }
                    }
                })
                .collect();

            handles
                .into_iter()
                .filter_map(|(name, handle)| match handle.join() {
                    Ok(report) => Some(report),
                    Err(_) => {
                        error!("Monitor for {name} panicked");
                        None
                    }
                })
                .collect::<Vec<_>>()
        });

        for report in &reports {
            match &report.exit {
                ExitReason::DeviceFailed(e) => info!(
                    "Lost {} at {} after {} events: {e}",
                    report.device_name,
                    report.path.display(),
                    report.events
                ),
                ExitReason::Stopped => debug!(
                    "Released {} at {} after {} events",
                    report.device_name,
                    report.path.display(),
                    report.events
                ),
            }
        }

        CycleOutcome::Completed(reports)
    }

    /// Runs the registry on a helper thread so a hung enumeration cannot stall the loop. At most
    /// one discovery is in flight; a late result is picked up by the next cycle.
    fn discover(&mut self) -> Vec<Box<dyn EventSource>> {
        let Some(timeout) = self.config.discovery_timeout else {
            return self.registry.discover();
        };

        let rx = match self.pending_discovery.take() {
            Some(rx) => {
                debug!("Waiting for the previous device discovery");
                rx
            }
            None => {
                let (tx, rx) = mpsc::channel();
                let registry = Arc::clone(&self.registry);
                let spawned = thread::Builder::new()
                    .name("discovery".to_owned())
                    .spawn(move || {
                        // The receiver is gone only if the supervisor is; the handles drop here.
                        let _ = tx.send(registry.discover());
                    });
                if let Err(e) = spawned {
                    warn!("Failed to start the discovery thread, discovering inline: {e}");
                    return self.registry.discover();
                }
                rx
            }
        };

        match rx.recv_timeout(timeout) {
            Ok(devices) => devices,
            Err(RecvTimeoutError::Timeout) => {
                error!("Device discovery did not finish within {timeout:?}");
                self.pending_discovery = Some(rx);
                vec![]
            }
            Err(RecvTimeoutError::Disconnected) => {
                error!("Device discovery exited without a result");
                vec![]
            }
        }
    }

    /// Sleep for `duration`, waking early once `running` is cleared.
    fn pause(&self, duration: Duration) {
        let deadline = Instant::now() + duration;
        while self.is_running() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(PAUSE_SLICE));
        }
    }
}
