use std::{
    io::{self, Write},
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{Context, Result as Anyhow};
use clap::Parser;
use decoder::Decoder;
use device::EventSource;
use monitor::StdoutSink;
use supervisor::{Supervisor, SupervisorConfig};
use udev_detector::{DeviceRegistry, KeyboardUdevDetector, Selection};

mod decoder;
mod device;
mod error;
mod monitor;
mod poll_manager;
mod supervisor;
mod symbols;
mod udev_detector;

#[derive(Parser)]
#[command(name = "kbdwatch")]
#[command(about = "Print the key events of every attached keyboard")]
struct Cli {
    /// List the matching keyboards and exit
    #[arg(long)]
    list: bool,

    /// Monitor this event node instead of discovering keyboards (repeatable)
    #[arg(short, long = "device", value_name = "PATH")]
    devices: Vec<PathBuf>,

    /// Name fragment that marks a device as a keyboard (repeatable, default: keyboard, kbd)
    #[arg(short, long = "keyword", value_name = "WORD")]
    keywords: Vec<String>,

    /// Upper bound for a single device read [default: 50]
    #[arg(long, value_name = "MS")]
    read_timeout_ms: Option<u64>,

    /// Pause after a read that returned nothing [default: 3]
    #[arg(long, value_name = "MS")]
    idle_pause_ms: Option<u64>,

    /// Wait before rediscovering when no keyboard was found [default: 5000]
    #[arg(long, value_name = "MS")]
    retry_delay_ms: Option<u64>,

    /// Wait before rediscovering after every keyboard was lost [default: 1000]
    #[arg(long, value_name = "MS")]
    restart_delay_ms: Option<u64>,

    /// Give up on a device scan after this long, 0 waits forever [default: 10000]
    #[arg(long, value_name = "MS")]
    discovery_timeout_ms: Option<u64>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Cli {
    fn selection(&self) -> Selection {
        if !self.devices.is_empty() {
            Selection::Paths(self.devices.clone())
        } else if !self.keywords.is_empty() {
            Selection::Keywords(self.keywords.clone())
        } else {
            Selection::default()
        }
    }

    fn config(&self) -> SupervisorConfig {
        let defaults = SupervisorConfig::default();
        let millis_or = |ms: Option<u64>, default: Duration| ms.map_or(default, Duration::from_millis);

        SupervisorConfig {
            discovery_retry_delay: millis_or(self.retry_delay_ms, defaults.discovery_retry_delay),
            cycle_restart_delay: millis_or(self.restart_delay_ms, defaults.cycle_restart_delay),
            read_timeout: millis_or(self.read_timeout_ms, defaults.read_timeout),
            idle_pause: millis_or(self.idle_pause_ms, defaults.idle_pause),
            discovery_timeout: match self.discovery_timeout_ms {
                Some(0) => None,
                Some(ms) => Some(Duration::from_millis(ms)),
                None => defaults.discovery_timeout,
            },
        }
    }
}

/// Product output of `--list`; log lines go to stderr.
fn print_listing(out: &mut impl Write, found: &[Box<dyn EventSource>]) -> io::Result<()> {
    for source in found {
        writeln!(out, "Found keyboard: {} at {}", source.name(), source.path().display())?;
    }
    writeln!(out, "{} keyboards found", found.len())
}

fn main() -> Anyhow<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    if cli.read_timeout_ms == Some(0) {
        anyhow::bail!("--read-timeout-ms must be positive");
    }

    let selection = cli.selection();
    if matches!(selection, Selection::Keywords(_)) {
        KeyboardUdevDetector::check_access().with_context(|| "Cannot access the input subsystem")?;
    }
    let detector = KeyboardUdevDetector::new(selection);

    if cli.list {
        let found = detector.discover();
        print_listing(&mut io::stdout().lock(), &found)
            .with_context(|| "Failed to write the keyboard list")?;
        return Ok(());
    }

    let running = Arc::new(AtomicBool::new(true));
    let running_clone = Arc::clone(&running);
    ctrlc::set_handler(move || {
        running_clone.store(false, Ordering::SeqCst);
    })
    .with_context(|| "Failed to install the interrupt handler")?;

    let mut supervisor = Supervisor::new(
        detector,
        Decoder::default(),
        Box::new(StdoutSink),
        cli.config(),
        running,
    );
    supervisor.run();

    Ok(())
}
