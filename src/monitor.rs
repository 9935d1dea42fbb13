use std::{
    io::Write,
    path::PathBuf,
    sync::atomic::{AtomicBool, Ordering},
    thread,
    time::Duration,
};

use tracing::{debug, error, trace};

use crate::{
    decoder::{DecodedEvent, Decoder, RawEvent},
    device::{DeviceGuard, EventSource},
    error::DeviceError,
};

/// Where decoded events go. Shared by every monitor of a cycle.
pub trait EventSink: Sync {
    fn emit(&self, event: &DecodedEvent);
}

/// One line per event on stdout.
pub struct StdoutSink;

impl EventSink for StdoutSink {
    fn emit(&self, event: &DecodedEvent) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{event}");
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    /// Upper bound for a single read.
    pub read_timeout: Duration,
    /// Pause after a read that returned nothing.
    pub idle_pause: Duration,
}

#[derive(Debug)]
pub enum MonitorState {
    Reading,
    Decoding(RawEvent),
    Idle,
    /// `None` when the monitor was asked to stop rather than failing.
    Closing(Option<DeviceError>),
    Closed,
}

#[derive(Debug)]
pub enum ExitReason {
    DeviceFailed(DeviceError),
    Stopped,
}

#[derive(Debug)]
pub struct MonitorReport {
    pub device_name: String,
    pub path: PathBuf,
    pub events: u64,
    pub exit: ExitReason,
}

/// Reads one device until it fails or `running` is cleared. A failure is final: the next
/// discovery cycle is the only retry.
pub struct Monitor<'a> {
    guard: Option<DeviceGuard>,
    device_name: String,
    path: PathBuf,
    decoder: &'a Decoder,
    sink: &'a dyn EventSink,
    config: MonitorConfig,
    state: MonitorState,
    events: u64,
    exit: Option<ExitReason>,
}

impl<'a> Monitor<'a> {
    pub fn new(
        source: Box<dyn EventSource>,
        decoder: &'a Decoder,
        sink: &'a dyn EventSink,
        config: MonitorConfig,
    ) -> Self {
        let device_name = source.name().to_owned();
        let path = source.path().to_path_buf();

        Self {
            guard: Some(DeviceGuard::new(source)),
            device_name,
            path,
            decoder,
            sink,
            config,
            state: MonitorState::Reading,
            events: 0,
            exit: None,
        }
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, MonitorState::Closed)
    }

    /// Advance the state machine by one transition.
    pub fn step(&mut self, running: &AtomicBool) {
        let state = std::mem::replace(&mut self.state, MonitorState::Closed);
        self.state = match state {
            MonitorState::Reading => self.read(running),
            MonitorState::Decoding(event) => {
                trace!("{} event stamped {:?}", self.device_name, event.timestamp);
                let decoded = self.decoder.decode(&self.device_name, &event);
                self.sink.emit(&decoded);
                self.events += 1;
                MonitorState::Reading
            }
            MonitorState::Idle => {
                if !self.config.idle_pause.is_zero() {
                    thread::sleep(self.config.idle_pause);
                }
                MonitorState::Reading
            }
            MonitorState::Closing(err) => {
                self.exit = Some(match err {
                    Some(e) => {
                        error!("Device {} error: {e}", self.device_name);
                        ExitReason::DeviceFailed(e)
                    }
                    None => {
                        debug!("Stopped monitoring {}", self.device_name);
                        ExitReason::Stopped
                    }
                });
                // Dropping the guard releases the handle.
                self.guard = None;
                MonitorState::Closed
            }
            MonitorState::Closed => MonitorState::Closed,
        };
    }

    fn read(&mut self, running: &AtomicBool) -> MonitorState {
        if !running.load(Ordering::SeqCst) {
            return MonitorState::Closing(None);
        }
        let Some(guard) = self.guard.as_mut() else {
            return MonitorState::Closing(Some(DeviceError::Closed));
        };

        match guard.source_mut().read_event(self.config.read_timeout) {
            Ok(Some(event)) => MonitorState::Decoding(event),
            Ok(None) => {
                trace!("No event from {}", self.device_name);
                MonitorState::Idle
            }
            Err(e) => MonitorState::Closing(Some(e)),
        }
    }

    pub fn run(mut self, running: &AtomicBool) -> MonitorReport {
        while !self.is_closed() {
            self.step(running);
        }

        MonitorReport {
            device_name: self.device_name,
            path: self.path,
            events: self.events,
            exit: self.exit.unwrap_or(ExitReason::Stopped),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::fake::*;
    use super::*;
    use crate::device::fake::{ScriptedSource, Step};

    #[test]
    fn test_timeouts_never_emit_or_close() {
        let decoder = Decoder::default();
        let sink = CollectingSink::default();
        let running = AtomicBool::new(true);
        let (source, tally) = ScriptedSource::always_timing_out("Quiet Keyboard");

        let mut monitor = Monitor::new(Box::new(source), &decoder, &sink, FAST);
        for _ in 0..1000 {
            monitor.step(&running);
            assert!(!monitor.is_closed());
        }

        assert_eq!(sink.len(), 0);
        assert_eq!(tally.reads(), 500);
        assert_eq!(tally.closes(), 0);
    }

    #[test]
    fn test_device_error_ends_monitor() {
        let decoder = Decoder::default();
        let sink = CollectingSink::default();
        let running = AtomicBool::new(true);
        // The fourth read fails.
        let (source, tally) = ScriptedSource::failing_after("Flaky Keyboard", 3);

        let report = Monitor::new(Box::new(source), &decoder, &sink, FAST).run(&running);

        assert_eq!(report.events, 3);
        assert_eq!(sink.len(), 3);
        assert_eq!(report.device_name, "Flaky Keyboard");
        assert!(matches!(
            report.exit,
            ExitReason::DeviceFailed(DeviceError::Io(_))
        ));
        assert_eq!(tally.reads(), 4);
        assert_eq!(tally.closes(), 1);
    }

    #[test]
    fn test_failure_on_first_read() {
        let decoder = Decoder::default();
        let sink = CollectingSink::default();
        let running = AtomicBool::new(true);
        let (source, tally) = ScriptedSource::failing_after("Dead Keyboard", 0);

        let report = Monitor::new(Box::new(source), &decoder, &sink, FAST).run(&running);

        assert_eq!(report.events, 0);
        assert_eq!(sink.len(), 0);
        assert_eq!(tally.closes(), 1);
    }

    #[test]
    fn test_events_are_decoded_in_order() {
        let decoder = Decoder::default();
        let sink = CollectingSink::default();
        let running = AtomicBool::new(true);
        let script = vec![
            Step::Event(RawEvent::new(1, 30, 1)),
            Step::Timeout,
            Step::Event(RawEvent::new(1, 30, 2)),
            Step::Event(RawEvent::new(1, 30, 0)),
        ];
        let (source, tally) = ScriptedSource::new("Test Keyboard", script, || Step::Fail);

        Monitor::new(Box::new(source), &decoder, &sink, FAST).run(&running);

        assert_eq!(
            sink.lines(),
            vec![
                "Device: Test Keyboard - Key Event: KEY_A PRESSED",
                "Device: Test Keyboard - Key Event: KEY_A REPEAT",
                "Device: Test Keyboard - Key Event: KEY_A RELEASED",
            ]
        );
        assert_eq!(tally.closes(), 1);
    }

    #[test]
    fn test_stop_releases_handle() {
        let decoder = Decoder::default();
        let sink = CollectingSink::default();
        let running = AtomicBool::new(true);
        let (source, tally) = ScriptedSource::always_timing_out("Quiet Keyboard");

        let mut monitor = Monitor::new(Box::new(source), &decoder, &sink, FAST);
        monitor.step(&running);
        assert!(matches!(monitor.state, MonitorState::Idle));

        running.store(false, Ordering::SeqCst);
        let report = monitor.run(&running);

        assert!(matches!(report.exit, ExitReason::Stopped));
        assert_eq!(tally.reads(), 1);
        assert_eq!(tally.closes(), 1);
    }

    #[test]
    fn test_drop_releases_handle() {
        let decoder = Decoder::default();
        let sink = CollectingSink::default();
        let (source, tally) = ScriptedSource::always_timing_out("Quiet Keyboard");

        let monitor = Monitor::new(Box::new(source), &decoder, &sink, FAST);
        assert_eq!(monitor.device_name(), "Quiet Keyboard");
        drop(monitor);

        assert_eq!(tally.closes(), 1);
    }
}
