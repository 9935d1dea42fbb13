use std::{
    collections::VecDeque,
    io,
    os::fd::AsRawFd,
    path::{Path, PathBuf},
    time::Duration,
};

use evdev::Device;
use tracing::trace;

use crate::{decoder::RawEvent, error::DeviceError, poll_manager::PollManager};

/// An open input source. A handle is owned by exactly one monitor at a time.
pub trait EventSource: Send {
    fn name(&self) -> &str;

    fn path(&self) -> &Path;

    /// Wait at most `timeout` for the next event. `Ok(None)` means nothing arrived, which is the
    /// common case and not an error.
    fn read_event(&mut self, timeout: Duration) -> Result<Option<RawEvent>, DeviceError>;

    fn close(&mut self);
}

/// Owns a handle and closes it when dropped, whichever way the owner exits.
pub struct DeviceGuard {
    source: Box<dyn EventSource>,
}

impl DeviceGuard {
    pub fn new(source: Box<dyn EventSource>) -> Self {
        Self { source }
    }

    pub fn source_mut(&mut self) -> &mut dyn EventSource {
        &mut *self.source
    }
}

impl Drop for DeviceGuard {
    fn drop(&mut self) {
        trace!("Closing {}", self.source.path().display());
        self.source.close();
    }
}

/// The fd-backed record stream under an [`EvdevSource`].
pub trait EventReader: AsRawFd + Send {
    fn device_name(&self) -> Option<&str>;

    /// Append whatever one read returns. `WouldBlock` means nothing was ready.
    fn fetch_into(&mut self, pending: &mut VecDeque<RawEvent>) -> io::Result<()>;
}

impl EventReader for Device {
    fn device_name(&self) -> Option<&str> {
        self.name()
    }

    fn fetch_into(&mut self, pending: &mut VecDeque<RawEvent>) -> io::Result<()> {
        pending.extend(self.fetch_events()?.map(RawEvent::from));
        Ok(())
    }
}

const DEVICE_KEY: usize = 0;
const UNNAMED_DEVICE: &str = "Unknown device";

/// An evdev node opened from `/dev/input`. A fetch can return a whole batch; it is handed out
/// one event per read.
pub struct EvdevSource<D: EventReader = Device> {
    path: PathBuf,
    name: String,
    device: Option<D>,
    poll_manager: PollManager,
    pending: VecDeque<RawEvent>,
}

impl EvdevSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DeviceError> {
        let path = path.as_ref();
        let device = Device::open(path).map_err(|e| DeviceError::open(path, e))?;
        Self::with_reader(path, device)
    }
}

impl<D: EventReader> EvdevSource<D> {
    pub fn with_reader(path: impl AsRef<Path>, device: D) -> Result<Self, DeviceError> {
        let path = path.as_ref();
        let name = device.device_name().unwrap_or(UNNAMED_DEVICE).to_owned();

        let mut poll_manager = PollManager::new().map_err(|e| DeviceError::open(path, e))?;
        poll_manager
            .subscribe(DEVICE_KEY, device.as_raw_fd())
            .map_err(|e| DeviceError::open(path, e))?;

        Ok(Self {
            path: path.to_owned(),
            name,
            device: Some(device),
            poll_manager,
            pending: VecDeque::new(),
        })
    }

    fn fetch(&mut self) -> Result<(), DeviceError> {
        let device = self.device.as_mut().ok_or(DeviceError::Closed)?;
        match device.fetch_into(&mut self.pending) {
            Ok(()) => Ok(()),
            // Readiness can be spurious; an empty non-blocking read is not a failure.
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(DeviceError::Io(e)),
        }
    }
}

impl<D: EventReader> EventSource for EvdevSource<D> {
    fn name(&self) -> &str {
        &self.name
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn read_event(&mut self, timeout: Duration) -> Result<Option<RawEvent>, DeviceError> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }
        if self.device.is_none() {
            return Err(DeviceError::Closed);
        }

        let ready = self.poll_manager.wait(timeout).map_err(DeviceError::Poll)?;
        if !ready.contains(&DEVICE_KEY) {
            return Ok(None);
        }

        self.fetch()?;
        Ok(self.pending.pop_front())
    }

    fn close(&mut self) {
        // Deregister before the fd goes away with the device.
        let _ = self.poll_manager.remove(DEVICE_KEY);
        self.device = None;
        self.pending.clear();
    }
}

impl<D: EventReader> Drop for EvdevSource<D> {
    fn drop(&mut self) {
        self.close();
    }
}


#[cfg(test)]
mod tests {
    use super::fake::*;
    use super::*;
    use std::{
        io::{Read, Write},
        os::{fd::RawFd, unix::net::UnixStream},
    };

    const WAIT: Duration = Duration::from_millis(200);

    /// Turns every byte written to the peer socket into a key press with that code. A closed
    /// peer reads like an unplugged device.
    struct SocketReader {
        stream: UnixStream,
        spurious_wakeups: usize,
    }

    impl SocketReader {
        fn pair(spurious_wakeups: usize) -> (Self, UnixStream) {
            let (peer, stream) = UnixStream::pair().unwrap();
            stream.set_nonblocking(true).unwrap();
            let reader = Self {
                stream,
                spurious_wakeups,
            };
            (reader, peer)
        }
    }

    impl AsRawFd for SocketReader {
        fn as_raw_fd(&self) -> RawFd {
            self.stream.as_raw_fd()
        }
    }

    impl EventReader for SocketReader {
        fn device_name(&self) -> Option<&str> {
            Some("Socket Keyboard")
        }

        fn fetch_into(&mut self, pending: &mut VecDeque<RawEvent>) -> io::Result<()> {
            if self.spurious_wakeups > 0 {
                self.spurious_wakeups -= 1;
                return Err(io::ErrorKind::WouldBlock.into());
            }

            let mut buf = [0u8; 64];
            match self.stream.read(&mut buf)? {
                0 => Err(io::Error::from_raw_os_error(19)),
                n => {
                    pending.extend(buf[..n].iter().map(|&code| RawEvent::new(1, code.into(), 1)));
                    Ok(())
                }
            }
        }
    }

    #[test]
    fn test_guard_closes_once() {
        let (source, tally) = ScriptedSource::always_timing_out("kbd");
        let mut guard = DeviceGuard::new(Box::new(source));
        assert_eq!(guard.source_mut().name(), "kbd");
        assert!(guard
            .source_mut()
            .read_event(Duration::ZERO)
            .unwrap()
            .is_none());
        assert_eq!(tally.closes(), 0);

        drop(guard);
        assert_eq!(tally.closes(), 1);
    }

    #[test]
    fn test_open_missing_node() {
        let err = EvdevSource::open("/dev/input/does-not-exist").err().unwrap();
        assert!(matches!(err, DeviceError::Open { .. }));
        assert!(err.to_string().contains("/dev/input/does-not-exist"));
    }

    #[test]
    fn test_batch_is_handed_out_one_event_per_read() {
        let (reader, mut peer) = SocketReader::pair(0);
        let mut source = EvdevSource::with_reader("/dev/input/event3", reader).unwrap();
        assert_eq!(source.name(), "Socket Keyboard");

        peer.write_all(&[30, 31, 32]).unwrap();
        for code in [30, 31, 32] {
            let event = source.read_event(WAIT).unwrap().unwrap();
            assert_eq!(event.code, code);
        }
        // Batch drained and nothing new written.
        assert!(source.read_event(Duration::from_millis(10)).unwrap().is_none());
    }

    #[test]
    fn test_spurious_wakeup_is_a_timeout() {
        let (reader, mut peer) = SocketReader::pair(1);
        let mut source = EvdevSource::with_reader("/dev/input/event3", reader).unwrap();

        peer.write_all(&[30]).unwrap();
        assert!(source.read_event(WAIT).unwrap().is_none());
        assert_eq!(source.read_event(WAIT).unwrap().unwrap().code, 30);
    }

    #[test]
    fn test_hang_up_is_a_device_error() {
        let (reader, peer) = SocketReader::pair(0);
        let mut source = EvdevSource::with_reader("/dev/input/event3", reader).unwrap();

        drop(peer);
        assert!(matches!(source.read_event(WAIT), Err(DeviceError::Io(_))));
    }

    #[test]
    fn test_read_after_close() {
        let (reader, mut peer) = SocketReader::pair(0);
        let mut source = EvdevSource::with_reader("/dev/input/event3", reader).unwrap();

        // Buffered events are discarded with the handle.
        peer.write_all(&[30, 31]).unwrap();
        assert!(source.read_event(WAIT).unwrap().is_some());

        source.close();
        assert!(matches!(source.read_event(WAIT), Err(DeviceError::Closed)));

        source.close();
        assert!(matches!(source.read_event(WAIT), Err(DeviceError::Closed)));
    }
}
