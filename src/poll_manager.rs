use polling::{Event, Events, PollMode, Poller};
use std::{
    collections::HashMap,
    io,
    os::fd::{BorrowedFd, RawFd},
    time::Duration,
};

/// Bounded-wait readiness over a set of fds, each registered under a caller-chosen key.
pub struct PollManager {
    poller: Poller,
    events: Events,
    sources: HashMap<usize, RawFd>,
}

impl PollManager {
    pub fn new() -> io::Result<Self> {
        Ok(Self {
            poller: Poller::new()?,
            events: Events::new(),
            sources: HashMap::new(),
        })
    }

    /// Watch `fd` for readability. Level-triggered, so a source stays ready until it is drained.
    ///
    /// The caller keeps `fd` open until it calls [`PollManager::remove`].
    pub fn subscribe(&mut self, key: usize, fd: RawFd) -> io::Result<()> {
        unsafe {
            self.poller
                .add_with_mode(fd, Event::readable(key), PollMode::Level)?;
        }
        self.sources.insert(key, fd);

        Ok(())
    }

    /// Remove a subscription. Unknown keys are ignored.
    pub fn remove(&mut self, key: usize) -> io::Result<()> {
        let Some(fd) = self.sources.remove(&key) else {
            return Ok(());
        };

        // # Safety
        //
        // `subscribe` requires the fd to stay open until it is removed here.
        let fd = unsafe { BorrowedFd::borrow_raw(fd) };
        self.poller.delete(fd)
    }

    /// Wait at most `timeout` and return the keys that became ready. An empty result is a
    /// timeout. A signal interrupting the wait also counts as one.
    pub fn wait(&mut self, timeout: Duration) -> io::Result<Vec<usize>> {
        self.events.clear();
        match self.poller.wait(&mut self.events, Some(timeout)) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(vec![]),
            Err(e) => return Err(e),
        }

        Ok(self.events.iter().map(|event| event.key).collect())
    }
}

impl Drop for PollManager {
    fn drop(&mut self) {
        let keys: Vec<usize> = self.sources.keys().copied().collect();
        for key in keys {
            let _ = self.remove(key);
        }
    }
}
