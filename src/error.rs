use std::path::PathBuf;

use thiserror::Error;

/// Failures of a single input device. None of these are fatal to the process: an open failure
/// skips the device, anything else ends the monitor that owns the handle.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("Failed to open {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read events: {0}")]
    Io(#[source] std::io::Error),

    #[error("Failed to wait for device readiness: {0}")]
    Poll(#[source] std::io::Error),

    #[error("Device handle is already closed")]
    Closed,
}

impl DeviceError {
    pub fn open(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Open {
            path: path.into(),
            source,
        }
    }
}
