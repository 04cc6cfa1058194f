//! Serial ingestion for wxlog
//!
//! A dedicated reader thread pulls lines from a [`LineSource`], parses and
//! packages them, and hands packets to an [`IngestPipeline`] which forwards
//! them to the output queue and owns the shutdown protocol.

pub mod fixed;
pub mod pipeline;
pub mod reader;
pub mod serial;

pub use fixed::*;
pub use pipeline::*;
pub use reader::*;
pub use serial::*;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use wxlog_core::SinkError;

#[derive(Debug, Error)]
pub enum PortError {
    #[error("Could not open {port}: {reason}")]
    Open { port: String, reason: String },

    #[error("Port {0} is not open")]
    NotOpen(String),

    #[error("Unsupported serial setting for {port}: {setting}")]
    Unsupported { port: String, setting: String },

    #[error("Read from {port} failed: {source}")]
    Read {
        port: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Port(#[from] PortError),

    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("Reader did not exit within {0:?}")]
    ShutdownTimeout(Duration),

    #[error("Could not start the reader thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("Reader thread panicked")]
    ReaderPanicked,

    #[error("Reader has not been started")]
    NotStarted,

    #[error("Reader has already been started")]
    AlreadyStarted,
}

pub type IngestResult<T> = Result<T, IngestError>;

/// Shared open/closed marker for a device.
///
/// The reader thread owns the device itself; the pipeline keeps a handle so
/// it can close the device even when the reader is stuck in a read.
#[derive(Debug, Clone, Default)]
pub struct DeviceHandle {
    open: Arc<AtomicBool>,
}

impl DeviceHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    pub fn set_open(&self) {
        self.open.store(true, Ordering::SeqCst);
    }

    /// Mark the device closed. Returns whether it was open.
    pub fn close(&self) -> bool {
        self.open.swap(false, Ordering::SeqCst)
    }
}

/// Blocking, line-oriented device
pub trait LineSource: Send {
    /// Device name for logging
    fn name(&self) -> &str;

    fn open(&mut self) -> Result<(), PortError>;

    /// Read one newline-terminated line, without the `\n`.
    ///
    /// Returns `Ok(None)` if no complete line arrived within `timeout`.
    /// Fails with [`PortError::NotOpen`] once the device is closed.
    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, PortError>;

    fn close(&mut self);

    fn handle(&self) -> DeviceHandle;
}

impl<T: LineSource + ?Sized> LineSource for Box<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn open(&mut self) -> Result<(), PortError> {
        (**self).open()
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, PortError> {
        (**self).read_line(timeout)
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn handle(&self) -> DeviceHandle {
        (**self).handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_handle_shared() {
        let handle = DeviceHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_open());

        handle.set_open();
        assert!(clone.is_open());

        assert!(clone.close());
        assert!(!handle.is_open());
        assert!(!handle.close());
    }
}
