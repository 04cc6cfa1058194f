//! The reader thread: pulls lines from the device, parses, packages, sends to the consumer

use std::sync::mpsc::{Receiver, RecvTimeoutError, SyncSender, TryRecvError};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};
use wxlog_core::{PacketBuilder, StreamFormat, WeatherPacket};

use crate::{LineSource, PortError};

pub type PacketSender = mpsc::UnboundedSender<WeatherPacket>;
pub type PacketReceiver = mpsc::UnboundedReceiver<WeatherPacket>;

/// Hand-off from the reader thread to the consumer.
///
/// Unbounded: the reader is paced by the device, and a blocked send would
/// stall reads and hide terminate requests.
pub fn create_packet_channel() -> (PacketSender, PacketReceiver) {
    mpsc::unbounded_channel()
}

/// Create a single-slot, auto-resetting signal.
///
/// Setting an already-set signal is a no-op; observing it clears it.
pub fn signal() -> (SignalTrigger, SignalListener) {
    let (tx, rx) = std::sync::mpsc::sync_channel(1);
    (SignalTrigger(tx), SignalListener(rx))
}

#[derive(Debug, Clone)]
pub struct SignalTrigger(SyncSender<()>);

impl SignalTrigger {
    pub fn set(&self) {
        // Full means already set; disconnected means nobody is listening.
        let _ = self.0.try_send(());
    }
}

/// Receiving side of [`signal`]. A dropped trigger reads as set.
#[derive(Debug)]
pub struct SignalListener(Receiver<()>);

impl SignalListener {
    /// Wait up to `timeout` for the signal
    pub fn wait(&self, timeout: Duration) -> bool {
        match self.0.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        }
    }

    /// Check without blocking
    pub fn is_set(&self) -> bool {
        match self.0.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => true,
            Err(TryRecvError::Empty) => false,
        }
    }
}

/// Polling intervals used by the reader
#[derive(Debug, Clone, Copy)]
pub struct ReaderTimings {
    /// Upper bound on one device read
    pub read_timeout: Duration,
    /// Start signal poll while awaiting start
    pub start_poll: Duration,
    /// Terminate signal poll, once per loop iteration
    pub terminate_poll: Duration,
}

impl Default for ReaderTimings {
    fn default() -> Self {
        Self {
            read_timeout: Duration::from_secs(1),
            start_poll: Duration::from_secs(1),
            terminate_poll: Duration::from_millis(10),
        }
    }
}

pub(crate) struct Reader {
    pub(crate) source: Box<dyn LineSource>,
    pub(crate) builder: PacketBuilder,
    pub(crate) packets: PacketSender,
    pub(crate) format: StreamFormat,
    pub(crate) hour_offset: f64,
    pub(crate) timings: ReaderTimings,
    pub(crate) start: SignalListener,
    pub(crate) terminate: SignalListener,
}

impl Reader {
    /// Thread body. `token` is held until the reader is done with the device;
    /// dropping it (including by unwinding) tells the pipeline the reader has exited.
    ///
    /// Returns the sequence number of the last packet built.
    pub(crate) fn run(mut self, token: oneshot::Sender<()>) -> Result<u32, PortError> {
        let result = self.await_start().and_then(|started| {
            if !started {
                return Ok(0);
            }
            self.source.open()?;
            let result = self.read_lines();
            self.source.close();
            result
        });
        drop(token);
        result
    }

    fn await_start(&self) -> Result<bool, PortError> {
        loop {
            let started = self.start.wait(self.timings.start_poll);
            if self.terminate.wait(self.timings.terminate_poll) {
                info!("Terminated before reading started");
                return Ok(false);
            }
            if started {
                return Ok(true);
            }
        }
    }

    fn read_lines(&mut self) -> Result<u32, PortError> {
        let handle = self.source.handle();
        info!(
            device = self.source.name(),
            format = %self.format,
            channel = self.builder.channel_id(),
            "Reading"
        );

        loop {
            if !handle.is_open() {
                warn!(device = self.source.name(), "Device closed, reader exiting");
                break;
            }
            if self.terminate.wait(self.timings.terminate_poll) {
                debug!("Terminate requested");
                break;
            }

            let line = match self.source.read_line(self.timings.read_timeout) {
                Ok(Some(line)) => line,
                Ok(None) => continue,
                Err(PortError::NotOpen(_)) if !handle.is_open() => continue,
                Err(e) => return Err(e),
            };

            // Terminate arrived while the read was in flight: this is the final packet.
            let last = self.terminate.is_set();

            let record = match self.format.parse_line(&line, self.hour_offset) {
                Ok(record) => record,
                Err(e) => {
                    debug!(error = %e, field = ?e.field(), "Could not parse line");
                    None
                }
            };
            let packet = self.builder.build(&line, record, last);
            let sequence = packet.sequence();

            // A forced shutdown closes the device before draining; nothing reads after that.
            if !handle.is_open() {
                debug!(sequence, "Device closed during read, discarding packet");
                break;
            }
            if self.packets.send(packet).is_err() {
                debug!(sequence, "Consumer has stopped, discarding packet");
                break;
            }
            trace!(sequence, last, "Queued packet");

            if last {
                break;
            }
        }

        Ok(self.builder.sequence())
    }
}
