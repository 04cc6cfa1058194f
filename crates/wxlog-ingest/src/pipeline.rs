//! Consumer side of the ingestion pipeline and the shutdown protocol

use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, trace, warn};
use wxlog_core::{PacketBuilder, QueueSink, StreamFormat, WeatherPacket};

use crate::reader::{
    create_packet_channel, signal, PacketReceiver, PacketSender, Reader, ReaderTimings,
    SignalTrigger,
};
use crate::{DeviceHandle, IngestError, IngestResult, LineSource, PortError};

/// Pipeline lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Constructed, device not open
    Init,
    /// Reader thread running, waiting for the start signal
    AwaitStart,
    Reading,
    /// Reader gone, remaining packets going to the sink
    Draining,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub channel_id: u32,
    pub format: StreamFormat,
    /// Hours added to the station clock
    pub hour_offset: f64,
    pub timings: ReaderTimings,
    /// Longest consumer wait for a packet before re-checking cancellation and status
    pub idle_backoff: Duration,
    /// Period of the "packets processed" status line
    pub status_interval: Duration,
    /// How long shutdown waits for the reader before abandoning it
    pub shutdown_timeout: Duration,
}

impl PipelineSettings {
    pub fn new(channel_id: u32, format: StreamFormat) -> Self {
        Self {
            channel_id,
            format,
            hour_offset: 0.0,
            timings: ReaderTimings::default(),
            idle_backoff: Duration::from_millis(500),
            status_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Totals for a completed run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub delivered: u64,
    /// Sequence of the most recently delivered packet
    pub last_sequence: u32,
    /// "Packets processed" status lines logged while reading
    pub status_reports: u32,
}

struct ReaderHandle {
    thread: JoinHandle<Result<u32, PortError>>,
    start: SignalTrigger,
    terminate: SignalTrigger,
    exited: oneshot::Receiver<()>,
    device: DeviceHandle,
}

/// Moves packets from the reader thread to a [`QueueSink`].
///
/// Usage: [`spawn_reader`](Self::spawn_reader), then [`run`](Self::run) until
/// the cancel channel flips to `true`. `run` always finishes with the shutdown
/// protocol, so on return the device is closed and the queue drained.
pub struct IngestPipeline<K> {
    settings: PipelineSettings,
    sink: K,
    sender: Option<PacketSender>,
    packets: PacketReceiver,
    state: PipelineState,
    reader: Option<ReaderHandle>,
    sink_failed: bool,
    summary: RunSummary,
}

impl<K: QueueSink> IngestPipeline<K> {
    pub fn new(settings: PipelineSettings, sink: K) -> Self {
        let (sender, packets) = create_packet_channel();
        Self {
            settings,
            sink,
            sender: Some(sender),
            packets,
            state: PipelineState::Init,
            reader: None,
            sink_failed: false,
            summary: RunSummary::default(),
        }
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn summary(&self) -> RunSummary {
        self.summary
    }

    /// Packets built but not yet handed to the sink
    pub fn queued(&self) -> usize {
        self.packets.len()
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// Start the reader thread. It waits for [`run`](Self::run) before opening the device.
    pub fn spawn_reader<S>(&mut self, source: S) -> IngestResult<()>
    where
        S: LineSource + 'static,
    {
        if self.state != PipelineState::Init {
            return Err(IngestError::AlreadyStarted);
        }
        let Some(sender) = self.sender.take() else {
            return Err(IngestError::AlreadyStarted);
        };

        let (start, start_listener) = signal();
        let (terminate, terminate_listener) = signal();
        let (token, exited) = oneshot::channel();
        let device = source.handle();

        let reader = Reader {
            source: Box::new(source),
            builder: PacketBuilder::new(self.settings.channel_id),
            packets: sender,
            format: self.settings.format,
            hour_offset: self.settings.hour_offset,
            timings: self.settings.timings,
            start: start_listener,
            terminate: terminate_listener,
        };

        let thread = thread::Builder::new()
            .name("serial-reader".to_string())
            .spawn(move || reader.run(token))
            .map_err(IngestError::Spawn)?;

        self.reader = Some(ReaderHandle {
            thread,
            start,
            terminate,
            exited,
            device,
        });
        self.state = PipelineState::AwaitStart;
        Ok(())
    }

    /// Signal the reader to start, consume until cancelled, then shut down.
    ///
    /// The consumer also stops when the reader exits on its own, which only
    /// happens on a device error. The first error wins: a sink failure while
    /// consuming, then a reader failure, then a sink failure while draining,
    /// then [`IngestError::ShutdownTimeout`].
    pub async fn run(&mut self, mut cancel: watch::Receiver<bool>) -> IngestResult<RunSummary> {
        match &self.reader {
            Some(reader) if self.state == PipelineState::AwaitStart => reader.start.set(),
            _ => return Err(IngestError::NotStarted),
        }
        self.state = PipelineState::Reading;
        info!(channel = self.settings.channel_id, "Pipeline running");

        let consumed = self.consume(&mut cancel).await;
        let stopped = self.shutdown().await;

        match consumed {
            Ok(()) => stopped,
            Err(e) => {
                if let Err(other) = stopped {
                    warn!(error = %other, "Shutdown also failed");
                }
                Err(e)
            }
        }
    }

    async fn consume(&mut self, cancel: &mut watch::Receiver<bool>) -> IngestResult<()> {
        let status_interval = self.settings.status_interval;
        let mut next_status = Instant::now() + status_interval;
        let mut cancel_open = true;

        loop {
            if *cancel.borrow() {
                info!("Shutdown requested");
                break;
            }
            if self.reader_finished() {
                warn!("Reader exited unexpectedly");
                break;
            }

            if self.packets.is_empty() {
                let received = tokio::select! {
                    packet = tokio::time::timeout(self.settings.idle_backoff, self.packets.recv()) => {
                        packet.ok().flatten()
                    }
                    changed = cancel.changed(), if cancel_open => {
                        if changed.is_err() {
                            cancel_open = false;
                        }
                        None
                    }
                };
                if let Some(packet) = received {
                    self.deliver(packet).await?;
                }
            } else {
                // Only what is queued now; packets arriving meanwhile wait for the next pass.
                let pending = self.packets.len();
                for _ in 0..pending {
                    let Ok(packet) = self.packets.try_recv() else {
                        break;
                    };
                    self.deliver(packet).await?;
                }
            }

            if Instant::now() >= next_status {
                info!(
                    delivered = self.summary.delivered,
                    last_sequence = self.summary.last_sequence,
                    "Packets processed"
                );
                self.summary.status_reports += 1;
                next_status += status_interval;
            }
        }
        Ok(())
    }

    fn reader_finished(&self) -> bool {
        self.reader
            .as_ref()
            .map_or(true, |reader| reader.thread.is_finished())
    }

    async fn deliver(&mut self, packet: WeatherPacket) -> IngestResult<()> {
        if let Err(e) = self.sink.write_packet(&packet).await {
            self.sink_failed = true;
            return Err(e.into());
        }
        self.summary.delivered += 1;
        self.summary.last_sequence = packet.sequence();
        trace!(sequence = packet.sequence(), "Delivered packet");
        Ok(())
    }

    async fn shutdown(&mut self) -> IngestResult<RunSummary> {
        let Some(reader) = self.reader.take() else {
            self.state = PipelineState::Stopped;
            return Ok(self.summary);
        };

        debug!("Signalling reader to terminate");
        reader.terminate.set();

        let timeout = self.settings.shutdown_timeout;
        let reader_result = match tokio::time::timeout(timeout, reader.exited).await {
            Ok(_) => match reader.thread.join() {
                Ok(Ok(last_sequence)) => {
                    debug!(last_sequence, "Reader exited");
                    Ok(())
                }
                Ok(Err(e)) => Err(IngestError::Port(e)),
                Err(_) => Err(IngestError::ReaderPanicked),
            },
            Err(_) => {
                // The thread is detached and left to finish its read on a closed device.
                error!(?timeout, "Reader did not exit in time, abandoning it");
                Err(IngestError::ShutdownTimeout(timeout))
            }
        };

        self.state = PipelineState::Draining;
        if reader.device.close() {
            info!("Closed device");
        }
        // No sends succeed past this point, so the drain sees every packet the reader queued.
        self.packets.close();
        let drained = self.drain().await;

        self.state = PipelineState::Stopped;
        info!(
            delivered = self.summary.delivered,
            last_sequence = self.summary.last_sequence,
            "Pipeline stopped"
        );

        match reader_result {
            Err(e @ IngestError::ShutdownTimeout(_)) => {
                drained?;
                Err(e)
            }
            Err(e) => {
                if let Err(other) = drained {
                    warn!(error = %other, "Drain also failed");
                }
                Err(e)
            }
            Ok(()) => drained.map(|()| self.summary),
        }
    }

    async fn drain(&mut self) -> IngestResult<()> {
        let mut remaining = Vec::with_capacity(self.packets.len());
        while let Ok(packet) = self.packets.try_recv() {
            remaining.push(packet);
        }
        if remaining.is_empty() {
            return Ok(());
        }
        if self.sink_failed {
            warn!(count = remaining.len(), "Sink has failed, dropping queued packets");
            return Ok(());
        }

        info!(count = remaining.len(), "Draining queued packets");
        for packet in remaining {
            self.deliver(packet).await?;
        }
        Ok(())
    }
}
