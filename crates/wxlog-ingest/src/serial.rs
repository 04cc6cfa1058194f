//! Line source backed by a real serial port

use std::io::{self, Read};
use std::time::{Duration, Instant};

use serialport::SerialPort;
use tracing::{debug, info, warn};
use wxlog_config::{ComPortConfig, Parity, StopBits};
use wxlog_core::SERIAL_STRING_SIZE;

use crate::{DeviceHandle, LineSource, PortError};

/// Port parameters, as configured
#[derive(Debug, Clone)]
pub struct SerialSettings {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl From<&ComPortConfig> for SerialSettings {
    fn from(cfg: &ComPortConfig) -> Self {
        Self {
            port_name: cfg.port_name.clone(),
            baud_rate: cfg.baud_rate,
            data_bits: cfg.data_bits,
            parity: cfg.parity,
            stop_bits: cfg.stop_bits,
        }
    }
}

impl SerialSettings {
    fn unsupported(&self, setting: String) -> PortError {
        PortError::Unsupported {
            port: self.port_name.clone(),
            setting,
        }
    }

    fn data_bits(&self) -> Result<serialport::DataBits, PortError> {
        match self.data_bits {
            5 => Ok(serialport::DataBits::Five),
            6 => Ok(serialport::DataBits::Six),
            7 => Ok(serialport::DataBits::Seven),
            8 => Ok(serialport::DataBits::Eight),
            n => Err(self.unsupported(format!("{n} data bits"))),
        }
    }

    fn parity(&self) -> Result<serialport::Parity, PortError> {
        match self.parity {
            Parity::None => Ok(serialport::Parity::None),
            Parity::Odd => Ok(serialport::Parity::Odd),
            Parity::Even => Ok(serialport::Parity::Even),
            other => Err(self.unsupported(format!("{other:?} parity"))),
        }
    }

    fn stop_bits(&self) -> Result<serialport::StopBits, PortError> {
        match self.stop_bits {
            StopBits::One => Ok(serialport::StopBits::One),
            StopBits::Two => Ok(serialport::StopBits::Two),
            other => Err(self.unsupported(format!("{other:?} stop bits"))),
        }
    }
}

/// Longest line kept; the rest of an overlong line is dropped up to its newline.
pub const MAX_LINE_BYTES: usize = 4 * SERIAL_STRING_SIZE;

const CHUNK_SIZE: usize = 256;

/// Splits a byte stream into `\n`-terminated lines, holding at most
/// [`MAX_LINE_BYTES`] of an unfinished line.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
    overflowed: bool,
}

impl LineBuffer {
    fn extend(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        if self.pending.len() > MAX_LINE_BYTES && !self.pending.contains(&b'\n') {
            if !self.overflowed {
                warn!(limit = MAX_LINE_BYTES, "Line too long, truncating");
                self.overflowed = true;
            }
            self.pending.truncate(MAX_LINE_BYTES);
        }
    }

    fn next_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|b| *b == b'\n')?;
        let line = &self.pending[..end.min(MAX_LINE_BYTES)];
        let line = String::from_utf8_lossy(line).into_owned();
        self.pending.drain(..=end);
        self.overflowed = false;
        Some(line)
    }

    /// Next complete line, reading chunks with `read` until `timeout` has elapsed.
    ///
    /// `read` gets the time left before the deadline. A timed-out read ends the
    /// call with `Ok(None)`; partial data stays buffered for the next call.
    fn read_line_with<F>(&mut self, timeout: Duration, mut read: F) -> io::Result<Option<String>>
    where
        F: FnMut(&mut [u8], Duration) -> io::Result<usize>,
    {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; CHUNK_SIZE];
        loop {
            if let Some(line) = self.next_line() {
                return Ok(Some(line));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            match read(&mut chunk, remaining) {
                Ok(0) => return Ok(None),
                Ok(n) => self.extend(&chunk[..n]),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e)
                    if matches!(e.kind(), io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock) =>
                {
                    return Ok(None)
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn clear(&mut self) {
        self.pending.clear();
        self.overflowed = false;
    }
}

/// Newline-delimited reader over a serial port.
///
/// Each [`LineSource::read_line`] call returns by its deadline even while bytes
/// keep arriving. Bytes of a partial line survive and are completed by the next call.
pub struct SerialLineSource {
    settings: SerialSettings,
    port: Option<Box<dyn SerialPort>>,
    lines: LineBuffer,
    handle: DeviceHandle,
}

impl SerialLineSource {
    pub fn new(settings: SerialSettings) -> Self {
        Self {
            settings,
            port: None,
            lines: LineBuffer::default(),
            handle: DeviceHandle::new(),
        }
    }

    pub fn settings(&self) -> &SerialSettings {
        &self.settings
    }
}

impl LineSource for SerialLineSource {
    fn name(&self) -> &str {
        &self.settings.port_name
    }

    fn open(&mut self) -> Result<(), PortError> {
        let settings = &self.settings;
        let port = serialport::new(&settings.port_name, settings.baud_rate)
            .data_bits(settings.data_bits()?)
            .parity(settings.parity()?)
            .stop_bits(settings.stop_bits()?)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_secs(1))
            .open()
            .map_err(|e| PortError::Open {
                port: settings.port_name.clone(),
                reason: e.to_string(),
            })?;

        info!(
            "Opened {} at {} baud ({} data bits, {:?} parity, {:?} stop bits)",
            settings.port_name,
            settings.baud_rate,
            settings.data_bits,
            settings.parity,
            settings.stop_bits
        );
        self.port = Some(port);
        self.lines.clear();
        self.handle.set_open();
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, PortError> {
        let port_name = &self.settings.port_name;
        let port = match self.port.as_mut() {
            Some(port) if self.handle.is_open() => port,
            _ => return Err(PortError::NotOpen(port_name.clone())),
        };

        self.lines
            .read_line_with(timeout, |buf, remaining| {
                port.set_timeout(remaining)?;
                port.read(buf)
            })
            .map_err(|source| PortError::Read {
                port: port_name.clone(),
                source,
            })
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Closed {}", self.settings.port_name);
        }
        self.lines.clear();
        self.handle.close();
    }

    fn handle(&self) -> DeviceHandle {
        self.handle.clone()
    }
}
