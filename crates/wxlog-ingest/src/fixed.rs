//! In-memory line source, used to replay captured device output

use std::collections::VecDeque;
use std::io::{self, BufRead};
use std::thread;
use std::time::Duration;

use crate::{DeviceHandle, LineSource, PortError};

/// Yields a fixed list of lines, then behaves like an idle port.
pub struct FixedLineSource {
    name: String,
    lines: VecDeque<String>,
    handle: DeviceHandle,
}

impl FixedLineSource {
    pub fn new<I, S>(name: impl Into<String>, lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            lines: lines.into_iter().map(Into::into).collect(),
            handle: DeviceHandle::new(),
        }
    }

    /// Read every line from `reader`, keeping any `\r` so lines match what the port delivers.
    pub fn from_reader(name: impl Into<String>, reader: impl BufRead) -> io::Result<Self> {
        let mut lines = Vec::new();
        for line in reader.split(b'\n') {
            lines.push(String::from_utf8_lossy(&line?).into_owned());
        }
        Ok(Self::new(name, lines))
    }

    /// Lines not yet read
    pub fn remaining(&self) -> usize {
        self.lines.len()
    }
}

impl LineSource for FixedLineSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self) -> Result<(), PortError> {
        self.handle.set_open();
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, PortError> {
        if !self.handle.is_open() {
            return Err(PortError::NotOpen(self.name.clone()));
        }
        match self.lines.pop_front() {
            Some(line) => Ok(Some(line)),
            None => {
                thread::sleep(timeout);
                Ok(None)
            }
        }
    }

    fn close(&mut self) {
        self.handle.close();
    }

    fn handle(&self) -> DeviceHandle {
        self.handle.clone()
    }
}
