//! Bounded in-process queue, for embedding and tests

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use wxlog_core::{QueueSink, SinkError};

#[derive(Debug, Default)]
struct Slots {
    buffers: VecDeque<Vec<u8>>,
    written: u64,
}

type Shared = Arc<Mutex<Slots>>;

fn lock(shared: &Shared) -> MutexGuard<'_, Slots> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Holds up to `capacity` buffers; writing to a full queue fails.
#[derive(Debug)]
pub struct MemoryQueueSink {
    name: String,
    capacity: usize,
    shared: Shared,
}

impl MemoryQueueSink {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            name: name.into(),
            capacity,
            shared: Shared::default(),
        }
    }

    /// Consumer handle onto this queue
    pub fn reader(&self) -> MemoryQueueReader {
        MemoryQueueReader {
            shared: Arc::clone(&self.shared),
        }
    }
}

#[async_trait::async_trait]
impl QueueSink for MemoryQueueSink {
    async fn write_buffer(&mut self, buf: &[u8]) -> Result<(), SinkError> {
        let mut slots = lock(&self.shared);
        if slots.buffers.len() >= self.capacity {
            return Err(SinkError::Full(self.name.clone()));
        }
        slots.buffers.push_back(buf.to_vec());
        slots.written += 1;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct MemoryQueueReader {
    shared: Shared,
}

impl MemoryQueueReader {
    pub fn pop(&self) -> Option<Vec<u8>> {
        lock(&self.shared).buffers.pop_front()
    }

    pub fn drain(&self) -> Vec<Vec<u8>> {
        lock(&self.shared).buffers.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.shared).buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total buffers accepted, including ones already read
    pub fn written(&self) -> u64 {
        lock(&self.shared).written
    }
}
