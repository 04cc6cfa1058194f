use crate::packet::WeatherPacket;

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("Could not open queue {name}: {reason}")]
    Open { name: String, reason: String },

    #[error("Queue {0} is full")]
    Full(String),

    #[error("Buffer of {len} bytes does not fit queue slots of {slot_size} bytes")]
    BufferTooLarge { len: usize, slot_size: usize },

    #[error("Queue write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Downstream queue accepting serialized packets
#[async_trait::async_trait]
pub trait QueueSink: Send {
    /// Write one serialized packet. A failure ends the run; callers do not retry.
    async fn write_buffer(&mut self, buf: &[u8]) -> Result<(), SinkError>;

    /// Encode and write a packet
    async fn write_packet(&mut self, packet: &WeatherPacket) -> Result<(), SinkError> {
        self.write_buffer(&packet.encode()).await
    }
}
