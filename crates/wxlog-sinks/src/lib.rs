pub mod memory;

pub use memory::{MemoryQueueReader, MemoryQueueSink};

use std::fs::{create_dir_all, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, BufMut, BytesMut};
use tracing::{debug, info, warn};
use wxlog_core::{QueueSink, SinkError};

pub const QUEUE_MAGIC: &[u8; 4] = b"WXQ1";
pub const QUEUE_EXTENSION: &str = "wxq";

/// magic, slot size u32, slot count u32, reserved u32, write count u64
pub const QUEUE_HEADER_SIZE: u64 = 24;
const WRITE_COUNT_OFFSET: u64 = 16;

/// Geometry and progress recorded at the start of a queue file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueHeader {
    pub slot_size: u32,
    pub num_slots: u32,
    /// Buffers written since creation; the next write goes to `write_count % num_slots`
    pub write_count: u64,
}

impl QueueHeader {
    fn encode(&self) -> BytesMut {
        let mut out = BytesMut::with_capacity(QUEUE_HEADER_SIZE as usize);
        out.put_slice(QUEUE_MAGIC);
        out.put_u32_le(self.slot_size);
        out.put_u32_le(self.num_slots);
        out.put_u32_le(0);
        out.put_u64_le(self.write_count);
        out
    }

    fn read_from(file: &mut File) -> io::Result<Option<Self>> {
        let mut raw = [0u8; QUEUE_HEADER_SIZE as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut raw)?;

        let mut buf = &raw[..];
        if &buf[..QUEUE_MAGIC.len()] != QUEUE_MAGIC {
            return Ok(None);
        }
        buf.advance(QUEUE_MAGIC.len());
        let slot_size = buf.get_u32_le();
        let num_slots = buf.get_u32_le();
        buf.advance(4);
        Ok(Some(Self {
            slot_size,
            num_slots,
            write_count: buf.get_u64_le(),
        }))
    }

    fn slot_offset(&self, index: u64) -> u64 {
        QUEUE_HEADER_SIZE + (index % u64::from(self.num_slots)) * u64::from(self.slot_size)
    }
}

/// Location of the queue file for `name` inside `dir`
pub fn queue_path<P: AsRef<Path>>(dir: P, name: &str) -> PathBuf {
    dir.as_ref().join(format!("{name}.{QUEUE_EXTENSION}"))
}

/// Ring of fixed-size slots in a file, shared with downstream processes.
///
/// Each buffer goes into the next slot, zero-padded to the slot size, and the
/// header's write count is bumped afterwards so a follower never sees a
/// half-written slot as available.
///
/// The queue lives as long as the sink that created it: dropping a created sink
/// removes the file, while attached sinks leave it in place. Followers that
/// already have the file open keep reading it after removal.
pub struct FileQueueSink {
    name: String,
    path: PathBuf,
    file: File,
    header: QueueHeader,
    owner: bool,
}

impl FileQueueSink {
    /// Create a new queue. Fails if a live queue already exists under that name.
    pub fn create<P: AsRef<Path>>(
        dir: P,
        name: &str,
        slot_size: u32,
        num_slots: u32,
    ) -> Result<Self, SinkError> {
        if slot_size == 0 || num_slots == 0 {
            return Err(open_error(name, "slot size and slot count must be non-zero"));
        }
        create_dir_all(dir.as_ref())?;
        let path = queue_path(dir, name);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::AlreadyExists => open_error(name, "queue already exists"),
                _ => open_error(name, &e.to_string()),
            })?;

        let header = QueueHeader {
            slot_size,
            num_slots,
            write_count: 0,
        };
        file.set_len(QUEUE_HEADER_SIZE + u64::from(slot_size) * u64::from(num_slots))?;
        file.write_all(&header.encode())?;
        file.flush()?;

        info!(queue = name, path = %path.display(), slot_size, num_slots, "Created output queue");
        Ok(Self {
            name: name.to_string(),
            path,
            file,
            header,
            owner: true,
        })
    }

    /// Attach to a queue created by another process. Its geometry must match.
    pub fn attach<P: AsRef<Path>>(
        dir: P,
        name: &str,
        slot_size: u32,
        num_slots: u32,
    ) -> Result<Self, SinkError> {
        let path = queue_path(dir, name);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                io::ErrorKind::NotFound => open_error(name, "queue does not exist"),
                _ => open_error(name, &e.to_string()),
            })?;

        let header = QueueHeader::read_from(&mut file)
            .map_err(|e| open_error(name, &e.to_string()))?
            .ok_or_else(|| open_error(name, "not a queue file"))?;
        if header.slot_size != slot_size || header.num_slots != num_slots {
            return Err(open_error(
                name,
                &format!(
                    "queue has {} slots of {} bytes, expected {} of {}",
                    header.num_slots, header.slot_size, num_slots, slot_size
                ),
            ));
        }

        info!(queue = name, path = %path.display(), write_count = header.write_count, "Attached to output queue");
        Ok(Self {
            name: name.to_string(),
            path,
            file,
            header,
            owner: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn write_count(&self) -> u64 {
        self.header.write_count
    }
}

impl Drop for FileQueueSink {
    fn drop(&mut self) {
        if !self.owner {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(queue = %self.name, "Removed output queue"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(queue = %self.name, error = %e, "Failed to remove output queue"),
        }
    }
}

fn open_error(name: &str, reason: &str) -> SinkError {
    SinkError::Open {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

#[async_trait::async_trait]
impl QueueSink for FileQueueSink {
    async fn write_buffer(&mut self, buf: &[u8]) -> Result<(), SinkError> {
        let slot_size = self.header.slot_size as usize;
        if buf.len() > slot_size {
            return Err(SinkError::BufferTooLarge {
                len: buf.len(),
                slot_size,
            });
        }

        let offset = self.header.slot_offset(self.header.write_count);
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(buf)?;
        self.file.write_all(&vec![0u8; slot_size - buf.len()])?;

        self.header.write_count += 1;
        self.file.seek(SeekFrom::Start(WRITE_COUNT_OFFSET))?;
        let mut count = BytesMut::with_capacity(8);
        count.put_u64_le(self.header.write_count);
        self.file.write_all(&count)?;
        self.file.flush()?;

        debug!(queue = %self.name, write_count = self.header.write_count, "Wrote buffer");
        Ok(())
    }
}

/// Read side of a queue file, for downstream consumers
pub struct FileQueueReader {
    file: File,
}

impl FileQueueReader {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        Ok(Self {
            file: File::open(path)?,
        })
    }

    pub fn header(&mut self) -> io::Result<QueueHeader> {
        QueueHeader::read_from(&mut self.file)?
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "not a queue file"))
    }

    /// Contents of the slot holding write number `index` (0-based), padding included.
    ///
    /// Only meaningful while `index` is among the last `num_slots` writes.
    pub fn read(&mut self, index: u64) -> io::Result<Vec<u8>> {
        let header = self.header()?;
        if index >= header.write_count {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("write {index} has not happened yet"),
            ));
        }
        let mut slot = vec![0u8; header.slot_size as usize];
        self.file.seek(SeekFrom::Start(header.slot_offset(index)))?;
        self.file.read_exact(&mut slot)?;
        Ok(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wxlog_core::{PacketBuilder, WeatherPacket, PACKET_SIZE};

    #[tokio::test]
    async fn test_create_and_follow() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileQueueSink::create(dir.path(), "weather", 512, 4).unwrap();
        assert_eq!(sink.path(), queue_path(dir.path(), "weather"));

        let mut builder = PacketBuilder::new(3);
        let packet = builder.build("raw line", None, false);
        sink.write_packet(&packet).await.unwrap();
        assert_eq!(sink.write_count(), 1);

        let mut reader = FileQueueReader::open(sink.path()).unwrap();
        let header = reader.header().unwrap();
        assert_eq!(header.write_count, 1);
        assert_eq!(header.slot_size, 512);

        let slot = reader.read(0).unwrap();
        assert_eq!(slot.len(), 512);
        assert!(slot[PACKET_SIZE..].iter().all(|b| *b == 0));
        assert_eq!(WeatherPacket::decode(&slot[..PACKET_SIZE]).unwrap(), packet);
        assert!(reader.read(1).is_err());
    }

    #[test]
    fn test_header_layout() {
        let header = QueueHeader {
            slot_size: 512,
            num_slots: 4,
            write_count: 9,
        };
        let raw = header.encode();
        assert_eq!(raw.len() as u64, QUEUE_HEADER_SIZE);
        assert_eq!(&raw[0..4], QUEUE_MAGIC);
        assert_eq!(&raw[4..8], &[0x00u8, 0x02, 0, 0]);
        assert_eq!(&raw[8..12], &[4u8, 0, 0, 0]);
        assert_eq!(&raw[12..16], &[0u8; 4]);
        assert_eq!(&raw[WRITE_COUNT_OFFSET as usize..], &[9u8, 0, 0, 0, 0, 0, 0, 0]);

        let mut file = tempfile::tempfile().unwrap();
        file.write_all(&raw).unwrap();
        assert_eq!(QueueHeader::read_from(&mut file).unwrap(), Some(header));
    }

    #[tokio::test]
    async fn test_ring_wraps() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileQueueSink::create(dir.path(), "ring", 8, 2).unwrap();
        for n in 0u8..3 {
            sink.write_buffer(&[n; 8]).await.unwrap();
        }

        let mut reader = FileQueueReader::open(sink.path()).unwrap();
        assert_eq!(reader.read(2).unwrap(), vec![2; 8]);
        assert_eq!(reader.read(1).unwrap(), vec![1; 8]);
        // Write 0 has been overwritten by write 2
        assert_eq!(reader.read(0).unwrap(), vec![2; 8]);
    }

    #[test]
    fn test_create_fails_when_queue_exists() {
        let dir = tempfile::tempdir().unwrap();
        let _first = FileQueueSink::create(dir.path(), "weather", 512, 4).unwrap();
        let err = FileQueueSink::create(dir.path(), "weather", 512, 4).err().unwrap();
        assert!(matches!(err, SinkError::Open { .. }));
    }

    #[tokio::test]
    async fn test_create_again_after_creator_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = queue_path(dir.path(), "weather");
        {
            let mut sink = FileQueueSink::create(dir.path(), "weather", 512, 4).unwrap();
            sink.write_buffer(b"stale").await.unwrap();
        }
        assert!(!path.exists());

        let sink = FileQueueSink::create(dir.path(), "weather", 512, 4).unwrap();
        assert_eq!(sink.write_count(), 0);
        let mut reader = FileQueueReader::open(&path).unwrap();
        assert_eq!(reader.header().unwrap().write_count, 0);
    }

    #[tokio::test]
    async fn test_attached_sink_leaves_queue() {
        let dir = tempfile::tempdir().unwrap();
        let mut creator = FileQueueSink::create(dir.path(), "weather", 16, 4).unwrap();
        creator.write_buffer(b"first").await.unwrap();

        let mut reader = FileQueueReader::open(creator.path()).unwrap();
        drop(FileQueueSink::attach(dir.path(), "weather", 16, 4).unwrap());
        assert!(creator.path().exists());

        drop(creator);
        assert!(!queue_path(dir.path(), "weather").exists());
        // Already-open followers still see the data
        assert_eq!(&reader.read(0).unwrap()[..5], b"first");
    }

    #[tokio::test]
    async fn test_attach_continues_count() {
        let dir = tempfile::tempdir().unwrap();
        let mut creator = FileQueueSink::create(dir.path(), "weather", 16, 4).unwrap();
        creator.write_buffer(b"first").await.unwrap();

        let mut sink = FileQueueSink::attach(dir.path(), "weather", 16, 4).unwrap();
        assert_eq!(sink.write_count(), 1);
        sink.write_buffer(b"second").await.unwrap();

        let mut reader = FileQueueReader::open(sink.path()).unwrap();
        assert_eq!(reader.header().unwrap().write_count, 2);
        assert_eq!(&reader.read(1).unwrap()[..6], b"second");
    }

    #[test]
    fn test_attach_checks_geometry() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            FileQueueSink::attach(dir.path(), "weather", 16, 4),
            Err(SinkError::Open { .. })
        ));

        let _creator = FileQueueSink::create(dir.path(), "weather", 16, 4).unwrap();
        assert!(matches!(
            FileQueueSink::attach(dir.path(), "weather", 32, 4),
            Err(SinkError::Open { .. })
        ));
    }

    #[tokio::test]
    async fn test_oversized_buffer_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileQueueSink::create(dir.path(), "small", 64, 2).unwrap();
        let err = sink.write_buffer(&[0u8; 65]).await.unwrap_err();
        assert!(matches!(
            err,
            SinkError::BufferTooLarge {
                len: 65,
                slot_size: 64
            }
        ));
        assert_eq!(sink.write_count(), 0);
    }
}
