//! Wiring from configuration to a running pipeline

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use wxlog_config::{AppConfig, OpenMethod};
use wxlog_core::{StreamFormat, PACKET_SIZE};
use wxlog_ingest::{
    FixedLineSource, IngestPipeline, LineSource, PipelineSettings, RunSummary, SerialLineSource,
    SerialSettings,
};
use wxlog_sinks::FileQueueSink;

use crate::ready::ReadyFile;

/// Build the pipeline, signal readiness, and run until `cancel` flips.
pub async fn run(
    config: AppConfig,
    replay: Option<&Path>,
    cancel: watch::Receiver<bool>,
) -> Result<RunSummary> {
    debug!(?config, "Loaded configuration");

    let settings = pipeline_settings(&config);
    if settings.format == StreamFormat::Unknown {
        warn!(
            format = %config.device_stream_format,
            "Stream format not recognised, packets will be forwarded unparsed"
        );
    }

    let sink = open_sink(&config)?;
    let source = open_source(&config, replay)?;

    let mut pipeline = IngestPipeline::new(settings, sink);
    pipeline
        .spawn_reader(source)
        .context("Failed to start the reader")?;

    let _ready = match &config.ready_event {
        Some(path) => Some(
            ReadyFile::create(path)
                .with_context(|| format!("Failed to signal ready at {}", path.display()))?,
        ),
        None => None,
    };
    info!(module = %config.module_name, "Initialization complete");

    Ok(pipeline.run(cancel).await?)
}

pub fn pipeline_settings(config: &AppConfig) -> PipelineSettings {
    let format = config
        .device_stream_format
        .parse::<StreamFormat>()
        .unwrap_or_default();

    let mut settings = PipelineSettings::new(config.output_channel_id, format);
    settings.hour_offset = config.time_offset;
    settings.timings.read_timeout = Duration::from_millis(config.com_port.read_timeout_ms);
    settings.status_interval = Duration::from_secs(config.status_interval_secs);
    settings.shutdown_timeout = Duration::from_secs(config.shutdown_timeout_secs);
    settings
}

pub fn open_sink(config: &AppConfig) -> Result<FileQueueSink> {
    let queue = &config.output_queue;
    if (queue.buffer_size as usize) < PACKET_SIZE {
        bail!(
            "output_queue buffer_size {} is smaller than a packet ({} bytes)",
            queue.buffer_size,
            PACKET_SIZE
        );
    }

    let dir = config.queue_directory();
    let sink = match queue.open_method {
        OpenMethod::Create => {
            FileQueueSink::create(&dir, &queue.name, queue.buffer_size, queue.num_buffers)
        }
        OpenMethod::Attach => {
            FileQueueSink::attach(&dir, &queue.name, queue.buffer_size, queue.num_buffers)
        }
    };
    sink.with_context(|| format!("Failed to open output queue {}", queue.name))
}

/// The serial port from the config, or a captured log when replaying
pub fn open_source(config: &AppConfig, replay: Option<&Path>) -> Result<Box<dyn LineSource>> {
    match replay {
        Some(path) => {
            let file = File::open(path)
                .with_context(|| format!("Failed to open replay file {}", path.display()))?;
            let source = FixedLineSource::from_reader(path.display().to_string(), BufReader::new(file))
                .with_context(|| format!("Failed to read replay file {}", path.display()))?;
            info!(path = %path.display(), lines = source.remaining(), "Replaying captured output");
            Ok(Box::new(source))
        }
        None => Ok(Box::new(SerialLineSource::new(SerialSettings::from(
            &config.com_port,
        )))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use wxlog_core::WeatherPacket;
    use wxlog_sinks::{queue_path, FileQueueReader};

    const OLD_LINE: &str = "10/12/14 20:44:00 090 005KTS  012K 070F 037F 089% 30.14\"  00.00\"";

    fn config(dir: &Path, extra: &str) -> AppConfig {
        let toml = format!(
            r#"
            module_name = "WeatherLogger"
            output_channel_id = 5
            time_offset = 2.0
            device_stream_format = "OldWeatherDevice"
            shutdown_timeout_secs = 2
            {extra}

            [output_queue]
            name = "weather"
            directory = '{}'
            num_buffers = 16
            buffer_size = 512
            "#,
            dir.display()
        );
        AppConfig::from_toml(&toml).unwrap()
    }

    #[test]
    fn test_pipeline_settings_from_config() {
        let dir = tempfile::tempdir().unwrap();
        let settings = pipeline_settings(&config(dir.path(), ""));
        assert_eq!(settings.channel_id, 5);
        assert_eq!(settings.format, StreamFormat::OldWeatherDevice);
        assert_eq!(settings.hour_offset, 2.0);
        assert_eq!(settings.timings.read_timeout, Duration::from_secs(1));
        assert_eq!(settings.status_interval, Duration::from_secs(60));
        assert_eq!(settings.shutdown_timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_unknown_format_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), "");
        cfg.device_stream_format = "Vantage".to_string();
        assert_eq!(pipeline_settings(&cfg).format, StreamFormat::Unknown);
    }

    #[test]
    fn test_open_sink_checks_buffer_size() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), "");
        cfg.output_queue.buffer_size = 100;
        assert!(open_sink(&cfg).is_err());
        assert!(!queue_path(dir.path(), "weather").exists());
    }

    #[test]
    fn test_open_sink_create_then_attach() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), "");
        let creator = open_sink(&cfg).unwrap();
        assert!(open_sink(&cfg).is_err());

        cfg.output_queue.open_method = OpenMethod::Attach;
        let sink = open_sink(&cfg).unwrap();
        assert_eq!(sink.write_count(), 0);
        drop(sink);

        // A restart in create mode works once the previous creator is gone
        drop(creator);
        cfg.output_queue.open_method = OpenMethod::Create;
        assert!(open_sink(&cfg).is_ok());
    }

    #[test]
    fn test_missing_replay_file() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), "");
        let missing = PathBuf::from("/nonexistent/capture.log");
        assert!(open_source(&cfg, Some(missing.as_path())).is_err());
    }

    #[tokio::test]
    async fn test_replay_into_queue_file() {
        let dir = tempfile::tempdir().unwrap();
        let capture = dir.path().join("capture.log");
        std::fs::write(&capture, format!("{OLD_LINE}\r\n{OLD_LINE}\r\nnoise\r\n")).unwrap();
        let ready = dir.path().join("logger.ready");
        let cfg = config(
            dir.path(),
            &format!("ready_event = '{}'", ready.display()),
        );

        let (tx, rx) = watch::channel(false);
        let ready_path = ready.clone();
        let queue = queue_path(dir.path(), "weather");
        // Follow the queue like a downstream process would, while the logger is running
        let follower = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            let seen = ready_path.exists();
            let reader = FileQueueReader::open(&queue);
            let _ = tx.send(true);
            (seen, reader)
        });

        let summary = run(cfg, Some(capture.as_path()), rx).await.unwrap();
        let (ready_seen, reader) = follower.await.unwrap();
        assert!(ready_seen);
        assert_eq!(summary.delivered, 3);
        assert_eq!(summary.last_sequence, 3);
        assert!(!ready.exists());
        assert!(!queue_path(dir.path(), "weather").exists());

        let mut reader = reader.unwrap();
        assert_eq!(reader.header().unwrap().write_count, 3);

        let first = WeatherPacket::decode(&reader.read(0).unwrap()[..PACKET_SIZE]).unwrap();
        assert!(first.header.first);
        assert_eq!(first.header.channel_id, 5);
        assert_eq!(first.record.record_time.hour(), 22);
        assert_eq!(first.serial(), format!("{OLD_LINE}\r").as_bytes());

        let last = WeatherPacket::decode(&reader.read(2).unwrap()[..PACKET_SIZE]).unwrap();
        assert!(!last.is_valid());
        assert_eq!(last.serial(), b"noise\r");
    }
}
