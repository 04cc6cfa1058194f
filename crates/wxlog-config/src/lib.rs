//! Configuration for the wxlog daemon, read from TOML

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Environment variable naming the config file when none is given on the command line
pub const CONFIG_ENV: &str = "WXLOG_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "wxlog.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid TOML: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Could not read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("You must define {0} in the config file")]
    Missing(&'static str),

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Serial parity, interpreted from the first letter of the configured value
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
    Mark,
    Space,
}

impl FromStr for Parity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().chars().next().map(|c| c.to_ascii_uppercase()) {
            Some('E') => Ok(Parity::Even),
            Some('M') => Ok(Parity::Mark),
            Some('N') => Ok(Parity::None),
            Some('O') => Ok(Parity::Odd),
            Some('S') => Ok(Parity::Space),
            _ => Err(ConfigError::Invalid {
                field: "com_port.parity",
                reason: format!("could not interpret {s:?}"),
            }),
        }
    }
}

impl TryFrom<String> for Parity {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Parity> for String {
    fn from(parity: Parity) -> Self {
        format!("{parity:?}")
    }
}

/// Stop bits, configured as a number (1, 1.5, 2)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "f32", into = "f32")]
pub enum StopBits {
    None,
    #[default]
    One,
    OnePointFive,
    Two,
}

impl TryFrom<f32> for StopBits {
    type Error = ConfigError;

    fn try_from(value: f32) -> Result<Self, Self::Error> {
        match value {
            v if v < 0.5 => Ok(StopBits::None),
            v if v < 1.25 => Ok(StopBits::One),
            v if v < 1.75 => Ok(StopBits::OnePointFive),
            v if v < 2.5 => Ok(StopBits::Two),
            _ => Err(ConfigError::Invalid {
                field: "com_port.stop_bits",
                reason: format!("could not interpret {value}"),
            }),
        }
    }
}

impl From<StopBits> for f32 {
    fn from(stop_bits: StopBits) -> Self {
        match stop_bits {
            StopBits::None => 0.0,
            StopBits::One => 1.0,
            StopBits::OnePointFive => 1.5,
            StopBits::Two => 2.0,
        }
    }
}

/// Where log output is mirrored to a file
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub enum LogFileMode {
    /// Console only
    #[default]
    None,
    /// Every event goes to the file, whatever the console filter
    All,
    /// The file receives what the console shows
    Screen,
}

impl TryFrom<String> for LogFileMode {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let upper = value.to_ascii_uppercase();
        if upper.trim().is_empty() || upper.contains("NONE") {
            Ok(LogFileMode::None)
        } else if upper.contains("ALL") {
            Ok(LogFileMode::All)
        } else if upper.contains("SCREEN") {
            Ok(LogFileMode::Screen)
        } else {
            Err(ConfigError::Invalid {
                field: "output_log.log_file_mode",
                reason: format!("could not interpret {value:?}"),
            })
        }
    }
}

/// How the output queue is opened
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenMethod {
    /// Create the queue; fails if it already exists
    #[default]
    Create,
    /// Attach to a queue created by another process
    Attach,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputLogConfig {
    /// 0 = normal, 1 = detailed, 2 and above = everything
    pub diagnostic_level: u8,
    pub log_file_mode: LogFileMode,
    pub log_file_name: Option<PathBuf>,
    pub overwrite_log: bool,
}

impl Default for OutputLogConfig {
    fn default() -> Self {
        Self {
            diagnostic_level: 0,
            log_file_mode: LogFileMode::None,
            log_file_name: None,
            overwrite_log: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputQueueConfig {
    pub name: String,
    /// Directory holding the queue file
    pub directory: Option<PathBuf>,
    pub num_buffers: u32,
    pub buffer_size: u32,
    pub open_method: OpenMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComPortConfig {
    pub port_name: String,
    pub baud_rate: u32,
    pub data_bits: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
    /// Upper bound on a single blocking read, so shutdown requests are seen promptly
    pub read_timeout_ms: u64,
}

impl Default for ComPortConfig {
    fn default() -> Self {
        Self {
            port_name: "/dev/ttyS0".to_string(),
            baud_rate: 19200,
            data_bits: 8,
            parity: Parity::None,
            stop_bits: StopBits::One,
            read_timeout_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub module_name: String,
    /// File created once initialisation completes, for external watchers
    pub ready_event: Option<PathBuf>,
    #[serde(default)]
    pub output_log: OutputLogConfig,
    #[serde(default)]
    pub output_queue: OutputQueueConfig,
    #[serde(default)]
    pub com_port: ComPortConfig,
    #[serde(default)]
    pub output_channel_id: u32,
    /// Hours added to the station clock
    #[serde(default)]
    pub time_offset: f64,
    #[serde(default = "default_stream_format")]
    pub device_stream_format: String,
    /// Seconds between "packets processed" status lines
    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

fn default_stream_format() -> String {
    "UnknownDevice".to_string()
}

fn default_status_interval() -> u64 {
    60
}

fn default_shutdown_timeout() -> u64 {
    5
}

impl AppConfig {
    /// Load configuration from `path`, else from `WXLOG_CONFIG`, else `wxlog.toml`
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => std::env::var_os(CONFIG_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH)),
        };
        let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.clone(),
            source,
        })?;
        Self::from_toml(&contents)
    }

    /// Parse and check required settings
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let cfg: AppConfig = toml::from_str(contents)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.module_name.trim().is_empty() {
            return Err(ConfigError::Missing("a module_name"));
        }
        let queue = &self.output_queue;
        if queue.name.trim().is_empty() {
            return Err(ConfigError::Missing("a name for the output_queue"));
        }
        if queue.num_buffers == 0 {
            return Err(ConfigError::Missing(
                "num_buffers greater than zero for the output_queue",
            ));
        }
        if queue.buffer_size == 0 {
            return Err(ConfigError::Missing(
                "buffer_size greater than zero for the output_queue",
            ));
        }
        if self.output_channel_id == 0 {
            return Err(ConfigError::Missing("an output_channel_id"));
        }
        if !self.time_offset.is_finite() {
            return Err(ConfigError::Invalid {
                field: "time_offset",
                reason: format!("{} is not a finite number of hours", self.time_offset),
            });
        }
        if self.status_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "status_interval_secs",
                reason: "the status interval must be at least one second".to_string(),
            });
        }
        if self.output_log.log_file_mode != LogFileMode::None
            && self.output_log.log_file_name.is_none()
        {
            return Err(ConfigError::Missing(
                "a log_file_name when log_file_mode is not NONE",
            ));
        }
        Ok(())
    }

    /// Directory for the output queue file (default: current directory)
    pub fn queue_directory(&self) -> PathBuf {
        self.output_queue
            .directory
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
        module_name = "WeatherLogger"
        output_channel_id = 12

        [output_queue]
        name = "WEATHER_Q"
        num_buffers = 16
        buffer_size = 512
    "#;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::from_toml(MINIMAL).unwrap();

        assert_eq!(cfg.com_port.baud_rate, 19200);
        assert_eq!(cfg.com_port.data_bits, 8);
        assert_eq!(cfg.com_port.parity, Parity::None);
        assert_eq!(cfg.com_port.stop_bits, StopBits::One);
        assert_eq!(cfg.output_queue.open_method, OpenMethod::Create);
        assert_eq!(cfg.device_stream_format, "UnknownDevice");
        assert_eq!(cfg.time_offset, 0.0);
        assert_eq!(cfg.status_interval_secs, 60);
        assert_eq!(cfg.shutdown_timeout_secs, 5);
        assert_eq!(cfg.output_log.log_file_mode, LogFileMode::None);
        assert!(cfg.output_log.overwrite_log);
        assert_eq!(cfg.queue_directory(), PathBuf::from("."));
    }

    #[test]
    fn test_full_config() {
        let cfg = AppConfig::from_toml(
            r#"
            module_name = "WeatherLogger"
            ready_event = "/tmp/wxlog.ready"
            output_channel_id = 3
            time_offset = 9.5
            device_stream_format = "WeatherReportLogger"

            [output_log]
            diagnostic_level = 2
            log_file_mode = "Screen"
            log_file_name = "wxlog.log"
            overwrite_log = false

            [output_queue]
            name = "WEATHER_Q"
            directory = "/var/lib/wxlog"
            num_buffers = 8
            buffer_size = 400
            open_method = "attach"

            [com_port]
            port_name = "/dev/ttyUSB0"
            baud_rate = 9600
            data_bits = 7
            parity = "even"
            stop_bits = 2
            "#,
        )
        .unwrap();

        assert_eq!(cfg.time_offset, 9.5);
        assert_eq!(cfg.com_port.parity, Parity::Even);
        assert_eq!(cfg.com_port.stop_bits, StopBits::Two);
        assert_eq!(cfg.output_queue.open_method, OpenMethod::Attach);
        assert_eq!(cfg.output_log.log_file_mode, LogFileMode::Screen);
        assert_eq!(cfg.queue_directory(), PathBuf::from("/var/lib/wxlog"));
    }

    #[test]
    fn test_parity_first_letter() {
        assert_eq!("Odd".parse::<Parity>().unwrap(), Parity::Odd);
        assert_eq!("space".parse::<Parity>().unwrap(), Parity::Space);
        assert_eq!("M".parse::<Parity>().unwrap(), Parity::Mark);
        assert!("Q".parse::<Parity>().is_err());
        assert!("".parse::<Parity>().is_err());
    }

    #[test]
    fn test_stop_bit_ranges() {
        assert_eq!(StopBits::try_from(0.0).unwrap(), StopBits::None);
        assert_eq!(StopBits::try_from(1.0).unwrap(), StopBits::One);
        assert_eq!(StopBits::try_from(1.5).unwrap(), StopBits::OnePointFive);
        assert_eq!(StopBits::try_from(2.0).unwrap(), StopBits::Two);
        assert!(StopBits::try_from(3.0).is_err());
    }

    #[test]
    fn test_missing_channel_id() {
        let err = AppConfig::from_toml(&MINIMAL.replace("output_channel_id = 12", "")).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("an output_channel_id")));
    }

    #[test]
    fn test_missing_queue_section() {
        let err = AppConfig::from_toml("module_name = \"x\"\noutput_channel_id = 1").unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn test_zero_buffers_rejected() {
        let err =
            AppConfig::from_toml(&MINIMAL.replace("num_buffers = 16", "num_buffers = 0")).unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn test_zero_status_interval_rejected() {
        let toml = MINIMAL.replace(
            "output_channel_id = 12",
            "output_channel_id = 12\nstatus_interval_secs = 0",
        );
        assert!(matches!(
            AppConfig::from_toml(&toml),
            Err(ConfigError::Invalid {
                field: "status_interval_secs",
                ..
            })
        ));
    }

    #[test]
    fn test_bad_log_mode_rejected() {
        let toml = format!("{MINIMAL}\n[output_log]\nlog_file_mode = \"printer\"\n");
        assert!(matches!(
            AppConfig::from_toml(&toml),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_log_file_required_for_file_mode() {
        let toml = format!("{MINIMAL}\n[output_log]\nlog_file_mode = \"all\"\n");
        assert!(matches!(
            AppConfig::from_toml(&toml),
            Err(ConfigError::Missing(_))
        ));
    }

    #[test]
    fn test_load_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();

        let cfg = AppConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.module_name, "WeatherLogger");
        assert_eq!(cfg.output_channel_id, 12);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = AppConfig::load(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
