use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use wxlog_config::{LogFileMode, OutputLogConfig};

#[derive(Debug, thiserror::Error)]
pub enum ObsError {
    #[error("Could not open log file {path}: {source}")]
    LogFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Logging already initialized: {0}")]
    Init(#[from] TryInitError),
}

/// Mirror of the console output into a file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    pub path: PathBuf,
    /// Truncate on start instead of appending
    pub overwrite: bool,
    /// Record every level regardless of the console filter
    pub all_levels: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObsSettings {
    pub diagnostic_level: u8,
    pub file: Option<LogFile>,
}

impl From<&OutputLogConfig> for ObsSettings {
    fn from(cfg: &OutputLogConfig) -> Self {
        let file = match (cfg.log_file_mode, &cfg.log_file_name) {
            (LogFileMode::None, _) | (_, None) => None,
            (mode, Some(path)) => Some(LogFile {
                path: path.clone(),
                overwrite: cfg.overwrite_log,
                all_levels: mode == LogFileMode::All,
            }),
        };
        Self {
            diagnostic_level: cfg.diagnostic_level,
            file,
        }
    }
}

/// 0 = info, 1 = debug, 2 and above = trace
pub fn level_filter(diagnostic_level: u8) -> LevelFilter {
    match diagnostic_level {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    }
}

/// `RUST_LOG` if set, else the diagnostic level
fn screen_filter(diagnostic_level: u8) -> EnvFilter {
    EnvFilter::builder()
        .with_default_directive(level_filter(diagnostic_level).into())
        .from_env_lossy()
}

pub fn open_log_file(file: &LogFile) -> Result<File, ObsError> {
    let mut options = OpenOptions::new();
    options.create(true);
    if file.overwrite {
        options.write(true).truncate(true);
    } else {
        options.append(true);
    }
    options.open(&file.path).map_err(|source| ObsError::LogFile {
        path: file.path.clone(),
        source,
    })
}

/// Install the global subscriber: console output plus the optional log file.
pub fn init(service_name: &str, settings: &ObsSettings) -> Result<(), ObsError> {
    let file_layer = match &settings.file {
        Some(file) => {
            let filter = if file.all_levels {
                EnvFilter::default().add_directive(LevelFilter::TRACE.into())
            } else {
                screen_filter(settings.diagnostic_level)
            };
            let writer = Mutex::new(open_log_file(file)?);
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_writer(writer)
                    .with_filter(filter),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_filter(screen_filter(settings.diagnostic_level)))
        .with(file_layer)
        .try_init()?;

    tracing::info!(
        service = %service_name,
        diagnostic_level = settings.diagnostic_level,
        log_file = ?settings.file.as_ref().map(|f| &f.path),
        "Logging initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_level_filter() {
        assert_eq!(level_filter(0), LevelFilter::INFO);
        assert_eq!(level_filter(1), LevelFilter::DEBUG);
        assert_eq!(level_filter(2), LevelFilter::TRACE);
        assert_eq!(level_filter(9), LevelFilter::TRACE);
    }

    #[test]
    fn test_settings_from_config() {
        let mut cfg = OutputLogConfig::default();
        assert_eq!(ObsSettings::from(&cfg).file, None);

        cfg.log_file_mode = LogFileMode::All;
        cfg.log_file_name = Some(PathBuf::from("wx.log"));
        cfg.overwrite_log = false;
        cfg.diagnostic_level = 1;
        let settings = ObsSettings::from(&cfg);
        assert_eq!(settings.diagnostic_level, 1);
        assert_eq!(
            settings.file,
            Some(LogFile {
                path: PathBuf::from("wx.log"),
                overwrite: false,
                all_levels: true,
            })
        );

        cfg.log_file_mode = LogFileMode::Screen;
        assert!(!ObsSettings::from(&cfg).file.unwrap().all_levels);
    }

    #[test]
    fn test_log_file_overwrite_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wx.log");
        std::fs::write(&path, "old\n").unwrap();

        let mut file = LogFile {
            path: path.clone(),
            overwrite: false,
            all_levels: false,
        };
        writeln!(open_log_file(&file).unwrap(), "appended").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "old\nappended\n");

        file.overwrite = true;
        writeln!(open_log_file(&file).unwrap(), "fresh").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "fresh\n");
    }

    #[test]
    fn test_missing_directory_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let file = LogFile {
            path: dir.path().join("missing").join("wx.log"),
            overwrite: true,
            all_levels: false,
        };
        assert!(matches!(open_log_file(&file), Err(ObsError::LogFile { .. })));
    }
}
