use crate::domain::settings::LogSettings;
use std::path::PathBuf;
use std::str::FromStr;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Target used for alarm log entries when the `log` alarm setting is on
pub const ALARM_LOG_TARGET: &str = "alarm_log";

pub struct LoggingGuard {
    // Dropping the guard stops the background writer and flushes the file
    _guards: Vec<WorkerGuard>,
    pub log_dir: Option<PathBuf>,
}

fn parse_rotation(rotation: &str) -> Rotation {
    match rotation.to_lowercase().as_str() {
        "hourly" => Rotation::HOURLY,
        "minutely" => Rotation::MINUTELY,
        "never" => Rotation::NEVER,
        _ => Rotation::DAILY,
    }
}

/// `RUST_LOG` wins over the configured level
fn level_filter(settings: &LogSettings) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::from_str(&settings.level))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Relative log directories live under the user's local data directory
fn resolve_log_dir(settings: &LogSettings) -> PathBuf {
    let dir = PathBuf::from(&settings.log_dir);
    if dir.is_absolute() {
        return dir;
    }
    dirs::data_local_dir()
        .map(|base| base.join("GattAlertServer").join(&dir))
        .unwrap_or(dir)
}

pub fn init_logger(settings: &LogSettings) -> anyhow::Result<LoggingGuard> {
    let mut guards = Vec::new();

    let console_layer = settings.console_logging_enabled.then(|| {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_file(settings.show_file_line)
            .with_line_number(settings.show_file_line)
            .with_thread_ids(settings.show_thread_ids)
            .with_target(settings.show_target)
            .with_ansi(settings.ansi_colors)
    });

    let mut log_dir = None;
    let file_layer = if settings.file_logging_enabled {
        let dir = resolve_log_dir(settings);
        std::fs::create_dir_all(&dir)?;
        let appender = RollingFileAppender::new(
            parse_rotation(&settings.rotation),
            &dir,
            &settings.file_name_prefix,
        );
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        guards.push(guard);
        log_dir = Some(dir);
        Some(
            fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_file(settings.show_file_line)
                .with_line_number(settings.show_file_line)
                .with_thread_ids(settings.show_thread_ids)
                .with_target(settings.show_target),
        )
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(level_filter(settings))
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Logging already initialized: {}", e))?;

    tracing::info!(
        "Logging initialized (level: {}, file: {:?})",
        settings.level,
        log_dir
    );

    Ok(LoggingGuard {
        _guards: guards,
        log_dir,
    })
}
