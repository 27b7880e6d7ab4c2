use chrono::NaiveDate;
use log::LevelFilter;
use simplelog::{
    ColorChoice, CombinedLogger, Config, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

/// Logging bootstrap for hosting processes. The core only ever emits through
/// the `log` facade; this wires the facade to a terminal sink plus a daily
/// file under `~/.roster-planner/logs/`.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    init_with_dir(&default_log_dir())
}

/// Same as [`init`] with an explicit log directory, for hosts that manage
/// their own paths.
pub fn init_with_dir(log_dir: &Path) -> Result<(), Box<dyn std::error::Error>> {
    fs::create_dir_all(log_dir)?;

    let log_path = log_dir.join(log_filename(chrono::Local::now().date_naive()));
    // Append mode keeps concurrent processes from clobbering each other.
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let sinks: Vec<Box<dyn SharedLogger>> = vec![
        TermLogger::new(
            terminal_level(),
            Config::default(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        ),
        // The file sink always captures DEBUG and above.
        WriteLogger::new(
            LevelFilter::Debug,
            ConfigBuilder::new().set_time_format_rfc3339().build(),
            log_file,
        ),
    ];
    CombinedLogger::init(sinks)?;

    log::info!("Logger initialized, file sink: {}", log_path.display());
    Ok(())
}

fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".roster-planner")
        .join("logs")
}

fn log_filename(day: NaiveDate) -> String {
    format!("app-{}.log", day.format("%Y-%m-%d"))
}

/// DEBUG in debug builds, INFO in release builds.
fn terminal_level() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}
