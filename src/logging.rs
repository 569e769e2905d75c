use std::fs::{self, File};
use std::sync::Mutex;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::SyncError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFiles {
    pub log: Utf8PathBuf,
    pub warn: Utf8PathBuf,
}

pub fn log_files(dir: &Utf8Path, name: &str, now: DateTime<Local>) -> LogFiles {
    let stamp = now.format("%Y%m%d-%H%M");
    LogFiles {
        log: dir.join(format!("{stamp}.{name}.log")),
        warn: dir.join(format!("{stamp}.{name}.WARN.log")),
    }
}

pub fn init(verbose: bool, log_dir: Option<&Utf8Path>, name: &str) -> Result<Option<LogFiles>, SyncError> {
    let default_level = if verbose { "debug" } else { "info" };
    let stderr_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let stderr = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter);

    let Some(dir) = log_dir else {
        let _ = tracing_subscriber::registry().with(stderr).try_init();
        return Ok(None);
    };

    fs::create_dir_all(dir.as_std_path()).map_err(|err| SyncError::Filesystem(err.to_string()))?;
    let files = log_files(dir, name, Local::now());
    let open = |path: &Utf8Path| {
        File::create(path.as_std_path())
            .map_err(|err| SyncError::Filesystem(format!("create {path}: {err}")))
    };
    let run_log = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(open(&files.log)?))
        .with_filter(LevelFilter::DEBUG);
    let warn_log = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(open(&files.warn)?))
        .with_filter(LevelFilter::WARN);

    let _ = tracing_subscriber::registry()
        .with(stderr)
        .with(run_log)
        .with(warn_log)
        .try_init();
    Ok(Some(files))
}
