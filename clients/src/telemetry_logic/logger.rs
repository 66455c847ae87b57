use super::config::Config;
use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const LOG_PREFIX: &str = "telemetry_client_";

/// Dependencies that log every frame at debug level.
const QUIET_TARGETS: [&str; 3] = ["tungstenite", "tokio_tungstenite", "rustls"];

/// Logs to stdout and a fresh timestamped file under the configured directory.
pub fn setup_logging(config: &Config) -> Result<PathBuf> {
    let log_dir = config.log_dir();
    fs::create_dir_all(&log_dir)?;

    // The new file counts toward the retention limit.
    let removed = prune_logs(&log_dir, config.log_keep().saturating_sub(1))?;

    let log_path = log_dir.join(format!(
        "{}{}.log",
        LOG_PREFIX,
        chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
    ));

    let level = config.log_level();
    let mut dispatch = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(level);
    for target in QUIET_TARGETS {
        dispatch = dispatch.level_for(target, level.min(log::LevelFilter::Info));
    }
    dispatch
        .chain(std::io::stdout())
        .chain(fern::log_file(&log_path)?)
        .apply()?;

    if removed > 0 {
        log::debug!("Removed {} old log file(s) from {}", removed, log_dir.display());
    }
    Ok(log_path)
}

/// Deletes this client's log files beyond the `keep` most recent. Other files
/// in the directory are left alone. Returns how many were removed.
fn prune_logs(log_dir: &Path, keep: usize) -> Result<usize> {
    let mut logs: Vec<(SystemTime, PathBuf)> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .map(|entry| entry.path())
        .filter(|path| is_client_log(path))
        .map(|path| {
            let modified = fs::metadata(&path)
                .and_then(|m| m.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            (modified, path)
        })
        .collect();

    // Newest first
    logs.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

    let mut removed = 0;
    for (_, path) in logs.iter().skip(keep) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {:?}: {}", path, e),
        }
    }
    Ok(removed)
}

fn is_client_log(path: &Path) -> bool {
    let name = path.file_name().and_then(|name| name.to_str()).unwrap_or_default();
    name.starts_with(LOG_PREFIX) && name.ends_with(".log")
}
