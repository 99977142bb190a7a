//! File-only tracing. Command output owns the terminal, so logs never go to
//! stdout or stderr.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::{EnvFilter, fmt, prelude::*};

const LOG_FILE: &str = "waypoint.log";

/// The log file that won, plus why earlier locations were skipped.
struct LogSink {
    path: PathBuf,
    file: File,
    skipped: Vec<String>,
}

impl LogSink {
    /// First writable location wins. `Err` carries every failure when none is.
    fn open_first(locations: impl IntoIterator<Item = PathBuf>) -> Result<Self, Vec<String>> {
        let mut skipped = Vec::new();
        for path in locations {
            match append_to(&path) {
                Ok(file) => {
                    return Ok(Self {
                        path,
                        file,
                        skipped,
                    });
                }
                Err(err) => skipped.push(format!("Skipping log file {}: {err}", path.display())),
            }
        }
        Err(skipped)
    }
}

fn append_to(path: &Path) -> io::Result<File> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    OpenOptions::new().create(true).append(true).open(path)
}

/// `~/.waypoint/logs`, then `./.waypoint/logs` for sandboxed runs.
fn log_locations() -> impl Iterator<Item = PathBuf> {
    waypoint_config::waypoint_home()
        .into_iter()
        .chain(std::iter::once(PathBuf::from(".waypoint")))
        .map(|root| root.join("logs").join(LOG_FILE))
}

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    match LogSink::open_first(log_locations()) {
        Ok(sink) => {
            registry
                .with(
                    fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(sink.file)),
                )
                .init();
            tracing::info!(path = %sink.path.display(), "Logging initialized");
            for reason in sink.skipped {
                tracing::warn!("{reason}");
            }
        }
        // Nowhere to write: keep the filter so spans stay cheap, drop the events.
        Err(_) => registry.init(),
    }
}
