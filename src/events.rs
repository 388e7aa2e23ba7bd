//! Business event log and diagnostic logging setup.
//!
//! Business events (uploads, chart generation, downloads) are written as one
//! JSON object per line to `events.log`, which is rotated by size.
//! Diagnostics go through the `log` facade.

use chrono::Local;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
#[cfg(feature = "web")]
use std::sync::Once;

pub const USER_LOGGED_IN: &str = "user_logged_in";
pub const USER_LOGGED_OUT: &str = "user_logged_out";
pub const FILE_UPLOADED: &str = "file_uploaded";
pub const FILE_UPDATED: &str = "file_updated";
pub const FILE_DELETED: &str = "file_deleted";
pub const CHART_GENERATED: &str = "chart_generated";
pub const CHART_DOWNLOADED: &str = "chart_downloaded";

#[cfg(feature = "web")]
static LOGGER_INIT: Once = Once::new();

/// Install the diagnostic logger
///
/// Reads `RUST_LOG`, defaulting to `info`. Safe to call more than once.
#[cfg(feature = "web")]
pub fn init_logging() {
    LOGGER_INIT.call_once(|| {
        let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
            .try_init();
    });
}

/// Destination for business events
pub trait EventSink: Send + Sync {
    fn emit(&self, event_type: &str);
}

#[derive(Serialize)]
struct EventLine<'a> {
    timestamp: String,
    event_type: &'a str,
}

/// Appends JSON event lines to a file, rotating it by size
///
/// When a write would push `events.log` past `max_bytes`, the file moves to
/// `events.log.1`, older backups shift up by one, and anything beyond
/// `backups` is dropped.
pub struct RotatingFileSink {
    path: PathBuf,
    max_bytes: u64,
    backups: usize,
    state: Mutex<Option<(File, u64)>>,
}

impl RotatingFileSink {
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64, backups: usize) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let (file, size) = open_append(&path)?;
        Ok(Self {
            path,
            max_bytes,
            backups,
            state: Mutex::new(Some((file, size))),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&self, line: &str) -> io::Result<()> {
        let mut state = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let len = line.len() as u64 + 1;
        let current = state.as_ref().map(|(_, size)| *size).unwrap_or(0);
        if self.max_bytes > 0 && current > 0 && current + len > self.max_bytes {
            // Close before renaming
            *state = None;
            self.rotate()?;
        }
        if state.is_none() {
            *state = Some(open_append(&self.path)?);
        }

        if let Some((file, size)) = state.as_mut() {
            file.write_all(line.as_bytes())?;
            file.write_all(b"\n")?;
            file.flush()?;
            *size += len;
        }
        Ok(())
    }

    fn rotate(&self) -> io::Result<()> {
        if self.backups == 0 {
            return fs::remove_file(&self.path);
        }
        let backup = |n: usize| PathBuf::from(format!("{}.{}", self.path.display(), n));

        let oldest = backup(self.backups);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for n in (1..self.backups).rev() {
            let from = backup(n);
            if from.exists() {
                fs::rename(&from, backup(n + 1))?;
            }
        }
        fs::rename(&self.path, backup(1))
    }
}

fn open_append(path: &Path) -> io::Result<(File, u64)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let size = file.metadata()?.len();
    Ok((file, size))
}

impl EventSink for RotatingFileSink {
    fn emit(&self, event_type: &str) {
        let event = EventLine {
            timestamp: Local::now().format("%Y-%m-%d %H:%M:%S,%3f").to_string(),
            event_type,
        };
        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                log::error!("could not encode event {}: {}", event_type, e);
                return;
            }
        };
        if let Err(e) = self.write_line(&line) {
            log::error!("could not write event {}: {}", event_type, e);
        }
    }
}

/// Keeps events in memory
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event_type: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event_type.to_string());
        }
    }
}
