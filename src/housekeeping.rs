//! Startup sweep of stale uploads and charts.

use crate::config::InstancePaths;
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

/// Outcome of a sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    /// Entries deleted
    pub removed: usize,

    /// Entries that were stale but could not be deleted
    pub failed: usize,
}

/// Delete session upload directories and charts older than `max_age_hours`
pub fn sweep(paths: &InstancePaths, max_age_hours: u64) -> SweepReport {
    sweep_at(paths, max_age_hours, SystemTime::now())
}

/// [`sweep`] with an explicit notion of "now"
pub fn sweep_at(paths: &InstancePaths, max_age_hours: u64, now: SystemTime) -> SweepReport {
    let max_age = Duration::from_secs(max_age_hours * 3600);
    let mut report = SweepReport::default();

    sweep_dir(&paths.uploads, max_age, now, &mut report);
    sweep_dir(&paths.charts, max_age, now, &mut report);

    if report.removed > 0 || report.failed > 0 {
        log::info!(
            "housekeeping removed {} stale entries ({} failures)",
            report.removed,
            report.failed
        );
    }
    report
}

// Each direct child of `dir` is a session directory or a loose chart file.
fn sweep_dir(dir: &Path, max_age: Duration, now: SystemTime, report: &mut SweepReport) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        let Ok(modified) = metadata.modified() else {
            continue;
        };
        // A timestamp in the future counts as fresh
        let age = now.duration_since(modified).unwrap_or(Duration::ZERO);
        if age <= max_age {
            continue;
        }

        let result = if metadata.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        match result {
            Ok(()) => report.removed += 1,
            Err(e) => {
                report.failed += 1;
                log::warn!("could not remove {}: {}", path.display(), e);
            }
        }
    }
}
