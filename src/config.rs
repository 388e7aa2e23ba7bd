use crate::files::MAX_FILES_PER_SESSION;
use crate::validator::MAX_UPLOAD_BYTES;
use figment::{
    Figment,
    providers::{Env, Serialized},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of the environment variables read by [`Config::from_env`]
pub const ENV_PREFIX: &str = "CSVVIZ_";

// Defaults
const DEFAULT_INSTANCE_DIR: &str = "instance";
const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
const DEFAULT_MAX_AGE_HOURS: u64 = 24;
const DEFAULT_SESSION_HOURS: u64 = 24;
const DEFAULT_USERNAME: &str = "testuser";
const DEFAULT_PASSWORD: &str = "password123";
const DEFAULT_USER_ID: &str = "1";
const EVENT_LOG_MAX_BYTES: u64 = 1024 * 1024;
const EVENT_LOG_BACKUPS: usize = 5;

/// Runtime configuration for the application
///
/// Every field has a default. `from_env` layers `CSVVIZ_*` environment
/// variables on top, keyed by field name (`CSVVIZ_MAX_FILES` sets
/// `max_files`, `CSVVIZ_BIND` sets `bind_addr`).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Root directory holding uploads, charts and the event log
    pub instance_dir: PathBuf,

    /// Address the HTTP listener binds to
    #[serde(rename = "bind")]
    pub bind_addr: String,

    /// Maximum accepted upload size in bytes
    pub max_upload_bytes: usize,

    /// Maximum number of files a session may hold
    pub max_files: usize,

    /// Age after which housekeeping deletes session directories and charts
    pub max_age_hours: u64,

    /// Lifetime of a login session in hours
    pub session_hours: u64,

    /// Login name of the single configured user
    pub username: String,

    /// Plaintext password of the configured user, hashed at startup
    pub password: String,

    /// Stable identifier of the configured user
    pub user_id: String,

    /// Size at which `events.log` is rotated
    pub event_log_max_bytes: u64,

    /// Number of rotated event logs kept
    pub event_log_backups: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instance_dir: PathBuf::from(DEFAULT_INSTANCE_DIR),
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            max_upload_bytes: MAX_UPLOAD_BYTES,
            max_files: MAX_FILES_PER_SESSION,
            max_age_hours: DEFAULT_MAX_AGE_HOURS,
            session_hours: DEFAULT_SESSION_HOURS,
            username: DEFAULT_USERNAME.to_string(),
            password: DEFAULT_PASSWORD.to_string(),
            user_id: DEFAULT_USER_ID.to_string(),
            event_log_max_bytes: EVENT_LOG_MAX_BYTES,
            event_log_backups: EVENT_LOG_BACKUPS,
        }
    }
}

impl Config {
    /// Defaults overlaid with the `CSVVIZ_*` environment
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Load the configuration from the environment
    ///
    /// # Errors
    /// * Returns an error naming the offending key when a variable holds a
    ///   value of the wrong type, e.g. `CSVVIZ_MAX_FILES=five`
    pub fn from_env() -> Result<Self, figment::Error> {
        Self::figment().extract()
    }

    /// Configuration rooted at `instance_dir`, everything else default
    pub fn with_instance_dir(instance_dir: impl Into<PathBuf>) -> Self {
        Self {
            instance_dir: instance_dir.into(),
            ..Self::default()
        }
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_hours * 3600)
    }

    pub fn paths(&self) -> InstancePaths {
        InstancePaths::new(&self.instance_dir)
    }
}

/// On-disk layout of an instance directory
///
/// ```text
/// <root>/uploads/<session_dir_id>/<file>.csv
/// <root>/charts/<session_dir_id>/<stem>_<type>.png
/// <root>/events.log
/// ```
#[derive(Debug, Clone)]
pub struct InstancePaths {
    pub root: PathBuf,
    pub uploads: PathBuf,
    pub charts: PathBuf,
    pub events_log: PathBuf,
}

impl InstancePaths {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            uploads: root.join("uploads"),
            charts: root.join("charts"),
            events_log: root.join("events.log"),
        }
    }

    /// Create the instance, uploads and charts directories
    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.uploads)?;
        std::fs::create_dir_all(&self.charts)?;
        Ok(())
    }

    pub fn session_uploads(&self, session_dir_id: &str) -> PathBuf {
        self.uploads.join(session_dir_id)
    }

    pub fn session_charts(&self, session_dir_id: &str) -> PathBuf {
        self.charts.join(session_dir_id)
    }
}
