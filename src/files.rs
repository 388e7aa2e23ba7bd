use crate::config::InstancePaths;
use crate::error::{CapacityError, FileStoreError, NotFoundError};
use crate::session::{self, ActiveChart, FileRecord, SessionHandle, SessionState, SessionStore};
use crate::validator;
use lazy_static::lazy_static;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;

/// Default number of files a session may hold
pub const MAX_FILES_PER_SESSION: usize = 5;

lazy_static! {
    static ref UNSAFE_FILENAME_CHARS: Regex = Regex::new(r"[^A-Za-z0-9_.-]").unwrap();
}

/// Reduce an uploaded filename to a safe, flat on-disk name
///
/// Path components are dropped, whitespace becomes `_`, anything outside
/// `[A-Za-z0-9_.-]` is removed, and leading/trailing dots and underscores
/// are trimmed. Returns an empty string when nothing usable remains.
///
/// # Examples
/// ```
/// use csv_visualizer::files::sanitize_filename;
///
/// assert_eq!(sanitize_filename("../../etc/passwd"), "etc_passwd");
/// assert_eq!(sanitize_filename("My Sales Data.csv"), "My_Sales_Data.csv");
/// ```
pub fn sanitize_filename(filename: &str) -> String {
    let flattened = filename.replace(['/', '\\'], " ");
    let joined = flattened.split_whitespace().collect::<Vec<_>>().join("_");
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(&joined, "");
    cleaned.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// Read the header row of a CSV file
///
/// Returns an empty list when the file is missing or cannot be parsed.
pub fn get_headers(path: impl AsRef<Path>) -> Vec<String> {
    let Ok(mut reader) = csv::Reader::from_path(path) else {
        return Vec::new();
    };
    match reader.headers() {
        Ok(headers) => headers.iter().map(str::to_string).collect(),
        Err(_) => Vec::new(),
    }
}

/// Per-session file workspace
///
/// File bytes live under `uploads/<session_dir_id>/` and the ordered list of
/// records lives in the session state. Every operation holds the session's
/// lock for its whole duration.
pub struct SessionFileStore {
    sessions: Arc<dyn SessionStore>,
    paths: InstancePaths,
    max_files: usize,
    max_upload_bytes: usize,
    deletion_failures: AtomicU64,
}

impl SessionFileStore {
    pub fn new(
        sessions: Arc<dyn SessionStore>,
        paths: InstancePaths,
        max_files: usize,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            sessions,
            paths,
            max_files,
            max_upload_bytes,
            deletion_failures: AtomicU64::new(0),
        }
    }

    pub fn max_files(&self) -> usize {
        self.max_files
    }

    /// Number of backing files that could not be deleted so far
    pub fn deletion_failures(&self) -> u64 {
        self.deletion_failures.load(Ordering::Relaxed)
    }

    fn session(&self, session_id: &str) -> Result<SessionHandle, NotFoundError> {
        self.sessions.get(session_id).ok_or(NotFoundError::Session)
    }

    /// Validate and store an upload, appending a new record
    pub fn add_file(
        &self,
        session_id: &str,
        bytes: &[u8],
        filename: &str,
    ) -> Result<FileRecord, FileStoreError> {
        let handle = self.session(session_id)?;
        let mut state = session::lock(&handle);

        if state.files.len() >= self.max_files {
            return Err(CapacityError {
                limit: self.max_files,
            }
            .into());
        }
        validator::validate(filename, bytes, self.max_upload_bytes)?;

        let path = self.write_upload(&mut state, filename, bytes, None)?;
        let record = FileRecord {
            id: format!("file_{}", Uuid::new_v4().simple()),
            original_filename: file_name_of(&path),
            server_path: path.to_string_lossy().to_string(),
        };
        state.files.push(record.clone());

        log::info!(
            "stored {} as {} ({} bytes)",
            record.original_filename,
            record.id,
            bytes.len()
        );
        Ok(record)
    }

    /// Remove a record and, best effort, its backing file
    ///
    /// Returns `false` if the session holds no record with `file_id`.
    pub fn remove_file(&self, session_id: &str, file_id: &str) -> bool {
        let Ok(handle) = self.session(session_id) else {
            return false;
        };
        let mut state = session::lock(&handle);

        let Some(index) = state.files.iter().position(|f| f.id == file_id) else {
            return false;
        };
        let record = state.files.remove(index);
        if state.chart.as_ref().is_some_and(|c| c.file_id == file_id) {
            state.chart = None;
        }
        self.discard(Path::new(&record.server_path));

        log::info!("removed {} ({})", record.original_filename, record.id);
        true
    }

    /// Overwrite an existing record with a new upload
    ///
    /// The record keeps its id and position. Returns `Ok(false)` if the
    /// session holds no record with `file_id`.
    pub fn replace_file(
        &self,
        session_id: &str,
        file_id: &str,
        bytes: &[u8],
        filename: &str,
    ) -> Result<bool, FileStoreError> {
        let handle = self.session(session_id)?;
        let mut state = session::lock(&handle);

        let Some(index) = state.files.iter().position(|f| f.id == file_id) else {
            return Ok(false);
        };
        validator::validate(filename, bytes, self.max_upload_bytes)?;

        let old_path = PathBuf::from(&state.files[index].server_path);
        let path = self.write_upload(&mut state, filename, bytes, Some(file_id))?;
        if path != old_path {
            self.discard(&old_path);
        }

        let record = &mut state.files[index];
        record.original_filename = file_name_of(&path);
        record.server_path = path.to_string_lossy().to_string();
        if state.chart.as_ref().is_some_and(|c| c.file_id == file_id) {
            state.chart = None;
        }

        log::info!("replaced contents of {file_id}");
        Ok(true)
    }

    /// Make `filename` the active chart of the session behind `handle`
    ///
    /// Rendering happens without the session lock, so the source record may
    /// have been deleted or replaced, or the session logged out, in the
    /// meantime. The chart is attached only when `record` is still current
    /// and the session still owns `dir_id`. Otherwise the image is removed
    /// and `false` is returned.
    pub fn attach_chart(
        &self,
        handle: &SessionHandle,
        record: &FileRecord,
        dir_id: &str,
        filename: &str,
    ) -> bool {
        let mut state = session::lock(handle);
        let owns_dir = state.session_dir_id.as_deref() == Some(dir_id);
        let current = state
            .file(&record.id)
            .is_some_and(|f| f.server_path == record.server_path);

        if owns_dir && current {
            state.chart = Some(ActiveChart {
                file_id: record.id.clone(),
                filename: filename.to_string(),
            });
            return true;
        }

        let out_dir = self.paths.session_charts(dir_id);
        if owns_dir {
            self.discard(&out_dir.join(filename));
        } else if out_dir.is_dir() {
            // The session was cleared while rendering
            if let Err(e) = fs::remove_dir_all(&out_dir) {
                self.deletion_failures.fetch_add(1, Ordering::Relaxed);
                log::warn!("could not remove {}: {}", out_dir.display(), e);
            }
        }
        log::info!("dropped chart {} for stale record {}", filename, record.id);
        false
    }

    /// Records of a session in insertion order
    pub fn list_files(&self, session_id: &str) -> Vec<FileRecord> {
        match self.session(session_id) {
            Ok(handle) => session::lock(&handle).files.clone(),
            Err(_) => Vec::new(),
        }
    }

    pub fn get_file(&self, session_id: &str, file_id: &str) -> Option<FileRecord> {
        let handle = self.session(session_id).ok()?;
        let state = session::lock(&handle);
        state.file(file_id).cloned()
    }

    /// Delete everything a session stored on disk and forget its records
    pub fn clear_session(&self, session_id: &str) {
        let Ok(handle) = self.session(session_id) else {
            return;
        };
        let mut state = session::lock(&handle);
        self.clear_state(&mut state);
    }

    /// Same as [`clear_session`](Self::clear_session) for a handle that is
    /// no longer reachable through the session store
    pub fn clear_handle(&self, handle: &SessionHandle) {
        let mut state = session::lock(handle);
        self.clear_state(&mut state);
    }

    fn clear_state(&self, state: &mut SessionState) {
        if let Some(dir_id) = state.session_dir_id.take() {
            for dir in [
                self.paths.session_uploads(&dir_id),
                self.paths.session_charts(&dir_id),
            ] {
                if dir.is_dir() {
                    if let Err(e) = fs::remove_dir_all(&dir) {
                        self.deletion_failures.fetch_add(1, Ordering::Relaxed);
                        log::warn!("could not remove {}: {}", dir.display(), e);
                    }
                }
            }
        }
        state.files.clear();
        state.chart = None;
    }

    // Writes bytes under the session directory, picking a name no other
    // record in the session is using. `replacing` names the record whose
    // current path may be reused.
    fn write_upload(
        &self,
        state: &mut SessionState,
        filename: &str,
        bytes: &[u8],
        replacing: Option<&str>,
    ) -> Result<PathBuf, FileStoreError> {
        let dir = self.paths.session_uploads(state.ensure_dir_id());
        fs::create_dir_all(&dir)?;

        let mut safe_name = sanitize_filename(filename);
        if safe_name.is_empty() {
            safe_name = format!("file_{}.csv", Uuid::new_v4().simple());
        }

        // Stems are compared case-folded: charts are named after the stem, so
        // `Sales.csv` and `Sales.CSV` must not share one.
        let taken = |candidate: &Path| {
            let key = stem_key(candidate);
            state.files.iter().any(|f| {
                Some(f.id.as_str()) != replacing && stem_key(Path::new(&f.server_path)) == key
            })
        };

        let mut path = dir.join(&safe_name);
        let (stem, ext) = split_name(&safe_name);
        let mut n = 1;
        while taken(&path) {
            path = dir.join(format!("{stem}_{n}{ext}"));
            n += 1;
        }

        fs::write(&path, bytes)?;
        Ok(path)
    }

    fn discard(&self, path: &Path) {
        if let Err(e) = fs::remove_file(path) {
            self.deletion_failures.fetch_add(1, Ordering::Relaxed);
            log::warn!("could not delete {}: {}", path.display(), e);
        }
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn stem_key(path: &Path) -> Option<String> {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().to_lowercase())
}

fn split_name(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(dot) if dot > 0 => (&name[..dot], &name[dot..]),
        _ => (name, ""),
    }
}
