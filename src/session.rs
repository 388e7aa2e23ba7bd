use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, SystemTime};
use uuid::Uuid;

/// Metadata for one uploaded CSV
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Globally unique, immutable identifier (`file_<hex>`)
    pub id: String,

    /// Sanitized name the file was uploaded under
    pub original_filename: String,

    /// Location of the file's bytes on disk
    pub server_path: String,
}

/// The most recently generated chart for a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveChart {
    /// Record the chart was generated from
    pub file_id: String,

    /// Chart image name inside the session's chart directory
    pub filename: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashKind {
    Success,
    Error,
    Info,
}

/// One-shot message shown on the next rendered page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flash {
    pub kind: FlashKind,
    pub message: String,
}

/// Server-side state behind a session cookie
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Identifier of the authenticated user
    pub user_id: String,

    /// Time when the session expires
    pub expires_at: SystemTime,

    /// Opaque upload directory name, assigned on first upload
    pub session_dir_id: Option<String>,

    /// Uploaded files in insertion order
    pub files: Vec<FileRecord>,

    /// Chart currently shown on the dashboard
    pub chart: Option<ActiveChart>,

    flashes: Vec<Flash>,
}

impl SessionState {
    pub fn new(user_id: &str, ttl: Duration) -> Self {
        Self {
            user_id: user_id.to_string(),
            expires_at: SystemTime::now() + ttl,
            session_dir_id: None,
            files: Vec::new(),
            chart: None,
            flashes: Vec::new(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= SystemTime::now()
    }

    /// The session's directory id, generating one on first use
    pub fn ensure_dir_id(&mut self) -> &str {
        self.session_dir_id
            .get_or_insert_with(|| Uuid::new_v4().simple().to_string())
    }

    pub fn file(&self, file_id: &str) -> Option<&FileRecord> {
        self.files.iter().find(|f| f.id == file_id)
    }

    pub fn flash(&mut self, kind: FlashKind, message: impl Into<String>) {
        self.flashes.push(Flash {
            kind,
            message: message.into(),
        });
    }

    /// Remove and return all pending flashes
    pub fn take_flashes(&mut self) -> Vec<Flash> {
        std::mem::take(&mut self.flashes)
    }
}

/// Shared handle to one session's state
///
/// The mutex serializes every mutation against a single session.
pub type SessionHandle = Arc<Mutex<SessionState>>;

/// Lock a session, recovering the state if a previous holder panicked
pub fn lock(handle: &SessionHandle) -> MutexGuard<'_, SessionState> {
    handle.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Storage for server-side session state keyed by an opaque token
pub trait SessionStore: Send + Sync {
    /// Start a session for `user_id` and return its token
    fn create(&self, user_id: &str) -> String;

    /// Look up a live session; expired sessions are treated as absent
    fn get(&self, token: &str) -> Option<SessionHandle>;

    /// Drop a session and return its last state
    fn remove(&self, token: &str) -> Option<SessionHandle>;
}

/// Process-local session store
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, SessionHandle>>,
    ttl: Duration,
}

impl InMemorySessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Number of sessions currently held, expired or not
    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SessionStore for InMemorySessionStore {
    fn create(&self, user_id: &str) -> String {
        let token = Uuid::new_v4().to_string();
        let state = Arc::new(Mutex::new(SessionState::new(user_id, self.ttl)));

        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        sessions.retain(|_, handle| !lock(handle).is_expired());
        sessions.insert(token.clone(), state);

        token
    }

    fn get(&self, token: &str) -> Option<SessionHandle> {
        let sessions = self
            .sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let handle = sessions.get(token)?;
        if lock(handle).is_expired() {
            return None;
        }
        Some(Arc::clone(handle))
    }

    fn remove(&self, token: &str) -> Option<SessionHandle> {
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(token)
    }
}
