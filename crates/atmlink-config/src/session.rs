// ── File-backed session flags ──
//
// One small JSON file per session id. Lets repeated invocations that share
// a session (e.g. the same terminal, via `ATMLINK_SESSION`) remember that
// the initial connection check already ran.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tracing::{debug, warn};

use atmlink_core::SessionStore;

use crate::ConfigError;

type Flags = BTreeMap<String, bool>;

#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    flags: Mutex<Flags>,
}

impl FileSessionStore {
    /// Open (or start) the session file at `path`. An unreadable or corrupt
    /// file starts the session afresh.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let flags = match std::fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "ignoring corrupt session file");
                Flags::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Flags::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            flags: Mutex::new(flags),
        })
    }

    /// The store for session `id` inside `dir`.
    pub fn for_session(dir: &Path, id: &str) -> Result<Self, ConfigError> {
        let id = sanitize(id);
        if id.is_empty() {
            return Err(ConfigError::Validation {
                field: "session".into(),
                reason: "session id must contain letters or digits".into(),
            });
        }
        Self::open(dir.join(format!("session-{id}.json")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Forget every flag and delete the file.
    pub fn clear(&self) -> Result<(), ConfigError> {
        self.lock().clear();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn persist(&self, flags: &Flags) -> Result<(), ConfigError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, serde_json::to_string_pretty(flags)?)?;
        Ok(())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Flags> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionStore for FileSessionStore {
    fn get_flag(&self, key: &str) -> bool {
        self.lock().get(key).copied().unwrap_or(false)
    }

    fn set_flag(&self, key: &str, value: bool) {
        let mut flags = self.lock();
        flags.insert(key.to_owned(), value);
        match self.persist(&flags) {
            Ok(()) => debug!(key, value, path = %self.path.display(), "session flag saved"),
            Err(e) => warn!(key, error = %e, "could not persist session flag"),
        }
    }
}

fn sanitize(id: &str) -> String {
    id.chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use atmlink_core::session::INITIAL_CHECK_FLAG;

    use super::*;

    #[test]
    fn flags_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::for_session(dir.path(), "tty-3").unwrap();
        assert!(!store.get_flag(INITIAL_CHECK_FLAG));

        store.set_flag(INITIAL_CHECK_FLAG, true);

        let reopened = FileSessionStore::for_session(dir.path(), "tty-3").unwrap();
        assert!(reopened.get_flag(INITIAL_CHECK_FLAG));
        let other = FileSessionStore::for_session(dir.path(), "tty-4").unwrap();
        assert!(!other.get_flag(INITIAL_CHECK_FLAG));
    }

    #[test]
    fn clear_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::for_session(dir.path(), "tty-9").unwrap();
        store.set_flag("x", true);
        assert!(store.path().exists());
        assert!(store.path().to_string_lossy().contains("tty-9"));

        store.clear().unwrap();

        assert!(!store.path().exists());
        assert!(!store.get_flag("x"));
        store.clear().unwrap();
    }

    #[test]
    fn corrupt_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session-bad.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = FileSessionStore::open(&path).unwrap();
        assert!(!store.get_flag(INITIAL_CHECK_FLAG));
    }

    #[test]
    fn session_id_is_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSessionStore::for_session(dir.path(), "../../etc").unwrap();
        assert_eq!(store.path(), dir.path().join("session-etc.json"));
        assert!(FileSessionStore::for_session(dir.path(), "///").is_err());
    }
}
