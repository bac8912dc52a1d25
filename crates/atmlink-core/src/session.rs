// ── Session-scoped flags ──
//
// A tiny key → bool store whose lifetime is one user session. The
// tracker keeps its "initial connection check done" marker here so that
// a tracker rebuilt within the same session does not repeat the check.

use std::sync::Arc;

use dashmap::DashMap;

/// Key under which the tracker records its one-shot initial check.
pub const INITIAL_CHECK_FLAG: &str = "atmlink.initial_connection_checked";

/// Persistence for session-scoped boolean flags.
///
/// Implementations must be cheap and non-failing; a backend that cannot
/// persist should log and behave as if the flag were unset.
pub trait SessionStore: Send + Sync {
    fn get_flag(&self, key: &str) -> bool;
    fn set_flag(&self, key: &str, value: bool);
}

/// In-process session store. Clones share the same flags.
#[derive(Debug, Clone, Default)]
pub struct MemorySessionStore {
    flags: Arc<DashMap<String, bool>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get_flag(&self, key: &str) -> bool {
        self.flags.get(key).is_some_and(|v| *v)
    }

    fn set_flag(&self, key: &str, value: bool) {
        self.flags.insert(key.to_owned(), value);
    }
}
