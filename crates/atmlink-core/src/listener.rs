// ── Synchronous listener registry ──
//
// Callback fan-out shared by the tracker and the store. Listeners are
// invoked outside the registry lock, on a snapshot of the current set, so a
// listener may subscribe or unsubscribe from within its own callback. A
// panicking listener is logged and skipped; the rest still run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

type Entries<F> = Mutex<Vec<(u64, Arc<F>)>>;

pub(crate) struct ListenerSet<F: ?Sized> {
    next_id: AtomicU64,
    entries: Arc<Entries<F>>,
}

impl<F: ?Sized + Send + Sync + 'static> ListenerSet<F> {
    pub(crate) fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            entries: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a listener. It stays registered until the returned
    /// [`Subscription`] is explicitly unsubscribed.
    pub(crate) fn add(&self, listener: Arc<F>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.entries).push((id, listener));

        let weak: Weak<Entries<F>> = Arc::downgrade(&self.entries);
        Subscription::new(move || {
            if let Some(entries) = weak.upgrade() {
                lock(&entries).retain(|(entry_id, _)| *entry_id != id);
            }
        })
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Invoke every registered listener through `call`.
    pub(crate) fn notify(&self, what: &'static str, call: impl Fn(&F)) {
        let listeners: Vec<Arc<F>> = lock(&self.entries)
            .iter()
            .map(|(_, f)| Arc::clone(f))
            .collect();
        for listener in listeners {
            invoke_guarded(what, || call(listener.as_ref()));
        }
    }
}

/// Run a listener, containing any panic it raises.
pub(crate) fn invoke_guarded(what: &'static str, f: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(f)).is_err() {
        tracing::error!(listener = what, "listener panicked; continuing with the rest");
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── Subscription ─────────────────────────────────────────────────────

/// Handle returned by every `subscribe`-style call.
///
/// Dropping it does **not** unsubscribe; call
/// [`unsubscribe`](Self::unsubscribe). Unsubscribing twice is harmless.
pub struct Subscription {
    remove: Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl Subscription {
    fn new(remove: impl FnOnce() + Send + 'static) -> Self {
        Self {
            remove: Mutex::new(Some(Box::new(remove))),
        }
    }

    pub fn unsubscribe(&self) {
        let remove = lock(&self.remove).take();
        if let Some(remove) = remove {
            remove();
        }
    }

    pub fn is_active(&self) -> bool {
        lock(&self.remove).is_some()
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("active", &self.is_active())
            .finish()
    }
}
