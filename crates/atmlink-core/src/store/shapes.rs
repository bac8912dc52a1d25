// ── Named shape collection ──
//
// Keyed by shape name (case-sensitive). Storage is a `DashMap`; the
// published snapshot lives in a `watch` channel and is only rebuilt when a
// change is *notified*, so a batch of quiet upserts followed by one
// `notify()` costs subscribers a single update.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::watch;
use tracing::debug;

use crate::listener::{ListenerSet, Subscription};
use crate::model::{Shape, ShapeKind};
use crate::stream::ShapeStream;

pub type ShapeSnapshot = Arc<Vec<Arc<Shape>>>;
pub type ShapesListener = dyn Fn(&ShapeSnapshot) + Send + Sync;

pub struct ShapeCollection {
    by_name: DashMap<String, Arc<Shape>>,
    snapshot: watch::Sender<ShapeSnapshot>,
    listeners: ListenerSet<ShapesListener>,
}

impl Default for ShapeCollection {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ShapeCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShapeCollection")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl ShapeCollection {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));
        Self {
            by_name: DashMap::new(),
            snapshot,
            listeners: ListenerSet::new(),
        }
    }

    // ── Mutation ─────────────────────────────────────────────────────

    /// Insert or replace by name. Returns `true` if the name was new.
    /// Pass `notify = false` when applying a batch, then call
    /// [`notify`](Self::notify) once.
    pub fn upsert_shape(&self, shape: Shape, notify: bool) -> bool {
        let name = shape.name.clone();
        let is_new = self.by_name.insert(name, Arc::new(shape)).is_none();
        if notify {
            self.notify();
        }
        is_new
    }

    /// Apply every shape quietly, then notify once. Returns how many were
    /// applied.
    pub fn upsert_shapes(&self, shapes: impl IntoIterator<Item = Shape>) -> usize {
        let mut applied = 0;
        for shape in shapes {
            self.upsert_shape(shape, false);
            applied += 1;
        }
        if applied > 0 {
            self.notify();
        }
        applied
    }

    /// Remove by name. Notifies only if something was removed.
    pub fn delete_shape(&self, name: &str) -> bool {
        let removed = self.by_name.remove(name).is_some();
        if removed {
            self.notify();
        }
        removed
    }

    /// Remove every shape. Returns how many were removed.
    pub fn clear_all(&self) -> usize {
        let count = self.by_name.len();
        if count == 0 {
            return 0;
        }
        self.by_name.clear();
        debug!(count, "cleared all shapes");
        self.notify();
        count
    }

    /// Remove the shapes produced by one context.
    pub fn clear_for_context(&self, context_id: &str) -> usize {
        let removed = self.retain_quiet(|s| s.context_id.as_deref() != Some(context_id));
        if removed > 0 {
            debug!(count = removed, context_id, "cleared context shapes");
            self.notify();
        }
        removed
    }

    /// Show or hide a shape. Returns `true` only if the flag changed.
    pub fn set_visibility(&self, name: &str, visible: bool) -> bool {
        let changed = match self.by_name.get_mut(name) {
            Some(mut entry) if entry.visible != visible => {
                Arc::make_mut(entry.value_mut()).visible = visible;
                true
            }
            _ => false,
        };
        if changed {
            self.notify();
        }
        changed
    }

    /// Drop every shape for which `keep` is false, without notifying.
    /// Returns how many were removed.
    pub(crate) fn retain_quiet(&self, keep: impl Fn(&Shape) -> bool) -> usize {
        let before = self.by_name.len();
        self.by_name.retain(|_, shape| keep(shape));
        before - self.by_name.len()
    }

    /// Publish the current contents to subscribers.
    pub fn notify(&self) {
        let snap = self.build_snapshot();
        self.snapshot.send_replace(Arc::clone(&snap));
        self.listeners.notify("shapes", |l| l(&snap));
    }

    // ── Queries ──────────────────────────────────────────────────────

    pub fn get(&self, name: &str) -> Option<Arc<Shape>> {
        self.by_name.get(name).map(|r| Arc::clone(r.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn by_kind(&self, kind: ShapeKind) -> Vec<Arc<Shape>> {
        self.filtered(|s| s.kind() == kind)
    }

    pub fn by_context(&self, context_id: &str) -> Vec<Arc<Shape>> {
        self.filtered(|s| s.context_id.as_deref() == Some(context_id))
    }

    /// Current contents sorted by name, including quiet changes not yet
    /// notified.
    pub fn snapshot(&self) -> ShapeSnapshot {
        self.build_snapshot()
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.by_name.iter().map(|r| r.key().clone()).collect();
        names.sort();
        names
    }

    // ── Subscription ─────────────────────────────────────────────────

    /// Called with the full snapshot on every notified change.
    pub fn subscribe(&self, listener: impl Fn(&ShapeSnapshot) + Send + Sync + 'static) -> Subscription {
        self.listeners.add(Arc::new(listener))
    }

    /// Async view of the published snapshots.
    pub fn stream(&self) -> ShapeStream {
        ShapeStream::new(self.snapshot.subscribe())
    }

    // ── Private helpers ──────────────────────────────────────────────

    fn filtered(&self, pred: impl Fn(&Shape) -> bool) -> Vec<Arc<Shape>> {
        let mut out: Vec<Arc<Shape>> = self
            .by_name
            .iter()
            .filter(|r| pred(r.value()))
            .map(|r| Arc::clone(r.value()))
            .collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    fn build_snapshot(&self) -> ShapeSnapshot {
        Arc::new(self.filtered(|_| true))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;

    fn square(name: &str) -> Shape {
        Shape::polygon(name, vec![[0.0, 0.0], [0.0, 1.0], [1.0, 1.0], [1.0, 0.0]])
    }

    fn counting(col: &ShapeCollection) -> (Arc<AtomicUsize>, Subscription) {
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        let sub = col.subscribe(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });
        (hits, sub)
    }

    #[test]
    fn upsert_replaces_by_name() {
        let col = ShapeCollection::new();
        assert!(col.upsert_shape(square("A"), true));

        let replacement = Shape::polyline("A", vec![[5.0, 5.0], [6.0, 6.0]]);
        assert!(!col.upsert_shape(replacement.clone(), true));

        assert_eq!(col.len(), 1);
        assert_eq!(*col.get("A").unwrap(), replacement);
    }

    #[test]
    fn names_are_case_sensitive() {
        let col = ShapeCollection::new();
        col.upsert_shape(square("area"), true);
        col.upsert_shape(square("AREA"), true);
        assert_eq!(col.names(), vec!["AREA".to_owned(), "area".to_owned()]);
    }

    #[test]
    fn batch_notifies_once() {
        let col = ShapeCollection::new();
        let (hits, _sub) = counting(&col);

        let applied = col.upsert_shapes((0..10).map(|i| square(&format!("S{i}"))));

        assert_eq!(applied, 10);
        assert_eq!(col.len(), 10);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn empty_batch_does_not_notify() {
        let col = ShapeCollection::new();
        let (hits, _sub) = counting(&col);
        assert_eq!(col.upsert_shapes(Vec::new()), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn quiet_upsert_waits_for_notify() {
        let col = ShapeCollection::new();
        let stream = col.stream();
        let (hits, _sub) = counting(&col);

        col.upsert_shape(square("A"), false);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(stream.latest().is_empty());
        assert_eq!(col.snapshot().len(), 1);

        col.notify();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(stream.latest().len(), 1);
    }

    #[test]
    fn delete_notifies_only_on_removal() {
        let col = ShapeCollection::new();
        col.upsert_shape(square("A"), true);
        let (hits, _sub) = counting(&col);

        assert!(!col.delete_shape("missing"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        assert!(col.delete_shape("A"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(col.is_empty());
    }

    #[test]
    fn clear_for_context_only_touches_that_context() {
        let col = ShapeCollection::new();
        col.upsert_shapes([
            square("A").with_context("ctx1"),
            square("B").with_context("ctx2"),
            square("C"),
        ]);
        let (hits, _sub) = counting(&col);

        assert_eq!(col.clear_for_context("ctx1"), 1);
        assert_eq!(col.names(), vec!["B".to_owned(), "C".to_owned()]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert_eq!(col.clear_for_context("ctx1"), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn clear_all_is_quiet_when_empty() {
        let col = ShapeCollection::new();
        let (hits, _sub) = counting(&col);
        assert_eq!(col.clear_all(), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        col.upsert_shape(square("A"), true);
        assert_eq!(col.clear_all(), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn visibility_change_notifies_once() {
        let col = ShapeCollection::new();
        col.upsert_shape(square("A"), true);
        let (hits, _sub) = counting(&col);

        assert!(!col.set_visibility("A", true));
        assert!(col.set_visibility("A", false));
        assert!(!col.set_visibility("A", false));
        assert!(!col.set_visibility("missing", false));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!col.get("A").unwrap().visible);
    }

    #[test]
    fn queries_by_kind_and_context() {
        let col = ShapeCollection::new();
        col.upsert_shapes([
            square("P1").with_context("ctx"),
            Shape::polyline("L1", vec![[0.0, 0.0], [1.0, 1.0]]).with_context("ctx"),
            square("P2"),
        ]);

        let polygons: Vec<_> = col
            .by_kind(ShapeKind::Polygon)
            .iter()
            .map(|s| s.name.clone())
            .collect();
        assert_eq!(polygons, vec!["P1".to_owned(), "P2".to_owned()]);
        assert_eq!(col.by_kind(ShapeKind::Polyline).len(), 1);
        assert_eq!(col.by_context("ctx").len(), 2);
    }
}
