//! Policy store for intercepted targets.
//!
//! The store holds two disjoint sets of target identifiers, allowed and
//! denied, and answers lookups for the request path. It is the only place
//! the proxy keeps decisions; the decision broker is its only writer.
//!
//! # Persistence
//!
//! Every change enqueues a full snapshot to a background writer task that
//! hands it to a [`PolicyPersistence`] implementation. Writes are
//! fire-and-forget: a failed write is logged and the in-memory state stays
//! authoritative for the rest of the process. Snapshots are queued in the
//! order the changes were made, and the writer collapses bursts to the most
//! recent one.
//!
//! # Example
//!
//! ```ignore
//! use codeshield::proxy::policy::{Classification, PolicyStore, Verdict};
//!
//! let store = PolicyStore::load(persistence);
//! assert_eq!(store.lookup("http://a.test/x"), Classification::Unknown);
//!
//! store.record(&target, Verdict::Allowed);
//! assert_eq!(store.lookup("http://a.test/x"), Classification::Allowed);
//! ```

use super::target::TargetId;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// A resolved decision for a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Requests to the target are forwarded.
    Allowed,
    /// Requests to the target are rejected.
    Denied,
}

/// Result of a policy lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Target is in the allowed set.
    Allowed,
    /// Target is in the denied set.
    Denied,
    /// Target has never been decided.
    Unknown,
}

impl From<Verdict> for Classification {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Allowed => Classification::Allowed,
            Verdict::Denied => Classification::Denied,
        }
    }
}

/// Point-in-time copy of both policy sets, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicySnapshot {
    /// Allowed targets.
    pub allowed: Vec<TargetId>,
    /// Denied targets.
    pub denied: Vec<TargetId>,
}

impl PolicySnapshot {
    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.allowed.len() + self.denied.len()
    }

    /// Whether both sets are empty.
    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty() && self.denied.is_empty()
    }
}

/// Errors from a persistence backend.
#[derive(Debug, Error)]
pub enum PersistError {
    /// Reading or writing the backing file failed.
    #[error("Policy I/O error on {path}: {source}")]
    Io {
        /// Path of the backing file.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The persisted data could not be decoded or encoded.
    #[error("Invalid policy data in {path}: {message}")]
    Format {
        /// Path of the backing file.
        path: PathBuf,
        /// Description of the problem.
        message: String,
    },
}

/// Durable storage for the policy sets.
///
/// Both methods are blocking; the store calls `save` from a blocking task.
pub trait PolicyPersistence: Send + Sync + 'static {
    /// Load the persisted sets.
    fn load(&self) -> Result<PolicySnapshot, PersistError>;

    /// Replace the persisted sets with `snapshot`.
    fn save(&self, snapshot: &PolicySnapshot) -> Result<(), PersistError>;
}

/// Both policy sets.
///
/// `verdicts` answers lookups; the vectors keep append order for persistence.
#[derive(Default)]
struct PolicySets {
    verdicts: HashMap<TargetId, Verdict>,
    allowed: Vec<TargetId>,
    denied: Vec<TargetId>,
}

impl PolicySets {
    fn from_snapshot(snapshot: PolicySnapshot) -> Self {
        let mut sets = Self::default();
        for target in snapshot.allowed {
            sets.insert(target, Verdict::Allowed);
        }
        // A target persisted in both lists ends up denied.
        for target in snapshot.denied {
            sets.insert(target, Verdict::Denied);
        }
        sets
    }

    /// Insert or overwrite. Returns false when nothing changed.
    fn insert(&mut self, target: TargetId, verdict: Verdict) -> bool {
        match self.verdicts.insert(target.clone(), verdict) {
            Some(previous) if previous == verdict => return false,
            Some(previous) => self.list_mut(previous).retain(|t| t != &target),
            None => {}
        }
        self.list_mut(verdict).push(target);
        true
    }

    fn list_mut(&mut self, verdict: Verdict) -> &mut Vec<TargetId> {
        match verdict {
            Verdict::Allowed => &mut self.allowed,
            Verdict::Denied => &mut self.denied,
        }
    }

    fn snapshot(&self) -> PolicySnapshot {
        PolicySnapshot {
            allowed: self.allowed.clone(),
            denied: self.denied.clone(),
        }
    }
}

enum WriterMessage {
    Save(PolicySnapshot),
    Flush(oneshot::Sender<()>),
}

/// In-memory policy store with write-behind persistence.
pub struct PolicyStore {
    sets: RwLock<PolicySets>,
    writer: Option<mpsc::UnboundedSender<WriterMessage>>,
}

impl PolicyStore {
    /// Create an empty store that never persists.
    pub fn in_memory() -> Self {
        Self::from_snapshot(PolicySnapshot::default())
    }

    /// Create a non-persisting store seeded with `snapshot`.
    pub fn from_snapshot(snapshot: PolicySnapshot) -> Self {
        Self {
            sets: RwLock::new(PolicySets::from_snapshot(snapshot)),
            writer: None,
        }
    }

    /// Load the store from `persistence` and start its background writer.
    ///
    /// Loading is best-effort: a missing or unreadable policy yields empty
    /// sets. Must be called from within a Tokio runtime.
    pub fn load(persistence: Arc<dyn PolicyPersistence>) -> Self {
        let snapshot = match persistence.load() {
            Ok(snapshot) => {
                info!(
                    "Loaded policy: {} allowed, {} denied",
                    snapshot.allowed.len(),
                    snapshot.denied.len()
                );
                snapshot
            }
            Err(e) => {
                warn!("Starting with empty policy: {}", e);
                PolicySnapshot::default()
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_writer(persistence, rx));

        Self {
            sets: RwLock::new(PolicySets::from_snapshot(snapshot)),
            writer: Some(tx),
        }
    }

    /// Classify a target. Never waits on I/O.
    pub fn lookup(&self, target: &str) -> Classification {
        self.read_sets()
            .verdicts
            .get(target)
            .map_or(Classification::Unknown, |v| Classification::from(*v))
    }

    /// Record a decision for a target.
    ///
    /// Recording the verdict a target already has is a no-op. A different
    /// verdict replaces the old one. Returns true when the store changed, in
    /// which case a persistence write has been queued.
    pub fn record(&self, target: &TargetId, verdict: Verdict) -> bool {
        let mut sets = self.sets.write().unwrap_or_else(PoisonError::into_inner);
        if !sets.insert(target.clone(), verdict) {
            debug!("Policy for {} already {:?}", target, verdict);
            return false;
        }

        debug!("Recorded {:?} for {}", verdict, target);

        // Queue while still holding the lock so snapshots arrive in order.
        if let Some(ref writer) = self.writer
            && writer.send(WriterMessage::Save(sets.snapshot())).is_err()
        {
            warn!("Policy writer stopped; {} kept in memory only", target);
        }
        true
    }

    /// Copy of both sets.
    pub fn snapshot(&self) -> PolicySnapshot {
        self.read_sets().snapshot()
    }

    /// Number of allowed targets.
    pub fn allowed_count(&self) -> usize {
        self.read_sets().allowed.len()
    }

    /// Number of denied targets.
    pub fn denied_count(&self) -> usize {
        self.read_sets().denied.len()
    }

    /// Wait until every queued snapshot has been handed to persistence.
    pub async fn flush(&self) {
        let Some(ref writer) = self.writer else {
            return;
        };
        let (tx, rx) = oneshot::channel();
        if writer.send(WriterMessage::Flush(tx)).is_ok() {
            // Writer gone means nothing left to wait for.
            let _ = rx.await;
        }
    }

    fn read_sets(&self) -> std::sync::RwLockReadGuard<'_, PolicySets> {
        self.sets.read().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Background task that serializes persistence writes.
async fn run_writer(
    persistence: Arc<dyn PolicyPersistence>,
    mut rx: mpsc::UnboundedReceiver<WriterMessage>,
) {
    while let Some(message) = rx.recv().await {
        match message {
            WriterMessage::Save(mut snapshot) => {
                let mut flushes = Vec::new();
                // Collapse a burst of saves into the latest one.
                while let Ok(next) = rx.try_recv() {
                    match next {
                        WriterMessage::Save(newer) => snapshot = newer,
                        WriterMessage::Flush(tx) => {
                            flushes.push(tx);
                            break;
                        }
                    }
                }
                write_snapshot(&persistence, snapshot).await;
                for tx in flushes {
                    let _ = tx.send(());
                }
            }
            WriterMessage::Flush(tx) => {
                let _ = tx.send(());
            }
        }
    }
    debug!("Policy writer stopped");
}

async fn write_snapshot(persistence: &Arc<dyn PolicyPersistence>, snapshot: PolicySnapshot) {
    let persistence = persistence.clone();
    let entries = snapshot.len();
    match tokio::task::spawn_blocking(move || persistence.save(&snapshot)).await {
        Ok(Ok(())) => debug!("Persisted policy ({} entries)", entries),
        Ok(Err(e)) => warn!("Failed to persist policy: {}", e),
        Err(e) => warn!("Policy persistence task failed: {}", e),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Persistence double that keeps the last snapshot in memory.
    #[derive(Default)]
    pub(crate) struct MemoryPersistence {
        pub(crate) stored: Mutex<PolicySnapshot>,
        pub(crate) saves: Mutex<usize>,
        pub(crate) fail_saves: bool,
    }

    impl PolicyPersistence for MemoryPersistence {
        fn load(&self) -> Result<PolicySnapshot, PersistError> {
            Ok(self.stored.lock().unwrap().clone())
        }

        fn save(&self, snapshot: &PolicySnapshot) -> Result<(), PersistError> {
            *self.saves.lock().unwrap() += 1;
            if self.fail_saves {
                return Err(PersistError::Io {
                    path: PathBuf::from("/dev/full"),
                    source: std::io::Error::other("disk full"),
                });
            }
            *self.stored.lock().unwrap() = snapshot.clone();
            Ok(())
        }
    }

    struct BrokenPersistence;

    impl PolicyPersistence for BrokenPersistence {
        fn load(&self) -> Result<PolicySnapshot, PersistError> {
            Err(PersistError::Format {
                path: PathBuf::from("policy.toml"),
                message: "garbage".into(),
            })
        }

        fn save(&self, _snapshot: &PolicySnapshot) -> Result<(), PersistError> {
            Ok(())
        }
    }

    pub(crate) fn target(s: &str) -> TargetId {
        TargetId::new(s).unwrap()
    }

    #[test]
    fn test_unknown_by_default() {
        let store = PolicyStore::in_memory();
        assert_eq!(store.lookup("http://a.test/x"), Classification::Unknown);
    }

    #[test]
    fn test_record_allow_then_lookup() {
        let store = PolicyStore::in_memory();
        assert!(store.record(&target("http://a.test/x"), Verdict::Allowed));
        assert_eq!(store.lookup("http://a.test/x"), Classification::Allowed);
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        let store = PolicyStore::in_memory();
        store.record(&target("http://a.test/X"), Verdict::Denied);
        assert_eq!(store.lookup("http://a.test/X"), Classification::Denied);
        assert_eq!(store.lookup("http://a.test/x"), Classification::Unknown);
    }

    #[test]
    fn test_record_same_verdict_is_noop() {
        let store = PolicyStore::in_memory();
        assert!(store.record(&target("t"), Verdict::Denied));
        assert!(!store.record(&target("t"), Verdict::Denied));
        assert_eq!(store.denied_count(), 1);
        assert_eq!(store.allowed_count(), 0);
    }

    #[test]
    fn test_overwrite_moves_between_sets() {
        let store = PolicyStore::in_memory();
        store.record(&target("t"), Verdict::Allowed);
        assert!(store.record(&target("t"), Verdict::Denied));

        assert_eq!(store.lookup("t"), Classification::Denied);
        let snapshot = store.snapshot();
        assert!(snapshot.allowed.is_empty());
        assert_eq!(snapshot.denied, vec![target("t")]);
    }

    #[test]
    fn test_snapshot_keeps_insertion_order() {
        let store = PolicyStore::in_memory();
        for name in ["c", "a", "b"] {
            store.record(&target(name), Verdict::Allowed);
        }
        let snapshot = store.snapshot();
        assert_eq!(snapshot.allowed, vec![target("c"), target("a"), target("b")]);
    }

    #[test]
    fn test_from_snapshot_resolves_conflicts_to_denied() {
        let store = PolicyStore::from_snapshot(PolicySnapshot {
            allowed: vec![target("both"), target("ok")],
            denied: vec![target("both")],
        });
        assert_eq!(store.lookup("both"), Classification::Denied);
        assert_eq!(store.lookup("ok"), Classification::Allowed);
        assert_eq!(store.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_load_and_persist() {
        let persistence = Arc::new(MemoryPersistence::default());
        persistence.stored.lock().unwrap().allowed.push(target("seed"));

        let store = PolicyStore::load(persistence.clone());
        assert_eq!(store.lookup("seed"), Classification::Allowed);

        store.record(&target("new"), Verdict::Denied);
        store.flush().await;

        let stored = persistence.stored.lock().unwrap().clone();
        assert_eq!(stored.allowed, vec![target("seed")]);
        assert_eq!(stored.denied, vec![target("new")]);
    }

    #[tokio::test]
    async fn test_idempotent_record_does_not_rewrite() {
        let persistence = Arc::new(MemoryPersistence::default());
        let store = PolicyStore::load(persistence.clone());

        store.record(&target("t"), Verdict::Allowed);
        store.flush().await;
        let saves = *persistence.saves.lock().unwrap();

        store.record(&target("t"), Verdict::Allowed);
        store.flush().await;

        assert_eq!(*persistence.saves.lock().unwrap(), saves);
        assert_eq!(store.lookup("t"), Classification::Allowed);
    }

    #[tokio::test]
    async fn test_save_failure_keeps_memory_state() {
        let persistence = Arc::new(MemoryPersistence {
            fail_saves: true,
            ..Default::default()
        });
        let store = PolicyStore::load(persistence.clone());

        assert!(store.record(&target("t"), Verdict::Allowed));
        store.flush().await;

        assert!(*persistence.saves.lock().unwrap() >= 1);
        assert_eq!(store.lookup("t"), Classification::Allowed);
        assert!(persistence.stored.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_persisted_state_yields_empty_store() {
        let store = PolicyStore::load(Arc::new(BrokenPersistence));
        assert!(store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_last_snapshot_wins() {
        let persistence = Arc::new(MemoryPersistence::default());
        let store = PolicyStore::load(persistence.clone());

        for i in 0..50 {
            store.record(&target(&format!("t{i}")), Verdict::Allowed);
        }
        store.flush().await;

        assert_eq!(persistence.stored.lock().unwrap().allowed.len(), 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_readers_observe_record() {
        let store = Arc::new(PolicyStore::in_memory());
        store.record(&target("shared"), Verdict::Allowed);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                (0..100).all(|_| store.lookup("shared") == Classification::Allowed)
            }));
        }
        for handle in handles {
            assert!(handle.await.unwrap());
        }
    }
}
