use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::domain::Libraries;

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub fresh: bool,
    pub libraries: Arc<Libraries>,
}

struct Entry {
    libraries: Arc<Libraries>,
    fetched_at: Instant,
}

#[derive(Default)]
struct StoreState {
    entries: HashMap<String, Entry>,
    last_success: Option<DateTime<Utc>>,
}

pub struct SnapshotStore {
    lifetime: Duration,
    state: RwLock<StoreState>,
}

impl SnapshotStore {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            lifetime,
            state: RwLock::new(StoreState::default()),
        }
    }

    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Returns the stored snapshot even when stale; an empty tree if the
    /// sponsor was never stored.
    pub fn get(&self, sponsor: &str) -> Snapshot {
        let state = self.state.read();
        match state.entries.get(sponsor) {
            Some(entry) => Snapshot {
                fresh: entry.fetched_at.elapsed() < self.lifetime,
                libraries: Arc::clone(&entry.libraries),
            },
            None => Snapshot {
                fresh: false,
                libraries: Arc::default(),
            },
        }
    }

    pub fn set(&self, sponsor: &str, libraries: Libraries) -> Arc<Libraries> {
        let libraries = Arc::new(libraries);
        let entry = Entry {
            libraries: Arc::clone(&libraries),
            fetched_at: Instant::now(),
        };

        let mut state = self.state.write();
        state.entries.insert(sponsor.to_string(), entry);
        state.last_success = Some(Utc::now());
        libraries
    }

    pub fn last_success(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_success
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::domain::Library;

    fn tree(id: &str) -> Libraries {
        Libraries::new(vec![Library {
            library_id: id.to_string(),
            ..Library::default()
        }])
    }

    #[test]
    fn never_stored_is_stale_and_empty() {
        let store = SnapshotStore::new(Duration::from_secs(60));
        let snapshot = store.get("Ben Lehner");
        assert!(!snapshot.fresh);
        assert!(snapshot.libraries.is_empty());
        assert!(store.last_success().is_none());
    }

    #[test]
    fn set_then_get_is_fresh() {
        let store = SnapshotStore::new(Duration::from_secs(60));
        let before = Utc::now();
        let stored = store.set("Ben Lehner", tree("lib1"));

        let snapshot = store.get("Ben Lehner");
        assert!(snapshot.fresh);
        assert_eq!(*snapshot.libraries, tree("lib1"));
        assert!(Arc::ptr_eq(&stored, &snapshot.libraries));
        assert!(store.last_success().unwrap() >= before);
        assert!(!store.get("Someone Else").fresh);
    }

    #[test]
    fn entries_go_stale_after_lifetime() {
        let store = SnapshotStore::new(Duration::from_millis(20));
        store.set("Ben Lehner", tree("lib1"));
        thread::sleep(Duration::from_millis(40));

        let snapshot = store.get("Ben Lehner");
        assert!(!snapshot.fresh);
        assert_eq!(*snapshot.libraries, tree("lib1"));
    }

    #[test]
    fn zero_lifetime_is_never_fresh() {
        let store = SnapshotStore::new(Duration::ZERO);
        store.set("Ben Lehner", tree("lib1"));
        assert!(!store.get("Ben Lehner").fresh);
    }

    #[test]
    fn set_replaces_without_touching_held_snapshots() {
        let store = SnapshotStore::new(Duration::from_secs(60));
        store.set("Ben Lehner", tree("lib1"));
        let held = store.get("Ben Lehner").libraries;

        store.set("Ben Lehner", tree("lib2"));
        assert_eq!(*held, tree("lib1"));
        assert_eq!(*store.get("Ben Lehner").libraries, tree("lib2"));
    }
}
