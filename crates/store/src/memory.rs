//! In-memory store

use crate::{upsert, Result, WatchStore};
use parking_lot::RwLock;
use settle_core::{Watcher, WatcherId};

/// Store that keeps watchers in memory only
#[derive(Default)]
pub struct MemoryStore {
    watchers: RwLock<Vec<Watcher>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_watchers(watchers: Vec<Watcher>) -> Self {
        Self {
            watchers: RwLock::new(watchers),
        }
    }
}

impl WatchStore for MemoryStore {
    fn load_all(&self) -> Result<Vec<Watcher>> {
        Ok(self.watchers.read().clone())
    }

    fn save(&self, watcher: &Watcher) -> Result<()> {
        upsert(&mut self.watchers.write(), watcher);
        Ok(())
    }

    fn delete(&self, id: &WatcherId) -> Result<bool> {
        let mut watchers = self.watchers.write();
        let before = watchers.len();
        watchers.retain(|w| &w.id != id);
        Ok(watchers.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use settle_core::WatchTarget;

    #[test]
    fn test_upsert_keeps_order() {
        let store = MemoryStore::new();
        let mut a = Watcher::new("a", WatchTarget::new("/a"));
        let b = Watcher::new("b", WatchTarget::new("/b"));
        store.save(&a).unwrap();
        store.save(&b).unwrap();

        a.enabled = false;
        store.save(&a).unwrap();

        let all = store.load_all().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].name, "a");
        assert!(!all[0].enabled);
        assert!(store.delete(&b.id).unwrap());
        assert_eq!(store.load_all().unwrap().len(), 1);
    }
}
