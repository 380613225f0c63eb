//! Per-directory child collection.
//!
//! Insertion order is preserved so enumeration cursors are stable; lookup
//! is case-insensitive while stored names keep their case. Any structural
//! mutation resets the in-flight enumeration cursor, so a listing in
//! progress restarts rather than observing a half-updated directory.

use crate::tree::node::NodeId;

/// One child slot: the owning edge lives in the tree arena, the index only
/// records the id and the case-preserved name.
#[derive(Clone, Debug)]
pub struct IndexEntry {
    pub id: NodeId,
    pub name: String,
}

fn names_equal(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

#[derive(Default)]
pub struct DirectoryIndex {
    entries: Vec<IndexEntry>,
    cursor: usize,
}

impl DirectoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Case-insensitive name lookup.
    pub fn get(&self, name: &str) -> Option<NodeId> {
        self.entries
            .iter()
            .find(|e| names_equal(&e.name, name))
            .map(|e| e.id)
    }

    /// Append a child. Idempotent by identity: re-inserting an id that is
    /// already present leaves the index unchanged. Duplicate-name policy is
    /// the caller's concern.
    pub fn insert(&mut self, id: NodeId, name: &str) {
        if self.entries.iter().any(|e| e.id == id) {
            return;
        }
        self.entries.push(IndexEntry { id, name: name.to_string() });
        self.reset_enumeration();
    }

    /// Remove a child by identity. Returns whether anything was removed.
    pub fn remove(&mut self, id: NodeId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.id != id);
        let removed = self.entries.len() != before;
        if removed {
            self.reset_enumeration();
        }
        removed
    }

    /// Update the stored name for `id` (rename-in-place within the same
    /// directory). Resets the cursor like any other mutation.
    pub fn rename(&mut self, id: NodeId, new_name: &str) -> bool {
        for e in &mut self.entries {
            if e.id == id {
                e.name = new_name.to_string();
                self.cursor = 0;
                return true;
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Advance the enumeration cursor and return the next entry.
    pub fn next_entry(&mut self) -> Option<IndexEntry> {
        let e = self.entries.get(self.cursor).cloned()?;
        self.cursor += 1;
        Some(e)
    }

    pub fn reset_enumeration(&mut self) {
        self.cursor = 0;
    }

    /// Entries as of now, in insertion order.
    pub fn snapshot(&self) -> Vec<IndexEntry> {
        self.entries.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive_storage_preserves_case() {
        let mut idx = DirectoryIndex::new();
        idx.insert(1, "Readme.TXT");
        assert_eq!(idx.get("readme.txt"), Some(1));
        assert_eq!(idx.get("README.txt"), Some(1));
        assert_eq!(idx.get("other"), None);
        assert_eq!(idx.snapshot()[0].name, "Readme.TXT");
    }

    #[test]
    fn insert_is_idempotent_by_identity() {
        let mut idx = DirectoryIndex::new();
        idx.insert(1, "a");
        idx.insert(1, "a");
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn enumeration_follows_insertion_order() {
        let mut idx = DirectoryIndex::new();
        idx.insert(3, "c");
        idx.insert(1, "a");
        idx.insert(2, "b");
        let names: Vec<String> = std::iter::from_fn(|| idx.next_entry())
            .map(|e| e.name)
            .collect();
        assert_eq!(names, ["c", "a", "b"]);
        // exhausted cursor stays exhausted until reset
        assert!(idx.next_entry().is_none());
        idx.reset_enumeration();
        assert_eq!(idx.next_entry().unwrap().name, "c");
    }

    #[test]
    fn mutation_resets_cursor() {
        let mut idx = DirectoryIndex::new();
        idx.insert(1, "a");
        idx.insert(2, "b");
        assert_eq!(idx.next_entry().unwrap().id, 1);

        idx.insert(3, "c");
        // a restarted enumeration begins from the first entry again
        assert_eq!(idx.next_entry().unwrap().id, 1);

        idx.next_entry();
        idx.remove(1);
        assert_eq!(idx.next_entry().unwrap().id, 2);
    }

    #[test]
    fn remove_by_identity() {
        let mut idx = DirectoryIndex::new();
        idx.insert(1, "a");
        idx.insert(2, "b");
        assert!(idx.remove(1));
        assert!(!idx.remove(1));
        assert_eq!(idx.get("a"), None);
        assert_eq!(idx.get("b"), Some(2));
    }
}
