//! Working state of one sync pass
//!
//! Combines the freshly scanned directory with the local index to decide,
//! per file, which version this client would commit and whether the file
//! changed since the last successful sync.

use std::collections::BTreeMap;

use crate::index::LocalIndex;
use crate::meta::{Catalog, FileMetaData};

/// Type of change detected for a file since the last sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileChange {
    /// Same content as the index entry (or a tombstone still absent)
    Unchanged,
    /// Not in the index, or recreated after a deletion
    Added,
    /// Content differs from the index entry
    Modified,
    /// In the index but gone from disk
    Deleted,
}

/// One file of the working map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkingEntry {
    /// Metadata this client would commit
    pub meta: FileMetaData,
    pub change: FileChange,
}

impl WorkingEntry {
    #[must_use]
    pub fn unchanged(meta: FileMetaData) -> Self {
        Self {
            meta,
            change: FileChange::Unchanged,
        }
    }

    /// Whether this client holds a local change the catalog has not seen
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.change != FileChange::Unchanged
    }
}

/// Working map of a sync pass, keyed by filename
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncState {
    pub entries: BTreeMap<String, WorkingEntry>,
}

impl SyncState {
    #[must_use]
    pub fn get(&self, filename: &str) -> Option<&WorkingEntry> {
        self.entries.get(filename)
    }

    #[must_use]
    pub fn contains(&self, filename: &str) -> bool {
        self.entries.contains_key(filename)
    }

    /// Replace a file's entry with catalog state
    pub fn adopt(&mut self, meta: FileMetaData) {
        self.entries
            .insert(meta.filename.clone(), WorkingEntry::unchanged(meta));
    }

    /// Files with local changes
    pub fn dirty(&self) -> impl Iterator<Item = &WorkingEntry> {
        self.entries.values().filter(|e| e.is_dirty())
    }
}

/// Detect changes between the scanned directory and the last synced index.
///
/// Scanned entries arrive at version 1. The result carries the index version
/// for unchanged files and the index version plus one for edits, deletions
/// and recreations.
#[must_use]
pub fn detect_changes(scanned: &Catalog, index: &LocalIndex) -> SyncState {
    let mut state = SyncState::default();

    for (name, local) in scanned {
        let entry = match index.get(name) {
            None => WorkingEntry {
                meta: local.clone(),
                change: FileChange::Added,
            },
            Some(synced) if synced.block_hash_list == local.block_hash_list => {
                WorkingEntry::unchanged(FileMetaData {
                    version: synced.version,
                    ..local.clone()
                })
            }
            Some(synced) => WorkingEntry {
                meta: FileMetaData {
                    version: synced.version.saturating_add(1),
                    ..local.clone()
                },
                change: if synced.is_tombstone() {
                    FileChange::Added
                } else {
                    FileChange::Modified
                },
            },
        };
        state.entries.insert(name.clone(), entry);
    }

    for (name, synced) in &index.files {
        if scanned.contains_key(name) {
            continue;
        }
        let entry = if synced.is_tombstone() {
            WorkingEntry::unchanged(synced.clone())
        } else {
            WorkingEntry {
                meta: FileMetaData::tombstone(name.clone(), synced.version.saturating_add(1)),
                change: FileChange::Deleted,
            }
        };
        state.entries.insert(name.clone(), entry);
    }

    state
}
