//! Versioned metadata catalog with optimistic concurrency control
//!
//! `update_file` is a check-and-set on a single filename: a candidate for an
//! existing file is accepted only when its version is exactly one past the
//! stored version. A file seen for the first time is inserted with whatever
//! version the caller submits.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tracing::debug;

use crate::error::SurfError;
use crate::hash::ContentHash;
use crate::meta::{BlockStoreMap, Catalog, FileMetaData};

/// Catalog of file metadata shared by concurrent clients.
pub trait MetaStore: Send + Sync {
    /// Point-in-time copy of the whole catalog.
    ///
    /// # Errors
    /// Returns an error only if the backend fails.
    fn catalog(&self) -> Result<Catalog, SurfError>;

    /// Atomically commit `candidate` and return the accepted version.
    ///
    /// # Errors
    /// Returns [`SurfError::VersionConflict`] carrying the stored version if
    /// the candidate is not exactly one version ahead, and
    /// [`SurfError::InvalidFilename`] / [`SurfError::InvalidMetadata`] for
    /// candidates that can never be stored.
    fn update_file(&self, candidate: FileMetaData) -> Result<u64, SurfError>;

    /// Which block store should hold each of `hashes`.
    ///
    /// # Errors
    /// Returns an error only if the backend fails.
    fn block_store_map(&self, hashes: &[ContentHash]) -> Result<BlockStoreMap, SurfError>;
}

/// Assign every hash to one of `stores`.
///
/// Every store appears in the result, with an empty list if nothing lands on
/// it. A single store receives the input unchanged.
#[must_use]
pub fn place_blocks(hashes: &[ContentHash], stores: &[String]) -> BlockStoreMap {
    let mut map: BlockStoreMap = stores.iter().map(|s| (s.clone(), Vec::new())).collect();
    if let [only] = stores {
        map.insert(only.clone(), hashes.to_vec());
        return map;
    }
    if stores.is_empty() {
        return map;
    }

    for hash in hashes {
        let idx = (hash.prefix_u64() % stores.len() as u64) as usize;
        if let Some(bucket) = map.get_mut(&stores[idx]) {
            bucket.push(*hash);
        }
    }
    map
}

/// Decide whether `candidate` may replace `stored`.
pub(crate) fn check_version(
    stored: Option<&FileMetaData>,
    candidate: &FileMetaData,
) -> Result<(), SurfError> {
    match stored {
        None => Ok(()),
        Some(current) if current.version.checked_add(1) == Some(candidate.version) => Ok(()),
        Some(current) => Err(SurfError::VersionConflict {
            filename: candidate.filename.clone(),
            current: current.version,
        }),
    }
}

/// In-memory catalog. The dashmap entry for a filename stays write-locked for
/// the whole check-and-set.
pub struct MemoryMetaStore {
    files: DashMap<String, FileMetaData>,
    block_stores: Vec<String>,
}

impl MemoryMetaStore {
    #[must_use]
    pub fn new(block_stores: Vec<String>) -> Self {
        Self {
            files: DashMap::new(),
            block_stores,
        }
    }

    /// Addresses advertised by `block_store_map`
    #[must_use]
    pub fn block_stores(&self) -> &[String] {
        &self.block_stores
    }
}

impl MetaStore for MemoryMetaStore {
    fn catalog(&self) -> Result<Catalog, SurfError> {
        Ok(self
            .files
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect())
    }

    fn update_file(&self, candidate: FileMetaData) -> Result<u64, SurfError> {
        candidate.validate()?;
        let version = candidate.version;

        match self.files.entry(candidate.filename.clone()) {
            Entry::Vacant(slot) => {
                debug!(file = %candidate.filename, version, "catalog insert");
                slot.insert(candidate);
            }
            Entry::Occupied(mut slot) => {
                check_version(Some(slot.get()), &candidate)?;
                debug!(file = %candidate.filename, version, "catalog update");
                slot.insert(candidate);
            }
        }
        Ok(version)
    }

    fn block_store_map(&self, hashes: &[ContentHash]) -> Result<BlockStoreMap, SurfError> {
        Ok(place_blocks(hashes, &self.block_stores))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn store() -> MemoryMetaStore {
        MemoryMetaStore::new(vec!["127.0.0.1:8080".to_string()])
    }

    #[test]
    fn test_first_insert_accepts_any_version() {
        let meta = store();
        assert_eq!(meta.update_file(FileMetaData::new("a.txt", 1, vec![])).unwrap(), 1);
        assert_eq!(meta.update_file(FileMetaData::new("b.txt", 7, vec![])).unwrap(), 7);

        let catalog = meta.catalog().unwrap();
        assert_eq!(catalog["b.txt"].version, 7);
    }

    #[test]
    fn test_update_requires_next_version() {
        let meta = store();
        meta.update_file(FileMetaData::new("a.txt", 1, vec![])).unwrap();

        for stale in [1, 3, 10] {
            let err = meta
                .update_file(FileMetaData::new("a.txt", stale, vec![]))
                .unwrap_err();
            assert_eq!(err.conflict_version(), Some(1), "version {stale}");
        }

        let hash = ContentHash::from_bytes(b"edit");
        assert_eq!(meta.update_file(FileMetaData::new("a.txt", 2, vec![hash])).unwrap(), 2);
        assert_eq!(
            meta.catalog().unwrap()["a.txt"].block_hash_list.hashes(),
            &[hash]
        );
    }

    #[test]
    fn test_rejected_candidate_leaves_entry_untouched() {
        let meta = store();
        let original = FileMetaData::new("a.txt", 4, vec![ContentHash::from_bytes(b"v4")]);
        meta.update_file(original.clone()).unwrap();

        let _ = meta.update_file(FileMetaData::tombstone("a.txt", 9));
        assert_eq!(meta.catalog().unwrap()["a.txt"], original);
    }

    #[test]
    fn test_version_ceiling_never_panics() {
        let meta = store();
        assert!(matches!(
            meta.update_file(FileMetaData::new("a", u64::MAX, vec![])),
            Err(SurfError::InvalidMetadata(_))
        ));
        assert!(meta.catalog().unwrap().is_empty());

        // A stored version right below the ceiling still gets its successor
        // refused, not wrapped
        meta.update_file(FileMetaData::new("a", u64::MAX - 1, vec![])).unwrap();
        assert!(meta.update_file(FileMetaData::new("a", 1, vec![])).is_err());
        assert!(meta.update_file(FileMetaData::new("a", u64::MAX, vec![])).is_err());
        assert_eq!(meta.catalog().unwrap()["a"].version, u64::MAX - 1);
    }

    #[test]
    fn test_tombstone_is_a_versioned_update() {
        let meta = store();
        meta.update_file(FileMetaData::new("a.txt", 1, vec![])).unwrap();
        assert_eq!(meta.update_file(FileMetaData::tombstone("a.txt", 2)).unwrap(), 2);
        assert!(meta.catalog().unwrap()["a.txt"].is_tombstone());
    }

    #[test]
    fn test_invalid_candidates_rejected() {
        let meta = store();
        assert!(matches!(
            meta.update_file(FileMetaData::new("a,b", 1, vec![])),
            Err(SurfError::InvalidFilename(_))
        ));
        assert!(matches!(
            meta.update_file(FileMetaData::new("a.txt", 0, vec![])),
            Err(SurfError::InvalidMetadata(_))
        ));
        assert!(meta.catalog().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_updates_single_winner() {
        let meta = Arc::new(store());
        meta.update_file(FileMetaData::new("race.txt", 1, vec![])).unwrap();

        let accepted = Arc::new(AtomicUsize::new(0));
        let handles: Vec<_> = (0..16u8)
            .map(|i| {
                let meta = Arc::clone(&meta);
                let accepted = Arc::clone(&accepted);
                std::thread::spawn(move || {
                    let hash = ContentHash::from_bytes(&[i]);
                    if meta
                        .update_file(FileMetaData::new("race.txt", 2, vec![hash]))
                        .is_ok()
                    {
                        accepted.fetch_add(1, Ordering::SeqCst);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(accepted.load(Ordering::SeqCst), 1);
        assert_eq!(meta.catalog().unwrap()["race.txt"].version, 2);
    }

    #[test]
    fn test_reserved_names_rejected() {
        let meta = store();
        for name in ["index.txt", ".blocksync.toml", ".blocksync-tmpA1b2"] {
            assert!(matches!(
                meta.update_file(FileMetaData::tombstone(name, 1)),
                Err(SurfError::InvalidFilename(_))
            ));
        }
        assert!(meta.catalog().unwrap().is_empty());
    }

    #[test]
    fn test_check_version_at_ceiling() {
        let stored = FileMetaData::new("a", u64::MAX, vec![]);
        let err = check_version(Some(&stored), &FileMetaData::new("a", 1, vec![])).unwrap_err();
        assert_eq!(err.conflict_version(), Some(u64::MAX));
    }

    #[test]
    fn test_single_store_placement() {
        let hashes = vec![ContentHash::from_bytes(b"a"), ContentHash::from_bytes(b"b")];
        let map = store().block_store_map(&hashes).unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map["127.0.0.1:8080"], hashes);
    }

    #[test]
    fn test_sharded_placement_covers_every_hash_once() {
        let stores = vec!["a:1".to_string(), "b:2".to_string(), "c:3".to_string()];
        let hashes: Vec<_> = (0..64u8).map(|i| ContentHash::from_bytes(&[i])).collect();

        let map = place_blocks(&hashes, &stores);
        assert_eq!(map.len(), 3);

        let mut placed: Vec<_> = map.values().flatten().copied().collect();
        placed.sort();
        let mut expected = hashes.clone();
        expected.sort();
        assert_eq!(placed, expected);

        // placement is stable
        assert_eq!(place_blocks(&hashes, &stores), map);
    }
}
