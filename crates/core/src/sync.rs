//! Client sync engine
//!
//! One [`SyncEngine::run`] is a single pass over the working directory:
//!
//! 1. scan and chunk local files
//! 2. reconcile them against the local index
//! 3. fetch the remote catalog
//! 4. pull remote files this client has never seen
//! 5. push local changes, adopting the remote state on version conflicts
//! 6. write the final catalog as the new local index
//!
//! Every remote call is blocking and the phases run strictly in order. A
//! failure aborts the pass; each phase is safe to repeat on the next run.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::Write as _;
use std::path::PathBuf;

use color_eyre::Result;
use color_eyre::eyre::{WrapErr as _, bail, eyre};
use tracing::{debug, info, info_span, warn};

use crate::block::Block;
use crate::chunker::ChunkConfig;
use crate::client::SurfClient;
use crate::error::SurfError;
use crate::hash::ContentHash;
use crate::index::{LocalIndex, TEMP_PREFIX};
use crate::meta::{Catalog, FileMetaData, validate_filename};
use crate::scan::Scanner;
use crate::sync_state::{SyncState, detect_changes};

/// Phase of a sync pass, named in error reports
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Scan,
    Index,
    FetchCatalog,
    Pull,
    Push,
    PersistIndex,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Scan => "scan",
            Self::Index => "index",
            Self::FetchCatalog => "fetch catalog",
            Self::Pull => "pull",
            Self::Push => "push",
            Self::PersistIndex => "persist index",
        })
    }
}

/// What a sync pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Files whose new content was committed
    pub uploaded: Vec<String>,
    /// Files written from remote content
    pub downloaded: Vec<String>,
    /// Files removed because the catalog holds a tombstone
    pub deleted_locally: Vec<String>,
    /// Local deletions committed as tombstones
    pub tombstoned: Vec<String>,
    /// Files whose commit was rejected and replaced by the remote state
    pub conflicts: Vec<String>,
    pub blocks_uploaded: usize,
    pub bytes_uploaded: u64,
    pub blocks_downloaded: usize,
    pub bytes_downloaded: u64,
}

impl SyncReport {
    /// True when the pass changed nothing on either side
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.uploaded.is_empty()
            && self.downloaded.is_empty()
            && self.deleted_locally.is_empty()
            && self.tombstoned.is_empty()
            && self.conflicts.is_empty()
    }
}

/// Effect of applying a remote entry to the working directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Written,
    Removed,
    AlreadyCurrent,
}

/// Single-threaded sync engine over a [`SurfClient`]
pub struct SyncEngine<'a, C: SurfClient> {
    client: &'a mut C,
    root: PathBuf,
    config: ChunkConfig,
    /// Blocks known to be on disk, from the scan plus this pass's downloads
    blocks: HashMap<ContentHash, Block>,
    report: SyncReport,
}

impl<'a, C: SurfClient> SyncEngine<'a, C> {
    pub fn new(client: &'a mut C, root: impl Into<PathBuf>, config: ChunkConfig) -> Self {
        Self {
            client,
            root: root.into(),
            config,
            blocks: HashMap::new(),
            report: SyncReport::default(),
        }
    }

    /// Run one sync pass
    ///
    /// # Errors
    /// Returns an error naming the phase that failed. Version conflicts are
    /// resolved internally and never surface here.
    pub fn run(&mut self) -> Result<SyncReport> {
        self.report = SyncReport::default();

        let local = self.phase(Phase::Scan, |engine| {
            Scanner::new(&engine.root, engine.config).scan()
        })?;
        info!(
            "Scanned {} files ({} distinct blocks)",
            local.files.len(),
            local.block_count()
        );
        self.blocks = local.blocks;

        let mut state = self.phase(Phase::Index, |engine| {
            let index = LocalIndex::load(&engine.root)?;
            Ok(detect_changes(&local.files, &index))
        })?;
        debug!(
            "{} entries in working map, {} with local changes",
            state.entries.len(),
            state.dirty().count()
        );

        let remote = self.phase(Phase::FetchCatalog, |engine| {
            Ok(engine.client.get_file_info_map()?)
        })?;
        debug!("Remote catalog has {} entries", remote.len());

        self.phase(Phase::Pull, |engine| engine.pull_new(&remote, &mut state))?;
        self.phase(Phase::Push, |engine| {
            engine.push_changes(&remote, &mut state, &local.files)
        })?;
        self.phase(Phase::PersistIndex, Self::persist_index)?;

        Ok(std::mem::take(&mut self.report))
    }

    /// Run one phase inside its own span; errors name the phase
    fn phase<T>(&mut self, phase: Phase, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        let _span = info_span!("phase", %phase).entered();
        f(self).wrap_err_with(|| format!("{phase} failed"))
    }

    /// Materialize remote entries absent from the working map
    fn pull_new(&mut self, remote: &Catalog, state: &mut SyncState) -> Result<()> {
        for (name, meta) in remote {
            if state.contains(name) {
                continue;
            }
            if let Err(e) = meta.validate() {
                warn!("Ignoring remote entry {name:?}: {e}");
                continue;
            }
            self.apply_remote(meta, None)?;
            state.adopt(meta.clone());
        }
        Ok(())
    }

    fn push_changes(
        &mut self,
        remote: &Catalog,
        state: &mut SyncState,
        scanned: &Catalog,
    ) -> Result<()> {
        let names: Vec<String> = state.entries.keys().cloned().collect();

        for name in names {
            let Some(entry) = state.get(&name).cloned() else {
                continue;
            };
            let current = remote.get(&name);

            if !entry.is_dirty() {
                match current {
                    Some(latest) if *latest == entry.meta => {
                        debug!("{name}: up to date at v{}", latest.version);
                        continue;
                    }
                    Some(latest) if latest.version > entry.meta.version => {
                        debug!("{name}: remote v{} is newer", latest.version);
                        self.apply_remote(latest, scanned.get(&name))?;
                        state.adopt(latest.clone());
                        continue;
                    }
                    _ => {}
                }
            }

            if !entry.meta.is_tombstone() {
                self.upload_blocks(entry.meta.block_hash_list.hashes())?;
            }

            match self.client.update_file(&entry.meta) {
                Ok(version) => {
                    if entry.meta.is_tombstone() {
                        info!("Deleted {name} remotely (v{version})");
                        self.report.tombstoned.push(name.clone());
                    } else {
                        info!("Uploaded {name} (v{version})");
                        self.report.uploaded.push(name.clone());
                    }
                    state.adopt(FileMetaData {
                        version,
                        ..entry.meta
                    });
                }
                Err(SurfError::VersionConflict { current, .. }) => {
                    info!(
                        "{name}: v{} rejected, remote is at v{current}; taking remote",
                        entry.meta.version
                    );
                    self.report.conflicts.push(name.clone());

                    let latest = self.client.get_file_info_map()?.remove(&name).ok_or_else(
                        || eyre!("{name} conflicted but is missing from the catalog"),
                    )?;
                    self.apply_remote(&latest, scanned.get(&name))?;
                    state.adopt(latest);
                }
                Err(e) => return Err(e).wrap_err_with(|| format!("failed to commit {name}")),
            }
        }
        Ok(())
    }

    /// Upload the blocks of `hashes` that their placed store lacks
    fn upload_blocks(&mut self, hashes: &[ContentHash]) -> Result<()> {
        let mut seen = HashSet::new();
        let unique: Vec<ContentHash> = hashes.iter().copied().filter(|h| seen.insert(*h)).collect();
        if unique.is_empty() {
            return Ok(());
        }

        let placement = self.client.get_block_store_map(&unique)?;
        for (addr, placed) in placement {
            if placed.is_empty() {
                continue;
            }
            let present: HashSet<ContentHash> =
                self.client.has_blocks(&placed, &addr)?.into_iter().collect();

            for hash in placed.iter().filter(|h| !present.contains(*h)) {
                let block = self
                    .blocks
                    .get(hash)
                    .ok_or_else(|| eyre!("block {} missing from scan", hash.short()))?;
                let stored = self.client.put_block(block, &addr)?;
                if stored != *hash {
                    bail!("store {addr} acknowledged {stored} for block {hash}");
                }
                self.report.blocks_uploaded += 1;
                self.report.bytes_uploaded += block.size as u64;
            }
            debug!(
                "{addr}: {} blocks already present, {} uploaded",
                present.len(),
                placed.len().saturating_sub(present.len())
            );
        }
        Ok(())
    }

    /// Make the working directory match a remote entry
    fn apply_remote(&mut self, meta: &FileMetaData, local: Option<&FileMetaData>) -> Result<()> {
        let name = meta.filename.clone();
        match self.write_remote(meta, local)? {
            Applied::Written => {
                info!("Downloaded {name} (v{})", meta.version);
                self.report.downloaded.push(name);
            }
            Applied::Removed => {
                info!("Removed {name} (deleted remotely at v{})", meta.version);
                self.report.deleted_locally.push(name);
            }
            Applied::AlreadyCurrent => debug!("{name}: local content already matches"),
        }
        Ok(())
    }

    fn write_remote(&mut self, meta: &FileMetaData, local: Option<&FileMetaData>) -> Result<Applied> {
        validate_filename(&meta.filename)?;
        let path = self.root.join(&meta.filename);

        if meta.is_tombstone() {
            return match std::fs::remove_file(&path) {
                Ok(()) => Ok(Applied::Removed),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Applied::AlreadyCurrent),
                Err(e) => {
                    Err(e).wrap_err_with(|| format!("failed to remove {}", path.display()))
                }
            };
        }

        if local.is_some_and(|l| l.block_hash_list == meta.block_hash_list) {
            return Ok(Applied::AlreadyCurrent);
        }

        let hashes = meta.block_hash_list.hashes();
        self.fetch_missing(hashes)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.root)?;
        for hash in hashes {
            let block = self
                .blocks
                .get(hash)
                .ok_or_else(|| eyre!("block {} missing after download", hash.short()))?;
            tmp.write_all(&block.data)?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&path)
            .map_err(|e| e.error)
            .wrap_err_with(|| format!("failed to write {}", path.display()))?;

        Ok(Applied::Written)
    }

    /// Download blocks of `hashes` not already on disk
    fn fetch_missing(&mut self, hashes: &[ContentHash]) -> Result<()> {
        let mut seen = HashSet::new();
        let missing: Vec<ContentHash> = hashes
            .iter()
            .copied()
            .filter(|h| !self.blocks.contains_key(h) && seen.insert(*h))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }

        let placement = self.client.get_block_store_map(&missing)?;
        for (addr, placed) in placement {
            for hash in placed {
                let block = self.client.get_block(&hash, &addr)?;
                if !block.matches(&hash) {
                    bail!("store {addr} returned corrupt data for block {hash}");
                }
                self.report.blocks_downloaded += 1;
                self.report.bytes_downloaded += block.size as u64;
                self.blocks.insert(hash, block);
            }
        }

        if let Some(hash) = missing.iter().find(|h| !self.blocks.contains_key(*h)) {
            warn!("Block placement omitted {}", hash.short());
            bail!("no block store holds block {hash}");
        }
        Ok(())
    }

    /// Save the final catalog as the index, minus entries the index format
    /// cannot hold
    fn persist_index(&mut self) -> Result<()> {
        let catalog: Catalog = self
            .client
            .get_file_info_map()?
            .into_iter()
            .filter(|(_, meta)| meta.validate().is_ok())
            .collect();
        let index = LocalIndex::from_catalog(catalog);
        index.save(&self.root)?;
        debug!("Wrote index with {} entries", index.len());
        Ok(())
    }
}
