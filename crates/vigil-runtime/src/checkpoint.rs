//! File-backed checkpoint store
//!
//! Layout: `<root>/<kind>/<entity_id>/<millis>-<seq>.bin` with a `.json`
//! metadata file beside each blob carrying a blake3 checksum. Restore walks
//! records newest-first and skips anything whose checksum or length does not
//! match; a store full of corrupt records degrades to "no checkpoint", never
//! to a crash.

use async_trait::async_trait;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use vigil_common::{CheckpointError, CheckpointMeta, EntityKind};
use vigil_node::CheckpointSink;

/// Persistent store for node model state and knowledge-graph snapshots
pub struct CheckpointStore {
    root: PathBuf,
    /// Newest records kept per entity; older ones are pruned on save
    retention: usize,
    seq: AtomicU64,
}

impl CheckpointStore {
    pub fn open(root: impl Into<PathBuf>, retention: usize) -> Result<Self, CheckpointError> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self {
            root,
            retention: retention.max(1),
            seq: AtomicU64::new(0),
        })
    }

    fn entity_dir(&self, kind: EntityKind, entity_id: &str) -> PathBuf {
        self.root.join(kind.dir_name()).join(entity_id)
    }

    /// Persist one record: blob plus metadata with checksum.
    pub fn save(
        &self,
        kind: EntityKind,
        entity_id: &str,
        blob: &[u8],
    ) -> Result<CheckpointMeta, CheckpointError> {
        let dir = self.entity_dir(kind, entity_id);
        fs::create_dir_all(&dir)?;

        let taken_at = Utc::now();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let stem = format!("{}-{seq:06}", taken_at.timestamp_millis());
        let meta = CheckpointMeta {
            entity_kind: kind,
            entity_id: entity_id.to_string(),
            taken_at,
            checksum: blake3::hash(blob).to_hex().to_string(),
            blob_len: blob.len(),
        };

        fs::write(dir.join(format!("{stem}.bin")), blob)?;
        let meta_json =
            serde_json::to_vec_pretty(&meta).map_err(|e| CheckpointError::Encode(e.to_string()))?;
        fs::write(dir.join(format!("{stem}.json")), meta_json)?;
        debug!(kind = %kind, entity = entity_id, bytes = blob.len(), "checkpoint written");

        self.prune(&dir)?;
        Ok(meta)
    }

    /// Most recent valid blob for the entity.
    ///
    /// Corrupt records are skipped with an error log; `None` means the entity
    /// starts from its default state.
    pub fn load_latest(
        &self,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Option<Vec<u8>>, CheckpointError> {
        let dir = self.entity_dir(kind, entity_id);
        if !dir.exists() {
            return Ok(None);
        }

        let mut stems = record_stems(&dir)?;
        stems.sort();
        for stem in stems.iter().rev() {
            match self.load_record(&dir, stem) {
                Ok(blob) => {
                    info!(kind = %kind, entity = entity_id, record = %stem, "checkpoint restored");
                    return Ok(Some(blob));
                }
                Err(e) => {
                    // Fatal for this record only; fall back to the next older one.
                    error!(kind = %kind, entity = entity_id, record = %stem, error = %e, "corrupt checkpoint skipped");
                }
            }
        }
        Ok(None)
    }

    fn load_record(&self, dir: &Path, stem: &str) -> Result<Vec<u8>, CheckpointError> {
        let meta_path = dir.join(format!("{stem}.json"));
        let blob_path = dir.join(format!("{stem}.bin"));
        let meta: CheckpointMeta = serde_json::from_slice(&fs::read(&meta_path)?)
            .map_err(|e| CheckpointError::Corrupt {
                path: meta_path.display().to_string(),
                reason: e.to_string(),
            })?;
        let blob = fs::read(&blob_path)?;

        if blob.len() != meta.blob_len {
            return Err(CheckpointError::Corrupt {
                path: blob_path.display().to_string(),
                reason: format!("length {} != recorded {}", blob.len(), meta.blob_len),
            });
        }
        let digest = blake3::hash(&blob).to_hex().to_string();
        if digest != meta.checksum {
            return Err(CheckpointError::Corrupt {
                path: blob_path.display().to_string(),
                reason: "checksum mismatch".to_string(),
            });
        }
        Ok(blob)
    }

    /// All record metadata for an entity, oldest first.
    pub fn records(
        &self,
        kind: EntityKind,
        entity_id: &str,
    ) -> Result<Vec<CheckpointMeta>, CheckpointError> {
        let dir = self.entity_dir(kind, entity_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut stems = record_stems(&dir)?;
        stems.sort();
        let mut out = Vec::with_capacity(stems.len());
        for stem in stems {
            if let Ok(bytes) = fs::read(dir.join(format!("{stem}.json"))) {
                if let Ok(meta) = serde_json::from_slice::<CheckpointMeta>(&bytes) {
                    out.push(meta);
                }
            }
        }
        Ok(out)
    }

    fn prune(&self, dir: &Path) -> Result<(), CheckpointError> {
        let mut stems = record_stems(dir)?;
        stems.sort();
        while stems.len() > self.retention {
            let stem = stems.remove(0);
            for ext in ["bin", "json"] {
                let path = dir.join(format!("{stem}.{ext}"));
                if let Err(e) = fs::remove_file(&path) {
                    warn!(path = %path.display(), error = %e, "checkpoint prune failed");
                }
            }
        }
        Ok(())
    }
}

fn record_stems(dir: &Path) -> Result<Vec<String>, CheckpointError> {
    let mut stems = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("bin") {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                stems.push(stem.to_string());
            }
        }
    }
    Ok(stems)
}

/// Adapter exposing the store to node runtimes
pub struct NodeCheckpointSink {
    store: Arc<CheckpointStore>,
}

impl NodeCheckpointSink {
    pub fn new(store: Arc<CheckpointStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CheckpointSink for NodeCheckpointSink {
    async fn checkpoint(&self, entity_id: &str, blob: Vec<u8>) -> Result<(), CheckpointError> {
        self.store.save(EntityKind::Node, entity_id, &blob)?;
        Ok(())
    }

    async fn load_latest(&self, entity_id: &str) -> Result<Option<Vec<u8>>, CheckpointError> {
        self.store.load_latest(EntityKind::Node, entity_id)
    }
}
