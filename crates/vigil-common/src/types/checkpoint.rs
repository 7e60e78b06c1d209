//! Checkpoint records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// What kind of entity a checkpoint belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Node,
    KnowledgeGraph,
}

impl EntityKind {
    /// Directory name used by the checkpoint store.
    pub fn dir_name(self) -> &'static str {
        match self {
            EntityKind::Node => "node",
            EntityKind::KnowledgeGraph => "knowledge",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// Metadata stored beside every snapshot blob
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub entity_kind: EntityKind,
    pub entity_id: String,
    pub taken_at: DateTime<Utc>,
    /// Hex blake3 digest of the blob; mismatch marks the record corrupt
    pub checksum: String,
    pub blob_len: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_names_are_stable() {
        assert_eq!(EntityKind::Node.dir_name(), "node");
        assert_eq!(EntityKind::KnowledgeGraph.dir_name(), "knowledge");
    }
}
