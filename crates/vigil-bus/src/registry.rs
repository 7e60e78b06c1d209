//! Tag table, ownership, and driver routing

use chrono::Utc;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::info;
use vigil_common::{BusError, NodeId, Tag, TagId, TagQuality, TagSnapshot, TagUpdate};

/// Static configuration of a single tag
#[derive(Debug, Clone)]
pub struct TagSpec {
    pub id: TagId,
    /// Owning node; ownership is assigned by configuration, not contested
    pub owner: NodeId,
    /// Driver route used for writes targeting this tag
    pub driver: String,
}

impl TagSpec {
    pub fn new(id: impl Into<TagId>, owner: impl Into<String>, driver: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            owner: NodeId::new(owner),
            driver: driver.into(),
        }
    }
}

/// Concurrent tag table with ownership and routing maps
#[derive(Default)]
pub struct TagRegistry {
    tags: DashMap<TagId, Tag>,
    owners: DashMap<TagId, NodeId>,
    routes: DashMap<TagId, String>,
}

impl TagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tag from ecosystem configuration.
    ///
    /// Until the first driver update arrives the tag reads `Bad` quality at
    /// version 0, so nothing downstream acts on it.
    pub fn register(&self, spec: TagSpec) {
        self.owners.insert(spec.id.clone(), spec.owner);
        self.routes.insert(spec.id.clone(), spec.driver);
        self.tags.entry(spec.id.clone()).or_insert_with(|| Tag {
            id: spec.id,
            value: vigil_common::TagValue::Float(0.0),
            quality: TagQuality::Bad,
            timestamp: Utc::now(),
            version: 0,
        });
    }

    pub fn contains(&self, id: &TagId) -> bool {
        self.tags.contains_key(id)
    }

    pub fn current(&self, id: &TagId) -> Option<Tag> {
        self.tags.get(id).map(|t| t.clone())
    }

    pub fn owner(&self, id: &TagId) -> Option<NodeId> {
        self.owners.get(id).map(|o| o.clone())
    }

    pub fn route(&self, id: &TagId) -> Option<String> {
        self.routes.get(id).map(|r| r.clone())
    }

    /// Configuration-driven ownership reassignment.
    pub fn reassign_owner(&self, id: &TagId, new_owner: NodeId) -> Result<(), BusError> {
        match self.owners.get_mut(id) {
            Some(mut owner) => {
                info!(tag = %id, from = %*owner, to = %new_owner, "tag ownership reassigned");
                *owner = new_owner;
                Ok(())
            }
            None => Err(BusError::UnknownTag(id.to_string())),
        }
    }

    /// All tags owned by a node.
    pub fn scope_of(&self, node: &NodeId) -> BTreeSet<TagId> {
        self.owners
            .iter()
            .filter(|e| e.value() == node)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Apply an accepted update, bumping the version. Returns the new version.
    pub(crate) fn apply_update(&self, update: &TagUpdate) -> Result<u64, BusError> {
        let mut tag = self
            .tags
            .get_mut(&update.tag_id)
            .ok_or_else(|| BusError::UnknownTag(update.tag_id.to_string()))?;
        tag.value = update.value.clone();
        tag.quality = update.quality;
        tag.timestamp = update.timestamp;
        tag.version += 1;
        Ok(tag.version)
    }

    /// Consistent copy of the named tags.
    pub fn snapshot(&self, ids: &BTreeSet<TagId>) -> TagSnapshot {
        let mut tags = HashMap::with_capacity(ids.len());
        for id in ids {
            if let Some(tag) = self.tags.get(id) {
                tags.insert(id.clone(), tag.clone());
            }
        }
        TagSnapshot::new(tags)
    }

    /// Current version per tag; missing tags are omitted.
    pub fn versions(&self, ids: &BTreeSet<TagId>) -> BTreeMap<TagId, u64> {
        ids.iter()
            .filter_map(|id| self.tags.get(id).map(|t| (id.clone(), t.version)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_common::TagValue;

    #[test]
    fn test_register_starts_bad_at_version_zero() {
        let reg = TagRegistry::new();
        reg.register(TagSpec::new("FIC101.PV", "node-a", "modbus-1"));
        let tag = reg.current(&TagId::from("FIC101.PV")).unwrap();
        assert_eq!(tag.version, 0);
        assert_eq!(tag.quality, TagQuality::Bad);
    }

    #[test]
    fn test_scope_and_reassignment() {
        let reg = TagRegistry::new();
        reg.register(TagSpec::new("A", "node-a", "d"));
        reg.register(TagSpec::new("B", "node-a", "d"));
        reg.register(TagSpec::new("C", "node-b", "d"));

        assert_eq!(reg.scope_of(&NodeId::from("node-a")).len(), 2);

        reg.reassign_owner(&TagId::from("B"), NodeId::from("node-b")).unwrap();
        assert_eq!(reg.scope_of(&NodeId::from("node-b")).len(), 2);
    }

    #[test]
    fn test_apply_update_bumps_version() {
        let reg = TagRegistry::new();
        reg.register(TagSpec::new("A", "node-a", "d"));
        let update = TagUpdate::new("A", TagValue::Float(2.5), TagQuality::Good);
        assert_eq!(reg.apply_update(&update).unwrap(), 1);
        assert_eq!(reg.apply_update(&update).unwrap(), 2);
    }
}
