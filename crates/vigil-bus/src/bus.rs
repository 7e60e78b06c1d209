//! The tag bus proper

use crate::driver::DriverAdapter;
use crate::inbox::{NodeInbox, PushOutcome};
use crate::registry::TagRegistry;
use crate::{DEFAULT_DEDUP_WINDOW_MS, DEFAULT_INBOX_CAPACITY};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use vigil_common::{BusError, ControlAction, NodeId, TagId, TagSnapshot, TagUpdate, TagWrite};

/// Bus configuration
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Capacity of each node's inbound queue
    pub inbox_capacity: usize,
    /// How long a `(tag, timestamp)` pair is remembered for de-duplication
    pub dedup_window_ms: i64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: DEFAULT_INBOX_CAPACITY,
            dedup_window_ms: DEFAULT_DEDUP_WINDOW_MS,
        }
    }
}

/// Ingest decision for a single update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// Accepted at this new tag version
    Accepted { version: u64 },
    /// Same `(tag, timestamp)` already seen inside the window
    Duplicate,
    /// Older than the tag's current state
    Stale,
}

/// Bus counters, exported through the engine's metrics surface
#[derive(Debug, Default)]
pub struct BusMetrics {
    pub updates_accepted: AtomicU64,
    pub updates_duplicate: AtomicU64,
    pub updates_stale: AtomicU64,
    pub updates_coalesced: AtomicU64,
    pub updates_shed: AtomicU64,
    pub commands_dispatched: AtomicU64,
    pub command_failures: AtomicU64,
}

/// Ingress/egress hub between driver adapters and nodes
pub struct TagBus {
    config: BusConfig,
    registry: Arc<TagRegistry>,
    inboxes: DashMap<NodeId, NodeInbox>,
    drivers: DashMap<String, Arc<dyn DriverAdapter>>,
    /// `(tag, source timestamp millis)` pairs seen recently
    seen: DashMap<(TagId, i64), i64>,
    metrics: BusMetrics,
}

impl TagBus {
    pub fn new(config: BusConfig, registry: Arc<TagRegistry>) -> Self {
        Self {
            config,
            registry,
            inboxes: DashMap::new(),
            drivers: DashMap::new(),
            seen: DashMap::new(),
            metrics: BusMetrics::default(),
        }
    }

    pub fn registry(&self) -> &Arc<TagRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &BusMetrics {
        &self.metrics
    }

    /// Attach a node, returning its inbox handle.
    pub fn attach_node(&self, node_id: NodeId) -> NodeInbox {
        let inbox = NodeInbox::new(self.config.inbox_capacity);
        self.inboxes.insert(node_id, inbox.clone());
        inbox
    }

    /// Register an egress driver route.
    pub fn register_driver(&self, adapter: Arc<dyn DriverAdapter>) {
        self.drivers.insert(adapter.name().to_string(), adapter);
    }

    /// Ingest one update from a driver adapter.
    ///
    /// Accepted updates bump the tag version and land in the owning node's
    /// inbox. Duplicates and out-of-order readings are dropped, not errors.
    #[instrument(skip(self, update), fields(tag = %update.tag_id))]
    pub fn ingest(&self, update: TagUpdate) -> Result<IngestOutcome, BusError> {
        let current = self
            .registry
            .current(&update.tag_id)
            .ok_or_else(|| BusError::UnknownTag(update.tag_id.to_string()))?;

        // Check-and-record under one entry lock; concurrent identical
        // updates cannot both claim the slot.
        let ts_millis = update.timestamp.timestamp_millis();
        match self.seen.entry((update.tag_id.clone(), ts_millis)) {
            Entry::Occupied(_) => {
                self.metrics.updates_duplicate.fetch_add(1, Ordering::Relaxed);
                debug!("duplicate update dropped");
                return Ok(IngestOutcome::Duplicate);
            }
            Entry::Vacant(slot) => {
                slot.insert(ts_millis);
            }
        }

        // Version gate: once a tag has real data, only newer source
        // timestamps advance it.
        if current.version > 0 && update.timestamp <= current.timestamp {
            self.metrics.updates_stale.fetch_add(1, Ordering::Relaxed);
            debug!("out-of-order update dropped");
            return Ok(IngestOutcome::Stale);
        }

        let owner = self
            .registry
            .owner(&update.tag_id)
            .ok_or_else(|| BusError::Unowned {
                tag: update.tag_id.to_string(),
            })?;
        let inbox = self
            .inboxes
            .get(&owner)
            .ok_or_else(|| BusError::UnknownNode(owner.to_string()))?;

        let version = self.registry.apply_update(&update)?;
        match inbox.push(update) {
            PushOutcome::Queued => {}
            PushOutcome::Coalesced => {
                self.metrics.updates_coalesced.fetch_add(1, Ordering::Relaxed);
            }
            PushOutcome::DroppedOldest => {
                self.metrics.updates_shed.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.metrics.updates_accepted.fetch_add(1, Ordering::Relaxed);
        Ok(IngestOutcome::Accepted { version })
    }

    /// Route an approved command's writes out to the responsible drivers.
    ///
    /// Writes do not update local tag state; the new value comes back through
    /// ingest on the next driver scan.
    #[instrument(skip(self, action), fields(summary = %action.summary))]
    pub async fn dispatch(&self, action: &ControlAction) -> Result<(), BusError> {
        let mut per_driver: HashMap<String, Vec<TagWrite>> = HashMap::new();
        for write in &action.writes {
            let route = self
                .registry
                .route(&write.tag_id)
                .ok_or_else(|| BusError::Unrouted {
                    tag: write.tag_id.to_string(),
                })?;
            per_driver.entry(route).or_default().push(write.clone());
        }

        for (route, writes) in per_driver {
            let adapter = self
                .drivers
                .get(&route)
                .map(|a| Arc::clone(a.value()))
                .ok_or_else(|| BusError::Unrouted {
                    tag: writes[0].tag_id.to_string(),
                })?;
            if let Err(fault) = adapter.write(&writes).await {
                self.metrics.command_failures.fetch_add(1, Ordering::Relaxed);
                warn!(driver = %route, reason = %fault, "driver write failed");
                return Err(BusError::DriverWrite {
                    driver: route,
                    reason: fault.reason,
                });
            }
        }
        self.metrics.commands_dispatched.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Consistent snapshot of the named tags.
    pub fn snapshot(&self, ids: &BTreeSet<TagId>) -> TagSnapshot {
        self.registry.snapshot(ids)
    }

    /// Current versions of the named tags.
    pub fn current_versions(&self, ids: &BTreeSet<TagId>) -> BTreeMap<TagId, u64> {
        self.registry.versions(ids)
    }

    /// Forget de-duplication entries older than the window. Called on an
    /// interval by the engine.
    pub fn sweep_dedup(&self, now_millis: i64) -> usize {
        let window = self.config.dedup_window_ms;
        let before = self.seen.len();
        self.seen.retain(|_, ts| now_millis - *ts < window);
        before - self.seen.len()
    }
}
