//! Command dispatcher
//!
//! Delivers approved actions to drivers through the bus and records
//! provenance in a bounded in-memory audit log. Failures are reported upward,
//! never retried here; the originating node proposes a corrective action on
//! its next cycle if it still cares.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use vigil_bus::TagBus;
use vigil_common::{ControlAction, DispatchError, NodeId, Proposal, TagWrite, VigilError};

/// One dispatched (or attempted) command, for audit
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub at: DateTime<Utc>,
    /// Originating node; `None` for manual overrides
    pub origin_node_id: Option<NodeId>,
    pub round_id: Option<Uuid>,
    /// Set for manual overrides and human-resolved escalations
    pub human_origin: bool,
    pub summary: String,
    pub writes: Vec<TagWrite>,
    pub delivered: bool,
    pub failure: Option<String>,
}

/// Routes approved commands outward and keeps the audit trail
pub struct CommandDispatcher {
    bus: Arc<TagBus>,
    audit: Mutex<VecDeque<AuditRecord>>,
    capacity: usize,
}

impl CommandDispatcher {
    pub fn new(bus: Arc<TagBus>, audit_capacity: usize) -> Self {
        Self {
            bus,
            audit: Mutex::new(VecDeque::new()),
            capacity: audit_capacity.max(1),
        }
    }

    /// Dispatch a consensus-approved proposal.
    #[instrument(skip(self, proposal), fields(proposal = %proposal.id, round = %round_id))]
    pub async fn dispatch_approved(
        &self,
        proposal: &Proposal,
        round_id: Uuid,
        human_resolved: bool,
    ) -> vigil_common::Result<()> {
        if proposal.action.writes.is_empty() {
            return Err(DispatchError::EmptyAction(proposal.id).into());
        }
        self.deliver(
            &proposal.action,
            Some(proposal.origin_node_id.clone()),
            Some(round_id),
            human_resolved,
        )
        .await
    }

    /// Human action that bypasses consensus entirely; recorded with explicit
    /// human provenance.
    #[instrument(skip(self, action), fields(summary = %action.summary))]
    pub async fn submit_manual_override(&self, action: ControlAction) -> vigil_common::Result<()> {
        if action.writes.is_empty() {
            return Err(VigilError::Validation(
                "manual override has no writes".to_string(),
            ));
        }
        warn!("manual override submitted");
        self.deliver(&action, None, None, true).await
    }

    async fn deliver(
        &self,
        action: &ControlAction,
        origin_node_id: Option<NodeId>,
        round_id: Option<Uuid>,
        human_origin: bool,
    ) -> vigil_common::Result<()> {
        let result = self.bus.dispatch(action).await;
        let record = AuditRecord {
            at: Utc::now(),
            origin_node_id,
            round_id,
            human_origin,
            summary: action.summary.clone(),
            writes: action.writes.clone(),
            delivered: result.is_ok(),
            failure: result.as_ref().err().map(|e| e.to_string()),
        };
        {
            let mut audit = self.audit.lock();
            audit.push_back(record);
            while audit.len() > self.capacity {
                audit.pop_front();
            }
        }
        match result {
            Ok(()) => {
                info!(summary = %action.summary, "command delivered");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Newest-last audit records, up to `limit`.
    pub fn audit_log(&self, limit: usize) -> Vec<AuditRecord> {
        let audit = self.audit.lock();
        audit
            .iter()
            .rev()
            .take(limit)
            .rev()
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use vigil_bus::{BusConfig, DriverAdapter, DriverFault, TagRegistry, TagSpec};
    use vigil_common::{ObjectiveScores, TagId};

    struct RecordingDriver {
        writes: Mutex<Vec<TagWrite>>,
        fail: bool,
    }

    #[async_trait]
    impl DriverAdapter for RecordingDriver {
        fn name(&self) -> &str {
            "sim"
        }
        async fn write(&self, writes: &[TagWrite]) -> Result<(), DriverFault> {
            if self.fail {
                return Err(DriverFault::new("link down"));
            }
            self.writes.lock().extend_from_slice(writes);
            Ok(())
        }
    }

    fn dispatcher(fail: bool) -> (CommandDispatcher, Arc<RecordingDriver>) {
        let registry = Arc::new(TagRegistry::new());
        registry.register(TagSpec::new("VALVE", "n1", "sim"));
        let bus = Arc::new(TagBus::new(BusConfig::default(), registry));
        let driver = Arc::new(RecordingDriver {
            writes: Mutex::new(Vec::new()),
            fail,
        });
        bus.register_driver(Arc::clone(&driver) as Arc<dyn DriverAdapter>);
        (CommandDispatcher::new(bus, 4), driver)
    }

    fn proposal() -> Proposal {
        Proposal::new(
            NodeId::from("n1"),
            ControlAction::single("open valve", "VALVE", 0.7),
            0.2,
            0.9,
            ObjectiveScores::default(),
            BTreeMap::new(),
        )
    }

    #[tokio::test]
    async fn test_dispatch_records_provenance() {
        let (d, driver) = dispatcher(false);
        let p = proposal();
        let round = Uuid::now_v7();
        d.dispatch_approved(&p, round, false).await.unwrap();

        assert_eq!(driver.writes.lock().len(), 1);
        let log = d.audit_log(10);
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].origin_node_id, Some(NodeId::from("n1")));
        assert_eq!(log[0].round_id, Some(round));
        assert!(!log[0].human_origin);
        assert!(log[0].delivered);
    }

    #[tokio::test]
    async fn test_failure_recorded_and_reported() {
        let (d, _driver) = dispatcher(true);
        let err = d
            .dispatch_approved(&proposal(), Uuid::now_v7(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::Bus(_)));

        let log = d.audit_log(10);
        assert!(!log[0].delivered);
        assert!(log[0].failure.as_deref().unwrap().contains("link down"));
    }

    #[tokio::test]
    async fn test_manual_override_has_human_provenance() {
        let (d, driver) = dispatcher(false);
        d.submit_manual_override(ControlAction::single("force close", "VALVE", 0.0))
            .await
            .unwrap();

        assert_eq!(driver.writes.lock().len(), 1);
        let log = d.audit_log(10);
        assert!(log[0].human_origin);
        assert!(log[0].origin_node_id.is_none());
        assert!(log[0].round_id.is_none());
    }

    #[tokio::test]
    async fn test_empty_override_rejected() {
        let (d, _) = dispatcher(false);
        let err = d
            .submit_manual_override(ControlAction::new("noop", vec![]))
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::Validation(_)));
        assert!(d.audit_log(10).is_empty());
    }

    #[tokio::test]
    async fn test_audit_log_bounded() {
        let (d, _) = dispatcher(false);
        for i in 0..6 {
            d.submit_manual_override(ControlAction::single(format!("op {i}"), "VALVE", i as f64))
                .await
                .unwrap();
        }
        let log = d.audit_log(10);
        assert_eq!(log.len(), 4);
        assert_eq!(log.last().unwrap().summary, "op 5");
        assert_eq!(log.first().unwrap().summary, "op 2");
    }
}
