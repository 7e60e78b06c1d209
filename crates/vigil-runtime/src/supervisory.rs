//! In-process supervisory facade
//!
//! The boundary a REST layer or operator console would sit on top of. Exposes
//! status, metrics, knowledge queries, manual overrides, and escalation
//! resolution without reaching into engine internals.

use crate::dispatch::{AuditRecord, CommandDispatcher};
use crate::telemetry::{EngineTelemetry, MetricsSnapshot};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;
use vigil_bus::TagBus;
use vigil_consensus::{ConsensusValidator, Decision, EscalationDecision, RoundSummary};
use vigil_common::{ControlAction, FactPattern, KnowledgeFact};
use vigil_knowledge::{KnowledgeGraph, NodeState};

/// Point-in-time engine status
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub node_states: Vec<NodeState>,
    pub active_rounds: Vec<RoundSummary>,
    pub pending_escalations: Vec<RoundSummary>,
}

/// Supervisory handle; clone freely
#[derive(Clone)]
pub struct Supervisory {
    bus: Arc<TagBus>,
    knowledge: Arc<KnowledgeGraph>,
    validator: Arc<ConsensusValidator>,
    dispatcher: Arc<CommandDispatcher>,
    telemetry: Arc<EngineTelemetry>,
}

impl Supervisory {
    pub(crate) fn new(
        bus: Arc<TagBus>,
        knowledge: Arc<KnowledgeGraph>,
        validator: Arc<ConsensusValidator>,
        dispatcher: Arc<CommandDispatcher>,
        telemetry: Arc<EngineTelemetry>,
    ) -> Self {
        Self {
            bus,
            knowledge,
            validator,
            dispatcher,
            telemetry,
        }
    }

    /// Node states plus rounds in flight.
    pub fn get_status(&self) -> EngineStatus {
        EngineStatus {
            node_states: self.knowledge.node_states(),
            active_rounds: self.validator.active_rounds(),
            pending_escalations: self.validator.escalations(),
        }
    }

    pub fn get_metrics(&self) -> MetricsSnapshot {
        self.telemetry.snapshot(self.bus.metrics())
    }

    /// Current winners matching the pattern.
    pub fn get_knowledge_snapshot(&self, pattern: &FactPattern) -> Vec<KnowledgeFact> {
        self.knowledge.query(pattern)
    }

    /// Recent audit records, newest last.
    pub fn get_audit_log(&self, limit: usize) -> Vec<AuditRecord> {
        self.dispatcher.audit_log(limit)
    }

    /// Human action bypassing consensus; dispatched immediately with human
    /// provenance.
    pub async fn submit_manual_override(&self, action: ControlAction) -> vigil_common::Result<()> {
        self.dispatcher.submit_manual_override(action).await
    }

    /// Apply a human verdict to an escalated round. An approval is dispatched
    /// right away; the resolution is final either way.
    pub async fn resolve_escalation(
        &self,
        round_id: Uuid,
        verdict: EscalationDecision,
    ) -> vigil_common::Result<Decision> {
        let decision = self.validator.resolve_escalation(round_id, verdict)?;
        info!(round = %round_id, outcome = ?decision.outcome, "escalation resolved");
        if let Some(proposal) = &decision.approved {
            match self
                .dispatcher
                .dispatch_approved(proposal, round_id, true)
                .await
            {
                Ok(()) => self.telemetry.commands_dispatched.inc(),
                Err(e) => {
                    self.telemetry.dispatch_failures.inc();
                    return Err(e);
                }
            }
        }
        Ok(decision)
    }
}
