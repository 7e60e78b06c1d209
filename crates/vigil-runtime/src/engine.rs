//! Engine assembly and the consensus driving loop

use crate::checkpoint::{CheckpointStore, NodeCheckpointSink};
use crate::config::EngineConfig;
use crate::dispatch::CommandDispatcher;
use crate::supervisory::Supervisory;
use crate::telemetry::EngineTelemetry;
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vigil_bus::{TagBus, TagRegistry, TagSpec};
use vigil_common::{EntityKind, NodeId, NodeStatus, Proposal, TagId, VigilError};
use vigil_consensus::{
    ConsensusValidator, Decision, NodeStatusSource, RoundOutcome, TagVersionSource,
};
use vigil_knowledge::{KnowledgeGraph, KnowledgeSnapshot};
use vigil_node::{
    LifecyclePolicy, NodeConfig, NodeHandle, NodeRuntime, PidEstimator,
};
use vigil_twin::{FirstOrderModel, GateDecision, SimulationGate, Simulator};

/// Staleness and cancellation checks read versions straight off the bus.
struct BusVersions(Arc<TagBus>);

impl TagVersionSource for BusVersions {
    fn current_versions(&self, tags: &BTreeSet<TagId>) -> BTreeMap<TagId, u64> {
        self.0.current_versions(tags)
    }
}

/// Origin eligibility reads lifecycle status off the knowledge graph's
/// node-state map.
struct KnowledgeStatuses(Arc<KnowledgeGraph>);

impl NodeStatusSource for KnowledgeStatuses {
    fn node_status(&self, node: &NodeId) -> Option<NodeStatus> {
        self.0.node_state(node).map(|s| s.status)
    }
}

/// The assembled engine
pub struct Engine {
    bus: Arc<TagBus>,
    knowledge: Arc<KnowledgeGraph>,
    validator: Arc<ConsensusValidator>,
    dispatcher: Arc<CommandDispatcher>,
    telemetry: Arc<EngineTelemetry>,
    checkpoints: Arc<CheckpointStore>,
    shutdown_tx: watch::Sender<bool>,
    node_handles: Vec<NodeHandle>,
    loop_handle: JoinHandle<()>,
}

impl Engine {
    /// Build everything from configuration and spawn node and engine tasks.
    pub async fn start(config: EngineConfig) -> vigil_common::Result<Self> {
        config.validate()?;

        let registry = Arc::new(TagRegistry::new());
        for tag in &config.tags {
            registry.register(TagSpec::new(
                tag.id.as_str(),
                tag.owner.as_str(),
                tag.driver.as_str(),
            ));
        }
        let bus = Arc::new(TagBus::new(config.to_bus_config(), Arc::clone(&registry)));

        let checkpoints = Arc::new(CheckpointStore::open(
            &config.checkpoint.dir,
            config.checkpoint.retention,
        )?);

        let knowledge = match checkpoints.load_latest(EntityKind::KnowledgeGraph, "graph")? {
            Some(blob) => match bincode::deserialize::<KnowledgeSnapshot>(&blob) {
                Ok(snapshot) => {
                    info!("knowledge graph restored from checkpoint");
                    Arc::new(KnowledgeGraph::restore(snapshot))
                }
                Err(e) => {
                    warn!(error = %e, "knowledge snapshot undecodable, starting empty");
                    Arc::new(KnowledgeGraph::new())
                }
            },
            None => Arc::new(KnowledgeGraph::new()),
        };

        let mut model = FirstOrderModel::default();
        for tag in &config.tags {
            if let Some(entry) = &tag.model {
                model = model.with_tag(tag.id.as_str(), entry.to_params());
            }
        }
        let gate = Arc::new(SimulationGate::new(
            config.gate.to_gate_config(),
            Simulator::new(Arc::new(model)),
        ));

        let validator = Arc::new(ConsensusValidator::new(
            config.consensus.to_validator_config(config.gate.risk_threshold),
            Arc::new(BusVersions(Arc::clone(&bus))),
            Arc::new(KnowledgeStatuses(Arc::clone(&knowledge))),
        ));
        let telemetry = Arc::new(EngineTelemetry::new()?);
        let dispatcher = Arc::new(CommandDispatcher::new(
            Arc::clone(&bus),
            crate::DEFAULT_AUDIT_LOG_CAPACITY,
        ));

        let (shutdown_tx, _) = watch::channel(false);
        let (proposal_tx, proposal_rx) = mpsc::channel::<Proposal>(256);
        let sink = Arc::new(NodeCheckpointSink::new(Arc::clone(&checkpoints)));

        let mut node_handles = Vec::with_capacity(config.nodes.len());
        for node in &config.nodes {
            let node_config = NodeConfig::new(NodeId::new(node.id.clone()))
                .with_checkpoint_interval(Duration::from_secs(config.checkpoint.node_interval_secs))
                .with_lifecycle(LifecyclePolicy {
                    degrade_threshold: node.degrade_threshold,
                    ..LifecyclePolicy::default()
                });
            node_handles.push(NodeRuntime::spawn(
                node_config,
                Box::new(PidEstimator::new(node.loops.clone())),
                Arc::clone(&bus),
                Arc::clone(&knowledge),
                proposal_tx.clone(),
                Arc::clone(&sink) as Arc<dyn vigil_node::CheckpointSink>,
                shutdown_tx.subscribe(),
            ));
        }
        drop(proposal_tx);
        info!(nodes = node_handles.len(), tags = config.tags.len(), "engine assembled");

        let driver = EngineLoop {
            bus: Arc::clone(&bus),
            gate,
            validator: Arc::clone(&validator),
            dispatcher: Arc::clone(&dispatcher),
            knowledge: Arc::clone(&knowledge),
            telemetry: Arc::clone(&telemetry),
            checkpoints: Arc::clone(&checkpoints),
            knowledge_checkpoint_interval: Duration::from_secs(
                config.checkpoint.knowledge_interval_secs,
            ),
        };
        let loop_handle = tokio::spawn(driver.run(proposal_rx, shutdown_tx.subscribe()));

        Ok(Self {
            bus,
            knowledge,
            validator,
            dispatcher,
            telemetry,
            checkpoints,
            shutdown_tx,
            node_handles,
            loop_handle,
        })
    }

    /// Bus handle for driver adapter registration and ingest.
    pub fn bus(&self) -> &Arc<TagBus> {
        &self.bus
    }

    pub fn knowledge(&self) -> &Arc<KnowledgeGraph> {
        &self.knowledge
    }

    pub fn checkpoints(&self) -> &Arc<CheckpointStore> {
        &self.checkpoints
    }

    pub fn supervisory(&self) -> Supervisory {
        Supervisory::new(
            Arc::clone(&self.bus),
            Arc::clone(&self.knowledge),
            Arc::clone(&self.validator),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.telemetry),
        )
    }

    /// Graceful shutdown: nodes checkpoint and stop, then the engine loop
    /// takes a final knowledge snapshot.
    pub async fn shutdown(self) -> vigil_common::Result<()> {
        info!("engine shutting down");
        let _ = self.shutdown_tx.send(true);
        for handle in self.node_handles {
            handle
                .join()
                .await
                .map_err(|e| VigilError::Internal(format!("node task panicked: {e}")))?;
        }
        self.loop_handle
            .await
            .map_err(|e| VigilError::Internal(format!("engine loop panicked: {e}")))?;
        info!("engine stopped");
        Ok(())
    }
}

/// The task that moves proposals through the gate into consensus and
/// decisions out to the dispatcher.
struct EngineLoop {
    bus: Arc<TagBus>,
    gate: Arc<SimulationGate>,
    validator: Arc<ConsensusValidator>,
    dispatcher: Arc<CommandDispatcher>,
    knowledge: Arc<KnowledgeGraph>,
    telemetry: Arc<EngineTelemetry>,
    checkpoints: Arc<CheckpointStore>,
    knowledge_checkpoint_interval: Duration,
}

impl EngineLoop {
    async fn run(self, mut proposals: mpsc::Receiver<Proposal>, mut shutdown: watch::Receiver<bool>) {
        let mut decide_tick = tokio::time::interval(Duration::from_millis(crate::DECIDE_TICK_MS));
        decide_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut sweep_tick = tokio::time::interval(Duration::from_secs(30));
        let mut ckpt_tick = tokio::time::interval(self.knowledge_checkpoint_interval);
        ckpt_tick.reset();
        let mut intake_open = true;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                maybe = proposals.recv(), if intake_open => {
                    match maybe {
                        Some(proposal) => self.admit(proposal),
                        None => intake_open = false,
                    }
                }
                _ = decide_tick.tick() => {
                    self.decide_due().await;
                }
                _ = sweep_tick.tick() => {
                    let swept = self.bus.sweep_dedup(Utc::now().timestamp_millis());
                    if swept > 0 {
                        debug!(swept, "dedup window swept");
                    }
                }
                _ = ckpt_tick.tick() => {
                    self.checkpoint_knowledge();
                }
            }
        }

        // Flush whatever became due and persist the graph before exit.
        self.decide_due().await;
        self.checkpoint_knowledge();
        info!("engine loop stopped");
    }

    /// Gate a proposal, then hand it to the validator.
    fn admit(&self, proposal: Proposal) {
        let snapshot = self.bus.snapshot(&proposal.target_tags);
        match self.gate.assess(&proposal, &snapshot) {
            GateDecision::Cleared { simulation } => {
                let (proposal, simulated) = match simulation {
                    Some(result) => (
                        proposal.with_predicted_effect(result.predicted_effect),
                        true,
                    ),
                    None => (proposal, false),
                };
                self.validator.submit(proposal, simulated);
                self.telemetry.proposals_submitted.inc();
            }
            GateDecision::Rejected { reason, escalate } => {
                self.telemetry.proposals_gate_rejected.inc();
                if escalate {
                    self.telemetry.gate_escalations.inc();
                    warn!(reason = %reason, "gate escalation, resource set needs human attention");
                } else {
                    debug!(reason = %reason, "proposal rejected at the gate");
                }
            }
        }
    }

    async fn decide_due(&self) {
        for decision in self.validator.close_due(Utc::now()) {
            let latency = (decision.decided_at - decision.opened_at)
                .to_std()
                .unwrap_or_default();
            self.telemetry.decision_latency.observe(latency.as_secs_f64());
            self.apply(decision).await;
        }
    }

    async fn apply(&self, decision: Decision) {
        match &decision.outcome {
            RoundOutcome::Approved { .. } => {
                self.telemetry.rounds_approved.inc();
                if let Some(proposal) = &decision.approved {
                    self.record_decision_fact(proposal);
                    match self
                        .dispatcher
                        .dispatch_approved(proposal, decision.round_id, decision.human_resolved)
                        .await
                    {
                        Ok(()) => self.telemetry.commands_dispatched.inc(),
                        Err(e) => {
                            self.telemetry.dispatch_failures.inc();
                            warn!(round = %decision.round_id, error = %e, "approved command failed to dispatch");
                        }
                    }
                }
            }
            RoundOutcome::Rejected => {
                self.telemetry.rounds_rejected.inc();
            }
            RoundOutcome::Escalated(reason) => {
                self.telemetry.rounds_escalated.inc();
                warn!(round = %decision.round_id, %reason, "round escalated");
            }
        }
    }

    /// Publish the approval as a learned fact so other nodes can consult it.
    fn record_decision_fact(&self, proposal: &Proposal) {
        for tag in &proposal.target_tags {
            self.knowledge.derive(
                &proposal.origin_node_id,
                tag.as_str(),
                "approved_action",
                &proposal.action.summary,
            );
        }
    }

    fn checkpoint_knowledge(&self) {
        let snapshot = self.knowledge.snapshot();
        match bincode::serialize(&snapshot) {
            Ok(blob) => {
                if let Err(e) = self.checkpoints.save(EntityKind::KnowledgeGraph, "graph", &blob) {
                    warn!(error = %e, "knowledge checkpoint failed");
                }
            }
            Err(e) => warn!(error = %e, "knowledge snapshot encode failed"),
        }
    }
}
