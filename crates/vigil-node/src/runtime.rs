//! The node task: inbox-driven estimation cycles
//!
//! Each node runs as one tokio task. It waits on its inbox, snapshots its tag
//! scope, runs the estimator, and forwards proposals to the validator. Model
//! state is checkpointed on an interval and once more on shutdown.

use crate::estimator::{CheckpointSink, EstimationContext, Estimator};
use crate::lifecycle::{LifecyclePolicy, NodeHealth};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use vigil_bus::TagBus;
use vigil_common::{NodeId, NodeStatus, Proposal};
use vigil_knowledge::{KnowledgeGraph, NodeState};

/// Per-node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub id: NodeId,
    pub checkpoint_interval: Duration,
    pub lifecycle: LifecyclePolicy,
}

impl NodeConfig {
    pub fn new(id: impl Into<NodeId>) -> Self {
        Self {
            id: id.into(),
            checkpoint_interval: Duration::from_secs(crate::DEFAULT_CHECKPOINT_INTERVAL_SECS),
            lifecycle: LifecyclePolicy::default(),
        }
    }

    pub fn with_checkpoint_interval(mut self, interval: Duration) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn with_lifecycle(mut self, lifecycle: LifecyclePolicy) -> Self {
        self.lifecycle = lifecycle;
        self
    }
}

/// Handle to a spawned node task
pub struct NodeHandle {
    pub node_id: NodeId,
    join: JoinHandle<()>,
}

impl NodeHandle {
    /// Wait for the node task to finish after shutdown was signalled.
    pub async fn join(self) -> Result<(), tokio::task::JoinError> {
        self.join.await
    }
}

/// A running decision node
pub struct NodeRuntime {
    config: NodeConfig,
    estimator: Box<dyn Estimator>,
    bus: Arc<TagBus>,
    knowledge: Arc<KnowledgeGraph>,
    proposal_tx: mpsc::Sender<Proposal>,
    sink: Arc<dyn CheckpointSink>,
    health: NodeHealth,
}

impl NodeRuntime {
    /// Attach the node to the bus and spawn its task.
    pub fn spawn(
        config: NodeConfig,
        estimator: Box<dyn Estimator>,
        bus: Arc<TagBus>,
        knowledge: Arc<KnowledgeGraph>,
        proposal_tx: mpsc::Sender<Proposal>,
        sink: Arc<dyn CheckpointSink>,
        shutdown: watch::Receiver<bool>,
    ) -> NodeHandle {
        let node_id = config.id.clone();
        knowledge.register_node(node_id.clone());
        let inbox = bus.attach_node(node_id.clone());

        let runtime = Self {
            config,
            estimator,
            bus,
            knowledge,
            proposal_tx,
            sink,
            health: NodeHealth::new(),
        };
        let join = tokio::spawn(runtime.run(inbox, shutdown));
        NodeHandle { node_id, join }
    }

    #[instrument(skip_all, fields(node = %self.config.id))]
    async fn run(mut self, inbox: vigil_bus::NodeInbox, mut shutdown: watch::Receiver<bool>) {
        self.restore().await;
        info!("node started");

        let mut checkpoint_tick = tokio::time::interval(self.config.checkpoint_interval);
        checkpoint_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        checkpoint_tick.reset();

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = checkpoint_tick.tick() => {
                    self.checkpoint().await;
                }
                batch = inbox.recv_batch() => {
                    debug!(updates = batch.len(), "cycle start");
                    if !self.cycle().await {
                        break;
                    }
                }
            }
        }

        self.checkpoint().await;
        info!("node stopped");
    }

    /// Resume from the latest checkpointed model state, if one exists. A
    /// missing or unreadable checkpoint means a cold start, not a failure.
    async fn restore(&mut self) {
        match self.sink.load_latest(self.config.id.as_str()).await {
            Ok(Some(blob)) => match self.estimator.restore_state(&blob) {
                Ok(()) => info!(bytes = blob.len(), "model state restored"),
                Err(e) => warn!(error = %e, "checkpoint blob rejected, starting cold"),
            },
            Ok(None) => debug!("no prior checkpoint, starting cold"),
            Err(e) => warn!(error = %e, "checkpoint load failed, starting cold"),
        }
    }

    async fn checkpoint(&self) {
        let blob = match self.estimator.snapshot_state() {
            Ok(blob) => blob,
            Err(e) => {
                warn!(error = %e, "model state snapshot failed");
                return;
            }
        };
        if let Err(e) = self.sink.checkpoint(self.config.id.as_str(), blob).await {
            warn!(error = %e, "checkpoint write failed");
        }
    }

    /// One estimation cycle. Returns false when the validator side is gone
    /// and the task should stop.
    async fn cycle(&mut self) -> bool {
        let scope = self.bus.registry().scope_of(&self.config.id);
        let snapshot = self.bus.snapshot(&scope);
        let ctx = EstimationContext {
            node_id: &self.config.id,
            snapshot: &snapshot,
            knowledge: &self.knowledge,
        };

        match self.estimator.estimate(&ctx) {
            Ok(proposals) => {
                if self.health.record_success() {
                    info!("node recovered to Active");
                }
                for proposal in proposals {
                    debug!(proposal = %proposal.id, risk = proposal.risk_score, "proposal published");
                    if self.proposal_tx.send(proposal).await.is_err() {
                        warn!("proposal channel closed, stopping node");
                        return false;
                    }
                }
            }
            Err(e) => {
                error!(error = %e, "estimation cycle failed");
                if self.health.record_failure(&self.config.lifecycle, e.to_string()) {
                    match self.health.status {
                        NodeStatus::Degraded => warn!(
                            failures = self.health.consecutive_failures,
                            "node degraded, excluded from consensus"
                        ),
                        NodeStatus::Retired => {
                            warn!(
                                failures = self.health.consecutive_failures,
                                "node retired after sustained failure"
                            );
                            self.publish_state();
                            return false;
                        }
                        NodeStatus::Active => {}
                    }
                }
            }
        }

        self.publish_state();
        true
    }

    fn publish_state(&self) {
        let state = NodeState {
            node_id: self.config.id.clone(),
            status: self.health.status,
            cycles: self.health.cycles,
            consecutive_failures: self.health.consecutive_failures,
            last_error: self.health.last_error.clone(),
            updated_at: Utc::now(),
        };
        if let Err(e) = self.knowledge.update_node_state(state) {
            warn!(error = %e, "node state publish failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pid_estimator::{PidEstimator, PidLoopSpec};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use vigil_bus::{BusConfig, TagRegistry, TagSpec};
    use vigil_common::{
        CheckpointError, EstimationError, NodeStatus, TagId, TagQuality, TagUpdate, TagValue,
    };

    #[derive(Default)]
    struct MemorySink {
        blobs: Mutex<HashMap<String, Vec<u8>>>,
    }

    #[async_trait]
    impl CheckpointSink for MemorySink {
        async fn checkpoint(&self, entity_id: &str, blob: Vec<u8>) -> Result<(), CheckpointError> {
            self.blobs.lock().insert(entity_id.to_string(), blob);
            Ok(())
        }

        async fn load_latest(&self, entity_id: &str) -> Result<Option<Vec<u8>>, CheckpointError> {
            Ok(self.blobs.lock().get(entity_id).cloned())
        }
    }

    struct AlwaysFails;

    impl Estimator for AlwaysFails {
        fn estimate(
            &mut self,
            _ctx: &EstimationContext<'_>,
        ) -> Result<Vec<Proposal>, EstimationError> {
            Err(EstimationError::MissingTag("GHOST".into()))
        }
        fn snapshot_state(&self) -> Result<Vec<u8>, EstimationError> {
            Ok(Vec::new())
        }
        fn restore_state(&mut self, _blob: &[u8]) -> Result<(), EstimationError> {
            Ok(())
        }
    }

    fn loop_spec() -> PidLoopSpec {
        PidLoopSpec {
            name: "flow".into(),
            pv_tag: TagId::from("FIC101.PV"),
            output_tag: TagId::from("FIC101.OUT"),
            setpoint: 50.0,
            kp: 0.5,
            ki: 0.0,
            kd: 0.0,
            output_min: 0.0,
            output_max: 100.0,
            deadband: 1.0,
            pv_span: 100.0,
        }
    }

    fn harness(node: &str) -> (Arc<TagBus>, Arc<KnowledgeGraph>, Arc<MemorySink>) {
        let registry = Arc::new(TagRegistry::new());
        registry.register(TagSpec::new("FIC101.PV", node, "sim"));
        registry.register(TagSpec::new("FIC101.OUT", node, "sim"));
        let bus = Arc::new(TagBus::new(BusConfig::default(), registry));
        (bus, Arc::new(KnowledgeGraph::new()), Arc::new(MemorySink::default()))
    }

    #[tokio::test]
    async fn test_cycle_publishes_proposal_and_state() {
        let (bus, knowledge, sink) = harness("node-1");
        let (tx, mut rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = NodeRuntime::spawn(
            NodeConfig::new(NodeId::from("node-1")),
            Box::new(PidEstimator::new(vec![loop_spec()])),
            Arc::clone(&bus),
            Arc::clone(&knowledge),
            tx,
            sink,
            shutdown_rx,
        );

        bus.ingest(TagUpdate::new("FIC101.PV", TagValue::Float(20.0), TagQuality::Good))
            .unwrap();
        bus.ingest(TagUpdate::new("FIC101.OUT", TagValue::Float(40.0), TagQuality::Good))
            .unwrap();

        let proposal = rx.recv().await.unwrap();
        assert_eq!(proposal.origin_node_id, NodeId::from("node-1"));
        assert!(proposal.target_tags.contains(&TagId::from("FIC101.OUT")));

        let state = knowledge.node_state(&NodeId::from("node-1")).unwrap();
        assert_eq!(state.status, NodeStatus::Active);
        assert!(state.cycles >= 1);

        shutdown_tx.send(true).unwrap();
        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_repeated_failures_degrade_node() {
        let (bus, knowledge, sink) = harness("node-1");
        let (tx, _rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let config = NodeConfig::new(NodeId::from("node-1")).with_lifecycle(LifecyclePolicy {
            degrade_threshold: 2,
            ..LifecyclePolicy::default()
        });
        let handle = NodeRuntime::spawn(
            config,
            Box::new(AlwaysFails),
            Arc::clone(&bus),
            Arc::clone(&knowledge),
            tx,
            sink,
            shutdown_rx,
        );

        for i in 0..2 {
            bus.ingest(TagUpdate::new(
                "FIC101.PV",
                TagValue::Float(20.0 + i as f64),
                TagQuality::Good,
            ))
            .unwrap();
        }

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let state = knowledge.node_state(&NodeId::from("node-1")).unwrap();
            if state.status == NodeStatus::Degraded {
                assert_eq!(state.consecutive_failures, 2);
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "node never degraded");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        shutdown_tx.send(true).unwrap();
        handle.join().await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_checkpoints_model_state() {
        let (bus, knowledge, sink) = harness("node-1");
        let (tx, mut rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = NodeRuntime::spawn(
            NodeConfig::new(NodeId::from("node-1")),
            Box::new(PidEstimator::new(vec![loop_spec()])),
            Arc::clone(&bus),
            Arc::clone(&knowledge),
            tx,
            sink.clone(),
            shutdown_rx,
        );

        bus.ingest(TagUpdate::new("FIC101.PV", TagValue::Float(10.0), TagQuality::Good))
            .unwrap();
        rx.recv().await.unwrap();

        shutdown_tx.send(true).unwrap();
        handle.join().await.unwrap();

        let blob = sink.load_latest("node-1").await.unwrap().unwrap();
        let mut restored = PidEstimator::new(vec![loop_spec()]);
        restored.restore_state(&blob).unwrap();
        assert!(restored.state().cycles >= 1);
    }
}
