//! End-to-end engine tests: ingest through estimation, gating, consensus,
//! and dispatch against a recording driver.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use vigil_bus::{DriverAdapter, DriverFault};
use vigil_common::{
    ControlAction, EntityKind, FactPattern, NodeStatus, TagQuality, TagUpdate, TagValue, TagWrite,
};
use vigil_node::PidLoopSpec;
use vigil_runtime::config::{CheckpointSettings, ConsensusSettings, ModelEntry, NodeEntry, TagEntry};
use vigil_runtime::{CheckpointStore, Engine, EngineConfig};

#[derive(Default)]
struct RecordingDriver {
    writes: Mutex<Vec<TagWrite>>,
}

#[async_trait]
impl DriverAdapter for RecordingDriver {
    fn name(&self) -> &str {
        "sim"
    }

    async fn write(&self, writes: &[TagWrite]) -> Result<(), DriverFault> {
        self.writes.lock().extend_from_slice(writes);
        Ok(())
    }
}

fn test_config(checkpoint_dir: &TempDir) -> EngineConfig {
    let model = ModelEntry {
        gain: 1.0,
        time_constant_s: 5.0,
        horizon_s: 30.0,
        low_limit: 0.0,
        high_limit: 100.0,
    };
    EngineConfig {
        consensus: ConsensusSettings {
            collection_window_ms: 50,
            ambiguity_margin: 0.0,
            ..ConsensusSettings::default()
        },
        checkpoint: CheckpointSettings {
            dir: checkpoint_dir.path().to_path_buf(),
            ..CheckpointSettings::default()
        },
        tags: vec![
            TagEntry {
                id: "FIC101.PV".into(),
                owner: "node-flow".into(),
                driver: "sim".into(),
                model: Some(model),
            },
            TagEntry {
                id: "FIC101.OUT".into(),
                owner: "node-flow".into(),
                driver: "sim".into(),
                model: Some(model),
            },
        ],
        nodes: vec![NodeEntry {
            id: "node-flow".into(),
            degrade_threshold: 3,
            loops: vec![PidLoopSpec {
                name: "flow".into(),
                pv_tag: "FIC101.PV".into(),
                output_tag: "FIC101.OUT".into(),
                setpoint: 50.0,
                kp: 0.8,
                ki: 0.0,
                kd: 0.0,
                output_min: 0.0,
                output_max: 100.0,
                deadband: 0.5,
                pv_span: 100.0,
            }],
        }],
        ..EngineConfig::default()
    }
}

async fn wait_for<F: Fn() -> bool>(what: &str, cond: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
async fn test_deviation_flows_through_to_dispatch() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::start(test_config(&dir)).await.unwrap();
    let driver = Arc::new(RecordingDriver::default());
    engine.bus().register_driver(Arc::clone(&driver) as Arc<dyn DriverAdapter>);

    engine
        .bus()
        .ingest(TagUpdate::new("FIC101.OUT", TagValue::Float(30.0), TagQuality::Good))
        .unwrap();
    engine
        .bus()
        .ingest(TagUpdate::new("FIC101.PV", TagValue::Float(20.0), TagQuality::Good))
        .unwrap();

    wait_for("a dispatched write", || !driver.writes.lock().is_empty()).await;
    {
        let writes = driver.writes.lock();
        assert_eq!(writes[0].tag_id.as_str(), "FIC101.OUT");
    }

    let supervisory = engine.supervisory();
    let status = supervisory.get_status();
    assert_eq!(status.node_states.len(), 1);
    assert_eq!(status.node_states[0].status, NodeStatus::Active);

    let metrics = supervisory.get_metrics();
    assert!(metrics.commands_dispatched >= 1);
    assert!(metrics.proposals_submitted >= 1);

    let audit = supervisory.get_audit_log(10);
    assert!(!audit.is_empty());
    let record = audit.last().unwrap();
    assert_eq!(
        record.origin_node_id.as_ref().map(|n| n.as_str()),
        Some("node-flow")
    );
    assert!(record.round_id.is_some());
    assert!(!record.human_origin);

    // The approval is published as a learned fact.
    let facts =
        supervisory.get_knowledge_snapshot(&FactPattern::any().relation("approved_action"));
    assert!(!facts.is_empty());

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_manual_override_bypasses_consensus() {
    let dir = TempDir::new().unwrap();
    let engine = Engine::start(test_config(&dir)).await.unwrap();
    let driver = Arc::new(RecordingDriver::default());
    engine.bus().register_driver(Arc::clone(&driver) as Arc<dyn DriverAdapter>);

    let supervisory = engine.supervisory();
    supervisory
        .submit_manual_override(ControlAction::single("force output", "FIC101.OUT", 0.0))
        .await
        .unwrap();

    assert_eq!(driver.writes.lock().len(), 1);
    let audit = supervisory.get_audit_log(10);
    assert!(audit.last().unwrap().human_origin);
    assert!(audit.last().unwrap().round_id.is_none());

    engine.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_persists_state_for_restart() {
    let dir = TempDir::new().unwrap();
    let config = test_config(&dir);

    let engine = Engine::start(config.clone()).await.unwrap();
    let driver = Arc::new(RecordingDriver::default());
    engine.bus().register_driver(Arc::clone(&driver) as Arc<dyn DriverAdapter>);

    engine
        .bus()
        .ingest(TagUpdate::new("FIC101.OUT", TagValue::Float(30.0), TagQuality::Good))
        .unwrap();
    engine
        .bus()
        .ingest(TagUpdate::new("FIC101.PV", TagValue::Float(20.0), TagQuality::Good))
        .unwrap();
    wait_for("a dispatched write", || !driver.writes.lock().is_empty()).await;
    engine.shutdown().await.unwrap();

    // Node model state and the knowledge graph both hit disk.
    let store = CheckpointStore::open(dir.path(), 5).unwrap();
    assert!(store.load_latest(EntityKind::Node, "node-flow").unwrap().is_some());
    assert!(store
        .load_latest(EntityKind::KnowledgeGraph, "graph")
        .unwrap()
        .is_some());

    // A fresh engine over the same checkpoint dir picks the state back up.
    let engine = Engine::start(config).await.unwrap();
    let facts = engine
        .supervisory()
        .get_knowledge_snapshot(&FactPattern::any().relation("approved_action"));
    assert!(!facts.is_empty());
    engine.shutdown().await.unwrap();
}
