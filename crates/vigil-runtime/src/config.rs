//! Engine configuration
//!
//! Defaults come from `Default` impls, a JSON topology file can replace them
//! wholesale (`VIGIL_CONFIG_FILE`), and `VIGIL_`-prefixed environment
//! variables override individual scalars on top. Topology (tags, nodes,
//! loops) only comes from the file or from code; it has no sensible
//! environment encoding.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::warn;
use vigil_common::{ObjectiveWeights, VigilError};
use vigil_node::PidLoopSpec;

/// Whole-engine configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    pub bus: BusSettings,
    pub gate: GateSettings,
    pub consensus: ConsensusSettings,
    pub checkpoint: CheckpointSettings,
    /// Tag table: ownership, driver routes, and twin model parameters
    pub tags: Vec<TagEntry>,
    /// Decision nodes and their estimation loops
    pub nodes: Vec<NodeEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusSettings {
    pub inbox_capacity: usize,
    pub dedup_window_ms: i64,
}

impl Default for BusSettings {
    fn default() -> Self {
        Self {
            inbox_capacity: vigil_bus::DEFAULT_INBOX_CAPACITY,
            dedup_window_ms: vigil_bus::DEFAULT_DEDUP_WINDOW_MS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateSettings {
    pub risk_threshold: f64,
    pub min_confidence: f64,
    pub repeat_failure_threshold: u32,
}

impl Default for GateSettings {
    fn default() -> Self {
        let d = vigil_twin::GateConfig::default();
        Self {
            risk_threshold: d.risk_threshold,
            min_confidence: d.min_confidence,
            repeat_failure_threshold: d.repeat_failure_threshold,
        }
    }
}

impl GateSettings {
    pub fn to_gate_config(&self) -> vigil_twin::GateConfig {
        vigil_twin::GateConfig {
            risk_threshold: self.risk_threshold,
            min_confidence: self.min_confidence,
            repeat_failure_threshold: self.repeat_failure_threshold,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusSettings {
    pub collection_window_ms: i64,
    pub deciding_timeout_ms: i64,
    pub ambiguity_margin: f64,
    pub min_confidence: f64,
    pub cancel_version_delta: u64,
    pub weights: ObjectiveWeights,
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        Self {
            collection_window_ms: vigil_consensus::DEFAULT_COLLECTION_WINDOW_MS,
            deciding_timeout_ms: vigil_consensus::DEFAULT_DECIDING_TIMEOUT_MS,
            ambiguity_margin: vigil_consensus::DEFAULT_AMBIGUITY_MARGIN,
            min_confidence: vigil_consensus::DEFAULT_MIN_CONFIDENCE,
            cancel_version_delta: vigil_consensus::DEFAULT_CANCEL_VERSION_DELTA,
            weights: ObjectiveWeights::default(),
        }
    }
}

impl ConsensusSettings {
    pub fn to_validator_config(&self, risk_threshold: f64) -> vigil_consensus::ValidatorConfig {
        vigil_consensus::ValidatorConfig {
            collection_window: chrono::Duration::milliseconds(self.collection_window_ms),
            deciding_timeout: chrono::Duration::milliseconds(self.deciding_timeout_ms),
            ambiguity_margin: self.ambiguity_margin,
            min_confidence: self.min_confidence,
            risk_threshold,
            cancel_version_delta: self.cancel_version_delta,
            weights: self.weights,
            ..vigil_consensus::ValidatorConfig::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointSettings {
    pub dir: PathBuf,
    pub retention: usize,
    pub node_interval_secs: u64,
    pub knowledge_interval_secs: u64,
}

impl Default for CheckpointSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./checkpoints"),
            retention: crate::DEFAULT_CHECKPOINT_RETENTION,
            node_interval_secs: vigil_node::DEFAULT_CHECKPOINT_INTERVAL_SECS,
            knowledge_interval_secs: crate::DEFAULT_KNOWLEDGE_CHECKPOINT_INTERVAL_SECS,
        }
    }
}

/// One tag in the ecosystem
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagEntry {
    pub id: String,
    pub owner: String,
    pub driver: String,
    /// Twin model parameters; tags without a model cannot be simulated
    pub model: Option<ModelEntry>,
}

/// First-order process model parameters for one tag
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModelEntry {
    pub gain: f64,
    pub time_constant_s: f64,
    pub horizon_s: f64,
    pub low_limit: f64,
    pub high_limit: f64,
}

impl ModelEntry {
    pub fn to_params(self) -> vigil_twin::FirstOrderParams {
        vigil_twin::FirstOrderParams {
            gain: self.gain,
            time_constant_s: self.time_constant_s,
            horizon_s: self.horizon_s,
            low_limit: self.low_limit,
            high_limit: self.high_limit,
        }
    }
}

/// One decision node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEntry {
    pub id: String,
    pub degrade_threshold: u32,
    pub loops: Vec<PidLoopSpec>,
}

impl EngineConfig {
    /// Load configuration: `.env`, then the optional JSON topology file,
    /// then scalar environment overrides.
    pub fn load() -> vigil_common::Result<Self> {
        let _ = dotenvy::dotenv();

        let mut cfg = match std::env::var("VIGIL_CONFIG_FILE") {
            Ok(path) => {
                let bytes = std::fs::read(&path)
                    .map_err(|e| VigilError::Config(format!("read {path}: {e}")))?;
                serde_json::from_slice(&bytes)
                    .map_err(|e| VigilError::Config(format!("parse {path}: {e}")))?
            }
            Err(_) => Self::default(),
        };

        env_override("VIGIL_INBOX_CAPACITY", &mut cfg.bus.inbox_capacity);
        env_override("VIGIL_DEDUP_WINDOW_MS", &mut cfg.bus.dedup_window_ms);
        env_override("VIGIL_RISK_THRESHOLD", &mut cfg.gate.risk_threshold);
        env_override("VIGIL_SIM_MIN_CONFIDENCE", &mut cfg.gate.min_confidence);
        env_override("VIGIL_COLLECTION_WINDOW_MS", &mut cfg.consensus.collection_window_ms);
        env_override("VIGIL_DECIDING_TIMEOUT_MS", &mut cfg.consensus.deciding_timeout_ms);
        env_override("VIGIL_AMBIGUITY_MARGIN", &mut cfg.consensus.ambiguity_margin);
        env_override("VIGIL_MIN_CONFIDENCE", &mut cfg.consensus.min_confidence);
        env_override("VIGIL_CANCEL_VERSION_DELTA", &mut cfg.consensus.cancel_version_delta);
        env_override("VIGIL_CHECKPOINT_RETENTION", &mut cfg.checkpoint.retention);
        env_override("VIGIL_CHECKPOINT_INTERVAL_SECS", &mut cfg.checkpoint.node_interval_secs);
        if let Ok(dir) = std::env::var("VIGIL_CHECKPOINT_DIR") {
            cfg.checkpoint.dir = PathBuf::from(dir);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Structural checks: unique tags, known ownership, loops over known tags.
    pub fn validate(&self) -> vigil_common::Result<()> {
        let mut seen = std::collections::HashSet::new();
        for tag in &self.tags {
            if !seen.insert(tag.id.as_str()) {
                return Err(VigilError::Config(format!("duplicate tag {}", tag.id)));
            }
        }
        let mut nodes = std::collections::HashSet::new();
        for node in &self.nodes {
            if !nodes.insert(node.id.as_str()) {
                return Err(VigilError::Config(format!("duplicate node {}", node.id)));
            }
            for lp in &node.loops {
                for tag in [lp.pv_tag.as_str(), lp.output_tag.as_str()] {
                    if !seen.contains(tag) {
                        return Err(VigilError::Config(format!(
                            "node {} loop {} references unknown tag {tag}",
                            node.id, lp.name
                        )));
                    }
                }
            }
        }
        for tag in &self.tags {
            if !nodes.contains(tag.owner.as_str()) {
                return Err(VigilError::Config(format!(
                    "tag {} owned by unknown node {}",
                    tag.id, tag.owner
                )));
            }
        }
        Ok(())
    }

    pub fn to_bus_config(&self) -> vigil_bus::BusConfig {
        vigil_bus::BusConfig {
            inbox_capacity: self.bus.inbox_capacity,
            dedup_window_ms: self.bus.dedup_window_ms,
        }
    }
}

fn env_override<T: std::str::FromStr>(key: &str, slot: &mut T) {
    if let Ok(raw) = std::env::var(key) {
        match raw.parse() {
            Ok(v) => *slot = v,
            Err(_) => warn!(key, raw, "unparseable override ignored"),
        }
    }
}
