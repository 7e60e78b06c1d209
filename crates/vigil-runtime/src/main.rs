//! Vigil engine binary
//!
//! Runs the engine against a built-in simulated process so the whole decision
//! path (ingest -> estimation -> gate -> consensus -> dispatch) can be
//! exercised without real drivers. Real deployments register their own
//! `DriverAdapter` implementations on the bus instead.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigil_bus::{DriverAdapter, DriverFault, TagBus};
use vigil_common::{TagQuality, TagUpdate, TagValue, TagWrite, VIGIL_VERSION};
use vigil_node::PidLoopSpec;
use vigil_runtime::config::{ModelEntry, NodeEntry, TagEntry};
use vigil_runtime::{Engine, EngineConfig};

/// First-order plant standing in for the real process
struct SimProcess {
    /// Current process values and the outputs driving them
    values: Mutex<HashMap<String, f64>>,
}

impl SimProcess {
    fn new(initial: &[(&str, f64)]) -> Self {
        Self {
            values: Mutex::new(
                initial
                    .iter()
                    .map(|(k, v)| (k.to_string(), *v))
                    .collect(),
            ),
        }
    }

    /// One scan: pull each PV toward its driving output, plus noise.
    fn step(&self, pairs: &[(&str, &str)]) -> Vec<(String, f64)> {
        let mut rng = rand::thread_rng();
        let mut values = self.values.lock();
        let mut readings = Vec::new();
        for (pv, out) in pairs {
            let drive = values.get(*out).copied().unwrap_or(0.0);
            let current = values.get(*pv).copied().unwrap_or(0.0);
            let next = current + 0.3 * (drive - current) + rng.gen_range(-0.2..0.2);
            values.insert(pv.to_string(), next);
            readings.push((pv.to_string(), next));
        }
        readings
    }

    fn apply_writes(&self, writes: &[TagWrite]) {
        let mut values = self.values.lock();
        for write in writes {
            if let TagValue::Float(v) = write.value {
                values.insert(write.tag_id.to_string(), v);
            }
        }
    }
}

/// Driver adapter backed by the simulated plant
struct SimDriver {
    process: Arc<SimProcess>,
}

#[async_trait]
impl DriverAdapter for SimDriver {
    fn name(&self) -> &str {
        "sim"
    }

    async fn write(&self, writes: &[TagWrite]) -> Result<(), DriverFault> {
        self.process.apply_writes(writes);
        Ok(())
    }
}

fn demo_config() -> EngineConfig {
    let model = ModelEntry {
        gain: 1.0,
        time_constant_s: 5.0,
        horizon_s: 30.0,
        low_limit: 0.0,
        high_limit: 100.0,
    };
    EngineConfig {
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
                ki: 0.1,
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

/// Periodic driver scan feeding the bus.
fn spawn_scan(bus: Arc<TagBus>, process: Arc<SimProcess>) {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(Duration::from_millis(500));
        loop {
            tick.tick().await;
            for (tag, value) in process.step(&[("FIC101.PV", "FIC101.OUT")]) {
                let update = TagUpdate::new(tag.as_str(), TagValue::Float(value), TagQuality::Good);
                if let Err(e) = bus.ingest(update) {
                    warn!(error = %e, "scan ingest failed");
                }
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("starting vigil engine v{VIGIL_VERSION}");

    let config = match std::env::var("VIGIL_CONFIG_FILE") {
        Ok(_) => EngineConfig::load()?,
        Err(_) => demo_config(),
    };
    let engine = Engine::start(config).await?;

    let process = Arc::new(SimProcess::new(&[("FIC101.PV", 20.0), ("FIC101.OUT", 20.0)]));
    engine.bus().register_driver(Arc::new(SimDriver {
        process: Arc::clone(&process),
    }));
    spawn_scan(Arc::clone(engine.bus()), process);

    let supervisory = engine.supervisory();
    let mut status_tick = tokio::time::interval(Duration::from_secs(10));
    status_tick.tick().await;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                break;
            }
            _ = status_tick.tick() => {
                let status = supervisory.get_status();
                let metrics = supervisory.get_metrics();
                info!(
                    nodes = status.node_states.len(),
                    active_rounds = status.active_rounds.len(),
                    escalations = status.pending_escalations.len(),
                    updates = metrics.updates_ingested,
                    dispatched = metrics.commands_dispatched,
                    escalation_rate = metrics.escalation_rate,
                    "engine status"
                );
            }
        }
    }

    engine.shutdown().await?;
    Ok(())
}
