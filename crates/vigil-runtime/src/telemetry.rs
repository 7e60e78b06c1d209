//! Engine metrics
//!
//! One prometheus registry owned by the engine; the supervisory facade
//! snapshots it into a plain struct for in-process callers.

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use serde::Serialize;
use std::sync::atomic::Ordering;
use vigil_bus::BusMetrics;
use vigil_common::VigilError;

/// Counters and histograms for the whole engine
pub struct EngineTelemetry {
    registry: Registry,
    pub proposals_submitted: IntCounter,
    pub proposals_gate_rejected: IntCounter,
    pub gate_escalations: IntCounter,
    pub rounds_approved: IntCounter,
    pub rounds_rejected: IntCounter,
    pub rounds_escalated: IntCounter,
    pub commands_dispatched: IntCounter,
    pub dispatch_failures: IntCounter,
    pub decision_latency: Histogram,
}

impl EngineTelemetry {
    pub fn new() -> Result<Self, VigilError> {
        let registry = Registry::new();

        let decision_latency = Histogram::with_opts(
            HistogramOpts::new(
                "vigil_decision_latency_seconds",
                "Time from round open to terminal outcome",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
        )
        .map_err(|e| VigilError::Internal(e.to_string()))?;
        registry
            .register(Box::new(decision_latency.clone()))
            .map_err(|e| VigilError::Internal(e.to_string()))?;

        Ok(Self {
            proposals_submitted: counter(
                &registry,
                "vigil_proposals_submitted_total",
                "Proposals admitted into consensus",
            )?,
            proposals_gate_rejected: counter(
                &registry,
                "vigil_proposals_gate_rejected_total",
                "Proposals rejected by the simulation gate",
            )?,
            gate_escalations: counter(
                &registry,
                "vigil_gate_escalations_total",
                "Resource sets escalated after repeated gate failures",
            )?,
            rounds_approved: counter(&registry, "vigil_rounds_approved_total", "Rounds ending Approved")?,
            rounds_rejected: counter(&registry, "vigil_rounds_rejected_total", "Rounds ending Rejected")?,
            rounds_escalated: counter(&registry, "vigil_rounds_escalated_total", "Rounds ending Escalated")?,
            commands_dispatched: counter(
                &registry,
                "vigil_commands_dispatched_total",
                "Approved commands delivered to drivers",
            )?,
            dispatch_failures: counter(
                &registry,
                "vigil_dispatch_failures_total",
                "Driver-reported command failures",
            )?,
            decision_latency,
            registry,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Plain-struct view for the supervisory surface. Ingest counters live on
    /// the bus and are folded in here.
    pub fn snapshot(&self, bus: &BusMetrics) -> MetricsSnapshot {
        let decided = self.rounds_approved.get()
            + self.rounds_rejected.get()
            + self.rounds_escalated.get();
        let escalation_rate = if decided > 0 {
            self.rounds_escalated.get() as f64 / decided as f64
        } else {
            0.0
        };
        let samples = self.decision_latency.get_sample_count();
        let avg_decision_latency_ms = if samples > 0 {
            self.decision_latency.get_sample_sum() / samples as f64 * 1000.0
        } else {
            0.0
        };
        MetricsSnapshot {
            updates_ingested: bus.updates_accepted.load(Ordering::Relaxed),
            updates_dropped: bus.updates_duplicate.load(Ordering::Relaxed)
                + bus.updates_stale.load(Ordering::Relaxed)
                + bus.updates_shed.load(Ordering::Relaxed),
            proposals_submitted: self.proposals_submitted.get(),
            proposals_gate_rejected: self.proposals_gate_rejected.get(),
            rounds_decided: decided,
            rounds_escalated: self.rounds_escalated.get(),
            escalation_rate,
            commands_dispatched: self.commands_dispatched.get(),
            dispatch_failures: self.dispatch_failures.get(),
            avg_decision_latency_ms,
        }
    }
}


fn counter(registry: &Registry, name: &str, help: &str) -> Result<IntCounter, VigilError> {
    let c = IntCounter::new(name, help).map_err(|e| VigilError::Internal(e.to_string()))?;
    registry
        .register(Box::new(c.clone()))
        .map_err(|e| VigilError::Internal(e.to_string()))?;
    Ok(c)
}

/// Point-in-time metrics view
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub updates_ingested: u64,
    pub updates_dropped: u64,
    pub proposals_submitted: u64,
    pub proposals_gate_rejected: u64,
    pub rounds_decided: u64,
    pub rounds_escalated: u64,
    pub escalation_rate: f64,
    pub commands_dispatched: u64,
    pub dispatch_failures: u64,
    pub avg_decision_latency_ms: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let t = EngineTelemetry::new().unwrap();
        let bus = BusMetrics::default();
        bus.updates_accepted.store(10, Ordering::Relaxed);
        bus.updates_stale.store(2, Ordering::Relaxed);
        t.rounds_approved.inc_by(3);
        t.rounds_escalated.inc();
        t.decision_latency.observe(0.2);

        let snap = t.snapshot(&bus);
        assert_eq!(snap.updates_ingested, 10);
        assert_eq!(snap.updates_dropped, 2);
        assert_eq!(snap.rounds_decided, 4);
        assert!((snap.escalation_rate - 0.25).abs() < 1e-9);
        assert!((snap.avg_decision_latency_ms - 200.0).abs() < 1e-6);
    }

    #[test]
    fn test_empty_snapshot_has_no_nans() {
        let t = EngineTelemetry::new().unwrap();
        let snap = t.snapshot(&BusMetrics::default());
        assert_eq!(snap.escalation_rate, 0.0);
        assert_eq!(snap.avg_decision_latency_ms, 0.0);
    }
}
