//! Driver adapter seam
//!
//! Modbus, ControlLogix, MQTT, and SQL adapters live outside the core; this
//! trait is the contract they implement. Transient I/O retries are the
//! adapter's business; the core only observes the final outcome.

use async_trait::async_trait;
use thiserror::Error;
use vigil_common::TagWrite;

/// Failure reported by a driver adapter
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct DriverFault {
    pub reason: String,
}

impl DriverFault {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Outbound interface to a field device driver
#[async_trait]
pub trait DriverAdapter: Send + Sync {
    /// Route name referenced by tag configuration.
    fn name(&self) -> &str;

    /// Execute a batch of writes. Ack by returning `Ok`.
    async fn write(&self, writes: &[TagWrite]) -> Result<(), DriverFault>;
}
