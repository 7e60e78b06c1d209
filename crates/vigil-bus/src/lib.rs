//! # Vigil Bus
//!
//! The single ingress/egress point for process data. Driver adapters push tag
//! updates in; the bus de-duplicates them, drops out-of-order readings, bumps
//! the tag version, and routes each update to the owning node's bounded inbox.
//! Approved commands flow the other way, out to the responsible driver.
//!
//! Backpressure favors freshness over completeness: a full inbox first
//! coalesces per tag (latest value wins), then sheds its oldest entry. The bus
//! never blocks a producer.

pub mod bus;
pub mod driver;
pub mod inbox;
pub mod registry;

pub use bus::{BusConfig, BusMetrics, IngestOutcome, TagBus};
pub use driver::{DriverAdapter, DriverFault};
pub use inbox::{NodeInbox, PushOutcome};
pub use registry::{TagRegistry, TagSpec};

/// Default bound on each node's inbound queue.
pub const DEFAULT_INBOX_CAPACITY: usize = 256;

/// Default de-duplication window for `(tag, timestamp)` pairs.
pub const DEFAULT_DEDUP_WINDOW_MS: i64 = 60_000;
