pub mod access;
pub mod allocation;
pub mod config;
pub mod error;
pub mod job;
pub mod nodelist;
pub mod shell;
pub mod telemetry;

pub use access::{AccessEntry, LitellmParams};
pub use allocation::{allocate, NodeAllocation, Slot};
pub use config::{ClusterConfig, DEFAULT_ACCELERATORS_PER_NODE};
pub use error::{FleetError, Result};
pub use job::{JobRequest, LoraAdapter};
