//! The Caravel replication engine.
//!
//! This crate turns parsed log entries into reproduced objects at a
//! destination site:
//!
//! - **Range planner**: part sizing and tiling per destination family
//! - **Replication task**: the per-entry state machine (policy check, source
//!   metadata, multipart or ranged transfer, tagging, delete markers,
//!   outcome publication)
//! - **Status publisher**: site status records and metrics events back onto
//!   the log bus
//! - **Worker harness**: bounded-concurrency consumer binding with a
//!   contiguous-prefix offset ledger
//! - **Metadata mirror**: the collaborator that projects the same log into
//!   a document store
//!
//! ```text
//! log bus ──► Worker ──► ReplicationTask ──► source/destination gateways
//!                │              │
//!                │              └──► StatusPublisher ──► log bus
//!                └──► OffsetLedger (contiguous-prefix commits)
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod mirror;
pub mod planner;
pub mod publisher;
pub mod session;
pub mod task;
pub mod worker;

pub use mirror::{MetadataStore, MirrorOptions, MirrorProcessor};
pub use planner::{part_size, plan, BASE_PART_SIZE, GCP_MAX_PART_COUNT, MAX_PART_COUNT};
pub use publisher::{init_metrics, InFlightGuard, MetricKind, MetricsRecord, StatusPublisher};
pub use session::{local_upload_id, UploadSession};
pub use task::{ReplicationTask, TaskContext, TaskOutcome, PART_CONCURRENCY};
pub use worker::{OffsetLedger, Worker};
