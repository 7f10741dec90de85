//! Gateways for Caravel cross-backend replication.
//!
//! This crate holds every network surface the replication engine touches:
//!
//! - **Source gateway**: replication policies, object metadata, ranged
//!   object data streams from the source object service
//! - **Destination gateway**: the cross-backend put surface (single puts,
//!   multipart uploads, deletes, tagging)
//! - **Log bus**: consumer/producer traits plus a thin HTTP client
//! - **Retry runner**: exponential backoff with jitter and a failover hook
//! - **Host failover**: immutable host list with an atomic cursor
//!
//! The engine never constructs an HTTP request itself; it calls these
//! clients through the retry runner.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod bus;
pub mod hosts;
pub mod retry;
pub mod source;
pub mod target;

pub use bus::{BusClient, LogConsumer, LogProducer};
pub use hosts::HostList;
pub use retry::{retry, RetryPolicy};
pub use source::{ObjectStream, SourceClient};
pub use target::{PutOptions, PutResult, TargetClient, TargetPool};
