//! Core types for Caravel cross-backend replication.
//!
//! This crate provides the building blocks shared by every Caravel
//! component:
//!
//! - The log entry model: raw bus records parsed into tagged entry variants
//! - Replication metadata: per-site status, content categories, part
//!   locations, destination backend families
//! - Bucket replication policies
//! - The typed replication error (kind, origin, retryability)
//! - Worker configuration

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod entry;
pub mod error;
pub mod policy;
pub mod replication;

pub use config::{Config, LogFormat, RetryConfig};
pub use entry::{
    ActionEntry, BucketEntry, BucketMdEntry, DeleteEntry, LogEntry, ObjectEntry, RawRecord,
    METASTORE_BUCKET, USERS_BUCKET, VERSION_SEPARATOR,
};
pub use error::{ErrorKind, ErrorOrigin, ReplicationError, Result};
pub use policy::{PolicyRule, ReplicationPolicy, RuleStatus};
pub use replication::{
    reduce_locations, BackendFamily, ByteRange, CompletedPart, ContentCategory, PartLocation,
    ReducedLocation, ReplicationInfo, SiteInfo, SiteStatus,
};
