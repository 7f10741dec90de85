//! Status publication and metrics events.
//!
//! The publisher writes two kinds of records back onto the log bus: the
//! updated entry carrying the new site status, and metrics events at the
//! transfer boundary points (`queued` when a transfer starts, `completed`
//! per finished part or put, `failed` on terminal failure). Metrics
//! publication is best-effort: a failure is logged and never fails the task.
//!
//! Process-local counters and gauges go through the `metrics` facade in
//! parallel, for scrape-based monitoring of the worker itself.

use std::sync::Arc;

use bytes::Bytes;
use chrono::Utc;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use serde::{Deserialize, Serialize};
use tracing::warn;

use caravel_core::entry::{LogEntry, ObjectEntry};
use caravel_core::error::Result;
use caravel_gateway::bus::LogProducer;

/// Pipeline extension emitting the metrics (cross-region replication).
pub const METRICS_EXTENSION: &str = "crr";

/// Initialize metric descriptions (call once at startup).
pub fn init_metrics() {
    describe_counter!("caravel_entries_total", "Entries settled, labeled by outcome");
    describe_counter!("caravel_bytes_total", "Bytes transferred, labeled by outcome");
    describe_gauge!("caravel_tasks_in_flight", "Replication tasks currently running");
}

/// Kind of a metrics event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// A transfer was queued (MPU initiated or ranged transfer started).
    Queued,
    /// A part or single put finished.
    Completed,
    /// The task failed terminally.
    Failed,
}

impl MetricKind {
    fn label(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// One metrics event as published to the metrics topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsRecord {
    /// Event time, epoch milliseconds.
    pub timestamp: i64,
    /// Number of operations the event covers.
    pub ops: u64,
    /// Number of bytes the event covers.
    pub bytes: u64,
    /// Pipeline extension (`crr` or `ingestion`).
    pub extension: String,
    /// Event kind.
    #[serde(rename = "type")]
    pub kind: MetricKind,
    /// Replication site.
    pub site: String,
    /// Source bucket.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bucket_name: Option<String>,
    /// Source object key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub object_key: Option<String>,
    /// Source version id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
}

/// Publishes site status and metrics events for one site.
#[derive(Clone)]
pub struct StatusPublisher {
    producer: Arc<dyn LogProducer>,
    status_topic: String,
    metrics_topic: String,
    site: String,
}

impl StatusPublisher {
    /// Creates a publisher for a site.
    #[must_use]
    pub fn new(
        producer: Arc<dyn LogProducer>,
        status_topic: impl Into<String>,
        metrics_topic: impl Into<String>,
        site: impl Into<String>,
    ) -> Self {
        Self {
            producer,
            status_topic: status_topic.into(),
            metrics_topic: metrics_topic.into(),
            site: site.into(),
        }
    }

    /// The site this publisher reports for.
    #[must_use]
    pub fn site(&self) -> &str {
        &self.site
    }

    /// Publishes the updated entry (carrying its new site status) back onto
    /// the log bus.
    ///
    /// # Errors
    ///
    /// Returns an error when the record cannot be enqueued; the caller must
    /// then keep the entry's offset uncommitted.
    pub async fn publish_status(&self, entry: &ObjectEntry) -> Result<()> {
        let value = LogEntry::Object(entry.clone()).serialize()?;
        let key = format!("{}/{}", entry.bucket, entry.envelope_key());
        self.producer.publish(&self.status_topic, Some(&key), value).await
    }

    /// Emits a `queued` event when a transfer starts.
    pub async fn queued(&self, entry: &ObjectEntry, ops: u64, bytes: u64) {
        self.emit(entry, MetricKind::Queued, ops, bytes).await;
    }

    /// Emits a `completed` event for a finished part or put.
    pub async fn completed(&self, entry: &ObjectEntry, ops: u64, bytes: u64) {
        self.emit(entry, MetricKind::Completed, ops, bytes).await;
    }

    /// Emits a `failed` event for a terminal failure.
    pub async fn failed(&self, entry: &ObjectEntry, ops: u64, bytes: u64) {
        self.emit(entry, MetricKind::Failed, ops, bytes).await;
    }

    async fn emit(&self, entry: &ObjectEntry, kind: MetricKind, ops: u64, bytes: u64) {
        counter!("caravel_entries_total", "outcome" => kind.label()).increment(ops);
        counter!("caravel_bytes_total", "outcome" => kind.label()).increment(bytes);

        let record = MetricsRecord {
            timestamp: Utc::now().timestamp_millis(),
            ops,
            bytes,
            extension: METRICS_EXTENSION.to_string(),
            kind,
            site: self.site.clone(),
            bucket_name: Some(entry.bucket.clone()),
            object_key: Some(entry.key.clone()),
            version_id: entry.version_id.clone(),
        };

        let value = match serde_json::to_vec(&record) {
            Ok(value) => Bytes::from(value),
            Err(err) => {
                warn!(error = %err, "failed to serialize metrics record");
                return;
            }
        };

        if let Err(err) = self.producer.publish(&self.metrics_topic, None, value).await {
            warn!(
                error = %err,
                site = %self.site,
                kind = kind.label(),
                "failed to publish metrics record"
            );
        }
    }
}

/// Tracks the in-flight task gauge; decrements on drop so the gauge returns
/// to zero however a task settles.
pub struct InFlightGuard;

impl InFlightGuard {
    /// Registers one in-flight task.
    #[must_use]
    pub fn enter() -> Self {
        gauge!("caravel_tasks_in_flight").increment(1.0);
        Self
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!("caravel_tasks_in_flight").decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use caravel_core::entry::RawRecord;
    use caravel_core::error::{ErrorOrigin, ReplicationError};
    use caravel_core::replication::SiteStatus;

    use super::*;

    /// In-memory producer capturing published records.
    #[derive(Default)]
    struct MemProducer {
        records: Mutex<Vec<(String, Option<String>, Bytes)>>,
        fail: Mutex<bool>,
    }

    impl MemProducer {
        async fn records(&self) -> Vec<(String, Option<String>, Bytes)> {
            self.records.lock().await.clone()
        }
    }

    #[async_trait]
    impl LogProducer for MemProducer {
        async fn publish(&self, topic: &str, key: Option<&str>, value: Bytes) -> Result<()> {
            if *self.fail.lock().await {
                return Err(ReplicationError::transient(ErrorOrigin::Local, "bus down"));
            }
            self.records.lock().await.push((
                topic.to_string(),
                key.map(String::from),
                value,
            ));
            Ok(())
        }
    }

    fn entry() -> ObjectEntry {
        ObjectEntry {
            bucket: "photos".to_string(),
            key: "cats/1.jpg".to_string(),
            version_id: Some("v1".to_string()),
            content_length: 1024,
            content_md5: "md5".to_string(),
            owner_id: "owner".to_string(),
            ..Default::default()
        }
    }

    fn publisher(producer: Arc<MemProducer>) -> StatusPublisher {
        StatusPublisher::new(producer, "replication-status", "metrics", "paris")
    }

    #[tokio::test]
    async fn test_publish_status_round_trips() {
        let producer = Arc::new(MemProducer::default());
        let publisher = publisher(producer.clone());

        let mut object = entry();
        object.replication.set_site_status("paris", SiteStatus::Completed);
        publisher.publish_status(&object).await.unwrap();

        let records = producer.records().await;
        assert_eq!(records.len(), 1);
        let (topic, key, value) = &records[0];
        assert_eq!(topic, "replication-status");
        assert!(key.as_deref().unwrap().starts_with("photos/cats/1.jpg"));

        let parsed = LogEntry::parse(&RawRecord {
            topic: topic.clone(),
            partition: 0,
            offset: 0,
            key: key.clone(),
            value: value.clone(),
        })
        .unwrap();
        match parsed {
            LogEntry::Object(obj) => {
                assert_eq!(obj.replication.site_status("paris"), SiteStatus::Completed);
            }
            other => panic!("expected object entry, got {}", other.variant_name()),
        }
    }

    #[tokio::test]
    async fn test_metrics_record_shape() {
        let producer = Arc::new(MemProducer::default());
        let publisher = publisher(producer.clone());

        publisher.queued(&entry(), 1, 1024).await;
        publisher.completed(&entry(), 1, 1024).await;
        publisher.failed(&entry(), 1, 1024).await;

        let records = producer.records().await;
        assert_eq!(records.len(), 3);

        let queued: MetricsRecord = serde_json::from_slice(&records[0].2).unwrap();
        assert_eq!(queued.kind, MetricKind::Queued);
        assert_eq!(queued.bytes, 1024);
        assert_eq!(queued.ops, 1);
        assert_eq!(queued.extension, "crr");
        assert_eq!(queued.site, "paris");
        assert_eq!(queued.bucket_name.as_deref(), Some("photos"));
        assert_eq!(queued.object_key.as_deref(), Some("cats/1.jpg"));
        assert_eq!(queued.version_id.as_deref(), Some("v1"));
        assert!(queued.timestamp > 0);

        let json = String::from_utf8(records[2].2.to_vec()).unwrap();
        assert!(json.contains("\"type\":\"failed\""));
    }

    #[tokio::test]
    async fn test_metrics_failures_are_swallowed() {
        let producer = Arc::new(MemProducer::default());
        *producer.fail.lock().await = true;
        let publisher = publisher(producer.clone());

        // Best-effort: no error escapes.
        publisher.queued(&entry(), 1, 10).await;

        // The status publication does surface the failure.
        assert!(publisher.publish_status(&entry()).await.is_err());
    }
}
