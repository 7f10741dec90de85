//! The worker harness.
//!
//! Binds a log-bus consumer to the replication task with a bounded number of
//! in-flight entries. Entries from one partition are delivered in log order
//! but processed concurrently; the offset ledger therefore only commits the
//! contiguous prefix of settled entries, and an entry whose outcome is not
//! committable holds the partition's offset in place until redelivery.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use caravel_core::entry::{LogEntry, RawRecord};
use caravel_gateway::bus::LogConsumer;

use crate::publisher::InFlightGuard;
use crate::task::{ReplicationTask, TaskContext};

const POLL_RETRY_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SettleState {
    /// The entry is still being processed.
    Pending,
    /// The entry settled and its offset may advance.
    Committable,
    /// The entry settled but must be redelivered; the offset stays put.
    Blocked,
}

/// Tracks per-partition offsets and commits only the contiguous prefix of
/// committable entries.
pub struct OffsetLedger {
    consumer: Arc<dyn LogConsumer>,
    partitions: Mutex<HashMap<(String, i32), BTreeMap<i64, SettleState>>>,
}

impl OffsetLedger {
    /// Creates a ledger committing through the given consumer.
    #[must_use]
    pub fn new(consumer: Arc<dyn LogConsumer>) -> Self {
        Self { consumer, partitions: Mutex::new(HashMap::new()) }
    }

    /// Registers a delivered record as in-flight.
    pub async fn track(&self, record: &RawRecord) {
        let mut partitions = self.partitions.lock().await;
        partitions
            .entry((record.topic.clone(), record.partition))
            .or_default()
            .insert(record.offset, SettleState::Pending);
    }

    /// Marks a record as settled and commits any newly contiguous prefix.
    pub async fn settle(&self, topic: &str, partition: i32, offset: i64, committable: bool) {
        let commit_up_to = {
            let mut partitions = self.partitions.lock().await;
            let Some(offsets) = partitions.get_mut(&(topic.to_string(), partition)) else {
                return;
            };
            if let Some(state) = offsets.get_mut(&offset) {
                *state =
                    if committable { SettleState::Committable } else { SettleState::Blocked };
            }

            let mut commit_up_to = None;
            while let Some((&first, &state)) = offsets.iter().next() {
                if state != SettleState::Committable {
                    break;
                }
                offsets.remove(&first);
                commit_up_to = Some(first);
            }
            commit_up_to
        };

        if let Some(offset) = commit_up_to {
            if let Err(err) = self.consumer.commit(topic, partition, offset).await {
                warn!(topic, partition, offset, error = %err, "offset commit failed");
            }
        }
    }
}

/// A replication worker: one consumer binding with a bounded task pool.
pub struct Worker {
    consumer: Arc<dyn LogConsumer>,
    ctx: Arc<TaskContext>,
    concurrency: usize,
    cancel: CancellationToken,
}

impl Worker {
    /// Creates a worker.
    #[must_use]
    pub fn new(
        consumer: Arc<dyn LogConsumer>,
        ctx: Arc<TaskContext>,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self { consumer, ctx, concurrency, cancel }
    }

    /// Consumes entries until shutdown, then drains in-flight tasks.
    pub async fn run(&self) {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let ledger = Arc::new(OffsetLedger::new(self.consumer.clone()));
        info!(
            concurrency = self.concurrency,
            site = %self.ctx.site,
            "replication worker started"
        );

        loop {
            let polled = tokio::select! {
                () = self.cancel.cancelled() => break,
                polled = self.consumer.poll() => polled,
            };

            let records = match polled {
                Ok(records) => records,
                Err(err) => {
                    warn!(error = %err, "bus poll failed");
                    tokio::time::sleep(POLL_RETRY_DELAY).await;
                    continue;
                }
            };

            for record in records {
                let permit = match semaphore.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                ledger.track(&record).await;
                self.dispatch(record, permit, ledger.clone()).await;
            }
        }

        // Drain: every permit returns once in-flight tasks settle.
        let _ = semaphore.acquire_many(self.concurrency as u32).await;
        info!("replication worker stopped");
    }

    async fn dispatch(
        &self,
        record: RawRecord,
        permit: OwnedSemaphorePermit,
        ledger: Arc<OffsetLedger>,
    ) {
        match LogEntry::parse(&record) {
            Err(err) => {
                warn!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %err,
                    "dropping malformed record"
                );
                ledger.settle(&record.topic, record.partition, record.offset, true).await;
                drop(permit);
            }
            Ok(LogEntry::Object(entry)) => {
                let task = ReplicationTask::new(self.ctx.clone(), self.cancel.clone());
                tokio::spawn(async move {
                    let _guard = InFlightGuard::enter();
                    let outcome = task.run(entry).await;
                    ledger
                        .settle(&record.topic, record.partition, record.offset, outcome.committable)
                        .await;
                    drop(permit);
                });
            }
            Ok(other) => {
                // Delete, action, and bucket entries belong to other
                // consumers of the same log.
                debug!(
                    variant = other.variant_name(),
                    offset = record.offset,
                    "entry not handled by the replication worker"
                );
                ledger.settle(&record.topic, record.partition, record.offset, true).await;
                drop(permit);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;

    use caravel_core::error::Result;
    use caravel_gateway::retry::RetryPolicy;
    use caravel_gateway::source::SourceClient;
    use caravel_gateway::target::TargetPool;

    use crate::publisher::StatusPublisher;

    use super::*;

    /// In-memory consumer: a fixed set of batches, then empty polls.
    struct MemConsumer {
        batches: Mutex<Vec<Vec<RawRecord>>>,
        commits: Mutex<Vec<(String, i32, i64)>>,
    }

    impl MemConsumer {
        fn new(batches: Vec<Vec<RawRecord>>) -> Self {
            Self { batches: Mutex::new(batches), commits: Mutex::new(Vec::new()) }
        }

        async fn commits(&self) -> Vec<(String, i32, i64)> {
            self.commits.lock().await.clone()
        }
    }

    #[async_trait]
    impl LogConsumer for MemConsumer {
        async fn poll(&self) -> Result<Vec<RawRecord>> {
            let mut batches = self.batches.lock().await;
            if batches.is_empty() {
                drop(batches);
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok(Vec::new())
            } else {
                Ok(batches.remove(0))
            }
        }

        async fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
            self.commits.lock().await.push((topic.to_string(), partition, offset));
            Ok(())
        }
    }

    fn record(offset: i64, value: &str) -> RawRecord {
        RawRecord {
            topic: "replication".to_string(),
            partition: 0,
            offset,
            key: None,
            value: Bytes::from(value.to_string()),
        }
    }

    fn context() -> Arc<TaskContext> {
        struct NullProducer;

        #[async_trait]
        impl caravel_gateway::bus::LogProducer for NullProducer {
            async fn publish(&self, _: &str, _: Option<&str>, _: Bytes) -> Result<()> {
                Ok(())
            }
        }

        Arc::new(TaskContext {
            source: SourceClient::new("http://127.0.0.1:1"),
            targets: TargetPool::new(vec!["http://127.0.0.1:1".to_string()]),
            publisher: StatusPublisher::new(Arc::new(NullProducer), "status", "metrics", "paris"),
            retry: RetryPolicy::fast(0),
            site: "paris".to_string(),
            storage_type: None,
        })
    }

    #[tokio::test]
    async fn test_ledger_commits_contiguous_prefix() {
        let consumer = Arc::new(MemConsumer::new(Vec::new()));
        let ledger = OffsetLedger::new(consumer.clone());

        for offset in 0..3 {
            ledger.track(&record(offset, "")).await;
        }

        // Offset 2 settles first: nothing commits yet.
        ledger.settle("replication", 0, 2, true).await;
        assert!(consumer.commits().await.is_empty());

        // Offset 0 settles: only [0] is contiguous.
        ledger.settle("replication", 0, 0, true).await;
        assert_eq!(consumer.commits().await, vec![("replication".to_string(), 0, 0)]);

        // Offset 1 settles: the prefix now reaches 2.
        ledger.settle("replication", 0, 1, true).await;
        assert_eq!(
            consumer.commits().await.last().unwrap(),
            &("replication".to_string(), 0, 2)
        );
    }

    #[tokio::test]
    async fn test_ledger_blocks_on_non_committable_entry() {
        let consumer = Arc::new(MemConsumer::new(Vec::new()));
        let ledger = OffsetLedger::new(consumer.clone());

        for offset in 0..3 {
            ledger.track(&record(offset, "")).await;
        }

        ledger.settle("replication", 0, 0, true).await;
        ledger.settle("replication", 0, 1, false).await;
        ledger.settle("replication", 0, 2, true).await;

        // The offset never advances past the blocked entry.
        assert_eq!(consumer.commits().await, vec![("replication".to_string(), 0, 0)]);
    }

    #[tokio::test]
    async fn test_ledger_tracks_partitions_independently() {
        let consumer = Arc::new(MemConsumer::new(Vec::new()));
        let ledger = OffsetLedger::new(consumer.clone());

        let mut in_p1 = record(7, "");
        in_p1.partition = 1;
        ledger.track(&record(4, "")).await;
        ledger.track(&in_p1).await;

        ledger.settle("replication", 1, 7, true).await;
        assert_eq!(consumer.commits().await, vec![("replication".to_string(), 1, 7)]);
    }

    #[tokio::test]
    async fn test_worker_settles_malformed_and_foreign_entries() {
        let records = vec![vec![
            record(0, "not json"),
            record(1, r#"{"type":"del","bucket":"b","key":"k"}"#),
            record(2, r#"{"type":"put","bucket":"users..bucket","key":"acct..b"}"#),
        ]];
        let consumer = Arc::new(MemConsumer::new(records));
        let cancel = CancellationToken::new();
        let worker = Worker::new(consumer.clone(), context(), 2, cancel.clone());

        let handle = tokio::spawn(async move { worker.run().await });

        // Malformed and non-object entries settle committable in order.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let commits = consumer.commits().await;
            if commits.last() == Some(&("replication".to_string(), 0, 2)) {
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "commits: {commits:?}");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        cancel.cancel();
        handle.await.unwrap();
    }
}
