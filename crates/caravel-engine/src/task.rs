//! The replication task.
//!
//! One task owns one object entry end-to-end: policy check, source metadata
//! fetch, dispatch to the matching transfer path (delete marker, multipart,
//! tagging, or ranged single puts), and outcome publication. The task is a
//! linear state machine; every gateway call runs through the retry runner,
//! and a target-side retry advances the destination host picker before the
//! next attempt binds a fresh client.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use caravel_core::entry::ObjectEntry;
use caravel_core::error::{ErrorOrigin, ReplicationError, Result};
use caravel_core::replication::{
    reduce_locations, BackendFamily, ByteRange, CompletedPart, ContentCategory, ReducedLocation,
    SiteStatus,
};
use caravel_gateway::retry::{retry, RetryPolicy};
use caravel_gateway::source::{ObjectStream, SourceClient};
use caravel_gateway::target::{PutOptions, TargetPool};

use crate::planner;
use crate::publisher::StatusPublisher;
use crate::session::{self, UploadSession};

/// Maximum parallel part transfers per task.
pub const PART_CONCURRENCY: usize = 10;

/// Shared dependencies of replication tasks on one worker.
pub struct TaskContext {
    /// Source object service client.
    pub source: SourceClient,
    /// Destination host pool.
    pub targets: TargetPool,
    /// Status and metrics publication.
    pub publisher: StatusPublisher,
    /// Retry bounds for every gateway call.
    pub retry: RetryPolicy,
    /// The replication site this worker serves.
    pub site: String,
    /// Storage type of the site, used when the entry does not carry one.
    pub storage_type: Option<String>,
}

/// How a settled task affects the consumer offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TaskOutcome {
    /// Whether the entry's offset may advance. False when the outcome
    /// publication could not be enqueued (the entry must be redelivered).
    pub committable: bool,
}

/// Replicates one object entry to one site.
pub struct ReplicationTask {
    ctx: Arc<TaskContext>,
    cancel: CancellationToken,
}

impl ReplicationTask {
    /// Creates a task bound to the worker's context and shutdown token.
    #[must_use]
    pub fn new(ctx: Arc<TaskContext>, cancel: CancellationToken) -> Self {
        Self { ctx, cancel }
    }

    /// Runs the entry to completion and publishes the outcome.
    pub async fn run(&self, mut entry: ObjectEntry) -> TaskOutcome {
        match self.replicate(&mut entry).await {
            Ok(()) => {
                entry.replication.set_site_status(&self.ctx.site, SiteStatus::Completed);
                info!(
                    bucket = %entry.bucket,
                    key = %entry.key,
                    site = %self.ctx.site,
                    "replication completed"
                );
                self.publish_outcome(&entry).await
            }
            Err(err) => {
                if self.cancel.is_cancelled() {
                    warn!(
                        bucket = %entry.bucket,
                        key = %entry.key,
                        "task cancelled; entry will be redelivered"
                    );
                    return TaskOutcome { committable: false };
                }
                if err.publishes_failure() {
                    warn!(
                        bucket = %entry.bucket,
                        key = %entry.key,
                        site = %self.ctx.site,
                        error = %err,
                        "replication failed"
                    );
                    self.ctx.publisher.failed(&entry, 1, entry.content_length).await;
                    entry.replication.set_site_status(&self.ctx.site, SiteStatus::Failed);
                    self.publish_outcome(&entry).await
                } else {
                    debug!(
                        bucket = %entry.bucket,
                        key = %entry.key,
                        error = %err,
                        "skipping entry"
                    );
                    TaskOutcome { committable: true }
                }
            }
        }
    }

    async fn publish_outcome(&self, entry: &ObjectEntry) -> TaskOutcome {
        match self.ctx.publisher.publish_status(entry).await {
            Ok(()) => TaskOutcome { committable: true },
            Err(err) => {
                warn!(
                    bucket = %entry.bucket,
                    key = %entry.key,
                    error = %err,
                    "status publication failed; offset held back"
                );
                TaskOutcome { committable: false }
            }
        }
    }

    async fn replicate(&self, entry: &mut ObjectEntry) -> Result<()> {
        let policy = retry(
            "fetch replication policy",
            &self.ctx.retry,
            || self.ctx.source.get_replication_policy(&entry.bucket),
            |_| {},
        )
        .await?;
        if policy.find_rule(&entry.key).is_none() {
            return Err(ReplicationError::invalid_object_state(format!(
                "no enabled replication rule matches {}",
                entry.key
            )));
        }

        let current = match retry(
            "fetch source metadata",
            &self.ctx.retry,
            || self.ctx.source.head_metadata(&entry.bucket, &entry.key, entry.version_id.as_deref()),
            |_| {},
        )
        .await
        {
            Ok(current) => Some(current),
            Err(err) if err.is_obj_not_found() => {
                if entry.is_delete_marker {
                    // Delete markers for non-versioned objects have no
                    // underlying object; the delete still replicates.
                    None
                } else if entry.is_nfs() {
                    return Err(ReplicationError::invalid_object_state(
                        "source object missing under NFS",
                    ));
                } else {
                    return Err(err);
                }
            }
            Err(err) => return Err(err),
        };

        if entry.is_delete_marker {
            return self.put_delete_marker(entry).await;
        }
        if entry.replication.site_status(&self.ctx.site).is_completed()
            && entry.replication.has_content(ContentCategory::Data)
        {
            return Err(ReplicationError::invalid_object_state("site already completed"));
        }

        let version_id = if entry.replication.has_content(ContentCategory::Mpu) {
            self.replicate_mpu(entry, current.as_ref()).await?
        } else if entry.replication.has_content(ContentCategory::PutTagging) {
            self.put_tagging(entry).await?
        } else if entry.replication.has_content(ContentCategory::DeleteTagging) {
            self.delete_tagging(entry).await?
        } else {
            self.replicate_data(entry).await?
        };

        if let Some(version_id) = version_id {
            entry.replication.set_site_version_id(&self.ctx.site, version_id);
        }
        Ok(())
    }

    fn put_options<'a>(&'a self, entry: &'a ObjectEntry) -> PutOptions<'a> {
        PutOptions {
            storage_class: &self.ctx.site,
            storage_type: entry
                .replication
                .storage_type
                .as_deref()
                .or(self.ctx.storage_type.as_deref()),
            version_id: entry.version_id.as_deref(),
        }
    }

    fn failover_hook(&self) -> impl FnMut(&ReplicationError) + '_ {
        |err| {
            if err.origin == ErrorOrigin::Target {
                self.ctx.targets.failover();
            }
        }
    }

    /// Reproduces a delete marker at the destination.
    async fn put_delete_marker(&self, entry: &ObjectEntry) -> Result<()> {
        let opts = self.put_options(entry);
        let targets = &self.ctx.targets;

        let result = retry(
            "replicate delete marker",
            &self.ctx.retry,
            || {
                let client = targets.bind();
                async move { client.delete_object(&entry.bucket, &entry.key, opts).await }
            },
            self.failover_hook(),
        )
        .await;

        match result {
            Ok(()) => Ok(()),
            Err(err) if err.is_obj_not_found() => {
                // Nothing to delete at the destination.
                debug!(bucket = %entry.bucket, key = %entry.key, "delete marker had no replica");
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Reproduces the object through a multipart upload.
    async fn replicate_mpu(
        &self,
        entry: &ObjectEntry,
        current: Option<&ObjectEntry>,
    ) -> Result<Option<String>> {
        let family = entry.backend_family();
        if entry.is_nfs() {
            if let Some(current) = current {
                if !entry.same_content(current) {
                    return Err(ReplicationError::invalid_object_state(
                        "source object changed before transfer",
                    ));
                }
            }
        }

        let opts = self.put_options(entry);
        let targets = &self.ctx.targets;

        let upload_id = if family == BackendFamily::Azure {
            session::local_upload_id()
        } else {
            retry(
                "initiate MPU",
                &self.ctx.retry,
                || {
                    let client = targets.bind();
                    async move { client.initiate_mpu(&entry.bucket, &entry.key, opts).await }
                },
                self.failover_hook(),
            )
            .await?
        };
        let mut upload = UploadSession::new(upload_id.clone(), family);

        self.ctx.publisher.queued(entry, 1, entry.content_length).await;

        let ranges = planner::plan(entry.content_length, family);
        let transfer = stream::iter(
            ranges
                .into_iter()
                .enumerate()
                .map(|(index, range)| self.transfer_part(entry, &upload_id, index as u32 + 1, range)),
        )
        .buffer_unordered(PART_CONCURRENCY)
        .try_collect::<Vec<CompletedPart>>();

        let parts = tokio::select! {
            () = self.cancel.cancelled() => {
                self.abort_upload(entry, &upload_id).await;
                return Err(ReplicationError::internal(ErrorOrigin::Local, "task cancelled"));
            }
            parts = transfer => match parts {
                Ok(parts) => parts,
                Err(err) => {
                    self.abort_upload(entry, &upload_id).await;
                    return Err(err);
                }
            },
        };
        upload.record_parts(parts);
        let parts = upload.into_ordered_parts();

        let completed = retry(
            "complete MPU",
            &self.ctx.retry,
            || {
                let client = targets.bind();
                let parts = &parts;
                let upload_id = upload_id.as_str();
                async move {
                    client.complete_mpu(&entry.bucket, &entry.key, opts, upload_id, parts).await
                }
            },
            self.failover_hook(),
        )
        .await;

        match completed {
            Ok(result) => Ok(result.version_id),
            Err(err) => {
                self.abort_upload(entry, &upload_id).await;
                Err(err)
            }
        }
    }

    /// Streams one planned range from the source into one MPU part.
    async fn transfer_part(
        &self,
        entry: &ObjectEntry,
        upload_id: &str,
        part_number: u32,
        range: Option<ByteRange>,
    ) -> Result<CompletedPart> {
        let size = range.map_or(0, |r| r.len());
        let opts = self.put_options(entry);
        let source = &self.ctx.source;
        let targets = &self.ctx.targets;

        let part = retry(
            "replicate MPU part",
            &self.ctx.retry,
            || {
                let client = targets.bind();
                async move {
                    let body = match range {
                        Some(range) => {
                            source
                                .get_object(
                                    &entry.bucket,
                                    &entry.key,
                                    entry.version_id.as_deref(),
                                    Some(range),
                                    None,
                                )
                                .await?
                        }
                        None => ObjectStream::empty(),
                    };
                    client
                        .put_mpu_part(
                            &entry.bucket,
                            &entry.key,
                            opts,
                            upload_id,
                            part_number,
                            size,
                            body,
                        )
                        .await
                }
            },
            self.failover_hook(),
        )
        .await?;

        self.ctx.publisher.completed(entry, 1, size).await;

        if entry.is_nfs() {
            self.check_source_state(entry).await?;
        }
        Ok(part)
    }

    /// Verifies an NFS source still holds the content the entry describes.
    async fn check_source_state(&self, entry: &ObjectEntry) -> Result<()> {
        let current = retry(
            "re-check source state",
            &self.ctx.retry,
            || self.ctx.source.head_metadata(&entry.bucket, &entry.key, entry.version_id.as_deref()),
            |_| {},
        )
        .await;

        match current {
            Ok(current) if entry.same_content(&current) => Ok(()),
            Ok(_) => Err(ReplicationError::invalid_object_state(
                "source object changed during transfer",
            )),
            Err(err) if err.is_obj_not_found() => Err(ReplicationError::invalid_object_state(
                "source object removed during transfer",
            )),
            Err(err) => Err(err),
        }
    }

    /// Best-effort abort of an open multipart upload.
    async fn abort_upload(&self, entry: &ObjectEntry, upload_id: &str) {
        let targets = &self.ctx.targets;
        let result = retry(
            "abort MPU",
            &self.ctx.retry,
            || {
                let client = targets.bind();
                async move { client.abort_mpu(&entry.bucket, &entry.key, upload_id).await }
            },
            self.failover_hook(),
        )
        .await;

        if let Err(err) = result {
            warn!(
                bucket = %entry.bucket,
                key = %entry.key,
                upload_id,
                error = %err,
                "failed to abort multipart upload"
            );
        }
    }

    /// Reproduces the object through ranged single puts.
    async fn replicate_data(&self, entry: &ObjectEntry) -> Result<Option<String>> {
        if entry.location.iter().any(|p| p.data_store_etag.is_none()) {
            return Err(ReplicationError::internal(
                ErrorOrigin::Local,
                "part location missing data-store ETag",
            ));
        }

        let opts = self.put_options(entry);
        let targets = &self.ctx.targets;

        self.ctx.publisher.queued(entry, 1, entry.content_length).await;

        if entry.location.is_empty() {
            // Metadata-only entry: record the object at its size with no
            // data transfer.
            let result = retry(
                "replicate object metadata",
                &self.ctx.retry,
                || {
                    let client = targets.bind();
                    async move {
                        client
                            .put_object(&entry.bucket, &entry.key, opts, entry.content_length, None)
                            .await
                    }
                },
                self.failover_hook(),
            )
            .await?;
            self.ctx.publisher.completed(entry, 1, entry.content_length).await;
            return Ok(result.version_id);
        }

        let reduced = reduce_locations(&entry.location);
        let transfer = stream::iter(reduced.into_iter().map(|location| async move {
            let result = self.transfer_location(entry, &location).await?;
            Ok::<_, ReplicationError>((location.part_number, result))
        }))
        .buffer_unordered(PART_CONCURRENCY)
        .try_collect::<Vec<_>>();

        let results = tokio::select! {
            () = self.cancel.cancelled() => {
                return Err(ReplicationError::internal(ErrorOrigin::Local, "task cancelled"));
            }
            results = transfer => results?,
        };

        // The destination's version id comes from the final part.
        let version_id =
            results.into_iter().max_by_key(|(number, _)| *number).and_then(|(_, v)| v);
        Ok(version_id)
    }

    /// Streams one reduced location from the source into one put.
    async fn transfer_location(
        &self,
        entry: &ObjectEntry,
        location: &ReducedLocation,
    ) -> Result<Option<String>> {
        let range = location.range();
        let size = location.size;
        let opts = self.put_options(entry);
        let source = &self.ctx.source;
        let targets = &self.ctx.targets;

        let result = retry(
            "replicate object data",
            &self.ctx.retry,
            || {
                let client = targets.bind();
                async move {
                    let body = match range {
                        Some(range) => {
                            source
                                .get_object(
                                    &entry.bucket,
                                    &entry.key,
                                    entry.version_id.as_deref(),
                                    Some(range),
                                    None,
                                )
                                .await?
                        }
                        None => ObjectStream::empty(),
                    };
                    client.put_object(&entry.bucket, &entry.key, opts, size, Some(body)).await
                }
            },
            self.failover_hook(),
        )
        .await?;

        self.ctx.publisher.completed(entry, 1, size).await;
        Ok(result.version_id)
    }

    /// Propagates the entry's tag set to the destination.
    async fn put_tagging(&self, entry: &ObjectEntry) -> Result<Option<String>> {
        let opts = self.put_options(entry);
        let targets = &self.ctx.targets;
        let data_store_version =
            entry.replication.site(&self.ctx.site).and_then(|s| s.data_store_version_id.clone());

        let result = retry(
            "replicate tag set",
            &self.ctx.retry,
            || {
                let client = targets.bind();
                let version = data_store_version.as_deref();
                async move {
                    client
                        .put_object_tagging(&entry.bucket, &entry.key, opts, &entry.tags, version)
                        .await
                }
            },
            self.failover_hook(),
        )
        .await?;
        Ok(result.version_id)
    }

    /// Removes the tag set at the destination.
    async fn delete_tagging(&self, entry: &ObjectEntry) -> Result<Option<String>> {
        let opts = self.put_options(entry);
        let targets = &self.ctx.targets;
        let data_store_version =
            entry.replication.site(&self.ctx.site).and_then(|s| s.data_store_version_id.clone());

        let result = retry(
            "remove replicated tag set",
            &self.ctx.retry,
            || {
                let client = targets.bind();
                let version = data_store_version.as_deref();
                async move {
                    client
                        .delete_object_tagging(&entry.bucket, &entry.key, opts, version)
                        .await
                }
            },
            self.failover_hook(),
        )
        .await?;
        Ok(result.version_id)
    }
}
