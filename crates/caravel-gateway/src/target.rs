//! Destination gateway.
//!
//! Client to the cross-backend put surface that fans object writes out to
//! heterogeneous backends. One `TargetClient` is bound to one destination
//! host; the pool binds a fresh client per retry attempt so host failover
//! (driven by the retry runner's hook) takes effect immediately.

use serde::Deserialize;
use std::collections::BTreeMap;

use caravel_core::error::{ErrorOrigin, ReplicationError, Result};
use caravel_core::replication::CompletedPart;

use crate::hosts::HostList;
use crate::source::ObjectStream;

/// Header carrying the destination storage class (the site name).
pub const STORAGE_CLASS_HEADER: &str = "x-caravel-storage-class";

/// Header carrying the destination storage type.
pub const STORAGE_TYPE_HEADER: &str = "x-caravel-storage-type";

/// Header carrying the object/part size in bytes.
pub const CONTENT_LENGTH_HEADER: &str = "x-caravel-content-length";

/// Destination parameters shared by write operations.
#[derive(Debug, Clone, Copy, Default)]
pub struct PutOptions<'a> {
    /// Storage class at the destination; the site name on the wire.
    pub storage_class: &'a str,
    /// Storage type of the destination backend.
    pub storage_type: Option<&'a str>,
    /// Source version id being replicated, when versioned.
    pub version_id: Option<&'a str>,
}

/// Result of a destination write.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutResult {
    /// Version id assigned by the destination backend.
    pub version_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitiateBody {
    upload_id: String,
}

/// Shared connection pool over the destination host list.
#[derive(Debug, Clone)]
pub struct TargetPool {
    http: reqwest::Client,
    hosts: HostList,
}

impl TargetPool {
    /// Creates a pool over the given hosts.
    #[must_use]
    pub fn new(hosts: Vec<String>) -> Self {
        Self { http: reqwest::Client::new(), hosts: HostList::new(hosts) }
    }

    /// Binds a client against the current host.
    #[must_use]
    pub fn bind(&self) -> TargetClient {
        TargetClient { http: self.http.clone(), base: self.hosts.current().to_string() }
    }

    /// Rotates to the next host; the following [`bind`](Self::bind) uses it.
    pub fn failover(&self) {
        let host = self.hosts.advance();
        tracing::debug!(host, "destination failover");
    }

    /// Number of configured hosts.
    #[must_use]
    pub fn host_count(&self) -> usize {
        self.hosts.len()
    }

    /// Verifies at least the current destination host is reachable.
    pub async fn healthcheck(&self) -> Result<()> {
        let client = self.bind();
        let url = format!("{}/healthcheck", client.base);
        let response = client.http.get(&url).send().await.map_err(send_error)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ReplicationError::transient(
                ErrorOrigin::Target,
                format!("destination healthcheck returned {}", response.status()),
            ))
        }
    }
}

/// Client bound to one destination host.
#[derive(Debug, Clone)]
pub struct TargetClient {
    http: reqwest::Client,
    base: String,
}

impl TargetClient {
    fn data_url(&self, bucket: &str, key: &str) -> String {
        format!("{}/_/backend/data/{bucket}/{key}", self.base)
    }

    /// Writes one object (or one reduced part of it) to the destination.
    ///
    /// `body = None` issues a metadata-only put: the destination records the
    /// object at `size` without data transfer.
    pub async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        opts: PutOptions<'_>,
        size: u64,
        body: Option<ObjectStream>,
    ) -> Result<PutResult> {
        let mut request = self
            .http
            .put(self.data_url(bucket, key))
            .query(&[("operation", "put")])
            .header(STORAGE_CLASS_HEADER, opts.storage_class)
            .header(CONTENT_LENGTH_HEADER, size);
        if let Some(storage_type) = opts.storage_type {
            request = request.header(STORAGE_TYPE_HEADER, storage_type);
        }
        if let Some(version) = opts.version_id {
            request = request.query(&[("versionId", version)]);
        }
        if let Some(body) = body {
            request = request.body(body.into_body());
        }

        decode_json(request.send().await.map_err(send_error)?, "put object").await
    }

    /// Starts a multipart upload at the destination.
    pub async fn initiate_mpu(
        &self,
        bucket: &str,
        key: &str,
        opts: PutOptions<'_>,
    ) -> Result<String> {
        let mut request = self
            .http
            .post(self.data_url(bucket, key))
            .query(&[("operation", "initiatempu")])
            .header(STORAGE_CLASS_HEADER, opts.storage_class);
        if let Some(storage_type) = opts.storage_type {
            request = request.header(STORAGE_TYPE_HEADER, storage_type);
        }
        if let Some(version) = opts.version_id {
            request = request.query(&[("versionId", version)]);
        }

        let body: InitiateBody =
            decode_json(request.send().await.map_err(send_error)?, "initiate MPU").await?;
        Ok(body.upload_id)
    }

    /// Uploads one part of a multipart upload.
    pub async fn put_mpu_part(
        &self,
        bucket: &str,
        key: &str,
        opts: PutOptions<'_>,
        upload_id: &str,
        part_number: u32,
        size: u64,
        body: ObjectStream,
    ) -> Result<CompletedPart> {
        let mut request = self
            .http
            .put(self.data_url(bucket, key))
            .query(&[("operation", "putpart"), ("uploadId", upload_id)])
            .query(&[("partNumber", part_number)])
            .header(STORAGE_CLASS_HEADER, opts.storage_class)
            .header(CONTENT_LENGTH_HEADER, size)
            .body(body.into_body());
        if let Some(storage_type) = opts.storage_type {
            request = request.header(STORAGE_TYPE_HEADER, storage_type);
        }

        decode_json(request.send().await.map_err(send_error)?, "put MPU part").await
    }

    /// Completes a multipart upload with the ordered part list.
    pub async fn complete_mpu(
        &self,
        bucket: &str,
        key: &str,
        opts: PutOptions<'_>,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<PutResult> {
        let mut request = self
            .http
            .post(self.data_url(bucket, key))
            .query(&[("operation", "completempu"), ("uploadId", upload_id)])
            .header(STORAGE_CLASS_HEADER, opts.storage_class)
            .json(parts);
        if let Some(storage_type) = opts.storage_type {
            request = request.header(STORAGE_TYPE_HEADER, storage_type);
        }
        if let Some(version) = opts.version_id {
            request = request.query(&[("versionId", version)]);
        }

        decode_json(request.send().await.map_err(send_error)?, "complete MPU").await
    }

    /// Aborts a multipart upload, releasing any stored parts.
    pub async fn abort_mpu(&self, bucket: &str, key: &str, upload_id: &str) -> Result<()> {
        let request = self
            .http
            .delete(self.data_url(bucket, key))
            .query(&[("operation", "abortmpu"), ("uploadId", upload_id)]);

        check_status(request.send().await.map_err(send_error)?, "abort MPU").await
    }

    /// Deletes an object (or writes a delete marker) at the destination.
    pub async fn delete_object(
        &self,
        bucket: &str,
        key: &str,
        opts: PutOptions<'_>,
    ) -> Result<()> {
        let mut request = self
            .http
            .delete(self.data_url(bucket, key))
            .query(&[("operation", "delete")])
            .header(STORAGE_CLASS_HEADER, opts.storage_class);
        if let Some(storage_type) = opts.storage_type {
            request = request.header(STORAGE_TYPE_HEADER, storage_type);
        }
        if let Some(version) = opts.version_id {
            request = request.query(&[("versionId", version)]);
        }

        check_status(request.send().await.map_err(send_error)?, "delete object").await
    }

    /// Replaces the tag set of a replicated object.
    pub async fn put_object_tagging(
        &self,
        bucket: &str,
        key: &str,
        opts: PutOptions<'_>,
        tags: &BTreeMap<String, String>,
        data_store_version_id: Option<&str>,
    ) -> Result<PutResult> {
        let mut request = self
            .http
            .put(self.data_url(bucket, key))
            .query(&[("operation", "puttagging")])
            .header(STORAGE_CLASS_HEADER, opts.storage_class)
            .json(tags);
        if let Some(version) = data_store_version_id {
            request = request.query(&[("dataStoreVersionId", version)]);
        }

        decode_json(request.send().await.map_err(send_error)?, "put tagging").await
    }

    /// Removes the tag set of a replicated object.
    pub async fn delete_object_tagging(
        &self,
        bucket: &str,
        key: &str,
        opts: PutOptions<'_>,
        data_store_version_id: Option<&str>,
    ) -> Result<PutResult> {
        let mut request = self
            .http
            .delete(self.data_url(bucket, key))
            .query(&[("operation", "deletetagging")])
            .header(STORAGE_CLASS_HEADER, opts.storage_class);
        if let Some(version) = data_store_version_id {
            request = request.query(&[("dataStoreVersionId", version)]);
        }

        decode_json(request.send().await.map_err(send_error)?, "delete tagging").await
    }
}

fn send_error(err: reqwest::Error) -> ReplicationError {
    ReplicationError::transient(ErrorOrigin::Target, format!("destination request: {err}"))
}

fn classify_status(status: reqwest::StatusCode, context: &str) -> ReplicationError {
    if status == reqwest::StatusCode::NOT_FOUND {
        ReplicationError::obj_not_found(ErrorOrigin::Target, format!("{context} returned 404"))
    } else if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        ReplicationError::transient(ErrorOrigin::Target, format!("{context} returned {status}"))
    } else {
        ReplicationError::permanent_target(format!("{context} returned {status}"))
    }
}

async fn check_status(response: reqwest::Response, context: &str) -> Result<()> {
    if response.status().is_success() {
        Ok(())
    } else {
        Err(classify_status(response.status(), context))
    }
}

async fn decode_json<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    context: &str,
) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        return Err(classify_status(status, context));
    }
    response.json().await.map_err(|e| {
        ReplicationError::internal(ErrorOrigin::Target, format!("undecodable {context}: {e}"))
    })
}
