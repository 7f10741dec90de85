//! Source gateway.
//!
//! Read-only client to the source object service: bucket replication
//! policies, object metadata, and ranged object data streams. Every error
//! carries `origin = Source` so the task's outcome handling can tell the two
//! sides of a transfer apart.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt, TryStreamExt};
use serde::Deserialize;

use caravel_core::entry::ObjectEntry;
use caravel_core::error::{ErrorOrigin, ReplicationError, Result};
use caravel_core::policy::ReplicationPolicy;
use caravel_core::replication::ByteRange;

#[derive(Debug, Deserialize)]
struct ErrorBody {
    code: String,
    #[serde(default)]
    message: Option<String>,
}

/// A streaming object body.
///
/// Errors can surface on the initial request or on any chunk of the body;
/// this wrapper funnels both through one channel and guarantees at most one
/// terminal error: after an `Err` is yielded the stream ends.
pub struct ObjectStream {
    inner: BoxStream<'static, Result<Bytes>>,
    failed: bool,
}

impl std::fmt::Debug for ObjectStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStream").field("failed", &self.failed).finish()
    }
}

impl ObjectStream {
    fn from_response(response: reqwest::Response) -> Self {
        let inner = response
            .bytes_stream()
            .map_err(|e| {
                ReplicationError::transient(ErrorOrigin::Source, format!("body stream: {e}"))
            })
            .boxed();
        Self { inner, failed: false }
    }

    /// Wraps an arbitrary chunk stream. Used by tests and by callers that
    /// synthesize bodies.
    #[must_use]
    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes>> + Send + 'static,
    {
        Self { inner: stream.boxed(), failed: false }
    }

    /// An empty body (zero-length part uploads).
    #[must_use]
    pub fn empty() -> Self {
        Self::from_stream(futures::stream::empty())
    }

    /// Converts the stream into an HTTP request body.
    #[must_use]
    pub fn into_body(self) -> reqwest::Body {
        reqwest::Body::wrap_stream(self)
    }

    /// Drains the stream into one buffer. Test helper.
    pub async fn collect(mut self) -> Result<Bytes> {
        let mut buf = Vec::new();
        while let Some(chunk) = self.next().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(Bytes::from(buf))
    }
}

impl Stream for ObjectStream {
    type Item = Result<Bytes>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.failed {
            return Poll::Ready(None);
        }
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Err(err))) => {
                this.failed = true;
                Poll::Ready(Some(Err(err)))
            }
            other => other,
        }
    }
}

/// Client to the source object service.
#[derive(Debug, Clone)]
pub struct SourceClient {
    http: reqwest::Client,
    endpoint: String,
}

impl SourceClient {
    /// Creates a client for the given endpoint.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self { http: reqwest::Client::new(), endpoint: endpoint.into() }
    }

    /// Verifies the source service is reachable.
    pub async fn healthcheck(&self) -> Result<()> {
        let url = format!("{}/healthcheck", self.endpoint);
        let response = self.http.get(&url).send().await.map_err(send_error)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ReplicationError::transient(
                ErrorOrigin::Source,
                format!("source healthcheck returned {}", response.status()),
            ))
        }
    }

    /// Fetches the replication policy of a bucket.
    pub async fn get_replication_policy(&self, bucket: &str) -> Result<ReplicationPolicy> {
        let url = format!("{}/_/replication/policy/{bucket}", self.endpoint);
        let response = self.http.get(&url).send().await.map_err(send_error)?;
        let status = response.status();

        if status.is_success() {
            return response.json().await.map_err(|e| {
                ReplicationError::internal(ErrorOrigin::Source, format!("undecodable policy: {e}"))
            });
        }

        if status.is_server_error() {
            return Err(ReplicationError::transient(
                ErrorOrigin::Source,
                format!("policy fetch returned {status}"),
            ));
        }

        // 4xx: NoSuchEntity, AccessDenied, BadRole and friends.
        let code = error_code(response).await.unwrap_or_else(|| status.to_string());
        Err(ReplicationError::permanent_source(format!("policy fetch failed: {code}")))
    }

    /// Fetches the current metadata of an object version.
    pub async fn head_metadata(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<ObjectEntry> {
        let url = format!("{}/_/replication/metadata/{bucket}/{key}", self.endpoint);
        let mut request = self.http.get(&url);
        if let Some(version) = version_id {
            request = request.query(&[("versionId", version)]);
        }

        let response = request.send().await.map_err(send_error)?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ReplicationError::obj_not_found(
                ErrorOrigin::Source,
                format!("{bucket}/{key} not found"),
            ));
        }
        if status.is_server_error() {
            return Err(ReplicationError::transient(
                ErrorOrigin::Source,
                format!("metadata fetch returned {status}"),
            ));
        }
        if !status.is_success() {
            let code = error_code(response).await.unwrap_or_else(|| status.to_string());
            return Err(ReplicationError::permanent_source(format!(
                "metadata fetch failed: {code}"
            )));
        }

        let body = response.bytes().await.map_err(|e| {
            ReplicationError::transient(ErrorOrigin::Source, format!("metadata body: {e}"))
        })?;
        let mut entry: ObjectEntry = serde_json::from_slice(&body).map_err(|e| {
            ReplicationError::internal(ErrorOrigin::Source, format!("undecodable metadata: {e}"))
        })?;
        entry.bucket = bucket.to_string();
        entry.key = key.to_string();
        Ok(entry)
    }

    /// Opens a (possibly ranged) read of an object version.
    pub async fn get_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
        range: Option<ByteRange>,
        part_number: Option<u32>,
    ) -> Result<ObjectStream> {
        let url = format!("{}/_/replication/data/{bucket}/{key}", self.endpoint);
        let mut request = self.http.get(&url);
        if let Some(version) = version_id {
            request = request.query(&[("versionId", version)]);
        }
        if let Some(part) = part_number {
            request = request.query(&[("partNumber", part)]);
        }
        if let Some(range) = range {
            request = request.header(reqwest::header::RANGE, range.to_header());
        }

        let response = request.send().await.map_err(send_error)?;
        let status = response.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ReplicationError::obj_not_found(
                ErrorOrigin::Source,
                format!("{bucket}/{key} not found"),
            ));
        }
        if status.is_server_error() {
            return Err(ReplicationError::transient(
                ErrorOrigin::Source,
                format!("object read returned {status}"),
            ));
        }
        if !status.is_success() {
            let code = error_code(response).await.unwrap_or_else(|| status.to_string());
            return Err(ReplicationError::permanent_source(format!("object read failed: {code}")));
        }

        Ok(ObjectStream::from_response(response))
    }
}

fn send_error(err: reqwest::Error) -> ReplicationError {
    ReplicationError::transient(ErrorOrigin::Source, format!("source request: {err}"))
}

async fn error_code(response: reqwest::Response) -> Option<String> {
    let body: ErrorBody = response.json().await.ok()?;
    match body.message {
        Some(message) => Some(format!("{}: {message}", body.code)),
        None => Some(body.code),
    }
}
