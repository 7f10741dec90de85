//! Log bus client.
//!
//! The engine only sees the [`LogConsumer`] and [`LogProducer`] traits;
//! offset management and group membership live in the bus gateway. The HTTP
//! client here is deliberately thin: poll a consumer group, commit an
//! offset, append a record.

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use caravel_core::entry::RawRecord;
use caravel_core::error::{ErrorOrigin, ReplicationError, Result};

/// Consumes records from the log bus on behalf of a consumer group.
#[async_trait]
pub trait LogConsumer: Send + Sync {
    /// Fetches the next batch of records; empty when the poll timed out.
    async fn poll(&self) -> Result<Vec<RawRecord>>;

    /// Marks everything up to and including `offset` as processed.
    async fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<()>;
}

/// Appends records to the log bus.
#[async_trait]
pub trait LogProducer: Send + Sync {
    /// Appends one record to a topic.
    async fn publish(&self, topic: &str, key: Option<&str>, value: Bytes) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct WireRecord {
    topic: String,
    partition: i32,
    offset: i64,
    key: Option<String>,
    value: String,
}

#[derive(Debug, Serialize)]
struct CommitBody<'a> {
    topic: &'a str,
    partition: i32,
    offset: i64,
}

#[derive(Debug, Serialize)]
struct ProduceBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<&'a str>,
    value: &'a str,
}

/// HTTP client for the log bus gateway.
#[derive(Debug, Clone)]
pub struct BusClient {
    http: reqwest::Client,
    endpoint: String,
    group: String,
    poll_timeout_ms: u64,
}

impl BusClient {
    /// Creates a client bound to a consumer group.
    #[must_use]
    pub fn new(endpoint: impl Into<String>, group: impl Into<String>, poll_timeout_ms: u64) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: endpoint.into(),
            group: group.into(),
            poll_timeout_ms,
        }
    }

    /// Verifies the bus gateway is reachable.
    pub async fn healthcheck(&self) -> Result<()> {
        let url = format!("{}/healthcheck", self.endpoint);
        let response = self.http.get(&url).send().await.map_err(connect_error)?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(ReplicationError::transient(
                ErrorOrigin::Local,
                format!("bus healthcheck returned {}", response.status()),
            ))
        }
    }
}

fn connect_error(err: reqwest::Error) -> ReplicationError {
    ReplicationError::transient(ErrorOrigin::Local, format!("bus unreachable: {err}"))
}

fn status_error(context: &str, status: reqwest::StatusCode) -> ReplicationError {
    if status.is_server_error() {
        ReplicationError::transient(ErrorOrigin::Local, format!("{context} returned {status}"))
    } else {
        ReplicationError::internal(ErrorOrigin::Local, format!("{context} returned {status}"))
    }
}

#[async_trait]
impl LogConsumer for BusClient {
    async fn poll(&self) -> Result<Vec<RawRecord>> {
        let url = format!("{}/v1/consumers/{}/records", self.endpoint, self.group);
        let response = self
            .http
            .get(&url)
            .query(&[("timeout_ms", self.poll_timeout_ms)])
            .send()
            .await
            .map_err(connect_error)?;

        if !response.status().is_success() {
            return Err(status_error("bus poll", response.status()));
        }

        let records: Vec<WireRecord> = response.json().await.map_err(|e| {
            ReplicationError::internal(ErrorOrigin::Local, format!("undecodable poll body: {e}"))
        })?;

        Ok(records
            .into_iter()
            .map(|r| RawRecord {
                topic: r.topic,
                partition: r.partition,
                offset: r.offset,
                key: r.key,
                value: Bytes::from(r.value),
            })
            .collect())
    }

    async fn commit(&self, topic: &str, partition: i32, offset: i64) -> Result<()> {
        let url = format!("{}/v1/consumers/{}/offsets", self.endpoint, self.group);
        let response = self
            .http
            .post(&url)
            .json(&CommitBody { topic, partition, offset })
            .send()
            .await
            .map_err(connect_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error("bus commit", response.status()))
        }
    }
}

#[async_trait]
impl LogProducer for BusClient {
    async fn publish(&self, topic: &str, key: Option<&str>, value: Bytes) -> Result<()> {
        let url = format!("{}/v1/topics/{}/records", self.endpoint, topic);
        let value = std::str::from_utf8(&value).map_err(|e| {
            ReplicationError::internal(ErrorOrigin::Local, format!("non-UTF-8 record value: {e}"))
        })?;

        let response = self
            .http
            .post(&url)
            .json(&ProduceBody { key, value })
            .send()
            .await
            .map_err(connect_error)?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_error("bus publish", response.status()))
        }
    }
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_json, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    #[tokio::test]
    async fn test_poll_decodes_records() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/consumers/crr/records"))
            .and(query_param("timeout_ms", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"topic": "replication", "partition": 0, "offset": 3, "key": "b/k",
                 "value": "{\"type\":\"del\",\"bucket\":\"b\",\"key\":\"k\"}"},
            ])))
            .mount(&server)
            .await;

        let client = BusClient::new(server.uri(), "crr", 100);
        let records = client.poll().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].topic, "replication");
        assert_eq!(records[0].offset, 3);
        assert_eq!(records[0].key.as_deref(), Some("b/k"));
    }

    #[tokio::test]
    async fn test_commit_posts_offset() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/consumers/crr/offsets"))
            .and(body_json(serde_json::json!({
                "topic": "replication", "partition": 1, "offset": 9,
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = BusClient::new(server.uri(), "crr", 100);
        client.commit("replication", 1, 9).await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_posts_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/topics/replication-status/records"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let client = BusClient::new(server.uri(), "crr", 100);
        client
            .publish("replication-status", Some("b/k"), Bytes::from_static(b"{}"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_server_errors_are_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/consumers/crr/records"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = BusClient::new(server.uri(), "crr", 100);
        let err = client.poll().await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_healthcheck() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/healthcheck"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = BusClient::new(server.uri(), "crr", 100);
        client.healthcheck().await.unwrap();

        let unreachable = BusClient::new("http://127.0.0.1:1", "crr", 100);
        assert!(unreachable.healthcheck().await.is_err());
    }
}
