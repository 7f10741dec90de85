//! The log entry model.
//!
//! Parses one raw record from the log bus into a tagged entry variant and
//! exposes the accessors and the narrow set of mutators the replication task
//! and the metadata mirror need. Entries are immutable after parsing except
//! for derived per-site state.
//!
//! On the wire a record value is a UTF-8 JSON envelope
//! `{"type": "put"|"del", "bucket": ..., "key": ..., "value": ...}` whose
//! inner `value` is the serialized object metadata (itself a JSON document),
//! or null for bucket-level rows.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{ReplicationError, Result};
use crate::replication::{BackendFamily, PartLocation, ReplicationInfo};

/// The bucket holding per-account bucket listings in the metadata layout.
pub const USERS_BUCKET: &str = "users..bucket";

/// The bucket holding bucket metadata documents in the metadata layout.
pub const METASTORE_BUCKET: &str = "__metastore";

/// Separator between an object key and its version id in a versioned key.
pub const VERSION_SEPARATOR: char = '\u{0}';

/// One record as delivered by the log bus.
#[derive(Debug, Clone)]
pub struct RawRecord {
    /// Topic the record was read from.
    pub topic: String,
    /// Partition within the topic.
    pub partition: i32,
    /// Offset within the partition.
    pub offset: i64,
    /// Record key, when present.
    pub key: Option<String>,
    /// Record value (UTF-8 JSON).
    pub value: Bytes,
}

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    bucket: String,
    key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
}

/// A parsed log entry.
#[derive(Debug, Clone, PartialEq)]
pub enum LogEntry {
    /// An object put: full object metadata, possibly a delete marker.
    Object(ObjectEntry),
    /// An object deletion keyed by versioned key.
    Delete(DeleteEntry),
    /// An out-of-band action request (for example `copyData`).
    Action(ActionEntry),
    /// A bucket-listing row (mirror processor only).
    Bucket(BucketEntry),
    /// A bucket metadata document (mirror processor only).
    BucketMd(BucketMdEntry),
}

impl LogEntry {
    /// Parses a raw bus record into a typed entry.
    ///
    /// # Errors
    ///
    /// Returns a `MalformedEntry` error when the value cannot be decoded or
    /// required fields are absent.
    pub fn parse(record: &RawRecord) -> Result<Self> {
        let envelope: Envelope = serde_json::from_slice(&record.value)
            .map_err(|e| ReplicationError::malformed(format!("undecodable record value: {e}")))?;

        match envelope.kind.as_str() {
            "del" => Ok(Self::Delete(DeleteEntry {
                bucket: envelope.bucket,
                versioned_key: envelope.key,
            })),
            "put" => Self::parse_put(envelope),
            other => {
                Err(ReplicationError::malformed(format!("unknown record type {other:?}")))
            }
        }
    }

    fn parse_put(envelope: Envelope) -> Result<Self> {
        if envelope.bucket == USERS_BUCKET {
            return Ok(Self::Bucket(BucketEntry { key: envelope.key }));
        }
        if envelope.bucket == METASTORE_BUCKET {
            let value = envelope.value.ok_or_else(|| {
                ReplicationError::malformed("bucket metadata entry with no value")
            })?;
            return Ok(Self::BucketMd(BucketMdEntry { name: envelope.key, value }));
        }

        let raw = envelope
            .value
            .ok_or_else(|| ReplicationError::malformed("object entry with no value"))?;
        let inner: serde_json::Value = serde_json::from_str(&raw)
            .map_err(|e| ReplicationError::malformed(format!("undecodable metadata: {e}")))?;

        if inner.get("actionType").is_some() {
            let action: ActionEntry = serde_json::from_value(inner)
                .map_err(|e| ReplicationError::malformed(format!("undecodable action: {e}")))?;
            return Ok(Self::Action(action));
        }

        let mut object: ObjectEntry = serde_json::from_value(inner)
            .map_err(|e| ReplicationError::malformed(format!("undecodable object entry: {e}")))?;
        object.bucket = envelope.bucket;
        object.key = match envelope.key.split_once(VERSION_SEPARATOR) {
            Some((key, _version)) => key.to_string(),
            None => envelope.key,
        };
        Ok(Self::Object(object))
    }

    /// Serializes the entry back into a record value.
    ///
    /// Parsing the result yields an equal entry.
    pub fn serialize(&self) -> Result<Bytes> {
        let envelope = match self {
            Self::Object(obj) => Envelope {
                kind: "put".to_string(),
                bucket: obj.bucket.clone(),
                key: obj.envelope_key(),
                value: Some(obj.metadata_json()?),
            },
            Self::Delete(del) => Envelope {
                kind: "del".to_string(),
                bucket: del.bucket.clone(),
                key: del.versioned_key.clone(),
                value: None,
            },
            Self::Action(action) => Envelope {
                kind: "put".to_string(),
                bucket: String::new(),
                key: String::new(),
                value: Some(serde_json::to_string(action)?),
            },
            Self::Bucket(bucket) => Envelope {
                kind: "put".to_string(),
                bucket: USERS_BUCKET.to_string(),
                key: bucket.key.clone(),
                value: None,
            },
            Self::BucketMd(md) => Envelope {
                kind: "put".to_string(),
                bucket: METASTORE_BUCKET.to_string(),
                key: md.name.clone(),
                value: Some(md.value.clone()),
            },
        };
        let json = serde_json::to_vec(&envelope)
            .map_err(|e| ReplicationError::internal(Default::default(), e.to_string()))?;
        Ok(Bytes::from(json))
    }

    /// A short label for logging.
    #[must_use]
    pub fn variant_name(&self) -> &'static str {
        match self {
            Self::Object(_) => "object",
            Self::Delete(_) => "delete",
            Self::Action(_) => "action",
            Self::Bucket(_) => "bucket",
            Self::BucketMd(_) => "bucket-md",
        }
    }
}

/// Full object metadata for a put entry.
///
/// `contentLength`, `contentMD5`, and `ownerId` are required on the wire;
/// their absence makes the record malformed. Collections default to empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectEntry {
    /// Source bucket (from the envelope, not the metadata document).
    #[serde(skip)]
    pub bucket: String,
    /// Object key (from the envelope, version suffix stripped).
    #[serde(skip)]
    pub key: String,
    /// Version id, when the source bucket is versioned.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    /// Object size in bytes.
    pub content_length: u64,
    /// MD5 of the object content; compared to detect source mutation.
    #[serde(rename = "contentMD5")]
    pub content_md5: String,
    /// Content type, when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Cache control, when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<String>,
    /// Content disposition, when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_disposition: Option<String>,
    /// Content encoding, when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_encoding: Option<String>,
    /// Canonical id of the object owner.
    pub owner_id: String,
    /// Display name of the object owner.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_display_name: Option<String>,
    /// User metadata key-value pairs.
    #[serde(default)]
    pub user_metadata: BTreeMap<String, String>,
    /// Object tags.
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    /// Ordered part locations in the source data store.
    #[serde(default)]
    pub location: Vec<PartLocation>,
    /// Whether this entry is a delete marker.
    #[serde(default)]
    pub is_delete_marker: bool,
    /// Replication state and targets.
    #[serde(rename = "replicationInfo", default)]
    pub replication: ReplicationInfo,
}

impl ObjectEntry {
    /// The key as it appears in the log envelope: versioned when a version
    /// id is present.
    #[must_use]
    pub fn envelope_key(&self) -> String {
        match &self.version_id {
            Some(version) => format!("{}{}{}", self.key, VERSION_SEPARATOR, version),
            None => self.key.clone(),
        }
    }

    /// Whether the source bucket is NFS-mounted.
    #[must_use]
    pub fn is_nfs(&self) -> bool {
        self.replication.is_nfs
    }

    /// The destination backend family for this entry.
    #[must_use]
    pub fn backend_family(&self) -> BackendFamily {
        self.replication.backend_family()
    }

    /// Whether another metadata snapshot describes the same content.
    ///
    /// Used for NFS source-state re-checks during a transfer.
    #[must_use]
    pub fn same_content(&self, other: &ObjectEntry) -> bool {
        self.content_md5 == other.content_md5 && self.content_length == other.content_length
    }

    /// Records the destination version id for a site.
    pub fn set_site_version_id(&mut self, site: &str, version_id: impl Into<String>) {
        self.replication.set_site_version_id(site, version_id);
    }

    /// Replaces the owner identity.
    pub fn set_owner(&mut self, owner_id: impl Into<String>, display_name: impl Into<String>) {
        self.owner_id = owner_id.into();
        self.owner_display_name = Some(display_name.into());
    }

    /// Rewrites every part location to the given data store identity.
    ///
    /// Used by the metadata mirror to normalize locations to its canonical
    /// data store; when `version_id` is present it is recorded on each part.
    pub fn rewrite_locations(
        &mut self,
        data_store_name: &str,
        data_store_type: Option<&str>,
        version_id: Option<&str>,
    ) {
        for part in &mut self.location {
            part.data_store_name = data_store_name.to_string();
            part.data_store_type = data_store_type.map(String::from);
            if let Some(version) = version_id {
                part.data_store_version_id = Some(version.to_string());
            }
        }
    }

    /// Serializes the metadata document (the envelope's inner `value`).
    pub fn metadata_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| ReplicationError::internal(Default::default(), e.to_string()))
    }
}

/// An object deletion entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteEntry {
    /// Source bucket.
    pub bucket: String,
    /// Object key with the version suffix, when versioned.
    pub versioned_key: String,
}

impl DeleteEntry {
    /// The object key without the version suffix.
    #[must_use]
    pub fn key(&self) -> &str {
        match self.versioned_key.split_once(VERSION_SEPARATOR) {
            Some((key, _)) => key,
            None => &self.versioned_key,
        }
    }

    /// The version id embedded in the versioned key, when present.
    #[must_use]
    pub fn version_id(&self) -> Option<&str> {
        self.versioned_key.split_once(VERSION_SEPARATOR).map(|(_, version)| version)
    }
}

/// An out-of-band action request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionEntry {
    /// Action name, for example `copyData`.
    pub action_type: String,
    /// Action parameters, opaque to the entry model.
    #[serde(default)]
    pub parameters: serde_json::Value,
}

/// A bucket-listing row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketEntry {
    /// Row key (the bucket identifier).
    pub key: String,
}

/// A bucket metadata document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketMdEntry {
    /// Bucket name.
    pub name: String,
    /// Serialized bucket metadata.
    pub value: String,
}
