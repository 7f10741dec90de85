//! Replication metadata carried on object entries.
//!
//! These types mirror the replication section of the serialized object
//! metadata: per-site status, the content categories to replicate, part
//! locations in the source data store, and the coarse destination backend
//! family that selects multipart constraints.

use serde::{Deserialize, Serialize};

/// Replication status of one site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum SiteStatus {
    /// Replication has not completed yet.
    #[default]
    Pending,
    /// The object was fully reproduced at the site.
    Completed,
    /// Replication terminally failed for the site.
    Failed,
}

impl SiteStatus {
    /// Returns true once the site holds the object.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns true while the site still needs work.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "PENDING"),
            Self::Completed => write!(f, "COMPLETED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

/// What an entry asks to be replicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContentCategory {
    /// Object metadata only.
    Metadata,
    /// Object data via single puts.
    Data,
    /// Object data via multipart upload.
    Mpu,
    /// Propagate the current tag set.
    PutTagging,
    /// Remove the tag set at the destination.
    DeleteTagging,
}

/// Coarse categorization of a destination backend.
///
/// Selects the multipart part-count cap and the upload-id format; everything
/// else on the wire is identical across families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendFamily {
    /// AWS-S3-like backends.
    #[default]
    Generic,
    /// Google Cloud Storage (composite-object limit of 1024 parts).
    Gcp,
    /// Azure Blob Storage (locally generated upload ids, block sub-parts).
    Azure,
}

impl BackendFamily {
    /// Derives the family from a storage-type string, defaulting to generic.
    #[must_use]
    pub fn from_storage_type(storage_type: Option<&str>) -> Self {
        match storage_type {
            Some("gcp") => Self::Gcp,
            Some("azure") => Self::Azure,
            _ => Self::Generic,
        }
    }
}

/// One element of an object's ordered part location list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartLocation {
    /// 1-based part number.
    pub part_number: u32,
    /// Size of the part in bytes.
    pub part_size: u64,
    /// ETag of the part as uploaded to the source.
    #[serde(rename = "partETag", skip_serializing_if = "Option::is_none")]
    pub part_etag: Option<String>,
    /// ETag of the part in the backing data store. Required for data
    /// replication; a missing value fails the task before any I/O.
    #[serde(rename = "dataStoreETag", skip_serializing_if = "Option::is_none")]
    pub data_store_etag: Option<String>,
    /// Name of the backing data store.
    pub data_store_name: String,
    /// Type of the backing data store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_store_type: Option<String>,
    /// Version of the part in the backing data store. Absent on the
    /// replication wire; the metadata mirror fills it in when it
    /// canonicalizes locations.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_store_version_id: Option<String>,
}

impl PartLocation {
    /// The backend version embedded in the data-store ETag.
    ///
    /// A data-store ETag is written as `version:etag`; the prefix
    /// identifies the backend generation the part was stored under.
    /// Returns `None` when the ETag is absent or carries no prefix.
    #[must_use]
    pub fn data_store_etag_version(&self) -> Option<&str> {
        self.data_store_etag
            .as_deref()
            .and_then(|etag| etag.split_once(':'))
            .map(|(version, _)| version)
    }
}

/// Replication state of one destination site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteInfo {
    /// Site name.
    pub site: String,
    /// Current status at this site.
    #[serde(default)]
    pub status: SiteStatus,
    /// Version id assigned by the destination backend, once known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_store_version_id: Option<String>,
}

impl SiteInfo {
    /// Creates a pending site.
    #[must_use]
    pub fn pending(site: impl Into<String>) -> Self {
        Self { site: site.into(), status: SiteStatus::Pending, data_store_version_id: None }
    }
}

/// The replication section of an object entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ReplicationInfo {
    /// Aggregate status across sites.
    pub status: SiteStatus,
    /// Per-site state.
    pub backends: Vec<SiteInfo>,
    /// Content categories to replicate for this entry.
    pub content: Vec<ContentCategory>,
    /// Destination bucket (ARN or name).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    /// Storage class at the destination (the site name on the wire).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_class: Option<String>,
    /// Storage type of the destination backend (`aws_s3`, `gcp`, `azure`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage_type: Option<String>,
    /// Whether the source bucket is NFS-mounted, in which case the source
    /// object may mutate while a transfer is in flight.
    pub is_nfs: bool,
    /// Role identity to assume against the source.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl ReplicationInfo {
    /// Looks up the state for a site.
    #[must_use]
    pub fn site(&self, site: &str) -> Option<&SiteInfo> {
        self.backends.iter().find(|b| b.site == site)
    }

    /// Current status for a site, `Pending` when the site is unknown.
    #[must_use]
    pub fn site_status(&self, site: &str) -> SiteStatus {
        self.site(site).map(|b| b.status).unwrap_or_default()
    }

    /// Sets the status for a site, inserting the site when absent, and
    /// refreshes the aggregate status.
    pub fn set_site_status(&mut self, site: &str, status: SiteStatus) {
        match self.backends.iter_mut().find(|b| b.site == site) {
            Some(info) => info.status = status,
            None => {
                let mut info = SiteInfo::pending(site);
                info.status = status;
                self.backends.push(info);
            }
        }
        self.refresh_status();
    }

    /// Records the destination version id for a site.
    pub fn set_site_version_id(&mut self, site: &str, version_id: impl Into<String>) {
        match self.backends.iter_mut().find(|b| b.site == site) {
            Some(info) => info.data_store_version_id = Some(version_id.into()),
            None => {
                let mut info = SiteInfo::pending(site);
                info.data_store_version_id = Some(version_id.into());
                self.backends.push(info);
            }
        }
    }

    /// Whether the entry carries the given content category.
    #[must_use]
    pub fn has_content(&self, category: ContentCategory) -> bool {
        self.content.contains(&category)
    }

    /// The destination backend family for this entry.
    #[must_use]
    pub fn backend_family(&self) -> BackendFamily {
        BackendFamily::from_storage_type(self.storage_type.as_deref())
    }

    fn refresh_status(&mut self) {
        if self.backends.is_empty() {
            return;
        }
        self.status = if self.backends.iter().any(|b| b.status == SiteStatus::Failed) {
            SiteStatus::Failed
        } else if self.backends.iter().all(|b| b.status == SiteStatus::Completed) {
            SiteStatus::Completed
        } else {
            SiteStatus::Pending
        };
    }
}

/// An inclusive byte range within the source object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ByteRange {
    /// First byte offset.
    pub start: u64,
    /// Last byte offset, inclusive.
    pub end: u64,
}

impl ByteRange {
    /// Creates a range covering `[start, end]`.
    #[must_use]
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    /// Number of bytes covered.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }

    /// Inclusive ranges are never empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Renders the range as an HTTP `Range` header value.
    #[must_use]
    pub fn to_header(&self) -> String {
        format!("bytes={}-{}", self.start, self.end)
    }
}

/// One successfully uploaded multipart part, as sent to complete-MPU.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CompletedPart {
    /// 1-based part number.
    pub part_number: u32,
    /// ETag returned by the destination for this part.
    #[serde(rename = "ETag")]
    pub etag: String,
    /// Azure block count backing this part.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub number_subparts: Option<u32>,
}

/// A run of adjacent part locations that share a backend identity, coalesced
/// into one ranged source read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReducedLocation {
    /// 1-based index of the reduced part.
    pub part_number: u32,
    /// Byte offset of the run within the object.
    pub offset: u64,
    /// Total size of the run in bytes.
    pub size: u64,
    /// Backing data store shared by the run.
    pub data_store_name: String,
    /// Backend version shared by the run, parsed from the data-store ETag
    /// prefix of its parts.
    pub data_store_version_id: Option<String>,
}

impl ReducedLocation {
    /// The source byte range covered by this run, `None` for a zero-length
    /// run.
    #[must_use]
    pub fn range(&self) -> Option<ByteRange> {
        if self.size == 0 {
            None
        } else {
            Some(ByteRange::new(self.offset, self.offset + self.size - 1))
        }
    }
}

/// Coalesces adjacent part locations that share a backend identity to
/// minimize the number of destination writes.
///
/// The identity is the data store name plus the backend version parsed
/// from the `version:etag` prefix of each part's data-store ETag; parts
/// stored under different backend generations never merge.
#[must_use]
pub fn reduce_locations(locations: &[PartLocation]) -> Vec<ReducedLocation> {
    let mut reduced: Vec<ReducedLocation> = Vec::new();
    let mut offset = 0u64;

    for loc in locations {
        let version = loc.data_store_etag_version();
        match reduced.last_mut() {
            Some(run)
                if run.data_store_name == loc.data_store_name
                    && run.data_store_version_id.as_deref() == version =>
            {
                run.size += loc.part_size;
            }
            _ => {
                reduced.push(ReducedLocation {
                    part_number: reduced.len() as u32 + 1,
                    offset,
                    size: loc.part_size,
                    data_store_name: loc.data_store_name.clone(),
                    data_store_version_id: version.map(String::from),
                });
            }
        }
        offset += loc.part_size;
    }

    reduced
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location(n: u32, size: u64, store: &str, version: &str) -> PartLocation {
        PartLocation {
            part_number: n,
            part_size: size,
            part_etag: Some(format!("etag-{n}")),
            data_store_etag: Some(format!("{version}:etag-{n}")),
            data_store_name: store.to_string(),
            data_store_type: None,
            data_store_version_id: None,
        }
    }

    #[test]
    fn test_site_status_wire_format() {
        assert_eq!(serde_json::to_string(&SiteStatus::Completed).unwrap(), "\"COMPLETED\"");
        let parsed: SiteStatus = serde_json::from_str("\"PENDING\"").unwrap();
        assert_eq!(parsed, SiteStatus::Pending);
    }

    #[test]
    fn test_content_category_wire_format() {
        assert_eq!(serde_json::to_string(&ContentCategory::PutTagging).unwrap(), "\"PUT_TAGGING\"");
        assert_eq!(serde_json::to_string(&ContentCategory::Mpu).unwrap(), "\"MPU\"");
    }

    #[test]
    fn test_backend_family_from_storage_type() {
        assert_eq!(BackendFamily::from_storage_type(Some("gcp")), BackendFamily::Gcp);
        assert_eq!(BackendFamily::from_storage_type(Some("azure")), BackendFamily::Azure);
        assert_eq!(BackendFamily::from_storage_type(Some("aws_s3")), BackendFamily::Generic);
        assert_eq!(BackendFamily::from_storage_type(None), BackendFamily::Generic);
    }

    #[test]
    fn test_set_site_status_refreshes_aggregate() {
        let mut info = ReplicationInfo {
            backends: vec![SiteInfo::pending("paris"), SiteInfo::pending("tokyo")],
            ..Default::default()
        };

        info.set_site_status("paris", SiteStatus::Completed);
        assert_eq!(info.status, SiteStatus::Pending);

        info.set_site_status("tokyo", SiteStatus::Completed);
        assert_eq!(info.status, SiteStatus::Completed);

        info.set_site_status("paris", SiteStatus::Failed);
        assert_eq!(info.status, SiteStatus::Failed);
    }

    #[test]
    fn test_set_site_version_id_inserts_unknown_site() {
        let mut info = ReplicationInfo::default();
        info.set_site_version_id("paris", "v123");
        assert_eq!(info.site("paris").unwrap().data_store_version_id.as_deref(), Some("v123"));
    }

    #[test]
    fn test_byte_range_header() {
        let range = ByteRange::new(0, 1023);
        assert_eq!(range.len(), 1024);
        assert_eq!(range.to_header(), "bytes=0-1023");
    }

    #[test]
    fn test_completed_part_wire_format() {
        let part = CompletedPart { part_number: 3, etag: "abc".to_string(), number_subparts: None };
        assert_eq!(serde_json::to_string(&part).unwrap(), r#"{"PartNumber":3,"ETag":"abc"}"#);

        let part =
            CompletedPart { part_number: 1, etag: "xyz".to_string(), number_subparts: Some(4) };
        assert_eq!(
            serde_json::to_string(&part).unwrap(),
            r#"{"PartNumber":1,"ETag":"xyz","NumberSubParts":4}"#
        );
    }

    #[test]
    fn test_data_store_etag_version() {
        let loc = location(1, 10, "store", "v1");
        assert_eq!(loc.data_store_etag_version(), Some("v1"));

        let mut bare = location(1, 10, "store", "v1");
        bare.data_store_etag = Some("plain-etag".to_string());
        assert_eq!(bare.data_store_etag_version(), None);

        bare.data_store_etag = None;
        assert_eq!(bare.data_store_etag_version(), None);
    }

    #[test]
    fn test_reduce_locations_coalesces_adjacent_runs() {
        let locations = vec![
            location(1, 100, "us-east-1", "v1"),
            location(2, 100, "us-east-1", "v1"),
            location(3, 50, "us-east-1", "v2"),
            location(4, 25, "us-east-1", "v1"),
        ];

        let reduced = reduce_locations(&locations);
        assert_eq!(reduced.len(), 3);

        assert_eq!(reduced[0].offset, 0);
        assert_eq!(reduced[0].size, 200);
        assert_eq!(reduced[0].range(), Some(ByteRange::new(0, 199)));
        assert_eq!(reduced[0].data_store_version_id.as_deref(), Some("v1"));

        // A different backend generation on the same store breaks the run.
        assert_eq!(reduced[1].offset, 200);
        assert_eq!(reduced[1].size, 50);
        assert_eq!(reduced[1].data_store_version_id.as_deref(), Some("v2"));

        assert_eq!(reduced[2].offset, 250);
        assert_eq!(reduced[2].size, 25);
        assert_eq!(reduced[2].part_number, 3);
    }

    #[test]
    fn test_reduce_locations_splits_across_stores() {
        let locations = vec![
            location(1, 10, "us-east-1", "v1"),
            location(2, 10, "us-west-2", "v1"),
        ];

        let reduced = reduce_locations(&locations);
        assert_eq!(reduced.len(), 2);
        assert_eq!(reduced[0].data_store_name, "us-east-1");
        assert_eq!(reduced[1].data_store_name, "us-west-2");
    }

    #[test]
    fn test_reduce_locations_unprefixed_etag() {
        let mut bare = location(2, 10, "us-east-1", "v1");
        bare.data_store_etag = Some("plain-etag".to_string());
        let locations = vec![location(1, 10, "us-east-1", "v1"), bare];

        // A part with no version prefix never merges into a versioned run.
        let reduced = reduce_locations(&locations);
        assert_eq!(reduced.len(), 2);
        assert!(reduced[1].data_store_version_id.is_none());
    }

    #[test]
    fn test_reduce_locations_empty() {
        assert!(reduce_locations(&[]).is_empty());
    }

    #[test]
    fn test_part_location_wire_names() {
        let loc = location(1, 10, "store", "v1");
        let json = serde_json::to_string(&loc).unwrap();
        assert!(json.contains("\"partETag\""));
        assert!(json.contains("\"dataStoreETag\""));
        assert!(json.contains("\"dataStoreName\""));

        let parsed: PartLocation = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, loc);
    }
}
