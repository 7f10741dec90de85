//! The metadata mirror processor.
//!
//! A collaborator of the replication engine: it consumes the same log and
//! projects entries into a document store behind the [`MetadataStore`]
//! trait, preserving versioning semantics in the versioned key. Object
//! locations are rewritten to the mirror's canonical data store, and an
//! owner override can be applied from configuration.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use caravel_core::entry::{LogEntry, USERS_BUCKET};
use caravel_core::error::Result;

/// A versioning-unaware document store holding mirrored metadata.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Writes one metadata document.
    async fn put_object_no_ver(&self, bucket: &str, key: &str, value: Bytes) -> Result<()>;

    /// Removes one metadata document.
    async fn delete_object_no_ver(&self, bucket: &str, key: &str) -> Result<()>;
}

/// Mirror behavior knobs.
#[derive(Debug, Clone)]
pub struct MirrorOptions {
    /// Prefix applied to mirrored bucket names.
    pub prefix: String,
    /// Canonical data store name written onto mirrored locations.
    pub data_store_name: String,
    /// Canonical data store type written onto mirrored locations.
    pub data_store_type: Option<String>,
    /// Whether bucket and bucket-metadata entries are mirrored too.
    pub process_bucket_entries: bool,
    /// Owner id override, applied when set together with the display name.
    pub owner_id: Option<String>,
    /// Owner display name override.
    pub owner_display_name: Option<String>,
}

impl Default for MirrorOptions {
    fn default() -> Self {
        Self {
            prefix: "mirror".to_string(),
            data_store_name: "mirror".to_string(),
            data_store_type: None,
            process_bucket_entries: false,
            owner_id: None,
            owner_display_name: None,
        }
    }
}

/// Projects log entries into the metadata mirror.
pub struct MirrorProcessor {
    store: Arc<dyn MetadataStore>,
    options: MirrorOptions,
}

impl MirrorProcessor {
    /// Creates a processor writing through the given store.
    #[must_use]
    pub fn new(store: Arc<dyn MetadataStore>, options: MirrorOptions) -> Self {
        Self { store, options }
    }

    fn mirror_bucket(&self, bucket: &str) -> String {
        format!("{}-{}", self.options.prefix, bucket)
    }

    /// Applies one entry to the mirror.
    pub async fn process(&self, entry: &LogEntry) -> Result<()> {
        match entry {
            LogEntry::Object(object) => {
                let mut object = object.clone();
                let version_id = object.version_id.clone();
                object.rewrite_locations(
                    &self.options.data_store_name,
                    self.options.data_store_type.as_deref(),
                    version_id.as_deref(),
                );
                if let (Some(owner_id), Some(display_name)) =
                    (&self.options.owner_id, &self.options.owner_display_name)
                {
                    object.set_owner(owner_id.clone(), display_name.clone());
                }

                let bucket = self.mirror_bucket(&object.bucket);
                let value = Bytes::from(object.metadata_json()?);
                self.store.put_object_no_ver(&bucket, &object.envelope_key(), value).await
            }
            LogEntry::Delete(delete) => {
                let bucket = self.mirror_bucket(&delete.bucket);
                self.store.delete_object_no_ver(&bucket, &delete.versioned_key).await
            }
            LogEntry::Bucket(bucket) if self.options.process_bucket_entries => {
                let key = format!("{}-{}", self.options.prefix, bucket.key);
                self.store.put_object_no_ver(USERS_BUCKET, &key, Bytes::new()).await
            }
            LogEntry::BucketMd(md) if self.options.process_bucket_entries => {
                let name = format!("{}-{}", self.options.prefix, md.name);
                self.store
                    .put_object_no_ver(&name, &name, Bytes::from(md.value.clone()))
                    .await
            }
            other => {
                debug!(variant = other.variant_name(), "entry not mirrored");
                Ok(())
            }
        }
    }
}
