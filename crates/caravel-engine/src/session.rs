//! Multipart upload sessions.
//!
//! A session is transient per-entry state: created when the task initiates a
//! multipart upload, destroyed on complete or abort. For the Azure family
//! the upload id never reaches the backend's MPU API, so it is generated
//! locally.

use caravel_core::replication::{BackendFamily, CompletedPart};
use uuid::Uuid;

/// Generates a local upload id: hex, no separators.
#[must_use]
pub fn local_upload_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Transient state of one multipart upload.
#[derive(Debug)]
pub struct UploadSession {
    /// Upload id at the destination (locally generated for Azure).
    pub upload_id: String,
    /// Destination backend family.
    pub family: BackendFamily,
    parts: Vec<CompletedPart>,
}

impl UploadSession {
    /// Creates a session around a destination-issued upload id.
    #[must_use]
    pub fn new(upload_id: impl Into<String>, family: BackendFamily) -> Self {
        Self { upload_id: upload_id.into(), family, parts: Vec::new() }
    }

    /// Creates a session with a locally generated upload id (Azure).
    #[must_use]
    pub fn local(family: BackendFamily) -> Self {
        Self::new(local_upload_id(), family)
    }

    /// Records a successfully uploaded part.
    pub fn record_part(&mut self, part: CompletedPart) {
        self.parts.push(part);
    }

    /// Records a batch of uploaded parts.
    pub fn record_parts(&mut self, parts: impl IntoIterator<Item = CompletedPart>) {
        self.parts.extend(parts);
    }

    /// Number of parts recorded so far.
    #[must_use]
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    /// Consumes the session, yielding the part list ordered by part number
    /// as complete-MPU requires.
    #[must_use]
    pub fn into_ordered_parts(mut self) -> Vec<CompletedPart> {
        self.parts.sort_by_key(|p| p.part_number);
        self.parts
    }
}
