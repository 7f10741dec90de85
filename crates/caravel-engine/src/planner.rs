//! Range planning for multipart transfers.
//!
//! Pure functions choosing a part size from the object's content length and
//! the destination backend family, then tiling the object into inclusive
//! byte ranges. A zero-byte object still produces one `None` range so the
//! destination sees an object.

use caravel_core::replication::{BackendFamily, ByteRange};

/// Base multipart part size: 16 MiB.
pub const BASE_PART_SIZE: u64 = 16 * 1024 * 1024;

/// Part size stops doubling at 512 MiB in the first pass.
pub const MAX_DOUBLED_PART_SIZE: u64 = 512 * 1024 * 1024;

/// Preferred upper bound on part count.
pub const TARGET_PART_COUNT: u64 = 1_000;

/// Hard upper bound on part count for generic backends.
pub const MAX_PART_COUNT: u64 = 10_000;

/// GCP composite objects are limited to 1024 components.
pub const GCP_MAX_PART_COUNT: u64 = 1_024;

/// Chooses the part size for an object.
///
/// Doubles from the base size until the part count drops to the preferred
/// bound or the size reaches 512 MiB, then keeps doubling while the count
/// still exceeds the hard bound (objects up to the 5 TiB limit). For GCP the
/// size is raised so the count fits the 1024-component limit.
#[must_use]
pub fn part_size(content_length: u64, family: BackendFamily) -> u64 {
    let mut size = BASE_PART_SIZE;

    while content_length.div_ceil(size) > TARGET_PART_COUNT && size < MAX_DOUBLED_PART_SIZE {
        size *= 2;
    }
    while content_length.div_ceil(size) > MAX_PART_COUNT {
        size *= 2;
    }

    if family == BackendFamily::Gcp && content_length.div_ceil(size) > GCP_MAX_PART_COUNT {
        size = content_length.next_power_of_two().div_ceil(GCP_MAX_PART_COUNT);
    }

    size
}

/// Tiles an object into part ranges.
///
/// The ranges cover `[0, content_length - 1]` exactly, the last range
/// possibly shorter. A zero-byte object yields a single `None` range.
#[must_use]
pub fn plan(content_length: u64, family: BackendFamily) -> Vec<Option<ByteRange>> {
    if content_length == 0 {
        return vec![None];
    }

    let size = part_size(content_length, family);
    let mut ranges = Vec::with_capacity(content_length.div_ceil(size) as usize);
    let mut start = 0u64;
    while start < content_length {
        let end = (start + size - 1).min(content_length - 1);
        ranges.push(Some(ByteRange::new(start, end)));
        start = end + 1;
    }
    ranges
}
