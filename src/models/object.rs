//! Represents an object (payload) stored in a bucket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Predefined ACL granting everyone read access.
pub const ACL_PUBLIC_READ: &str = "public-read";

/// Cache-control sent with objects that must never be served stale.
pub const CACHE_CONTROL_NO_CACHE: &str = "private, max-age=0, no-cache";

/// Attributes of a single object within a bucket.
///
/// The struct stores what the object store knows about a payload, not the
/// bytes themselves.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct StoredObject {
    /// Bucket the object lives in.
    pub bucket: String,

    /// Object name within the bucket, e.g. `upload/codes.csv`.
    pub name: String,

    /// Content type (MIME type) given at write time.
    pub content_type: Option<String>,

    /// Predefined ACL given at write time (e.g. `public-read`).
    pub acl: Option<String>,

    /// Cache-Control header to send when serving the object.
    pub cache_control: Option<String>,

    /// Size in bytes.
    pub size_bytes: i64,

    /// MD5 checksum of the payload.
    pub etag: Option<String>,

    /// Timestamp when object was last written.
    pub last_modified: DateTime<Utc>,
}

impl StoredObject {
    /// Full object path in the `/<bucket>/<name>` form used by metadata records.
    pub fn gcs_filename(&self) -> String {
        format!("/{}/{}", self.bucket, self.name)
    }
}

/// Options applied when writing an object.
#[derive(Clone, Debug, Default)]
pub struct WriteOptions {
    pub content_type: Option<String>,
    pub acl: Option<String>,
    pub cache_control: Option<String>,
}

impl WriteOptions {
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn public_read(mut self) -> Self {
        self.acl = Some(ACL_PUBLIC_READ.into());
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.cache_control = Some(CACHE_CONTROL_NO_CACHE.into());
        self
    }
}

/// Split `/<bucket>/<name>` into its bucket and object name.
pub fn split_gcs_filename(gcs_filename: &str) -> Option<(&str, &str)> {
    let rest = gcs_filename.strip_prefix('/')?;
    let (bucket, name) = rest.split_once('/')?;
    if bucket.is_empty() || name.is_empty() {
        return None;
    }
    Some((bucket, name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_bucket_and_name() {
        assert_eq!(
            split_gcs_filename("/bucket/upload/a.txt"),
            Some(("bucket", "upload/a.txt"))
        );
        assert_eq!(split_gcs_filename("bucket/a.txt"), None);
        assert_eq!(split_gcs_filename("/bucket/"), None);
    }
}
