//! Metadata record for an uploaded file.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Prefix the storage key scheme puts in front of an object path.
const STORAGE_KEY_PREFIX: &str = "/gs";

/// One uploaded file: its name, where the payload lives and how to serve it.
///
/// `filename` is the identity; two records never share it. The folder is not
/// part of the identity, so the same name cannot live in two folders.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct BlobFile {
    /// Unique file name without folder.
    pub filename: String,

    /// Folder within the bucket, e.g. `/upload`.
    pub folder: String,

    /// Full object path: `/<bucket><folder>/<filename>`.
    pub gcs_filename: String,

    /// URL handed to clients. Recomputed before every save.
    pub serving_url: String,

    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl BlobFile {
    /// Build an unsaved record for `filename` stored under `bucket` + `folder`.
    pub fn new(filename: &str, bucket: &str, folder: &str) -> Self {
        let now = Utc::now();
        Self {
            filename: filename.to_string(),
            folder: folder.to_string(),
            gcs_filename: gcs_path(bucket, folder, filename),
            serving_url: String::new(),
            created: now,
            modified: now,
        }
    }

    /// Lowercased text after the last `.`, or empty when there is none.
    pub fn extension(&self) -> String {
        self.filename
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .unwrap_or_default()
    }

    /// Opaque, URL-safe key for the payload. Reversible with
    /// [`gcs_filename_from_storage_key`].
    pub fn storage_key(&self) -> String {
        URL_SAFE_NO_PAD.encode(format!("{}{}", STORAGE_KEY_PREFIX, self.gcs_filename))
    }
}

/// Recover the object path from a storage key. `None` for foreign keys.
pub fn gcs_filename_from_storage_key(key: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(key.trim_end_matches('=')).ok()?;
    let decoded = String::from_utf8(bytes).ok()?;
    decoded
        .strip_prefix(STORAGE_KEY_PREFIX)
        .filter(|path| path.starts_with('/'))
        .map(str::to_string)
}

/// `/<bucket><folder>/<filename>`, with `folder` normalized so that `/` and
/// an empty folder both put the file at the bucket root.
pub fn gcs_path(bucket: &str, folder: &str, filename: &str) -> String {
    format!("/{}{}/{}", bucket, normalize_folder(folder), filename)
}

/// Strip trailing slashes and ensure a leading one; the root folder becomes "".
pub fn normalize_folder(folder: &str) -> String {
    let trimmed = folder.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{}", trimmed)
    }
}
