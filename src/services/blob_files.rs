//! BlobFileService: metadata records for uploaded files and the payload
//! I/O that goes with them.
//!
//! A record is identified by its filename. `create` is the only guard
//! against two locations claiming the same name; `save` persists whatever
//! the caller prepared (see [`crate::services::serving::prepare_for_save`]).

use crate::{
    models::{
        blob_file::{BlobFile, normalize_folder},
        object::{StoredObject, WriteOptions, split_gcs_filename},
    },
    services::object_store::{DEFAULT_MAX_KEYS, ListObjectsParams, ObjectStore, StorageError},
};
use bytes::Bytes;
use sqlx::SqlitePool;
use std::{
    collections::{BTreeSet, VecDeque},
    sync::Arc,
};
use thiserror::Error;
use tokio::fs::File;

/// Content type used when none can be guessed from the filename.
pub const FALLBACK_CONTENT_TYPE: &str = "binary/octet-stream";

#[derive(Debug, Error)]
pub enum BlobFileError {
    #[error("blob write failed for {filename}: {source}")]
    Write {
        filename: String,
        #[source]
        source: StorageError,
    },
    #[error("object path `{0}` is not of the form /<bucket>/<name>")]
    InvalidObjectPath(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type BlobFileResult<T> = Result<T, BlobFileError>;

#[derive(Clone)]
pub struct BlobFileService {
    db: Arc<SqlitePool>,
    objects: ObjectStore,
    default_bucket: String,
    utf8_file_extensions: Arc<BTreeSet<String>>,
}

const SELECT_BLOB_FILE: &str =
    "SELECT filename, folder, gcs_filename, serving_url, created, modified FROM blob_files";

impl BlobFileService {
    pub fn new(
        db: Arc<SqlitePool>,
        objects: ObjectStore,
        default_bucket: impl Into<String>,
        utf8_file_extensions: BTreeSet<String>,
    ) -> Self {
        Self {
            db,
            objects,
            default_bucket: default_bucket.into(),
            utf8_file_extensions: Arc::new(utf8_file_extensions),
        }
    }

    pub fn default_bucket(&self) -> &str {
        &self.default_bucket
    }

    pub fn objects(&self) -> &ObjectStore {
        &self.objects
    }

    /// New, unsaved record for `filename` in `bucket` (default bucket when
    /// `None`) and `folder`.
    ///
    /// Returns `Ok(None)` when `filename` is already registered under a
    /// different object path. The existing record is left alone.
    pub async fn create(
        &self,
        filename: &str,
        bucket: Option<&str>,
        folder: &str,
    ) -> BlobFileResult<Option<BlobFile>> {
        let bucket = bucket.unwrap_or(&self.default_bucket);
        let candidate = BlobFile::new(filename, bucket, folder);

        if let Some(existing) = self.get(filename).await? {
            if existing.gcs_filename != candidate.gcs_filename {
                tracing::error!(
                    "new gcs_filename: {} already exists as gcs_filename: {}",
                    candidate.gcs_filename,
                    existing.gcs_filename
                );
                return Ok(None);
            }
        }

        Ok(Some(candidate))
    }

    /// Key lookup by filename.
    pub async fn get(&self, filename: &str) -> BlobFileResult<Option<BlobFile>> {
        let record = sqlx::query_as::<_, BlobFile>(&format!("{} WHERE filename = ?", SELECT_BLOB_FILE))
            .bind(filename)
            .fetch_optional(&*self.db)
            .await?;
        Ok(record)
    }

    /// Insert or update `record`. `created` of an existing row is kept.
    pub async fn save(&self, record: &BlobFile) -> BlobFileResult<BlobFile> {
        let saved = sqlx::query_as::<_, BlobFile>(
            r#"
            INSERT INTO blob_files (filename, folder, gcs_filename, serving_url, created, modified)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(filename) DO UPDATE SET
                folder = excluded.folder,
                gcs_filename = excluded.gcs_filename,
                serving_url = excluded.serving_url,
                modified = excluded.modified
            RETURNING filename, folder, gcs_filename, serving_url, created, modified
            "#,
        )
        .bind(&record.filename)
        .bind(&record.folder)
        .bind(&record.gcs_filename)
        .bind(&record.serving_url)
        .bind(record.created)
        .bind(record.modified)
        .fetch_one(&*self.db)
        .await?;
        Ok(saved)
    }

    /// Keys (filenames) of every record except `excluded`, in key order.
    pub async fn list_keys_except(&self, excluded: &str) -> BlobFileResult<Vec<String>> {
        let keys = sqlx::query_scalar::<_, String>(
            "SELECT filename FROM blob_files WHERE filename != ? ORDER BY filename ASC",
        )
        .bind(excluded)
        .fetch_all(&*self.db)
        .await?;
        Ok(keys)
    }

    /// Filename of the record stored at `gcs_filename`, if any.
    pub async fn find_filename_by_gcs_filename(
        &self,
        gcs_filename: &str,
    ) -> BlobFileResult<Option<String>> {
        let filename = sqlx::query_scalar::<_, String>(
            "SELECT filename FROM blob_files WHERE gcs_filename = ? LIMIT 1",
        )
        .bind(gcs_filename)
        .fetch_optional(&*self.db)
        .await?;
        Ok(filename)
    }

    /// Content type guessed from the filename; text-like extensions get a
    /// UTF-8 charset.
    pub fn content_type_for(&self, record: &BlobFile) -> String {
        match mime_guess::from_path(&record.filename).first() {
            Some(mime) if self.utf8_file_extensions.contains(&record.extension()) => {
                format!("{}; charset=utf-8", mime.essence_str())
            }
            Some(mime) => mime.essence_str().to_string(),
            None => {
                tracing::warn!("Mimetype not guessed for: {}", record.filename);
                FALLBACK_CONTENT_TYPE.to_string()
            }
        }
    }

    /// Store `data` as the payload of `record`, publicly readable.
    /// Returns the object path written.
    pub async fn write(&self, record: &BlobFile, data: Bytes) -> BlobFileResult<String> {
        let (bucket, name) = locate(record)?;
        let options = WriteOptions::default()
            .with_content_type(self.content_type_for(record))
            .public_read();

        self.objects
            .put_object(bucket, name, options, data)
            .await
            .map_err(|source| BlobFileError::Write {
                filename: record.filename.clone(),
                source,
            })?;
        Ok(record.gcs_filename.clone())
    }

    /// Whole payload of `record`, or `None` when it is missing.
    pub async fn read(&self, record: &BlobFile) -> BlobFileResult<Option<Vec<u8>>> {
        let (bucket, name) = locate(record)?;
        match self.objects.read_object(bucket, name).await {
            Ok(data) => Ok(Some(data)),
            Err(err) if err.is_not_found() => {
                tracing::warn!("GCS file {} NOT FOUND : {}", record.gcs_filename, err);
                Ok(None)
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Open the payload stored at `gcs_filename` for streaming.
    pub async fn open(&self, gcs_filename: &str) -> BlobFileResult<(StoredObject, File)> {
        let (bucket, name) = split_gcs_filename(gcs_filename)
            .ok_or_else(|| BlobFileError::InvalidObjectPath(gcs_filename.to_string()))?;
        Ok(self.objects.get_object_reader(bucket, name).await?)
    }

    /// Stored attributes of the payload of `record`.
    pub async fn stat(&self, record: &BlobFile) -> BlobFileResult<StoredObject> {
        let (bucket, name) = locate(record)?;
        Ok(self.objects.stat_object(bucket, name).await?)
    }

    /// Delete the payload, then the record. A missing payload is only a
    /// warning; the two steps are independent.
    pub async fn delete(&self, record: &BlobFile) -> BlobFileResult<()> {
        let (bucket, name) = locate(record)?;
        match self.objects.delete_object(bucket, name).await {
            Ok(_) => {}
            Err(err) if err.is_not_found() => {
                tracing::warn!("GCS file {} NOT FOUND : {}", record.gcs_filename, err);
            }
            Err(err) => return Err(err.into()),
        }

        sqlx::query("DELETE FROM blob_files WHERE filename = ?")
            .bind(&record.filename)
            .execute(&*self.db)
            .await?;
        Ok(())
    }

    /// Cursor over every object under `bucket` + `folder`, paired with the
    /// filename of the record pointing at it ("" for orphans).
    pub fn list_object_paths(&self, bucket: Option<&str>, folder: &str) -> ObjectPathCursor {
        let folder = normalize_folder(folder);
        let prefix = match folder.strip_prefix('/') {
            Some(rest) => format!("{}/", rest),
            None => String::new(),
        };
        ObjectPathCursor {
            service: self.clone(),
            bucket: bucket.unwrap_or(&self.default_bucket).to_string(),
            prefix,
            page_size: DEFAULT_MAX_KEYS,
            page: VecDeque::new(),
            continuation_token: None,
            exhausted: false,
        }
    }
}

fn locate(record: &BlobFile) -> BlobFileResult<(&str, &str)> {
    split_gcs_filename(&record.gcs_filename)
        .ok_or_else(|| BlobFileError::InvalidObjectPath(record.gcs_filename.clone()))
}

/// Pages through an object listing, looking up the owning record of each
/// object. Every call to [`BlobFileService::list_object_paths`] starts a
/// fresh listing.
pub struct ObjectPathCursor {
    service: BlobFileService,
    bucket: String,
    prefix: String,
    page_size: usize,
    page: VecDeque<StoredObject>,
    continuation_token: Option<String>,
    exhausted: bool,
}

impl ObjectPathCursor {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Next `(gcs_filename, filename)` pair, or `None` when done.
    pub async fn next(&mut self) -> BlobFileResult<Option<(String, String)>> {
        loop {
            if let Some(object) = self.page.pop_front() {
                let gcs_filename = object.gcs_filename();
                let filename = self
                    .service
                    .find_filename_by_gcs_filename(&gcs_filename)
                    .await?
                    .unwrap_or_default();
                return Ok(Some((gcs_filename, filename)));
            }
            if self.exhausted {
                return Ok(None);
            }

            let result = self
                .service
                .objects
                .list_objects(
                    &self.bucket,
                    ListObjectsParams {
                        prefix: Some(self.prefix.clone()),
                        continuation_token: self.continuation_token.take(),
                        max_keys: self.page_size,
                    },
                )
                .await?;
            self.exhausted = !result.is_truncated;
            self.continuation_token = result.next_continuation_token;
            self.page.extend(result.objects);
        }
    }

    /// Drain the cursor.
    pub async fn collect_all(mut self) -> BlobFileResult<Vec<(String, String)>> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await? {
            items.push(item);
        }
        Ok(items)
    }
}
