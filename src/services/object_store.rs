//! src/services/object_store.rs
//!
//! ObjectStore: bucket-addressed blob storage backed by SQLite for object
//! attributes and local disk for payloads. Payloads are sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{name}`.

use crate::models::object::{StoredObject, WriteOptions};
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt, pin_mut, stream};
use md5::Context;
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::debug;
use uuid::Uuid;

#[derive(Clone, Debug, Default)]
pub struct ListObjectsParams {
    pub prefix: Option<String>,
    pub continuation_token: Option<String>,
    pub max_keys: usize,
}

#[derive(Debug)]
pub struct ListObjectsResult {
    pub objects: Vec<StoredObject>,
    pub is_truncated: bool,
    pub next_continuation_token: Option<String>,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("bucket `{name}` invalid: {reason}")]
    InvalidBucketName { name: String, reason: String },
    #[error("object `{name}` not found in bucket `{bucket}`")]
    ObjectNotFound { bucket: String, name: String },
    #[error("invalid object name")]
    InvalidObjectName,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::ObjectNotFound { .. })
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// ObjectStore provides the bucket operations the rest of the service needs:
/// - Put an object (writes bytes to disk and upserts its attributes)
/// - Get / stat an object
/// - List objects under a prefix, page by page
/// - Delete an object (attributes row and payload)
#[derive(Clone)]
pub struct ObjectStore {
    /// Shared SQLite connection pool used for object attributes.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

const MAX_OBJECT_NAME_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 222;
const BUCKET_COMPONENT_MAX_LEN: usize = 63;
pub const DEFAULT_MAX_KEYS: usize = 1000;

impl ObjectStore {
    /// Create a new ObjectStore backed by the provided SQLite pool and
    /// using `base_path` as the root directory for payloads.
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Reject names that could escape the bucket directory.
    ///
    /// Names are `/`-separated; no segment may be empty, `.` or `..`.
    fn ensure_name_safe(&self, name: &str) -> StorageResult<()> {
        if name.is_empty() || name.len() > MAX_OBJECT_NAME_LEN {
            return Err(StorageError::InvalidObjectName);
        }
        if name
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(StorageError::InvalidObjectName);
        }
        if name
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0')
        {
            return Err(StorageError::InvalidObjectName);
        }
        Ok(())
    }

    /// Validate bucket name format.
    ///
    /// - 3–222 characters, dot-separated components of at most 63
    /// - lowercase letters, digits, dots, hyphens, underscores only
    /// - must start and end with a letter or digit
    /// - cannot look like an IPv4 address
    fn ensure_bucket_name_safe(&self, name: &str) -> StorageResult<()> {
        let invalid = |reason: &str| StorageError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.into(),
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 222 characters"));
        }

        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-' | '_'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, hyphens and underscores",
            ));
        }

        let first_last_ok = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric());
        if !first_last_ok(name.chars().next()) || !first_last_ok(name.chars().last()) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }

        if name
            .split('.')
            .any(|part| part.is_empty() || part.len() > BUCKET_COMPONENT_MAX_LEN)
        {
            return Err(invalid(
                "dot-separated components must be between 1 and 63 characters",
            ));
        }

        if is_ipv4_like(name) {
            return Err(invalid("must not be formatted like an IP address"));
        }

        Ok(())
    }

    fn bucket_root(&self, bucket: &str) -> PathBuf {
        let mut path = self.base_path.clone();
        path.push(bucket);
        path
    }

    /// Two-level shard directories from MD5(bucket/name), as lowercase hex.
    fn object_shards(bucket: &str, name: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket, name));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Combines base_path/bucket/{shard}/{shard}/{name}.
    /// Parent directories may not exist yet.
    fn payload_path(&self, bucket: &str, name: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket, name);
        let mut path = self.bucket_root(bucket);
        path.push(shard_a);
        path.push(shard_b);
        path.push(name);
        path
    }

    fn validate(&self, bucket: &str, name: &str) -> StorageResult<()> {
        self.ensure_bucket_name_safe(bucket)?;
        self.ensure_name_safe(name)
    }

    async fn fetch_object(&self, bucket: &str, name: &str) -> StorageResult<StoredObject> {
        sqlx::query_as::<_, StoredObject>(
            "SELECT bucket, name, content_type, acl, cache_control, size_bytes, etag, last_modified
             FROM objects
             WHERE bucket = ? AND name = ?",
        )
        .bind(bucket)
        .bind(name)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                name: name.to_string(),
            },
            other => StorageError::Sqlx(other),
        })
    }

    /// Stream an object to disk and upsert its attributes.
    ///
    /// Bytes go to a temporary file first; the payload only replaces the
    /// previous version once fully written and synced, so readers never see
    /// a partial object.
    pub async fn put_object_stream<S>(
        &self,
        bucket: &str,
        name: &str,
        options: WriteOptions,
        stream: S,
    ) -> StorageResult<StoredObject>
    where
        S: Stream<Item = io::Result<Bytes>> + Send,
    {
        self.validate(bucket, name)?;

        let file_path = self.payload_path(bucket, name);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        pin_mut!(stream);
        while let Some(chunk_res) = stream.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(StorageError::Io(err));
                }
            };
            size_bytes += chunk.len() as i64;
            digest.consume(&chunk);
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            if err.kind() == ErrorKind::AlreadyExists {
                fs::remove_file(&file_path).await?;
                fs::rename(&tmp_path, &file_path).await?;
            } else {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StorageError::Io(err));
            }
        }

        let etag = format!("{:x}", digest.compute());

        let stored = sqlx::query_as::<_, StoredObject>(
            r#"
            INSERT INTO objects (
                bucket, name, content_type, acl, cache_control, size_bytes, etag, last_modified
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(bucket, name) DO UPDATE SET
                content_type = excluded.content_type,
                acl = excluded.acl,
                cache_control = excluded.cache_control,
                size_bytes = excluded.size_bytes,
                etag = excluded.etag,
                last_modified = excluded.last_modified
            RETURNING bucket, name, content_type, acl, cache_control, size_bytes, etag, last_modified
            "#,
        )
        .bind(bucket)
        .bind(name)
        .bind(options.content_type)
        .bind(options.acl)
        .bind(options.cache_control)
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        debug!(bucket, name, size_bytes, "stored object");
        Ok(stored)
    }

    /// Write a whole in-memory payload.
    pub async fn put_object(
        &self,
        bucket: &str,
        name: &str,
        options: WriteOptions,
        data: Bytes,
    ) -> StorageResult<StoredObject> {
        let body = stream::once(async move { Ok::<_, io::Error>(data) });
        self.put_object_stream(bucket, name, options, body).await
    }

    /// Attributes plus an open file handle ready for streaming out.
    ///
    /// Returns ObjectNotFound if the row exists but the payload is missing.
    pub async fn get_object_reader(
        &self,
        bucket: &str,
        name: &str,
    ) -> StorageResult<(StoredObject, File)> {
        self.validate(bucket, name)?;
        let object = self.fetch_object(bucket, name).await?;

        let file_path = self.payload_path(bucket, name);
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == io::ErrorKind::NotFound {
                StorageError::ObjectNotFound {
                    bucket: bucket.to_string(),
                    name: name.to_string(),
                }
            } else {
                StorageError::Io(err)
            }
        })?;

        Ok((object, file))
    }

    /// Read a whole payload into memory.
    pub async fn read_object(&self, bucket: &str, name: &str) -> StorageResult<Vec<u8>> {
        let (object, mut file) = self.get_object_reader(bucket, name).await?;
        let mut data = Vec::with_capacity(object.size_bytes.max(0) as usize);
        file.read_to_end(&mut data).await?;
        Ok(data)
    }

    pub async fn stat_object(&self, bucket: &str, name: &str) -> StorageResult<StoredObject> {
        self.validate(bucket, name)?;
        self.fetch_object(bucket, name).await
    }

    /// One page of objects whose name starts with `prefix`, in name order.
    ///
    /// `continuation_token` is the last name of the previous page.
    pub async fn list_objects(
        &self,
        bucket: &str,
        params: ListObjectsParams,
    ) -> StorageResult<ListObjectsResult> {
        self.ensure_bucket_name_safe(bucket)?;
        let max_keys = params.max_keys.clamp(1, DEFAULT_MAX_KEYS);
        let fetch_limit = max_keys + 1;

        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT bucket, name, content_type, acl, cache_control, size_bytes, etag, \
             last_modified FROM objects WHERE bucket = ",
        );
        builder.push_bind(bucket.to_string());

        if let Some(prefix) = params.prefix.as_deref().filter(|p| !p.is_empty()) {
            builder.push(" AND name LIKE ");
            builder.push_bind(format!("{}%", escape_like(prefix)));
            builder.push(" ESCAPE '\\'");
        }

        if let Some(token) = &params.continuation_token {
            builder.push(" AND name > ");
            builder.push_bind(token.clone());
        }

        builder.push(" ORDER BY name ASC LIMIT ");
        builder.push_bind(fetch_limit as i64);

        let mut rows: Vec<StoredObject> = builder.build_query_as().fetch_all(&*self.db).await?;

        let mut is_truncated = false;
        let mut next_continuation_token = None;
        if rows.len() == fetch_limit {
            rows.pop();
            next_continuation_token = rows.last().map(|last| last.name.clone());
            is_truncated = true;
        }

        Ok(ListObjectsResult {
            objects: rows,
            is_truncated,
            next_continuation_token,
        })
    }

    /// Delete an object's attributes and payload.
    ///
    /// Returns ObjectNotFound when nothing was stored under the name, which
    /// callers may treat as a warning.
    pub async fn delete_object(&self, bucket: &str, name: &str) -> StorageResult<StoredObject> {
        self.validate(bucket, name)?;
        let object = self.fetch_object(bucket, name).await?;

        let result = sqlx::query("DELETE FROM objects WHERE bucket = ? AND name = ?")
            .bind(bucket)
            .bind(name)
            .execute(&*self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::ObjectNotFound {
                bucket: bucket.to_string(),
                name: name.to_string(),
            });
        }

        let file_path = self.payload_path(bucket, name);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed payload {}", file_path.display()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                debug!("payload {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(bucket);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }

        Ok(object)
    }

    /// Recursively remove empty directories up to bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

/// Escape LIKE wildcards so a prefix matches literally.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|segment| {
        !segment.is_empty()
            && segment.len() <= 3
            && segment.chars().all(|c| c.is_ascii_digit())
            && segment.parse::<u8>().is_ok()
    })
}
