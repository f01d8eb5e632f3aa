//! Rolling zip archive of every uploaded file.
//!
//! The archive is itself a blob file record, stored at `ARCHIVE_PATH` and
//! rebuilt after each upload. Records are enumerated by key and fetched one
//! by one; the record that triggered the rebuild is appended at the end when
//! the enumeration did not include it yet.

use crate::{
    config::BlobFilesConfig,
    models::{
        blob_file::{BlobFile, gcs_path},
        object::{WriteOptions, split_gcs_filename},
    },
    services::{
        blob_files::{BlobFileError, BlobFileService},
        object_store::StorageError,
        serving::{ServingContext, prepare_for_save},
    },
};
use bytes::Bytes;
use std::io::{self, Cursor, Write};
use thiserror::Error;
use zip::{CompressionMethod, ZipWriter, result::ZipError, write::FileOptions};

pub const ZIP_CONTENT_TYPE: &str = "multipart/x-zip";

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive path `{0}` is already registered elsewhere")]
    Conflict(String),
    #[error("archive path `{0}` is not of the form /<bucket>/<name>")]
    InvalidPath(String),
    #[error(transparent)]
    BlobFile(#[from] BlobFileError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("zip error: {0}")]
    Zip(#[from] ZipError),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type ArchiveResult<T> = Result<T, ArchiveError>;

#[derive(Clone)]
pub struct ArchiveService {
    blob_files: BlobFileService,
    config: BlobFilesConfig,
}

impl ArchiveService {
    pub fn new(blob_files: BlobFileService, config: BlobFilesConfig) -> Self {
        Self { blob_files, config }
    }

    /// Filename the archive record is stored under.
    pub fn archive_filename(&self) -> &str {
        self.config.archive_location().1
    }

    /// Object path the archive is stored at in the default bucket.
    pub fn archive_gcs_filename(&self) -> String {
        let (folder, file) = self.config.archive_location();
        gcs_path(self.blob_files.default_bucket(), folder, file)
    }

    /// Rebuild the archive so it holds every record, `new_bf` included.
    ///
    /// - `new_bf` is the archive itself: returned unchanged.
    /// - `new_bf` carries the archive's filename at another path: conflict.
    /// - `new_bf` is `None`: the stored archive is returned; when there is
    ///   none yet a fresh one is built from the current records.
    pub async fn rebuild(
        &self,
        new_bf: Option<&BlobFile>,
        serving: &ServingContext,
    ) -> ArchiveResult<BlobFile> {
        let (archive_folder, archive_file) = self.config.archive_location();

        match new_bf {
            Some(bf) if bf.filename == archive_file => {
                if bf.gcs_filename == self.archive_gcs_filename() {
                    return Ok(bf.clone());
                }
                tracing::error!(
                    "{} uses the archive name outside {}",
                    bf.gcs_filename,
                    self.config.archive_path
                );
                return Err(ArchiveError::Conflict(bf.gcs_filename.clone()));
            }
            None => {
                if let Some(existing) = self.blob_files.get(archive_file).await? {
                    return Ok(existing);
                }
            }
            Some(_) => {}
        }

        let archive = self
            .blob_files
            .create(archive_file, None, archive_folder)
            .await?
            .ok_or_else(|| ArchiveError::Conflict(self.config.archive_path.clone()))?;
        let (bucket, name) = split_gcs_filename(&archive.gcs_filename)
            .ok_or_else(|| ArchiveError::InvalidPath(archive.gcs_filename.clone()))?;

        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        let mut pending = new_bf;
        let mut entries = 0usize;

        for key in self.blob_files.list_keys_except(archive_file).await? {
            // removed between listing and lookup
            let Some(bf) = self.blob_files.get(&key).await? else {
                continue;
            };
            if pending.is_some_and(|new| new.filename == bf.filename) {
                pending = None;
            }
            if self.add_entry(&mut zip, &bf).await? {
                entries += 1;
            }
        }

        // not yet visible to the enumeration
        if let Some(bf) = pending {
            tracing::debug!("appending {} missed by the record listing", bf.filename);
            if self.add_entry(&mut zip, bf).await? {
                entries += 1;
            }
        }

        let data = zip.finish()?.into_inner();
        let options = WriteOptions::default()
            .with_content_type(ZIP_CONTENT_TYPE)
            .public_read()
            .no_cache();
        self.blob_files
            .objects()
            .put_object(bucket, name, options, Bytes::from(data))
            .await?;

        let saved = self
            .blob_files
            .save(&prepare_for_save(archive, serving))
            .await?;
        tracing::info!(entries, "rebuilt archive {}", saved.gcs_filename);
        Ok(saved)
    }

    /// Add the payload of `bf` under its filename. Missing payloads are
    /// skipped; returns whether an entry was written.
    async fn add_entry(
        &self,
        zip: &mut ZipWriter<Cursor<Vec<u8>>>,
        bf: &BlobFile,
    ) -> ArchiveResult<bool> {
        let Some(blob) = self.blob_files.read(bf).await? else {
            tracing::warn!("skipping {}: payload missing", bf.filename);
            return Ok(false);
        };
        tracing::info!("{}", bf.filename);

        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);
        zip.start_file(bf.filename.as_str(), options)?;
        zip.write_all(&blob)?;
        Ok(true)
    }
}
