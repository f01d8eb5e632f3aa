//! Download paths: the blob-serving proxy, the development object endpoint
//! and the object listing.

use crate::{
    AppState,
    config::Environment,
    errors::AppError,
    models::{blob_file::gcs_filename_from_storage_key, object::StoredObject},
};
use axum::{
    Json,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

#[derive(Debug, Deserialize)]
pub struct ServeQuery {
    pub save_as: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ObjectPathsQuery {
    pub bucket: Option<String>,
    pub folder: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct ObjectPathEntry {
    pub gcs_filename: String,
    /// Empty when no record points at the object.
    pub filename: String,
}

/// `GET /use_blobstore/{key}?save_as=<filename>`
///
/// Streams the payload behind a storage key as an attachment.
pub async fn use_blobstore(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(q): Query<ServeQuery>,
) -> Result<Response, AppError> {
    let gcs_filename = gcs_filename_from_storage_key(&key)
        .ok_or_else(|| AppError::not_found(format!("unknown blob key {}", key)))?;
    let save_as = q.save_as.unwrap_or_else(|| {
        gcs_filename
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string()
    });
    tracing::info!("UseBlobstore download blob : {}", save_as);

    let (meta, file) = state.blob_files.open(&gcs_filename).await?;
    let mut response = stream_response(&meta, file);
    response.headers_mut().insert(
        header::CONTENT_DISPOSITION,
        content_disposition(&save_as),
    );
    Ok(response)
}

/// `GET /_ah/gcs/{*path}`: direct object URLs handed out in development.
pub async fn local_object(
    State(state): State<AppState>,
    Path(path): Path<String>,
) -> Result<Response, AppError> {
    if state.config.environment != Environment::Development {
        return Err(AppError::not_found("local object endpoint is disabled"));
    }
    let gcs_filename = format!("/{}", path.trim_start_matches('/'));
    let (meta, file) = state.blob_files.open(&gcs_filename).await?;
    Ok(stream_response(&meta, file))
}

/// `GET /blob_files/objects?folder=/upload`
pub async fn list_object_paths(
    State(state): State<AppState>,
    Query(q): Query<ObjectPathsQuery>,
) -> Result<Json<Vec<ObjectPathEntry>>, AppError> {
    let folder = q.folder.as_deref().unwrap_or(&state.config.upload_folder);
    let mut cursor = state
        .blob_files
        .list_object_paths(q.bucket.as_deref(), folder);

    let mut entries = Vec::new();
    while let Some((gcs_filename, filename)) = cursor.next().await? {
        entries.push(ObjectPathEntry {
            gcs_filename,
            filename,
        });
    }
    Ok(Json(entries))
}

fn stream_response(meta: &StoredObject, file: File) -> Response {
    let body = Body::from_stream(ReaderStream::new(file));
    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), meta);
    response
}

fn set_object_headers(headers: &mut HeaderMap, meta: &StoredObject) {
    let content_type = meta
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&meta.size_bytes.max(0).to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    if let Some(etag) = meta.etag.as_ref() {
        if let Ok(value) = HeaderValue::from_str(&format!("\"{}\"", etag)) {
            headers.insert(header::ETAG, value);
        }
    }

    if let Some(cache_control) = meta.cache_control.as_ref() {
        if let Ok(value) = HeaderValue::from_str(cache_control) {
            headers.insert(header::CACHE_CONTROL, value);
        }
    }

    if let Ok(value) = HeaderValue::from_str(&meta.last_modified.to_rfc2822()) {
        headers.insert(header::LAST_MODIFIED, value);
    }
}

/// `attachment` with an ASCII fallback name plus the exact UTF-8 name.
fn content_disposition(filename: &str) -> HeaderValue {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii_graphic() && c != '"' && c != '\\' || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let value = format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        fallback,
        utf8_percent_encode(filename, NON_ALPHANUMERIC)
    );
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
