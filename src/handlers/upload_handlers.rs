//! Upload form, upload handling and the README page.

use crate::{
    AppState,
    errors::AppError,
    services::{
        serving::prepare_for_save,
        templates::{LinksContext, render_markdown},
    },
};
use axum::{
    Form,
    body::Bytes,
    extract::{Multipart, State},
    response::Html,
};
use serde::Deserialize;
use std::io::ErrorKind;

pub const OVERWRITE_BLOCKED: &str =
    "Overwrite blocked. The GCS file already exists in another bucket and/or folder";
pub const NO_FILE_DATA: &str = "No file data";

#[derive(Debug, Deserialize)]
pub struct ReadmeForm {
    pub use_blobstore: Option<String>,
}

/// Form fields of an upload.
#[derive(Default)]
struct UploadForm {
    file: Option<(String, Bytes)>,
    use_blobstore: Option<String>,
}

/// `GET /blob_upload`
pub async fn upload_form(State(state): State<AppState>) -> Html<String> {
    Html(
        state
            .templates
            .upload_form(state.config.blob_files.use_blobstore, None),
    )
}

/// `POST /blob_upload`
///
/// Store the file under the upload folder, save its record, rebuild the
/// archive and show links to both.
pub async fn upload(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Html<String>, AppError> {
    let form = read_form(multipart).await?;
    let flag = form.use_blobstore.as_deref();
    let use_blobstore = flag == Some("T");

    let Some((filename, data)) = form.file else {
        tracing::error!("No file data");
        return Ok(Html(state.templates.links(&LinksContext {
            failed: Some(NO_FILE_DATA),
            use_blobstore,
            ..Default::default()
        })));
    };

    // the archive name is reserved for the archive record
    let created = if filename == state.archive.archive_filename() {
        tracing::error!("upload of {} would shadow the archive", filename);
        None
    } else {
        state
            .blob_files
            .create(&filename, None, &state.config.upload_folder)
            .await?
    };
    let Some(bf) = created else {
        return Ok(Html(state.templates.links(&LinksContext {
            failed: Some(OVERWRITE_BLOCKED),
            use_blobstore,
            ..Default::default()
        })));
    };

    let serving = state.serving_context(flag);
    state.blob_files.write(&bf, data).await?;
    let bf = state
        .blob_files
        .save(&prepare_for_save(bf, &serving))
        .await?;
    tracing::info!("Uploaded and saved in default GCS bucket : {}", bf.gcs_filename);

    // make sure this (new) record ends up in the archive
    let bzf = state.archive.rebuild(Some(&bf), &serving).await?;

    Ok(Html(state.templates.links(&LinksContext {
        failed: None,
        use_blobstore,
        bf_name: Some(&bf.filename),
        bf_url: Some(&bf.serving_url),
        bzf_name: Some(&bzf.filename),
        bzf_url: Some(&bzf.serving_url),
    })))
}

async fn read_form(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::default();
    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("file") => {
                let filename = field.file_name().map(base_name).unwrap_or_default();
                let data = field.bytes().await?;
                if !filename.is_empty() && !data.is_empty() {
                    form.file = Some((filename, data));
                }
            }
            Some("use_blobstore") => form.use_blobstore = Some(field.text().await?),
            _ => {}
        }
    }
    Ok(form)
}

/// Browsers may send a full client path as the file name.
fn base_name(name: &str) -> String {
    name.rsplit(['/', '\\']).next().unwrap_or(name).to_string()
}

/// `GET /readme`
pub async fn readme_get(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    let use_blobstore = state.config.blob_files.use_blobstore;
    render_readme(&state, use_blobstore).await
}

/// `POST /readme`
pub async fn readme_post(
    State(state): State<AppState>,
    Form(form): Form<ReadmeForm>,
) -> Result<Html<String>, AppError> {
    let use_blobstore = form.use_blobstore.as_deref() == Some("T");
    render_readme(&state, use_blobstore).await
}

async fn render_readme(state: &AppState, use_blobstore: bool) -> Result<Html<String>, AppError> {
    let source = tokio::fs::read_to_string(&state.config.readme_path)
        .await
        .map_err(|err| match err.kind() {
            ErrorKind::NotFound => {
                AppError::not_found(format!("README {} not found", state.config.readme_path))
            }
            _ => AppError::internal(format!("reading README: {}", err)),
        })?;
    let readme = render_markdown(&source);
    Ok(Html(
        state.templates.upload_form(use_blobstore, Some(&readme)),
    ))
}
