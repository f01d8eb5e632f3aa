//! Defines routes for uploads, downloads and ACL management.
//!
//! ## Structure
//! - **Uploads**
//!   - `GET  /blob_upload` : upload form
//!   - `POST /blob_upload` : store file, rebuild archive, show links
//!   - `GET|POST /readme`  : README rendered into the upload page
//!
//! - **Downloads**
//!   - `GET /use_blobstore/{key}` : proxy download by storage key
//!   - `GET /_ah/gcs/{*path}`     : direct object URL (development only)
//!   - `GET /blob_files/objects`  : objects in a folder with their records
//!
//! - **ACLs** on `codes.csv`
//!   - `GET /insert_acl`, `GET /delete_acl`, `GET /api_insert_acl`

use crate::{
    AppState,
    handlers::{
        acl_handlers::{api_insert_acl, delete_acl, insert_acl},
        health_handlers::{healthz, readyz},
        serve_handlers::{list_object_paths, local_object, use_blobstore},
        upload_handlers::{readme_get, readme_post, upload, upload_form},
    },
};
use axum::{Router, routing::get};

/// Build the router for every endpoint. Handlers share `AppState`.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // uploads
        .route("/blob_upload", get(upload_form).post(upload))
        .route("/readme", get(readme_get).post(readme_post))
        // downloads
        .route("/use_blobstore/{key}", get(use_blobstore))
        .route("/_ah/gcs/{*path}", get(local_object))
        .route("/blob_files/objects", get(list_object_paths))
        // ACLs
        .route("/insert_acl", get(insert_acl))
        .route("/delete_acl", get(delete_acl))
        .route("/api_insert_acl", get(api_insert_acl))
}
