//! Serving URL selection for blob file records.

use crate::{
    config::{AppConfig, Environment},
    models::blob_file::BlobFile,
};
use chrono::Utc;
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};

/// Extensions the image service can serve dynamically.
pub const IMAGE_EXTENSIONS: [&str; 7] = ["jpeg", "jpg", "png", "gif", "bmp", "tiff", "ico"];

const PUBLIC_STORAGE_URL: &str = "https://storage.googleapis.com";
const LOCAL_STORAGE_ROUTE: &str = "/_ah/gcs";
pub const BLOBSTORE_ROUTE: &str = "/use_blobstore";

/// Everything that decides which serving URL a record gets.
#[derive(Debug, Clone)]
pub struct ServingContext {
    pub use_blobstore: bool,
    pub environment: Environment,
    pub image_serving_url: String,
}

impl ServingContext {
    pub fn from_config(cfg: &AppConfig) -> Self {
        Self {
            use_blobstore: cfg.blob_files.use_blobstore,
            environment: cfg.environment,
            image_serving_url: cfg.image_serving_url.clone(),
        }
    }

    /// Apply a per-request `use_blobstore` form value. Only `T` enables blob
    /// serving; any other value disables it; no value keeps the configured one.
    pub fn with_request_flag(mut self, flag: Option<&str>) -> Self {
        if let Some(value) = flag {
            self.use_blobstore = value == "T";
        }
        self
    }
}

/// Pick the serving URL for `record`.
///
/// Images always go through the image service, then the download proxy when
/// enabled, then the environment's direct object URL.
pub fn serving_url(record: &BlobFile, ctx: &ServingContext) -> String {
    if IMAGE_EXTENSIONS.contains(&record.extension().as_str()) {
        image_serving_url(&ctx.image_serving_url, &record.storage_key())
    } else if ctx.use_blobstore {
        format!(
            "{}/{}?save_as={}",
            BLOBSTORE_ROUTE,
            record.storage_key(),
            utf8_percent_encode(&record.filename, NON_ALPHANUMERIC)
        )
    } else if ctx.environment == Environment::Development {
        format!("{}{}", LOCAL_STORAGE_ROUTE, record.gcs_filename)
    } else {
        format!("{}{}", PUBLIC_STORAGE_URL, record.gcs_filename)
    }
}

/// Return `record` ready to persist: fresh serving URL and modified time.
pub fn prepare_for_save(mut record: BlobFile, ctx: &ServingContext) -> BlobFile {
    record.serving_url = serving_url(&record, ctx);
    record.modified = Utc::now();
    record
}

/// Secure image URL keyed by storage key.
fn image_serving_url(base: &str, storage_key: &str) -> String {
    let base = base.trim_end_matches('/');
    let base = match base.strip_prefix("http://") {
        Some(rest) => format!("https://{}", rest),
        None => base.to_string(),
    };
    format!("{}/{}", base, storage_key)
}
