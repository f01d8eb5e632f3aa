//! Blob file upload service.
//!
//! Uploaded files land in an object bucket, get a metadata record with a
//! serving URL, and are collected into a rolling zip archive. Per-user read
//! ACLs on objects are managed through the storage REST API.

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

use anyhow::{Context, Result};
use axum::Router;
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::{
    config::AppConfig,
    services::{
        access_token::{AccessTokenProvider, MetadataServerTokenProvider, StaticTokenProvider},
        acl::{AclClient, StorageApiClient},
        archive::ArchiveService,
        blob_files::BlobFileService,
        object_store::ObjectStore,
        serving::ServingContext,
        templates::Templates,
    },
};

pub const APP_TITLE: &str = "Blob files";

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub objects: ObjectStore,
    pub blob_files: BlobFileService,
    pub archive: ArchiveService,
    pub acl: AclClient,
    pub storage_api: StorageApiClient,
    pub templates: Arc<Templates>,
}

impl AppState {
    /// Wire every service from `config`, picking the token provider the
    /// configuration asks for.
    pub fn new(config: AppConfig, db: Arc<SqlitePool>) -> Result<Self> {
        let client = http_client(&config)?;
        let tokens = token_provider(&config, client.clone());
        Ok(Self::with_parts(config, db, client, tokens))
    }

    /// Like [`AppState::new`] with an explicit token provider.
    pub fn with_token_provider(
        config: AppConfig,
        db: Arc<SqlitePool>,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Result<Self> {
        let client = http_client(&config)?;
        Ok(Self::with_parts(config, db, client, tokens))
    }

    fn with_parts(
        config: AppConfig,
        db: Arc<SqlitePool>,
        client: reqwest::Client,
        tokens: Arc<dyn AccessTokenProvider>,
    ) -> Self {
        let objects = ObjectStore::new(db.clone(), config.storage_dir.clone());
        let blob_files = BlobFileService::new(
            db,
            objects.clone(),
            config.default_bucket.clone(),
            config.blob_files.utf8_file_extensions.clone(),
        );
        let archive = ArchiveService::new(blob_files.clone(), config.blob_files.clone());
        let acl = AclClient::new(
            client.clone(),
            tokens.clone(),
            config.storage_api_url.clone(),
            config.default_bucket.clone(),
        );
        let storage_api = StorageApiClient::new(client, tokens, config.storage_api_url.clone());

        Self {
            config: Arc::new(config),
            objects,
            blob_files,
            archive,
            acl,
            storage_api,
            templates: Arc::new(Templates::new(APP_TITLE)),
        }
    }

    /// Serving URL settings for one request.
    pub fn serving_context(&self, use_blobstore: Option<&str>) -> ServingContext {
        ServingContext::from_config(&self.config).with_request_flag(use_blobstore)
    }
}

fn http_client(config: &AppConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.request_timeout)
        .build()
        .context("building HTTP client")
}

/// Static token when one is configured, the metadata server otherwise.
pub fn token_provider(
    config: &AppConfig,
    client: reqwest::Client,
) -> Arc<dyn AccessTokenProvider> {
    match &config.access_token {
        Some(token) => Arc::new(StaticTokenProvider::new(token.0.clone())),
        None => Arc::new(MetadataServerTokenProvider::new(
            client,
            config.token_url.clone(),
        )),
    }
}

/// The full router with state attached.
pub fn create_app(state: AppState) -> Router {
    routes::routes::routes().with_state(state)
}
