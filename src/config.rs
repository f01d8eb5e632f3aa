use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{collections::BTreeSet, env, fmt, str::FromStr, time::Duration};

pub const DEFAULT_ARCHIVE_PATH: &str = "/archives/BlobFiles.zip";
pub const DEFAULT_UPLOAD_FOLDER: &str = "/upload";
pub const DEFAULT_UTF_8_FILE_EXTENSIONS: [&str; 7] =
    ["js", "css", "html", "txt", "text", "py", "xml"];

/// Where the process runs. Decides which direct object URL is handed out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => bail!("unknown environment `{}`", other),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Development => write!(f, "development"),
            Self::Production => write!(f, "production"),
        }
    }
}

/// A credential that never shows up in logs.
#[derive(Clone)]
pub struct Secret(pub String);

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(***)")
    }
}

/// Feature flags for blob file handling.
#[derive(Debug, Clone)]
pub struct BlobFilesConfig {
    /// Serve non-image files through the `/use_blobstore` download proxy.
    pub use_blobstore: bool,
    /// Object path of the rolling zip archive, e.g. `/archives/BlobFiles.zip`.
    pub archive_path: String,
    /// Extensions whose content type gets `; charset=utf-8` appended.
    pub utf8_file_extensions: BTreeSet<String>,
}

impl Default for BlobFilesConfig {
    fn default() -> Self {
        Self {
            use_blobstore: true,
            archive_path: DEFAULT_ARCHIVE_PATH.into(),
            utf8_file_extensions: DEFAULT_UTF_8_FILE_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
        }
    }
}

impl BlobFilesConfig {
    /// Split `archive_path` into `(folder, file name)` at the last `/`.
    pub fn archive_location(&self) -> (&str, &str) {
        match self.archive_path.rsplit_once('/') {
            Some((folder, file)) => (folder, file),
            None => ("", self.archive_path.as_str()),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    pub default_bucket: String,
    pub environment: Environment,
    pub upload_folder: String,
    pub readme_path: String,
    pub image_serving_url: String,
    pub storage_api_url: String,
    pub token_url: String,
    pub access_token: Option<Secret>,
    pub request_timeout: Duration,
    pub blob_files: BlobFilesConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            storage_dir: "./data/objects".into(),
            database_url: "sqlite://./data/meta/blob_files.db".into(),
            default_bucket: "app-default-bucket".into(),
            environment: Environment::Development,
            upload_folder: DEFAULT_UPLOAD_FOLDER.into(),
            readme_path: "README.md".into(),
            image_serving_url: "https://lh3.googleusercontent.com".into(),
            storage_api_url: "https://www.googleapis.com/storage/v1".into(),
            token_url: "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token".into(),
            access_token: None,
            request_timeout: Duration::from_secs(10),
            blob_files: BlobFilesConfig::default(),
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Blob file upload and archive service")]
pub struct Args {
    /// Host to bind to (overrides BLOB_FILES_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides BLOB_FILES_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where object payloads are stored (overrides BLOB_FILES_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides BLOB_FILES_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Default bucket name (overrides BLOB_FILES_DEFAULT_BUCKET)
    #[arg(long)]
    pub default_bucket: Option<String>,

    /// `development` or `production` (overrides BLOB_FILES_ENVIRONMENT)
    #[arg(long)]
    pub environment: Option<Environment>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let defaults = Self::default();

        // --- Environment fallback ---
        let env_port = match env::var("BLOB_FILES_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing BLOB_FILES_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => defaults.port,
            Err(err) => return Err(err).context("reading BLOB_FILES_PORT"),
        };
        let env_environment = match env::var("BLOB_FILES_ENVIRONMENT") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.environment,
        };
        let request_timeout = match env::var("BLOB_FILES_REQUEST_TIMEOUT_SECS") {
            Ok(value) => Duration::from_secs(value.parse::<u64>().with_context(|| {
                format!("parsing BLOB_FILES_REQUEST_TIMEOUT_SECS value `{}`", value)
            })?),
            Err(_) => defaults.request_timeout,
        };

        let mut blob_files = BlobFilesConfig::default();
        if let Ok(value) = env::var("USE_BLOBSTORE") {
            blob_files.use_blobstore = parse_flag(&value)
                .with_context(|| format!("parsing USE_BLOBSTORE value `{}`", value))?;
        }
        if let Ok(value) = env::var("ARCHIVE_PATH") {
            if !value.starts_with('/') || value.ends_with('/') {
                bail!("ARCHIVE_PATH must look like `/<folder>/<name>.zip`, got `{}`", value);
            }
            blob_files.archive_path = value;
        }
        if let Ok(value) = env::var("UTF_8_FILE_EXTENSIONS") {
            blob_files.utf8_file_extensions = parse_extensions(&value);
        }

        // --- Merge ---
        let cfg = Self {
            host: args
                .host
                .unwrap_or_else(|| env_or("BLOB_FILES_HOST", defaults.host)),
            port: args.port.unwrap_or(env_port),
            storage_dir: args
                .storage_dir
                .unwrap_or_else(|| env_or("BLOB_FILES_STORAGE_DIR", defaults.storage_dir)),
            database_url: args
                .database_url
                .unwrap_or_else(|| env_or("BLOB_FILES_DATABASE_URL", defaults.database_url)),
            default_bucket: args
                .default_bucket
                .unwrap_or_else(|| env_or("BLOB_FILES_DEFAULT_BUCKET", defaults.default_bucket)),
            environment: args.environment.unwrap_or(env_environment),
            upload_folder: env_or("BLOB_FILES_UPLOAD_FOLDER", defaults.upload_folder),
            readme_path: env_or("BLOB_FILES_README", defaults.readme_path),
            image_serving_url: env_or("BLOB_FILES_IMAGE_SERVING_URL", defaults.image_serving_url),
            storage_api_url: env_or("BLOB_FILES_STORAGE_API_URL", defaults.storage_api_url),
            token_url: env_or("BLOB_FILES_TOKEN_URL", defaults.token_url),
            access_token: env::var("BLOB_FILES_ACCESS_TOKEN").ok().map(Secret),
            request_timeout,
            blob_files,
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn env_or(name: &str, default: String) -> String {
    env::var(name).unwrap_or(default)
}

/// Accepts the usual spellings plus the `T`/`F` form used by the upload form.
pub fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "t" | "true" | "1" | "yes" | "on" => Ok(true),
        "f" | "false" | "0" | "no" | "off" => Ok(false),
        other => bail!("not a boolean: `{}`", other),
    }
}

fn parse_extensions(value: &str) -> BTreeSet<String> {
    value
        .split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}
