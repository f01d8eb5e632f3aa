#![allow(dead_code)]

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, Request, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, post},
};
use blob_files::{
    AppState,
    config::{AppConfig, Environment},
    create_app, db,
    models::acl::ObjectAccessControl,
    services::access_token::StaticTokenProvider,
};
use http_body_util::BodyExt;
use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};
use tempfile::TempDir;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};
use tower::ServiceExt;

pub const TEST_TOKEN: &str = "test-token";
pub const TEST_BUCKET: &str = "test-bucket";

/// In-process stand-in for the storage ACL API. Keeps ACL entries keyed by
/// `(object, entity)`.
#[derive(Clone, Default)]
pub struct MockStorageApi {
    acls: Arc<Mutex<BTreeMap<(String, String), ObjectAccessControl>>>,
}

impl MockStorageApi {
    pub fn entries_for(&self, object: &str, entity: &str) -> usize {
        self.acls
            .lock()
            .unwrap()
            .keys()
            .filter(|(o, e)| o == object && e == entity)
            .count()
    }
}

fn authorized(headers: &HeaderMap) -> bool {
    matches!(
        headers.get(header::AUTHORIZATION).and_then(|v| v.to_str().ok()),
        Some(value) if value == format!("OAuth {}", TEST_TOKEN)
            || value == format!("Bearer {}", TEST_TOKEN)
    )
}

async fn insert_acl(
    State(api): State<MockStorageApi>,
    Path((bucket, object)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<ObjectAccessControl>,
) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let Some(e_mail) = body
        .entity
        .strip_prefix("user-")
        .filter(|e| e.contains('@'))
        .map(str::to_string)
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": {"code": 400, "message": "Invalid Value"}})),
        )
            .into_response();
    };
    let entry = ObjectAccessControl {
        kind: Some("storage#objectAccessControl".into()),
        id: Some(format!("{}/{}/{}", bucket, object, body.entity)),
        bucket: Some(bucket),
        object: Some(object.clone()),
        email: Some(e_mail),
        ..body
    };
    api.acls
        .lock()
        .unwrap()
        .insert((object, entry.entity.clone()), entry.clone());
    (StatusCode::OK, Json(entry)).into_response()
}

async fn delete_acl(
    State(api): State<MockStorageApi>,
    Path((_bucket, object, entity)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> StatusCode {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED;
    }
    match api.acls.lock().unwrap().remove(&(object, entity)) {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

/// Serve the mock API on a free local port. Returns its base URL.
pub async fn spawn_storage_api() -> (String, MockStorageApi) {
    let api = MockStorageApi::default();
    let router = Router::new()
        .route("/b/{bucket}/o/{object}/acl", post(insert_acl))
        .route("/b/{bucket}/o/{object}/acl/{entity}", delete(delete_acl))
        .with_state(api.clone());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    (format!("http://{}", addr), api)
}

/// Bare HTTP endpoint that reads each request and closes the first `drops`
/// connections without answering. Later requests get `200 {}`.
/// Returns the base URL and the number of connections accepted.
pub async fn spawn_flaky_api(drops: usize) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let connections = Arc::new(AtomicUsize::new(0));
    let accepted = connections.clone();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let seen = accepted.fetch_add(1, Ordering::SeqCst);
            read_request(&mut stream).await;
            if seen < drops {
                continue;
            }
            let _ = stream
                .write_all(
                    b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\
                      Content-Length: 2\r\nConnection: close\r\n\r\n{}",
                )
                .await;
            let _ = stream.shutdown().await;
        }
    });
    (format!("http://{}", addr), connections)
}

/// Read headers and a `Content-Length` body.
async fn read_request(stream: &mut TcpStream) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 1024];
    loop {
        let n = match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        buf.extend_from_slice(&chunk[..n]);
        let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
        let body_len = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if buf.len() >= end + 4 + body_len {
            return;
        }
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub api: MockStorageApi,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let (api_url, api) = spawn_storage_api().await;

        let readme_path = dir.path().join("README.md");
        std::fs::write(&readme_path, "# Blob files\n\nUpload *anything*.\n").unwrap();

        let mut cfg = AppConfig {
            storage_dir: dir.path().join("objects").to_string_lossy().into_owned(),
            default_bucket: TEST_BUCKET.into(),
            environment: Environment::Development,
            readme_path: readme_path.to_string_lossy().into_owned(),
            image_serving_url: "https://images.example".into(),
            storage_api_url: api_url,
            ..AppConfig::default()
        };
        adjust(&mut cfg);

        let pool = db::connect_in_memory().await.unwrap();
        let state = AppState::with_token_provider(
            cfg,
            pool,
            Arc::new(StaticTokenProvider::new(TEST_TOKEN)),
        )
        .unwrap();
        Self {
            router: create_app(state.clone()),
            state,
            api,
            _dir: dir,
        }
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response {
        self.send(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
    }

    /// POST `/blob_upload` with a single file field.
    pub async fn upload(&self, filename: &str, data: &[u8], use_blobstore: Option<&str>) -> Response {
        let boundary = "X-BLOB-FILES-BOUNDARY";
        let body = multipart_body(boundary, filename, data, use_blobstore);
        self.send(
            Request::builder()
                .method("POST")
                .uri("/blob_upload")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", boundary),
                )
                .body(Body::from(body))
                .unwrap(),
        )
        .await
    }
}

pub fn multipart_body(
    boundary: &str,
    filename: &str,
    data: &[u8],
    use_blobstore: Option<&str>,
) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(flag) = use_blobstore {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"use_blobstore\"\r\n\r\n{}\r\n",
                boundary, flag
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n\
             Content-Type: application/octet-stream\r\n\r\n",
            boundary, filename
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", boundary).as_bytes());
    body
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_text(response: Response) -> String {
    String::from_utf8(body_bytes(response).await).unwrap()
}

/// Value of the first `href` that starts with `prefix`, HTML-unescaped.
pub fn find_href(page: &str, prefix: &str) -> Option<String> {
    let needle = format!("href=\"{}", prefix);
    let start = page.find(&needle)? + "href=\"".len();
    let end = start + page[start..].find('"')?;
    Some(page[start..end].replace("&amp;", "&"))
}
