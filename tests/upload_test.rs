mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode, header},
};
use blob_files::{
    config::Environment,
    handlers::upload_handlers::{NO_FILE_DATA, OVERWRITE_BLOCKED},
};
use common::{TEST_BUCKET, TestApp, body_bytes, body_text, find_href};
use std::io::{Cursor, Read};

/// Entry names and contents of the stored archive.
async fn archive_entries(app: &TestApp) -> Vec<(String, Vec<u8>)> {
    let record = app
        .state
        .blob_files
        .get("BlobFiles.zip")
        .await
        .unwrap()
        .expect("archive record");
    let data = app.state.blob_files.read(&record).await.unwrap().unwrap();
    let mut zip = zip::ZipArchive::new(Cursor::new(data)).unwrap();
    let mut entries = Vec::new();
    for i in 0..zip.len() {
        let mut file = zip.by_index(i).unwrap();
        let mut content = Vec::new();
        file.read_to_end(&mut content).unwrap();
        entries.push((file.name().to_string(), content));
    }
    entries
}

#[tokio::test]
async fn upload_form_is_served() {
    let app = TestApp::new().await;

    let response = app.get("/blob_upload").await;

    assert_eq!(response.status(), StatusCode::OK);
    let page = body_text(response).await;
    assert!(page.contains(r#"enctype="multipart/form-data""#));
    assert!(page.contains(r#"name="use_blobstore" value="T" checked"#));
}

#[tokio::test]
async fn uploads_are_collected_in_the_archive() {
    let app = TestApp::new().await;

    let page = body_text(app.upload("a.txt", b"alpha", None).await).await;
    assert!(page.contains("Upload finished"));
    assert!(page.contains("a.txt"));
    assert!(page.contains("BlobFiles.zip"));

    let page = body_text(app.upload("b.txt", b"bravo", None).await).await;
    assert!(page.contains("b.txt"));

    let entries = archive_entries(&app).await;
    assert_eq!(
        entries,
        vec![
            ("a.txt".to_string(), b"alpha".to_vec()),
            ("b.txt".to_string(), b"bravo".to_vec()),
        ]
    );

    let archive = app.state.blob_files.get("BlobFiles.zip").await.unwrap().unwrap();
    let meta = app.state.blob_files.stat(&archive).await.unwrap();
    assert_eq!(meta.content_type.as_deref(), Some("multipart/x-zip"));
    assert_eq!(meta.cache_control.as_deref(), Some("private, max-age=0, no-cache"));
    assert_eq!(meta.acl.as_deref(), Some("public-read"));
}

#[tokio::test]
async fn reupload_replaces_the_archive_entry() {
    let app = TestApp::new().await;

    app.upload("a.txt", b"first", None).await;
    app.upload("a.txt", b"second", None).await;

    assert_eq!(
        archive_entries(&app).await,
        vec![("a.txt".to_string(), b"second".to_vec())]
    );
}

#[tokio::test]
async fn upload_records_object_path_and_content_type() {
    let app = TestApp::new().await;

    app.upload("docs/notes.txt", b"hello", None).await;

    let record = app.state.blob_files.get("notes.txt").await.unwrap().unwrap();
    assert_eq!(record.folder, "/upload");
    assert_eq!(record.gcs_filename, format!("/{}/upload/notes.txt", TEST_BUCKET));
    assert!(record.serving_url.starts_with("/use_blobstore/"));
    assert!(record.serving_url.ends_with("?save_as=notes%2Etxt"));

    let meta = app.state.blob_files.stat(&record).await.unwrap();
    assert_eq!(meta.content_type.as_deref(), Some("text/plain; charset=utf-8"));
    assert_eq!(meta.size_bytes, 5);
}

#[tokio::test]
async fn upload_link_downloads_the_file() {
    let app = TestApp::new().await;

    let page = body_text(app.upload("a.txt", b"alpha", Some("T")).await).await;
    let url = find_href(&page, "/use_blobstore/").expect("download link");

    let response = app.get(&url).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_DISPOSITION],
        "attachment; filename=\"a.txt\"; filename*=UTF-8''a%2Etxt"
    );
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "text/plain; charset=utf-8"
    );
    assert_eq!(body_bytes(response).await, b"alpha");
}

#[tokio::test]
async fn direct_urls_are_served_in_development() {
    let app = TestApp::new().await;

    let page = body_text(app.upload("c.txt", b"charlie", Some("F")).await).await;
    let expected = format!("/_ah/gcs/{}/upload/c.txt", TEST_BUCKET);
    assert!(page.contains(&expected));
    assert!(page.contains("Blobstore serving: off"));

    let response = app.get(&expected).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_bytes(response).await, b"charlie");
}

#[tokio::test]
async fn direct_urls_point_at_public_storage_in_production() {
    let app = TestApp::with_config(|cfg| cfg.environment = Environment::Production).await;

    let page = body_text(app.upload("c.txt", b"charlie", Some("F")).await).await;
    assert!(page.contains(&format!(
        "https://storage.googleapis.com/{}/upload/c.txt",
        TEST_BUCKET
    )));

    let response = app
        .get(&format!("/_ah/gcs/{}/upload/c.txt", TEST_BUCKET))
        .await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn images_are_served_by_the_image_service() {
    let app = TestApp::new().await;

    app.upload("pic.png", b"\x89PNG", Some("T")).await;

    let record = app.state.blob_files.get("pic.png").await.unwrap().unwrap();
    assert!(record.serving_url.starts_with("https://images.example/"));
    assert!(!record.serving_url.contains("save_as"));
}

#[tokio::test]
async fn overwrite_from_another_folder_is_blocked() {
    let app = TestApp::new().await;
    let ctx = app.state.serving_context(None);

    let other = app
        .state
        .blob_files
        .create("a.txt", None, "/other")
        .await
        .unwrap()
        .unwrap();
    app.state
        .blob_files
        .save(&blob_files::services::serving::prepare_for_save(other, &ctx))
        .await
        .unwrap();

    let page = body_text(app.upload("a.txt", b"alpha", None).await).await;

    assert!(page.contains(OVERWRITE_BLOCKED));
    let record = app.state.blob_files.get("a.txt").await.unwrap().unwrap();
    assert_eq!(record.folder, "/other");
    assert!(app.state.blob_files.get("BlobFiles.zip").await.unwrap().is_none());
}

#[tokio::test]
async fn archive_name_is_reserved() {
    let app = TestApp::new().await;

    let response = app.upload("BlobFiles.zip", b"not a zip", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains(OVERWRITE_BLOCKED));
    assert!(app.state.blob_files.get("BlobFiles.zip").await.unwrap().is_none());

    let response = app.upload("a.txt", b"alpha", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Upload finished"));

    let archive = app.state.blob_files.get("BlobFiles.zip").await.unwrap().unwrap();
    assert_eq!(
        archive.gcs_filename,
        format!("/{}/archives/BlobFiles.zip", TEST_BUCKET)
    );
    assert_eq!(
        archive_entries(&app).await,
        vec![("a.txt".to_string(), b"alpha".to_vec())]
    );
}

#[tokio::test]
async fn empty_upload_reports_missing_data() {
    let app = TestApp::new().await;

    let response = app.upload("empty.txt", b"", None).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains(NO_FILE_DATA));
    assert!(app.state.blob_files.get("empty.txt").await.unwrap().is_none());
}

#[tokio::test]
async fn unknown_blob_key_renders_the_fatal_page() {
    let app = TestApp::new().await;

    let response = app.get("/use_blobstore/not-a-key").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(body_text(response).await.contains("A fatal error occurred."));
}

#[tokio::test]
async fn object_listing_pairs_paths_with_filenames() {
    let app = TestApp::new().await;
    app.upload("a.txt", b"alpha", None).await;
    app.upload("b.txt", b"bravo", None).await;

    let response = app.get("/blob_files/objects?folder=/upload").await;
    assert_eq!(response.status(), StatusCode::OK);
    let entries: serde_json::Value = serde_json::from_slice(&body_bytes(response).await).unwrap();

    assert_eq!(
        entries,
        serde_json::json!([
            {"gcs_filename": format!("/{}/upload/a.txt", TEST_BUCKET), "filename": "a.txt"},
            {"gcs_filename": format!("/{}/upload/b.txt", TEST_BUCKET), "filename": "b.txt"},
        ])
    );
}

#[tokio::test]
async fn readme_is_rendered_below_the_form() {
    let app = TestApp::new().await;

    let page = body_text(app.get("/readme").await).await;
    assert!(page.contains("<h1>Blob files</h1>"));
    assert!(page.contains("<em>anything</em>"));

    let response = app
        .send(
            Request::builder()
                .method("POST")
                .uri("/readme")
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(Body::from("use_blobstore=F"))
                .unwrap(),
        )
        .await;
    let page = body_text(response).await;
    assert!(page.contains(r#"name="use_blobstore" value="F" checked"#));
    assert!(page.contains("<em>anything</em>"));
}

#[tokio::test]
async fn missing_readme_is_not_found() {
    let app = TestApp::with_config(|cfg| cfg.readme_path = "/nonexistent/README.md".into()).await;

    let response = app.get("/readme").await;

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn health_endpoints() {
    let app = TestApp::new().await;

    assert_eq!(app.get("/healthz").await.status(), StatusCode::OK);
    assert_eq!(app.get("/readyz").await.status(), StatusCode::OK);
}
