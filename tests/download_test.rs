//! Ingest-by-identifier integration tests
//!
//! Runs a real HTTP server on an ephemeral port and drives the registry
//! against it:
//! - redirect chains up to and past the redirect limit
//! - cookie propagation between redirect hops
//! - Content-Disposition filenames
//! - status, connection, response and body read failures
//! - DOI resolution through a proxy
//! - rollback when the policy rejects a download

use std::sync::Arc;

use axum::extract::Path as UrlPath;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use stowage::links::DefaultLinkResolver;
use stowage::media::{FetchError, FsBlobStore, StoreConfig, MAX_ALLOWED_REDIRECTS};
use stowage::policy::{PolicyError, StoragePolicy};
use stowage::profiler::{BasicProfiler, Profile};
use stowage::registry::{MediaRegistry, Provenance, RegistryError};

// ---------------------------------------------------------------------------
// Test server
// ---------------------------------------------------------------------------

fn redirect(status: StatusCode, location: &str) -> Response {
    (status, [(header::LOCATION, location.to_string())]).into_response()
}

async fn hop(UrlPath(remaining): UrlPath<u32>) -> Response {
    if remaining == 0 {
        return "arrived".into_response();
    }
    redirect(StatusCode::FOUND, &format!("/hop/{}", remaining - 1))
}

/// Like `hop`, but the last hop points at an unusable location
async fn broken_hop(UrlPath(remaining): UrlPath<u32>) -> Response {
    if remaining == 0 {
        return redirect(StatusCode::FOUND, "ftp://example.com/nowhere");
    }
    redirect(StatusCode::FOUND, &format!("/broken/{}", remaining - 1))
}

async fn set_cookie() -> Response {
    (
        StatusCode::FOUND,
        [
            (header::LOCATION, "/cookie/check".to_string()),
            (
                header::SET_COOKIE,
                "session=abc123; Path=/; HttpOnly".to_string(),
            ),
        ],
    )
        .into_response()
}

async fn check_cookie(headers: HeaderMap) -> Response {
    match headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        Some("session=abc123") => "cookie accepted".into_response(),
        _ => StatusCode::FORBIDDEN.into_response(),
    }
}

async fn named() -> Response {
    (
        [(
            header::CONTENT_DISPOSITION,
            "attachment; filename=\"report.txt\"",
        )],
        "quarterly numbers",
    )
        .into_response()
}

fn app() -> Router {
    Router::new()
        .route("/file.txt", get(|| async { "hello from the server" }))
        .route("/hop/:remaining", get(hop))
        .route("/broken/:remaining", get(broken_hop))
        .route("/cookie/set", get(set_cookie))
        .route("/cookie/check", get(check_cookie))
        .route("/named", get(named))
        .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
        .route(
            "/permanent",
            get(|| async { redirect(StatusCode::PERMANENT_REDIRECT, "/file.txt") }),
        )
        .route(
            "/dir/relative",
            get(|| async { redirect(StatusCode::MOVED_PERMANENTLY, "../file.txt") }),
        )
        .route(
            "/see-other",
            get(|| async { redirect(StatusCode::SEE_OTHER, "/file.txt") }),
        )
        .route(
            "/no-location",
            get(|| async { StatusCode::TEMPORARY_REDIRECT }),
        )
        .route(
            "/doi/*rest",
            get(|| async { redirect(StatusCode::FOUND, "/file.txt") }),
        )
}

/// Start the test server and return its base URL
async fn spawn_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app()).await.unwrap();
    });
    format!("http://{}", addr)
}

/// Start a TCP server that answers every connection with `reply` verbatim,
/// then closes it. Returns its base URL.
async fn spawn_raw_server(reply: &'static [u8]) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = [0u8; 2048];
                let _ = socket.read(&mut request).await;
                let _ = socket.write_all(reply).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{}", addr)
}

struct Harness {
    base: String,
    registry: MediaRegistry,
    blobs: TempDir,
}

impl Harness {
    async fn new() -> Self {
        Self::with_policy(StoragePolicy::default()).await
    }

    async fn with_policy(policy: StoragePolicy) -> Self {
        let base = spawn_server().await;
        let blobs = TempDir::new().unwrap();
        let store = FsBlobStore::new(
            StoreConfig::default().with_base_dir(blobs.path().to_path_buf()),
        )
        .await
        .unwrap();
        let resolver = DefaultLinkResolver::new().with_doi_proxy(format!("{}/doi/", base));
        let registry = MediaRegistry::builder(
            Arc::new(store),
            Arc::new(BasicProfiler::new()),
            Arc::new(policy),
        )
        .resolver(Arc::new(resolver))
        .build();

        Self {
            base,
            registry,
            blobs,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Blob directories on disk, across run directories
    fn blob_count(&self) -> usize {
        std::fs::read_dir(self.blobs.path())
            .unwrap()
            .map(|entry| entry.unwrap().path())
            .filter(|path| path.is_dir())
            .map(|run| std::fs::read_dir(run).unwrap().count())
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_plain_download() {
    let h = Harness::new().await;

    let info = h
        .registry
        .add_by_url(&h.url("/file.txt"), None)
        .await
        .unwrap();
    assert_eq!(info.filename, "file.txt");
    assert!(info.profile.is_text());
    assert_eq!(
        info.source,
        Some(Provenance::Download {
            original_link: h.url("/file.txt"),
            download_link: h.url("/file.txt"),
            redirects: 0,
        })
    );
    assert_eq!(
        h.registry.read_content(info.id).await.unwrap(),
        b"hello from the server"
    );
    assert_eq!(h.registry.get(info.id).unwrap(), info);
}

#[tokio::test]
async fn test_exactly_max_redirects_succeeds() {
    let h = Harness::new().await;

    let info = h
        .registry
        .add_by_url(&h.url(&format!("/hop/{}", MAX_ALLOWED_REDIRECTS)), None)
        .await
        .unwrap();
    match info.source {
        Some(Provenance::Download { redirects, .. }) => assert_eq!(redirects, 5),
        other => panic!("expected download provenance, got {:?}", other),
    }
    assert_eq!(h.registry.read_content(info.id).await.unwrap(), b"arrived");
}

#[tokio::test]
async fn test_too_many_redirects() {
    let h = Harness::new().await;

    let result = h
        .registry
        .add_by_url(&h.url(&format!("/hop/{}", MAX_ALLOWED_REDIRECTS + 1)), None)
        .await;
    assert!(matches!(
        result,
        Err(RegistryError::Fetch(FetchError::TooManyRedirects { max: 5, .. }))
    ));
    assert!(h.registry.is_empty());
    assert_eq!(h.blob_count(), 0);
}

#[tokio::test]
async fn test_redirect_bound_checked_before_location() {
    let h = Harness::new().await;

    // Within the bound, a bad Location is a URL error
    let result = h.registry.add_by_url(&h.url("/broken/0"), None).await;
    assert!(matches!(
        result,
        Err(RegistryError::Fetch(FetchError::BadUrl { .. }))
    ));

    // Past the bound, the redirect count wins
    let result = h
        .registry
        .add_by_url(&h.url(&format!("/broken/{}", MAX_ALLOWED_REDIRECTS)), None)
        .await;
    assert!(matches!(
        result,
        Err(RegistryError::Fetch(FetchError::TooManyRedirects { max: 5, .. }))
    ));
}

#[tokio::test]
async fn test_cookie_is_carried_across_redirect() {
    let h = Harness::new().await;

    let info = h
        .registry
        .add_by_url(&h.url("/cookie/set"), None)
        .await
        .unwrap();
    assert_eq!(
        h.registry.read_content(info.id).await.unwrap(),
        b"cookie accepted"
    );
}

#[tokio::test]
async fn test_content_disposition_names_the_entry() {
    let h = Harness::new().await;

    let info = h.registry.add_by_url(&h.url("/named"), None).await.unwrap();
    assert_eq!(info.filename, "report.txt");
}

#[tokio::test]
async fn test_relative_and_see_other_redirects() {
    let h = Harness::new().await;

    let info = h
        .registry
        .add_by_url(&h.url("/dir/relative"), None)
        .await
        .unwrap();
    assert_eq!(
        h.registry.read_content(info.id).await.unwrap(),
        b"hello from the server"
    );

    let info = h
        .registry
        .add_by_url(&h.url("/see-other"), None)
        .await
        .unwrap();
    assert_eq!(
        h.registry.read_content(info.id).await.unwrap(),
        b"hello from the server"
    );
}

#[tokio::test]
async fn test_status_errors() {
    let h = Harness::new().await;

    let result = h.registry.add_by_url(&h.url("/missing"), None).await;
    assert!(matches!(
        result,
        Err(RegistryError::Fetch(FetchError::Status { status: 404, .. }))
    ));

    // 308 is not followed
    let result = h.registry.add_by_url(&h.url("/permanent"), None).await;
    assert!(matches!(
        result,
        Err(RegistryError::Fetch(FetchError::Status { status: 308, .. }))
    ));
    assert!(h.registry.is_empty());
}

#[tokio::test]
async fn test_redirect_without_location_is_bad_url() {
    let h = Harness::new().await;

    let result = h.registry.add_by_url(&h.url("/no-location"), None).await;
    assert!(matches!(
        result,
        Err(RegistryError::Fetch(FetchError::BadUrl { .. }))
    ));
}

#[tokio::test]
async fn test_connection_refused() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let h = Harness::new().await;
    let result = h
        .registry
        .add_by_url(&format!("http://{}/file.txt", addr), None)
        .await;
    assert!(matches!(
        result,
        Err(RegistryError::Fetch(FetchError::Connection { .. }))
    ));
    assert_eq!(h.blob_count(), 0);
}

#[tokio::test]
async fn test_truncated_body_is_data_stream_error() {
    let raw = spawn_raw_server(
        b"HTTP/1.1 200 OK\r\nContent-Length: 100\r\nConnection: close\r\n\r\nshort!!",
    )
    .await;
    let h = Harness::new().await;

    let result = h
        .registry
        .add_by_url(&format!("{}/file.txt", raw), None)
        .await;
    match result {
        Err(ref e @ RegistryError::Fetch(FetchError::DataStream { ref url, .. })) => {
            assert_eq!(url, &format!("{}/file.txt", raw));
            assert_eq!(e.kind(), "data_stream_error");
        }
        other => panic!("expected a data stream error, got {:?}", other),
    }
    assert!(h.registry.is_empty());
    assert_eq!(h.blob_count(), 0);
}

#[tokio::test]
async fn test_garbage_response_is_response_error() {
    let raw = spawn_raw_server(b"this is not http\r\n\r\n").await;
    let h = Harness::new().await;

    let result = h
        .registry
        .add_by_url(&format!("{}/file.txt", raw), None)
        .await;
    match result {
        Err(ref e @ RegistryError::Fetch(FetchError::Response { .. })) => {
            assert_eq!(e.kind(), "response_error");
        }
        other => panic!("expected a response error, got {:?}", other),
    }
    assert_eq!(h.blob_count(), 0);
}

#[tokio::test]
async fn test_bad_identifier() {
    let h = Harness::new().await;

    let result = h.registry.add_by_url("not an identifier", None).await;
    assert!(matches!(result, Err(RegistryError::BadIdentifier(_))));

    let result = h.registry.add_by_url("ftp://example.com/x", None).await;
    assert!(matches!(result, Err(RegistryError::BadIdentifier(_))));
}

#[tokio::test]
async fn test_doi_goes_through_proxy() {
    let h = Harness::new().await;

    let info = h
        .registry
        .add_by_url("doi:10.1000/182", None)
        .await
        .unwrap();
    assert_eq!(
        info.source,
        Some(Provenance::Download {
            original_link: "doi:10.1000/182".to_string(),
            download_link: h.url("/doi/10.1000/182"),
            redirects: 1,
        })
    );
    assert_eq!(
        h.registry.read_content(info.id).await.unwrap(),
        b"hello from the server"
    );
}

#[tokio::test]
async fn test_declared_media_type_is_primary() {
    let h = Harness::new().await;

    let info = h
        .registry
        .add_by_url(&h.url("/file.txt"), Some(Profile::new("text/x-notes")))
        .await
        .unwrap();
    assert_eq!(info.profile.media_type, "text/x-notes");
    assert!(info
        .alternatives
        .iter()
        .any(|p| p.is_media_type("text/plain")));
}

#[tokio::test]
async fn test_policy_rejection_removes_download() {
    let h =
        Harness::with_policy(StoragePolicy::default().with_allowed_media_types(["application/pdf"]))
            .await;

    let result = h.registry.add_by_url(&h.url("/file.txt"), None).await;
    assert!(matches!(
        result,
        Err(RegistryError::PolicyRejected(PolicyError::MediaTypeNotAllowed(_)))
    ));
    assert!(h.registry.is_empty());
    assert_eq!(h.blob_count(), 0);
}

#[tokio::test]
async fn test_download_then_edit_and_delete() {
    let h = Harness::new().await;

    let info = h
        .registry
        .add_by_url(&h.url("/file.txt"), None)
        .await
        .unwrap();
    let preview = h.registry.preview(info.id).await.unwrap();
    assert_eq!(preview.content, "hello from the server");
    assert!(!preview.incomplete);

    h.registry.set_content(info.id, b"edited").await.unwrap();
    assert_eq!(h.registry.preview(info.id).await.unwrap().content, "edited");

    assert!(h.registry.remove(info.id).await);
    assert!(h.registry.get(info.id).is_none());
    assert_eq!(h.blob_count(), 0);
}
