//! Integration tests for the TUS upload flow.
//!
//! These tests start an in-process server and drive it over HTTP the way a
//! TUS client would.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;

use reqwest::Method;
use reqwest::StatusCode;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use tempfile::TempDir;
use tokio::sync::oneshot;

use tus_server::{Config, OFFSET_CONTENT_TYPE, UploadEngine, router};

/// Session record as returned by the listing endpoint.
#[derive(Debug, Deserialize)]
struct ListedSession {
    id: String,
    declared_length: u64,
    received_offset: u64,
    completed: bool,
    #[serde(default)]
    display_name: Option<String>,
}

/// Test server handle that manages the server lifecycle.
struct TestServer {
    addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl TestServer {
    /// Start a server storing its uploads under `storage`.
    fn start(storage: &Path, max_size: u64) -> Self {
        let runtime = Arc::new(tokio::runtime::Runtime::new().unwrap());

        let config = Config {
            listen_addr: "127.0.0.1:0".parse().unwrap(),
            storage_path: storage.to_path_buf(),
            max_size,
        };
        let engine = runtime
            .block_on(UploadEngine::open(&config))
            .expect("Failed to open upload engine");
        let app = router(engine);

        // Bind to a random available port
        let listener = runtime.block_on(async {
            tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("Failed to bind")
        });
        let addr = listener.local_addr().expect("Failed to get local addr");

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let rt = Arc::clone(&runtime);
        let thread = std::thread::spawn(move || {
            rt.block_on(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async {
                        let _ = shutdown_rx.await;
                    })
                    .await
                    .expect("Server error");
            });
        });

        // Give server a moment to start
        std::thread::sleep(std::time::Duration::from_millis(50));

        TestServer {
            addr,
            shutdown_tx: Some(shutdown_tx),
            thread: Some(thread),
        }
    }

    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn location_url(&self, location: &str) -> String {
        format!("{}{}", self.url(), location)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn create(client: &Client, server: &TestServer, length: u64) -> String {
    let resp = client
        .post(format!("{}/tus", server.url()))
        .header("Tus-Resumable", "1.0.0")
        .header("Upload-Length", length.to_string())
        .send()
        .expect("Create request failed");

    assert_eq!(resp.status(), StatusCode::CREATED);
    resp.headers()["location"]
        .to_str()
        .expect("Location is not text")
        .to_string()
}

fn patch(client: &Client, url: &str, offset: u64, data: &[u8]) -> Response {
    client
        .patch(url)
        .header("Tus-Resumable", "1.0.0")
        .header("Upload-Offset", offset.to_string())
        .header("Content-Type", OFFSET_CONTENT_TYPE)
        .body(data.to_vec())
        .send()
        .expect("Patch request failed")
}

fn offset_of(resp: &Response) -> u64 {
    resp.headers()["upload-offset"]
        .to_str()
        .unwrap()
        .parse()
        .unwrap()
}

fn head_offset(client: &Client, url: &str) -> u64 {
    let resp = client.head(url).send().expect("Head request failed");
    assert_eq!(resp.status(), StatusCode::OK);
    offset_of(&resp)
}

fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

// ============================================================================
// Integration Tests
// ============================================================================

#[test]
fn test_options_advertises_capabilities() {
    let storage = TempDir::new().unwrap();
    let server = TestServer::start(storage.path(), 5000);
    let client = Client::new();

    let resp = client
        .request(Method::OPTIONS, format!("{}/tus", server.url()))
        .send()
        .expect("Options request failed");

    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(resp.headers()["tus-resumable"], "1.0.0");
    assert_eq!(resp.headers()["tus-version"], "1.0.0");
    assert_eq!(resp.headers()["tus-max-size"], "5000");
    assert_eq!(resp.headers()["tus-extension"], "creation");
}

#[test]
fn test_two_chunk_upload_then_download() {
    let storage = TempDir::new().unwrap();
    let server = TestServer::start(storage.path(), 1 << 20);
    let client = Client::new();
    let data = payload(100);

    let location = create(&client, &server, 100);
    let url = server.location_url(&location);

    let resp = patch(&client, &url, 0, &data[..50]);
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(offset_of(&resp), 50);

    let resp = patch(&client, &url, 50, &data[50..]);
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(offset_of(&resp), 100);

    let resp = client.get(&url).send().expect("Download failed");
    assert_eq!(resp.status(), StatusCode::OK);
    let id = location.trim_start_matches("/tus/");
    assert_eq!(
        resp.headers()["content-disposition"],
        format!("attachment; filename=\"{id}\"").as_str()
    );
    assert_eq!(resp.bytes().unwrap().as_ref(), data.as_slice());
}

#[test]
fn test_wrong_offset_is_rejected_and_status_unchanged() {
    let storage = TempDir::new().unwrap();
    let server = TestServer::start(storage.path(), 1 << 20);
    let client = Client::new();

    let location = create(&client, &server, 10);
    let url = server.location_url(&location);

    let resp = patch(&client, &url, 5, b"abcde");
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(head_offset(&client, &url), 0);
}

#[test]
fn test_resume_after_interrupted_chunks() {
    let storage = TempDir::new().unwrap();
    let server = TestServer::start(storage.path(), 1 << 20);
    let client = Client::new();
    let data = payload(10_000);

    let location = create(&client, &server, data.len() as u64);
    let url = server.location_url(&location);

    // Uneven slices; every so often the client "loses" the response and has
    // to ask the server where to continue from.
    let sizes = [1, 777, 4096, 13, 2500, 613];
    let mut offset = 0u64;
    let mut round = 0;
    while offset < data.len() as u64 {
        let size = sizes[round % sizes.len()];
        let end = (offset as usize + size).min(data.len());
        let resp = patch(&client, &url, offset, &data[offset as usize..end]);
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        offset = if round % 2 == 0 {
            head_offset(&client, &url)
        } else {
            offset_of(&resp)
        };
        assert_eq!(offset, end as u64);
        round += 1;
    }

    let body = client.get(&url).send().unwrap().bytes().unwrap();
    assert_eq!(body.as_ref(), data.as_slice());
}

#[test]
fn test_oversized_chunk_leaves_offset_unchanged() {
    let storage = TempDir::new().unwrap();
    let server = TestServer::start(storage.path(), 1 << 20);
    let client = Client::new();

    let location = create(&client, &server, 8);
    let url = server.location_url(&location);
    patch(&client, &url, 0, b"1234");

    let resp = patch(&client, &url, 4, b"5678910");
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(head_offset(&client, &url), 4);

    let resp = patch(&client, &url, 4, b"5678");
    assert_eq!(offset_of(&resp), 8);
}

#[test]
fn test_create_respects_size_ceiling() {
    let storage = TempDir::new().unwrap();
    let server = TestServer::start(storage.path(), 1000);
    let client = Client::new();

    let resp = client
        .post(format!("{}/tus", server.url()))
        .header("Upload-Length", "1001")
        .send()
        .unwrap();
    assert_eq!(resp.status(), StatusCode::PAYLOAD_TOO_LARGE);

    let resp = client
        .post(format!("{}/tus", server.url()))
        .header("Upload-Length", "0")
        .send()
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let resp = client.post(format!("{}/tus", server.url())).send().unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[test]
fn test_download_requires_completion() {
    let storage = TempDir::new().unwrap();
    let server = TestServer::start(storage.path(), 1 << 20);
    let client = Client::new();

    let location = create(&client, &server, 6);
    let url = server.location_url(&location);
    patch(&client, &url, 0, b"abc");

    let resp = client.get(&url).send().unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    patch(&client, &url, 3, b"def");
    let resp = client.get(&url).send().unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.bytes().unwrap().as_ref(), b"abcdef");
}

#[test]
fn test_duplicate_concurrent_chunks_apply_once() {
    let storage = TempDir::new().unwrap();
    let server = TestServer::start(storage.path(), 1 << 20);
    let client = Client::new();
    let data = payload(4096);

    let location = create(&client, &server, data.len() as u64 * 2);
    let url = server.location_url(&location);

    let statuses: Vec<StatusCode> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let client = client.clone();
                let url = url.clone();
                let data = &data;
                scope.spawn(move || patch(&client, &url, 0, data).status())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let accepted = statuses
        .iter()
        .filter(|s| **s == StatusCode::NO_CONTENT)
        .count();
    let conflicts = statuses
        .iter()
        .filter(|s| **s == StatusCode::CONFLICT)
        .count();
    assert_eq!(accepted, 1, "statuses: {statuses:?}");
    assert_eq!(conflicts, 3, "statuses: {statuses:?}");

    assert_eq!(head_offset(&client, &url), data.len() as u64);
    let id = location.trim_start_matches("/tus/");
    let stored = std::fs::read(storage.path().join("uploads").join(id)).unwrap();
    assert_eq!(stored, data);
}

#[test]
fn test_upload_survives_restart() {
    let storage = TempDir::new().unwrap();
    let data = payload(3000);

    let location = {
        let server = TestServer::start(storage.path(), 1 << 20);
        let client = Client::new();
        let location = create(&client, &server, data.len() as u64);
        let resp = patch(&client, &server.location_url(&location), 0, &data[..1200]);
        assert_eq!(offset_of(&resp), 1200);
        location
    };

    let server = TestServer::start(storage.path(), 1 << 20);
    let client = Client::new();
    let url = server.location_url(&location);

    assert_eq!(head_offset(&client, &url), 1200);
    let resp = patch(&client, &url, 1200, &data[1200..]);
    assert_eq!(offset_of(&resp), 3000);

    let body = client.get(&url).send().unwrap().bytes().unwrap();
    assert_eq!(body.as_ref(), data.as_slice());
}

#[test]
fn test_list_and_metadata() {
    let storage = TempDir::new().unwrap();
    let server = TestServer::start(storage.path(), 1 << 20);
    let client = Client::new();

    // "photo.jpg"
    let resp = client
        .post(format!("{}/tus", server.url()))
        .header("Upload-Length", "4")
        .header("Upload-Metadata", "filename cGhvdG8uanBn,filetype aW1hZ2UvanBlZw==")
        .send()
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CREATED);
    let named = resp.headers()["location"].to_str().unwrap().to_string();
    patch(&client, &server.location_url(&named), 0, b"jpeg");

    let unnamed = create(&client, &server, 9);

    let sessions: Vec<ListedSession> = client
        .get(format!("{}/tus/list", server.url()))
        .send()
        .unwrap()
        .json()
        .unwrap();
    assert_eq!(sessions.len(), 2);

    let photo = sessions
        .iter()
        .find(|s| named.ends_with(&s.id))
        .expect("named upload listed");
    assert_eq!(photo.display_name.as_deref(), Some("photo.jpg"));
    assert_eq!(photo.received_offset, 4);
    assert!(photo.completed);

    let other = sessions
        .iter()
        .find(|s| unnamed.ends_with(&s.id))
        .expect("unnamed upload listed");
    assert_eq!(other.declared_length, 9);
    assert!(!other.completed);

    let resp = client.get(server.location_url(&named)).send().unwrap();
    assert_eq!(
        resp.headers()["content-disposition"],
        "attachment; filename=\"photo.jpg\""
    );
}

#[test]
fn test_unknown_upload() {
    let storage = TempDir::new().unwrap();
    let server = TestServer::start(storage.path(), 1 << 20);
    let client = Client::new();

    let url = format!("{}/tus/{}", server.url(), uuid_like());
    assert_eq!(client.head(&url).send().unwrap().status(), StatusCode::NOT_FOUND);
    assert_eq!(patch(&client, &url, 0, b"x").status(), StatusCode::NOT_FOUND);
    assert_eq!(client.get(&url).send().unwrap().status(), StatusCode::NOT_FOUND);

    let url = format!("{}/tus/../../etc/passwd", server.url());
    assert_ne!(client.get(&url).send().unwrap().status(), StatusCode::OK);
}

fn uuid_like() -> &'static str {
    "0123456789abcdef0123456789abcdef"
}
