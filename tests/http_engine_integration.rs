//! Integration tests for the streaming HTTP engine against a mock server.

use std::path::PathBuf;

use tokio::sync::broadcast;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vidqueue_core::{
    FetchEngine, FetchError, FetchMode, FetchRequest, HttpFetchEngine, InterruptSignal, ItemKind,
    ProgressPhase, ProgressReporter, WorkerEvent,
};

fn request_for(url: String, dest_dir: PathBuf) -> FetchRequest {
    FetchRequest {
        url,
        kind: ItemKind::Single,
        mode: FetchMode::Auto,
        dest_dir,
    }
}

fn reporter_with_buffer() -> (ProgressReporter, broadcast::Receiver<WorkerEvent>) {
    let (tx, rx) = broadcast::channel(1024);
    (ProgressReporter::new(tx), rx)
}

fn drain_progress(rx: &mut broadcast::Receiver<WorkerEvent>) -> Vec<vidqueue_core::ProgressUpdate> {
    let mut updates = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let WorkerEvent::Progress(update) = event {
            updates.push(update);
        }
    }
    updates
}

#[tokio::test]
async fn test_download_streams_body_and_reports_progress() {
    let server = MockServer::start().await;
    let body = vec![0xABu8; 256 * 1024];
    Mock::given(method("GET"))
        .and(path("/clip.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
        .mount(&server)
        .await;

    let temp = tempfile::TempDir::new().unwrap();
    let engine = HttpFetchEngine::new();
    let interrupt = InterruptSignal::new();
    let (reporter, mut rx) = reporter_with_buffer();

    let request = request_for(format!("{}/clip.mp4", server.uri()), temp.path().to_path_buf());
    let outcome = engine.run(&request, &interrupt, &reporter).await.unwrap();

    let final_path = temp.path().join("clip.mp4");
    assert_eq!(outcome.output.as_deref(), Some(final_path.as_path()));
    assert_eq!(std::fs::read(&final_path).unwrap(), body);
    // The staging file was renamed away.
    assert!(!temp.path().join("clip.mp4.partial").exists());

    let updates = drain_progress(&mut rx);
    assert!(!updates.is_empty(), "expected progress samples");
    let last = updates.last().unwrap();
    assert_eq!(last.phase, ProgressPhase::Finished);
    assert_eq!(last.fraction, 1.0);
    // Every observed fraction is within bounds.
    assert!(updates.iter().all(|u| (0.0..=1.0).contains(&u.fraction)));
}

#[tokio::test]
async fn test_stop_mid_transfer_reports_partial_and_keeps_final_name_clean() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/clip.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64 * 1024]))
        .mount(&server)
        .await;

    let temp = tempfile::TempDir::new().unwrap();
    let engine = HttpFetchEngine::new();
    let interrupt = InterruptSignal::new();
    // The stop lands at the first checkpoint, after the first chunk.
    interrupt.request_stop();
    let (reporter, _rx) = reporter_with_buffer();

    let request = request_for(format!("{}/clip.mp4", server.uri()), temp.path().to_path_buf());
    let error = engine.run(&request, &interrupt, &reporter).await.unwrap_err();

    let partial_path = temp.path().join("clip.mp4.partial");
    match error {
        FetchError::Stopped { partial } => {
            assert_eq!(partial.as_deref(), Some(partial_path.as_path()));
        }
        other => panic!("expected Stopped, got {other:?}"),
    }
    // The engine leaves the staging file for the controller to clean up, and
    // never exposes a half-written file under the final name.
    assert!(partial_path.exists());
    assert!(!temp.path().join("clip.mp4").exists());
}

#[tokio::test]
async fn test_pause_mid_transfer_leaves_partial_in_place() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/clip.mp4"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 64 * 1024]))
        .mount(&server)
        .await;

    let temp = tempfile::TempDir::new().unwrap();
    let engine = HttpFetchEngine::new();
    let interrupt = InterruptSignal::new();
    interrupt.request_pause();
    let (reporter, _rx) = reporter_with_buffer();

    let request = request_for(format!("{}/clip.mp4", server.uri()), temp.path().to_path_buf());
    let error = engine.run(&request, &interrupt, &reporter).await.unwrap_err();

    assert!(matches!(error, FetchError::Paused));
    assert!(temp.path().join("clip.mp4.partial").exists());
}

#[tokio::test]
async fn test_http_error_status_maps_to_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.mp4"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let temp = tempfile::TempDir::new().unwrap();
    let engine = HttpFetchEngine::new();
    let interrupt = InterruptSignal::new();
    let (reporter, _rx) = reporter_with_buffer();

    let request = request_for(
        format!("{}/missing.mp4", server.uri()),
        temp.path().to_path_buf(),
    );
    let error = engine.run(&request, &interrupt, &reporter).await.unwrap_err();

    match error {
        FetchError::Network { message, .. } => assert!(message.contains("404")),
        other => panic!("expected Network, got {other:?}"),
    }
    assert!(!temp.path().join("missing.mp4").exists());
}

#[tokio::test]
async fn test_unreachable_server_maps_to_network_error() {
    let temp = tempfile::TempDir::new().unwrap();
    let engine = HttpFetchEngine::new();
    let interrupt = InterruptSignal::new();
    let (reporter, _rx) = reporter_with_buffer();

    // Port 1 is essentially never listening.
    let request = request_for(
        "http://127.0.0.1:1/clip.mp4".to_string(),
        temp.path().to_path_buf(),
    );
    let error = engine.run(&request, &interrupt, &reporter).await.unwrap_err();

    assert!(matches!(error, FetchError::Network { .. }));
}
