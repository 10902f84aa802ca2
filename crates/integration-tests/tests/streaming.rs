//! Streaming behavior against a mock Kobold server

mod harness;

use std::sync::Arc;

use axum::http::StatusCode;
use futures_util::StreamExt;
use harness::mock_kobold::{MockKobold, Scripted};
use relay_pipeline::provider::kobold::RetryConfig;
use relay_pipeline::{Backend, BackendPipeline, BackendSlot, CompletionRequest, ErrorKind, KoboldBackend};
use url::Url;

fn backend(name: &str, mock: &MockKobold) -> Arc<dyn Backend> {
    let url = Url::parse(&mock.base_url()).unwrap();
    Arc::new(KoboldBackend::new(name, url).with_retry(RetryConfig { max_retries: 1 }))
}

fn streaming_request() -> CompletionRequest {
    let mut request = CompletionRequest::new("hi");
    request.stream = true;
    request
}

#[tokio::test]
async fn chunks_are_forwarded_in_order() {
    let mock = MockKobold::start().await.unwrap();
    mock.push_chat(Scripted::sse_chat(&["hel", "lo"]));

    let pipeline = BackendPipeline::new(vec![BackendSlot::new(backend("mock", &mock))]).unwrap();
    let events: Vec<_> = pipeline.stream(streaming_request()).collect().await;

    let chunks: Vec<_> = events.into_iter().map(Result::unwrap).collect();
    let deltas: Vec<_> = chunks.iter().map(|c| c.delta.as_str()).collect();
    assert_eq!(deltas, vec!["hel", "lo", ""]);
    assert!(chunks.last().unwrap().done);
}

#[tokio::test]
async fn stream_open_failure_falls_over_to_backup() {
    let primary = MockKobold::start().await.unwrap();
    primary.push_chat(Scripted::status(StatusCode::INTERNAL_SERVER_ERROR));
    primary.push_completion(Scripted::status(StatusCode::INTERNAL_SERVER_ERROR));
    let backup = MockKobold::start().await.unwrap();
    backup.push_chat(Scripted::sse_chat(&["from backup"]));

    let pipeline = BackendPipeline::new(vec![
        BackendSlot::new(backend("primary", &primary)),
        BackendSlot::new(backend("backup", &backup)),
    ])
    .unwrap();

    let events: Vec<_> = pipeline.stream(streaming_request()).collect().await;
    let chunks: Vec<_> = events.into_iter().map(Result::unwrap).collect();

    assert_eq!(chunks[0].delta, "from backup");
    assert!(chunks.last().unwrap().done);
    assert_eq!(primary.chat_count(), 1);
    assert_eq!(primary.completion_count(), 1);
}

#[tokio::test]
async fn stream_auth_failure_yields_single_error() {
    let mock = MockKobold::start().await.unwrap();
    mock.push_chat(Scripted::status(StatusCode::UNAUTHORIZED));

    let pipeline = BackendPipeline::new(vec![BackendSlot::new(backend("mock", &mock))]).unwrap();
    let events: Vec<_> = pipeline.stream(streaming_request()).collect().await;

    assert_eq!(events.len(), 1);
    let error = events.into_iter().next().unwrap().unwrap_err();
    assert_eq!(error.kind, ErrorKind::ApiAuthenticationError);
    assert_eq!(mock.completion_count(), 0);
}
