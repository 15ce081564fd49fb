//! Black-box checks of the orchestrator's throttling behavior.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::FlakyProvider;
use wayfinder::errors::NavigationError;
use wayfinder::llm::{ChatMessage, LlmMode, LlmProvider, Orchestrator};

#[tokio::test]
async fn rate_limited_request_retries_once_after_a_second() {
    let provider = Arc::new(FlakyProvider::new(vec![NavigationError::Provider(
        "429 Too Many Requests: rate limit exceeded".to_string(),
    )]));
    let orchestrator = Orchestrator::single(Arc::clone(&provider) as Arc<dyn LlmProvider>);

    let started = Instant::now();
    let response = orchestrator
        .send_with_mode(LlmMode::Fast, &[ChatMessage::user("hello")], None)
        .await
        .unwrap();

    assert_eq!(response.content, "recovered");
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
    assert!(started.elapsed() >= Duration::from_secs(1));
}

#[tokio::test]
async fn persistent_throttling_propagates_after_one_retry() {
    let provider = Arc::new(FlakyProvider::new(vec![
        NavigationError::RateLimited("slow down".to_string()),
        NavigationError::RateLimited("still throttled".to_string()),
    ]));
    let orchestrator = Orchestrator::single(Arc::clone(&provider) as Arc<dyn LlmProvider>);

    let result = orchestrator
        .send_with_mode(LlmMode::Default, &[ChatMessage::user("hello")], None)
        .await;

    assert!(matches!(result, Err(NavigationError::RateLimited(_))));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn ordinary_provider_errors_do_not_retry() {
    let provider = Arc::new(FlakyProvider::new(vec![NavigationError::Provider(
        "bad request".to_string(),
    )]));
    let orchestrator = Orchestrator::single(Arc::clone(&provider) as Arc<dyn LlmProvider>);

    let result = orchestrator
        .send_with_mode(LlmMode::Fast, &[ChatMessage::user("hello")], None)
        .await;

    assert!(result.is_err());
    assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
}
