//! Built-in and user plugins driving real crawls

use crate::{html, test_config, Recorder};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sumi_weave::crawler::{Crawler, Task};
use sumi_weave::plugin::{AttemptPolicy, Flow, HookPosition, Plugin};
use sumi_weave::CrawlError;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_attempt_retries_then_drops() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(500))
        .expect(3)
        .mount(&mock_server)
        .await;

    let mut config = test_config();
    config.attempt.max_retries = 2;
    let crawler = Crawler::new(config).await.unwrap();

    let task = crawler
        .add(format!("{}/flaky", mock_server.uri()))
        .await
        .unwrap();

    assert!(task.dropped);
    assert_eq!(task.retries(), 3);
    assert_eq!(task.error.as_ref().and_then(|e| e.status()), Some(500));
}

#[tokio::test]
async fn test_attempt_recovers_after_transient_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/recovering"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/recovering"))
        .respond_with(html("<h1>Back</h1>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = test_config();
    config.attempt.max_retries = 3;
    let crawler = Crawler::new(config).await.unwrap();

    let task = crawler
        .add(format!("{}/recovering", mock_server.uri()))
        .await
        .unwrap();

    assert!(!task.dropped);
    assert!(task.error.is_none());
    assert_eq!(task.retries(), 1);
    assert_eq!(task.response.map(|r| r.status), Some(200));
}

#[tokio::test]
async fn test_allowed_status_is_a_success() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(410).set_body_raw("<h1>Gone</h1>", "text/html"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = test_config();
    config.attempt.max_retries = 5;
    let crawler = Crawler::new(config).await.unwrap();

    let task = crawler
        .add(
            Task::new(format!("{}/gone", mock_server.uri()))
                .with_attempt(AttemptPolicy::new(5).allow_status(410))
                .with_rule(sumi_weave::Rule::parse("h1").unwrap()),
        )
        .await
        .unwrap();

    assert!(!task.dropped);
    assert!(task.error.is_none());
    assert_eq!(task.extracted, Some(serde_json::json!("Gone")));
}

#[tokio::test]
async fn test_attempt_override_can_stop_early() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/teapot"))
        .respond_with(ResponseTemplate::new(418))
        .expect(1)
        .mount(&mock_server)
        .await;

    let crawler = Crawler::new(test_config()).await.unwrap();

    let policy = AttemptPolicy::new(10).with_override(|task, should_retry| {
        let teapot = task.error.as_ref().and_then(|e| e.status()) == Some(418);
        (should_retry && teapot).then_some(Flow::Drop)
    });
    let task = crawler
        .add(Task::new(format!("{}/teapot", mock_server.uri())).with_attempt(policy))
        .await
        .unwrap();

    assert!(task.dropped);
    assert_eq!(task.retries(), 1);
}

#[tokio::test]
async fn test_dup_filter_skips_equivalent_urls() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(html("<p>page</p>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = test_config();
    config.crawler.concurrency = 1;
    let crawler = Crawler::new(config).await.unwrap();

    let base = mock_server.uri();
    let first = crawler.add(format!("{}/page", base));
    let second = crawler.add(format!("{}/page/?utm_source=feed", base));

    let (first, second) = (first.await.unwrap(), second.await.unwrap());
    assert_ne!(first.id(), second.id());
    assert!(!first.cancelled);
    assert!(second.cancelled);
    assert!(second.response.is_none());
}

#[tokio::test]
async fn test_failed_url_can_be_submitted_again() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/unstable"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/unstable"))
        .respond_with(html("<p>fine</p>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let crawler = Crawler::new(test_config()).await.unwrap();
    let url = format!("{}/unstable", mock_server.uri());

    let failed = crawler.add(url.as_str()).await.unwrap();
    assert!(failed.dropped);

    let retried = crawler.add(url.as_str()).await.unwrap();
    assert!(!retried.dropped);
    assert!(!retried.cancelled);
    assert_eq!(retried.response.map(|r| r.status), Some(200));
}

#[tokio::test]
async fn test_dup_filter_can_be_disabled() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/twice"))
        .respond_with(html("<p>again</p>"))
        .expect(2)
        .mount(&mock_server)
        .await;

    let mut config = test_config();
    config.plugins.dup_filter = false;
    let crawler = Crawler::new(config).await.unwrap();
    assert!(!crawler.has_plugin("dup-filter"));

    let url = format!("{}/twice", mock_server.uri());
    assert!(!crawler.add(url.as_str()).await.unwrap().cancelled);
    assert!(!crawler.add(url.as_str()).await.unwrap().cancelled);
}

#[tokio::test]
async fn test_cancel_in_before_skips_fetch() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/private"))
        .respond_with(html("<p>secret</p>"))
        .expect(0)
        .mount(&mock_server)
        .await;

    let recorder = Recorder::default();
    let crawler = Crawler::builder(test_config())
        .plugin(recorder.plugin())
        .plugin(Plugin::new("gate").with_priority(500).before_fn(|task| {
            if task.url.contains("/private") {
                task.cancel();
            }
            Ok(())
        }))
        .build()
        .await
        .unwrap();

    let called = Arc::new(AtomicUsize::new(0));
    let counter = called.clone();
    let task = crawler
        .add(
            Task::new(format!("{}/private", mock_server.uri())).on_complete(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .await
        .unwrap();

    assert!(task.cancelled);
    assert!(task.response.is_none());
    assert!(recorder.tasks().is_empty());
    assert_eq!(called.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_failing_hook_rejects_the_future() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(html("<p>ok</p>"))
        .mount(&mock_server)
        .await;

    let crawler = Crawler::builder(test_config())
        .plugin(
            Plugin::new("strict")
                .after_fn(|_| Err(anyhow::anyhow!("page rejected"))),
        )
        .build()
        .await
        .unwrap();

    let error = crawler
        .add(format!("{}/any", mock_server.uri()))
        .await
        .unwrap_err();

    match error.as_ref() {
        CrawlError::Hook {
            position, plugin, ..
        } => {
            assert_eq!(*position, HookPosition::After);
            assert_eq!(plugin, "strict");
        }
        other => panic!("unexpected error: {}", other),
    }

    // The crawler keeps working after a rejected task
    crawler.remove_plugin("strict");
    assert!(crawler.add(format!("{}/other", mock_server.uri())).await.is_ok());
}

#[tokio::test]
async fn test_runtime_plugins_see_later_tasks() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(html("<p>ok</p>"))
        .mount(&mock_server)
        .await;

    let crawler = Crawler::new(test_config()).await.unwrap();
    let recorder = Recorder::default();
    crawler.use_plugin(recorder.plugin()).await.unwrap();

    let duplicate = crawler.use_plugin(recorder.plugin()).await;
    assert!(matches!(duplicate, Err(CrawlError::DuplicatePlugin { .. })));

    crawler
        .add(format!("{}/seen", mock_server.uri()))
        .await
        .unwrap();
    assert_eq!(recorder.tasks().len(), 1);

    assert!(crawler.remove_plugin("recorder"));
    crawler
        .add(format!("{}/unseen", mock_server.uri()))
        .await
        .unwrap();
    assert_eq!(recorder.tasks().len(), 1);
}

#[tokio::test]
async fn test_task_delay_waits_before_fetch() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(html("<p>ok</p>"))
        .mount(&mock_server)
        .await;

    let crawler = Crawler::new(test_config()).await.unwrap();

    let started = Instant::now();
    crawler
        .add(Task::new(format!("{}/later", mock_server.uri())).with_delay(Duration::from_millis(150)))
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(150));
}

#[tokio::test]
async fn test_callback_and_hooks_see_the_same_task() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(html("<title>Titled</title>"))
        .mount(&mock_server)
        .await;

    let crawler = Crawler::builder(test_config())
        .plugin(Plugin::new("tagger").after_fn(|task| {
            task.meta.insert("tagged".to_string(), true.into());
            Ok(())
        }))
        .build()
        .await
        .unwrap();

    let tagged = Arc::new(AtomicUsize::new(0));
    let counter = tagged.clone();
    let task = crawler
        .add(
            Task::new(format!("{}/cb", mock_server.uri()))
                .with_rule(sumi_weave::Rule::parse("title").unwrap())
                .on_complete(move |task| {
                    if task.meta.get("tagged").is_some() && task.extracted.is_some() {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                }),
        )
        .await
        .unwrap();

    assert_eq!(tagged.load(Ordering::SeqCst), 1);
    assert_eq!(task.extracted, Some(serde_json::json!("Titled")));
}
