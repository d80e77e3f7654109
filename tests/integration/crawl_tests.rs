//! End-to-end crawls through the task manager

use crate::{html, test_config, Recorder};
use serde_json::json;
use std::time::Duration;
use sumi_weave::crawler::{Crawler, ManagerEvent, Spawner, Task};
use sumi_weave::plugin::FollowRule;
use sumi_weave::query::Rule;
use sumi_weave::url::UrlMatcher;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_crawl_extracts_structured_data() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<h1> Welcome </h1>
               <ul><li><a href="/a">A</a></li><li><a href="/b">B</a></li></ul>"#,
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    let crawler = Crawler::new(test_config()).await.unwrap();

    let rule = Rule::object([
        ("heading", Rule::parse("h1 | trim").unwrap()),
        ("links", Rule::parse("[a]@href").unwrap()),
        ("items", Rule::parse("[li] | count").unwrap()),
    ]);
    let task = crawler
        .add(Task::new(format!("{}/", mock_server.uri())).with_rule(rule))
        .await
        .unwrap();

    assert_eq!(task.response.as_ref().map(|r| r.status), Some(200));
    assert_eq!(
        task.extracted,
        Some(json!({"heading": "Welcome", "links": ["/a", "/b"], "items": 2}))
    );
    assert!(!task.dropped);
    assert!(!task.cancelled);
}

#[tokio::test]
async fn test_follow_spawns_linked_pages_once() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<a href="/a">A</a>
               <a href="/b">B</a>
               <a href="/a#section">A again</a>
               <a href="mailto:someone@example.com">mail</a>"#,
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    for page in ["/a", "/b"] {
        Mock::given(method("GET"))
            .and(path(page))
            .respond_with(html("<p>leaf</p>"))
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    let recorder = Recorder::default();
    let crawler = Crawler::builder(test_config())
        .plugin(recorder.plugin())
        .build()
        .await
        .unwrap();

    let seed = crawler
        .add(Task::new(format!("{}/", mock_server.uri())).follow(FollowRule::links()))
        .await
        .unwrap();
    assert_eq!(seed.depth(), 0);

    crawler.wait_idle().await;

    let a = recorder.find("/a").expect("page /a was not crawled");
    assert_eq!(a.depth(), 1);
    assert_eq!(a.meta["parent"], json!(seed.url));
    assert!(recorder.find("/b").is_some());

    // The seed plus two distinct pages; the fragment link was suppressed as a duplicate
    assert_eq!(recorder.urls().len(), 3);
}

#[tokio::test]
async fn test_max_depth_stops_following() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(r#"<a href="/one">1</a>"#))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/one"))
        .respond_with(html(r#"<a href="/two">2</a>"#))
        .expect(0)
        .mount(&mock_server)
        .await;

    let mut config = test_config();
    config.crawler.max_depth = Some(0);
    let crawler = Crawler::new(config).await.unwrap();

    let _ = crawler
        .add(Task::new(format!("{}/", mock_server.uri())).follow(FollowRule::links()))
        .await
        .unwrap();
    crawler.wait_idle().await;
}

#[tokio::test]
async fn test_priority_order_with_single_slot() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(html("<p>ok</p>"))
        .mount(&mock_server)
        .await;

    let mut config = test_config();
    config.crawler.concurrency = 1;
    config.crawler.auto_start = false;

    let recorder = Recorder::default();
    let crawler = Crawler::builder(config)
        .plugin(recorder.plugin())
        .build()
        .await
        .unwrap();

    let base = mock_server.uri();
    let handles = vec![
        crawler.add(Task::new(format!("{}/low", base)).with_priority(1)),
        crawler.add(Task::new(format!("{}/high", base)).with_priority(9)),
        crawler.add(Task::new(format!("{}/mid-first", base)).with_priority(5)),
        crawler.add(Task::new(format!("{}/mid-second", base)).with_priority(5)),
    ];
    assert_eq!(crawler.manager().queued(), 4);
    assert_eq!(crawler.manager().pending(), 0);

    crawler.start();
    for handle in handles {
        handle.await.unwrap();
    }

    let order: Vec<String> = recorder
        .urls()
        .iter()
        .map(|u| u.trim_start_matches(&base).to_string())
        .collect();
    assert_eq!(order, vec!["/high", "/mid-first", "/mid-second", "/low"]);
}

#[tokio::test]
async fn test_concurrency_limit_is_respected() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(html("<p>slow</p>").set_delay(Duration::from_millis(100)))
        .expect(6)
        .mount(&mock_server)
        .await;

    let mut config = test_config();
    config.crawler.concurrency = 2;
    config.crawler.auto_start = false;
    let crawler = Crawler::new(config).await.unwrap();

    let handles: Vec<_> = (0..6)
        .map(|i| crawler.add(format!("{}/page/{}", mock_server.uri(), i)))
        .collect();

    crawler.start();
    assert_eq!(crawler.manager().pending(), 2);
    assert_eq!(crawler.manager().queued(), 4);

    for handle in handles {
        handle.await.unwrap();
    }
    crawler.wait_idle().await;

    assert_eq!(crawler.manager().peak(), 2);
    assert_eq!(crawler.manager().pending(), 0);
    assert_eq!(crawler.manager().unresolved(), 0);
}

#[tokio::test]
async fn test_identical_submissions_share_one_future() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/same"))
        .respond_with(html("<p>once</p>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let mut config = test_config();
    config.crawler.auto_start = false;
    let crawler = Crawler::new(config).await.unwrap();

    let url = format!("{}/same", mock_server.uri());
    let first = crawler.add(url.as_str());
    let second = crawler.add(url.as_str());
    assert_eq!(crawler.manager().queued(), 1);

    crawler.start();
    let (first, second) = (first.await.unwrap(), second.await.unwrap());
    assert_eq!(first.id(), second.id());
    assert!(!first.cancelled);
}

#[tokio::test]
async fn test_manager_reports_idle_once_per_drain() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(html("<p>ok</p>"))
        .mount(&mock_server)
        .await;

    let drains = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let counter = drains.clone();
    let crawler = Crawler::builder(test_config())
        .on_drain(move |_| {
            counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        })
        .build()
        .await
        .unwrap();

    let mut events = crawler.subscribe();
    let handles = vec![
        crawler.add(format!("{}/one", mock_server.uri())),
        crawler.add(format!("{}/two", mock_server.uri())),
    ];
    for handle in handles {
        handle.await.unwrap();
    }
    crawler.wait_idle().await;

    let mut idles = 0;
    while let Ok(event) = events.try_recv() {
        if event == ManagerEvent::Idle {
            idles += 1;
        }
    }
    assert_eq!(idles, 1);
    assert_eq!(drains.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_spawners_route_bare_urls() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/items/42"))
        .respond_with(html("<h1>Item 42</h1>"))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(html("<h1>About</h1>"))
        .expect(0)
        .mount(&mock_server)
        .await;

    let template = Task::new("")
        .with_priority(3)
        .with_rule(Rule::parse("h1").unwrap());
    let crawler = Crawler::builder(test_config())
        .spawner(Spawner::from_template(
            UrlMatcher::regex(r"/items/\d+$").unwrap(),
            template,
        ))
        .build()
        .await
        .unwrap();
    assert!(crawler.has_spawners());

    let item = crawler
        .add(format!("{}/items/42", mock_server.uri()))
        .await
        .unwrap();
    assert!(item.spawned);
    assert_eq!(item.priority, 3);
    assert_eq!(item.extracted, Some(json!("Item 42")));

    let about = crawler
        .add(format!("{}/about", mock_server.uri()))
        .await
        .unwrap();
    assert!(about.response.is_none());
    assert!(about.extracted.is_none());
}

#[tokio::test]
async fn test_transport_failure_without_retries_drops() {
    let crawler = Crawler::new(test_config()).await.unwrap();
    let task = crawler.add("http://127.0.0.1:1/gone").await.unwrap();

    assert!(task.dropped);
    assert!(task.response.is_none());
    let error = task.error.as_ref().expect("error should be attached");
    assert_eq!(error.status(), None);
    assert_eq!(task.retries(), 1);
}

#[tokio::test]
async fn test_status_error_keeps_partial_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_raw("<h1>Not here</h1>", "text/html"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let crawler = Crawler::new(test_config()).await.unwrap();
    let task = crawler
        .add(format!("{}/missing", mock_server.uri()))
        .await
        .unwrap();

    assert!(task.dropped);
    assert_eq!(task.error.as_ref().and_then(|e| e.status()), Some(404));
    let response = task.response.expect("partial response should be kept");
    assert_eq!(response.status, 404);
    assert!(response.body.contains("Not here"));
}
