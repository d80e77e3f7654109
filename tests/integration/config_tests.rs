//! Crawls declared entirely in a TOML configuration file

use crate::{html, Recorder};
use serde_json::json;
use std::io::Write;
use sumi_weave::config::load_config;
use sumi_weave::crawler::{Crawler, Task};
use tempfile::NamedTempFile;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer};

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_config_driven_crawl() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/blog"))
        .respond_with(html(
            r#"<h1>Blog</h1>
               <a href="/post/1">First</a>
               <a href="/post/2">Second</a>
               <a href="/about">About</a>"#,
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    for (page, title) in [("/post/1", "First post"), ("/post/2", "Second post")] {
        Mock::given(method("GET"))
            .and(path(page))
            .respond_with(html(&format!("<h1>{}</h1><p>x</p><p>y</p>", title)))
            .expect(1)
            .mount(&mock_server)
            .await;
    }

    Mock::given(method("GET"))
        .and(path("/about"))
        .respond_with(html("<h1>About</h1>"))
        .expect(0)
        .mount(&mock_server)
        .await;

    let file = write_config(&format!(
        r#"
[crawler]
concurrency = 2

[user-agent]
crawler-name = "TestBot"
crawler-version = "1.0.0"

[attempt]
max-retries = 0

[[task]]
url = "{base}/blog"
priority = 10
rule = {{ heading = "h1", links = "[a] | count" }}
follow = [{{ selector = "[a]@href", pattern = '/post/\d+$' }}]

[[spawner]]
pattern = '/post/\d+$'
priority = 5
rule = {{ title = "h1", paragraphs = "[p] | count" }}
"#,
        base = mock_server.uri()
    ));

    let config = load_config(file.path()).unwrap();
    assert_eq!(config.tasks.len(), 1);
    assert_eq!(config.spawners.len(), 1);

    let recorder = Recorder::default();
    let crawler = Crawler::builder(config.clone())
        .plugin(recorder.plugin())
        .build()
        .await
        .unwrap();
    assert!(crawler.has_spawners());

    let seed = Task::from_entry(&config.tasks[0]).unwrap();
    let seed = crawler.add(seed).await.unwrap();
    assert_eq!(seed.priority, 10);
    assert_eq!(seed.extracted, Some(json!({"heading": "Blog", "links": 3})));

    crawler.wait_idle().await;

    let first = recorder.find("/post/1").expect("first post was not crawled");
    assert!(first.spawned);
    assert_eq!(first.priority, 5);
    assert_eq!(first.depth(), 1);
    assert_eq!(
        first.extracted,
        Some(json!({"title": "First post", "paragraphs": 2}))
    );
    assert!(recorder.find("/post/2").is_some());
    assert!(recorder.find("/about").is_none());
}

#[tokio::test]
async fn test_create_applies_overrides() {
    let file = write_config(
        r#"
[crawler]
concurrency = 3
auto-start = false

[transport.headers]
Accept-Language = "en"
"#,
    );
    let config = load_config(file.path()).unwrap();
    let parent = Crawler::new(config).await.unwrap();
    assert!(!parent.manager().is_running());

    let overrides: toml::Table = toml::from_str(
        r#"
[crawler]
auto-start = true

[plugins]
follow = false
"#,
    )
    .unwrap();
    let child = parent.create(overrides).await.unwrap();

    assert!(child.manager().is_running());
    assert_eq!(child.manager().concurrency(), 3);
    assert_eq!(
        child.config().transport.headers.get("Accept-Language"),
        Some(&"en".to_string())
    );
    assert!(!child.has_plugin("follow"));
    assert!(parent.has_plugin("follow"));
    assert!(!parent.manager().is_running());
}

#[tokio::test]
async fn test_invalid_config_fails_to_build() {
    let file = write_config(
        r#"
[[spawner]]
pattern = "(unclosed"
"#,
    );
    assert!(load_config(file.path()).is_err());
}
