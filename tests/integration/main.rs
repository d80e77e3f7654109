//! Integration tests for the crawl engine
//!
//! These tests use wiremock to create mock HTTP servers and drive whole crawls end-to-end
//! through the real reqwest transport.

mod config_tests;
mod crawl_tests;
mod plugin_tests;

use std::sync::{Arc, Mutex};
use sumi_weave::config::{Config, UserAgentConfig};
use sumi_weave::crawler::Task;
use sumi_weave::plugin::{HookPosition, Plugin};
use wiremock::ResponseTemplate;

/// Creates a test configuration with retries disabled
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.user_agent = UserAgentConfig {
        crawler_name: "TestBot".to_string(),
        crawler_version: "1.0.0".to_string(),
        contact_url: Some("https://example.com/contact".to_string()),
        contact_email: Some("test@example.com".to_string()),
    };
    config.attempt.max_retries = 0;
    config.transport.timeout_secs = 5;
    config
}

/// An HTML page response
pub fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_raw(
        format!("<html><head></head><body>{}</body></html>", body),
        "text/html",
    )
}

/// Records every task that reaches the end of the `after` chain
#[derive(Clone, Default)]
pub struct Recorder {
    seen: Arc<Mutex<Vec<Task>>>,
}

impl Recorder {
    pub fn plugin(&self) -> Plugin {
        let seen = Arc::clone(&self.seen);
        Plugin::new("recorder")
            .with_priority_for(HookPosition::After, i32::MIN)
            .after_fn(move |task| {
                seen.lock().unwrap().push(task.clone());
                Ok(())
            })
    }

    pub fn tasks(&self) -> Vec<Task> {
        self.seen.lock().unwrap().clone()
    }

    pub fn urls(&self) -> Vec<String> {
        self.tasks().into_iter().map(|t| t.url).collect()
    }

    /// The first recorded task whose URL, fragment aside, ends with `suffix`
    pub fn find(&self, suffix: &str) -> Option<Task> {
        self.tasks().into_iter().find(|t| {
            t.url
                .split('#')
                .next()
                .is_some_and(|url| url.ends_with(suffix))
        })
    }
}
