//! Duplicate URL suppression

use super::{BeforeHook, ErrorHook, Flow, HookPosition, Plugin, StartHook};
use crate::crawler::{Crawler, Task};
use crate::url::normalize_url;
use async_trait::async_trait;
use dashmap::DashSet;
use std::sync::Arc;

/// Normalized URLs claimed by a task, shared through the crawler store
#[derive(Debug, Default)]
pub struct SeenUrls {
    urls: DashSet<String>,
}

impl SeenUrls {
    /// Claims `url`, returning false when it was already claimed
    pub fn insert(&self, url: &str) -> bool {
        self.urls.insert(dedup_key(url))
    }

    /// Releases `url` so it can be crawled again
    pub fn remove(&self, url: &str) -> bool {
        self.urls.remove(&dedup_key(url)).is_some()
    }

    pub fn contains(&self, url: &str) -> bool {
        self.urls.contains(&dedup_key(url))
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }
}

/// The normalized form of `url`, or `url` itself when it does not normalize
fn dedup_key(url: &str) -> String {
    match normalize_url(url) {
        Ok(normalized) => normalized.to_string(),
        Err(e) => {
            tracing::debug!("Failed to normalize URL {}: {}", url, e);
            url.to_string()
        }
    }
}

/// Cancels tasks whose normalized URL was already claimed
///
/// A failed fetch releases the URL, so a later submission may try again.
pub struct DupFilter;

impl DupFilter {
    pub const NAME: &'static str = "dup-filter";

    pub fn plugin() -> Plugin {
        let hook = Arc::new(DupFilter);
        Plugin::new(Self::NAME)
            .with_priority(200)
            .start(hook.clone())
            .before(hook.clone())
            .on_error(hook)
    }
}

#[async_trait]
impl StartHook for DupFilter {
    async fn start(&self, crawler: &Crawler) -> anyhow::Result<()> {
        crawler.store().get_or_init(SeenUrls::default);
        Ok(())
    }
}

#[async_trait]
impl BeforeHook for DupFilter {
    async fn before(&self, task: &mut Task, crawler: &Crawler) -> anyhow::Result<()> {
        let seen = crawler.store().get_or_init(SeenUrls::default);
        if !seen.insert(&task.url) {
            tracing::debug!("Skipping duplicate URL {}", task.url);
            task.cancel();
        }
        Ok(())
    }
}

#[async_trait]
impl ErrorHook for DupFilter {
    async fn on_error(&self, task: &mut Task, crawler: &Crawler) -> anyhow::Result<Flow> {
        if let Some(seen) = crawler.store().get::<SeenUrls>() {
            seen.remove(&task.url);
        }
        Ok(Flow::Continue)
    }
}
