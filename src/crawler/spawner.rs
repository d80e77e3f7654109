//! Routing of bare URLs to task templates

use super::task::{Meta, Task};
use crate::config::SpawnerEntry;
use crate::url::UrlMatcher;
use crate::ConfigError;
use std::fmt;
use std::sync::Arc;

/// Builds the task for a URL accepted by a spawner
pub type SpawnFn = Arc<dyn Fn(&str, &Meta) -> Task + Send + Sync>;

/// Turns matching bare URLs into full tasks
#[derive(Clone)]
pub struct Spawner {
    matcher: UrlMatcher,
    factory: SpawnFn,
}

impl Spawner {
    pub fn new<F>(matcher: UrlMatcher, factory: F) -> Self
    where
        F: Fn(&str, &Meta) -> Task + Send + Sync + 'static,
    {
        Self {
            matcher,
            factory: Arc::new(factory),
        }
    }

    /// Spawns clones of `template` with the URL and metadata filled in
    pub fn from_template(matcher: UrlMatcher, template: Task) -> Self {
        Self::new(matcher, move |url, meta| {
            let mut task = template.clone();
            task.url = url.to_string();
            for (key, value) in meta {
                task.meta.insert(key.clone(), value.clone());
            }
            task
        })
    }

    /// Builds a spawner from a `[[spawner]]` config entry
    pub fn from_entry(entry: &SpawnerEntry) -> Result<Self, ConfigError> {
        let matcher = UrlMatcher::regex(&entry.pattern).map_err(|e| {
            ConfigError::InvalidPattern(format!("spawner pattern '{}': {}", entry.pattern, e))
        })?;
        let template = Task::from_entry(&entry.template())?;
        Ok(Self::from_template(matcher, template))
    }

    pub fn matches(&self, url: &str) -> bool {
        self.matcher.matches(url)
    }

    /// Builds the task for `url`
    ///
    /// The submitted metadata is kept even if the factory ignores it.
    pub fn spawn(&self, url: &str, meta: &Meta) -> Task {
        let mut task = (self.factory)(url, meta);
        if task.url.is_empty() {
            task.url = url.to_string();
        }
        for (key, value) in meta {
            task.meta
                .entry(key.clone())
                .or_insert_with(|| value.clone());
        }
        task.spawned = true;
        task.respawn = false;
        task
    }
}

impl fmt::Debug for Spawner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spawner")
            .field("matcher", &self.matcher)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Rule;
    use serde_json::json;

    #[test]
    fn test_template_spawn() {
        let template = Task::new("")
            .with_priority(4)
            .with_rule(Rule::parse("h1").unwrap());
        let spawner = Spawner::from_template(UrlMatcher::regex("/item/\\d+$").unwrap(), template);

        assert!(spawner.matches("http://shop.test/item/12"));
        assert!(!spawner.matches("http://shop.test/cart"));

        let mut meta = Meta::new();
        meta.insert("depth".to_string(), json!(1));
        let task = spawner.spawn("http://shop.test/item/12", &meta);
        assert_eq!(task.url, "http://shop.test/item/12");
        assert_eq!(task.priority, 4);
        assert_eq!(task.meta["depth"], json!(1));
        assert!(task.rule.is_some());
        assert!(task.spawned);
    }

    #[test]
    fn test_factory_meta_is_merged() {
        let spawner = Spawner::new(UrlMatcher::domain("*.shop.test"), |url, _| {
            Task::new(url).with_meta("kind", "product")
        });

        let mut meta = Meta::new();
        meta.insert("kind".to_string(), json!("ignored"));
        meta.insert("parent".to_string(), json!("http://shop.test/"));

        let task = spawner.spawn("http://www.shop.test/p", &meta);
        assert_eq!(task.meta["kind"], json!("product"));
        assert_eq!(task.meta["parent"], json!("http://shop.test/"));
    }
}
