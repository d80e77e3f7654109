//! Units of crawl work

use super::fetcher::{FetchError, FetchOptions, Response};
use super::queue::Prioritized;
use crate::config::TaskEntry;
use crate::plugin::{AttemptPolicy, FollowRule};
use crate::query::Rule;
use crate::ConfigError;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Free-form task metadata
pub type Meta = serde_json::Map<String, Value>;

/// Invoked once with the finished task, right before it resolves
pub type TaskCallback = Arc<dyn Fn(&Task) + Send + Sync>;

/// Metadata key holding the task identity
pub const META_ID: &str = "id";

/// Metadata key holding the failed-attempt counter
pub const META_RETRIES: &str = "retries";

/// Metadata key holding the link depth from the seed task
pub const META_DEPTH: &str = "depth";

/// Metadata key holding the URL of the task that discovered this one
pub const META_PARENT: &str = "parent";

/// A single URL to crawl together with everything the hook chain needs to process it
#[derive(Clone, Default)]
pub struct Task {
    pub url: String,
    pub priority: i32,
    pub meta: Meta,

    /// Extraction rule evaluated after a successful fetch
    pub rule: Option<Rule>,

    /// Follow rules evaluated after a successful fetch
    pub follow: Vec<FollowRule>,

    /// Retry policy; the crawler fills in its default when unset
    pub attempt: Option<AttemptPolicy>,

    /// Delay before fetching; the crawler default applies when unset
    pub delay: Option<Duration>,

    /// Transport options layered on top of the crawler defaults
    pub options: FetchOptions,

    /// Set by a hook to stop the current pass; a cancelled task resolves without fetching
    pub cancelled: bool,

    /// Set when the error chain gave up on this task
    pub dropped: bool,

    /// The body of this task came from a spawner
    pub spawned: bool,

    /// The body must be rebuilt from a spawner before the next pass
    pub respawn: bool,

    pub response: Option<Response>,
    pub error: Option<FetchError>,
    pub extracted: Option<Value>,

    callback: Option<TaskCallback>,
}

/// Derives the default identity of a URL: the first 16 hex characters of its SHA-256
pub fn derive_id(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let mut id = hex::encode(hasher.finalize());
    id.truncate(16);
    id
}

impl Task {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::default()
        }
    }

    /// Builds a task from a `[[task]]` config entry
    pub fn from_entry(entry: &TaskEntry) -> Result<Self, ConfigError> {
        let mut task = Task::new(entry.url.clone()).with_priority(entry.priority);
        task.meta = entry.meta.clone();

        if let Some(rule) = &entry.rule {
            task.rule = Some(
                Rule::from_value(rule)
                    .map_err(|e| ConfigError::Validation(format!("task {}: {}", entry.url, e)))?,
            );
        }
        for follow in &entry.follow {
            task.follow.push(FollowRule::from_entry(follow)?);
        }
        if let Some(ms) = entry.delay_ms {
            task.delay = Some(Duration::from_millis(ms));
        }

        Ok(task)
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    pub fn with_id(self, id: impl Into<String>) -> Self {
        self.with_meta(META_ID, id.into())
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rule = Some(rule);
        self
    }

    pub fn follow(mut self, rule: FollowRule) -> Self {
        self.follow.push(rule);
        self
    }

    pub fn with_attempt(mut self, policy: AttemptPolicy) -> Self {
        self.attempt = Some(policy);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_options(mut self, options: FetchOptions) -> Self {
        self.options = options;
        self
    }

    /// Registers a function called once with the finished task
    ///
    /// The callback runs after the `after` chain and is skipped for cancelled tasks and tasks
    /// settled by the error chain.
    pub fn on_complete<F>(mut self, f: F) -> Self
    where
        F: Fn(&Task) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(f));
        self
    }

    /// The task identity, empty until [`Task::ensure_id`] ran
    pub fn id(&self) -> &str {
        self.meta
            .get(META_ID)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    /// Fills in the identity derived from the URL when none was given
    pub fn ensure_id(&mut self) -> &str {
        let missing = !matches!(self.meta.get(META_ID), Some(Value::String(s)) if !s.is_empty());
        if missing {
            self.meta
                .insert(META_ID.to_string(), Value::String(derive_id(&self.url)));
        }
        self.id()
    }

    /// Number of failed attempts so far
    pub fn retries(&self) -> u32 {
        self.meta
            .get(META_RETRIES)
            .and_then(Value::as_u64)
            .map(|n| n as u32)
            .unwrap_or(0)
    }

    /// Link depth from the seed task, 0 for seeds
    pub fn depth(&self) -> u32 {
        self.meta
            .get(META_DEPTH)
            .and_then(Value::as_u64)
            .map(|n| n as u32)
            .unwrap_or(0)
    }

    pub fn cancel(&mut self) {
        self.cancelled = true;
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Takes the callback out, so it can run at most once
    pub fn take_callback(&mut self) -> Option<TaskCallback> {
        self.callback.take()
    }

    /// Reduces a spawned task to `{url, meta}` so a spawner rebuilds it on the next pass
    pub fn reset_for_respawn(&mut self) {
        let url = std::mem::take(&mut self.url);
        let meta = std::mem::take(&mut self.meta);
        *self = Task {
            url,
            meta,
            spawned: true,
            respawn: true,
            ..Task::default()
        };
    }
}

impl Prioritized for Task {
    fn priority(&self) -> i64 {
        i64::from(self.priority)
    }
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("url", &self.url)
            .field("priority", &self.priority)
            .field("meta", &self.meta)
            .field("rule", &self.rule)
            .field("follow", &self.follow.len())
            .field("cancelled", &self.cancelled)
            .field("dropped", &self.dropped)
            .field("spawned", &self.spawned)
            .field("status", &self.response.as_ref().map(|r| r.status))
            .field("error", &self.error)
            .field("extracted", &self.extracted)
            .finish()
    }
}

/// Anything that can be handed to [`Crawler::add`](super::Crawler::add)
#[derive(Debug)]
pub enum Submission {
    /// A fully specified task
    Task(Box<Task>),

    /// A bare URL, matched against the registered spawners
    Url { url: String, meta: Meta },
}

impl Submission {
    pub fn url(url: impl Into<String>) -> Self {
        Self::Url {
            url: url.into(),
            meta: Meta::new(),
        }
    }

    pub fn url_with_meta(url: impl Into<String>, meta: Meta) -> Self {
        Self::Url {
            url: url.into(),
            meta,
        }
    }
}

impl From<Task> for Submission {
    fn from(task: Task) -> Self {
        Self::Task(Box::new(task))
    }
}

impl From<&str> for Submission {
    fn from(url: &str) -> Self {
        Self::url(url)
    }
}

impl From<String> for Submission {
    fn from(url: String) -> Self {
        Self::url(url)
    }
}

impl<S: Into<String>> From<(S, Meta)> for Submission {
    fn from((url, meta): (S, Meta)) -> Self {
        Self::url_with_meta(url, meta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_derived_id() {
        let mut task = Task::new("https://example.com/");
        assert_eq!(task.id(), "");

        let id = task.ensure_id().to_string();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, derive_id("https://example.com/"));
        assert_ne!(id, derive_id("https://example.com/other"));
    }

    #[test]
    fn test_explicit_id_is_kept() {
        let mut task = Task::new("https://example.com/").with_id("page-1");
        assert_eq!(task.ensure_id(), "page-1");
    }

    #[test]
    fn test_counters_default_to_zero() {
        let task = Task::new("https://example.com/");
        assert_eq!(task.retries(), 0);
        assert_eq!(task.depth(), 0);

        let task = task.with_meta(META_RETRIES, 2).with_meta(META_DEPTH, 4);
        assert_eq!(task.retries(), 2);
        assert_eq!(task.depth(), 4);
    }

    #[test]
    fn test_callback_taken_once() {
        let mut task = Task::new("https://example.com/").on_complete(|_| {});
        assert!(task.take_callback().is_some());
        assert!(task.take_callback().is_none());
    }

    #[test]
    fn test_reset_for_respawn_keeps_url_and_meta() {
        let mut task = Task::new("https://example.com/a")
            .with_priority(9)
            .with_rule(Rule::parse("h1").unwrap())
            .with_meta(META_RETRIES, 1);
        task.ensure_id();
        let id = task.id().to_string();

        task.reset_for_respawn();
        assert_eq!(task.url, "https://example.com/a");
        assert_eq!(task.id(), id);
        assert_eq!(task.retries(), 1);
        assert_eq!(task.priority, 0);
        assert!(task.rule.is_none());
        assert!(task.spawned && task.respawn);
    }

    #[test]
    fn test_submission_conversions() {
        assert!(matches!(Submission::from("a.test"), Submission::Url { .. }));
        assert!(matches!(
            Submission::from(Task::new("a.test")),
            Submission::Task(_)
        ));

        let mut meta = Meta::new();
        meta.insert("tag".to_string(), json!("x"));
        match Submission::from(("a.test", meta)) {
            Submission::Url { url, meta } => {
                assert_eq!(url, "a.test");
                assert_eq!(meta["tag"], json!("x"));
            }
            other => panic!("expected Url, got {:?}", other),
        }
    }
}
