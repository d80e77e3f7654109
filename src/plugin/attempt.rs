//! Retry with an attempt limit

use super::{BeforeHook, ErrorHook, Flow, HookPosition, Plugin};
use crate::config::AttemptConfig;
use crate::crawler::{Crawler, FetchError, Task, META_RETRIES};
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Intercepts the retry decision
///
/// Receives the task and the default decision (`true` means retry). Returning `Some(flow)`
/// settles the error chain with `flow`; returning `None` lets the default decision stand.
pub type AttemptOverride = Arc<dyn Fn(&mut Task, bool) -> Option<Flow> + Send + Sync>;

/// How often a task may fail before it is dropped
#[derive(Clone)]
pub struct AttemptPolicy {
    /// Retries allowed after the first failure
    pub max_retries: u32,

    /// Statuses that count as success even though they are not 2xx
    pub allowed_status: Vec<u16>,

    pub on_error: Option<AttemptOverride>,
}

impl AttemptPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            allowed_status: Vec::new(),
            on_error: None,
        }
    }

    pub fn from_config(config: &AttemptConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            allowed_status: config.allowed_status.clone(),
            on_error: None,
        }
    }

    pub fn allow_status(mut self, status: u16) -> Self {
        if !self.allowed_status.contains(&status) {
            self.allowed_status.push(status);
        }
        self
    }

    pub fn with_override<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Task, bool) -> Option<Flow> + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Whether a response with `status` is acceptable
    pub fn allows(&self, status: Option<u16>) -> bool {
        match status {
            Some(s) => (200..300).contains(&s) || self.allowed_status.contains(&s),
            None => false,
        }
    }
}

impl Default for AttemptPolicy {
    fn default() -> Self {
        Self::from_config(&AttemptConfig::default())
    }
}

impl fmt::Debug for AttemptPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AttemptPolicy")
            .field("max_retries", &self.max_retries)
            .field("allowed_status", &self.allowed_status)
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// Counts failures in `meta.retries` and retries until the policy runs out
pub struct Attempt;

impl Attempt {
    pub const NAME: &'static str = "attempt";

    /// Clears stale errors early and decides late, after other error hooks had their say
    pub fn plugin() -> Plugin {
        let hook = Arc::new(Attempt);
        Plugin::new(Self::NAME)
            .with_priority_for(HookPosition::Before, 300)
            .with_priority_for(HookPosition::OnError, -100)
            .before(hook.clone())
            .on_error(hook)
    }
}

#[async_trait]
impl BeforeHook for Attempt {
    async fn before(&self, task: &mut Task, _crawler: &Crawler) -> anyhow::Result<()> {
        task.error = None;
        task.response = None;
        Ok(())
    }
}

#[async_trait]
impl ErrorHook for Attempt {
    async fn on_error(&self, task: &mut Task, _crawler: &Crawler) -> anyhow::Result<Flow> {
        Ok(decide(task))
    }
}

fn decide(task: &mut Task) -> Flow {
    let policy = task.attempt.clone().unwrap_or_default();

    let retries = task.retries() + 1;
    task.meta
        .insert(META_RETRIES.to_string(), Value::from(retries));

    let status = task.error.as_ref().and_then(FetchError::status);
    let should_retry = !policy.allows(status) && retries <= policy.max_retries;

    if let Some(intercept) = &policy.on_error {
        if let Some(flow) = intercept(task, should_retry) {
            return flow;
        }
    }

    if should_retry {
        tracing::info!(
            "Retrying {} (attempt {} of {})",
            task.url,
            retries + 1,
            policy.max_retries + 1
        );
        if task.spawned {
            task.reset_for_respawn();
        }
        Flow::Retry
    } else {
        tracing::info!("Giving up on {} after {} failures", task.url, retries);
        Flow::Drop
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::Response;

    fn failed(status: u16, policy: AttemptPolicy) -> Task {
        let mut task = Task::new("http://site.test/").with_attempt(policy);
        task.error = Some(FetchError::Status {
            url: task.url.clone(),
            status,
            response: Box::new(Response::new("http://site.test/", status, "")),
        });
        task
    }

    #[test]
    fn test_retries_until_limit() {
        let mut task = failed(500, AttemptPolicy::new(2));
        assert_eq!(decide(&mut task), Flow::Retry);
        assert_eq!(decide(&mut task), Flow::Retry);
        assert_eq!(decide(&mut task), Flow::Drop);
        assert_eq!(task.retries(), 3);
    }

    #[test]
    fn test_zero_retries_drops_immediately() {
        let mut task = failed(503, AttemptPolicy::new(0));
        assert_eq!(decide(&mut task), Flow::Drop);
        assert_eq!(task.retries(), 1);
    }

    #[test]
    fn test_allowed_status_is_not_retried() {
        let mut task = failed(404, AttemptPolicy::new(5).allow_status(404));
        assert_eq!(decide(&mut task), Flow::Drop);
    }

    #[test]
    fn test_transport_error_is_retried() {
        let mut task = Task::new("http://site.test/").with_attempt(AttemptPolicy::new(1));
        task.error = Some(FetchError::Transport {
            url: task.url.clone(),
            message: "Connection refused".to_string(),
            timeout: false,
        });
        assert_eq!(decide(&mut task), Flow::Retry);
    }

    #[test]
    fn test_override_intercepts() {
        let policy = AttemptPolicy::new(3).with_override(|task, should_retry| {
            assert!(should_retry);
            task.meta.insert("intercepted".into(), true.into());
            Some(Flow::Drop)
        });
        let mut task = failed(500, policy);
        assert_eq!(decide(&mut task), Flow::Drop);
        assert_eq!(task.meta["intercepted"], Value::Bool(true));
    }

    #[test]
    fn test_override_can_defer_to_default() {
        let policy = AttemptPolicy::new(3).with_override(|_, _| None);
        let mut task = failed(500, policy);
        assert_eq!(decide(&mut task), Flow::Retry);
    }

    #[test]
    fn test_spawned_task_is_reset() {
        let mut task = failed(500, AttemptPolicy::new(1));
        task.spawned = true;
        task.ensure_id();
        let id = task.id().to_string();

        assert_eq!(decide(&mut task), Flow::Retry);
        assert!(task.respawn);
        assert!(task.attempt.is_none());
        assert_eq!(task.id(), id);
        assert_eq!(task.retries(), 1);
    }
}
