//! Plugin contract and the built-in plugins
//!
//! A plugin is a named bundle of optional lifecycle hooks. Each pass over a task runs:
//!
//! 1. every `before` hook, highest priority first
//! 2. the fetch
//! 3. every `after` hook on success, or every `on_error` hook on failure
//!
//! `finish` hooks run once each time the crawler goes idle, and a `start` hook runs once when the
//! plugin is registered. Setting [`Task::cancelled`] from any hook skips the rest of the pass.
//!
//! # Example
//!
//! ```
//! use sumi_weave::plugin::Plugin;
//!
//! let plugin = Plugin::new("tagger")
//!     .with_priority(50)
//!     .before_fn(|task| {
//!         task.meta.insert("tagged".into(), true.into());
//!         Ok(())
//!     });
//! assert_eq!(plugin.name(), "tagger");
//! ```

mod attempt;
mod delay;
mod dup_filter;
mod extract;
mod follow;
mod registry;
mod store;

pub use attempt::{Attempt, AttemptOverride, AttemptPolicy};
pub use delay::Delay;
pub use dup_filter::{DupFilter, SeenUrls};
pub use extract::Extract;
pub use follow::{Follow, FollowFactory, FollowFilter, FollowRule};
pub use registry::{HookChain, PluginRegistry, Registered};
pub use store::Store;

use crate::crawler::{Crawler, Task};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Lifecycle positions a hook can occupy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPosition {
    Before,
    After,
    OnError,
    Finish,
}

impl fmt::Display for HookPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Before => "before",
            Self::After => "after",
            Self::OnError => "on_error",
            Self::Finish => "finish",
        })
    }
}

/// What an error hook wants to happen next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Hand the task to the next error hook
    Continue,

    /// Queue the task again under the same id
    Retry,

    /// Give up and resolve the task as dropped
    Drop,
}

#[async_trait]
pub trait BeforeHook: Send + Sync {
    async fn before(&self, task: &mut Task, crawler: &Crawler) -> anyhow::Result<()>;
}

#[async_trait]
pub trait AfterHook: Send + Sync {
    async fn after(&self, task: &mut Task, crawler: &Crawler) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ErrorHook: Send + Sync {
    async fn on_error(&self, task: &mut Task, crawler: &Crawler) -> anyhow::Result<Flow>;
}

#[async_trait]
pub trait FinishHook: Send + Sync {
    async fn finish(&self, crawler: &Crawler) -> anyhow::Result<()>;
}

#[async_trait]
pub trait StartHook: Send + Sync {
    async fn start(&self, crawler: &Crawler) -> anyhow::Result<()>;
}

/// A named set of hooks
#[derive(Clone)]
pub struct Plugin {
    name: String,
    priority: i32,
    priorities: HashMap<HookPosition, i32>,
    pub(crate) before: Option<Arc<dyn BeforeHook>>,
    pub(crate) after: Option<Arc<dyn AfterHook>>,
    pub(crate) on_error: Option<Arc<dyn ErrorHook>>,
    pub(crate) finish: Option<Arc<dyn FinishHook>>,
    pub(crate) start: Option<Arc<dyn StartHook>>,
}

impl Plugin {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            priority: 0,
            priorities: HashMap::new(),
            before: None,
            after: None,
            on_error: None,
            finish: None,
            start: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Sets the priority used by every position without an override
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Overrides the priority of one position
    pub fn with_priority_for(mut self, position: HookPosition, priority: i32) -> Self {
        self.priorities.insert(position, priority);
        self
    }

    pub fn priority_for(&self, position: HookPosition) -> i32 {
        self.priorities
            .get(&position)
            .copied()
            .unwrap_or(self.priority)
    }

    pub fn before(mut self, hook: Arc<dyn BeforeHook>) -> Self {
        self.before = Some(hook);
        self
    }

    pub fn after(mut self, hook: Arc<dyn AfterHook>) -> Self {
        self.after = Some(hook);
        self
    }

    pub fn on_error(mut self, hook: Arc<dyn ErrorHook>) -> Self {
        self.on_error = Some(hook);
        self
    }

    pub fn finish(mut self, hook: Arc<dyn FinishHook>) -> Self {
        self.finish = Some(hook);
        self
    }

    pub fn start(mut self, hook: Arc<dyn StartHook>) -> Self {
        self.start = Some(hook);
        self
    }

    /// Uses a synchronous closure as the `before` hook
    pub fn before_fn<F>(self, f: F) -> Self
    where
        F: Fn(&mut Task) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.before(Arc::new(TaskFn(f)))
    }

    /// Uses a synchronous closure as the `after` hook
    pub fn after_fn<F>(self, f: F) -> Self
    where
        F: Fn(&mut Task) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.after(Arc::new(TaskFn(f)))
    }

    /// Uses a synchronous closure as the `on_error` hook
    pub fn on_error_fn<F>(self, f: F) -> Self
    where
        F: Fn(&mut Task) -> anyhow::Result<Flow> + Send + Sync + 'static,
    {
        self.on_error(Arc::new(ErrorFn(f)))
    }

    /// Uses a synchronous closure as the `finish` hook
    pub fn finish_fn<F>(self, f: F) -> Self
    where
        F: Fn(&Crawler) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.finish(Arc::new(CrawlerFn(f)))
    }
}

impl fmt::Debug for Plugin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Plugin")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("priorities", &self.priorities)
            .field("before", &self.before.is_some())
            .field("after", &self.after.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("finish", &self.finish.is_some())
            .field("start", &self.start.is_some())
            .finish()
    }
}

struct TaskFn<F>(F);

#[async_trait]
impl<F> BeforeHook for TaskFn<F>
where
    F: Fn(&mut Task) -> anyhow::Result<()> + Send + Sync,
{
    async fn before(&self, task: &mut Task, _crawler: &Crawler) -> anyhow::Result<()> {
        (self.0)(task)
    }
}

#[async_trait]
impl<F> AfterHook for TaskFn<F>
where
    F: Fn(&mut Task) -> anyhow::Result<()> + Send + Sync,
{
    async fn after(&self, task: &mut Task, _crawler: &Crawler) -> anyhow::Result<()> {
        (self.0)(task)
    }
}

struct ErrorFn<F>(F);

#[async_trait]
impl<F> ErrorHook for ErrorFn<F>
where
    F: Fn(&mut Task) -> anyhow::Result<Flow> + Send + Sync,
{
    async fn on_error(&self, task: &mut Task, _crawler: &Crawler) -> anyhow::Result<Flow> {
        (self.0)(task)
    }
}

struct CrawlerFn<F>(F);

#[async_trait]
impl<F> FinishHook for CrawlerFn<F>
where
    F: Fn(&Crawler) -> anyhow::Result<()> + Send + Sync,
{
    async fn finish(&self, crawler: &Crawler) -> anyhow::Result<()> {
        (self.0)(crawler)
    }
}

/// The plugins a crawler registers on its own, in registration order
pub fn default_plugins(config: &crate::config::Config) -> Vec<Plugin> {
    let toggles = &config.plugins;
    let mut plugins = Vec::new();

    if toggles.attempt {
        plugins.push(Attempt::plugin());
    }
    if toggles.dup_filter {
        plugins.push(DupFilter::plugin());
    }
    if toggles.delay {
        plugins.push(Delay::plugin(std::time::Duration::from_millis(
            config.crawler.default_delay_ms,
        )));
    }
    if toggles.extract {
        plugins.push(Extract::plugin());
    }
    if toggles.follow {
        plugins.push(Follow::plugin(config.crawler.max_depth));
    }

    plugins
}
