//! Crawl coordinator
//!
//! The [`Crawler`] owns the transport, the plugin registry, the task manager, the spawners and
//! the plugin store, and runs the per-task life cycle:
//!
//! 1. Rebuild the task from a spawner if a retry asked for it
//! 2. Run `before` hooks (stop early if the task is cancelled)
//! 3. Fetch through the transport
//! 4. Run `after` hooks and the task callback, or `on_error` hooks on failure
//! 5. Settle the task's completion future

use super::fetcher::{FetchOptions, ReqwestTransport, Transport};
use super::scheduler::{Manager, ManagerEvent, Outcome, TaskHandle, Worker};
use super::spawner::Spawner;
use super::task::{Meta, Submission, Task};
use crate::config::{merge_config, validate, Config};
use crate::plugin::{
    default_plugins, AttemptPolicy, Flow, HookChain, HookPosition, Plugin, PluginRegistry, Store,
};
use crate::query::{Extractor, FilterArg, FilterRegistry};
use crate::url::with_default_scheme;
use crate::CrawlError;
use async_trait::async_trait;
use futures::future::{self, FutureExt};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use tokio::sync::broadcast;

/// Called after the `finish` hooks each time the crawler goes idle
pub type DrainCallback = Arc<dyn Fn(&Crawler) + Send + Sync>;

struct Inner {
    me: Weak<Inner>,
    config: Config,
    transport: Arc<dyn Transport>,
    custom_transport: bool,
    extractor: Extractor,
    registry: RwLock<PluginRegistry>,
    spawners: RwLock<Vec<Spawner>>,
    manager: Manager,
    store: Store,
    on_drain: Option<DrainCallback>,
}

/// Handle to a running crawl engine
///
/// Cloning is cheap; all clones drive the same engine. Plugin hooks receive a `&Crawler` and
/// can submit new work through it. A crawler must be used from within a tokio runtime.
#[derive(Clone)]
pub struct Crawler {
    inner: Arc<Inner>,
}

/// Configures and builds a [`Crawler`]
pub struct CrawlerBuilder {
    config: Config,
    transport: Option<Arc<dyn Transport>>,
    filters: FilterRegistry,
    on_drain: Option<DrainCallback>,
    plugins: Vec<Plugin>,
    spawners: Vec<Spawner>,
}

impl CrawlerBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            transport: None,
            filters: FilterRegistry::with_builtins(),
            on_drain: None,
            plugins: Vec::new(),
            spawners: Vec::new(),
        }
    }

    /// Replaces the default `reqwest` transport
    pub fn transport<T: Transport + 'static>(self, transport: T) -> Self {
        self.shared_transport(Arc::new(transport))
    }

    pub fn shared_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Registers a custom extraction filter
    pub fn filter<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Value, &[FilterArg]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.filters.register(name, f);
        self
    }

    /// Replaces the whole filter registry
    pub fn filters(mut self, filters: FilterRegistry) -> Self {
        self.filters = filters;
        self
    }

    pub fn on_drain<F>(mut self, f: F) -> Self
    where
        F: Fn(&Crawler) + Send + Sync + 'static,
    {
        self.on_drain = Some(Arc::new(f));
        self
    }

    /// Registers a plugin after the default ones
    pub fn plugin(mut self, plugin: Plugin) -> Self {
        self.plugins.push(plugin);
        self
    }

    /// Registers a spawner after the ones declared in the configuration
    pub fn spawner(mut self, spawner: Spawner) -> Self {
        self.spawners.push(spawner);
        self
    }

    /// Validates the configuration, registers plugins and spawners, and starts the manager
    /// unless `auto-start` is off
    pub async fn build(self) -> Result<Crawler, CrawlError> {
        validate(&self.config)?;

        let custom_transport = self.transport.is_some();
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::from_config(
                &self.config.user_agent,
                &self.config.transport,
            )?),
        };

        let mut spawners = Vec::new();
        for entry in &self.config.spawners {
            spawners.push(Spawner::from_entry(entry)?);
        }
        spawners.extend(self.spawners);

        let concurrency = self.config.crawler.concurrency as usize;
        let auto_start = self.config.crawler.auto_start;
        let config = self.config;
        let extractor = Extractor::new(self.filters);
        let on_drain = self.on_drain;

        let inner = Arc::new_cyclic(|me: &Weak<Inner>| {
            let worker: Weak<dyn Worker> = me.clone();
            Inner {
                me: me.clone(),
                manager: Manager::new(concurrency, worker),
                config,
                transport,
                custom_transport,
                extractor,
                registry: RwLock::new(PluginRegistry::new()),
                spawners: RwLock::new(spawners),
                store: Store::new(),
                on_drain,
            }
        });
        let crawler = Crawler { inner };

        for plugin in default_plugins(crawler.config()) {
            crawler.use_plugin(plugin).await?;
        }
        for plugin in self.plugins {
            crawler.use_plugin(plugin).await?;
        }

        tracing::info!(
            "Crawler ready: concurrency {}, plugins [{}]",
            concurrency,
            crawler.plugin_names().join(", ")
        );

        if auto_start {
            crawler.start();
        }
        Ok(crawler)
    }
}

impl Crawler {
    pub fn builder(config: Config) -> CrawlerBuilder {
        CrawlerBuilder::new(config)
    }

    /// Builds a crawler with the default transport and plugins
    pub async fn new(config: Config) -> Result<Self, CrawlError> {
        CrawlerBuilder::new(config).build().await
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// State shared between plugins
    pub fn store(&self) -> &Store {
        &self.inner.store
    }

    pub fn extractor(&self) -> &Extractor {
        &self.inner.extractor
    }

    pub fn manager(&self) -> &Manager {
        &self.inner.manager
    }

    /// Submits a task, a bare URL, or a `(url, meta)` pair
    ///
    /// Bare URLs go through the spawners when any are registered: the first matching spawner
    /// builds the task, and a URL no spawner accepts resolves at once without being fetched.
    /// Without spawners a bare URL becomes a default task.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use sumi_weave::{Config, Crawler, Rule, Task};
    ///
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// let crawler = Crawler::new(Config::default()).await?;
    /// let handle = crawler.add(Task::new("https://example.com/").with_rule(Rule::parse("title")?));
    /// let task = handle.await?;
    /// println!("{:?}", task.extracted);
    /// # Ok(())
    /// # }
    /// ```
    pub fn add(&self, submission: impl Into<Submission>) -> TaskHandle {
        let task = match submission.into() {
            Submission::Task(task) => *task,
            Submission::Url { url, meta } => {
                let url = with_default_scheme(&url);
                if !self.has_spawners() {
                    let mut task = Task::new(url);
                    task.meta = meta;
                    task
                } else {
                    match self.spawn(&url, &meta) {
                        Some(task) => task,
                        None => {
                            tracing::debug!("No spawner matched {}, resolving without a fetch", url);
                            let mut task = Task::new(url);
                            task.meta = meta;
                            task.ensure_id();
                            return future::ready(Ok::<_, Arc<CrawlError>>(task)).boxed().shared();
                        }
                    }
                }
            }
        };

        self.inner.manager.add(self.prepare(task))
    }

    /// Registers a plugin and runs its `start` hook
    ///
    /// A failing `start` hook rolls the registration back.
    pub async fn use_plugin(&self, plugin: Plugin) -> Result<(), CrawlError> {
        let name = plugin.name().to_string();
        let start = plugin.start.clone();
        self.registry_mut().register(plugin)?;

        if let Some(start) = start {
            if let Err(source) = start.start(self).await {
                self.registry_mut().unregister(&name);
                tracing::error!("Plugin {} failed to start: {}", name, source);
                return Err(CrawlError::PluginStart { name, source });
            }
        }
        Ok(())
    }

    /// Removes a plugin; passes already running keep the hooks they started with
    pub fn remove_plugin(&self, name: &str) -> bool {
        self.registry_mut().unregister(name)
    }

    /// Registered plugin names in registration order
    pub fn plugin_names(&self) -> Vec<String> {
        self.registry().names()
    }

    pub fn has_plugin(&self, name: &str) -> bool {
        self.registry().contains(name)
    }

    /// Hook lists as they stand right now
    pub fn hooks(&self) -> Arc<HookChain> {
        self.registry().chain()
    }

    /// Adds a spawner; spawners are tried in registration order
    pub fn register_spawner(&self, spawner: Spawner) {
        self.inner
            .spawners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(spawner);
    }

    pub fn has_spawners(&self) -> bool {
        !self
            .inner
            .spawners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Builds a new, independent crawler from this one's configuration with `overrides`
    /// deep-merged on top
    ///
    /// The new crawler shares the filter registry, drain callback, and a custom transport if
    /// one was supplied. Plugins added with [`Crawler::use_plugin`] and spawners added at
    /// runtime are not carried over.
    pub async fn create(&self, overrides: toml::Table) -> Result<Crawler, CrawlError> {
        let config = merge_config(&self.inner.config, overrides)?;

        let mut builder =
            CrawlerBuilder::new(config).filters(self.inner.extractor.filters().clone());
        if self.inner.custom_transport {
            builder = builder.shared_transport(Arc::clone(&self.inner.transport));
        }
        builder.on_drain = self.inner.on_drain.clone();
        builder.build().await
    }

    /// Starts admitting queued tasks
    pub fn start(&self) {
        self.inner.manager.start();
    }

    /// Waits until no task is queued or running and the `finish` hooks completed
    pub async fn wait_idle(&self) {
        self.inner.manager.wait_idle().await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.inner.manager.subscribe()
    }

    fn registry(&self) -> RwLockReadGuard<'_, PluginRegistry> {
        self.inner
            .registry
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn registry_mut(&self) -> RwLockWriteGuard<'_, PluginRegistry> {
        self.inner
            .registry
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn spawn(&self, url: &str, meta: &Meta) -> Option<Task> {
        let spawners = self
            .inner
            .spawners
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        spawners
            .iter()
            .find(|s| s.matches(url))
            .map(|s| s.spawn(url, meta))
    }

    /// Fills in the URL scheme, identity, and crawler-wide defaults
    fn prepare(&self, mut task: Task) -> Task {
        task.url = with_default_scheme(&task.url);
        task.ensure_id();
        if task.attempt.is_none() {
            task.attempt = Some(AttemptPolicy::from_config(&self.inner.config.attempt));
        }
        task
    }

    fn fetch_options(&self, task: &Task) -> FetchOptions {
        let defaults = FetchOptions {
            timeout: None,
            headers: self.inner.config.transport.headers.clone(),
            allow_status: task
                .attempt
                .as_ref()
                .map(|a| a.allowed_status.clone())
                .unwrap_or_default(),
        };
        defaults.merged(&task.options)
    }

    /// Rebuilds a task reset by a retry; `Err` carries a task no spawner accepts any more
    fn respawn(&self, task: Task) -> Result<Task, Task> {
        match self.spawn(&task.url, &task.meta) {
            Some(spawned) => Ok(self.prepare(spawned)),
            None => {
                tracing::debug!("No spawner matched {} on retry", task.url);
                Err(task)
            }
        }
    }

    async fn run_task(&self, mut task: Task) -> Outcome {
        if task.respawn {
            task = match self.respawn(task) {
                Ok(task) => task,
                Err(task) => return Outcome::Resolved(task),
            };
        }

        let id = task.id().to_string();
        let chain = self.hooks();

        for entry in &chain.before {
            if task.cancelled {
                break;
            }
            if let Err(source) = entry.hook.before(&mut task, self).await {
                return hook_failure(HookPosition::Before, &entry.plugin, id, source);
            }
        }
        if task.cancelled {
            tracing::debug!("Task {} cancelled before fetch", id);
            return Outcome::Resolved(task);
        }

        let options = self.fetch_options(&task);
        tracing::debug!("Fetching {}", task.url);
        match self.inner.transport.fetch(&task.url, &options).await {
            Ok(response) => {
                tracing::debug!("Fetched {} (HTTP {})", task.url, response.status);
                task.response = Some(response);
                self.run_after(task, &chain, id).await
            }
            Err(error) => {
                tracing::debug!("Fetch failed for {}: {}", task.url, error);
                if let Some(partial) = error.response() {
                    task.response = Some(partial.clone());
                }
                task.error = Some(error);
                self.run_error(task, &chain, id).await
            }
        }
    }

    async fn run_after(&self, mut task: Task, chain: &HookChain, id: String) -> Outcome {
        for entry in &chain.after {
            if task.cancelled {
                break;
            }
            if let Err(source) = entry.hook.after(&mut task, self).await {
                return hook_failure(HookPosition::After, &entry.plugin, id, source);
            }
        }

        if !task.cancelled {
            if let Some(callback) = task.take_callback() {
                callback(&task);
            }
        }
        Outcome::Resolved(task)
    }

    async fn run_error(&self, mut task: Task, chain: &HookChain, id: String) -> Outcome {
        for entry in &chain.on_error {
            if task.cancelled {
                return Outcome::Resolved(task);
            }
            match entry.hook.on_error(&mut task, self).await {
                Ok(Flow::Continue) => {}
                Ok(Flow::Retry) => return Outcome::Requeue(task),
                Ok(Flow::Drop) => {
                    tracing::info!("Dropping task {} ({})", id, task.url);
                    task.dropped = true;
                    return Outcome::Resolved(task);
                }
                Err(source) => {
                    return hook_failure(HookPosition::OnError, &entry.plugin, id, source)
                }
            }
        }

        tracing::warn!(
            "No error hook settled task {} ({}), resolving with its error attached",
            id,
            task.url
        );
        Outcome::Resolved(task)
    }

    async fn run_finish(&self) {
        let chain = self.hooks();
        for entry in &chain.finish {
            if let Err(e) = entry.hook.finish(self).await {
                tracing::error!("Finish hook of plugin {} failed: {}", entry.plugin, e);
            }
        }
        if let Some(on_drain) = &self.inner.on_drain {
            on_drain(self);
        }
    }
}

fn hook_failure(
    position: HookPosition,
    plugin: &str,
    task: String,
    source: anyhow::Error,
) -> Outcome {
    Outcome::Failed {
        id: task.clone(),
        error: CrawlError::Hook {
            position,
            plugin: plugin.to_string(),
            task,
            source,
        },
    }
}

#[async_trait]
impl Worker for Inner {
    async fn run(&self, task: Task) -> Outcome {
        match self.me.upgrade() {
            Some(inner) => Crawler { inner }.run_task(task).await,
            None => {
                let id = task.id().to_string();
                Outcome::Failed {
                    id: id.clone(),
                    error: CrawlError::Abandoned { id },
                }
            }
        }
    }

    async fn on_idle(&self) {
        if let Some(inner) = self.me.upgrade() {
            Crawler { inner }.run_finish().await;
        }
    }
}

impl fmt::Debug for Crawler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Crawler")
            .field("plugins", &self.plugin_names())
            .field("concurrency", &self.inner.manager.concurrency())
            .field("pending", &self.inner.manager.pending())
            .finish()
    }
}
