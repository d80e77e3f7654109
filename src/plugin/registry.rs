use super::{AfterHook, BeforeHook, ErrorHook, FinishHook, HookPosition, Plugin};
use crate::CrawlError;
use std::sync::Arc;

/// A hook together with the plugin it belongs to
pub struct Registered<H: ?Sized> {
    pub plugin: String,
    pub priority: i32,
    pub hook: Arc<H>,
}

impl<H: ?Sized> Clone for Registered<H> {
    fn clone(&self) -> Self {
        Self {
            plugin: self.plugin.clone(),
            priority: self.priority,
            hook: Arc::clone(&self.hook),
        }
    }
}

/// Hook lists sorted for execution, highest priority first
#[derive(Clone, Default)]
pub struct HookChain {
    pub before: Vec<Registered<dyn BeforeHook>>,
    pub after: Vec<Registered<dyn AfterHook>>,
    pub on_error: Vec<Registered<dyn ErrorHook>>,
    pub finish: Vec<Registered<dyn FinishHook>>,
}

impl HookChain {
    /// Plugin names of one position, in execution order
    pub fn order(&self, position: HookPosition) -> Vec<&str> {
        fn names<H: ?Sized>(list: &[Registered<H>]) -> Vec<&str> {
            list.iter().map(|r| r.plugin.as_str()).collect()
        }
        match position {
            HookPosition::Before => names(&self.before),
            HookPosition::After => names(&self.after),
            HookPosition::OnError => names(&self.on_error),
            HookPosition::Finish => names(&self.finish),
        }
    }
}

/// Named plugins and the hook chain built from them
///
/// Passes take a snapshot of the chain, so registering a plugin never disturbs a pass that is
/// already running.
#[derive(Default)]
pub struct PluginRegistry {
    plugins: Vec<Plugin>,
    chain: Arc<HookChain>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a plugin's hooks to the chain
    ///
    /// # Errors
    ///
    /// Returns [`CrawlError::DuplicatePlugin`] when a plugin with the same name is registered.
    pub fn register(&mut self, plugin: Plugin) -> Result<(), CrawlError> {
        if self.contains(plugin.name()) {
            return Err(CrawlError::DuplicatePlugin {
                name: plugin.name().to_string(),
            });
        }

        let mut chain = HookChain::clone(&self.chain);
        let name = plugin.name().to_string();

        if let Some(hook) = &plugin.before {
            insert_sorted(&mut chain.before, entry(&name, &plugin, HookPosition::Before, hook));
        }
        if let Some(hook) = &plugin.after {
            insert_sorted(&mut chain.after, entry(&name, &plugin, HookPosition::After, hook));
        }
        if let Some(hook) = &plugin.on_error {
            insert_sorted(
                &mut chain.on_error,
                entry(&name, &plugin, HookPosition::OnError, hook),
            );
        }
        if let Some(hook) = &plugin.finish {
            insert_sorted(&mut chain.finish, entry(&name, &plugin, HookPosition::Finish, hook));
        }

        tracing::debug!("Registered plugin {}", name);
        self.chain = Arc::new(chain);
        self.plugins.push(plugin);
        Ok(())
    }

    /// Removes a plugin and its hooks, returning false when it was not registered
    pub fn unregister(&mut self, name: &str) -> bool {
        let before = self.plugins.len();
        self.plugins.retain(|p| p.name() != name);
        if self.plugins.len() == before {
            return false;
        }

        let mut chain = HookChain::clone(&self.chain);
        chain.before.retain(|r| r.plugin != name);
        chain.after.retain(|r| r.plugin != name);
        chain.on_error.retain(|r| r.plugin != name);
        chain.finish.retain(|r| r.plugin != name);
        self.chain = Arc::new(chain);

        tracing::debug!("Unregistered plugin {}", name);
        true
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plugins.iter().any(|p| p.name() == name)
    }

    /// Plugin names in registration order
    pub fn names(&self) -> Vec<String> {
        self.plugins.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn get(&self, name: &str) -> Option<&Plugin> {
        self.plugins.iter().find(|p| p.name() == name)
    }

    pub fn chain(&self) -> Arc<HookChain> {
        Arc::clone(&self.chain)
    }
}

fn entry<H: ?Sized>(
    name: &str,
    plugin: &Plugin,
    position: HookPosition,
    hook: &Arc<H>,
) -> Registered<H> {
    Registered {
        plugin: name.to_string(),
        priority: plugin.priority_for(position),
        hook: Arc::clone(hook),
    }
}

/// Appends and re-sorts; the sort is stable, so equal priorities keep registration order
fn insert_sorted<H: ?Sized>(list: &mut Vec<Registered<H>>, entry: Registered<H>) {
    list.push(entry);
    list.sort_by(|a, b| b.priority.cmp(&a.priority));
}
