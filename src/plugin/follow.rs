//! Link discovery
//!
//! Follow rules select values out of a fetched document (usually `href`s), resolve them against
//! the page URL and submit each one back to the crawler. By default a discovered link is
//! submitted as a bare URL, so spawners decide what kind of task it becomes.

use super::{AfterHook, HookPosition, Plugin};
use crate::config::FollowEntry;
use crate::crawler::{Crawler, Meta, Response, Submission, Task, META_DEPTH, META_PARENT};
use crate::query::{Extractor, Query, QueryError, Rule};
use crate::url::resolve_link;
use crate::ConfigError;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Narrows the resolved links of one follow rule
pub type FollowFilter = Arc<dyn Fn(Vec<String>, &Task) -> Vec<String> + Send + Sync>;

/// Turns a resolved link into a submission; `None` skips the link
pub type FollowFactory = Arc<dyn Fn(&str, &Task) -> Option<Submission> + Send + Sync>;

/// One way of discovering links on a page
#[derive(Clone)]
pub struct FollowRule {
    query: Query,
    filters: Vec<FollowFilter>,
    factory: Option<FollowFactory>,
}

impl FollowRule {
    /// Follows the values selected by `rule`
    ///
    /// The query always returns every match, with or without brackets.
    pub fn new(rule: &str) -> Result<Self, QueryError> {
        Ok(Self::from_query(Query::parse(rule)?))
    }

    pub fn from_query(query: Query) -> Self {
        Self {
            query: query.all(),
            filters: Vec::new(),
            factory: None,
        }
    }

    /// Follows every anchor's `href`
    pub fn links() -> Self {
        Self::from_query(Query {
            selector: "a".to_string(),
            attribute: Some("href".to_string()),
            ..Query::default()
        })
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Adds a list filter; filters run in the order they were added
    pub fn filter<F>(mut self, f: F) -> Self
    where
        F: Fn(Vec<String>, &Task) -> Vec<String> + Send + Sync + 'static,
    {
        self.filters.push(Arc::new(f));
        self
    }

    /// Keeps links matching `pattern`
    pub fn matching(self, pattern: Regex) -> Self {
        self.filter(move |links, _| links.into_iter().filter(|l| pattern.is_match(l)).collect())
    }

    /// Keeps links on the same host as the page they were found on
    pub fn same_domain(self) -> Self {
        self.filter(|links, task| {
            let host = host_of(&task.url);
            links
                .into_iter()
                .filter(|l| host.is_some() && host_of(l) == host)
                .collect()
        })
    }

    /// Replaces the default bare-URL submission
    pub fn factory<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, &Task) -> Option<Submission> + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(f));
        self
    }

    /// Builds a rule from a `follow` config entry
    pub fn from_entry(entry: &FollowEntry) -> Result<Self, ConfigError> {
        let mut rule = Self::new(&entry.selector).map_err(|e| {
            ConfigError::Validation(format!("follow selector '{}': {}", entry.selector, e))
        })?;

        if let Some(pattern) = &entry.pattern {
            let regex = Regex::new(pattern).map_err(|e| {
                ConfigError::InvalidPattern(format!("follow pattern '{}': {}", pattern, e))
            })?;
            rule = rule.matching(regex);
        }
        if entry.same_domain {
            rule = rule.same_domain();
        }

        let extract = match &entry.rule {
            Some(value) => Some(Rule::from_value(value).map_err(|e| {
                ConfigError::Validation(format!("follow rule for '{}': {}", entry.selector, e))
            })?),
            None => None,
        };

        if extract.is_some() || entry.priority.is_some() {
            let priority = entry.priority.unwrap_or_default();
            rule = rule.factory(move |link, parent| {
                let mut task = Task::new(link).with_priority(priority);
                task.meta = child_meta(parent);
                task.rule = extract.clone();
                Some(task.into())
            });
        }

        Ok(rule)
    }
}

impl fmt::Debug for FollowRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FollowRule")
            .field("query", &self.query.to_string())
            .field("filters", &self.filters.len())
            .field("factory", &self.factory.is_some())
            .finish()
    }
}

/// Metadata for a task discovered on `parent`
pub fn child_meta(parent: &Task) -> Meta {
    let mut meta = Meta::new();
    meta.insert(META_PARENT.to_string(), Value::String(parent.url.clone()));
    meta.insert(META_DEPTH.to_string(), Value::from(parent.depth() + 1));
    meta
}

fn host_of(url: &str) -> Option<String> {
    Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_ascii_lowercase))
}

/// Submits the links selected by [`Task::follow`]
pub struct Follow {
    max_depth: Option<u32>,
}

impl Follow {
    pub const NAME: &'static str = "follow";

    /// Tasks at `max_depth` or deeper are not followed
    pub fn new(max_depth: Option<u32>) -> Self {
        Self { max_depth }
    }

    /// Runs after extraction
    pub fn plugin(max_depth: Option<u32>) -> Plugin {
        Plugin::new(Self::NAME)
            .with_priority_for(HookPosition::After, 100)
            .after(Arc::new(Self::new(max_depth)))
    }
}

#[async_trait]
impl AfterHook for Follow {
    async fn after(&self, task: &mut Task, crawler: &Crawler) -> anyhow::Result<()> {
        if task.follow.is_empty() {
            return Ok(());
        }
        if let Some(max) = self.max_depth {
            if task.depth() >= max {
                tracing::trace!("Not following links of {} at depth {}", task.url, max);
                return Ok(());
            }
        }

        let submissions = discover(task, crawler.extractor())?;
        tracing::debug!("Following {} links from {}", submissions.len(), task.url);
        for submission in submissions {
            // The crawler keeps the completion future alive until the task resolves
            let _ = crawler.add(submission);
        }
        Ok(())
    }
}

fn discover(task: &Task, extractor: &Extractor) -> Result<Vec<Submission>, QueryError> {
    let Some(response) = &task.response else {
        return Ok(Vec::new());
    };
    let Some(document) = response.document() else {
        return Ok(Vec::new());
    };
    let base = Url::parse(&response.url)
        .or_else(|_| Url::parse(&task.url))
        .ok();

    let mut submissions = Vec::new();
    for rule in &task.follow {
        let values = match extractor.query(&rule.query, &document)? {
            Value::Array(items) => items,
            Value::Null => Vec::new(),
            other => vec![other],
        };

        let mut links: Vec<String> = values
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                _ => None,
            })
            .filter_map(|href| match &base {
                Some(base) => resolve_link(&href, base),
                None => Some(href),
            })
            .collect();

        for filter in &rule.filters {
            links = filter(links, task);
        }

        for link in links {
            let submission = match &rule.factory {
                Some(factory) => factory(&link, task),
                None => Some(Submission::url_with_meta(link, child_meta(task))),
            };
            submissions.extend(submission);
        }
    }

    Ok(submissions)
}
