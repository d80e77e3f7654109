use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Main configuration structure for Sumi-Weave
///
/// Every section is optional; an empty file is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub crawler: CrawlerConfig,

    #[serde(rename = "user-agent", default)]
    pub user_agent: UserAgentConfig,

    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub attempt: AttemptConfig,

    #[serde(default)]
    pub plugins: PluginsConfig,

    /// Seed tasks submitted by the CLI
    #[serde(rename = "task", default, skip_serializing_if = "Vec::is_empty")]
    pub tasks: Vec<TaskEntry>,

    /// Spawners registered on every crawler built from this configuration
    #[serde(rename = "spawner", default, skip_serializing_if = "Vec::is_empty")]
    pub spawners: Vec<SpawnerEntry>,
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Maximum number of tasks in flight
    pub concurrency: u32,

    /// Start admitting tasks as soon as the crawler is built
    #[serde(rename = "auto-start")]
    pub auto_start: bool,

    /// Delay before each fetch when a task sets none (milliseconds)
    #[serde(rename = "default-delay-ms")]
    pub default_delay_ms: u64,

    /// Link depth beyond which follow rules stop submitting
    #[serde(rename = "max-depth", skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            concurrency: 5,
            auto_start: true,
            default_delay_ms: 0,
            max_depth: None,
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url", skip_serializing_if = "Option::is_none")]
    pub contact_url: Option<String>,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email", skip_serializing_if = "Option::is_none")]
    pub contact_email: Option<String>,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            crawler_name: "SumiWeave".to_string(),
            crawler_version: env!("CARGO_PKG_VERSION").to_string(),
            contact_url: None,
            contact_email: None,
        }
    }
}

/// HTTP transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Overall request timeout (seconds)
    #[serde(rename = "timeout-secs")]
    pub timeout_secs: u64,

    /// Connection timeout (seconds)
    #[serde(rename = "connect-timeout-secs")]
    pub connect_timeout_secs: u64,

    /// Redirects followed before a request fails
    #[serde(rename = "max-redirects")]
    pub max_redirects: usize,

    /// Headers sent with every request
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            connect_timeout_secs: 10,
            max_redirects: 10,
            headers: BTreeMap::new(),
        }
    }
}

/// Default retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AttemptConfig {
    /// Retries allowed after the first failure
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Non-2xx statuses treated as success
    #[serde(rename = "allowed-status", skip_serializing_if = "Vec::is_empty")]
    pub allowed_status: Vec<u16>,
}

impl Default for AttemptConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            allowed_status: Vec::new(),
        }
    }
}

/// Toggles for the plugins every crawler registers on its own
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginsConfig {
    pub attempt: bool,
    pub delay: bool,
    #[serde(rename = "dup-filter")]
    pub dup_filter: bool,
    pub extract: bool,
    pub follow: bool,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            attempt: true,
            delay: true,
            dup_filter: true,
            extract: true,
            follow: true,
        }
    }
}

/// A task declared in the configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskEntry {
    pub url: String,

    #[serde(default)]
    pub priority: i32,

    #[serde(rename = "delay-ms", default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,

    /// Extraction rule: a rule string, `[selector, rule]`, or a table of rules
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub follow: Vec<FollowEntry>,

    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub meta: serde_json::Map<String, Value>,
}

/// A follow rule declared in the configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FollowEntry {
    /// Rule string selecting the links, e.g. `"[a]@href"`
    pub selector: String,

    /// Regex a resolved link must match
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    /// Only follow links on the page's own host
    #[serde(rename = "same-domain", default)]
    pub same_domain: bool,

    /// Submit followed links as tasks with this priority instead of bare URLs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,

    /// Submit followed links as tasks with this extraction rule instead of bare URLs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<Value>,
}

/// A spawner declared in the configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpawnerEntry {
    /// Regex tested against submitted URLs
    pub pattern: String,

    #[serde(default)]
    pub priority: i32,

    #[serde(rename = "delay-ms", default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<Value>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub follow: Vec<FollowEntry>,
}

impl SpawnerEntry {
    /// The task body every spawned task starts from
    pub fn template(&self) -> TaskEntry {
        TaskEntry {
            url: String::new(),
            priority: self.priority,
            delay_ms: self.delay_ms,
            rule: self.rule.clone(),
            follow: self.follow.clone(),
            meta: serde_json::Map::new(),
        }
    }
}
