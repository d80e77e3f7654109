//! Sumi-Weave: a hook-driven crawl engine
//!
//! This crate crawls URLs by pushing tasks through a priority queue and a bounded pool of
//! in-flight passes. Every pass runs an ordered chain of plugin hooks around the fetch, and a
//! small selector/filter query language turns fetched documents into structured data.

pub mod config;
pub mod crawler;
pub mod plugin;
pub mod query;
pub mod url;

use thiserror::Error;

/// Main error type for Sumi-Weave operations
#[derive(Debug, Error)]
pub enum CrawlError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetch error: {0}")]
    Fetch(#[from] crawler::FetchError),

    #[error("Query error: {0}")]
    Query(#[from] query::QueryError),

    #[error("Plugin already registered: {name}")]
    DuplicatePlugin { name: String },

    #[error("Plugin {name} failed to start: {source}")]
    PluginStart { name: String, source: anyhow::Error },

    #[error("{position} hook of plugin {plugin} failed for task {task}: {source}")]
    Hook {
        position: plugin::HookPosition,
        plugin: String,
        task: String,
        source: anyhow::Error,
    },

    #[error("Task {id} panicked while running")]
    Panicked { id: String },

    #[error("Task {id} was abandoned before completion")]
    Abandoned { id: String },

    #[error("URL error: {0}")]
    UrlError(#[from] UrlError),

    #[error("HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize TOML: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),
}

/// URL-specific errors
#[derive(Debug, Error)]
pub enum UrlError {
    #[error("Failed to parse URL: {0}")]
    Parse(String),

    #[error("Invalid URL scheme: {0}")]
    InvalidScheme(String),

    #[error("Missing domain in URL")]
    MissingDomain,
}

/// Result type alias for Sumi-Weave operations
pub type Result<T> = std::result::Result<T, CrawlError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Result type alias for URL operations
pub type UrlResult<T> = std::result::Result<T, UrlError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Crawler, CrawlerBuilder, Task, TaskHandle};
pub use plugin::{Flow, Plugin};
pub use query::{Query, Rule};
