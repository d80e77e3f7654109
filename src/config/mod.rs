//! Configuration module for Sumi-Weave
//!
//! This module handles loading, parsing, merging, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use sumi_weave::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("config.toml")).unwrap();
//! println!("Crawler will run {} tasks at once", config.crawler.concurrency);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    AttemptConfig, Config, CrawlerConfig, FollowEntry, PluginsConfig, SpawnerEntry, TaskEntry,
    TransportConfig, UserAgentConfig,
};

// Re-export parser functions
pub use parser::{compute_config_hash, load_config, load_config_with_hash, merge_config, parse_config};
pub use validation::validate;
