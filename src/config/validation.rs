use crate::config::types::{
    AttemptConfig, Config, CrawlerConfig, FollowEntry, SpawnerEntry, TaskEntry, TransportConfig,
    UserAgentConfig,
};
use crate::query::{Query, Rule};
use crate::url::with_default_scheme;
use crate::ConfigError;
use regex::Regex;
use serde_json::Value;
use url::Url;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_crawler_config(&config.crawler)?;
    validate_user_agent_config(&config.user_agent)?;
    validate_transport_config(&config.transport)?;
    validate_attempt_config(&config.attempt)?;
    validate_tasks(&config.tasks)?;
    validate_spawners(&config.spawners)?;
    Ok(())
}

/// Validates crawler configuration
fn validate_crawler_config(config: &CrawlerConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 1000 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 1000, got {}",
            config.concurrency
        )));
    }

    Ok(())
}

/// Validates user agent configuration
fn validate_user_agent_config(config: &UserAgentConfig) -> Result<(), ConfigError> {
    // Validate crawler name: non-empty, alphanumeric + hyphens only
    if config.crawler_name.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_name cannot be empty".to_string(),
        ));
    }

    if !config
        .crawler_name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-')
    {
        return Err(ConfigError::Validation(format!(
            "crawler_name must contain only alphanumeric characters and hyphens, got '{}'",
            config.crawler_name
        )));
    }

    if config.crawler_version.is_empty() {
        return Err(ConfigError::Validation(
            "crawler_version cannot be empty".to_string(),
        ));
    }

    if let Some(contact_url) = &config.contact_url {
        Url::parse(contact_url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid contact_url: {}", e)))?;
    }

    if let Some(email) = &config.contact_email {
        validate_email(email)?;
    }

    Ok(())
}

/// Validates transport configuration
fn validate_transport_config(config: &TransportConfig) -> Result<(), ConfigError> {
    if config.timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "timeout_secs must be >= 1, got {}",
            config.timeout_secs
        )));
    }

    if config.connect_timeout_secs < 1 {
        return Err(ConfigError::Validation(format!(
            "connect_timeout_secs must be >= 1, got {}",
            config.connect_timeout_secs
        )));
    }

    for name in config.headers.keys() {
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(ConfigError::Validation(format!(
                "Invalid header name: '{}'",
                name
            )));
        }
    }

    Ok(())
}

/// Validates the default retry policy
fn validate_attempt_config(config: &AttemptConfig) -> Result<(), ConfigError> {
    if config.max_retries > 100 {
        return Err(ConfigError::Validation(format!(
            "max_retries must be <= 100, got {}",
            config.max_retries
        )));
    }

    for status in &config.allowed_status {
        if !(100..=599).contains(status) {
            return Err(ConfigError::Validation(format!(
                "allowed_status entries must be HTTP status codes, got {}",
                status
            )));
        }
    }

    Ok(())
}

/// Validates seed task entries
fn validate_tasks(tasks: &[TaskEntry]) -> Result<(), ConfigError> {
    for task in tasks {
        let url = with_default_scheme(&task.url);
        let parsed = Url::parse(&url)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid task URL '{}': {}", task.url, e)))?;

        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ConfigError::InvalidUrl(format!(
                "Task URL '{}' must use HTTP or HTTPS",
                task.url
            )));
        }

        if let Some(rule) = &task.rule {
            validate_rule(rule, &task.url)?;
        }
        validate_follow_entries(&task.follow)?;
    }

    Ok(())
}

/// Validates spawner entries
fn validate_spawners(spawners: &[SpawnerEntry]) -> Result<(), ConfigError> {
    for spawner in spawners {
        validate_pattern(&spawner.pattern)?;
        if let Some(rule) = &spawner.rule {
            validate_rule(rule, &spawner.pattern)?;
        }
        validate_follow_entries(&spawner.follow)?;
    }

    Ok(())
}

fn validate_follow_entries(entries: &[FollowEntry]) -> Result<(), ConfigError> {
    for entry in entries {
        Query::parse(&entry.selector).map_err(|e| {
            ConfigError::Validation(format!("Invalid follow selector '{}': {}", entry.selector, e))
        })?;

        if let Some(pattern) = &entry.pattern {
            validate_pattern(pattern)?;
        }
        if let Some(rule) = &entry.rule {
            validate_rule(rule, &entry.selector)?;
        }
    }

    Ok(())
}

/// Validates a regex pattern
fn validate_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Pattern cannot be empty".to_string(),
        ));
    }

    Regex::new(pattern)
        .map_err(|e| ConfigError::InvalidPattern(format!("'{}': {}", pattern, e)))?;

    Ok(())
}

/// Validates that a rule value has a known shape and every rule string parses
fn validate_rule(rule: &Value, owner: &str) -> Result<(), ConfigError> {
    Rule::from_value(rule)
        .map(|_| ())
        .map_err(|e| ConfigError::Validation(format!("Invalid rule for '{}': {}", owner, e)))
}

/// Basic email validation
fn validate_email(email: &str) -> Result<(), ConfigError> {
    if email.is_empty() {
        return Err(ConfigError::Validation(
            "contact_email cannot be empty".to_string(),
        ));
    }

    // Basic email format check: must contain @ and have text on both sides
    let parts: Vec<&str> = email.split('@').collect();
    if parts.len() != 2 {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    let local = parts[0];
    let domain = parts[1];

    if local.is_empty() || domain.is_empty() {
        return Err(ConfigError::Validation(format!(
            "Invalid email format: '{}'",
            email
        )));
    }

    // Domain part should contain at least one dot
    if !domain.contains('.') {
        return Err(ConfigError::Validation(format!(
            "Invalid email domain: '{}'",
            email
        )));
    }

    Ok(())
}
