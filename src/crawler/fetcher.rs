//! HTTP transport
//!
//! This module handles all HTTP requests for the crawler, including:
//! - Building HTTP clients with proper user agent strings
//! - GET requests with per-task headers and timeouts
//! - Redirect limits
//! - Error classification (transport failure vs. rejected status)
//!
//! The engine only talks to the [`Transport`] trait, so tests and embedders can swap the network
//! out entirely.

use crate::config::{TransportConfig, UserAgentConfig};
use async_trait::async_trait;
use reqwest::{redirect::Policy, Client};
use scraper::Html;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// Per-request options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOptions {
    /// Overall request timeout; the client default applies when unset
    pub timeout: Option<Duration>,

    /// Extra request headers
    pub headers: BTreeMap<String, String>,

    /// Non-2xx statuses to hand back as successful responses
    pub allow_status: Vec<u16>,
}

impl FetchOptions {
    /// Layers `other` on top of `self`
    ///
    /// Headers are merged with `other` winning, allowed statuses are unioned, and the timeout of
    /// `other` replaces ours when set.
    pub fn merged(&self, other: &FetchOptions) -> FetchOptions {
        let mut headers = self.headers.clone();
        headers.extend(other.headers.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut allow_status = self.allow_status.clone();
        for status in &other.allow_status {
            if !allow_status.contains(status) {
                allow_status.push(*status);
            }
        }

        FetchOptions {
            timeout: other.timeout.or(self.timeout),
            headers,
            allow_status,
        }
    }
}

/// A fetched page
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// Final URL after redirects
    pub url: String,

    /// HTTP status code
    pub status: u16,

    /// Response headers, names lowercased
    pub headers: BTreeMap<String, String>,

    /// Page body content
    pub body: String,
}

impl Response {
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status,
            headers: BTreeMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// True unless the Content-Type names something other than HTML or XML
    pub fn is_markup(&self) -> bool {
        match self.header("content-type") {
            Some(ct) => ct.contains("html") || ct.contains("xml"),
            None => true,
        }
    }

    /// Parses the body into a queryable document
    ///
    /// Returns `None` for empty bodies and non-markup content types. The returned document is
    /// not `Send`; parse it in synchronous code and drop it before the next `.await`.
    pub fn document(&self) -> Option<Html> {
        if self.body.trim().is_empty() || !self.is_markup() {
            return None;
        }
        Some(Html::parse_document(&self.body))
    }
}

/// Errors produced by a [`Transport`]
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    #[error("Transport error for {url}: {message}")]
    Transport {
        url: String,
        message: String,
        timeout: bool,
    },

    #[error("HTTP {status} for {url}")]
    Status {
        url: String,
        status: u16,
        response: Box<Response>,
    },
}

impl FetchError {
    pub fn url(&self) -> &str {
        match self {
            Self::Transport { url, .. } | Self::Status { url, .. } => url,
        }
    }

    /// The rejected status code, if a response arrived at all
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Transport { .. } => None,
        }
    }

    /// The partial response carried by a status error
    pub fn response(&self) -> Option<&Response> {
        match self {
            Self::Status { response, .. } => Some(response),
            Self::Transport { .. } => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Transport { timeout: true, .. })
    }
}

/// The fetch capability the engine consumes
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<Response, FetchError>;
}

/// Formats the user agent string
///
/// Format: `CrawlerName/Version (+ContactURL; ContactEmail)`, with the parenthesised part
/// reduced to whatever contact details are configured.
pub fn user_agent_string(config: &UserAgentConfig) -> String {
    let contact: Vec<String> = config
        .contact_url
        .iter()
        .map(|url| format!("+{}", url))
        .chain(config.contact_email.iter().cloned())
        .collect();

    if contact.is_empty() {
        format!("{}/{}", config.crawler_name, config.crawler_version)
    } else {
        format!(
            "{}/{} ({})",
            config.crawler_name,
            config.crawler_version,
            contact.join("; ")
        )
    }
}

/// Builds an HTTP client with proper configuration
///
/// # Arguments
///
/// * `user_agent` - The user agent configuration
/// * `transport` - Timeouts and redirect limits
///
/// # Returns
///
/// * `Ok(Client)` - Successfully built HTTP client
/// * `Err(reqwest::Error)` - Failed to build client
///
/// # Example
///
/// ```no_run
/// use sumi_weave::config::{TransportConfig, UserAgentConfig};
/// use sumi_weave::crawler::build_http_client;
///
/// let client = build_http_client(&UserAgentConfig::default(), &TransportConfig::default()).unwrap();
/// ```
pub fn build_http_client(
    user_agent: &UserAgentConfig,
    transport: &TransportConfig,
) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(user_agent_string(user_agent))
        .timeout(Duration::from_secs(transport.timeout_secs))
        .connect_timeout(Duration::from_secs(transport.connect_timeout_secs))
        .redirect(Policy::limited(transport.max_redirects))
        .gzip(true)
        .brotli(true)
        .build()
}

/// [`Transport`] backed by a `reqwest` client
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn from_config(
        user_agent: &UserAgentConfig,
        transport: &TransportConfig,
    ) -> Result<Self, reqwest::Error> {
        build_http_client(user_agent, transport).map(Self::new)
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn fetch(&self, url: &str, options: &FetchOptions) -> Result<Response, FetchError> {
        let mut request = self.client.get(url);
        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| classify(url, &e))?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_ascii_lowercase(), v.to_string()))
            })
            .collect();

        let body = response.text().await.map_err(|e| classify(url, &e))?;
        let response = Response {
            url: final_url,
            status,
            headers,
            body,
        };

        if !response.is_success() && !options.allow_status.contains(&status) {
            tracing::debug!("Rejecting HTTP {} from {}", status, url);
            return Err(FetchError::Status {
                url: url.to_string(),
                status,
                response: Box::new(response),
            });
        }

        Ok(response)
    }
}

fn classify(url: &str, error: &reqwest::Error) -> FetchError {
    let message = if error.is_timeout() {
        "Request timeout".to_string()
    } else if error.is_connect() {
        "Connection refused".to_string()
    } else if error.is_redirect() {
        format!("Redirect error: {}", error)
    } else {
        error.to_string()
    };

    FetchError::Transport {
        url: url.to_string(),
        message,
        timeout: error.is_timeout(),
    }
}
