//! URL handling module for Sumi-Weave
//!
//! This module provides URL normalization for duplicate detection, link resolution for
//! follow rules, and the matchers used to route bare URLs to spawners.

mod matcher;
mod normalize;

pub use matcher::{matches_wildcard, UrlMatcher};
pub use normalize::{normalize_url, with_default_scheme, DEFAULT_SCHEME};

use url::Url;

/// Resolves a link href to an absolute URL and validates it
///
/// Returns None if the link should be excluded:
/// - javascript:, mailto:, tel:, data: schemes
/// - fragment-only links
/// - Invalid URLs
/// - Non-HTTP(S) URLs after resolution
///
/// # Examples
///
/// ```
/// use sumi_weave::url::resolve_link;
/// use url::Url;
///
/// let base = Url::parse("https://example.com/a/b").unwrap();
/// assert_eq!(resolve_link("c", &base), Some("https://example.com/a/c".to_string()));
/// assert_eq!(resolve_link("mailto:x@example.com", &base), None);
/// ```
pub fn resolve_link(href: &str, base_url: &Url) -> Option<String> {
    let href = href.trim();

    if href.is_empty() || href.starts_with('#') {
        return None;
    }

    if href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
    {
        return None;
    }

    match base_url.join(href) {
        Ok(absolute_url) if matches!(absolute_url.scheme(), "http" | "https") => {
            Some(absolute_url.to_string())
        }
        _ => None,
    }
}
