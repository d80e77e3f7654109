use regex::Regex;
use std::fmt;
use std::sync::Arc;
use url::Url;

/// Checks if a domain matches a wildcard pattern
///
/// This function supports two types of patterns:
/// 1. Exact match: "example.com" matches only "example.com"
/// 2. Wildcard match: "*.example.com" matches the bare domain and any subdomain
///
/// # Examples
///
/// ```
/// use sumi_weave::url::matches_wildcard;
///
/// assert!(matches_wildcard("example.com", "example.com"));
/// assert!(matches_wildcard("*.example.com", "api.v2.example.com"));
/// assert!(!matches_wildcard("*.example.com", "example.org"));
/// ```
pub fn matches_wildcard(pattern: &str, candidate: &str) -> bool {
    if let Some(base) = pattern.strip_prefix("*.") {
        candidate == base || candidate.ends_with(&format!(".{}", base))
    } else {
        candidate == pattern
    }
}

/// Decides whether a submitted URL belongs to a spawner
#[derive(Clone)]
pub enum UrlMatcher {
    /// Regular expression tested against the full URL string
    Regex(Regex),
    /// Wildcard domain pattern (see [`matches_wildcard`]) tested against the host
    Domain(String),
    /// Arbitrary predicate over the URL string
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl UrlMatcher {
    /// Compiles a regex matcher
    pub fn regex(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self::Regex(Regex::new(pattern)?))
    }

    /// Builds a wildcard domain matcher
    pub fn domain(pattern: impl Into<String>) -> Self {
        Self::Domain(pattern.into().to_lowercase())
    }

    /// Wraps a predicate
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    /// Returns true if this matcher accepts the URL
    pub fn matches(&self, url: &str) -> bool {
        match self {
            Self::Regex(re) => re.is_match(url),
            Self::Domain(pattern) => Url::parse(url)
                .ok()
                .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
                .map(|host| matches_wildcard(pattern, &host))
                .unwrap_or(false),
            Self::Predicate(f) => f(url),
        }
    }
}

impl fmt::Debug for UrlMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Regex(re) => f.debug_tuple("Regex").field(&re.as_str()).finish(),
            Self::Domain(pattern) => f.debug_tuple("Domain").field(pattern).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match() {
        assert!(matches_wildcard("example.com", "example.com"));
        assert!(!matches_wildcard("example.com", "blog.example.com"));
    }

    #[test]
    fn test_wildcard_matches_bare_and_nested() {
        assert!(matches_wildcard("*.example.com", "example.com"));
        assert!(matches_wildcard("*.example.com", "deep.nested.example.com"));
    }

    #[test]
    fn test_wildcard_no_match_partial() {
        assert!(!matches_wildcard("*.example.com", "myexample.com"));
        assert!(!matches_wildcard("*.example.com", "example.com.org"));
    }

    #[test]
    fn test_regex_matcher() {
        let matcher = UrlMatcher::regex(r"/item/\d+$").unwrap();
        assert!(matcher.matches("https://shop.test/item/42"));
        assert!(!matcher.matches("https://shop.test/item/abc"));
    }

    #[test]
    fn test_domain_matcher() {
        let matcher = UrlMatcher::domain("*.Shop.test");
        assert!(matcher.matches("https://www.shop.test/a"));
        assert!(!matcher.matches("https://other.test/a"));
        assert!(!matcher.matches("not a url"));
    }

    #[test]
    fn test_predicate_matcher() {
        let matcher = UrlMatcher::predicate(|url| url.ends_with(".html"));
        assert!(matcher.matches("http://a.test/index.html"));
        assert!(!matcher.matches("http://a.test/"));
    }
}
