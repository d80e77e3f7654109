use super::QueryError;
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// A single filter argument
///
/// Arguments are parsed as integers when possible, else as floats, else kept as raw strings.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterArg {
    Int(i64),
    Float(f64),
    Str(String),
}

impl FilterArg {
    /// Parses one comma-separated argument
    ///
    /// Surrounding whitespace is dropped, except when it is the whole argument: `split: ` splits
    /// on a space.
    fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Self::Str(raw.to_string());
        }
        if let Ok(i) = trimmed.parse::<i64>() {
            return Self::Int(i);
        }
        match trimmed.parse::<f64>() {
            Ok(f) if f.is_finite() => Self::Float(f),
            _ => Self::Str(trimmed.to_string()),
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(i) => Some(*i),
            Self::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Self::Float(_) => None,
            Self::Str(s) => s.parse().ok(),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Float(f) => Some(*f),
            Self::Str(s) => s.parse().ok(),
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(i) => Value::from(*i),
            Self::Float(f) => Value::from(*f),
            Self::Str(s) => Value::String(s.clone()),
        }
    }
}

impl fmt::Display for FilterArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{}", i),
            Self::Float(x) => write!(f, "{}", x),
            Self::Str(s) => f.write_str(s),
        }
    }
}

/// One `name:arg,arg` segment of a filter chain
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCall {
    pub name: String,
    pub args: Vec<FilterArg>,
}

/// Parsed form of a rule string
///
/// An empty `selector` addresses the node the query is evaluated against.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub selector: String,
    pub attribute: Option<String>,
    pub get_all: bool,
    pub filters: Vec<FilterCall>,
}

impl Query {
    /// Parses a rule string such as `"[a]@href | slice:0,5"`
    ///
    /// Filter names are not checked here; unknown names fail at evaluation.
    ///
    /// # Examples
    ///
    /// ```
    /// use sumi_weave::query::{FilterArg, Query};
    ///
    /// let query = Query::parse("[a]@href | slice:0,5").unwrap();
    /// assert_eq!(query.selector, "a");
    /// assert_eq!(query.attribute.as_deref(), Some("href"));
    /// assert!(query.get_all);
    /// assert_eq!(query.filters[0].args, vec![FilterArg::Int(0), FilterArg::Int(5)]);
    /// ```
    pub fn parse(input: &str) -> Result<Self, QueryError> {
        let mut segments = split_pipes(input).into_iter();
        let head = segments.next().unwrap_or_default().trim();

        let (body, get_all) = split_get_all(head)?;
        let (selector, attribute) = split_attribute(&body)?;

        let filters = segments
            .map(parse_filter)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            selector,
            attribute,
            get_all,
            filters,
        })
    }

    /// Returns the same plan with `get_all` forced on
    pub fn all(mut self) -> Self {
        self.get_all = true;
        self
    }
}

impl FromStr for Query {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.get_all {
            write!(f, "[{}]", self.selector)?;
        } else {
            f.write_str(&self.selector)?;
        }
        if let Some(attr) = &self.attribute {
            write!(f, "@{}", attr)?;
        }
        let mut padded = true;
        for filter in &self.filters {
            // A blank trailing argument would absorb the padding before the next bar
            let bar = if padded { " | " } else { "| " };
            write!(f, "{}{}", bar, filter.name)?;
            if !filter.args.is_empty() {
                let args: Vec<String> = filter.args.iter().map(|a| a.to_string()).collect();
                write!(f, ":{}", args.join(","))?;
            }
            padded = !matches!(
                filter.args.last(),
                Some(FilterArg::Str(s)) if s.trim().is_empty()
            );
        }
        Ok(())
    }
}

/// Splits a rule string on the `|` that start filters
///
/// A `|` inside brackets, parentheses or quotes of the selector belongs to the selector, as in
/// `a[hreflang|=en]`. Filter arguments are not scanned, so `replace:[,` stays literal.
fn split_pipes(input: &str) -> Vec<&str> {
    let mut depth = 0usize;
    let mut quote = None;

    for (idx, ch) in input.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') if depth > 0 => quote = Some(ch),
            (None, '[' | '(') => depth += 1,
            (None, ']' | ')') => depth = depth.saturating_sub(1),
            (None, '|') if depth == 0 => {
                let mut segments = vec![&input[..idx]];
                segments.extend(input[idx + 1..].split('|'));
                return segments;
            }
            _ => {}
        }
    }
    vec![input]
}

/// Strips a `[...]` wrapper from the head, honoring nested brackets inside the selector
fn split_get_all(head: &str) -> Result<(String, bool), QueryError> {
    if !head.starts_with('[') {
        return Ok((head.to_string(), false));
    }

    let mut depth = 0usize;
    let mut quote = None;
    for (idx, ch) in head.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '[') => depth += 1,
            (None, ']') => {
                depth -= 1;
                if depth == 0 {
                    let inner = head[1..idx].trim();
                    let rest = head[idx + 1..].trim();
                    return Ok((format!("{}{}", inner, rest), true));
                }
            }
            _ => {}
        }
    }

    Err(QueryError::MalformedQuery(format!(
        "unbalanced '[' in '{}'",
        head
    )))
}

/// Splits a trailing `@attr` off the selector text
fn split_attribute(body: &str) -> Result<(String, Option<String>), QueryError> {
    let Some(pos) = body.rfind('@') else {
        return Ok((body.trim().to_string(), None));
    };

    let name = body[pos + 1..].trim();
    if name.is_empty() {
        return Err(QueryError::MalformedQuery(format!(
            "missing attribute name after '@' in '{}'",
            body
        )));
    }

    // An '@' inside an attribute selector value, e.g. a[href^="mailto:x@y"], is not a suffix
    let is_name = name
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | ':' | '.'));
    if !is_name {
        return Ok((body.trim().to_string(), None));
    }

    Ok((body[..pos].trim().to_string(), Some(name.to_string())))
}

fn parse_filter(segment: &str) -> Result<FilterCall, QueryError> {
    let segment = segment.trim_start();
    let (name, args) = match segment.split_once(':') {
        Some((name, args)) => (name.trim(), Some(args)),
        None => (segment.trim_end(), None),
    };

    if name.is_empty() {
        return Err(QueryError::MalformedQuery(format!(
            "empty filter name in segment '{}'",
            segment
        )));
    }

    let args = match args {
        Some(raw) if !raw.is_empty() => raw.split(',').map(FilterArg::parse).collect(),
        _ => Vec::new(),
    };

    Ok(FilterCall {
        name: name.to_string(),
        args,
    })
}
