use super::{Query, QueryError};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Function applied to an evaluated value
pub type Transform = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Predicate deciding which array elements survive a [`Rule::Piped`] rule
pub type Keep = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

/// An extraction rule, built once and evaluated many times
#[derive(Clone)]
pub enum Rule {
    /// A single selector/filter chain
    Query(Query),

    /// Evaluate `rule` once per node matched by `selector`, scoped to that node
    Each {
        selector: String,
        rule: Box<Rule>,
        transform: Option<Transform>,
    },

    /// Evaluate every entry, producing an object with the same keys
    Object(BTreeMap<String, Rule>),

    /// Evaluate `rule`, transform the whole result, then optionally filter array elements
    Piped {
        rule: Box<Rule>,
        transform: Transform,
        keep: Option<Keep>,
    },
}

impl Rule {
    /// Parses a rule string into a [`Rule::Query`]
    pub fn parse(input: &str) -> Result<Self, QueryError> {
        Query::parse(input).map(Self::Query)
    }

    /// Builds a per-node rule
    pub fn each(selector: impl Into<String>, rule: Rule) -> Self {
        Self::Each {
            selector: selector.into(),
            rule: Box::new(rule),
            transform: None,
        }
    }

    /// Builds an object rule from `(key, rule)` pairs
    pub fn object<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Rule)>,
    {
        Self::Object(entries.into_iter().map(|(k, r)| (k.into(), r)).collect())
    }

    /// Attaches a transform
    ///
    /// On an [`Rule::Each`] rule without a transform, the function runs once per element.
    /// Everywhere else the rule is wrapped in [`Rule::Piped`] and the function sees the whole
    /// value.
    pub fn with_transform<F>(self, f: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        match self {
            Self::Each {
                selector,
                rule,
                transform: None,
            } => Self::Each {
                selector,
                rule,
                transform: Some(Arc::new(f)),
            },
            other => Self::Piped {
                rule: Box::new(other),
                transform: Arc::new(f),
                keep: None,
            },
        }
    }

    /// Keeps only the array elements accepted by `f`
    pub fn keep<F>(self, f: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        match self {
            Self::Piped {
                rule,
                transform,
                keep: None,
            } => Self::Piped {
                rule,
                transform,
                keep: Some(Arc::new(f)),
            },
            other => Self::Piped {
                rule: Box::new(other),
                transform: Arc::new(|v: Value| v),
                keep: Some(Arc::new(f)),
            },
        }
    }

    /// Builds a rule from a JSON value
    ///
    /// - a string is a rule string
    /// - `[selector, rule]` evaluates `rule` per node matched by `selector`
    /// - `[rule]` is the rule string with every match returned
    /// - an object maps keys to rules
    ///
    /// # Examples
    ///
    /// ```
    /// use sumi_weave::query::Rule;
    /// use serde_json::json;
    ///
    /// let rule = Rule::from_value(&json!({
    ///     "title": "h1 | trim",
    ///     "links": ["li", "a@href"],
    /// }))
    /// .unwrap();
    /// assert!(matches!(rule, Rule::Object(_)));
    /// ```
    pub fn from_value(value: &Value) -> Result<Self, QueryError> {
        match value {
            Value::String(s) => Self::parse(s),
            Value::Array(items) => match items.as_slice() {
                [Value::String(s)] => Ok(Self::Query(Query::parse(s)?.all())),
                [Value::String(selector), inner] => {
                    let scope = Query::parse(selector)?;
                    if scope.attribute.is_some() || !scope.filters.is_empty() {
                        return Err(QueryError::MalformedQuery(format!(
                            "per-node selector '{}' cannot carry an attribute or filters",
                            selector
                        )));
                    }
                    Ok(Self::each(scope.selector, Self::from_value(inner)?))
                }
                _ => Err(QueryError::MalformedQuery(format!(
                    "array rules take the form [selector, rule], got {}",
                    value
                ))),
            },
            Value::Object(map) => map
                .iter()
                .map(|(k, v)| Ok((k.clone(), Self::from_value(v)?)))
                .collect::<Result<BTreeMap<_, _>, QueryError>>()
                .map(Self::Object),
            other => Err(QueryError::MalformedQuery(format!(
                "unsupported rule value {}",
                other
            ))),
        }
    }

    /// Returns the plan when this rule is a plain query
    pub fn as_query(&self) -> Option<&Query> {
        match self {
            Self::Query(q) => Some(q),
            _ => None,
        }
    }
}

impl From<Query> for Rule {
    fn from(query: Query) -> Self {
        Self::Query(query)
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query(q) => f.debug_tuple("Query").field(&q.to_string()).finish(),
            Self::Each {
                selector,
                rule,
                transform,
            } => f
                .debug_struct("Each")
                .field("selector", selector)
                .field("rule", rule)
                .field("transform", &transform.is_some())
                .finish(),
            Self::Object(map) => f.debug_tuple("Object").field(map).finish(),
            Self::Piped { rule, keep, .. } => f
                .debug_struct("Piped")
                .field("rule", rule)
                .field("keep", &keep.is_some())
                .finish(),
        }
    }
}
