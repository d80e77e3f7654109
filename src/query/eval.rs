use super::{FilterRegistry, Query, QueryError, Rule};
use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Evaluates rules against parsed documents
///
/// Cloning is cheap; the filter registry is shared.
#[derive(Debug, Clone, Default)]
pub struct Extractor {
    filters: Arc<FilterRegistry>,
}

/// The node a rule is evaluated against
#[derive(Clone, Copy)]
enum Scope<'a> {
    Document(&'a Html),
    Element(ElementRef<'a>),
}

impl<'a> Scope<'a> {
    fn node(self) -> ElementRef<'a> {
        match self {
            Scope::Document(doc) => doc.root_element(),
            Scope::Element(el) => el,
        }
    }

    /// Matching nodes in document order; an empty selector yields the scope node itself
    fn select(self, selector: &str) -> Result<Vec<ElementRef<'a>>, QueryError> {
        if selector.is_empty() {
            return Ok(vec![self.node()]);
        }

        let parsed = Selector::parse(selector).map_err(|e| {
            QueryError::MalformedQuery(format!("invalid selector '{}': {:?}", selector, e))
        })?;

        Ok(match self {
            Scope::Document(doc) => doc.select(&parsed).collect(),
            Scope::Element(el) => el.select(&parsed).collect(),
        })
    }
}

impl Extractor {
    pub fn new(filters: FilterRegistry) -> Self {
        Self {
            filters: Arc::new(filters),
        }
    }

    pub fn filters(&self) -> &FilterRegistry {
        &self.filters
    }

    /// Evaluates `rule` against a whole document
    ///
    /// A missing match is never an error: single queries yield `null`, `[...]` queries
    /// yield an empty array.
    pub fn extract(&self, rule: &Rule, document: &Html) -> Result<Value, QueryError> {
        self.eval(rule, Scope::Document(document))
    }

    /// Parses `html` and evaluates `rule` against it
    pub fn extract_html(&self, rule: &Rule, html: &str) -> Result<Value, QueryError> {
        let document = Html::parse_document(html);
        self.extract(rule, &document)
    }

    /// Evaluates a single query plan against a whole document
    pub fn query(&self, query: &Query, document: &Html) -> Result<Value, QueryError> {
        self.eval_query(query, Scope::Document(document))
    }

    fn eval(&self, rule: &Rule, scope: Scope<'_>) -> Result<Value, QueryError> {
        match rule {
            Rule::Query(query) => self.eval_query(query, scope),

            Rule::Each {
                selector,
                rule,
                transform,
            } => {
                let mut results = Vec::new();
                for node in scope.select(selector)? {
                    let value = self.eval(rule, Scope::Element(node))?;
                    results.push(match transform {
                        Some(t) => t(value),
                        None => value,
                    });
                }
                Ok(Value::Array(results))
            }

            Rule::Object(entries) => {
                let mut out = Map::new();
                for (key, rule) in entries {
                    out.insert(key.clone(), self.eval(rule, scope)?);
                }
                Ok(Value::Object(out))
            }

            Rule::Piped {
                rule,
                transform,
                keep,
            } => {
                let value = transform(self.eval(rule, scope)?);
                Ok(match (value, keep) {
                    (Value::Array(items), Some(keep)) => {
                        Value::Array(items.into_iter().filter(|v| keep(v)).collect())
                    }
                    (value, _) => value,
                })
            }
        }
    }

    fn eval_query(&self, query: &Query, scope: Scope<'_>) -> Result<Value, QueryError> {
        let nodes = scope.select(&query.selector)?;
        let read = |node: &ElementRef<'_>| read_node(node, query.attribute.as_deref());

        let value = if query.get_all {
            Value::Array(nodes.iter().map(read).collect())
        } else {
            nodes.first().map(read).unwrap_or(Value::Null)
        };

        query
            .filters
            .iter()
            .try_fold(value, |acc, call| self.filters.apply(call, acc))
    }
}

/// Reads a node's attribute, or its text content when no attribute is requested
fn read_node(node: &ElementRef<'_>, attribute: Option<&str>) -> Value {
    match attribute {
        Some(name) => node
            .value()
            .attr(name)
            .map(|v| Value::String(v.to_string()))
            .unwrap_or(Value::Null),
        None => Value::String(node.text().collect()),
    }
}
