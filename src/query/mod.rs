//! Extraction query language
//!
//! Rules are small selector/filter-chain strings such as `"[a]@href | trim | count"`,
//! composed into arrays and objects. A rule string is parsed once into a [`Query`] plan and
//! evaluated by an [`Extractor`] against a parsed `scraper::Html` document.
//!
//! # Rule string grammar
//!
//! ```text
//! rule    := head ( "|" filter )*
//! head    := ( "[" selector "]" | selector ) ( "@" attribute )?
//! filter  := name ( ":" arg ( "," arg )* )?
//! ```
//!
//! Wrapping the selector in brackets returns every match instead of the first one. A `|` inside
//! the selector's brackets or quotes is part of the selector. Arguments are trimmed unless they
//! are blank, so `split: ` splits on a space.
//!
//! # Example
//!
//! ```
//! use sumi_weave::query::{Extractor, Rule};
//! use serde_json::json;
//!
//! let html = r#"<ul><li><a href="/a">A</a></li><li><a href="/b">B</a></li></ul>"#;
//! let rule = Rule::object([
//!     ("first", Rule::parse("a@href").unwrap()),
//!     ("count", Rule::parse("[li] | count").unwrap()),
//! ]);
//!
//! let value = Extractor::default().extract_html(&rule, html).unwrap();
//! assert_eq!(value, json!({"first": "/a", "count": 2}));
//! ```

mod eval;
mod filters;
mod parser;
mod rule;

pub use eval::Extractor;
pub use filters::{FilterFn, FilterRegistry};
pub use parser::{FilterArg, FilterCall, Query};
pub use rule::{Keep, Rule, Transform};

use thiserror::Error;

/// Errors raised while parsing or evaluating extraction rules
#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueryError {
    #[error("Unknown filter: {0}")]
    UnknownFilter(String),

    #[error("Malformed query: {0}")]
    MalformedQuery(String),

    #[error("Filter {filter} failed: {message}")]
    MalformedFilter { filter: String, message: String },
}
