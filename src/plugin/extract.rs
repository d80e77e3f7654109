use super::{AfterHook, HookPosition, Plugin};
use crate::crawler::{Crawler, Response, Task};
use crate::query::{Extractor, QueryError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Evaluates [`Task::rule`] against the fetched document into [`Task::extracted`]
pub struct Extract;

impl Extract {
    pub const NAME: &'static str = "extract";

    pub fn plugin() -> Plugin {
        Plugin::new(Self::NAME)
            .with_priority_for(HookPosition::After, 200)
            .after(Arc::new(Extract))
    }
}

#[async_trait]
impl AfterHook for Extract {
    async fn after(&self, task: &mut Task, crawler: &Crawler) -> anyhow::Result<()> {
        if let Some(value) = extract(task, crawler.extractor())? {
            task.extracted = Some(value);
        }
        Ok(())
    }
}

/// `None` when the task has no rule or the response is not a document
fn extract(task: &Task, extractor: &Extractor) -> Result<Option<Value>, QueryError> {
    let Some(rule) = &task.rule else {
        return Ok(None);
    };
    let Some(document) = task.response.as_ref().and_then(Response::document) else {
        tracing::debug!("No document to extract from for {}", task.url);
        return Ok(None);
    };
    extractor.extract(rule, &document).map(Some)
}
