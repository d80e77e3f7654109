//! Per-task fetch throttling

use super::{BeforeHook, HookPosition, Plugin};
use crate::crawler::{Crawler, Task};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Sleeps before each fetch
///
/// Uses [`Task::delay`] when set and the crawler-wide default otherwise.
pub struct Delay {
    default: Duration,
}

impl Delay {
    pub const NAME: &'static str = "delay";

    pub fn new(default: Duration) -> Self {
        Self { default }
    }

    pub fn plugin(default: Duration) -> Plugin {
        Plugin::new(Self::NAME)
            .with_priority_for(HookPosition::Before, 100)
            .before(Arc::new(Self::new(default)))
    }
}

#[async_trait]
impl BeforeHook for Delay {
    async fn before(&self, task: &mut Task, _crawler: &Crawler) -> anyhow::Result<()> {
        let delay = task.delay.unwrap_or(self.default);
        if !delay.is_zero() {
            tracing::trace!("Delaying {} by {:?}", task.url, delay);
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}
