//! Crawler module: tasks, transport, scheduling and coordination
//!
//! This module contains the core crawling engine, including:
//! - The comparator-driven priority queue tasks wait in
//! - HTTP fetching behind the [`Transport`] seam
//! - The [`Manager`] that admits tasks under a concurrency limit and tracks completion
//! - Spawners that route bare URLs to task templates
//! - The [`Crawler`] that ties plugins, transport and manager together

mod coordinator;
mod fetcher;
mod queue;
mod scheduler;
mod spawner;
mod task;

pub use coordinator::{Crawler, CrawlerBuilder, DrainCallback};
pub use fetcher::{
    build_http_client, user_agent_string, FetchError, FetchOptions, ReqwestTransport, Response,
    Transport,
};
pub use queue::{Comparator, Prioritized, PriorityQueue};
pub use scheduler::{Manager, ManagerEvent, Outcome, TaskHandle, TaskResult, Worker};
pub use spawner::{SpawnFn, Spawner};
pub use task::{
    derive_id, Meta, Submission, Task, TaskCallback, META_DEPTH, META_ID, META_PARENT,
    META_RETRIES,
};
