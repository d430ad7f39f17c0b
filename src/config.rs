//! Queue configuration.
//!
//! Fixed at construction time. The two settings operators flip at runtime (drain mode and
//! the team list) are only the initial values here; the live values are owned by the queue.

use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Address other queues use to reach this one; also recorded as `ChildQueueUrl`
    /// on elements this queue acquires from its parent.
    pub queue_url: String,
    /// How long an inbox entry may stay Negotiating before it is marked Failed.
    pub retry_window: Duration,
    /// Split work inside `queue_work` instead of waiting for the next inbound pass.
    pub split_on_queue: bool,
    pub default_files_per_job: u64,
    pub default_events_per_job: u64,
    pub spec_cache_capacity: usize,
    pub poll_interval: Duration,
    pub cleanup_interval: Duration,
    pub http_timeout: Duration,
    pub http_attempts: usize,
    pub teams: Vec<String>,
    pub drain_mode: bool,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_url: "http://127.0.0.1:8080".to_string(),
            retry_window: Duration::from_secs(24 * 60 * 60),
            split_on_queue: true,
            default_files_per_job: 1,
            default_events_per_job: 1000,
            spec_cache_capacity: 128,
            poll_interval: Duration::from_secs(5),
            cleanup_interval: Duration::from_secs(30),
            http_timeout: Duration::from_millis(2000),
            http_attempts: 3,
            teams: Vec::new(),
            drain_mode: false,
        }
    }
}

impl QueueConfig {
    pub fn with_url(url: &str) -> Self {
        Self {
            queue_url: url.to_string(),
            ..Default::default()
        }
    }
}
