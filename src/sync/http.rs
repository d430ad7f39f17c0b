//! Parent reached over HTTP.

use super::parent::ParentQueue;
use super::protocol::*;
use crate::store::types::{Document, Element, ElementId};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::time::Duration;

pub struct HttpParent {
    base_url: String,
    http_client: reqwest::Client,
    timeout: Duration,
    attempts: usize,
}

impl HttpParent {
    pub fn new(base_url: &str, timeout: Duration, attempts: usize) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http_client: reqwest::Client::new(),
            timeout,
            attempts: attempts.max(1),
        }
    }

    /// POSTs `payload` and decodes the JSON answer. Connection errors are retried with
    /// exponential backoff and jitter; HTTP error statuses are not.
    async fn post_with_retry<T: Serialize, R: DeserializeOwned>(
        &self,
        endpoint: &str,
        payload: &T,
    ) -> Result<R> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut delay_ms = 150u64;

        for attempt in 0..self.attempts {
            let response = self
                .http_client
                .post(url.clone())
                .json(payload)
                .timeout(self.timeout)
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let resp = resp
                        .error_for_status()
                        .with_context(|| format!("{} rejected the call", url))?;
                    return resp
                        .json::<R>()
                        .await
                        .with_context(|| format!("bad response from {}", url));
                }
                Err(e) => {
                    if attempt + 1 == self.attempts {
                        return Err(anyhow::anyhow!(e).context(format!("POST {}", url)));
                    }
                    tracing::debug!("POST {} failed (attempt {}): {}", url, attempt + 1, e);
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow::anyhow!("Retry attempts exhausted"))
    }
}

#[async_trait]
impl ParentQueue for HttpParent {
    fn url(&self) -> &str {
        &self.base_url
    }

    async fn acquire(&self, request: AcquireRequest) -> Result<Vec<ElementId>> {
        let resp: AcquireResponse = self.post_with_retry(ENDPOINT_ACQUIRE, &request).await?;
        Ok(resp.acquired)
    }

    async fn snapshot(&self, child_url: &str, known: Vec<ElementId>) -> Result<ParentSnapshot> {
        let request = SnapshotRequest {
            child_url: child_url.to_string(),
            known,
        };
        self.post_with_retry(ENDPOINT_SNAPSHOT, &request).await
    }

    async fn push(
        &self,
        child_url: &str,
        documents: Vec<Document<Element>>,
    ) -> Result<Vec<Acknowledgement>> {
        let request = PushRequest {
            child_url: child_url.to_string(),
            documents,
        };
        let resp: PushResponse = self.post_with_retry(ENDPOINT_PUSH, &request).await?;
        Ok(resp.acknowledged)
    }
}
