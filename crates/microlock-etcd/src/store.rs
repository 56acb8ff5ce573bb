//! etcd v2 keys API store with endpoint failover
//!
//! Conditional writes go out as form-encoded `PUT`s, conditional deletes as
//! `DELETE ?prevValue=`. A transport failure moves the client to the next
//! endpoint for the *next* request; the failed request is never replayed, since
//! a create or compare-and-swap may already have been applied.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use microlock_core::store::StoreResult;
use microlock_core::{CoordinationStore, SetOptions, StoreError, StoreResponse, Watch};
use reqwest::{Client, RequestBuilder, Url};
use tracing::{debug, warn};

use crate::config::EtcdClientConfig;
use crate::response::{decode, decode_required};
use crate::watcher;

/// [`CoordinationStore`] backed by an etcd cluster speaking the v2 keys API.
///
/// Cheap to clone; clones share the HTTP connection pools and the failover
/// position.
#[derive(Clone)]
pub struct EtcdStore {
    inner: Arc<EtcdInner>,
}

pub(crate) struct EtcdInner {
    client: Client,
    // Long-polls must not be cut off by the read timeout.
    watch_client: Client,
    config: EtcdClientConfig,
    current_endpoint_index: RwLock<usize>,
}

impl std::fmt::Debug for EtcdStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EtcdStore")
            .field("endpoints", &self.inner.config.endpoints)
            .field("current", &self.inner.current_endpoint())
            .finish()
    }
}

impl EtcdStore {
    /// Create a new store client. No request is made until the first operation.
    pub fn new(config: EtcdClientConfig) -> StoreResult<Self> {
        if config.endpoints.is_empty() {
            return Err(StoreError::Other(anyhow::anyhow!(
                "at least one etcd endpoint is required"
            )));
        }
        for endpoint in &config.endpoints {
            Url::parse(endpoint).map_err(|e| {
                StoreError::Other(anyhow::anyhow!("invalid etcd endpoint {}: {}", endpoint, e))
            })?;
        }

        let client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .build()
            .map_err(transport)?;
        let watch_client = Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()
            .map_err(transport)?;

        Ok(Self {
            inner: Arc::new(EtcdInner {
                client,
                watch_client,
                config,
                current_endpoint_index: RwLock::new(0),
            }),
        })
    }

    pub fn config(&self) -> &EtcdClientConfig {
        &self.inner.config
    }

    /// Endpoint the next request will be sent to
    pub fn current_endpoint(&self) -> String {
        self.inner.current_endpoint()
    }
}

impl EtcdInner {
    pub(crate) fn current_endpoint(&self) -> String {
        let index = *self
            .current_endpoint_index
            .read()
            .unwrap_or_else(|e| e.into_inner());
        self.config.endpoints[index].clone()
    }

    /// Switch to the next endpoint (for failover)
    pub(crate) fn switch_to_next_endpoint(&self) {
        let mut index = self
            .current_endpoint_index
            .write()
            .unwrap_or_else(|e| e.into_inner());
        *index = (*index + 1) % self.config.endpoints.len();
        debug!("Switched to etcd endpoint index: {}", *index);
    }

    pub(crate) fn watch_retry(&self) -> Duration {
        Duration::from_millis(self.config.watch_retry_ms)
    }

    /// URL of `key` on the current endpoint
    pub(crate) fn key_url(&self, key: &str) -> StoreResult<Url> {
        key_url(&self.current_endpoint(), &self.config.key_prefix, key)
    }

    fn with_auth(&self, builder: RequestBuilder) -> RequestBuilder {
        if self.config.has_auth() {
            builder.basic_auth(&self.config.username, Some(&self.config.password))
        } else {
            builder
        }
    }

    /// Send a request; on transport failure rotate the endpoint and give up.
    async fn send(&self, builder: RequestBuilder) -> StoreResult<(reqwest::StatusCode, String)> {
        let response = match self.with_auth(builder).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!("etcd request failed on {}: {}", self.current_endpoint(), e);
                self.switch_to_next_endpoint();
                return Err(transport(e));
            }
        };

        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        Ok((status, body))
    }

    /// One long-poll for the next change of `key` at or after `wait_index`.
    ///
    /// `Ok(None)` means the poll ended without a change.
    pub(crate) async fn poll_change(
        &self,
        key: &str,
        wait_index: Option<u64>,
    ) -> StoreResult<Option<StoreResponse>> {
        let url = self.key_url(key)?;
        let mut query = vec![("wait", "true".to_string())];
        if let Some(index) = wait_index {
            query.push(("waitIndex", index.to_string()));
        }

        let (status, body) = self.send(self.watch_client.get(url).query(&query)).await?;
        decode(status, &body)
    }
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn set(
        &self,
        key: &str,
        value: Option<&str>,
        options: SetOptions,
    ) -> StoreResult<StoreResponse> {
        let url = self.inner.key_url(key)?;
        let form = set_form(value, &options);
        debug!("etcd PUT {} {:?}", url, form);

        let (status, body) = self.inner.send(self.inner.client.put(url).form(&form)).await?;
        decode_required(status, &body)
    }

    async fn compare_and_delete(
        &self,
        key: &str,
        prev_value: &str,
    ) -> StoreResult<StoreResponse> {
        let url = self.inner.key_url(key)?;
        debug!("etcd DELETE {} prevValue={}", url, prev_value);

        let request = self
            .inner
            .client
            .delete(url)
            .query(&[("prevValue", prev_value)]);
        let (status, body) = self.inner.send(request).await?;
        decode_required(status, &body)
    }

    async fn get(&self, key: &str) -> StoreResult<StoreResponse> {
        let url = self.inner.key_url(key)?;
        let (status, body) = self.inner.send(self.inner.client.get(url)).await?;
        decode_required(status, &body)
    }

    fn watch(&self, key: &str) -> StoreResult<Watch> {
        let (tx, watch) = Watch::channel(key);
        watcher::spawn(self.inner.clone(), key.to_string(), tx);
        Ok(watch)
    }
}

fn transport(e: reqwest::Error) -> StoreError {
    StoreError::Transport(Box::new(e))
}

/// Build the URL of `key` below `prefix` on `endpoint`.
///
/// Each path segment is percent-encoded on its own, so keys may contain any
/// character except `/`, which separates directories.
fn key_url(endpoint: &str, prefix: &str, key: &str) -> StoreResult<Url> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| StoreError::Protocol(format!("invalid endpoint {}: {}", endpoint, e)))?;
    {
        let mut segments = url
            .path_segments_mut()
            .map_err(|_| StoreError::Protocol(format!("endpoint {} cannot be a base", endpoint)))?;
        segments.pop_if_empty();
        for segment in prefix.split('/').chain(key.split('/')) {
            if !segment.is_empty() {
                segments.push(segment);
            }
        }
    }
    Ok(url)
}

/// Form fields of a conditional write.
fn set_form(value: Option<&str>, options: &SetOptions) -> Vec<(&'static str, String)> {
    let mut form = Vec::new();
    if let Some(value) = value {
        form.push(("value", value.to_string()));
    }
    if let Some(ttl) = options.ttl {
        form.push(("ttl", ttl.to_string()));
    }
    if let Some(prev_exist) = options.prev_exist {
        form.push(("prevExist", prev_exist.to_string()));
    }
    if let Some(prev_value) = &options.prev_value {
        form.push(("prevValue", prev_value.clone()));
    }
    if options.refresh {
        form.push(("refresh", "true".to_string()));
    }
    form
}
