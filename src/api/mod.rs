use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, Response, StatusCode, Url};
use std::fmt;
use tracing::{debug, warn};

use crate::api::model::{PinnedItemsResp, SyncPinnedItemsReq};
use crate::config::Config;
use crate::model::{PinnedItemDto, SyncPinnedItemPayload, TargetType};

pub mod model;

/// Server-side storage of pinned items.
#[async_trait]
pub trait PinnedItemsService: Send + Sync {
    async fn get_pinned_items(&self, target_type: TargetType) -> Result<Vec<PinnedItemDto>>;

    async fn sync_pinned_items(&self, items: &[SyncPinnedItemPayload]) -> Result<()>;
}

#[derive(Clone)]
pub struct PinnedItemsClient {
    http: Client,
    base_url: Url,
    token: Option<String>,
}

impl fmt::Debug for PinnedItemsClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedItemsClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl PinnedItemsClient {
    pub fn with_base_url(token: Option<String>, base_url: Url) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("pinned-sync/", env!("CARGO_PKG_VERSION")))
            .no_proxy()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: normalize_base(base_url),
            token: token.filter(|t| !t.trim().is_empty()),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self> {
        let base_url = Url::parse(&cfg.api.base_url)
            .with_context(|| format!("invalid api.base_url '{}'", cfg.api.base_url))?;
        Self::with_base_url(cfg.api.token.clone(), base_url)
    }

    fn request(&self, method: Method, path: &str) -> Result<reqwest::RequestBuilder> {
        let endpoint = self
            .base_url
            .join(path)
            .context("invalid pinned-items base URL")?;
        let mut builder = self
            .http
            .request(method, endpoint)
            .header("Accept", "application/json");
        if let Some(token) = &self.token {
            builder = builder.header("Authorization", format!("Bearer {}", token));
        }
        Ok(builder)
    }

    pub fn build_get_request(&self, target_type: TargetType) -> Result<reqwest::Request> {
        self.request(Method::GET, "v1/pinned-items")?
            .query(&[("targetType", target_type.as_str())])
            .build()
            .context("failed to build pinned-items request")
    }

    pub fn build_sync_request(&self, items: &[SyncPinnedItemPayload]) -> Result<reqwest::Request> {
        self.request(Method::POST, "v1/pinned-items/sync")?
            .json(&SyncPinnedItemsReq { items })
            .build()
            .context("failed to build pinned-items sync request")
    }

    async fn execute(&self, request: reqwest::Request) -> Result<Response> {
        debug!(method = %request.method(), url = %request.url(), "sending pinned-items request");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach pinned-items API")?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!(%body, "rate limited by pinned-items API");
            return Err(anyhow!("received 429 from pinned-items API: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("pinned-items API error {}: {}", status, body));
        }
        Ok(res)
    }
}

#[async_trait]
impl PinnedItemsService for PinnedItemsClient {
    async fn get_pinned_items(&self, target_type: TargetType) -> Result<Vec<PinnedItemDto>> {
        let request = self.build_get_request(target_type)?;
        let res = self.execute(request).await?;
        let payload: PinnedItemsResp = res
            .json()
            .await
            .context("invalid pinned-items response")?;
        Ok(payload.data)
    }

    async fn sync_pinned_items(&self, items: &[SyncPinnedItemPayload]) -> Result<()> {
        let request = self.build_sync_request(items)?;
        self.execute(request).await?;
        Ok(())
    }
}

/// `Url::join` drops the last path segment unless the base ends with `/`.
fn normalize_base(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
