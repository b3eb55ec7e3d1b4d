use std::time::Duration;

use async_trait::async_trait;
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::{ApiError, ApiResult, StudioApi};
use crate::core::catalog::ModelCatalog;
use crate::core::models::{
    GenerationJob, GpuInfo, QueueItem, SongRequest, StartResponse, TimingStats, sort_newest_first,
};

/// HTTP client for one studio server.
#[derive(Clone)]
pub struct HttpStudioApi {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpStudioApi {
    /// `base_url` is the server root, e.g. `http://127.0.0.1:8000`.
    pub fn new(base_url: &str, timeout: Option<Duration>) -> ApiResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        Self::with_client(builder.build()?, base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: &str) -> ApiResult<Self> {
        let invalid = |reason: String| ApiError::InvalidUrl {
            url: base_url.to_string(),
            reason,
        };
        let parsed = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if parsed.cannot_be_a_base() {
            return Err(invalid("not a base URL".to_string()));
        }

        Ok(Self {
            client,
            base_url: parsed,
        })
    }

    /// Server URL for an API path. Each segment is percent-encoded, so ids
    /// containing `/`, `?` or `#` stay inside their segment.
    fn url(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidUrl {
                url: self.base_url.to_string(),
                reason: "not a base URL".to_string(),
            })?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn ensure_success(response: reqwest::Response) -> ApiResult<reqwest::Response> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn parse_response<T: DeserializeOwned>(response: reqwest::Response) -> ApiResult<T> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Parse the body on success, `None` on any non-2xx status.
    async fn parse_optional<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> ApiResult<Option<T>> {
        if !response.status().is_success() {
            tracing::debug!(status = %response.status(), url = %response.url(), "Degrading to empty result");
            return Ok(None);
        }
        Ok(Some(response.json::<T>().await?))
    }
}

#[async_trait]
impl StudioApi for HttpStudioApi {
    async fn start_generation(&self, request: &SongRequest) -> ApiResult<String> {
        let response = self
            .client
            .post(self.url(&["api", "generate"])?)
            .json(request)
            .send()
            .await?;

        let started: StartResponse = Self::parse_response(response).await?;
        Ok(started.generation_id)
    }

    async fn fetch_generation(&self, id: &str) -> ApiResult<Option<GenerationJob>> {
        let response = self
            .client
            .get(self.url(&["api", "generation", id])?)
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        Self::parse_response(response).await.map(Some)
    }

    async fn stop_generation(&self, id: &str) -> ApiResult<()> {
        self.client
            .post(self.url(&["api", "stop", id])?)
            .send()
            .await?;
        Ok(())
    }

    async fn delete_generation(&self, id: &str) -> ApiResult<bool> {
        let response = self
            .client
            .delete(self.url(&["api", "generation", id])?)
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    async fn list_generations(&self) -> ApiResult<Vec<GenerationJob>> {
        let response = self.client.get(self.url(&["api", "generations"])?).send().await?;

        let mut jobs: Vec<GenerationJob> = Self::parse_response(response).await?;
        sort_newest_first(&mut jobs);
        Ok(jobs)
    }

    async fn list_queue(&self) -> ApiResult<Vec<QueueItem>> {
        let response = self.client.get(self.url(&["api", "queue"])?).send().await?;
        Ok(Self::parse_optional(response).await?.unwrap_or_default())
    }

    async fn add_to_queue(&self, request: &SongRequest) -> ApiResult<bool> {
        let response = self
            .client
            .post(self.url(&["api", "queue"])?)
            .json(request)
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    async fn remove_from_queue(&self, id: &str) -> ApiResult<()> {
        self.client
            .delete(self.url(&["api", "queue", id])?)
            .send()
            .await?;
        Ok(())
    }

    async fn gpu_info(&self) -> ApiResult<Option<GpuInfo>> {
        let response = self.client.get(self.url(&["api", "gpu"])?).send().await?;
        Self::parse_optional(response).await
    }

    async fn timing_stats(&self) -> ApiResult<Option<TimingStats>> {
        let response = self.client.get(self.url(&["api", "timing-stats"])?).send().await?;
        Self::parse_optional(response).await
    }

    async fn list_models(&self) -> ApiResult<ModelCatalog> {
        let response = self.client.get(self.url(&["api", "models"])?).send().await?;
        Self::parse_response(response).await
    }

    async fn start_model_download(&self, model_id: &str) -> ApiResult<bool> {
        let response = self
            .client
            .post(self.url(&["api", "models", model_id, "download"])?)
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    async fn cancel_model_download(&self, model_id: &str) -> ApiResult<()> {
        self.client
            .delete(self.url(&["api", "models", model_id, "download"])?)
            .send()
            .await?;
        Ok(())
    }

    async fn delete_model(&self, model_id: &str) -> ApiResult<bool> {
        let response = self
            .client
            .delete(self.url(&["api", "models", model_id])?)
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    async fn rename_generation(&self, id: &str, title: &str) -> ApiResult<()> {
        let response = self
            .client
            .put(self.url(&["api", "generation", id])?)
            .json(&json!({ "title": title }))
            .send()
            .await?;
        Self::ensure_success(response).await?;
        Ok(())
    }

    async fn download_track(
        &self,
        id: &str,
        track: u32,
        format: Option<&str>,
    ) -> ApiResult<Vec<u8>> {
        let mut url = self.url(&["api", "audio", id, track.to_string().as_str()])?;
        if let Some(format) = format {
            url.query_pairs_mut().append_pair("format", format);
        }
        let response = self.client.get(url).send().await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }
}
