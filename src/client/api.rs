use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use log::debug;
use reqwest::{Client, Response};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use url::Url;

use crate::models::{
    GenerationRequest, NewsArticle, PipelineResult, PostPatch, QuickPostRequest, ScheduleOutcome,
    ScheduleRequest, ScheduledPost,
};

/// Everything the client needs from the content proxy.
#[async_trait]
pub trait ContentApi: Send + Sync {
    async fn search_news(&self, topic: &str) -> Result<Vec<NewsArticle>>;
    async fn generate(&self, req: &GenerationRequest) -> Result<PipelineResult>;
    async fn quick_post(&self, req: &QuickPostRequest) -> Result<String>;
    async fn generate_image(&self, image_prompt: &str) -> Result<String>;
    /// Validation failures come back as an error outcome, not as `Err`.
    async fn schedule(&self, req: &ScheduleRequest) -> Result<ScheduleOutcome>;
    async fn list_posts(&self) -> Result<Vec<ScheduledPost>>;
    async fn update_post(&self, id: &str, patch: &PostPatch) -> Result<ScheduledPost>;
    async fn delete_post(&self, id: &str) -> Result<()>;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<String>,
    message: Option<String>,
}

#[derive(Deserialize)]
struct NewsBody {
    news: Vec<NewsArticle>,
}

#[derive(Deserialize)]
struct PostBody {
    post: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ImageBody {
    image_url: String,
}

/// HTTP client for the proxy's JSON API.
#[derive(Debug, Clone)]
pub struct ProxyClient {
    http: Client,
    base: Url,
}

impl ProxyClient {
    pub fn new(base: Url) -> Self {
        ProxyClient {
            http: Client::new(),
            base,
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .with_context(|| format!("Invalid endpoint path {}", path))
    }

    async fn post_json<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<Response> {
        let url = self.endpoint(path)?;
        debug!("POST {}", url);
        self.http
            .post(url.clone())
            .json(body)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))
    }

    async fn read<T: DeserializeOwned>(response: Response) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return response
                .json::<T>()
                .await
                .context("Unexpected response body");
        }
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|body| body.error.or(body.message))
            .unwrap_or(text);
        bail!("Server responded {}: {}", status, message)
    }
}

#[async_trait]
impl ContentApi for ProxyClient {
    async fn search_news(&self, topic: &str) -> Result<Vec<NewsArticle>> {
        let response = self
            .post_json("api/search-news", &json!({ "topic": topic }))
            .await?;
        Ok(Self::read::<NewsBody>(response).await?.news)
    }

    async fn generate(&self, req: &GenerationRequest) -> Result<PipelineResult> {
        let response = self.post_json("api/generate", req).await?;
        Self::read(response).await
    }

    async fn quick_post(&self, req: &QuickPostRequest) -> Result<String> {
        let response = self.post_json("api/quick-post", req).await?;
        Ok(Self::read::<PostBody>(response).await?.post)
    }

    async fn generate_image(&self, image_prompt: &str) -> Result<String> {
        let response = self
            .post_json(
                "api/generate-image-from-prompt",
                &json!({ "image_prompt": image_prompt }),
            )
            .await?;
        Ok(Self::read::<ImageBody>(response).await?.image_url)
    }

    async fn schedule(&self, req: &ScheduleRequest) -> Result<ScheduleOutcome> {
        let response = self.post_json("api/schedule", req).await?;
        let status = response.status();
        let text = response.text().await.context("Failed to read response")?;
        // A rejected schedule is still a well-formed outcome, whatever the status code.
        if let Ok(outcome) = serde_json::from_str::<ScheduleOutcome>(&text) {
            return Ok(outcome);
        }
        Err(anyhow!("Server responded {}: {}", status, text))
    }

    async fn list_posts(&self) -> Result<Vec<ScheduledPost>> {
        let url = self.endpoint("api/posts")?;
        let response = self
            .http
            .get(url.clone())
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;
        Self::read(response).await
    }

    async fn update_post(&self, id: &str, patch: &PostPatch) -> Result<ScheduledPost> {
        let url = self.endpoint(&format!("api/posts/{}", id))?;
        let response = self
            .http
            .put(url.clone())
            .json(patch)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;
        Self::read(response).await
    }

    async fn delete_post(&self, id: &str) -> Result<()> {
        let url = self.endpoint(&format!("api/posts/{}", id))?;
        let response = self
            .http
            .delete(url.clone())
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;
        Self::read::<serde_json::Value>(response).await?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints_resolve_against_base() {
        let client = ProxyClient::new(Url::parse("http://127.0.0.1:3001/").unwrap());
        assert_eq!(
            client.endpoint("api/posts/abc").unwrap().as_str(),
            "http://127.0.0.1:3001/api/posts/abc"
        );

        let nested = ProxyClient::new(Url::parse("https://host.example/proxy/").unwrap());
        assert_eq!(
            nested.endpoint("api/generate").unwrap().as_str(),
            "https://host.example/proxy/api/generate"
        );
    }
}
