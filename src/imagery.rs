use std::sync::LazyLock;

use anyhow::{anyhow, Result};
use log::debug;
use regex::Regex;
use url::Url;

use crate::llm::{ChatMessage, ChatRequest, LanguageModel};

static MARKDOWN_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[.*?\]\((https?://.*?)\)").expect("static regex"));

/// Finds the image in a model answer: a markdown image link, a bare http(s) URL, or an
/// inline `data:image/...` URL.
pub fn extract_image_url(content: &str) -> Option<String> {
    if let Some(caps) = MARKDOWN_IMAGE.captures(content) {
        return caps.get(1).map(|m| m.as_str().to_string());
    }

    let trimmed = content.trim();
    if trimmed.starts_with("data:image/") && trimmed.contains(";base64,") {
        return Some(trimmed.to_string());
    }

    match Url::parse(trimmed) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Some(url.to_string()),
        _ => None,
    }
}

pub async fn generate_image(
    model: &dyn LanguageModel,
    image_model: &str,
    image_prompt: &str,
) -> Result<String> {
    let reply = model
        .complete(ChatRequest {
            model: image_model.to_string(),
            messages: vec![ChatMessage::user(format!(
                "Generate an image for: {}",
                image_prompt
            ))],
            tools: vec![],
            json_mode: false,
        })
        .await?;

    let content = reply.content.unwrap_or_default();
    debug!("Image model answered with {} chars", content.len());
    extract_image_url(&content).ok_or_else(|| anyhow!("No image URL found in response"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;

    #[test]
    fn test_markdown_link_wins() {
        let content = "Here is your image: ![a crab](https://img.example/crab.png) enjoy";
        assert_eq!(
            extract_image_url(content).as_deref(),
            Some("https://img.example/crab.png")
        );
    }

    #[test]
    fn test_bare_and_data_urls() {
        assert_eq!(
            extract_image_url(" https://img.example/x.webp\n").as_deref(),
            Some("https://img.example/x.webp")
        );
        assert_eq!(
            extract_image_url("data:image/png;base64,iVBORw0KGgo=").as_deref(),
            Some("data:image/png;base64,iVBORw0KGgo=")
        );
    }

    #[test]
    fn test_prose_without_image_is_none() {
        assert_eq!(extract_image_url("I cannot draw that."), None);
        assert_eq!(extract_image_url("ftp://files.example/x.png"), None);
        assert_eq!(extract_image_url(""), None);
    }

    #[tokio::test]
    async fn test_generate_image_uses_image_model() {
        let model = ScriptedModel::new().reply_text("![x](https://img.example/1.png)");
        let url = generate_image(&model, "sdxl", "a crab at sunset").await.unwrap();
        assert_eq!(url, "https://img.example/1.png");
        let sent = &model.requests()[0];
        assert_eq!(sent.model, "sdxl");
        assert_eq!(
            sent.messages,
            vec![ChatMessage::user("Generate an image for: a crab at sunset")]
        );
    }

    #[tokio::test]
    async fn test_missing_url_is_an_error() {
        let model = ScriptedModel::new().reply_text("sorry");
        let err = generate_image(&model, "sdxl", "p").await.unwrap_err();
        assert_eq!(err.to_string(), "No image URL found in response");
    }
}
