use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use log::debug;
use tiktoken_rs::{o200k_base, CoreBPE};

use crate::llm::{ChatMessage, ChatRequest, ContentPart, LanguageModel};
use crate::models::QuickPostRequest;

pub const EMPTY_ANSWER: &str = "Could not generate post.";

/// Rejects requests the model cannot do anything with. The message is meant for the caller.
pub fn validate(req: &QuickPostRequest) -> std::result::Result<(), String> {
    if req.content.trim().is_empty() && req.media.is_empty() && req.documents.is_empty() {
        return Err("Content, media, or documents are required.".to_string());
    }
    for (i, media) in req.media.iter().enumerate() {
        if !media.mime_type.starts_with("image/") {
            return Err(format!(
                "Media #{} has unsupported type '{}'.",
                i + 1,
                media.mime_type
            ));
        }
        if STANDARD.decode(media.data.trim()).is_err() {
            return Err(format!("Media #{} is not valid base64.", i + 1));
        }
    }
    Ok(())
}

fn trim_to_tokens(bpe: &CoreBPE, text: &str, max_tokens: usize) -> String {
    let ids = bpe.encode_with_special_tokens(text);
    if ids.len() <= max_tokens {
        return text.to_string();
    }
    debug!("Trimming document from {} to {} tokens", ids.len(), max_tokens);
    let kept = bpe.decode(ids[..max_tokens].to_vec()).unwrap_or_default();
    format!("{}\n[...truncated]", kept)
}

fn quick_post_messages(req: &QuickPostRequest, max_document_tokens: usize) -> Result<Vec<ChatMessage>> {
    let platform = req
        .platform
        .map(|p| p.to_string())
        .unwrap_or_else(|| "social media".to_string());
    let system = ChatMessage::system(format!(
        "You are a social media expert. Write a punchy post for {}. No explanation.",
        platform
    ));

    let mut parts = Vec::new();
    if !req.content.trim().is_empty() {
        parts.push(ContentPart::Text(req.content.clone()));
    }

    if !req.documents.is_empty() {
        let bpe = o200k_base().context("Failed to load tokenizer")?;
        for doc in &req.documents {
            parts.push(ContentPart::Text(format!(
                "\n[ATTACHED DOCUMENT: {}]\n{}\n[END DOCUMENT]\n",
                doc.name,
                trim_to_tokens(&bpe, &doc.content, max_document_tokens)
            )));
        }
    }

    for media in &req.media {
        parts.push(ContentPart::ImageUrl(format!(
            "data:{};base64,{}",
            media.mime_type,
            media.data.trim()
        )));
    }

    Ok(vec![system, ChatMessage::User(parts)])
}

/// Single-turn post for one platform. Returns the model's text as-is.
pub async fn quick_post(
    model: &dyn LanguageModel,
    model_name: &str,
    req: &QuickPostRequest,
    max_document_tokens: usize,
) -> Result<String> {
    let reply = model
        .complete(ChatRequest {
            model: model_name.to_string(),
            messages: quick_post_messages(req, max_document_tokens)?,
            tools: vec![],
            json_mode: false,
        })
        .await?;

    Ok(reply
        .content
        .filter(|text| !text.trim().is_empty())
        .unwrap_or_else(|| EMPTY_ANSWER.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;
    use crate::models::{DocumentAttachment, MediaAttachment, Platform};

    fn with_text(text: &str) -> QuickPostRequest {
        QuickPostRequest {
            content: text.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_requires_some_input() {
        assert!(validate(&with_text("  ")).is_err());
        assert!(validate(&with_text("launch day")).is_ok());

        let doc_only = QuickPostRequest {
            documents: vec![DocumentAttachment {
                name: "notes.txt".into(),
                content: "x".into(),
            }],
            ..Default::default()
        };
        assert!(validate(&doc_only).is_ok());
    }

    #[test]
    fn test_validate_checks_media_payload() {
        let mut req = with_text("");
        req.media.push(MediaAttachment {
            data: "not base64!!".into(),
            mime_type: "image/png".into(),
        });
        assert_eq!(validate(&req).unwrap_err(), "Media #1 is not valid base64.");

        req.media[0] = MediaAttachment {
            data: "aGVsbG8=".into(),
            mime_type: "application/pdf".into(),
        };
        assert!(validate(&req).unwrap_err().contains("unsupported type"));

        req.media[0].mime_type = "image/jpeg".into();
        assert!(validate(&req).is_ok());
    }

    #[test]
    fn test_long_documents_are_trimmed() {
        let bpe = o200k_base().unwrap();
        let long = "word ".repeat(500);
        let trimmed = trim_to_tokens(&bpe, &long, 20);
        assert!(trimmed.ends_with("[...truncated]"));
        assert!(trimmed.len() < long.len());
        assert_eq!(trim_to_tokens(&bpe, "short", 20), "short");
    }

    #[tokio::test]
    async fn test_message_layout() {
        let req = QuickPostRequest {
            content: "We shipped v2".into(),
            platform: Some(Platform::Twitter),
            media: vec![MediaAttachment {
                data: "aGVsbG8=".into(),
                mime_type: "image/png".into(),
            }],
            documents: vec![DocumentAttachment {
                name: "changelog.md".into(),
                content: "- faster".into(),
            }],
        };
        let model = ScriptedModel::new().reply_text("v2 is out!");
        assert_eq!(quick_post(&model, "m", &req, 100).await.unwrap(), "v2 is out!");

        let sent = &model.requests()[0];
        assert!(!sent.json_mode);
        assert_eq!(
            sent.messages[0],
            ChatMessage::system(
                "You are a social media expert. Write a punchy post for Twitter. No explanation."
            )
        );
        assert_eq!(
            sent.messages[1],
            ChatMessage::User(vec![
                ContentPart::Text("We shipped v2".into()),
                ContentPart::Text(
                    "\n[ATTACHED DOCUMENT: changelog.md]\n- faster\n[END DOCUMENT]\n".into()
                ),
                ContentPart::ImageUrl("data:image/png;base64,aGVsbG8=".into()),
            ])
        );
    }

    #[tokio::test]
    async fn test_empty_answer_uses_fallback_text() {
        let model = ScriptedModel::new().reply_text("   ");
        let post = quick_post(&model, "m", &with_text("hi"), 100).await.unwrap();
        assert_eq!(post, EMPTY_ANSWER);
    }
}
