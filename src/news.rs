use std::sync::LazyLock;

use anyhow::Result;
use chrono::{Local, NaiveDate};
use log::{debug, warn};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::llm::{ChatMessage, ChatRequest, LanguageModel};
use crate::models::NewsArticle;

pub const MAX_ARTICLES: usize = 7;

// Greedy and dot-matches-newline: first `[` through last `]`.
static JSON_ARRAY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\[.*\]").expect("static regex"));

// Missing or null fields are tolerated per article.
#[derive(Debug, Deserialize)]
struct RawArticle {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    uri: Option<String>,
    #[serde(default)]
    snippet: Option<String>,
}

impl From<RawArticle> for NewsArticle {
    fn from(raw: RawArticle) -> Self {
        NewsArticle {
            title: raw.title.unwrap_or_default(),
            uri: raw
                .uri
                .filter(|uri| !uri.trim().is_empty())
                .unwrap_or_else(|| "#".to_string()),
            snippet: raw.snippet.unwrap_or_default(),
        }
    }
}

/// Stand-in returned when the model's answer cannot be read as a list of articles.
pub fn unavailable_article() -> NewsArticle {
    NewsArticle {
        title: "Could not fetch real-time news".to_string(),
        uri: "#".to_string(),
        snippet: "Please try again later or check your API configuration.".to_string(),
    }
}

fn news_messages(topic: &str, today: NaiveDate) -> Vec<ChatMessage> {
    let system_prompt = r#"You are a news aggregator. Retrieve or simulate the top 5 recent news headlines relevant to the topic.
Format as a JSON list of objects with 'title', 'uri' (use a dummy URL if unknown), and 'snippet'.
Disclaimer: If you cannot access real-time internet, generate plausible examples labeled as [Simulated News]."#;

    vec![
        ChatMessage::system(system_prompt),
        ChatMessage::user(format!(
            "Topic: {}. Current Date: {}",
            topic,
            today.format("%Y-%m-%d")
        )),
    ]
}

/// Reads the first bracket-delimited JSON array out of `content`, tolerating prose around
/// it. Malformed entries are skipped. Never fails: unreadable output becomes the single
/// stand-in article.
pub fn parse_news(content: &str) -> Vec<NewsArticle> {
    let candidate = JSON_ARRAY
        .find(content)
        .map(|m| m.as_str())
        .unwrap_or(content);

    let items = match serde_json::from_str::<Vec<Value>>(candidate) {
        Ok(items) => items,
        Err(e) => {
            warn!("Failed to parse news JSON: {}", e);
            return vec![unavailable_article()];
        }
    };

    let total = items.len();
    let articles: Vec<NewsArticle> = items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<RawArticle>(item) {
            Ok(raw) => Some(NewsArticle::from(raw)),
            Err(e) => {
                warn!("Skipping malformed news item: {}", e);
                None
            }
        })
        .take(MAX_ARTICLES)
        .collect();

    if total > 0 && articles.is_empty() {
        return vec![unavailable_article()];
    }
    articles
}

pub async fn search_news(
    model: &dyn LanguageModel,
    model_name: &str,
    topic: &str,
) -> Result<Vec<NewsArticle>> {
    debug!("Searching news for topic '{}'", topic);
    let reply = model
        .complete(ChatRequest {
            model: model_name.to_string(),
            messages: news_messages(topic, Local::now().date_naive()),
            tools: vec![],
            json_mode: true,
        })
        .await?;

    let articles = parse_news(reply.content.as_deref().unwrap_or_default());
    debug!("Model returned {} news articles", articles.len());
    Ok(articles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::testing::ScriptedModel;

    #[test]
    fn test_array_wrapped_in_prose() {
        let content = r#"Here you go:
[
  {"title": "A", "uri": "https://a.example", "snippet": "first"},
  {"title": "B", "snippet": "no link"}
]
Hope that helps."#;
        let news = parse_news(content);
        assert_eq!(news.len(), 2);
        assert_eq!(news[0].uri, "https://a.example");
        assert_eq!(news[1].uri, "#");
    }

    #[test]
    fn test_array_inside_json_object() {
        let news = parse_news(r#"{"news": [{"title": "A", "uri": "u", "snippet": "s"}]}"#);
        assert_eq!(news.len(), 1);
        assert_eq!(news[0].title, "A");
    }

    #[test]
    fn test_unparseable_output_yields_stand_in() {
        assert_eq!(parse_news("I can't browse the web."), vec![unavailable_article()]);
        assert_eq!(parse_news("[not json]"), vec![unavailable_article()]);
        assert_eq!(parse_news(""), vec![unavailable_article()]);
    }

    #[test]
    fn test_one_bad_item_does_not_drop_the_rest() {
        let news = parse_news(
            r#"[
              {"title": "A", "uri": null, "snippet": "kept"},
              {"title": 42, "uri": "https://bad", "snippet": "dropped"},
              "just a string",
              {"title": "C", "uri": "https://c", "snippet": null}
            ]"#,
        );
        assert_eq!(news.len(), 2);
        assert_eq!(news[0].title, "A");
        assert_eq!(news[0].uri, "#");
        assert_eq!(news[1].title, "C");
        assert_eq!(news[1].snippet, "");

        assert_eq!(parse_news(r#"[1, 2, 3]"#), vec![unavailable_article()]);
    }

    #[test]
    fn test_empty_array_is_empty_not_error() {
        assert!(parse_news("[]").is_empty());
    }

    #[test]
    fn test_truncated_to_seven() {
        let items: Vec<_> = (0..10)
            .map(|i| format!(r#"{{"title": "t{i}", "uri": "u", "snippet": "s"}}"#))
            .collect();
        let news = parse_news(&format!("[{}]", items.join(",")));
        assert_eq!(news.len(), MAX_ARTICLES);
        assert_eq!(news[6].title, "t6");
    }

    #[tokio::test]
    async fn test_search_news_sends_topic_in_json_mode() {
        let model = ScriptedModel::new()
            .reply_text(r#"[{"title": "Rust 2030", "uri": "https://r", "snippet": "s"}]"#);
        let news = search_news(&model, "m", "Rust").await.unwrap();
        assert_eq!(news[0].title, "Rust 2030");

        let requests = model.requests();
        assert!(requests[0].json_mode);
        assert!(requests[0].tools.is_empty());
        match &requests[0].messages[1] {
            ChatMessage::User(parts) => {
                assert!(format!("{:?}", parts).contains("Topic: Rust."))
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_model_failure_propagates() {
        let model = ScriptedModel::new().reply_error("upstream down");
        assert!(search_news(&model, "m", "Rust").await.is_err());
    }
}
