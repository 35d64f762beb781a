use std::sync::LazyLock;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Local, Utc};
use log::{debug, info, warn};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use crate::llm::{ChatMessage, ChatRequest, LanguageModel, ToolCall, ToolSpec};
use crate::models::{GenerationRequest, NewsArticle, OutcomeStatus, PipelineResult, ScheduleOutcome};
use crate::scheduler::{schedule_post, PostDetails};
use crate::storage::PostStore;

pub const SCHEDULE_TOOL: &str = "schedule_post";

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```json\n?|\n?```").expect("static regex"));

const SYSTEM_PROMPT: &str = r#"You are a World-Class Content Strategist.
Goal: Create viral social media content.
Result MUST be valid JSON.

JSON Schema:
{
  "hooks": ["string"],
  "outline": "string",
  "linkedin": "string",
  "instagram": { "caption": "string", "hashtags": ["string"] },
  "blog": "string",
  "seo_keywords": ["string"],
  "image_prompt": "string",
  "scheduled": boolean,
  "schedulingMessage": "string (optional)"
}"#;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScheduleToolArgs {
    schedule_time: String,
}

fn news_block(news: &[NewsArticle]) -> String {
    if news.is_empty() {
        return String::new();
    }
    let mut block = String::from("\n\n**REFERENCED REAL-TIME NEWS (Source of Truth):**\n");
    for (index, article) in news.iter().enumerate() {
        block.push_str(&format!(
            "{}. Title: {}\n   Snippet: {}\n   Source: {}\n",
            index + 1,
            article.title,
            article.snippet,
            article.uri
        ));
    }
    block.push_str("\nIntegrate these specific news details to make the content timely and relevant.");
    block
}

fn user_prompt(req: &GenerationRequest, schedule_time: Option<&str>, now: DateTime<Local>) -> String {
    let mut prompt = format!(
        r#"Topic: "{}"
Tone: {}
Target Audience: {}
Current Date: {}
{}

INSTRUCTIONS:
1. Viral Hooks (3 distinct angles)
2. Blog Outline (5-7 points)
3. LinkedIn Post (Professional, punchy)
4. Instagram Caption (Engaging + hashtags)
5. Short Blog (300-600 words)
6. SEO Keywords (5-10)
7. Image Prompt (Detailed, artistic)
"#,
        req.topic,
        req.tone,
        req.audience,
        now.format("%Y-%m-%d %H:%M"),
        news_block(&req.news_context)
    );
    if let Some(time) = schedule_time {
        prompt.push_str(&format!(
            "8. Call '{}' tool with: '{}' ONLY IF explicitly requested.\n",
            SCHEDULE_TOOL, time
        ));
    }
    prompt
}

fn schedule_tool() -> ToolSpec {
    ToolSpec {
        name: SCHEDULE_TOOL.to_string(),
        description: "Schedules a content post for a specific date and time.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "scheduleTime": {
                    "type": "string",
                    "description": "The exact date and time (ISO 8601 format) to schedule the post."
                }
            },
            "required": ["scheduleTime"]
        }),
    }
}

pub fn strip_code_fences(content: &str) -> String {
    CODE_FENCE.replace_all(content, "").trim().to_string()
}

fn error_outcome(message: String) -> ScheduleOutcome {
    ScheduleOutcome {
        status: OutcomeStatus::Error,
        message,
        id: None,
    }
}

async fn run_tool_call(
    call: &ToolCall,
    store: &dyn PostStore,
    topic: &str,
    now: DateTime<Utc>,
) -> Result<ScheduleOutcome> {
    if call.name != SCHEDULE_TOOL {
        warn!("Model called unknown tool '{}'", call.name);
        return Ok(error_outcome(format!("Unknown tool '{}'.", call.name)));
    }
    let args: ScheduleToolArgs = match serde_json::from_str(&call.arguments) {
        Ok(args) => args,
        Err(e) => {
            warn!("Bad arguments for {}: {}", SCHEDULE_TOOL, e);
            return Ok(error_outcome(format!(
                "Scheduling failed: Invalid date format '{}'.",
                call.arguments
            )));
        }
    };
    info!("[Tool Call] scheduling post for {}", args.schedule_time);
    schedule_post(store, &args.schedule_time, PostDetails::generated(topic), now).await
}

/// Runs the generation prompt, executing the scheduling tool when the model asks for it.
///
/// `scheduled` and `schedulingMessage` in the result always reflect what the scheduling
/// side-effect reported, never what the model wrote.
pub async fn generate_content(
    model: &dyn LanguageModel,
    model_name: &str,
    store: &dyn PostStore,
    req: &GenerationRequest,
    now: DateTime<Utc>,
) -> Result<PipelineResult> {
    // Clients send an empty string when no time was picked.
    let schedule_time = req
        .schedule_time
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty());
    let offer_tool = schedule_time.is_some();
    let mut messages = vec![
        ChatMessage::system(SYSTEM_PROMPT),
        ChatMessage::user(user_prompt(req, schedule_time, now.with_timezone(&Local))),
    ];

    debug!(
        "Generating content for '{}' ({} news items, tool offered: {})",
        req.topic,
        req.news_context.len(),
        offer_tool
    );
    let mut reply = model
        .complete(ChatRequest {
            model: model_name.to_string(),
            messages: messages.clone(),
            tools: if offer_tool { vec![schedule_tool()] } else { vec![] },
            json_mode: true,
        })
        .await?;

    let mut scheduling: Option<ScheduleOutcome> = None;

    if offer_tool && !reply.tool_calls.is_empty() {
        messages.push(ChatMessage::Assistant {
            content: reply.content.clone(),
            tool_calls: reply.tool_calls.clone(),
        });
        for call in &reply.tool_calls {
            let outcome = run_tool_call(call, store, &req.topic, now).await?;
            messages.push(ChatMessage::Tool {
                call_id: call.id.clone(),
                content: serde_json::to_string(&outcome)?,
            });
            if call.name == SCHEDULE_TOOL {
                scheduling = Some(outcome);
            }
        }

        reply = model
            .complete(ChatRequest {
                model: model_name.to_string(),
                messages,
                tools: vec![],
                json_mode: true,
            })
            .await?;
    }

    let Some(content) = reply.content else {
        bail!("Model returned no content");
    };
    let mut result: PipelineResult = serde_json::from_str(&strip_code_fences(&content))
        .context("Model returned invalid JSON")?;

    result.scheduled = scheduling.as_ref().is_some_and(ScheduleOutcome::is_success);
    result.scheduling_message = scheduling.map(|outcome| outcome.message);
    result.image_url = None;

    Ok(result)
}
