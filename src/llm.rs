use std::fmt;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use async_openai::{
    config::OpenAIConfig,
    types::{
        ChatCompletionMessageToolCall, ChatCompletionRequestAssistantMessageArgs,
        ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs,
        ChatCompletionRequestMessageContentPartTextArgs, ChatCompletionRequestSystemMessage,
        ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessage,
        ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContent,
        ChatCompletionRequestUserMessageContentPart, ChatCompletionTool, ChatCompletionToolArgs,
        ChatCompletionToolType, CreateChatCompletionRequestArgs, FunctionCall, FunctionObjectArgs,
        ImageUrlArgs, ResponseFormat,
    },
    Client,
};
use async_trait::async_trait;
use log::debug;
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;

use crate::config::Config;

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    Text(String),
    /// `https://` or `data:` URL
    ImageUrl(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChatMessage {
    System(String),
    User(Vec<ContentPart>),
    Assistant {
        content: Option<String>,
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        call_id: String,
        content: String,
    },
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        ChatMessage::System(text.into())
    }

    pub fn user(text: impl Into<String>) -> Self {
        ChatMessage::User(vec![ContentPart::Text(text.into())])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolSpec>,
    /// Ask for a JSON object response. Ignored when tools are offered.
    pub json_mode: bool,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelReply {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCall>,
}

/// The external chat-completion provider. Everything the proxy asks of the model goes
/// through this one call.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, request: ChatRequest) -> Result<ModelReply>;
}

pub struct OpenAiModel {
    client: Client<OpenAIConfig>,
    api_base: String,
    timeout: Option<Duration>,
}

impl fmt::Debug for OpenAiModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiModel")
            .field("client", &"<async_openai::Client>")
            .field("api_base", &self.api_base)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl OpenAiModel {
    pub fn new(cfg: &Config) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "http-referer",
            HeaderValue::from_str(&cfg.site_url).context("site_url is not a valid header value")?,
        );
        headers.insert(
            "x-title",
            HeaderValue::from_str(&cfg.site_name).context("site_name is not a valid header value")?,
        );
        let http_client = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .context("Failed to build HTTP client")?;

        let openai_config = OpenAIConfig::new()
            .with_api_base(&cfg.api_base)
            .with_api_key(&cfg.api_key);
        let client = Client::with_config(openai_config).with_http_client(http_client);

        Ok(Self {
            client,
            api_base: cfg.api_base.clone(),
            timeout: cfg.llm_timeout_secs.map(Duration::from_secs),
        })
    }
}

fn to_openai_message(message: ChatMessage) -> Result<ChatCompletionRequestMessage> {
    let converted = match message {
        ChatMessage::System(text) => ChatCompletionRequestSystemMessage::from(text).into(),
        ChatMessage::User(parts) => {
            if let [ContentPart::Text(text)] = parts.as_slice() {
                ChatCompletionRequestUserMessage::from(text.as_str()).into()
            } else {
                let mut content = Vec::with_capacity(parts.len());
                for part in parts {
                    let part = match part {
                        ContentPart::Text(text) => ChatCompletionRequestUserMessageContentPart::Text(
                            ChatCompletionRequestMessageContentPartTextArgs::default()
                                .text(text)
                                .build()?,
                        ),
                        ContentPart::ImageUrl(url) => {
                            ChatCompletionRequestUserMessageContentPart::ImageUrl(
                                ChatCompletionRequestMessageContentPartImageArgs::default()
                                    .image_url(ImageUrlArgs::default().url(url).build()?)
                                    .build()?,
                            )
                        }
                    };
                    content.push(part);
                }
                ChatCompletionRequestUserMessageArgs::default()
                    .content(ChatCompletionRequestUserMessageContent::Array(content))
                    .build()?
                    .into()
            }
        }
        ChatMessage::Assistant {
            content,
            tool_calls,
        } => {
            let mut builder = ChatCompletionRequestAssistantMessageArgs::default();
            if let Some(content) = content {
                builder.content(content);
            }
            if !tool_calls.is_empty() {
                builder.tool_calls(
                    tool_calls
                        .into_iter()
                        .map(|call| ChatCompletionMessageToolCall {
                            id: call.id,
                            r#type: ChatCompletionToolType::Function,
                            function: FunctionCall {
                                name: call.name,
                                arguments: call.arguments,
                            },
                        })
                        .collect::<Vec<_>>(),
                );
            }
            builder.build()?.into()
        }
        ChatMessage::Tool { call_id, content } => ChatCompletionRequestToolMessageArgs::default()
            .tool_call_id(call_id)
            .content(content)
            .build()?
            .into(),
    };
    Ok(converted)
}

fn to_openai_tool(spec: ToolSpec) -> Result<ChatCompletionTool> {
    let function = FunctionObjectArgs::default()
        .name(spec.name)
        .description(spec.description)
        .parameters(spec.parameters)
        .build()?;
    Ok(ChatCompletionToolArgs::default()
        .r#type(ChatCompletionToolType::Function)
        .function(function)
        .build()?)
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    async fn complete(&self, request: ChatRequest) -> Result<ModelReply> {
        debug!(
            "Building chat request for model {} with {} messages and {} tools",
            request.model,
            request.messages.len(),
            request.tools.len()
        );

        let messages = request
            .messages
            .into_iter()
            .map(to_openai_message)
            .collect::<Result<Vec<_>>>()
            .context("Failed to build chat messages")?;

        let mut args = CreateChatCompletionRequestArgs::default();
        args.model(&request.model).messages(messages);
        if !request.tools.is_empty() {
            let tools = request
                .tools
                .into_iter()
                .map(to_openai_tool)
                .collect::<Result<Vec<_>>>()
                .context("Failed to build tool definitions")?;
            args.tools(tools);
        } else if request.json_mode {
            args.response_format(ResponseFormat::JsonObject);
        }
        let openai_request = args.build().context("Failed to build chat request")?;

        let start_time = Instant::now();
        let chat = self.client.chat();
        let call = chat.create(openai_request);
        let api_result = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => {
                    debug!("Model call timed out after {:?}", start_time.elapsed());
                    return Err(anyhow!(
                        "Model API call timed out after {} seconds",
                        limit.as_secs()
                    ));
                }
            },
            None => call.await,
        };
        debug!("Model call completed in {:?}", start_time.elapsed());

        let response = api_result.map_err(|e| anyhow!("Model API error: {}", e))?;

        let Some(choice) = response.choices.into_iter().next() else {
            anyhow::bail!("No choices in model response");
        };

        let tool_calls = choice
            .message
            .tool_calls
            .unwrap_or_default()
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: call.function.arguments,
            })
            .collect();

        Ok(ModelReply {
            content: choice.message.content,
            tool_calls,
        })
    }
}
