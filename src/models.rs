use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Tone {
    #[default]
    Professional,
    Casual,
    Witty,
    Enthusiastic,
    Formal,
    Empathetic,
}

impl Tone {
    pub const ALL: [Tone; 6] = [
        Tone::Professional,
        Tone::Casual,
        Tone::Witty,
        Tone::Enthusiastic,
        Tone::Formal,
        Tone::Empathetic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tone::Professional => "Professional",
            Tone::Casual => "Casual",
            Tone::Witty => "Witty",
            Tone::Enthusiastic => "Enthusiastic",
            Tone::Formal => "Formal",
            Tone::Empathetic => "Empathetic",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Audience {
    #[default]
    #[serde(rename = "General Public")]
    GeneralPublic,
    #[serde(rename = "Industry Experts")]
    IndustryExperts,
    Students,
    #[serde(rename = "Small Business Owners")]
    SmallBusinessOwners,
    #[serde(rename = "Tech Enthusiasts")]
    TechEnthusiasts,
}

impl Audience {
    pub const ALL: [Audience; 5] = [
        Audience::GeneralPublic,
        Audience::IndustryExperts,
        Audience::Students,
        Audience::SmallBusinessOwners,
        Audience::TechEnthusiasts,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Audience::GeneralPublic => "General Public",
            Audience::IndustryExperts => "Industry Experts",
            Audience::Students => "Students",
            Audience::SmallBusinessOwners => "Small Business Owners",
            Audience::TechEnthusiasts => "Tech Enthusiasts",
        }
    }
}

impl fmt::Display for Tone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Audience {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Case-insensitive so the CLI and stored preferences accept "casual" as well as "Casual".
impl FromStr for Tone {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Tone::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow!("Unknown tone '{}'", s))
    }
}

impl FromStr for Audience {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Audience::ALL
            .into_iter()
            .find(|a| a.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow!("Unknown audience '{}'", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewsArticle {
    pub title: String,
    pub uri: String,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_time: Option<String>,
    #[serde(default)]
    pub tone: Tone,
    #[serde(default)]
    pub audience: Audience,
    #[serde(default, rename = "realtimeNews", skip_serializing_if = "Vec::is_empty")]
    pub news_context: Vec<NewsArticle>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstagramContent {
    pub caption: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
}

/// Content bundle returned by the generator. Field names follow the JSON schema the model is
/// asked to produce, so the same struct parses model output and travels over the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineResult {
    #[serde(default)]
    pub hooks: Vec<String>,
    #[serde(default)]
    pub outline: String,
    #[serde(default)]
    pub linkedin: String,
    #[serde(default)]
    pub instagram: InstagramContent,
    #[serde(default)]
    pub blog: String,
    #[serde(default)]
    pub seo_keywords: Vec<String>,
    #[serde(default)]
    pub image_prompt: String,
    #[serde(default)]
    pub scheduled: bool,
    #[serde(rename = "schedulingMessage", default, skip_serializing_if = "Option::is_none")]
    pub scheduling_message: Option<String>,
    #[serde(rename = "imageUrl", default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Platform {
    #[default]
    LinkedIn,
    Twitter,
    Instagram,
    Facebook,
    Draft,
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linkedin" => Ok(Platform::LinkedIn),
            "twitter" => Ok(Platform::Twitter),
            "instagram" => Ok(Platform::Instagram),
            "facebook" => Ok(Platform::Facebook),
            "draft" => Ok(Platform::Draft),
            other => Err(anyhow!("Unknown platform '{}'", other)),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Platform::LinkedIn => "LinkedIn",
            Platform::Twitter => "Twitter",
            Platform::Instagram => "Instagram",
            Platform::Facebook => "Facebook",
            Platform::Draft => "Draft",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PostStatus {
    #[default]
    Scheduled,
    Published,
    Draft,
}

impl FromStr for PostStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Ok(PostStatus::Scheduled),
            "published" => Ok(PostStatus::Published),
            "draft" => Ok(PostStatus::Draft),
            other => Err(anyhow!("Unknown post status '{}'", other)),
        }
    }
}

impl fmt::Display for PostStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PostStatus::Scheduled => "Scheduled",
            PostStatus::Published => "Published",
            PostStatus::Draft => "Draft",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduledPost {
    pub id: String,
    pub title: String,
    pub date: DateTime<Utc>,
    pub platform: Platform,
    #[serde(default)]
    pub status: PostStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_snippet: Option<String>,
}

/// A post before the store has given it an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPost {
    pub title: String,
    pub date: DateTime<Utc>,
    pub platform: Platform,
    pub status: PostStatus,
    pub content_snippet: Option<String>,
}

impl NewPost {
    pub fn into_post(self, id: String) -> ScheduledPost {
        ScheduledPost {
            id,
            title: self.title,
            date: self.date,
            platform: self.platform,
            status: self.status,
            content_snippet: self.content_snippet,
        }
    }
}

/// Partial update body for `PUT /api/posts/:id`. Absent fields keep their stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PostStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_snippet: Option<String>,
}

impl PostPatch {
    pub fn apply(self, post: &mut ScheduledPost) {
        if let Some(title) = self.title {
            post.title = title;
        }
        if let Some(date) = self.date {
            post.date = date;
        }
        if let Some(platform) = self.platform {
            post.platform = platform;
        }
        if let Some(status) = self.status {
            post.status = status;
        }
        if let Some(snippet) = self.content_snippet {
            post.content_snippet = Some(snippet);
        }
    }

    /// Full replacement expressed as a patch, used when the calendar saves an edited entry.
    pub fn from_post(post: &ScheduledPost) -> Self {
        PostPatch {
            title: Some(post.title.clone()),
            date: Some(post.date),
            platform: Some(post.platform),
            status: Some(post.status),
            content_snippet: post.content_snippet.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleOutcome {
    pub status: OutcomeStatus,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl ScheduleOutcome {
    pub fn is_success(&self) -> bool {
        self.status == OutcomeStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequest {
    #[serde(default)]
    pub schedule_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PostStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_snippet: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaAttachment {
    /// Base64 payload without the `data:` prefix.
    pub data: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentAttachment {
    pub name: String,
    pub content: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickPostRequest {
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default)]
    pub media: Vec<MediaAttachment>,
    #[serde(default)]
    pub documents: Vec<DocumentAttachment>,
}
