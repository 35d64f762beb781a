use anyhow::Result;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use log::{info, warn};

use crate::models::{NewPost, OutcomeStatus, Platform, PostStatus, ScheduleOutcome, ScheduleRequest};
use crate::storage::PostStore;

/// What gets persisted alongside the schedule time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostDetails {
    pub title: String,
    pub platform: Platform,
    pub status: PostStatus,
    pub content_snippet: Option<String>,
}

impl PostDetails {
    /// Post created when the model calls the scheduling tool during generation.
    pub fn generated(topic: &str) -> Self {
        let title = if topic.trim().is_empty() {
            "AI Generated Post".to_string()
        } else {
            topic.trim().to_string()
        };
        PostDetails {
            title,
            platform: Platform::LinkedIn,
            status: PostStatus::Scheduled,
            content_snippet: None,
        }
    }
}

impl From<&ScheduleRequest> for PostDetails {
    fn from(req: &ScheduleRequest) -> Self {
        PostDetails {
            title: req
                .title
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .unwrap_or("Scheduled Post")
                .to_string(),
            platform: req.platform.unwrap_or_default(),
            status: req.status.unwrap_or_default(),
            content_snippet: req.content_snippet.clone(),
        }
    }
}

/// Accepts RFC 3339 instants, or the zone-less `YYYY-MM-DDTHH:MM[:SS]` a date-time picker
/// produces, which is read as local time.
pub fn parse_schedule_time(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Some(instant.with_timezone(&Utc));
    }

    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .and_then(|naive| Local.from_local_datetime(&naive).earliest())
        .map(|local| local.with_timezone(&Utc))
}

fn display_time(date: &DateTime<Utc>) -> String {
    date.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string()
}

/// Validates `raw` against `now` and, only when it lies strictly in the future, persists one
/// post. Validation failures come back as an error outcome, not as `Err`; `Err` is reserved for
/// storage failures.
pub async fn schedule_post(
    store: &dyn PostStore,
    raw: &str,
    details: PostDetails,
    now: DateTime<Utc>,
) -> Result<ScheduleOutcome> {
    let Some(date) = parse_schedule_time(raw) else {
        warn!("Rejected schedule time '{}': unparseable", raw);
        return Ok(ScheduleOutcome {
            status: OutcomeStatus::Error,
            message: format!("Scheduling failed: Invalid date format '{}'.", raw),
            id: None,
        });
    };

    if date <= now {
        warn!("Rejected schedule time '{}': not in the future", raw);
        return Ok(ScheduleOutcome {
            status: OutcomeStatus::Error,
            message: format!("Scheduling failed: '{}' is in the past.", display_time(&date)),
            id: None,
        });
    }

    let post = store
        .create(NewPost {
            title: details.title,
            date,
            platform: details.platform,
            status: details.status,
            content_snippet: details.content_snippet,
        })
        .await?;
    info!("Scheduled post {} for {}", post.id, post.date);

    Ok(ScheduleOutcome {
        status: OutcomeStatus::Success,
        message: format!("Post successfully scheduled for {}.", display_time(&date)),
        id: Some(post.id),
    })
}
