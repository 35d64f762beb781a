use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone, Timelike, Utc};
use log::{info, warn};

use super::api::ContentApi;
use crate::models::{Platform, PostPatch, PostStatus, ScheduleRequest, ScheduledPost};

/// Hour a post lands on when dropped onto a day.
pub const MOVE_HOUR: u32 = 10;
/// Hour of a quick-added draft.
pub const QUICK_ADD_HOUR: u32 = 9;
pub const QUICK_ADD_TITLE: &str = "New Draft Post";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEntry {
    pub post: ScheduledPost,
    /// Exists only on this client; saving it creates the post in the store.
    pub is_new: bool,
}

pub fn local_time_on(day: NaiveDate, hour: u32) -> Result<DateTime<Utc>> {
    let naive = day
        .and_hms_opt(hour, 0, 0)
        .ok_or_else(|| anyhow!("Invalid hour {}", hour))?;
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| anyhow!("{} {:02}:00 does not exist in the local time zone", day, hour))
}

/// Start time of a quick-added draft: 09:00 local, or the next full hour when `day` is today and
/// 09:00 has already passed. Past days keep 09:00 and will be rejected on save.
pub fn quick_add_time(day: NaiveDate, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let default = local_time_on(day, QUICK_ADD_HOUR)?;
    let now_local = now.with_timezone(&Local);
    if default > now || day != now_local.date_naive() {
        return Ok(default);
    }
    let next_hour = day
        .and_hms_opt(now_local.hour(), 0, 0)
        .ok_or_else(|| anyhow!("Invalid hour {}", now_local.hour()))?
        + Duration::hours(1);
    Local
        .from_local_datetime(&next_hour)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| anyhow!("{} does not exist in the local time zone", next_hour))
}

pub struct Calendar {
    api: Arc<dyn ContentApi>,
    entries: Vec<CalendarEntry>,
}

impl Calendar {
    pub fn new(api: Arc<dyn ContentApi>) -> Self {
        Calendar {
            api,
            entries: Vec::new(),
        }
    }

    pub fn entries(&self) -> &[CalendarEntry] {
        &self.entries
    }

    pub fn entry(&self, id: &str) -> Option<&CalendarEntry> {
        self.entries.iter().find(|e| e.post.id == id)
    }

    pub fn entries_on(&self, day: NaiveDate) -> Vec<&CalendarEntry> {
        self.entries
            .iter()
            .filter(|e| e.post.date.with_timezone(&Local).date_naive() == day)
            .collect()
    }

    /// Replaces local state with the store's list. Unsaved client-only drafts are kept.
    pub async fn refresh(&mut self) -> Result<()> {
        let posts = self.api.list_posts().await?;
        let drafts: Vec<CalendarEntry> = self.entries.drain(..).filter(|e| e.is_new).collect();
        self.entries = posts
            .into_iter()
            .map(|post| CalendarEntry {
                post,
                is_new: false,
            })
            .chain(drafts)
            .collect();
        self.sort();
        Ok(())
    }

    fn sort(&mut self) {
        self.entries.sort_by(|a, b| a.post.date.cmp(&b.post.date));
    }

    /// Moves a post to `day` at 10:00 local. Local state changes first; when the store rejects
    /// the update the list is refetched and the error returned.
    pub async fn move_post(&mut self, id: &str, day: NaiveDate) -> Result<()> {
        let date = local_time_on(day, MOVE_HOUR)?;
        let Some(entry) = self.entries.iter_mut().find(|e| e.post.id == id) else {
            bail!("No post with id {}", id);
        };
        entry.post.date = date;
        let is_new = entry.is_new;
        self.sort();

        if is_new {
            return Ok(());
        }

        let patch = PostPatch {
            date: Some(date),
            ..Default::default()
        };
        if let Err(e) = self.api.update_post(id, &patch).await {
            warn!("Moving post {} failed, refetching: {:#}", id, e);
            if let Err(refetch) = self.refresh().await {
                warn!("Refetch after failed move also failed: {:#}", refetch);
            }
            return Err(e.context("Failed to move post"));
        }
        info!("Moved post {} to {}", id, day);
        Ok(())
    }

    /// Adds a client-only draft on `day` and returns it for editing.
    pub fn quick_add(&mut self, day: NaiveDate) -> Result<CalendarEntry> {
        self.quick_add_at(day, Utc::now())
    }

    fn quick_add_at(&mut self, day: NaiveDate, now: DateTime<Utc>) -> Result<CalendarEntry> {
        let entry = CalendarEntry {
            post: ScheduledPost {
                id: format!("draft-{}", uuid::Uuid::new_v4()),
                title: QUICK_ADD_TITLE.to_string(),
                date: quick_add_time(day, now)?,
                platform: Platform::Draft,
                status: PostStatus::Draft,
                content_snippet: None,
            },
            is_new: true,
        };
        self.entries.push(entry.clone());
        self.sort();
        Ok(entry)
    }

    /// Persists an edited entry: new entries are created through scheduling, existing ones
    /// updated in place.
    pub async fn save(&mut self, entry: CalendarEntry) -> Result<ScheduledPost> {
        if entry.post.title.trim().is_empty() {
            bail!("Title is required.");
        }

        if entry.is_new {
            let outcome = self
                .api
                .schedule(&ScheduleRequest {
                    schedule_time: Some(entry.post.date.to_rfc3339()),
                    title: Some(entry.post.title.clone()),
                    platform: Some(entry.post.platform),
                    status: Some(entry.post.status),
                    content_snippet: entry.post.content_snippet.clone(),
                })
                .await?;
            if !outcome.is_success() {
                bail!(outcome.message);
            }
            let id = outcome
                .id
                .ok_or_else(|| anyhow!("Server did not return an id for the new post"))?;

            self.entries.retain(|e| e.post.id != entry.post.id);
            self.refresh().await?;
            return self
                .entry(&id)
                .map(|e| e.post.clone())
                .ok_or_else(|| anyhow!("Created post {} missing from the store", id));
        }

        let saved = self
            .api
            .update_post(&entry.post.id, &PostPatch::from_post(&entry.post))
            .await?;
        if let Some(existing) = self.entries.iter_mut().find(|e| e.post.id == saved.id) {
            existing.post = saved.clone();
        }
        self.sort();
        Ok(saved)
    }

    /// Drops a client-only draft. Stored posts are left alone.
    pub fn cancel_new(&mut self, id: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| !(e.is_new && e.post.id == id));
        self.entries.len() != before
    }

    /// Removes the entry locally once the store has confirmed the delete.
    pub async fn delete(&mut self, id: &str) -> Result<()> {
        let Some(entry) = self.entry(id) else {
            bail!("No post with id {}", id);
        };
        if !entry.is_new {
            self.api.delete_post(id).await?;
        }
        self.entries.retain(|e| e.post.id != id);
        Ok(())
    }
}
