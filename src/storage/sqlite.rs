use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Row};

use super::{new_id, PostStore};
use crate::models::{NewPost, PostPatch, ScheduledPost};

const SCHEMA_SQL: &str = include_str!("../../schema.sql");

const SELECT_POST: &str = "SELECT id, title, date, platform, status, content_snippet FROM posts";

pub struct SqlitePostStore {
    conn: Mutex<Connection>,
}

impl SqlitePostStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open DB at {}", path.display()))?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to initialize schema")?;

        Ok(SqlitePostStore {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("Post store connection lock poisoned"))
    }
}

// Fixed-width UTC timestamps so ORDER BY on the text column is chronological.
fn encode_date(date: &DateTime<Utc>) -> String {
    date.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn post_from_row(row: &Row<'_>) -> Result<ScheduledPost> {
    let date: DateTime<Utc> = row.get::<_, String>(2)?.parse()?;
    Ok(ScheduledPost {
        id: row.get(0)?,
        title: row.get(1)?,
        date,
        platform: row.get::<_, String>(3)?.parse()?,
        status: row.get::<_, String>(4)?.parse()?,
        content_snippet: row.get(5)?,
    })
}

fn find_post(conn: &Connection, id: &str) -> Result<Option<ScheduledPost>> {
    let mut stmt = conn.prepare(&format!("{} WHERE id = ?", SELECT_POST))?;
    let post = stmt
        .query_and_then([id], post_from_row)?
        .next()
        .transpose()?;
    Ok(post)
}

#[async_trait]
impl PostStore for SqlitePostStore {
    async fn list(&self) -> Result<Vec<ScheduledPost>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!("{} ORDER BY date ASC", SELECT_POST))?;
        let iter = stmt.query_and_then([], post_from_row)?;
        Ok(iter.collect::<Result<Vec<_>>>()?)
    }

    async fn create(&self, post: NewPost) -> Result<ScheduledPost> {
        let post = post.into_post(new_id());
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO posts (id, title, date, platform, status, content_snippet)
             VALUES (?, ?, ?, ?, ?, ?)",
            params![
                &post.id,
                &post.title,
                encode_date(&post.date),
                post.platform.to_string(),
                post.status.to_string(),
                &post.content_snippet,
            ],
        )
        .context("Failed to insert post")?;
        Ok(post)
    }

    async fn update(&self, id: &str, patch: PostPatch) -> Result<Option<ScheduledPost>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let Some(mut post) = find_post(&tx, id)? else {
            return Ok(None);
        };
        patch.apply(&mut post);

        tx.execute(
            "UPDATE posts SET title = ?, date = ?, platform = ?, status = ?, content_snippet = ?
             WHERE id = ?",
            params![
                &post.title,
                encode_date(&post.date),
                post.platform.to_string(),
                post.status.to_string(),
                &post.content_snippet,
                &post.id,
            ],
        )
        .context("Failed to update post")?;
        tx.commit().context("Failed to commit post update")?;

        Ok(Some(post))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let removed = conn
            .execute("DELETE FROM posts WHERE id = ?", [id])
            .context("Failed to delete post")?;
        Ok(removed > 0)
    }
}
