use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use log::info;

use crate::config::{Config, StorageConfig};
use crate::models::{NewPost, PostPatch, ScheduledPost};

mod memory;
mod sqlite;

pub use memory::MemoryPostStore;
pub use sqlite::SqlitePostStore;

/// Repository over scheduled posts. Every backend assigns ids itself and lists posts by date
/// ascending, so the HTTP contract does not change with the backend.
#[async_trait]
pub trait PostStore: Send + Sync {
    async fn list(&self) -> Result<Vec<ScheduledPost>>;

    async fn create(&self, post: NewPost) -> Result<ScheduledPost>;

    /// `None` when no post has this id.
    async fn update(&self, id: &str, patch: PostPatch) -> Result<Option<ScheduledPost>>;

    /// `false` when no post has this id.
    async fn delete(&self, id: &str) -> Result<bool>;
}

pub fn open_store(cfg: &Config) -> Result<Arc<dyn PostStore>> {
    match &cfg.storage {
        StorageConfig::Memory => {
            info!("Using in-memory post store");
            Ok(Arc::new(MemoryPostStore::new()))
        }
        StorageConfig::Sqlite { db_path } => {
            info!("Using SQLite post store at {}", db_path.display());
            Ok(Arc::new(SqlitePostStore::open(db_path)?))
        }
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Platform, PostStatus};
    use chrono::{DateTime, Utc};

    fn post(title: &str, date: &str) -> NewPost {
        NewPost {
            title: title.to_string(),
            date: date.parse::<DateTime<Utc>>().unwrap(),
            platform: Platform::LinkedIn,
            status: PostStatus::Scheduled,
            content_snippet: None,
        }
    }

    /// Shared contract every backend must satisfy.
    async fn exercise(store: &dyn PostStore) {
        assert!(store.list().await.unwrap().is_empty());

        let later = store.create(post("Later", "2031-03-01T10:00:00Z")).await.unwrap();
        let sooner = store.create(post("Sooner", "2031-01-01T10:00:00Z")).await.unwrap();
        assert_ne!(later.id, sooner.id);

        let titles: Vec<_> = store.list().await.unwrap().into_iter().map(|p| p.title).collect();
        assert_eq!(titles, vec!["Sooner", "Later"]);

        let patch = PostPatch {
            title: Some("Renamed".into()),
            status: Some(PostStatus::Published),
            ..Default::default()
        };
        let updated = store.update(&later.id, patch).await.unwrap().unwrap();
        assert_eq!(updated.title, "Renamed");
        assert_eq!(updated.status, PostStatus::Published);
        assert_eq!(updated.date, later.date);

        assert!(store.update("missing", PostPatch::default()).await.unwrap().is_none());

        assert!(store.delete(&sooner.id).await.unwrap());
        assert!(!store.delete(&sooner.id).await.unwrap());
        let remaining = store.list().await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, later.id);
    }

    #[tokio::test]
    async fn test_memory_backend_contract() {
        exercise(&MemoryPostStore::new()).await;
    }

    #[tokio::test]
    async fn test_sqlite_backend_contract() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqlitePostStore::open(&dir.path().join("posts.sqlite3")).unwrap();
        exercise(&store).await;
    }

    #[tokio::test]
    async fn test_sqlite_posts_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("posts.sqlite3");
        let created = {
            let store = SqlitePostStore::open(&path).unwrap();
            store.create(post("Kept", "2031-01-01T10:00:00Z")).await.unwrap()
        };
        let reopened = SqlitePostStore::open(&path).unwrap();
        assert_eq!(reopened.list().await.unwrap(), vec![created]);
    }
}
