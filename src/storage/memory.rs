use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{new_id, PostStore};
use crate::models::{NewPost, PostPatch, ScheduledPost};

#[derive(Default)]
pub struct MemoryPostStore {
    posts: RwLock<Vec<ScheduledPost>>,
}

impl MemoryPostStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PostStore for MemoryPostStore {
    async fn list(&self) -> Result<Vec<ScheduledPost>> {
        let mut posts = self.posts.read().await.clone();
        posts.sort_by(|a, b| a.date.cmp(&b.date));
        Ok(posts)
    }

    async fn create(&self, post: NewPost) -> Result<ScheduledPost> {
        let post = post.into_post(new_id());
        self.posts.write().await.push(post.clone());
        Ok(post)
    }

    async fn update(&self, id: &str, patch: PostPatch) -> Result<Option<ScheduledPost>> {
        let mut posts = self.posts.write().await;
        let Some(existing) = posts.iter_mut().find(|p| p.id == id) else {
            return Ok(None);
        };
        patch.apply(existing);
        Ok(Some(existing.clone()))
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let mut posts = self.posts.write().await;
        let before = posts.len();
        posts.retain(|p| p.id != id);
        Ok(posts.len() != before)
    }
}
