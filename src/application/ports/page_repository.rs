use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

#[derive(Debug, Clone)]
pub struct NewPage {
    pub id: String,
    pub name: String,
    pub route: String,
    pub content: JsonValue,
    pub creator_id: String,
    pub is_published: bool,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait PageRepository: Send + Sync {
    async fn find_id_by_route(&self, creator_id: &str, route: &str)
    -> anyhow::Result<Option<String>>;

    async fn insert(&self, page: &NewPage) -> anyhow::Result<()>;

    /// Returns the number of rows removed.
    async fn delete_by_route(&self, creator_id: &str, route: &str) -> anyhow::Result<u64>;
}
