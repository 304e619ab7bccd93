use async_trait::async_trait;

use crate::application::ports::page_repository::{NewPage, PageRepository};
use crate::infrastructure::db::DbPool;

pub struct SqlxPageRepository {
    pub pool: DbPool,
}

impl SqlxPageRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PageRepository for SqlxPageRepository {
    async fn find_id_by_route(
        &self,
        creator_id: &str,
        route: &str,
    ) -> anyhow::Result<Option<String>> {
        let id = sqlx::query_scalar::<_, String>(
            "SELECT id FROM pages WHERE creator_id = ? AND route = ?",
        )
        .bind(creator_id)
        .bind(route)
        .fetch_optional(&self.pool)
        .await?;
        Ok(id)
    }

    async fn insert(&self, page: &NewPage) -> anyhow::Result<()> {
        let publish_date = page.is_published.then_some(page.created_at);
        sqlx::query(
            r#"INSERT INTO pages
               (id, name, route, content, creator_id, created_at, updated_at, is_published, publish_date)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&page.id)
        .bind(&page.name)
        .bind(&page.route)
        .bind(serde_json::to_string(&page.content)?)
        .bind(&page.creator_id)
        .bind(page.created_at)
        .bind(page.created_at)
        .bind(page.is_published)
        .bind(publish_date)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_by_route(&self, creator_id: &str, route: &str) -> anyhow::Result<u64> {
        let res = sqlx::query("DELETE FROM pages WHERE creator_id = ? AND route = ?")
            .bind(creator_id)
            .bind(route)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected())
    }
}
