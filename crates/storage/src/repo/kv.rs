use crate::{Db, PersistentStore};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::Row;

impl Db {
    pub async fn kv_entries(&self) -> anyhow::Result<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT key, value FROM kv_cache")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| (r.get::<String, _>(0), r.get::<String, _>(1)))
            .collect())
    }

    pub async fn kv_put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_cache (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().naive_utc())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn kv_delete(&self, key: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM kv_cache WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PersistentStore for Db {
    async fn load_all(&self) -> anyhow::Result<Vec<(String, String)>> {
        self.kv_entries().await
    }

    async fn put(&self, key: &str, value: &str) -> anyhow::Result<()> {
        self.kv_put(key, value).await
    }

    async fn remove(&self, key: &str) -> anyhow::Result<()> {
        self.kv_delete(key).await
    }
}
