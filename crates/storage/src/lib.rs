use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::debug;

use shared::{
    domain::{Item, ItemId, Priority},
    protocol::{ItemChanges, NewItem},
};

const ITEM_COLUMNS: &str =
    "id, title, description, completed, priority, due_date, created_at, updated_at";

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to `sqlite::memory:` opens its own empty database,
        // so in-memory stores are pinned to a single connection that never expires.
        let pool_options = if is_memory_url(database_url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .min_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(connect_options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        debug!(%database_url, "item storage ready");
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn list_items(&self) -> Result<Vec<Item>> {
        let rows = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM items ORDER BY id"))
            .fetch_all(&self.pool)
            .await
            .context("failed to list items")?;
        rows.iter().map(item_from_row).collect()
    }

    pub async fn create_item(&self, new_item: &NewItem) -> Result<Item> {
        let now = Utc::now();
        let row = sqlx::query(&format!(
            "INSERT INTO items
                 (title, description, completed, priority, due_date, created_at, updated_at)
             VALUES (?, ?, 0, ?, ?, ?, ?)
             RETURNING {ITEM_COLUMNS}"
        ))
        .bind(new_item.title.trim())
        .bind(new_item.description.as_deref())
        .bind(new_item.priority.as_str())
        .bind(new_item.due_date)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert item")?;
        item_from_row(&row)
    }

    /// Applies `changes` to the stored row. `Ok(None)` when the item does not exist.
    pub async fn update_item(&self, item_id: i64, changes: &ItemChanges) -> Result<Option<Item>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM items WHERE id = ?"))
            .bind(item_id)
            .fetch_optional(&mut *tx)
            .await
            .with_context(|| format!("failed to load item {item_id}"))?;
        let Some(row) = row else {
            return Ok(None);
        };
        let current = item_from_row(&row)?;
        let mut next = changes.apply_to(&current)?;
        next.title = next.title.trim().to_string();
        // updated_at never moves backwards even if the wall clock does.
        next.updated_at = Utc::now().max(current.updated_at);

        sqlx::query(
            "UPDATE items
             SET title = ?, description = ?, completed = ?, priority = ?,
                 due_date = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(&next.title)
        .bind(next.description.as_deref())
        .bind(next.completed)
        .bind(next.priority.as_str())
        .bind(next.due_date)
        .bind(next.updated_at)
        .bind(item_id)
        .execute(&mut *tx)
        .await
        .with_context(|| format!("failed to update item {item_id}"))?;
        tx.commit().await?;
        Ok(Some(next))
    }

    /// Returns whether a row was removed.
    pub async fn delete_item(&self, item_id: i64) -> Result<bool> {
        let result = sqlx::query("DELETE FROM items WHERE id = ?")
            .bind(item_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete item {item_id}"))?;
        Ok(result.rows_affected() > 0)
    }
}

fn item_from_row(row: &SqliteRow) -> Result<Item> {
    let id: i64 = row.try_get("id")?;
    let priority: String = row.try_get("priority")?;
    let priority = Priority::from_str(&priority)
        .map_err(|err| anyhow!("item {id} has corrupt priority: {err}"))?;
    Ok(Item {
        id: ItemId::from(id),
        title: row.try_get("title")?,
        description: row.try_get::<Option<String>, _>("description")?,
        completed: row.try_get("completed")?,
        priority,
        due_date: row.try_get::<Option<NaiveDate>, _>("due_date")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn is_memory_url(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_memory_url(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
