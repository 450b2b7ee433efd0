use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

/// Create the schema in the configured database. Safe to run repeatedly.
pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create the schema on an already-open pool.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // `seq` preserves insertion order, which retrieval uses to break ties.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            title TEXT NOT NULL DEFAULT '',
            text TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chats (
            id TEXT NOT NULL,
            username TEXT NOT NULL,
            title TEXT NOT NULL,
            model TEXT NOT NULL,
            mood TEXT NOT NULL,
            messages_json TEXT NOT NULL DEFAULT '[]',
            ts INTEGER NOT NULL,
            PRIMARY KEY (id, username)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chats_username_ts ON chats(username, ts DESC)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chats_ts ON chats(ts DESC)")
        .execute(pool)
        .await?;

    Ok(())
}
