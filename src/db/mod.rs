use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

pub mod models;

/// busy_timeout設定（ミリ秒）
/// SQLiteのロック競合時に待機する最大時間
const SQLITE_BUSY_TIMEOUT_MS: u64 = 5000;

/// データベース接続プールを作成し、マイグレーションを実行
pub async fn create_pool(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    let connect_options =
        SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", db_path.display()))?
            .busy_timeout(Duration::from_millis(SQLITE_BUSY_TIMEOUT_MS));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect_options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    log::info!("Database ready: {}", db_path.display());
    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_pool_runs_migrations() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("test.db");

        let pool = create_pool(&db_path).await.expect("pool creation should succeed");

        // マイグレーションでテーブルが作成されていることを確認
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        let names: Vec<&str> = tables.iter().map(|(n,)| n.as_str()).collect();
        assert!(names.contains(&"settings"));
        assert!(names.contains(&"moderation_entries"));
    }

    #[tokio::test]
    async fn test_create_pool_is_reopenable() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("reopen.db");

        let pool = create_pool(&db_path).await.unwrap();
        pool.close().await;

        // 2回目のマイグレーションは何もしない
        let pool = create_pool(&db_path).await.unwrap();
        let row: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await.unwrap();
        assert_eq!(row.0, 1);
    }
}
