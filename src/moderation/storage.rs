//! モデレーションリストの永続化

use async_trait::async_trait;
use sqlx::SqlitePool;
use thiserror::Error;

use super::{ModerationEntry, ModerationList};
use crate::db::models::ModerationRow;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("DB error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// リスト単位で丸ごと保存・読込するストレージ
#[async_trait]
pub trait ListStore: Send + Sync {
    async fn save_list(
        &self,
        list: ModerationList,
        entries: &[ModerationEntry],
    ) -> Result<(), StorageError>;

    async fn load_list(&self, list: ModerationList) -> Result<Vec<ModerationEntry>, StorageError>;
}

/// SQLiteによるリスト保存
#[derive(Debug, Clone)]
pub struct SqliteListStore {
    pool: SqlitePool,
}

impl SqliteListStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ListStore for SqliteListStore {
    /// リストを置き換え保存（トランザクション内で全削除→挿入）
    async fn save_list(
        &self,
        list: ModerationList,
        entries: &[ModerationEntry],
    ) -> Result<(), StorageError> {
        let now = chrono::Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM moderation_entries WHERE list_name = ?")
            .bind(list.as_str())
            .execute(&mut *tx)
            .await?;

        for (position, entry) in entries.iter().enumerate() {
            sqlx::query(
                r#"INSERT INTO moderation_entries
                (list_name, entry_id, display_name, position, updated_at)
                VALUES (?, ?, ?, ?, ?)"#,
            )
            .bind(list.as_str())
            .bind(&entry.id)
            .bind(&entry.display_name)
            .bind(position as i64)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        log::debug!("Saved {} entries to {}", entries.len(), list.as_str());
        Ok(())
    }

    async fn load_list(&self, list: ModerationList) -> Result<Vec<ModerationEntry>, StorageError> {
        let rows: Vec<ModerationRow> = sqlx::query_as(
            r#"SELECT list_name, entry_id, display_name, position, updated_at
            FROM moderation_entries
            WHERE list_name = ?
            ORDER BY position"#,
        )
        .bind(list.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ModerationEntry {
                id: row.entry_id,
                display_name: row.display_name,
            })
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod memory {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// テスト用のメモリ上ストレージ
    #[derive(Default)]
    pub struct MemoryListStore {
        pub lists: Mutex<HashMap<ModerationList, Vec<ModerationEntry>>>,
        pub fail_writes: AtomicBool,
        pub saves: AtomicUsize,
    }

    impl MemoryListStore {
        pub fn saved(&self, list: ModerationList) -> Vec<ModerationEntry> {
            self.lists.lock().unwrap().get(&list).cloned().unwrap_or_default()
        }
    }

    #[async_trait]
    impl ListStore for MemoryListStore {
        async fn save_list(
            &self,
            list: ModerationList,
            entries: &[ModerationEntry],
        ) -> Result<(), StorageError> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(StorageError::Unavailable("disk full".to_string()));
            }
            self.saves.fetch_add(1, Ordering::SeqCst);
            self.lists.lock().unwrap().insert(list, entries.to_vec());
            Ok(())
        }

        async fn load_list(
            &self,
            list: ModerationList,
        ) -> Result<Vec<ModerationEntry>, StorageError> {
            Ok(self.saved(list))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_pool;

    fn entry(id: &str, name: &str) -> ModerationEntry {
        ModerationEntry {
            id: id.to_string(),
            display_name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_sqlite_save_and_load_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_pool(&dir.path().join("mod.db")).await.unwrap();
        let store = SqliteListStore::new(pool);

        let entries = vec![entry("UCzzz", "Zed"), entry("UCaaa", "Alice")];
        store.save_list(ModerationList::BannedUsers, &entries).await.unwrap();

        let loaded = store.load_list(ModerationList::BannedUsers).await.unwrap();
        assert_eq!(loaded, entries);

        // 他のリストには影響しない
        assert!(store.load_list(ModerationList::BannedVideos).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_save_replaces_previous() {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_pool(&dir.path().join("mod.db")).await.unwrap();
        let store = SqliteListStore::new(pool);

        store
            .save_list(
                ModerationList::WhitelistedVideos,
                &[entry("vid1", "One"), entry("vid2", "Two")],
            )
            .await
            .unwrap();
        store
            .save_list(ModerationList::WhitelistedVideos, &[entry("vid2", "Two")])
            .await
            .unwrap();

        let loaded = store.load_list(ModerationList::WhitelistedVideos).await.unwrap();
        assert_eq!(loaded, vec![entry("vid2", "Two")]);
    }
}
