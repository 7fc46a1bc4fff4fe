//! モデレーションリスト（BANユーザー・BAN動画・ホワイトリスト）
//!
//! 4つのリストは1つのロックの下にまとめ、判定中に一貫したビューを得られるようにする。
//! 変更は全て永続化してから返す。保存の順序は永続化ロックで直列化する。
//! 保存に失敗してもメモリ上の状態を正とし、ロールバックはしない。
//! 変更後のリスト内容は `subscribe()` で購読でき、変更の順序どおりに届く。

pub mod storage;

pub use storage::{ListStore, SqliteListStore, StorageError};

use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use crate::config::PLACEHOLDER_NAME;
use crate::resolver::{NameKind, VideoResolver};

const CHANGE_CAPACITY: usize = 32;

/// リストの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ModerationList {
    BannedUsers,
    BannedVideos,
    WhitelistedUsers,
    WhitelistedVideos,
}

impl ModerationList {
    pub const ALL: [ModerationList; 4] = [
        ModerationList::BannedUsers,
        ModerationList::BannedVideos,
        ModerationList::WhitelistedUsers,
        ModerationList::WhitelistedVideos,
    ];

    /// DBに保存する際のリスト名
    pub fn as_str(&self) -> &'static str {
        match self {
            ModerationList::BannedUsers => "banned_users",
            ModerationList::BannedVideos => "banned_videos",
            ModerationList::WhitelistedUsers => "whitelisted_users",
            ModerationList::WhitelistedVideos => "whitelisted_videos",
        }
    }

    /// 表示名の取得に使う種類
    pub fn name_kind(&self) -> NameKind {
        match self {
            ModerationList::BannedUsers | ModerationList::WhitelistedUsers => NameKind::Channel,
            ModerationList::BannedVideos | ModerationList::WhitelistedVideos => NameKind::Video,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationEntry {
    pub id: String,
    pub display_name: String,
}

/// 変更後のリスト内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModerationChange {
    pub list: ModerationList,
    pub entries: Vec<ModerationEntry>,
}

/// 4つのリストの内容（挿入順を保持）
#[derive(Debug, Clone, Default)]
pub struct ModerationLists {
    banned_users: Vec<ModerationEntry>,
    banned_videos: Vec<ModerationEntry>,
    whitelisted_users: Vec<ModerationEntry>,
    whitelisted_videos: Vec<ModerationEntry>,
}

impl ModerationLists {
    pub fn entries(&self, list: ModerationList) -> &[ModerationEntry] {
        match list {
            ModerationList::BannedUsers => &self.banned_users,
            ModerationList::BannedVideos => &self.banned_videos,
            ModerationList::WhitelistedUsers => &self.whitelisted_users,
            ModerationList::WhitelistedVideos => &self.whitelisted_videos,
        }
    }

    fn entries_mut(&mut self, list: ModerationList) -> &mut Vec<ModerationEntry> {
        match list {
            ModerationList::BannedUsers => &mut self.banned_users,
            ModerationList::BannedVideos => &mut self.banned_videos,
            ModerationList::WhitelistedUsers => &mut self.whitelisted_users,
            ModerationList::WhitelistedVideos => &mut self.whitelisted_videos,
        }
    }

    pub fn contains(&self, list: ModerationList, id: &str) -> bool {
        self.entries(list).iter().any(|e| e.id == id)
    }

    /// 追加（既存なら何もしない）。追加した場合 `true`
    pub fn insert(&mut self, list: ModerationList, entry: ModerationEntry) -> bool {
        if self.contains(list, &entry.id) {
            return false;
        }
        self.entries_mut(list).push(entry);
        true
    }

    pub fn remove(&mut self, list: ModerationList, id: &str) -> bool {
        let entries = self.entries_mut(list);
        let before = entries.len();
        entries.retain(|e| e.id != id);
        entries.len() != before
    }

    /// 既存エントリの表示名を更新。存在しない場合は追加しない
    pub fn rename(&mut self, list: ModerationList, id: &str, display_name: &str) -> bool {
        match self.entries_mut(list).iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                entry.display_name = display_name.to_string();
                true
            }
            None => false,
        }
    }
}

/// モデレーションリストのストア
pub struct ModerationStore {
    lists: RwLock<ModerationLists>,
    storage: Arc<dyn ListStore>,
    persist_lock: Mutex<()>,
    changes: broadcast::Sender<ModerationChange>,
}

impl ModerationStore {
    /// 空のストアを作成
    pub fn new(storage: Arc<dyn ListStore>) -> Self {
        Self::with_lists(ModerationLists::default(), storage)
    }

    fn with_lists(lists: ModerationLists, storage: Arc<dyn ListStore>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            lists: RwLock::new(lists),
            storage,
            persist_lock: Mutex::new(()),
            changes,
        }
    }

    /// ストレージから全リストを読み込んで作成
    ///
    /// 読み込みに失敗したリストは空で開始する。
    pub async fn load(storage: Arc<dyn ListStore>) -> Self {
        let mut lists = ModerationLists::default();
        for list in ModerationList::ALL {
            match storage.load_list(list).await {
                Ok(entries) => {
                    log::info!("Loaded {} entries for {}", entries.len(), list.as_str());
                    *lists.entries_mut(list) = entries;
                }
                Err(e) => {
                    log::error!("Failed to load {}: {}", list.as_str(), e);
                }
            }
        }

        Self::with_lists(lists, storage)
    }

    /// リストの変更通知を購読
    pub fn subscribe(&self) -> broadcast::Receiver<ModerationChange> {
        self.changes.subscribe()
    }

    /// 読み取りビューを取得
    ///
    /// ガードを保持したまま `.await` しないこと。
    pub fn read(&self) -> RwLockReadGuard<'_, ModerationLists> {
        match self.lists.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::error!("Moderation lock is poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, ModerationLists> {
        match self.lists.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::error!("Moderation lock is poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn contains(&self, list: ModerationList, id: &str) -> bool {
        self.read().contains(list, id)
    }

    pub fn list(&self, list: ModerationList) -> Vec<ModerationEntry> {
        self.read().entries(list).to_vec()
    }

    /// エントリを追加して永続化。追加した場合 `true`
    pub async fn add(&self, list: ModerationList, id: &str, display_name: &str) -> bool {
        let id = id.trim();
        if id.is_empty() {
            return false;
        }

        let _persist = self.persist_lock.lock().await;
        let inserted = self.write().insert(
            list,
            ModerationEntry {
                id: id.to_string(),
                display_name: display_name.to_string(),
            },
        );

        if inserted {
            log::info!("Added {} to {}", id, list.as_str());
            self.persist(list).await;
        }
        inserted
    }

    /// エントリを削除して永続化。削除した場合 `true`
    pub async fn remove(&self, list: ModerationList, id: &str) -> bool {
        let _persist = self.persist_lock.lock().await;
        let removed = self.write().remove(list, id);

        if removed {
            log::info!("Removed {} from {}", id, list.as_str());
            self.persist(list).await;
        }
        removed
    }

    /// 既存エントリの表示名を更新して永続化
    ///
    /// 名前の取得中に削除されたエントリは復活させない。
    pub async fn update_display_name(
        &self,
        list: ModerationList,
        id: &str,
        display_name: &str,
    ) -> bool {
        let _persist = self.persist_lock.lock().await;
        let renamed = self.write().rename(list, id, display_name);

        if renamed {
            self.persist(list).await;
        }
        renamed
    }

    /// 仮の表示名で追加し、本来の表示名をバックグラウンドで取得する
    ///
    /// 追加しなかった場合（既存・空ID）は `None`。
    pub async fn add_with_backfill(
        self: &Arc<Self>,
        list: ModerationList,
        id: &str,
        resolver: Arc<dyn VideoResolver>,
    ) -> Option<JoinHandle<()>> {
        if !self.add(list, id, PLACEHOLDER_NAME).await {
            return None;
        }

        let store = Arc::clone(self);
        let id = id.trim().to_string();
        Some(tokio::spawn(async move {
            match resolver.resolve_display_name(list.name_kind(), &id).await {
                Ok(name) => {
                    if store.update_display_name(list, &id, &name).await {
                        log::debug!("Resolved display name for {}: {}", id, name);
                    } else {
                        log::debug!("{} was removed from {} before its name resolved", id, list.as_str());
                    }
                }
                Err(e) => {
                    log::warn!("Failed to resolve display name for {}: {}", id, e);
                }
            }
        }))
    }

    /// 現在のリスト内容を保存して通知する（永続化ロック保持中に呼ぶ）
    async fn persist(&self, list: ModerationList) {
        let entries = self.list(list);
        if let Err(e) = self.storage.save_list(list, &entries).await {
            log::error!("Failed to persist {}: {}", list.as_str(), e);
        }
        // 購読者がいなくても問題ない
        let _ = self.changes.send(ModerationChange { list, entries });
    }
}

#[cfg(test)]
mod tests {
    use super::storage::memory::MemoryListStore;
    use super::*;
    use crate::resolver::{ResolveError, ResolvedMedia};
    use async_trait::async_trait;
    use std::sync::atomic::Ordering;
    use tokio::sync::Notify;

    struct NameResolver {
        gate: Option<Arc<Notify>>,
    }

    #[async_trait]
    impl VideoResolver for NameResolver {
        async fn resolve(&self, video_id: &str) -> Result<ResolvedMedia, ResolveError> {
            Err(ResolveError::NotFound(video_id.to_string()))
        }

        async fn resolve_display_name(
            &self,
            kind: NameKind,
            id: &str,
        ) -> Result<String, ResolveError> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            match kind {
                NameKind::Channel => Ok(format!("Channel {}", id)),
                NameKind::Video => Ok(format!("Video {}", id)),
            }
        }
    }

    fn new_store() -> (Arc<ModerationStore>, Arc<MemoryListStore>) {
        let storage = Arc::new(MemoryListStore::default());
        let store = Arc::new(ModerationStore::new(storage.clone()));
        (store, storage)
    }

    #[tokio::test]
    async fn test_add_remove_roundtrip() {
        let (store, storage) = new_store();

        assert!(store.add(ModerationList::BannedVideos, "dQw4w9WgXcQ", "Rick").await);
        assert!(store.contains(ModerationList::BannedVideos, "dQw4w9WgXcQ"));
        assert!(!store.contains(ModerationList::WhitelistedVideos, "dQw4w9WgXcQ"));
        assert_eq!(storage.saved(ModerationList::BannedVideos).len(), 1);

        assert!(store.remove(ModerationList::BannedVideos, "dQw4w9WgXcQ").await);
        assert!(!store.contains(ModerationList::BannedVideos, "dQw4w9WgXcQ"));
        assert!(storage.saved(ModerationList::BannedVideos).is_empty());
    }

    #[tokio::test]
    async fn test_add_existing_is_noop() {
        let (store, storage) = new_store();

        assert!(store.add(ModerationList::BannedUsers, "UC1", "First").await);
        assert!(!store.add(ModerationList::BannedUsers, "UC1", "Second").await);

        let entries = store.list(ModerationList::BannedUsers);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].display_name, "First");
        assert_eq!(storage.saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_add_rejects_blank_id() {
        let (store, _) = new_store();
        assert!(!store.add(ModerationList::BannedUsers, "   ", "x").await);
        assert!(store.list(ModerationList::BannedUsers).is_empty());
    }

    #[tokio::test]
    async fn test_list_keeps_insertion_order() {
        let (store, _) = new_store();
        for id in ["c", "a", "b"] {
            store.add(ModerationList::WhitelistedUsers, id, id).await;
        }
        let ids: Vec<_> = store
            .list(ModerationList::WhitelistedUsers)
            .into_iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[tokio::test]
    async fn test_persist_failure_keeps_memory_state() {
        let (store, storage) = new_store();
        storage.fail_writes.store(true, Ordering::SeqCst);

        assert!(store.add(ModerationList::BannedUsers, "UC1", "x").await);
        assert!(store.contains(ModerationList::BannedUsers, "UC1"));
        assert!(storage.saved(ModerationList::BannedUsers).is_empty());
    }

    #[tokio::test]
    async fn test_load_from_storage() {
        let storage = Arc::new(MemoryListStore::default());
        storage.lists.lock().unwrap().insert(
            ModerationList::BannedVideos,
            vec![ModerationEntry {
                id: "vid".to_string(),
                display_name: "Banned".to_string(),
            }],
        );

        let store = ModerationStore::load(storage).await;
        assert!(store.contains(ModerationList::BannedVideos, "vid"));
        assert!(store.list(ModerationList::BannedUsers).is_empty());
    }

    #[tokio::test]
    async fn test_backfill_updates_placeholder() {
        let (store, storage) = new_store();
        let resolver = Arc::new(NameResolver { gate: None });

        let handle = store
            .add_with_backfill(ModerationList::BannedUsers, "UCabc", resolver)
            .await
            .unwrap();
        handle.await.unwrap();

        let entries = store.list(ModerationList::BannedUsers);
        assert_eq!(entries[0].display_name, "Channel UCabc");
        assert_eq!(storage.saved(ModerationList::BannedUsers)[0].display_name, "Channel UCabc");
    }

    #[tokio::test]
    async fn test_backfill_does_not_resurrect_removed_entry() {
        let (store, storage) = new_store();
        let gate = Arc::new(Notify::new());
        let resolver = Arc::new(NameResolver {
            gate: Some(gate.clone()),
        });

        let handle = store
            .add_with_backfill(ModerationList::BannedVideos, "vid1", resolver)
            .await
            .unwrap();
        assert_eq!(
            store.list(ModerationList::BannedVideos)[0].display_name,
            PLACEHOLDER_NAME
        );

        // 名前の取得が終わる前に削除
        assert!(store.remove(ModerationList::BannedVideos, "vid1").await);
        gate.notify_one();
        handle.await.unwrap();

        assert!(!store.contains(ModerationList::BannedVideos, "vid1"));
        assert!(storage.saved(ModerationList::BannedVideos).is_empty());
    }

    #[tokio::test]
    async fn test_backfill_skipped_for_existing_entry() {
        let (store, _) = new_store();
        store.add(ModerationList::WhitelistedVideos, "vid", "Known").await;

        let resolver = Arc::new(NameResolver { gate: None });
        let handle = store
            .add_with_backfill(ModerationList::WhitelistedVideos, "vid", resolver)
            .await;
        assert!(handle.is_none());
        assert_eq!(store.list(ModerationList::WhitelistedVideos)[0].display_name, "Known");
    }

    #[tokio::test]
    async fn test_changes_are_published_in_order() {
        let (store, _) = new_store();
        let mut changes = store.subscribe();
        let resolver = Arc::new(NameResolver { gate: None });

        let handle = store
            .add_with_backfill(ModerationList::BannedUsers, "UCabc", resolver)
            .await
            .unwrap();
        handle.await.unwrap();
        assert!(store.remove(ModerationList::BannedUsers, "UCabc").await);
        // 変更がなければ通知しない
        assert!(!store.remove(ModerationList::BannedUsers, "UCabc").await);

        let first = changes.try_recv().unwrap();
        assert_eq!(first.list, ModerationList::BannedUsers);
        assert_eq!(first.entries[0].display_name, PLACEHOLDER_NAME);
        assert_eq!(
            changes.try_recv().unwrap().entries[0].display_name,
            "Channel UCabc"
        );
        assert!(changes.try_recv().unwrap().entries.is_empty());
        assert!(changes.try_recv().is_err());
    }
}
