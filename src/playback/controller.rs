//! 再生キューの制御
//!
//! エンジンのプレイリストへの変更（追加・自動削除・再開）は全て `entries` のロック内で行い、
//! キューの表示用メタデータ（`QueueEntry`）もエンジンと同じ順序で保持する。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use uuid::Uuid;

use super::{EngineError, MediaItem, NowPlaying, PlaybackEngine, PlayerState};
use crate::admission::Requester;
use crate::config::resolve_timeout;
use crate::resolver::{ResolveError, VideoResolver};
use crate::settings::SettingsHandle;

const UPDATE_CAPACITY: usize = 16;

/// キューの1曲分
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub id: Uuid,
    pub video_id: String,
    pub title: String,
    #[serde(skip)]
    pub stream_url: String,
    pub requester_id: String,
    pub requester_name: String,
    pub enqueued_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum EnqueueError {
    #[error("Failed to resolve video: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Resolving video timed out")]
    Timeout,

    #[error("Player error: {0}")]
    Engine(#[from] EngineError),
}

pub struct QueueController {
    engine: Arc<dyn PlaybackEngine>,
    resolver: Arc<dyn VideoResolver>,
    settings: SettingsHandle,
    /// プレイリストのロック兼メタデータ
    entries: Mutex<VecDeque<QueueEntry>>,
    resolve_timeout: Duration,
    updates: broadcast::Sender<Vec<QueueEntry>>,
}

impl QueueController {
    pub fn new(
        engine: Arc<dyn PlaybackEngine>,
        resolver: Arc<dyn VideoResolver>,
        settings: SettingsHandle,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CAPACITY);
        Self {
            engine,
            resolver,
            settings,
            entries: Mutex::new(VecDeque::new()),
            resolve_timeout: resolve_timeout(),
            updates,
        }
    }

    #[cfg(test)]
    pub(crate) fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    pub fn engine(&self) -> &Arc<dyn PlaybackEngine> {
        &self.engine
    }

    /// キュー変更の通知を購読
    pub fn subscribe(&self) -> broadcast::Receiver<Vec<QueueEntry>> {
        self.updates.subscribe()
    }

    /// 現在のキュー
    pub async fn snapshot(&self) -> Vec<QueueEntry> {
        self.entries.lock().await.iter().cloned().collect()
    }

    fn publish(&self, entries: &VecDeque<QueueEntry>) {
        // 購読者がいなくても問題ない
        let _ = self.updates.send(entries.iter().cloned().collect());
    }

    /// 動画を解決してキューに追加する
    ///
    /// 解決に失敗した場合キューは変更しない。
    pub async fn enqueue(
        &self,
        video_id: &str,
        requester: &Requester,
    ) -> Result<QueueEntry, EnqueueError> {
        let media = tokio::time::timeout(self.resolve_timeout, self.resolver.resolve(video_id))
            .await
            .map_err(|_| EnqueueError::Timeout)??;

        let entry = QueueEntry {
            id: Uuid::new_v4(),
            video_id: media.video_id,
            title: media.title,
            stream_url: media.stream_url,
            requester_id: requester.identity().to_string(),
            requester_name: requester.display_name.clone(),
            enqueued_at: Utc::now(),
        };

        let mut entries = self.entries.lock().await;
        self.engine
            .enqueue(MediaItem {
                stream_url: entry.stream_url.clone(),
                title: entry.title.clone(),
            })
            .await?;
        entries.push_back(entry.clone());

        log::info!(
            "Queued {} as '{}'. Requested by {} ({})",
            entry.video_id,
            entry.title,
            entry.requester_name,
            entry.requester_id
        );

        match self.engine.state().await {
            Ok(PlayerState::Stopped | PlayerState::Ended | PlayerState::NoMediaLoaded) => {
                if let Err(e) = self.engine.play().await {
                    log::warn!("Failed to start playback: {}", e);
                }
            }
            Ok(_) => {}
            Err(e) => log::warn!("Failed to read player state: {}", e),
        }

        self.publish(&entries);
        Ok(entry)
    }

    /// 次の曲に進んだときの処理（再生済みの曲を削除）
    pub async fn on_track_advance(&self) -> Result<(), EngineError> {
        if !self.settings.snapshot().auto_remove_finished {
            return Ok(());
        }

        let mut entries = self.entries.lock().await;
        let count = self.engine.count().await?;
        if count >= 1 {
            self.engine.remove_first().await?;
            if let Some(finished) = entries.pop_front() {
                log::info!("Removed finished track '{}' from queue", finished.title);
            }
        }

        if self.engine.count().await? == 0 {
            self.engine.stop().await?;
        }

        self.publish(&entries);
        Ok(())
    }

    /// 一時停止・再開（モデレーター操作）
    pub async fn toggle_pause(&self) -> Result<PlayerState, EngineError> {
        let _entries = self.entries.lock().await;
        let state = self.engine.toggle_pause().await?;
        log::info!("Playback toggled: {:?}", state);
        Ok(state)
    }

    /// 次の曲へ飛ばす。自動削除が有効なら曲送りイベント経由で飛ばした曲が消える
    pub async fn skip(&self) -> Result<bool, EngineError> {
        let _entries = self.entries.lock().await;
        let skipped = self.engine.next().await?;
        if skipped {
            log::info!("Skipped to next track");
        }
        Ok(skipped)
    }

    pub async fn previous(&self) -> Result<bool, EngineError> {
        let _entries = self.entries.lock().await;
        self.engine.previous().await
    }

    pub async fn set_volume(&self, volume: u8) -> Result<(), EngineError> {
        self.engine.set_volume(volume).await?;
        log::info!("Volume set to {}", volume.min(100));
        Ok(())
    }

    pub async fn now_playing(&self) -> Result<NowPlaying, EngineError> {
        self.engine.now_playing().await
    }

    /// 再生が終わったままならプレイリストの再生を再開する
    ///
    /// 再開を指示した場合 `true`。状態取得に失敗した場合は何もしない。
    pub async fn supervisor_tick(&self) -> bool {
        let _entries = self.entries.lock().await;

        match self.engine.state().await {
            Ok(PlayerState::Ended) => {}
            Ok(_) => return false,
            Err(e) => {
                log::debug!("Supervisor could not read player state: {}", e);
                return false;
            }
        }

        match self.engine.count().await {
            Ok(count) if count > 0 => {}
            _ => return false,
        }

        if let Err(e) = self.engine.play().await {
            log::warn!("Supervisor failed to resume playback: {}", e);
            return false;
        }
        true
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::settings::RuntimeConfig;

    fn controller_with(
        resolver: FakeResolver,
        config: RuntimeConfig,
    ) -> (QueueController, Arc<FakeEngine>) {
        let engine = Arc::new(FakeEngine::new());
        let controller = QueueController::new(
            engine.clone(),
            Arc::new(resolver),
            SettingsHandle::new(config),
        );
        (controller, engine)
    }

    fn controller() -> (QueueController, Arc<FakeEngine>) {
        controller_with(FakeResolver::default(), RuntimeConfig::default())
    }

    #[tokio::test]
    async fn test_enqueue_starts_idle_player() {
        let (controller, engine) = controller();
        let mut updates = controller.subscribe();

        let entry = controller.enqueue("abc", &requester("alice")).await.unwrap();
        assert_eq!(entry.title, "Title abc");
        assert_eq!(entry.requester_id, "UCalice");
        assert_eq!(engine.titles(), vec!["Title abc"]);
        assert_eq!(*engine.plays.lock().unwrap(), 1);
        assert_eq!(updates.try_recv().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_enqueue_while_playing_does_not_restart() {
        let (controller, engine) = controller();
        engine.set_state(PlayerState::Playing);

        controller.enqueue("abc", &requester("alice")).await.unwrap();
        assert_eq!(*engine.plays.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_enqueue_resolve_failure_leaves_queue_untouched() {
        let resolver = FakeResolver {
            missing: ["gone".to_string()].into_iter().collect(),
            ..FakeResolver::default()
        };
        let (controller, engine) = controller_with(resolver, RuntimeConfig::default());

        let result = controller.enqueue("gone", &requester("alice")).await;
        assert!(matches!(result, Err(EnqueueError::Resolve(ResolveError::NotFound(_)))));
        assert_eq!(engine.count().await.unwrap(), 0);
        assert!(controller.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_enqueue_resolve_timeout() {
        let resolver = FakeResolver {
            delay: Some(Duration::from_secs(5)),
            ..FakeResolver::default()
        };
        let (controller, engine) = controller_with(resolver, RuntimeConfig::default());
        let controller = controller.with_resolve_timeout(Duration::from_millis(20));

        let result = controller.enqueue("slow", &requester("alice")).await;
        assert!(matches!(result, Err(EnqueueError::Timeout)));
        assert_eq!(engine.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_track_advance_removes_exactly_one() {
        let (controller, engine) = controller();
        for id in ["a", "b", "c"] {
            controller.enqueue(id, &requester("alice")).await.unwrap();
        }

        controller.on_track_advance().await.unwrap();
        assert_eq!(engine.count().await.unwrap(), 2);
        assert_eq!(engine.titles(), vec!["Title b", "Title c"]);

        let queue: Vec<_> = controller.snapshot().await.into_iter().map(|e| e.video_id).collect();
        assert_eq!(queue, vec!["b", "c"]);
        assert_eq!(*engine.stops.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_track_advance_with_single_entry_stops() {
        let (controller, engine) = controller();
        controller.enqueue("a", &requester("alice")).await.unwrap();

        controller.on_track_advance().await.unwrap();
        assert_eq!(engine.count().await.unwrap(), 0);
        assert_eq!(*engine.stops.lock().unwrap(), 1);
        assert!(controller.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_track_advance_respects_auto_remove_setting() {
        let config = RuntimeConfig {
            auto_remove_finished: false,
            ..RuntimeConfig::default()
        };
        let (controller, engine) = controller_with(FakeResolver::default(), config);
        controller.enqueue("a", &requester("alice")).await.unwrap();
        controller.enqueue("b", &requester("alice")).await.unwrap();

        controller.on_track_advance().await.unwrap();
        assert_eq!(engine.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_supervisor_resumes_ended_player() {
        let (controller, engine) = controller();
        controller.enqueue("a", &requester("alice")).await.unwrap();
        engine.set_state(PlayerState::Ended);

        assert!(controller.supervisor_tick().await);
        assert_eq!(engine.state().await.unwrap(), PlayerState::Playing);

        // 再生中なら何もしない（繰り返し呼んでも同じ）
        assert!(!controller.supervisor_tick().await);
        assert!(!controller.supervisor_tick().await);
        assert_eq!(*engine.plays.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_supervisor_ignores_empty_and_errors() {
        let (controller, engine) = controller();
        engine.set_state(PlayerState::Ended);
        assert!(!controller.supervisor_tick().await);

        controller.enqueue("a", &requester("alice")).await.unwrap();
        engine.set_state(PlayerState::Ended);
        *engine.fail_state.lock().unwrap() = true;
        assert!(!controller.supervisor_tick().await);

        *engine.fail_state.lock().unwrap() = false;
        engine.set_state(PlayerState::Paused);
        assert!(!controller.supervisor_tick().await);
    }

    #[tokio::test]
    async fn test_moderator_controls_reach_engine() {
        let (controller, engine) = controller();
        let mut advances = engine.subscribe();
        controller.enqueue("a", &requester("alice")).await.unwrap();
        controller.enqueue("b", &requester("bob")).await.unwrap();

        assert_eq!(controller.toggle_pause().await.unwrap(), PlayerState::Paused);
        assert_eq!(controller.toggle_pause().await.unwrap(), PlayerState::Playing);

        assert!(controller.skip().await.unwrap());
        assert_eq!(*engine.skips.lock().unwrap(), 1);
        assert_eq!(advances.try_recv().unwrap(), crate::playback::EngineEvent::TrackAdvanced);

        controller.set_volume(30).await.unwrap();
        let status = controller.now_playing().await.unwrap();
        assert_eq!(status.volume, 30);
        assert_eq!(status.title.as_deref(), Some("Title a"));
    }
}
