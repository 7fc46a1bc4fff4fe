// =============================================================================
// 再生キュー
// =============================================================================
// - PlaybackEngine: プレイリストを持つ再生エンジンの抽象
// - PlaylistEngine: MediaSink（mpv / ダミー）を駆動するエンジン実装
//   （再生失敗は次の曲へ進め、出力先が落ちたら再生不可として扱う）
// - QueueController: 受付済みリクエストの追加、再生済みの自動削除
// - supervisor: 再生が止まったら再開するループ
// =============================================================================

pub(crate) mod controller;
mod engine;
#[cfg(unix)]
mod mpv;
mod sink;
mod supervisor;

pub use controller::{EnqueueError, QueueController, QueueEntry};
pub use engine::PlaylistEngine;
#[cfg(unix)]
pub use mpv::MpvSink;
pub use sink::{MediaSink, NullSink, SinkEvent};
pub use supervisor::{run_supervisor, run_track_advance_listener};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// エンジンの再生状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PlayerState {
    /// 起動直後（まだ何も読み込んでいない）
    NoMediaLoaded,
    Playing,
    Paused,
    Stopped,
    /// プレイリストの最後の曲が終わった
    Ended,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Player unavailable: {0}")]
    Unavailable(String),

    #[error("Player command failed: {0}")]
    Command(String),

    #[error("Playlist is empty")]
    EmptyPlaylist,
}

/// エンジンから通知されるイベント
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// 次の曲に進んだ
    TrackAdvanced,
}

/// プレイリストに積む再生対象
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaItem {
    pub stream_url: String,
    pub title: String,
}

/// 再生中の曲と音量
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NowPlaying {
    pub state: PlayerState,
    pub title: Option<String>,
    pub volume: u8,
}

#[async_trait]
pub trait PlaybackEngine: Send + Sync {
    /// プレイリスト末尾に追加
    async fn enqueue(&self, item: MediaItem) -> Result<(), EngineError>;

    async fn state(&self) -> Result<PlayerState, EngineError>;

    async fn play(&self) -> Result<(), EngineError>;

    async fn stop(&self) -> Result<(), EngineError>;

    /// プレイリストの先頭を削除
    async fn remove_first(&self) -> Result<(), EngineError>;

    async fn count(&self) -> Result<usize, EngineError>;

    /// 再生中なら一時停止、一時停止中なら再開。それ以外は `play` と同じ
    async fn toggle_pause(&self) -> Result<PlayerState, EngineError>;

    /// 次の曲へ。次の曲がなければ何もせず `false`
    async fn next(&self) -> Result<bool, EngineError>;

    /// 前の曲へ。前の曲がなければ何もせず `false`
    async fn previous(&self) -> Result<bool, EngineError>;

    /// 音量を設定（0-100 に丸める）
    async fn set_volume(&self, volume: u8) -> Result<(), EngineError>;

    async fn now_playing(&self) -> Result<NowPlaying, EngineError>;

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent>;
}
