//! 実際に音を鳴らす出力先
//!
//! `PlaylistEngine` は1曲ずつ `load` し、曲の終了は `SinkEvent::Finished`、
//! 再生できなかった曲は `SinkEvent::Failed` で受け取る。
//! `load_id` は読み込みごとの連番で、差し替え済みの曲の終了通知を区別するために使う。

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::{EngineError, MediaItem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkEvent {
    /// 曲が最後まで再生された
    Finished { load_id: u64 },
    /// 曲を再生できなかった（ストリームURL切れ、ネットワークエラーなど）
    Failed { load_id: u64 },
    /// 出力先が使えなくなった（プレイヤープロセスの終了など）
    Closed,
}

#[async_trait]
pub trait MediaSink: Send + Sync {
    /// 曲を読み込んで再生を開始（再生中の曲は置き換える）
    async fn load(&self, load_id: u64, item: &MediaItem) -> Result<(), EngineError>;

    async fn set_paused(&self, paused: bool) -> Result<(), EngineError>;

    /// 音量（0-100）
    async fn set_volume(&self, volume: u8) -> Result<(), EngineError>;

    async fn stop(&self) -> Result<(), EngineError>;
}

#[derive(Debug, Default)]
struct NullState {
    load_id: Option<u64>,
    remaining: Duration,
    started_at: Option<Instant>,
    timer: Option<JoinHandle<()>>,
}

impl NullState {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// 音を出さない出力先（ドライラン用）
///
/// 各曲を固定の長さで再生したものとして扱う。一時停止中は残り時間を保持する。
#[derive(Debug)]
pub struct NullSink {
    track_length: Duration,
    events: mpsc::UnboundedSender<SinkEvent>,
    state: Mutex<NullState>,
}

impl NullSink {
    pub fn new(track_length: Duration, events: mpsc::UnboundedSender<SinkEvent>) -> Self {
        Self {
            track_length,
            events,
            state: Mutex::new(NullState::default()),
        }
    }

    fn start_timer(&self, state: &mut NullState, load_id: u64) {
        let events = self.events.clone();
        let remaining = state.remaining;
        state.started_at = Some(Instant::now());
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(remaining).await;
            let _ = events.send(SinkEvent::Finished { load_id });
        }));
    }
}

#[async_trait]
impl MediaSink for NullSink {
    async fn load(&self, load_id: u64, item: &MediaItem) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.cancel_timer();
        state.load_id = Some(load_id);
        state.remaining = self.track_length;
        self.start_timer(&mut state, load_id);

        log::info!("[dry-run] Now playing: {}", item.title);
        Ok(())
    }

    async fn set_paused(&self, paused: bool) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let Some(load_id) = state.load_id else {
            return Ok(());
        };

        if paused {
            if let Some(started_at) = state.started_at.take() {
                state.cancel_timer();
                state.remaining = state.remaining.saturating_sub(started_at.elapsed());
            }
        } else if state.started_at.is_none() {
            self.start_timer(&mut state, load_id);
        }
        Ok(())
    }

    async fn set_volume(&self, volume: u8) -> Result<(), EngineError> {
        log::info!("[dry-run] Volume set to {}", volume);
        Ok(())
    }

    async fn stop(&self) -> Result<(), EngineError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.cancel_timer();
        state.load_id = None;
        state.started_at = None;
        Ok(())
    }
}
