//! プレイリストを持つ再生エンジン
//!
//! プレイリスト・再生位置・状態を1つのロックで管理し、`MediaSink` に1曲ずつ渡す。
//! 曲が終わると（再生に失敗した場合も）次の曲に進み `EngineEvent::TrackAdvanced` を通知する。
//! 最後の曲が終わると `Ended` になり、その後 `play()` されたときに
//! 新しく追加された曲があればそこから再開する。
//! 出力先が閉じた後は状態取得・再生が `EngineError::Unavailable` になる。

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::JoinHandle;

use super::sink::{MediaSink, SinkEvent};
use super::{EngineError, EngineEvent, MediaItem, NowPlaying, PlaybackEngine, PlayerState};
use crate::config::DEFAULT_VOLUME;
use crate::shutdown::Shutdown;

const EVENT_CAPACITY: usize = 64;
const MAX_VOLUME: u8 = 100;

#[derive(Debug)]
struct Inner {
    playlist: Vec<MediaItem>,
    /// 再生中（または最後に再生した）曲の位置
    current: Option<usize>,
    state: PlayerState,
    /// 最後に `load` した連番
    load_seq: u64,
    volume: u8,
    /// 出力先が閉じた
    sink_closed: bool,
}

impl Inner {
    fn ensure_available(&self) -> Result<(), EngineError> {
        if self.sink_closed {
            return Err(EngineError::Unavailable("media sink closed".to_string()));
        }
        Ok(())
    }
}

pub struct PlaylistEngine {
    sink: Arc<dyn MediaSink>,
    inner: Mutex<Inner>,
    events: broadcast::Sender<EngineEvent>,
}

impl PlaylistEngine {
    pub fn new(sink: Arc<dyn MediaSink>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            sink,
            inner: Mutex::new(Inner {
                playlist: Vec::new(),
                current: None,
                state: PlayerState::NoMediaLoaded,
                load_seq: 0,
                volume: DEFAULT_VOLUME,
                sink_closed: false,
            }),
            events,
        }
    }

    /// 出力先からの通知を処理するタスクを開始
    pub fn spawn_sink_listener(
        self: &Arc<Self>,
        mut sink_events: mpsc::UnboundedReceiver<SinkEvent>,
        mut shutdown: Shutdown,
    ) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = sink_events.recv() => match event {
                        Some(event) => engine.handle_sink_event(event).await,
                        None => {
                            log::info!("Media sink closed");
                            break;
                        }
                    },
                    _ = shutdown.wait() => break,
                }
            }
            log::debug!("Sink listener stopped");
        })
    }

    async fn handle_sink_event(&self, event: SinkEvent) {
        match event {
            SinkEvent::Finished { load_id } => {
                if let Err(e) = self.finish_track(load_id).await {
                    log::warn!("Failed to advance playlist: {}", e);
                }
            }
            SinkEvent::Failed { load_id } => {
                if let Err(e) = self.fail_track(load_id).await {
                    log::warn!("Failed to skip unplayable track: {}", e);
                }
            }
            SinkEvent::Closed => self.close_sink().await,
        }
    }

    /// 曲の終了を処理する
    ///
    /// 置き換え済みの曲の通知は無視する。次の曲があれば進み、なければ `Ended` にする。
    pub async fn finish_track(&self, load_id: u64) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        if load_id != inner.load_seq || inner.state != PlayerState::Playing {
            log::debug!("Ignoring stale finish event (load {})", load_id);
            return Ok(());
        }
        self.advance(&mut inner).await
    }

    /// 再生できなかった曲を飛ばして次の曲に進む
    pub async fn fail_track(&self, load_id: u64) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        if load_id != inner.load_seq
            || !matches!(inner.state, PlayerState::Playing | PlayerState::Paused)
        {
            log::debug!("Ignoring stale failure event (load {})", load_id);
            return Ok(());
        }

        if let Some(item) = inner.current.and_then(|i| inner.playlist.get(i)) {
            log::warn!("Could not play '{}', skipping", item.title);
        }
        self.advance(&mut inner).await
    }

    /// 出力先が使えなくなった
    pub async fn close_sink(&self) {
        let mut inner = self.inner.lock().await;
        inner.sink_closed = true;
        if inner.state != PlayerState::NoMediaLoaded {
            inner.state = PlayerState::Stopped;
        }
        log::error!("Media sink is gone, playback unavailable");
    }

    async fn advance(&self, inner: &mut Inner) -> Result<(), EngineError> {
        let next = inner.current.map_or(0, |i| i + 1);
        if next < inner.playlist.len() {
            self.load_at(inner, next).await?;
            let _ = self.events.send(EngineEvent::TrackAdvanced);
        } else {
            inner.state = PlayerState::Ended;
            log::info!("Reached end of playlist");
        }
        Ok(())
    }

    async fn load_at(&self, inner: &mut Inner, index: usize) -> Result<(), EngineError> {
        inner.ensure_available()?;
        let item = inner
            .playlist
            .get(index)
            .cloned()
            .ok_or(EngineError::EmptyPlaylist)?;

        inner.load_seq += 1;
        self.sink.load(inner.load_seq, &item).await?;
        inner.current = Some(index);
        inner.state = PlayerState::Playing;
        log::info!("Playing [{}] {}", index, item.title);
        Ok(())
    }

    async fn start(&self, inner: &mut Inner) -> Result<(), EngineError> {
        if inner.playlist.is_empty() {
            return Ok(());
        }

        let state = inner.state;
        match state {
            PlayerState::Playing => Ok(()),
            PlayerState::Paused => {
                self.sink.set_paused(false).await?;
                inner.state = PlayerState::Playing;
                Ok(())
            }
            PlayerState::NoMediaLoaded | PlayerState::Stopped => {
                let index = inner
                    .current
                    .filter(|&i| i < inner.playlist.len())
                    .unwrap_or(0);
                self.load_at(inner, index).await
            }
            PlayerState::Ended => {
                let next = inner.current.map_or(0, |i| i + 1);
                if next < inner.playlist.len() {
                    self.load_at(inner, next).await?;
                    let _ = self.events.send(EngineEvent::TrackAdvanced);
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl PlaybackEngine for PlaylistEngine {
    async fn enqueue(&self, item: MediaItem) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        inner.playlist.push(item);
        Ok(())
    }

    async fn state(&self) -> Result<PlayerState, EngineError> {
        let inner = self.inner.lock().await;
        inner.ensure_available()?;
        Ok(inner.state)
    }

    async fn play(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        self.start(&mut inner).await
    }

    async fn stop(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        if !inner.sink_closed {
            self.sink.stop().await?;
        }
        if inner.state != PlayerState::NoMediaLoaded {
            inner.state = PlayerState::Stopped;
        }
        Ok(())
    }

    async fn remove_first(&self) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        if inner.playlist.is_empty() {
            return Err(EngineError::EmptyPlaylist);
        }
        inner.playlist.remove(0);

        let current = inner.current;
        inner.current = match current {
            Some(0) => {
                // 再生中の曲を削除した
                if matches!(inner.state, PlayerState::Playing | PlayerState::Paused) {
                    if !inner.sink_closed {
                        self.sink.stop().await?;
                    }
                    inner.state = PlayerState::Stopped;
                }
                None
            }
            Some(i) => Some(i - 1),
            None => None,
        };
        Ok(())
    }

    async fn count(&self) -> Result<usize, EngineError> {
        Ok(self.inner.lock().await.playlist.len())
    }

    async fn toggle_pause(&self) -> Result<PlayerState, EngineError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_available()?;
        let state = inner.state;
        match state {
            PlayerState::Playing => {
                self.sink.set_paused(true).await?;
                inner.state = PlayerState::Paused;
            }
            _ => self.start(&mut inner).await?,
        }
        Ok(inner.state)
    }

    async fn next(&self) -> Result<bool, EngineError> {
        let mut inner = self.inner.lock().await;
        let next = inner.current.map_or(0, |i| i + 1);
        if next >= inner.playlist.len() {
            return Ok(false);
        }
        self.load_at(&mut inner, next).await?;
        let _ = self.events.send(EngineEvent::TrackAdvanced);
        Ok(true)
    }

    async fn previous(&self) -> Result<bool, EngineError> {
        let mut inner = self.inner.lock().await;
        let Some(previous) = inner.current.and_then(|i| i.checked_sub(1)) else {
            return Ok(false);
        };
        self.load_at(&mut inner, previous).await?;
        Ok(true)
    }

    async fn set_volume(&self, volume: u8) -> Result<(), EngineError> {
        let mut inner = self.inner.lock().await;
        inner.ensure_available()?;
        let volume = volume.min(MAX_VOLUME);
        self.sink.set_volume(volume).await?;
        inner.volume = volume;
        Ok(())
    }

    async fn now_playing(&self) -> Result<NowPlaying, EngineError> {
        let inner = self.inner.lock().await;
        inner.ensure_available()?;
        let title = match inner.state {
            PlayerState::Playing | PlayerState::Paused => inner
                .current
                .and_then(|i| inner.playlist.get(i))
                .map(|item| item.title.clone()),
            _ => None,
        };
        Ok(NowPlaying {
            state: inner.state,
            title,
            volume: inner.volume,
        })
    }

    fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}
