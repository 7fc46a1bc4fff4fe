// =============================================================================
// mpv 出力先
// =============================================================================
// `mpv --idle` を子プロセスとして起動し、JSON IPC（Unixソケット）で操作する。
// - 1行1コマンドのJSONを書き込む
// - `start-file` で再生開始した曲と `load_id` を対応付け、
//   `end-file` の reason が "eof" なら終了、"error" なら再生失敗を通知する
// - IPC が閉じたら（mpv の終了）`SinkEvent::Closed` を通知する
// =============================================================================

use async_trait::async_trait;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::UnixStream;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use super::sink::{MediaSink, SinkEvent};
use super::{EngineError, MediaItem};
use crate::config::DEFAULT_VOLUME;

/// IPC接続の試行回数（100ms間隔）
const CONNECT_ATTEMPTS: usize = 60;
const CONNECT_INTERVAL: Duration = Duration::from_millis(100);

/// mpv のイベント行から曲の終了・失敗を判定する
#[derive(Debug, Default)]
struct EventTracker {
    /// 再生中のプレイリストエントリIDと load_id
    playing: Option<(i64, u64)>,
}

impl EventTracker {
    fn handle_line(&mut self, line: &str, current_load: u64) -> Option<SinkEvent> {
        let value: Value = serde_json::from_str(line).ok()?;

        if let Some(error) = value.get("error").and_then(Value::as_str) {
            if error != "success" {
                log::warn!("mpv command failed: {}", error);
            }
            return None;
        }

        let entry_id = value.get("playlist_entry_id").and_then(Value::as_i64);
        match value.get("event").and_then(Value::as_str)? {
            "start-file" => {
                self.playing = entry_id.map(|id| (id, current_load));
                None
            }
            "end-file" => {
                let (playing_id, load_id) = self.playing?;
                if entry_id != Some(playing_id) {
                    return None;
                }
                // "stop"（差し替え）や "quit" は終了扱いにしない
                let event = match value.get("reason").and_then(Value::as_str) {
                    Some("eof") => SinkEvent::Finished { load_id },
                    Some("error") => {
                        let detail = value
                            .get("file_error")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown error");
                        log::warn!("mpv failed to play entry {}: {}", playing_id, detail);
                        SinkEvent::Failed { load_id }
                    }
                    _ => return None,
                };
                self.playing = None;
                Some(event)
            }
            _ => None,
        }
    }
}

/// mpv を使う出力先
pub struct MpvSink {
    writer: Mutex<OwnedWriteHalf>,
    current_load: Arc<AtomicU64>,
    next_request_id: AtomicI64,
    socket_path: PathBuf,
    _child: Child,
    reader: JoinHandle<()>,
}

impl MpvSink {
    /// mpv を起動してIPCに接続する
    pub async fn spawn(
        mpv_path: &str,
        socket_path: PathBuf,
        events: mpsc::UnboundedSender<SinkEvent>,
    ) -> Result<Self, EngineError> {
        // 前回の異常終了で残ったソケットを削除
        let _ = std::fs::remove_file(&socket_path);

        log::info!("Launching mpv: {} (ipc: {})", mpv_path, socket_path.display());
        let mut child = Command::new(mpv_path)
            .arg("--idle=yes")
            .arg("--no-video")
            .arg("--no-terminal")
            .arg(format!("--volume={}", DEFAULT_VOLUME))
            .arg(format!("--input-ipc-server={}", socket_path.display()))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Unavailable(format!("failed to launch mpv: {}", e)))?;

        let mut stream = None;
        for _ in 0..CONNECT_ATTEMPTS {
            tokio::time::sleep(CONNECT_INTERVAL).await;
            match UnixStream::connect(&socket_path).await {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(_) => {
                    if let Ok(Some(status)) = child.try_wait() {
                        return Err(EngineError::Unavailable(format!(
                            "mpv exited before IPC connected (status={})",
                            status
                        )));
                    }
                }
            }
        }
        let Some(stream) = stream else {
            return Err(EngineError::Unavailable(
                "timed out connecting to mpv IPC".to_string(),
            ));
        };
        log::info!("mpv IPC connected");

        let (read_half, write_half) = stream.into_split();
        let current_load = Arc::new(AtomicU64::new(0));

        let reader_load = Arc::clone(&current_load);
        let reader = tokio::spawn(async move {
            let mut lines = BufReader::new(read_half).lines();
            let mut tracker = EventTracker::default();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let load_id = reader_load.load(Ordering::SeqCst);
                        if let Some(event) = tracker.handle_line(&line, load_id) {
                            if events.send(event).is_err() {
                                break;
                            }
                        }
                    }
                    Ok(None) => {
                        log::error!("mpv IPC closed");
                        break;
                    }
                    Err(e) => {
                        log::error!("mpv IPC read error: {}", e);
                        break;
                    }
                }
            }
            let _ = events.send(SinkEvent::Closed);
        });

        Ok(Self {
            writer: Mutex::new(write_half),
            current_load,
            next_request_id: AtomicI64::new(1),
            socket_path,
            _child: child,
            reader,
        })
    }

    async fn send(&self, command: Value) -> Result<(), EngineError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::SeqCst);
        let mut line = json!({ "command": command, "request_id": request_id }).to_string();
        line.push('\n');

        let mut writer = self.writer.lock().await;
        writer
            .write_all(line.as_bytes())
            .await
            .map_err(|e| EngineError::Command(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| EngineError::Command(e.to_string()))
    }
}

#[async_trait]
impl MediaSink for MpvSink {
    async fn load(&self, load_id: u64, item: &MediaItem) -> Result<(), EngineError> {
        self.current_load.store(load_id, Ordering::SeqCst);
        self.send(json!(["loadfile", item.stream_url, "replace"])).await?;
        self.send(json!(["set_property", "force-media-title", item.title]))
            .await?;
        self.send(json!(["set_property", "pause", false])).await
    }

    async fn set_paused(&self, paused: bool) -> Result<(), EngineError> {
        self.send(json!(["set_property", "pause", paused])).await
    }

    async fn set_volume(&self, volume: u8) -> Result<(), EngineError> {
        self.send(json!(["set_property", "volume", volume])).await
    }

    async fn stop(&self) -> Result<(), EngineError> {
        self.send(json!(["stop"])).await
    }
}

impl Drop for MpvSink {
    fn drop(&mut self) {
        self.reader.abort();
        let _ = std::fs::remove_file(&self.socket_path);
    }
}
