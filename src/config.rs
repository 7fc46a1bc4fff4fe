// =============================================================================
// 共通設定・定数モジュール
// =============================================================================
// アプリケーション全体で使用する定数と、環境変数から読み込むプロセス設定を定義
// =============================================================================

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// アプリケーションID（データディレクトリ名として使用）
pub const APP_IDENTIFIER: &str = "com.lyte.queue";

/// HTTPリクエストのデフォルトタイムアウト（秒）
///
/// YouTube API、oEmbed、為替レートAPIなど外部APIへのリクエストで使用。
pub const HTTP_TIMEOUT_SECS: u64 = 10;

/// チャット取得ループの基本間隔（秒）
pub const CHAT_POLL_TICK_SECS: u64 = 1;

/// 再生スーパーバイザーの監視間隔（秒）
pub const SUPERVISOR_TICK_SECS: u64 = 1;

/// 動画URL解決のタイムアウト（秒）
///
/// yt-dlpは遅いことがあるため、HTTPより長めに取る。
/// 1件の解決が後続のコマンド処理を止め続けないための上限。
pub const RESOLVE_TIMEOUT_SECS: u64 = 20;

/// 表示名取得中のプレースホルダー
pub const PLACEHOLDER_NAME: &str = "Loading...";

/// 起動時の音量（0-100）
pub const DEFAULT_VOLUME: u8 = 50;

/// WebSocketサーバーのデフォルト待ち受けアドレス
pub const DEFAULT_WS_ADDR: &str = "127.0.0.1:19801";

/// 為替レートAPIのデフォルトエンドポイント（USD基準）
pub const DEFAULT_RATES_URL: &str = "https://open.er-api.com/v6/latest/USD";

/// HTTPリクエストのデフォルトタイムアウト（Duration）
pub fn http_timeout() -> Duration {
    Duration::from_secs(HTTP_TIMEOUT_SECS)
}

pub fn chat_poll_tick() -> Duration {
    Duration::from_secs(CHAT_POLL_TICK_SECS)
}

pub fn supervisor_tick() -> Duration {
    Duration::from_secs(SUPERVISOR_TICK_SECS)
}

pub fn resolve_timeout() -> Duration {
    Duration::from_secs(RESOLVE_TIMEOUT_SECS)
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    #[error("Failed to determine data directory")]
    NoDataDir,
}

/// 再生バックエンド
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerBackend {
    /// mpvをJSON IPCで操作
    Mpv,
    /// 実際には再生しない（動作確認用）
    None,
}

/// 環境変数から読み込むプロセス設定
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// 監視するライブ配信の動画ID
    pub video_id: String,
    /// YouTube Data API キー
    pub api_key: String,
    /// DBなどを置くデータディレクトリ
    pub data_dir: PathBuf,
    /// WebSocket（モデレーター操作・オーバーレイ配信）の待ち受けアドレス
    pub ws_addr: SocketAddr,
    pub player: PlayerBackend,
    pub mpv_path: String,
    pub ytdlp_path: String,
    pub rates_url: String,
    /// `PlayerBackend::None` 時の疑似曲長
    pub dry_run_track_secs: u64,
}

impl AppConfig {
    /// プロセス環境変数から読み込む
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// 任意のキー参照関数から読み込む（テスト用に分離）
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let video_id = get("LYTE_VIDEO_ID").ok_or(ConfigError::Missing("LYTE_VIDEO_ID"))?;
        let api_key = get("YOUTUBE_API_KEY").ok_or(ConfigError::Missing("YOUTUBE_API_KEY"))?;

        let data_dir = match get("LYTE_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => dirs::data_dir()
                .ok_or(ConfigError::NoDataDir)?
                .join(APP_IDENTIFIER),
        };

        let ws_addr_raw = get("LYTE_WS_ADDR").unwrap_or_else(|| DEFAULT_WS_ADDR.to_string());
        let ws_addr = ws_addr_raw.parse().map_err(|e| ConfigError::Invalid {
            key: "LYTE_WS_ADDR",
            message: format!("{} ({})", ws_addr_raw, e),
        })?;

        let player = match get("LYTE_PLAYER").as_deref() {
            None | Some("mpv") => PlayerBackend::Mpv,
            Some("none") => PlayerBackend::None,
            Some(other) => {
                return Err(ConfigError::Invalid {
                    key: "LYTE_PLAYER",
                    message: format!("expected 'mpv' or 'none', got '{}'", other),
                })
            }
        };

        let dry_run_track_secs = match get("LYTE_DRY_RUN_TRACK_SECS") {
            Some(raw) => raw.parse().map_err(|e| ConfigError::Invalid {
                key: "LYTE_DRY_RUN_TRACK_SECS",
                message: format!("{} ({})", raw, e),
            })?,
            None => 180,
        };

        Ok(Self {
            video_id,
            api_key,
            data_dir,
            ws_addr,
            player,
            mpv_path: get("LYTE_MPV_PATH").unwrap_or_else(|| "mpv".to_string()),
            ytdlp_path: get("LYTE_YTDLP_PATH").unwrap_or_else(|| "yt-dlp".to_string()),
            rates_url: get("LYTE_RATES_URL").unwrap_or_else(|| DEFAULT_RATES_URL.to_string()),
            dry_run_track_secs,
        })
    }

    /// SQLiteファイルのパス
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("lyte.db")
    }
}
