//! 動画・チャンネル情報の解決
//!
//! 動画IDから再生用ストリームURLとタイトルを取得する。
//! モデレーションリストの表示名取得（チャンネル名・動画タイトル）にも使う。

mod cache;
mod ytdlp;

pub use cache::NameCache;
pub use ytdlp::YtDlpResolver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// 解決済みメディア
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedMedia {
    pub video_id: String,
    /// プレイヤーに渡すストリームURL
    pub stream_url: String,
    pub title: String,
}

/// 表示名の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NameKind {
    /// チャンネルID → チャンネル名
    Channel,
    /// 動画ID → 動画タイトル
    Video,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Resolution timed out")]
    Timeout,

    #[error("Resolver process failed: {0}")]
    Process(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to parse response: {0}")]
    Parse(String),
}

#[async_trait]
pub trait VideoResolver: Send + Sync {
    /// 動画IDから再生可能なストリームとタイトルを取得
    async fn resolve(&self, video_id: &str) -> Result<ResolvedMedia, ResolveError>;

    /// チャンネル名または動画タイトルを取得
    async fn resolve_display_name(&self, kind: NameKind, id: &str)
        -> Result<String, ResolveError>;
}
