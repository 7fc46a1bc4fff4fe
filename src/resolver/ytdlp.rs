// =============================================================================
// yt-dlp による動画解決
// =============================================================================
// - ストリームURL: `yt-dlp -f bestaudio --get-url`（タイムアウト時はプロセスを終了）
// - 動画タイトル: YouTube oEmbed API
// - チャンネル名: チャンネルページの<title>、なければJSON-LDの"name"
// =============================================================================

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;

use super::{NameCache, NameKind, ResolveError, ResolvedMedia, VideoResolver};
use crate::config::{http_timeout, resolve_timeout};

/// 再生に使うURL（YouTube Music）
const MUSIC_WATCH_URL: &str = "https://music.youtube.com/watch?v=";

/// oEmbedに渡す動画URL
const WATCH_URL: &str = "https://www.youtube.com/watch?v=";

const DEFAULT_OEMBED_URL: &str = "https://www.youtube.com/oembed";
const DEFAULT_CHANNEL_URL: &str = "https://www.youtube.com/channel/";

const UNKNOWN_VIDEO: &str = "Unknown Video";
const UNKNOWN_CHANNEL: &str = "Unknown Channel";

/// ブラウザ相当のUser-Agent（チャンネルページの取得用）
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

static TITLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<title>([^<]+)</title>").expect("valid title regex"));
static JSON_LD_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""name":\s*"([^"]+)""#).expect("valid name regex"));

#[derive(Debug, Deserialize)]
struct OEmbedResponse {
    title: Option<String>,
}

/// yt-dlp と YouTube の公開エンドポイントを使うリゾルバ
#[derive(Debug)]
pub struct YtDlpResolver {
    client: Client,
    ytdlp_path: PathBuf,
    oembed_url: String,
    channel_url: String,
    process_timeout: Duration,
    cache: NameCache,
}

impl YtDlpResolver {
    pub fn new(ytdlp_path: impl Into<PathBuf>) -> Result<Self, ResolveError> {
        Self::with_endpoints(ytdlp_path, DEFAULT_OEMBED_URL, DEFAULT_CHANNEL_URL)
    }

    /// エンドポイントを指定して作成（テスト用にモックサーバーを指す）
    pub fn with_endpoints(
        ytdlp_path: impl Into<PathBuf>,
        oembed_url: &str,
        channel_url: &str,
    ) -> Result<Self, ResolveError> {
        let client = Client::builder()
            .timeout(http_timeout())
            .user_agent(USER_AGENT)
            .build()?;

        Ok(Self {
            client,
            ytdlp_path: ytdlp_path.into(),
            oembed_url: oembed_url.to_string(),
            channel_url: channel_url.to_string(),
            process_timeout: resolve_timeout(),
            cache: NameCache::new(),
        })
    }

    /// yt-dlp でストリームURLを取得
    async fn stream_url(&self, video_id: &str) -> Result<String, ResolveError> {
        let url = format!("{}{}", MUSIC_WATCH_URL, video_id);

        let mut cmd = tokio::process::Command::new(&self.ytdlp_path);
        cmd.args(["-f", "bestaudio", "--get-url", "--no-playlist", "--no-warnings"])
            .arg(&url)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.process_timeout, cmd.output()).await {
            Ok(result) => result
                .map_err(|e| ResolveError::Process(format!("failed to run yt-dlp: {}", e)))?,
            Err(_) => {
                log::warn!(
                    "yt-dlp timed out after {}s for {}",
                    self.process_timeout.as_secs(),
                    video_id
                );
                return Err(ResolveError::Timeout);
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            log::debug!("yt-dlp stderr for {}: {}", video_id, stderr.trim());
            if stderr.contains("Video unavailable") || stderr.contains("not available") {
                return Err(ResolveError::NotFound(video_id.to_string()));
            }
            return Err(ResolveError::Process(format!(
                "yt-dlp exited with {}",
                output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ResolveError::NotFound(video_id.to_string()))
    }

    /// oEmbed で動画タイトルを取得
    async fn fetch_video_title(&self, video_id: &str) -> Result<String, ResolveError> {
        let watch_url = format!("{}{}", WATCH_URL, video_id);
        let response = self
            .client
            .get(&self.oembed_url)
            .query(&[("url", watch_url.as_str()), ("format", "json")])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ResolveError::NotFound(video_id.to_string()));
        }
        let body: OEmbedResponse = response.error_for_status()?.json().await?;

        body.title
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| ResolveError::Parse("oEmbed response has no title".to_string()))
    }

    /// チャンネルページからチャンネル名を取得
    async fn fetch_channel_name(&self, channel_id: &str) -> Result<String, ResolveError> {
        let url = format!("{}{}", self.channel_url, channel_id);
        let response = self.client.get(&url).send().await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ResolveError::NotFound(channel_id.to_string()));
        }
        let html = response.error_for_status()?.text().await?;

        extract_channel_name(&html)
            .ok_or_else(|| ResolveError::Parse("channel name not found in page".to_string()))
    }

    /// 動画タイトル（キャッシュ優先、失敗時は既定の名前）
    async fn video_title(&self, video_id: &str) -> String {
        if let Some(title) = self.cache.get(NameKind::Video, video_id) {
            return title;
        }

        match self.fetch_video_title(video_id).await {
            Ok(title) => {
                self.cache.set(NameKind::Video, video_id, &title);
                title
            }
            Err(e) => {
                log::error!("Failed to fetch video title for {}: {}", video_id, e);
                UNKNOWN_VIDEO.to_string()
            }
        }
    }

    async fn channel_name(&self, channel_id: &str) -> String {
        if let Some(name) = self.cache.get(NameKind::Channel, channel_id) {
            return name;
        }

        match self.fetch_channel_name(channel_id).await {
            Ok(name) => {
                self.cache.set(NameKind::Channel, channel_id, &name);
                name
            }
            Err(e) => {
                log::error!("Failed to fetch channel name for {}: {}", channel_id, e);
                UNKNOWN_CHANNEL.to_string()
            }
        }
    }
}

#[async_trait]
impl VideoResolver for YtDlpResolver {
    async fn resolve(&self, video_id: &str) -> Result<ResolvedMedia, ResolveError> {
        let stream_url = self.stream_url(video_id).await?;
        let title = self.video_title(video_id).await;

        Ok(ResolvedMedia {
            video_id: video_id.to_string(),
            stream_url,
            title,
        })
    }

    async fn resolve_display_name(
        &self,
        kind: NameKind,
        id: &str,
    ) -> Result<String, ResolveError> {
        Ok(match kind {
            NameKind::Video => self.video_title(id).await,
            NameKind::Channel => self.channel_name(id).await,
        })
    }
}

/// チャンネルページのHTMLからチャンネル名を抽出
///
/// `<title>` の " - YouTube" を除いたものを優先し、使えなければ JSON-LD の "name" を使う。
pub fn extract_channel_name(html: &str) -> Option<String> {
    if let Some(caps) = TITLE_RE.captures(html) {
        let name = caps[1].replace(" - YouTube", "");
        let name = name.trim();
        if !name.is_empty() && name != "YouTube" {
            return Some(name.to_string());
        }
    }

    JSON_LD_NAME_RE
        .captures(html)
        .map(|caps| caps[1].to_string())
        .filter(|name| !name.trim().is_empty())
}
