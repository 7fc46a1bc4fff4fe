//! チャット取得元
//!
//! `ChatSource` はコマンド処理ループへの入力。YouTube実装はData APIの
//! `liveChatMessages.list` をページトークンで辿り、既読IDを除外して返す。

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use super::client::YouTubeClient;
use super::dedup::SeenIds;
use super::errors::YouTubeError;
use super::state::PollingState;
use super::superchat::{message_text, superchat_info};
use super::types::LiveChatMessageItem;
use crate::admission::{Requester, SuperchatInfo};

/// 接続前に使う取得間隔
const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(5);

/// コマンドとして扱うメッセージ種別
const ACCEPTED_TYPES: [&str; 2] = ["textMessageEvent", "superChatEvent"];

/// チャットの1メッセージ
#[derive(Debug, Clone, PartialEq)]
pub struct ChatEvent {
    pub id: String,
    pub text: String,
    pub requester: Requester,
    pub superchat: SuperchatInfo,
    pub published_at: String,
}

#[derive(Debug, Error)]
pub enum ChatSourceError {
    #[error(transparent)]
    YouTube(#[from] YouTubeError),
}

impl ChatSourceError {
    /// 取得を諦めるべきエラーか
    pub fn is_fatal(&self) -> bool {
        match self {
            ChatSourceError::YouTube(e) => e.is_fatal(),
        }
    }
}

#[async_trait]
pub trait ChatSource: Send {
    /// 前回以降の新しいメッセージを古い順に取得
    async fn poll(&mut self) -> Result<Vec<ChatEvent>, ChatSourceError>;

    /// 次の取得までの最低待機時間
    fn min_interval(&self) -> Duration;
}

pub struct YouTubeChatSource {
    client: YouTubeClient,
    video_id: String,
    state: Option<PollingState>,
    seen: SeenIds,
    /// 初回ページ（接続前のメッセージ）を読み飛ばしたか
    primed: bool,
}

impl YouTubeChatSource {
    pub fn new(client: YouTubeClient, video_id: impl Into<String>) -> Self {
        Self {
            client,
            video_id: video_id.into(),
            state: None,
            seen: SeenIds::new(),
            primed: false,
        }
    }

    async fn polling_state(&mut self) -> Result<&mut PollingState, YouTubeError> {
        if self.state.is_none() {
            let chat_id = self.client.get_live_chat_id(&self.video_id).await?;
            self.state = Some(PollingState::new(chat_id));
        }
        // 直前で必ず設定している
        self.state.as_mut().ok_or(YouTubeError::LiveChatNotFound)
    }

    fn to_event(item: LiveChatMessageItem) -> Option<ChatEvent> {
        if !ACCEPTED_TYPES.contains(&item.snippet.message_type.as_str()) {
            return None;
        }

        let superchat = superchat_info(&item.snippet);
        let text = message_text(&item.snippet).to_string();
        let author = item.author_details;
        let channel_id = Some(author.channel_id).filter(|id| !id.is_empty());

        Some(ChatEvent {
            id: item.id,
            text,
            requester: Requester {
                display_name: author.display_name,
                channel_id,
                is_member: author.is_chat_sponsor,
            },
            superchat,
            published_at: item.snippet.published_at,
        })
    }
}

#[async_trait]
impl ChatSource for YouTubeChatSource {
    async fn poll(&mut self) -> Result<Vec<ChatEvent>, ChatSourceError> {
        let client = self.client.clone();
        let state = self.polling_state().await?;

        let response = match client
            .get_live_chat_messages(&state.live_chat_id, state.next_page_token.as_deref())
            .await
        {
            Ok(response) => response,
            Err(e) => {
                if !e.is_fatal() && !matches!(e, YouTubeError::RateLimitExceeded) {
                    // 既読IDで重複は除外されるので先頭から取り直す
                    state.reset_page_token();
                }
                return Err(e.into());
            }
        };

        state.update(response.next_page_token, response.polling_interval_millis);

        let primed = self.primed;
        self.primed = true;

        let mut events = Vec::new();
        for item in response.items {
            if !self.seen.insert(&item.id) {
                continue;
            }
            if !primed {
                continue;
            }
            if let Some(event) = Self::to_event(item) {
                events.push(event);
            }
        }

        if !primed {
            log::info!(
                "Connected to live chat; skipped {} backlog messages",
                self.seen.len()
            );
        }
        Ok(events)
    }

    fn min_interval(&self) -> Duration {
        self.state
            .as_ref()
            .map(PollingState::polling_interval)
            .unwrap_or(DEFAULT_MIN_INTERVAL)
    }
}
