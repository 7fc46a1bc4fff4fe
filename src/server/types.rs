use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;

use super::websocket::WebSocketState;
use crate::moderation::{ModerationEntry, ModerationList};
use crate::playback::{NowPlaying, QueueEntry};
use crate::settings::RuntimeConfig;

/// サーバー共有状態
pub type ServerState = Arc<RwLock<WebSocketState>>;

/// サーバーから送るメッセージ
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum WsMessage {
    /// キュー更新（オーバーレイ表示用）
    #[serde(rename = "queue:update")]
    QueueUpdate { payload: Vec<QueueEntry> },

    /// モデレーションリスト更新
    #[serde(rename = "moderation:update")]
    ModerationUpdate { payload: ModerationListPayload },

    /// 設定更新
    #[serde(rename = "config:update")]
    ConfigUpdate { payload: RuntimeConfig },

    /// 再生状態（曲名・音量）
    #[serde(rename = "player:update")]
    PlayerUpdate { payload: NowPlaying },

    /// 要求の処理に失敗した（送信元にのみ返す）
    #[serde(rename = "error")]
    Error { payload: ErrorPayload },
}

/// クライアントから受け取るメッセージ
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    #[serde(rename = "moderation:add")]
    ModerationAdd { payload: ModerationEditPayload },

    #[serde(rename = "moderation:remove")]
    ModerationRemove { payload: ModerationEditPayload },

    #[serde(rename = "moderation:list")]
    ModerationList { payload: ModerationListRequest },

    #[serde(rename = "config:get")]
    ConfigGet,

    #[serde(rename = "config:update")]
    ConfigUpdate { payload: RuntimeConfig },

    #[serde(rename = "queue:get")]
    QueueGet,

    /// 再生・一時停止の切り替え
    #[serde(rename = "player:toggle")]
    PlayerToggle,

    #[serde(rename = "player:next")]
    PlayerNext,

    #[serde(rename = "player:previous")]
    PlayerPrevious,

    #[serde(rename = "player:volume")]
    PlayerVolume { payload: VolumePayload },

    #[serde(rename = "player:get")]
    PlayerGet,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationEditPayload {
    pub list: ModerationList,
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationListRequest {
    pub list: ModerationList,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModerationListPayload {
    pub list: ModerationList,
    pub entries: Vec<ModerationEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumePayload {
    /// 0-100（超えた値は100に丸める）
    pub volume: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
}

impl WsMessage {
    pub fn error(message: impl Into<String>) -> Self {
        WsMessage::Error {
            payload: ErrorPayload {
                message: message.into(),
            },
        }
    }
}
