use serde::Deserialize;
use serde_json::Value;

// YouTube Data API レスポンス型

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatMessagesResponse {
    #[serde(default)]
    pub polling_interval_millis: u64,
    pub next_page_token: Option<String>,
    #[serde(default)]
    pub items: Vec<LiveChatMessageItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveChatMessageItem {
    pub id: String,
    pub snippet: MessageSnippet,
    pub author_details: AuthorDetails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSnippet {
    #[serde(rename = "type")]
    pub message_type: String,
    pub published_at: String,
    /// スパチャでコメントがない場合は省略される
    #[serde(default)]
    pub display_message: String,
    pub super_chat_details: Option<SuperChatDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuperChatDetails {
    /// 文字列または数値で返る
    pub amount_micros: Option<Value>,
    pub currency: Option<String>,
    pub amount_display_string: Option<String>,
    pub user_comment: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthorDetails {
    #[serde(default)]
    pub channel_id: String,
    pub display_name: String,
    #[serde(default)]
    pub is_chat_sponsor: bool,
}

#[derive(Debug, Deserialize)]
pub struct VideoResponse {
    #[serde(default)]
    pub items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoItem {
    pub live_streaming_details: Option<LiveStreamingDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStreamingDetails {
    pub active_live_chat_id: Option<String>,
}
