use reqwest::{Client, StatusCode};

use super::{errors::YouTubeError, types::*};
use crate::config::http_timeout;

const API_BASE: &str = "https://www.googleapis.com/youtube/v3";

#[derive(Debug, Clone)]
pub struct YouTubeClient {
    client: Client,
    api_key: String,
    api_base: String,
}

impl YouTubeClient {
    pub fn new(api_key: String) -> Result<Self, YouTubeError> {
        Self::with_base_url(api_key, API_BASE)
    }

    /// APIのベースURLを指定して作成（テスト用）
    pub fn with_base_url(api_key: String, api_base: &str) -> Result<Self, YouTubeError> {
        let client = Client::builder().timeout(http_timeout()).build()?;
        Ok(Self {
            client,
            api_key,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    /// 動画IDからactiveLiveChatIdを取得
    pub async fn get_live_chat_id(&self, video_id: &str) -> Result<String, YouTubeError> {
        log::info!(
            "Fetching live chat ID for video: {} (quota cost: 1 unit)",
            video_id
        );

        let url = format!("{}/videos", self.api_base);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("part", "liveStreamingDetails"),
                ("id", video_id),
                ("key", &self.api_key),
            ])
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => {}
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let error_text = response.text().await.unwrap_or_default();
                if error_text.contains("quotaExceeded") {
                    return Err(YouTubeError::QuotaExceeded);
                }
                log::warn!("API key invalid or insufficient permissions: {}", error_text);
                return Err(YouTubeError::InvalidApiKey);
            }
            StatusCode::NOT_FOUND => {
                log::warn!("Video not found: {}", video_id);
                return Err(YouTubeError::VideoNotFound);
            }
            status if status.is_server_error() => {
                return Err(YouTubeError::ParseError(format!(
                    "Unexpected status: {}",
                    status
                )));
            }
            status => {
                log::warn!("Failed to fetch live chat ID: status {}", status);
                return Err(YouTubeError::VideoNotFound);
            }
        }

        let data: VideoResponse = response.json().await?;

        if data.items.is_empty() {
            return Err(YouTubeError::VideoNotFound);
        }

        let chat_id = data
            .items
            .first()
            .and_then(|item| item.live_streaming_details.as_ref())
            .and_then(|details| details.active_live_chat_id.clone())
            .ok_or(YouTubeError::LiveChatNotFound)?;

        log::info!("Live chat ID retrieved: {}", chat_id);
        Ok(chat_id)
    }

    /// ライブチャットメッセージ取得
    pub async fn get_live_chat_messages(
        &self,
        live_chat_id: &str,
        page_token: Option<&str>,
    ) -> Result<LiveChatMessagesResponse, YouTubeError> {
        log::debug!(
            "Fetching live chat messages for chat ID: {} (quota cost: ~5 units)",
            live_chat_id
        );

        let url = format!("{}/liveChat/messages", self.api_base);

        let mut query_params = vec![
            ("liveChatId", live_chat_id),
            ("part", "snippet,authorDetails"),
            ("key", self.api_key.as_str()),
        ];
        if let Some(token) = page_token {
            query_params.push(("pageToken", token));
        }

        let response = self.client.get(&url).query(&query_params).send().await?;

        match response.status() {
            StatusCode::OK => {
                let data: LiveChatMessagesResponse = response.json().await?;
                log::debug!(
                    "Fetched {} messages (polling interval: {}ms)",
                    data.items.len(),
                    data.polling_interval_millis
                );
                Ok(data)
            }
            StatusCode::BAD_REQUEST => {
                let error_text = response.text().await?;
                log::error!("YouTube API bad request: {}", error_text);

                if error_text.contains("keyInvalid") {
                    Err(YouTubeError::InvalidApiKey)
                } else if error_text.contains("pageTokenInvalid") {
                    Err(YouTubeError::InvalidPageToken)
                } else {
                    Err(YouTubeError::ParseError(format!(
                        "Bad request: {}",
                        error_text
                    )))
                }
            }
            StatusCode::UNAUTHORIZED => {
                log::error!("Unauthorized - API key invalid");
                Err(YouTubeError::InvalidApiKey)
            }
            StatusCode::FORBIDDEN => {
                let error_text = response.text().await?;
                log::error!("YouTube API forbidden error: {}", error_text);

                if error_text.contains("quotaExceeded") {
                    Err(YouTubeError::QuotaExceeded)
                } else if error_text.contains("rateLimitExceeded") {
                    Err(YouTubeError::RateLimitExceeded)
                } else if error_text.contains("liveChatDisabled") {
                    Err(YouTubeError::LiveChatDisabled)
                } else if error_text.contains("liveChatEnded") {
                    Err(YouTubeError::LiveChatNotFound)
                } else {
                    Err(YouTubeError::InvalidApiKey)
                }
            }
            StatusCode::NOT_FOUND => {
                log::warn!("Live chat not found - stream may have ended");
                Err(YouTubeError::LiveChatNotFound)
            }
            status => {
                let error_text = response.text().await.unwrap_or_default();
                log::error!(
                    "Unexpected API response - status: {}, body: {}",
                    status,
                    error_text
                );
                Err(YouTubeError::ParseError(format!(
                    "Unexpected status: {} - {}",
                    status, error_text
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    #[tokio::test]
    async fn test_get_live_chat_id() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/videos")
            .match_query(Matcher::UrlEncoded("id".into(), "vid123".into()))
            .with_status(200)
            .with_body(r#"{"items":[{"liveStreamingDetails":{"activeLiveChatId":"chat-1"}}]}"#)
            .create_async()
            .await;

        let client = YouTubeClient::with_base_url("key".to_string(), &server.url()).unwrap();
        assert_eq!(client.get_live_chat_id("vid123").await.unwrap(), "chat-1");
    }

    #[tokio::test]
    async fn test_get_live_chat_id_not_live() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/videos")
            .match_query(Matcher::Any)
            .with_status(200)
            .with_body(r#"{"items":[{"liveStreamingDetails":{}}]}"#)
            .create_async()
            .await;

        let client = YouTubeClient::with_base_url("key".to_string(), &server.url()).unwrap();
        assert!(matches!(
            client.get_live_chat_id("vid123").await,
            Err(YouTubeError::LiveChatNotFound)
        ));
    }

    #[tokio::test]
    async fn test_quota_exceeded() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/liveChat/messages")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body(r#"{"error":{"errors":[{"reason":"quotaExceeded"}]}}"#)
            .create_async()
            .await;

        let client = YouTubeClient::with_base_url("key".to_string(), &server.url()).unwrap();
        let err = client.get_live_chat_messages("chat-1", None).await.unwrap_err();
        assert!(matches!(err, YouTubeError::QuotaExceeded));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_rate_limit_is_not_fatal() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/liveChat/messages")
            .match_query(Matcher::Any)
            .with_status(403)
            .with_body(r#"{"error":{"errors":[{"reason":"rateLimitExceeded"}]}}"#)
            .create_async()
            .await;

        let client = YouTubeClient::with_base_url("key".to_string(), &server.url()).unwrap();
        let err = client.get_live_chat_messages("chat-1", Some("tok")).await.unwrap_err();
        assert!(matches!(err, YouTubeError::RateLimitExceeded));
        assert!(!err.is_fatal());
    }
}
