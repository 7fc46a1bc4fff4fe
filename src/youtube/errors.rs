use thiserror::Error;

#[derive(Error, Debug)]
pub enum YouTubeError {
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("API key is invalid or missing")]
    InvalidApiKey,

    #[error("Video not found or not a live stream")]
    VideoNotFound,

    #[error("Live chat not found or stream has ended")]
    LiveChatNotFound,

    #[error("Live chat is disabled for this video")]
    LiveChatDisabled,

    #[error("Invalid page token - resetting pagination")]
    InvalidPageToken,

    #[error("Quota exceeded - please try again tomorrow")]
    QuotaExceeded,

    #[error("Rate limit exceeded - retrying with backoff")]
    RateLimitExceeded,

    #[error("Failed to parse response: {0}")]
    ParseError(String),
}

impl YouTubeError {
    /// 再試行しても回復しないエラーか
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            YouTubeError::InvalidApiKey
                | YouTubeError::VideoNotFound
                | YouTubeError::LiveChatNotFound
                | YouTubeError::LiveChatDisabled
                | YouTubeError::QuotaExceeded
        )
    }
}
