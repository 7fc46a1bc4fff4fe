use std::time::Duration;

/// 最低ポーリング間隔（ミリ秒）
const MIN_POLLING_INTERVAL_MILLIS: u64 = 5000;

/// 1日あたりのクォータ（デフォルト10,000 units）
const DAILY_QUOTA: i64 = 10_000;

/// liveChatMessages.list 1回あたりのクォータコスト
const POLL_QUOTA_COST: u64 = 5;

/// ポーリング状態
#[derive(Debug, Clone)]
pub struct PollingState {
    /// 次回リクエスト用のページトークン
    pub next_page_token: Option<String>,
    /// 推奨ポーリング間隔（ミリ秒）
    pub polling_interval_millis: u64,
    pub live_chat_id: String,
    /// 累積クォータ消費量（推定）
    pub quota_used: u64,
    pub poll_count: u64,
}

impl PollingState {
    pub fn new(live_chat_id: String) -> Self {
        Self {
            next_page_token: None,
            polling_interval_millis: MIN_POLLING_INTERVAL_MILLIS,
            live_chat_id,
            quota_used: 0,
            poll_count: 0,
        }
    }

    /// ポーリング間隔（最低5秒を保証）
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_millis.max(MIN_POLLING_INTERVAL_MILLIS))
    }

    /// API レスポンス受信後に呼び出す
    pub fn update(&mut self, next_page_token: Option<String>, polling_interval_millis: u64) {
        self.next_page_token = next_page_token;
        self.polling_interval_millis = polling_interval_millis.max(MIN_POLLING_INTERVAL_MILLIS);
        self.poll_count += 1;
        self.quota_used += POLL_QUOTA_COST;

        if self.poll_count % 100 == 0 {
            log::info!(
                "Chat polling: {} polls, ~{} quota units remaining",
                self.poll_count,
                self.estimated_remaining_quota()
            );
        }
    }

    /// ページトークンをリセット（エラー時など）
    pub fn reset_page_token(&mut self) {
        self.next_page_token = None;
    }

    pub fn estimated_remaining_quota(&self) -> i64 {
        DAILY_QUOTA - self.quota_used as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_polling_interval_minimum() {
        let mut state = PollingState::new("chat".to_string());
        state.update(Some("next".to_string()), 1000);
        assert_eq!(state.polling_interval(), Duration::from_secs(5));

        state.update(None, 8000);
        assert_eq!(state.polling_interval(), Duration::from_secs(8));
    }

    #[test]
    fn test_quota_tracking() {
        let mut state = PollingState::new("chat".to_string());
        state.update(Some("a".to_string()), 5000);
        state.update(Some("b".to_string()), 5000);

        assert_eq!(state.poll_count, 2);
        assert_eq!(state.quota_used, 10);
        assert_eq!(state.estimated_remaining_quota(), 9_990);

        state.reset_page_token();
        assert!(state.next_page_token.is_none());
    }
}
