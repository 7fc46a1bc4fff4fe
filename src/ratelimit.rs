//! リクエスト間隔の制限
//!
//! ユーザーごとに最後に受け付けたリクエストの時刻（単調時計）を保持する。
//! 判定（`cooldown_remaining`）は純粋関数で、記録（`record`）は受付確定後にだけ行う。
//! 同一ユーザーの並行判定では判定と記録の間に1件多く通る可能性があるが、
//! クールダウンの意味を変えないためにこの2段階のまま扱う。

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// クールダウンの残り時間を計算
///
/// 未記録のユーザーは制限なし。`cooldown` が0なら常に制限なし。
pub fn cooldown_remaining(
    last_accepted: Option<Instant>,
    now: Instant,
    cooldown: Duration,
) -> Option<Duration> {
    let last = last_accepted?;
    let elapsed = now.saturating_duration_since(last);
    if elapsed < cooldown {
        Some(cooldown - elapsed)
    } else {
        None
    }
}

/// ユーザーごとの最終受付時刻
#[derive(Debug, Default)]
pub struct RateLimiter {
    last_accepted: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 最後に受け付けた時刻を取得
    pub fn last_accepted(&self, requester_id: &str) -> Option<Instant> {
        match self.last_accepted.lock() {
            Ok(map) => map.get(requester_id).copied(),
            Err(poisoned) => poisoned.into_inner().get(requester_id).copied(),
        }
    }

    /// 受付を記録
    pub fn record(&self, requester_id: &str, at: Instant) {
        let mut map = match self.last_accepted.lock() {
            Ok(map) => map,
            Err(poisoned) => {
                log::error!("Rate limiter lock is poisoned, recovering");
                poisoned.into_inner()
            }
        };
        map.insert(requester_id.to_string(), at);
    }

    /// 記録済みユーザー数
    pub fn tracked_requesters(&self) -> usize {
        match self.last_accepted.lock() {
            Ok(map) => map.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}
