// =============================================================================
// 表示名キャッシュ
// =============================================================================
// チャンネル名・動画タイトルを1時間キャッシュして外部リクエストを削減
// =============================================================================

use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::NameKind;

/// キャッシュのTTL（1時間）
const CACHE_TTL_SECS: u64 = 60 * 60;

/// 保持する最大件数
const CACHE_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
struct CacheEntry {
    name: String,
    created_at: Instant,
}

/// 表示名キャッシュ（LRU + TTL）
#[derive(Debug)]
pub struct NameCache {
    entries: Mutex<LruCache<(NameKind, String), CacheEntry>>,
    ttl: Duration,
}

impl NameCache {
    pub fn new() -> Self {
        Self::with_ttl(Duration::from_secs(CACHE_TTL_SECS))
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(CACHE_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// キャッシュから取得。期限切れのエントリは削除してNoneを返す
    pub fn get(&self, kind: NameKind, id: &str) -> Option<String> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let key = (kind, id.to_string());

        let expired = match entries.get(&key) {
            Some(entry) if entry.created_at.elapsed() < self.ttl => {
                log::debug!("Name cache hit: {}", id);
                return Some(entry.name.clone());
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            log::debug!("Name cache expired: {}", id);
            entries.pop(&key);
        }
        None
    }

    pub fn set(&self, kind: NameKind, id: &str, name: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.put(
            (kind, id.to_string()),
            CacheEntry {
                name: name.to_string(),
                created_at: Instant::now(),
            },
        );
    }
}

impl Default for NameCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get() {
        let cache = NameCache::new();
        cache.set(NameKind::Video, "abc", "Some Song");

        assert_eq!(cache.get(NameKind::Video, "abc").as_deref(), Some("Some Song"));
        // 種類が違えば別エントリ
        assert_eq!(cache.get(NameKind::Channel, "abc"), None);
    }

    #[test]
    fn test_expired_entry_is_dropped() {
        let cache = NameCache::with_ttl(Duration::ZERO);
        cache.set(NameKind::Channel, "UC1", "Alice");
        assert_eq!(cache.get(NameKind::Channel, "UC1"), None);
    }
}
