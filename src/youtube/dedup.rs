use std::collections::{HashSet, VecDeque};

/// 保持する既読IDの上限
pub const MAX_SEEN_IDS: usize = 10_000;

/// 処理済みメッセージIDの集合（上限を超えたら古い順に削除）
#[derive(Debug)]
pub struct SeenIds {
    ids: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl SeenIds {
    pub fn new() -> Self {
        Self::with_capacity(MAX_SEEN_IDS)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            ids: HashSet::new(),
            order: VecDeque::new(),
            capacity,
        }
    }

    /// 未処理なら記録して `true`
    pub fn insert(&mut self, id: &str) -> bool {
        if !self.ids.insert(id.to_string()) {
            return false;
        }
        self.order.push_back(id.to_string());

        // FIFO eviction
        while self.ids.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.ids.remove(&oldest);
                }
                None => break,
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }
}

impl Default for SeenIds {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicates_are_rejected() {
        let mut seen = SeenIds::new();
        assert!(seen.insert("a"));
        assert!(!seen.insert("a"));
        assert!(seen.insert("b"));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_oldest_evicted_first() {
        let mut seen = SeenIds::with_capacity(2);
        seen.insert("a");
        seen.insert("b");
        seen.insert("c");

        assert_eq!(seen.len(), 2);
        // "a" は削除済みなので再度受け付ける
        assert!(seen.insert("a"));
        assert!(!seen.insert("c"));
    }
}
