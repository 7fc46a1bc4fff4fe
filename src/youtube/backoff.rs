use rand::Rng;
use std::time::Duration;

/// 指数バックオフの最大試行回数
/// これを超えるとリトライを停止する
const MAX_ATTEMPTS: u32 = 10;

/// ジッタの最大割合（待機時間に対して）
const JITTER_RATIO: f64 = 0.2;

/// 指数バックオフを管理する構造体
/// エラー時のリトライ間隔を指数的に増加させる（1s→2s→4s→8s→16s...）
#[derive(Debug)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    current_attempt: u32,
    jitter: bool,
}

impl ExponentialBackoff {
    /// デフォルト設定（1秒〜60秒、10回まで）
    pub fn new() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: MAX_ATTEMPTS,
            current_attempt: 0,
            jitter: false,
        }
    }

    /// デフォルト設定にジッタ（最大+20%）を加える
    ///
    /// 複数クライアントの再試行タイミングを分散させる。
    pub fn with_jitter() -> Self {
        Self {
            jitter: true,
            ..Self::new()
        }
    }

    /// カスタム設定でExponentialBackoffインスタンスを作成
    pub fn with_config(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
            current_attempt: 0,
            jitter: false,
        }
    }

    /// 次のリトライまでの待機時間を計算して返す
    ///
    /// 計算式: base_delay * 2^current_attempt（max_delayで頭打ち）
    /// ジッタ有効時はさらに0〜20%を加算する
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.current_attempt);
        let delay = self
            .base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay);
        self.current_attempt += 1;

        if self.jitter {
            let extra = rand::thread_rng().gen_range(0.0..=JITTER_RATIO);
            delay + delay.mul_f64(extra)
        } else {
            delay
        }
    }

    /// バックオフカウンターをリセット（成功時に呼び出す）
    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }

    /// 現在の試行回数を取得
    pub fn attempt_count(&self) -> u32 {
        self.current_attempt
    }

    /// 最大試行回数に達したかどうかを確認
    pub fn has_exceeded_max_attempts(&self) -> bool {
        self.current_attempt >= self.max_attempts
    }

    /// リトライを続行すべきかどうかを確認
    pub fn should_retry(&self) -> bool {
        !self.has_exceeded_max_attempts()
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}
