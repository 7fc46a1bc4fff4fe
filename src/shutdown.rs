//! プロセス全体の終了シグナル
//!
//! 各バックグラウンドループはループ先頭で `is_triggered()` を確認し、
//! 待機中は `wait()` と `tokio::select!` で競合させて即座に抜ける。

use std::time::Duration;
use tokio::sync::watch;

/// 終了シグナルの送信側
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// 終了シグナルの受信側（ループごとにクローンして使う）
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// 送信側と受信側のペアを作成
pub fn channel() -> (ShutdownTrigger, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownTrigger { tx }, Shutdown { rx })
}

impl ShutdownTrigger {
    /// 全ループに終了を通知
    pub fn trigger(&self) {
        // 受信側が全て破棄済みでも問題ない
        let _ = self.tx.send(true);
    }

    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
        }
    }
}

impl Shutdown {
    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// 終了が通知されるまで待機
    pub async fn wait(&mut self) {
        // 送信側が破棄された場合も終了扱い
        let _ = self.rx.wait_for(|triggered| *triggered).await;
    }

    /// 指定時間待機する。終了が通知されたら `false` を返す
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = tokio::time::sleep(duration) => !self.is_triggered(),
            _ = self.wait() => false,
        }
    }
}
