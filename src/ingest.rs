//! チャットコマンドの処理ループ
//!
//! 1回の取得で得たメッセージは順番に処理する。動画の解決（enqueue）も
//! 待ってから次のメッセージに進むため、遅い解決は後続を遅らせるが、
//! 受付順とキュー順が一致する。

use std::sync::Arc;
use std::time::Instant;

use crate::admission::{apply_effects, evaluate, AdmissionRequest, Rejection, Verdict};
use crate::command::{parse, ParseOutcome};
use crate::config::chat_poll_tick;
use crate::currency::CurrencyConverter;
use crate::moderation::ModerationStore;
use crate::playback::{QueueController, QueueEntry};
use crate::ratelimit::RateLimiter;
use crate::settings::SettingsHandle;
use crate::shutdown::Shutdown;
use crate::youtube::{ChatEvent, ChatSource, ExponentialBackoff};

/// 1メッセージの処理結果
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// コマンドではない
    Ignored,
    Rejected(Rejection),
    Accepted(QueueEntry),
    /// 受付後に動画を解決できなかった
    Dropped,
}

/// コマンドの解釈から判定、キュー追加までを行う
pub struct CommandProcessor {
    settings: SettingsHandle,
    moderation: Arc<ModerationStore>,
    limiter: RateLimiter,
    converter: Arc<dyn CurrencyConverter>,
    controller: Arc<QueueController>,
}

impl CommandProcessor {
    pub fn new(
        settings: SettingsHandle,
        moderation: Arc<ModerationStore>,
        converter: Arc<dyn CurrencyConverter>,
        controller: Arc<QueueController>,
    ) -> Self {
        Self {
            settings,
            moderation,
            limiter: RateLimiter::new(),
            converter,
            controller,
        }
    }

    pub async fn handle(&self, event: &ChatEvent) -> Outcome {
        self.handle_at(event, Instant::now()).await
    }

    /// 指定時刻に届いたものとして処理
    pub async fn handle_at(&self, event: &ChatEvent, now: Instant) -> Outcome {
        let config = self.settings.snapshot();
        let requester = &event.requester;

        let video_id = match parse(&event.text, &config) {
            ParseOutcome::Ignored => return Outcome::Ignored,
            ParseOutcome::Rejected(rejection) => {
                log::info!(
                    "Rejected request from {} ({}): {}",
                    requester.display_name,
                    requester.identity(),
                    rejection
                );
                return Outcome::Rejected(rejection);
            }
            ParseOutcome::Request(video_id) => video_id,
        };

        // スパチャ必須のときだけ換算する（失敗時は None のまま拒否される）
        let mut superchat = event.superchat.clone();
        if config.require_superchat && superchat.is_superchat {
            match self
                .converter
                .to_usd(superchat.raw_amount, &superchat.currency_code)
                .await
            {
                Ok(value) => superchat.value_usd = Some(value),
                Err(e) => log::warn!(
                    "Failed to convert {} {} to USD: {}",
                    superchat.raw_amount,
                    superchat.currency_code,
                    e
                ),
            }
        }

        let request = AdmissionRequest {
            video_id: &video_id,
            requester,
            superchat: &superchat,
            now,
        };
        let last_accepted = self.limiter.last_accepted(requester.identity());
        let decision = {
            let lists = self.moderation.read();
            evaluate(&config, &lists, last_accepted, &request)
        };

        apply_effects(&decision.effects, &self.moderation, &self.limiter).await;

        if let Verdict::Reject(rejection) = decision.verdict {
            log::info!(
                "Rejected request for {} from {} ({}): {}",
                video_id,
                requester.display_name,
                requester.identity(),
                rejection
            );
            return Outcome::Rejected(rejection);
        }

        match self.controller.enqueue(&video_id, requester).await {
            Ok(entry) => Outcome::Accepted(entry),
            Err(e) => {
                log::warn!(
                    "Dropped request for {} from {}: {}",
                    video_id,
                    requester.display_name,
                    e
                );
                Outcome::Dropped
            }
        }
    }
}

/// チャットを取得し続け、コマンドを処理する
///
/// 致命的なエラー（クォータ超過・APIキー無効・配信終了）か
/// 再試行上限に達した場合に終了する。
pub async fn run_ingestion(
    mut source: Box<dyn ChatSource>,
    processor: Arc<CommandProcessor>,
    mut shutdown: Shutdown,
) {
    let mut backoff = ExponentialBackoff::with_jitter();
    log::info!("Chat ingestion started");

    while !shutdown.is_triggered() {
        let delay = match source.poll().await {
            Ok(events) => {
                backoff.reset();
                for event in &events {
                    if shutdown.is_triggered() {
                        break;
                    }
                    processor.handle(event).await;
                }
                source.min_interval().max(chat_poll_tick())
            }
            Err(e) if e.is_fatal() => {
                log::error!("Chat ingestion stopped: {}", e);
                break;
            }
            Err(e) => {
                let delay = backoff.next_delay();
                if !backoff.should_retry() {
                    log::error!("Max retry attempts exceeded for chat polling: {}", e);
                    break;
                }
                log::warn!("Chat polling error, retrying in {:?}: {}", delay, e);
                delay
            }
        };

        if !shutdown.sleep(delay).await {
            break;
        }
    }

    log::info!("Chat ingestion ended");
}
