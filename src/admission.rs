//! リクエスト受付判定
//!
//! 判定は副作用のない関数 `evaluate` で行い、結果に必要な副作用（自動BAN、受付時刻の記録）を
//! `SideEffect` として含める。副作用の適用は呼び出し側が `apply_effects` で行う。
//!
//! 判定順（最初に失敗したものが理由になる）:
//! レート制限 → BAN動画 → BANユーザー → ユーザーホワイトリスト → 動画ホワイトリスト
//! → メンバーシップ → スパチャ

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

use crate::moderation::{ModerationList, ModerationLists, ModerationStore};
use crate::ratelimit::{cooldown_remaining, RateLimiter};
use crate::settings::RuntimeConfig;

/// リクエストしたユーザー
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Requester {
    pub display_name: String,
    /// チャンネルID（取得できない場合は `None`）
    pub channel_id: Option<String>,
    pub is_member: bool,
}

impl Requester {
    /// レート制限・BAN・ホワイトリストで共通に使う識別子
    ///
    /// チャンネルIDがあればそれを、なければ表示名を使う。
    pub fn identity(&self) -> &str {
        match self.channel_id.as_deref() {
            Some(id) if !id.is_empty() => id,
            _ => &self.display_name,
        }
    }
}

/// スパチャ情報
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SuperchatInfo {
    pub is_superchat: bool,
    /// 元の通貨での金額
    pub raw_amount: f64,
    /// ISO 4217 通貨コード
    pub currency_code: String,
    /// USD換算額（スパチャでない、または換算失敗時は `None`）
    pub value_usd: Option<f64>,
}

impl SuperchatInfo {
    /// 通常メッセージ
    pub fn none() -> Self {
        Self::default()
    }

    /// 換算前のスパチャ
    pub fn paid(raw_amount: f64, currency_code: impl Into<String>) -> Self {
        Self {
            is_superchat: true,
            raw_amount,
            currency_code: currency_code.into(),
            value_usd: None,
        }
    }
}

/// 判定対象のリクエスト
#[derive(Debug, Clone)]
pub struct AdmissionRequest<'a> {
    pub video_id: &'a str,
    pub requester: &'a Requester,
    pub superchat: &'a SuperchatInfo,
    pub now: Instant,
}

/// 受付拒否の理由
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    UrlNotAllowed,
    EmptyArgument,
    RateLimited { remaining: Duration },
    BannedVideo,
    BannedUser,
    UserNotWhitelisted,
    VideoNotWhitelisted,
    NotMember,
    SuperchatRequired,
    ConversionFailed,
    SuperchatTooLow { value_usd: f64, minimum: f64 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::UrlNotAllowed => write!(f, "URL requests are disabled"),
            Rejection::EmptyArgument => write!(f, "no video id given"),
            Rejection::RateLimited { remaining } => {
                write!(f, "rate limited for another {}s", remaining.as_secs())
            }
            Rejection::BannedVideo => write!(f, "video is banned"),
            Rejection::BannedUser => write!(f, "user is banned"),
            Rejection::UserNotWhitelisted => write!(f, "user is not whitelisted"),
            Rejection::VideoNotWhitelisted => write!(f, "video is not whitelisted"),
            Rejection::NotMember => write!(f, "user is not a member"),
            Rejection::SuperchatRequired => write!(f, "message is not a superchat"),
            Rejection::ConversionFailed => write!(f, "superchat value could not be converted"),
            Rejection::SuperchatTooLow { value_usd, minimum } => {
                write!(f, "superchat of {:.2} USD is below {:.2} USD", value_usd, minimum)
            }
        }
    }
}

/// 判定後に適用する副作用
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    /// リクエストしたユーザーをBANリストに追加
    BanUser { id: String, display_name: String },
    /// 受付時刻を記録
    RecordAcceptance { requester_id: String, at: Instant },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Accept,
    Reject(Rejection),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub verdict: Verdict,
    pub effects: Vec<SideEffect>,
}

impl Decision {
    fn reject(rejection: Rejection) -> Self {
        Self {
            verdict: Verdict::Reject(rejection),
            effects: Vec::new(),
        }
    }

    pub fn is_accepted(&self) -> bool {
        matches!(self.verdict, Verdict::Accept)
    }
}

/// リクエストを判定
pub fn evaluate(
    config: &RuntimeConfig,
    lists: &ModerationLists,
    last_accepted: Option<Instant>,
    request: &AdmissionRequest<'_>,
) -> Decision {
    let identity = request.requester.identity();
    let video_id = request.video_id;

    let cooldown = Duration::from_secs(config.rate_limit_seconds);
    if let Some(remaining) = cooldown_remaining(last_accepted, request.now, cooldown) {
        return Decision::reject(Rejection::RateLimited { remaining });
    }

    if lists.contains(ModerationList::BannedVideos, video_id) {
        let mut decision = Decision::reject(Rejection::BannedVideo);
        if config.auto_ban_on_banned_request {
            decision.effects.push(SideEffect::BanUser {
                id: identity.to_string(),
                display_name: request.requester.display_name.clone(),
            });
        }
        return decision;
    }

    if lists.contains(ModerationList::BannedUsers, identity) {
        return Decision::reject(Rejection::BannedUser);
    }

    if config.enforce_user_whitelist && !lists.contains(ModerationList::WhitelistedUsers, identity)
    {
        return Decision::reject(Rejection::UserNotWhitelisted);
    }

    if config.enforce_video_whitelist
        && !lists.contains(ModerationList::WhitelistedVideos, video_id)
    {
        return Decision::reject(Rejection::VideoNotWhitelisted);
    }

    if config.require_membership && !request.requester.is_member {
        return Decision::reject(Rejection::NotMember);
    }

    if config.require_superchat {
        if !request.superchat.is_superchat {
            return Decision::reject(Rejection::SuperchatRequired);
        }
        match request.superchat.value_usd {
            None => return Decision::reject(Rejection::ConversionFailed),
            Some(value_usd) if value_usd < config.minimum_superchat_usd => {
                return Decision::reject(Rejection::SuperchatTooLow {
                    value_usd,
                    minimum: config.minimum_superchat_usd,
                });
            }
            Some(_) => {}
        }
    }

    Decision {
        verdict: Verdict::Accept,
        effects: vec![SideEffect::RecordAcceptance {
            requester_id: identity.to_string(),
            at: request.now,
        }],
    }
}

/// 判定結果の副作用を適用
pub async fn apply_effects(
    effects: &[SideEffect],
    moderation: &ModerationStore,
    limiter: &RateLimiter,
) {
    for effect in effects {
        match effect {
            SideEffect::BanUser { id, display_name } => {
                if moderation
                    .add(ModerationList::BannedUsers, id, display_name)
                    .await
                {
                    log::info!("Auto-banned {} ({}) for requesting a banned video", display_name, id);
                }
            }
            SideEffect::RecordAcceptance { requester_id, at } => {
                limiter.record(requester_id, *at);
            }
        }
    }
}
