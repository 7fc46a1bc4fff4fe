//! スパチャ情報の抽出
//!
//! `superChatDetails.amountMicros` を優先し、取得できない場合は
//! 表示用文字列（例: "¥1,000", "€5,00"）から金額を推定する。

use serde_json::Value;

use super::types::{MessageSnippet, SuperChatDetails};
use crate::admission::SuperchatInfo;

/// スパチャイベントの type
const SUPER_CHAT_EVENT: &str = "superChatEvent";

/// マイクロ単位から通常単位に変換
pub fn micros_to_amount(micros: u64) -> f64 {
    micros as f64 / 1_000_000.0
}

/// `amountMicros` は文字列・数値のどちらでも返るため両方を受け付ける
fn micros_value(value: &Value) -> Option<u64> {
    match value {
        Value::String(s) => s.trim().parse().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
}

/// 金額表示文字列からマイクロ単位の金額を推定
/// 例: "¥1,000" → 1_000_000_000
///
/// ## エッジケース
/// - 空文字列や通貨記号のみの場合は None
/// - 複数の通貨記号（例: "A$100.00"）も正しく処理される
/// - 欧州形式（"1.000,50"）はカンマを小数点として扱う
pub fn parse_amount_micros(amount_str: &str) -> Option<u64> {
    // 数字とピリオド、カンマのみを抽出
    let digits: String = amount_str
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == ',')
        .collect();

    // 欧州形式の判定: カンマの後に1-2桁の数字で終わる
    let has_comma_decimal = match digits.rfind(',') {
        Some(comma_pos) => {
            let after_comma = &digits[comma_pos + 1..];
            !after_comma.is_empty()
                && after_comma.len() <= 2
                && after_comma.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    };

    let cleaned = if has_comma_decimal {
        digits.replace('.', "").replace(',', ".")
    } else {
        digits.replace(',', "")
    };

    match cleaned.parse::<f64>() {
        Ok(amount) => Some((amount * 1_000_000.0).round() as u64),
        Err(_) => {
            log::warn!(
                "Failed to parse superchat amount: '{}' (cleaned: '{}')",
                amount_str,
                cleaned
            );
            None
        }
    }
}

fn amount_from_details(details: &SuperChatDetails) -> Option<f64> {
    details
        .amount_micros
        .as_ref()
        .and_then(micros_value)
        .or_else(|| {
            details
                .amount_display_string
                .as_deref()
                .and_then(parse_amount_micros)
        })
        .map(micros_to_amount)
}

/// メッセージのスパチャ情報を取得
///
/// スパチャ以外は `SuperchatInfo::none()`。金額が読めないスパチャは
/// 金額0として扱い、換算で最低額を下回るようにする。
pub fn superchat_info(snippet: &MessageSnippet) -> SuperchatInfo {
    if snippet.message_type != SUPER_CHAT_EVENT {
        return SuperchatInfo::none();
    }

    let Some(details) = snippet.super_chat_details.as_ref() else {
        log::warn!("superChatEvent without superChatDetails");
        return SuperchatInfo::paid(0.0, "USD");
    };

    let amount = amount_from_details(details).unwrap_or(0.0);
    let currency = details
        .currency
        .clone()
        .unwrap_or_else(|| "USD".to_string());
    SuperchatInfo::paid(amount, currency)
}

/// コマンドとして解釈する本文
///
/// スパチャはユーザーコメントを優先する。
pub fn message_text(snippet: &MessageSnippet) -> &str {
    snippet
        .super_chat_details
        .as_ref()
        .and_then(|d| d.user_comment.as_deref())
        .unwrap_or(&snippet.display_message)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snippet(json: &str) -> MessageSnippet {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_amount_micros() {
        // 日本円
        assert_eq!(parse_amount_micros("¥1,000"), Some(1_000_000_000));
        assert_eq!(parse_amount_micros("¥100"), Some(100_000_000));

        // ドル
        assert_eq!(parse_amount_micros("$5.00"), Some(5_000_000));
        assert_eq!(parse_amount_micros("A$100.00"), Some(100_000_000));

        // ユーロ（欧州形式）
        assert_eq!(parse_amount_micros("€5,00"), Some(5_000_000));
        assert_eq!(parse_amount_micros("1.000,50 €"), Some(1_000_500_000));

        assert_eq!(parse_amount_micros("$"), None);
    }

    #[test]
    fn test_superchat_with_amount_micros() {
        let s = snippet(
            r#"{
                "type": "superChatEvent",
                "publishedAt": "2025-01-01T00:00:00Z",
                "displayMessage": "$10.00 from Alice: !queue abc",
                "superChatDetails": {
                    "amountMicros": "10000000",
                    "currency": "USD",
                    "amountDisplayString": "$10.00",
                    "userComment": "!queue abc"
                }
            }"#,
        );

        let info = superchat_info(&s);
        assert!(info.is_superchat);
        assert_eq!(info.raw_amount, 10.0);
        assert_eq!(info.currency_code, "USD");
        assert_eq!(info.value_usd, None);
        assert_eq!(message_text(&s), "!queue abc");
    }

    #[test]
    fn test_superchat_falls_back_to_display_string() {
        let s = snippet(
            r#"{
                "type": "superChatEvent",
                "publishedAt": "2025-01-01T00:00:00Z",
                "superChatDetails": {
                    "currency": "JPY",
                    "amountDisplayString": "¥1,500"
                }
            }"#,
        );

        let info = superchat_info(&s);
        assert_eq!(info.raw_amount, 1500.0);
        assert_eq!(info.currency_code, "JPY");
    }

    #[test]
    fn test_text_message_is_not_superchat() {
        let s = snippet(
            r#"{
                "type": "textMessageEvent",
                "publishedAt": "2025-01-01T00:00:00Z",
                "displayMessage": "!queue abc"
            }"#,
        );

        assert_eq!(superchat_info(&s), SuperchatInfo::none());
        assert_eq!(message_text(&s), "!queue abc");
    }
}
