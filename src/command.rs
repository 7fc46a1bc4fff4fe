//! チャットコマンドの解析
//!
//! `!queue <動画ID>` 形式のメッセージから引数を取り出す。
//! トークン数がちょうど2でないメッセージは無視する。

use crate::admission::Rejection;
use crate::settings::RuntimeConfig;

/// フルURL判定に使う文字列
pub const FULL_URL_MARKER: &str = "watch?v=";

/// 解析結果
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// コマンドではない
    Ignored,
    /// 動画ID（URLの場合は書き換え済み）
    Request(String),
    /// コマンドだが受け付けられない
    Rejected(Rejection),
}

/// メッセージを解析
pub fn parse(text: &str, config: &RuntimeConfig) -> ParseOutcome {
    let mut tokens = text.split_whitespace();
    let (Some(command), Some(argument), None) = (tokens.next(), tokens.next(), tokens.next())
    else {
        return ParseOutcome::Ignored;
    };

    if command != config.command_token() {
        return ParseOutcome::Ignored;
    }

    let video_id = match argument.split_once(FULL_URL_MARKER) {
        Some((_, rest)) if config.allow_full_urls => rest,
        Some(_) => return ParseOutcome::Rejected(Rejection::UrlNotAllowed),
        None => argument,
    };

    if video_id.is_empty() {
        return ParseOutcome::Rejected(Rejection::EmptyArgument);
    }

    ParseOutcome::Request(video_id.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RuntimeConfig {
        RuntimeConfig::default()
    }

    #[test]
    fn test_plain_video_id() {
        assert_eq!(
            parse("!queue dQw4w9WgXcQ", &config()),
            ParseOutcome::Request("dQw4w9WgXcQ".to_string())
        );
    }

    #[test]
    fn test_extra_whitespace_is_tolerated() {
        assert_eq!(
            parse("  !queue   abc123  ", &config()),
            ParseOutcome::Request("abc123".to_string())
        );
    }

    #[test]
    fn test_wrong_arity_is_ignored() {
        assert_eq!(parse("!queue", &config()), ParseOutcome::Ignored);
        assert_eq!(parse("!queue abc please", &config()), ParseOutcome::Ignored);
        assert_eq!(parse("", &config()), ParseOutcome::Ignored);
    }

    #[test]
    fn test_other_command_is_ignored() {
        assert_eq!(parse("!skip abc", &config()), ParseOutcome::Ignored);
        // 前方一致では反応しない
        assert_eq!(parse("!queuex abc", &config()), ParseOutcome::Ignored);
        assert_eq!(parse("hello there", &config()), ParseOutcome::Ignored);
    }

    #[test]
    fn test_custom_prefix_and_command() {
        let config = RuntimeConfig {
            prefix: "?".to_string(),
            command_name: "sr".to_string(),
            ..RuntimeConfig::default()
        };
        assert_eq!(
            parse("?sr abc", &config),
            ParseOutcome::Request("abc".to_string())
        );
        assert_eq!(parse("!queue abc", &config), ParseOutcome::Ignored);
    }

    #[test]
    fn test_url_rejected_when_not_allowed() {
        assert_eq!(
            parse("!queue https://www.youtube.com/watch?v=abc123", &config()),
            ParseOutcome::Rejected(Rejection::UrlNotAllowed)
        );
    }

    #[test]
    fn test_url_rewritten_when_allowed() {
        let config = RuntimeConfig {
            allow_full_urls: true,
            ..RuntimeConfig::default()
        };
        assert_eq!(
            parse("!queue https://music.youtube.com/watch?v=abc123", &config),
            ParseOutcome::Request("abc123".to_string())
        );
    }

    #[test]
    fn test_url_without_id_is_empty() {
        let config = RuntimeConfig {
            allow_full_urls: true,
            ..RuntimeConfig::default()
        };
        assert_eq!(
            parse("!queue https://www.youtube.com/watch?v=", &config),
            ParseOutcome::Rejected(Rejection::EmptyArgument)
        );
    }
}
