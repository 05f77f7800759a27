//! テキストの制御メッセージ
//!
//! ```text
//! client → server:  "WEB_CONNECT" | "WEB_CONNECT:<peerId>"
//! server → client:  "CONNECTION_ACCEPTED:<peerId>"
//!                   "CONNECTION_REJECTED:<reason>"
//!                   "ERROR:<detail>"
//! ```
//!
//! それ以外のテキストはアシスタントのメッセージ本文としてそのまま UI に渡す。

use alloc::format;
use alloc::string::String;

/// ハンドシェイクのコマンド
pub const HANDSHAKE: &str = "WEB_CONNECT";

const ACCEPTED_PREFIX: &str = "CONNECTION_ACCEPTED:";
const REJECTED_PREFIX: &str = "CONNECTION_REJECTED:";
const ERROR_PREFIX: &str = "ERROR:";

/// トランスポートが開いた直後に送るハンドシェイクを作る
///
/// 接続先ピアを選ぶ方式では `"WEB_CONNECT:<peerId>"`、そうでなければ `"WEB_CONNECT"`。
pub fn handshake(peer: Option<&str>) -> String {
    match peer {
        Some(peer) => format!("{HANDSHAKE}:{peer}"),
        None => String::from(HANDSHAKE),
    }
}

/// サーバーからの制御メッセージ
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMessage<'a> {
    /// 接続許可（ピア ID）
    Accepted(&'a str),
    /// 接続拒否（理由）
    Rejected(&'a str),
    /// サーバー側のエラー（詳細）
    Error(&'a str),
}

impl<'a> ControlMessage<'a> {
    /// テキストメッセージを制御メッセージとして解釈する
    ///
    /// 制御メッセージでなければ `None`（アプリケーションのテキスト）。
    pub fn parse(text: &'a str) -> Option<Self> {
        if let Some(peer) = text.strip_prefix(ACCEPTED_PREFIX) {
            Some(ControlMessage::Accepted(peer))
        } else if let Some(reason) = text.strip_prefix(REJECTED_PREFIX) {
            Some(ControlMessage::Rejected(reason))
        } else {
            text.strip_prefix(ERROR_PREFIX).map(ControlMessage::Error)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_variants() {
        assert_eq!(handshake(None), "WEB_CONNECT");
        assert_eq!(handshake(Some("esp32-kitchen")), "WEB_CONNECT:esp32-kitchen");
    }

    #[test]
    fn test_parse_control_messages() {
        assert_eq!(
            ControlMessage::parse("CONNECTION_ACCEPTED:device-7"),
            Some(ControlMessage::Accepted("device-7"))
        );
        assert_eq!(
            ControlMessage::parse("CONNECTION_REJECTED:device_busy"),
            Some(ControlMessage::Rejected("device_busy"))
        );
        assert_eq!(
            ControlMessage::parse("ERROR:unknown device"),
            Some(ControlMessage::Error("unknown device"))
        );
    }

    #[test]
    fn test_plain_text_is_not_control() {
        assert_eq!(ControlMessage::parse("Hello! How can I help?"), None);
        // 区切りのコロンがなければ制御メッセージではない
        assert_eq!(ControlMessage::parse("CONNECTION_ACCEPTED"), None);
        assert_eq!(ControlMessage::parse(""), None);
    }

    #[test]
    fn test_reason_keeps_remaining_colons() {
        assert_eq!(
            ControlMessage::parse("CONNECTION_REJECTED:busy: try later"),
            Some(ControlMessage::Rejected("busy: try later"))
        );
    }
}
