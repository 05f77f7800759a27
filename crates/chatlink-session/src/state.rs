//! セッションの状態

use serde::Serialize;

/// セッションのライフサイクル
///
/// ```text
/// Disconnected → Connecting → (AwaitingAuthorization) → Active → Disconnected
/// ```
///
/// `AwaitingAuthorization` は接続先ピアを選ぶ方式でだけ通る。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// 接続なし
    #[default]
    Disconnected,
    /// トランスポートを開いている最中
    Connecting,
    /// ハンドシェイク送信済み、許可待ち
    AwaitingAuthorization,
    /// データ送受信可能
    Active,
}

impl SessionState {
    /// 状態名
    pub const fn as_str(self) -> &'static str {
        match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::AwaitingAuthorization => "awaiting_authorization",
            SessionState::Active => "active",
        }
    }
}

impl core::fmt::Display for SessionState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
