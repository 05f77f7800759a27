//! chatlink-session エラー型

use alloc::string::String;

/// トランスポート（WebSocket）操作のエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// トランスポートが開いていない（対象の接続がない・既に閉じている）
    #[error("Transport is not open")]
    NotOpen,
    /// トランスポートの生成に失敗（URL 不正など）
    #[error("Failed to create transport: {0}")]
    ConnectFailed(String),
    /// 送信に失敗
    #[error("Transport send failed: {0}")]
    SendFailed(String),
}

/// 送信 API のエラー
///
/// 公開 API (`send_text` / `send_media`) では `bool` に変換される。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SendError {
    /// セッションが Active（かつ認可済み）でない
    #[error("Not connected")]
    NotConnected,
    /// トランスポートが送信を受け付けなかった
    #[error(transparent)]
    Transport(#[from] TransportError),
}
