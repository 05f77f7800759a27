//! chatlink-frame エラー型

/// バイナリフレームのデコードエラー
///
/// 受信側ではどちらも「破棄してログに残す」扱いで、状態機械を止めることはない。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// 長さ 0 のバイナリメッセージ（タグすらない）
    #[error("Empty binary frame")]
    Empty,
    /// 未知のタイプタグ
    #[error("Unknown frame type tag: 0x{0:02x}")]
    UnknownTag(u8),
}
