//! バイナリフレームのエンコード/デコード
//!
//! ## Frame Wire Format
//! ```text
//! [type_tag: u8 (1 byte)][payload: variable]
//!   - 0x02 = Audio, 0x03 = Image
//!   - payload が空 = そのメディア種別の end-of-stream マーカー
//! ```
//!
//! テキストメッセージはトランスポート側のテキストフレームで運ばれるため、
//! ここではタグを持たない。

use alloc::vec::Vec;

use crate::error::FrameError;

/// タグ 1 バイト + ペイロードのバイト列を作る
///
/// ペイロード長に制約はない（空ならそれが end マーカー）。
pub fn encode(tag: u8, payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(MediaFrame::HEADER_LEN + payload.len());
    bytes.push(tag);
    bytes.extend_from_slice(payload);
    bytes
}

/// バイト列をタグとペイロードに分ける
///
/// # エラー
/// - `FrameError::Empty`: 長さ 0
pub fn decode(bytes: &[u8]) -> Result<(u8, &[u8]), FrameError> {
    match bytes.split_first() {
        Some((&tag, payload)) => Ok((tag, payload)),
        None => Err(FrameError::Empty),
    }
}

/// メディア種別
///
/// タグ値はプロトコルの固定値。種別を増やすときは `from_tag` と
/// `mime_type` の match がコンパイルエラーで知らせてくれる。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum MediaKind {
    /// 音声（WEBM）
    Audio = 0x02,
    /// 画像（JPEG）
    Image = 0x03,
}

impl MediaKind {
    /// すべてのメディア種別
    pub const ALL: [MediaKind; 2] = [MediaKind::Audio, MediaKind::Image];

    /// Wire 上のタイプタグ
    pub const fn tag(self) -> u8 {
        self as u8
    }

    /// タイプタグからメディア種別を判定する（未知のタグは `None`）
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x02 => Some(MediaKind::Audio),
            0x03 => Some(MediaKind::Image),
            _ => None,
        }
    }

    /// 再組み立て後のオブジェクトに付ける MIME タイプ
    pub const fn mime_type(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio/webm",
            MediaKind::Image => "image/jpeg",
        }
    }

    /// ログ・統計用の短い名前
    pub const fn name(self) -> &'static str {
        match self {
            MediaKind::Audio => "audio",
            MediaKind::Image => "image",
        }
    }
}

impl core::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// 型付きのメディアフレーム（チャンクまたは end マーカー）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaFrame {
    /// メディア種別
    pub kind: MediaKind,
    /// チャンクのペイロード（空なら end マーカー）
    pub payload: Vec<u8>,
}

impl MediaFrame {
    /// フレームヘッダー長（type_tag: 1）
    pub const HEADER_LEN: usize = 1;

    /// データチャンクのフレームを作る
    pub fn chunk(kind: MediaKind, payload: Vec<u8>) -> Self {
        MediaFrame { kind, payload }
    }

    /// end-of-stream マーカーを作る
    pub fn end_marker(kind: MediaKind) -> Self {
        MediaFrame {
            kind,
            payload: Vec::new(),
        }
    }

    /// end-of-stream マーカーかどうか
    pub fn is_end_marker(&self) -> bool {
        self.payload.is_empty()
    }

    /// 受信したバイナリメッセージから復元する
    ///
    /// # エラー
    /// - `FrameError::Empty`: 長さ 0
    /// - `FrameError::UnknownTag`: Audio/Image 以外のタグ
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, FrameError> {
        let (tag, payload) = decode(bytes)?;
        let kind = MediaKind::from_tag(tag).ok_or(FrameError::UnknownTag(tag))?;
        Ok(MediaFrame {
            kind,
            payload: payload.to_vec(),
        })
    }

    /// Wire Format に変換する
    pub fn to_bytes(&self) -> Vec<u8> {
        encode(self.kind.tag(), &self.payload)
    }
}
