//! セッション設定
//!
//! すべてのフィールドにデフォルトがあり、JSON の一部だけを指定できる。
//!
//! ```json
//! { "access": "negotiated", "reconnect_delay_ms": 2000, "chunk_size": 1024 }
//! ```

use serde::{Deserialize, Serialize};

use chatlink_frame::DEFAULT_MAX_MEDIA_BYTES;
use chatlink_stream::{PacingConfig, DEFAULT_CHUNK_INTERVAL_MS, DEFAULT_CHUNK_SIZE};

use crate::{RECONNECT_DELAY_MS, REDIRECT_DELAY_MS};

/// 接続方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// 接続先を選ばない。トランスポートが開いたらすぐ Active
    #[default]
    Open,
    /// 接続先ピアを指定し、サーバーの許可を待ってから Active
    Negotiated,
}

/// セッション設定
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// 接続方式
    pub access: AccessMode,
    /// 一時的な切断から再接続までの待ち時間（ミリ秒）
    pub reconnect_delay_ms: u64,
    /// 拒否・切断からピア選択画面へ戻すまでの待ち時間（ミリ秒）
    pub redirect_delay_ms: u64,
    /// 送信チャンクの最大バイト数
    pub chunk_size: usize,
    /// 同じ種別のフレームの送信間隔（ミリ秒）
    pub chunk_interval_ms: u64,
    /// 受信再組み立てバッファの上限（`null` で無制限）
    pub max_media_bytes: Option<usize>,
}

impl SessionConfig {
    /// 接続先ピアを選ぶ方式の設定
    pub fn negotiated() -> Self {
        SessionConfig {
            access: AccessMode::Negotiated,
            ..Self::default()
        }
    }

    /// 送信ストリームの分割・間隔設定
    pub fn pacing(&self) -> PacingConfig {
        PacingConfig::new(self.chunk_size, self.chunk_interval_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            access: AccessMode::Open,
            reconnect_delay_ms: RECONNECT_DELAY_MS,
            redirect_delay_ms: REDIRECT_DELAY_MS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_interval_ms: DEFAULT_CHUNK_INTERVAL_MS,
            max_media_bytes: Some(DEFAULT_MAX_MEDIA_BYTES),
        }
    }
}
