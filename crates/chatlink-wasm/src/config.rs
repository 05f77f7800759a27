//! クライアント設定
//!
//! `ChatClient` のコンストラクタに JSON 文字列で渡す。省略したキーはデフォルト値。
//!
//! ```json
//! {
//!   "url": "wss://api.htl-horcher.at",
//!   "access": "negotiated",
//!   "reconnect_delay_ms": 2000,
//!   "chunk_size": 1024,
//!   "max_media_bytes": null
//! }
//! ```

use chatlink_session::SessionConfig;
use serde::{Deserialize, Serialize};

/// 接続先のデフォルト URL
pub const DEFAULT_URL: &str = "wss://api.htl-horcher.at";

/// クライアント設定（接続先 URL + セッション設定）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// WebSocket の接続先
    pub url: String,
    /// セッション設定（同じ階層のキーとして書く）
    #[serde(flatten)]
    pub session: SessionConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            url: String::from(DEFAULT_URL),
            session: SessionConfig::default(),
        }
    }
}

impl ClientConfig {
    /// JSON 文字列から読み込む
    ///
    /// `None` や空文字列ならデフォルト設定。
    pub fn from_json(json: Option<&str>) -> Result<Self, serde_json::Error> {
        match json.map(str::trim) {
            None | Some("") => Ok(ClientConfig::default()),
            Some(json) => serde_json::from_str(json),
        }
    }
}
