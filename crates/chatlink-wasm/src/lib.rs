//! # chatlink-wasm
//!
//! wasm-bindgen エクスポート：ブラウザのチャットダッシュボードから呼び出す公開 API。
//!
//! ## 使用方法（TypeScript）
//!
//! ```typescript
//! import { ChatClient, ChatHistory, init_panic_hook, init_logger } from './pkg/chatlink_wasm';
//!
//! // パニック時のスタックトレースを有効化（開発時）
//! init_panic_hook();
//! init_logger("debug");
//!
//! // 接続先ピアを選ぶ方式
//! const client = new ChatClient(JSON.stringify({ access: "negotiated" }), {
//!     getSelectedPeer: () => localStorage.getItem('selectedDevice'),
//!     onRedirectRequired: () => { window.location.href = 'devices.html'; },
//!     onTextMessage: (text) => addAssistantMessage(text),
//!     onImageReady: (blob) => addAssistantImage(URL.createObjectURL(blob)),
//!     onStateChanged: (state) => setStatus(state),
//! });
//! client.connect();
//!
//! // 送信（未接続なら false）。メディアは end マーカーまで送り切れたら true
//! client.sendText("hello");
//! const sent = await client.sendImageBlob(file);
//!
//! // 履歴
//! const history = new ChatHistory(localStorage.getItem('conversations'), Date.now());
//! history.recordUserText("hello", Date.now());
//! history.recordUserImage(new Uint8Array(await file.arrayBuffer()), file.type, Date.now());
//! localStorage.setItem('conversations', history.toJson());
//! ```

use wasm_bindgen::prelude::*;

mod callbacks;
pub mod client;
pub mod config;
pub mod history;
mod logger;
mod socket;

pub use client::ChatClient;
pub use config::ClientConfig;
pub use history::{ChatHistory, Conversation, ConversationStore, HistoryEntry, Role};

/// パニック時にブラウザコンソールにスタックトレースを出力する
///
/// 開発時に必ず呼び出すこと。本番ビルドでは feature flag で無効化可能。
#[wasm_bindgen]
pub fn init_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// `log` の出力先をブラウザコンソールにする
///
/// # 引数
/// - `level`: `"error"` / `"warn"` / `"info"` / `"debug"` / `"trace"` / `"off"`。省略時は `"info"`
#[wasm_bindgen]
pub fn init_logger(level: Option<String>) {
    logger::install(logger::parse_level(level.as_deref()));
}
