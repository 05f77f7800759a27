//! # chatlink-session
//!
//! リモートピアとの論理的な会話（セッション）を管理する状態機械。
//!
//! ## 役割
//!
//! - **接続確立**: `open()` の多重呼び出しを防ぎ、トランスポートごとに新しい `ConnectionId` を振る
//! - **アクセス交渉**: `WEB_CONNECT[:<peerId>]` を送り、`CONNECTION_ACCEPTED` / `CONNECTION_REJECTED` を待つ
//! - **受信の振り分け**: テキストは UI へ、バイナリは `MediaFrame` → `MediaAssembly` へ
//! - **送信**: テキストは即時、メディアは `OutboundQueue` で分割・間隔調整
//! - **再接続**: 一時的な切断は `ReconnectSupervisor` が固定間隔で再試行、拒否はピア選択へリダイレクト
//!
//! ## セッションの状態遷移
//!
//! ```text
//! Disconnected --open()--> Connecting
//! Connecting --transport open--> Active                  (Open)
//!                            --> AwaitingAuthorization   (Negotiated)
//! AwaitingAuthorization --CONNECTION_ACCEPTED--> Active
//! AwaitingAuthorization --CONNECTION_REJECTED--> Disconnected (+ redirect)
//! any --transport close/error--> Disconnected (+ reconnect or redirect)
//! ```
//!
//! ## 時刻
//!
//! 時刻はすべて呼び出し側から `now_ms`（JS の `Date.now()`）で注入する。
//! タイマーは期限として保持し、`tick(now_ms)` で発火させる。

#![no_std]
extern crate alloc;

pub mod config;
pub mod control;
pub mod error;
pub mod port;
pub mod session;
pub mod state;
pub mod supervisor;

pub use config::{AccessMode, SessionConfig};
pub use control::ControlMessage;
pub use error::{SendError, TransportError};
pub use port::{Collaborator, ConnectionId, Transport};
pub use session::{Session, SessionStats};
pub use state::SessionState;
pub use supervisor::ReconnectSupervisor;

pub use chatlink_frame::{MediaKind, MediaObject};
pub use chatlink_stream::{StreamId, StreamReport};

/// 一時的な切断から再接続までの待ち時間（ミリ秒）
pub const RECONNECT_DELAY_MS: u64 = 2000;

/// 拒否・切断からピア選択画面へ戻すまでの待ち時間（ミリ秒）
pub const REDIRECT_DELAY_MS: u64 = 2000;
