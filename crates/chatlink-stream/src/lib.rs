//! # chatlink-stream
//!
//! 送信側のメディアストリーミング層
//!
//! 画像・音声などの任意長バイト列を、WebSocket が扱いやすい小さなフレームに分けて流す。
//!
//! ## 送信の流れ
//!
//! ```text
//! 1. UI → session.send_media(kind, bytes)
//! 2. OutboundQueue.enqueue() → 種別ごとのレーンに積む
//! 3. tick ごとに OutboundQueue.poll_due() → MediaFrame を 1 つずつ
//! 4. MediaFrame.to_bytes() → WebSocket binary message
//! 5. 最後に同じタグの end マーカー（ペイロード空）
//! ```
//!
//! ## 制約
//!
//! 受信側はメディア種別ごとに再組み立てバッファを 1 つしか持たず、
//! Wire Format にストリーム ID もない。同じ種別のストリームはレーン内で直列化する。

#![no_std]
extern crate alloc;

pub mod outbound;

pub use outbound::{
    Dispatch, OutboundQueue, OutboundStream, PacingConfig, StreamId, StreamReport,
    DEFAULT_CHUNK_INTERVAL_MS, DEFAULT_CHUNK_SIZE,
};
