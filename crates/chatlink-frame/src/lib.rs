//! # chatlink-frame
//!
//! 1 本の WebSocket 上でテキストとバイナリメディアを多重化するためのフレーム層。
//!
//! バイナリフレームのエンコード/デコードと、メディア種別ごとのチャンク再組み立てを担当する。
//!
//! ## Binary Frame の Wire Format
//!
//! ```text
//! [type_tag: u8][payload...]
//!
//! type_tag:
//!   0x02 = Audio
//!   0x03 = Image
//! payload:
//!   非空 = チャンク
//!   空   = end-of-stream マーカー（その種別の 1 オブジェクト分の終わり）
//! ```
//!
//! ## 受信側の流れ
//!
//! ```text
//! WebSocket binary message → MediaFrame::from_bytes → MediaAssembly
//!   → end マーカーで MediaObject（image/jpeg or audio/webm）
//! ```

#![no_std]
extern crate alloc;

pub mod error;
pub mod frame;
pub mod reassembly;

pub use error::FrameError;
pub use frame::{decode, encode, MediaFrame, MediaKind};
pub use reassembly::{ChunkAssembly, MediaAssembly, MediaObject, DEFAULT_MAX_MEDIA_BYTES};
