//! チャンクの再組み立て
//!
//! メディア種別ごとに 1 つのバッファを持ち、end マーカーが届いた時点で
//! 到着順にチャンクを連結して 1 つのオブジェクトにする。
//!
//! 順序保証・再送・整合性チェックは一切行わない。チャンク順 = 到着順 = 送信順は
//! トランスポート（WebSocket）が順序通り・確実に届けることに依存している。

use alloc::vec::Vec;

use crate::frame::{MediaFrame, MediaKind};

/// 再組み立てバッファのデフォルト上限（32 MiB）
pub const DEFAULT_MAX_MEDIA_BYTES: usize = 32 * 1024 * 1024;

/// 再組み立てが完了したメディアオブジェクト
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaObject {
    /// メディア種別
    pub kind: MediaKind,
    /// 連結済みのバイト列
    pub bytes: Vec<u8>,
}

impl MediaObject {
    /// メディア種別固有の MIME タイプ
    pub fn mime_type(&self) -> &'static str {
        self.kind.mime_type()
    }
}

/// 1 メディア種別分のチャンクを受け取り、オブジェクトに再組み立てするクラス
#[derive(Debug)]
pub struct ChunkAssembly {
    /// 担当するメディア種別
    kind: MediaKind,
    /// 到着順のチャンク
    chunks: Vec<Vec<u8>>,
    /// 現在バッファしているバイト数
    buffered: usize,
    /// バッファ上限（`None` なら無制限）
    limit: Option<usize>,
    /// 上限超過後、次の end マーカーまでチャンクを捨てている最中か
    overflowed: bool,
}

impl ChunkAssembly {
    /// デフォルト上限で生成する
    pub fn new(kind: MediaKind) -> Self {
        Self::with_limit(kind, Some(DEFAULT_MAX_MEDIA_BYTES))
    }

    /// バッファ上限を指定して生成する
    pub fn with_limit(kind: MediaKind, limit: Option<usize>) -> Self {
        ChunkAssembly {
            kind,
            chunks: Vec::new(),
            buffered: 0,
            limit,
            overflowed: false,
        }
    }

    /// チャンクのペイロードを追加する
    ///
    /// # 戻り値
    /// - `Some(MediaObject)`: end マーカーで 1 オブジェクト分が揃った
    /// - `None`: まだ途中、またはチャンクなしの end マーカー（重複・余分なマーカーはエラーではない）
    pub fn add_chunk(&mut self, payload: Vec<u8>) -> Option<MediaObject> {
        if payload.is_empty() {
            return self.finish();
        }

        if self.overflowed {
            log::trace!("Dropping {} chunk while overflowed", self.kind);
            return None;
        }

        if let Some(limit) = self.limit {
            if self.buffered + payload.len() > limit {
                log::warn!(
                    "{} buffer exceeded {} bytes, discarding until next end marker",
                    self.kind,
                    limit
                );
                self.clear();
                self.overflowed = true;
                return None;
            }
        }

        self.buffered += payload.len();
        self.chunks.push(payload);
        None
    }

    /// end マーカー受信時の処理
    fn finish(&mut self) -> Option<MediaObject> {
        if self.overflowed {
            self.overflowed = false;
            return None;
        }

        if self.chunks.is_empty() {
            log::debug!("Ignoring {} end marker with no pending chunks", self.kind);
            return None;
        }

        let mut bytes = Vec::with_capacity(self.buffered);
        for chunk in self.chunks.drain(..) {
            bytes.extend_from_slice(&chunk);
        }
        self.buffered = 0;

        Some(MediaObject {
            kind: self.kind,
            bytes,
        })
    }

    /// 組み立て途中のチャンクを破棄する
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.buffered = 0;
        self.overflowed = false;
    }

    /// 組み立て途中のチャンク数
    pub fn pending_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// 組み立て途中のバイト数
    pub fn pending_bytes(&self) -> usize {
        self.buffered
    }
}

/// 画像・音声それぞれの `ChunkAssembly` をまとめたもの
///
/// フレームのメディア種別で振り分ける。バッファは種別ごとに最大 1 つ。
#[derive(Debug)]
pub struct MediaAssembly {
    audio: ChunkAssembly,
    image: ChunkAssembly,
}

impl MediaAssembly {
    /// 種別ごとのバッファ上限を指定して生成する
    pub fn new(limit: Option<usize>) -> Self {
        MediaAssembly {
            audio: ChunkAssembly::with_limit(MediaKind::Audio, limit),
            image: ChunkAssembly::with_limit(MediaKind::Image, limit),
        }
    }

    /// フレームを該当する種別のバッファに渡す
    pub fn add_frame(&mut self, frame: MediaFrame) -> Option<MediaObject> {
        self.assembly_mut(frame.kind).add_chunk(frame.payload)
    }

    /// 種別ごとのバッファを参照する
    pub fn assembly(&self, kind: MediaKind) -> &ChunkAssembly {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Image => &self.image,
        }
    }

    fn assembly_mut(&mut self, kind: MediaKind) -> &mut ChunkAssembly {
        match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Image => &mut self.image,
        }
    }

    /// すべてのバッファを破棄する
    pub fn clear(&mut self) {
        for kind in MediaKind::ALL {
            let pending = self.assembly(kind);
            if pending.pending_chunks() > 0 {
                log::debug!(
                    "Discarding partial {}: {} chunk(s), {} bytes",
                    kind,
                    pending.pending_chunks(),
                    pending.pending_bytes()
                );
            }
            self.assembly_mut(kind).clear();
        }
    }
}

impl Default for MediaAssembly {
    fn default() -> Self {
        Self::new(Some(DEFAULT_MAX_MEDIA_BYTES))
    }
}
