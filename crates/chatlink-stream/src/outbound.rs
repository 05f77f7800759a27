//! 送信側のメディアストリーム
//!
//! 任意長のバイト列を固定サイズのチャンクに分割し、フレーム化して
//! 一定間隔で送り出す。最後に同じタグの end マーカーを 1 つ送る。

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::fmt;

use chatlink_frame::{MediaFrame, MediaKind};

/// チャンクサイズのデフォルト（バイト）
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// チャンク送信間隔のデフォルト（ミリ秒）
pub const DEFAULT_CHUNK_INTERVAL_MS: u64 = 10;

/// 分割・送信間隔の設定
///
/// どちらもポリシー値で、Wire 互換性には影響しない。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingConfig {
    /// 1 チャンクの最大バイト数（1 以上）
    pub chunk_size: usize,
    /// 同じ種別のフレーム同士の送信間隔（ミリ秒）
    pub interval_ms: u64,
}

impl PacingConfig {
    /// チャンクサイズを 1 以上に補正して生成する
    pub fn new(chunk_size: usize, interval_ms: u64) -> Self {
        PacingConfig {
            chunk_size: chunk_size.max(1),
            interval_ms,
        }
    }
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self::new(DEFAULT_CHUNK_SIZE, DEFAULT_CHUNK_INTERVAL_MS)
    }
}

/// 送信ストリームの識別子
///
/// キューの中でだけ一意。Wire Format には載らない。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 1 本のストリームの結果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamReport {
    /// `enqueue` が返した識別子
    pub id: StreamId,
    /// メディア種別
    pub kind: MediaKind,
    /// 元のバイト列の長さ
    pub total_bytes: usize,
    /// トランスポートに渡したフレーム数（end マーカー込み）
    pub frames_sent: usize,
    /// end マーカーまで送り切れたか
    pub completed: bool,
}

/// 送信中のメディアストリーム 1 本分
///
/// `next_frame` を呼ぶたびにチャンクを 1 つずつ取り出し、
/// 最後に end マーカーを返してから `None` になる。
#[derive(Debug)]
pub struct OutboundStream {
    id: StreamId,
    kind: MediaKind,
    data: Vec<u8>,
    offset: usize,
    chunk_size: usize,
    end_sent: bool,
    frames_sent: usize,
}

impl OutboundStream {
    /// 新しいストリームを生成する
    pub fn new(id: StreamId, kind: MediaKind, data: Vec<u8>, chunk_size: usize) -> Self {
        OutboundStream {
            id,
            kind,
            data,
            offset: 0,
            chunk_size: chunk_size.max(1),
            end_sent: false,
            frames_sent: 0,
        }
    }

    /// 次に送るフレームを取り出す
    ///
    /// 空のバイト列なら end マーカー 1 つだけになる。
    pub fn next_frame(&mut self) -> Option<MediaFrame> {
        if self.offset < self.data.len() {
            let end = (self.offset + self.chunk_size).min(self.data.len());
            let chunk = self.data[self.offset..end].to_vec();
            self.offset = end;
            self.frames_sent += 1;
            return Some(MediaFrame::chunk(self.kind, chunk));
        }

        if !self.end_sent {
            self.end_sent = true;
            self.frames_sent += 1;
            return Some(MediaFrame::end_marker(self.kind));
        }

        None
    }

    /// end マーカーまで取り出し済みか
    pub fn is_finished(&self) -> bool {
        self.end_sent
    }

    /// このストリームが生成するフレームの総数（end マーカー込み）
    pub fn frame_count(&self) -> usize {
        self.data.len().div_ceil(self.chunk_size) + 1
    }

    /// 結果を作る
    pub fn report(&self, completed: bool) -> StreamReport {
        StreamReport {
            id: self.id,
            kind: self.kind,
            total_bytes: self.data.len(),
            frames_sent: self.frames_sent,
            completed,
        }
    }
}

/// 送信準備ができたフレーム
#[derive(Debug)]
pub struct Dispatch {
    /// 送信するフレーム
    pub frame: MediaFrame,
    /// このフレームでストリームが終わる場合の結果（end マーカーのとき）
    pub completes: Option<StreamReport>,
}

/// メディア種別ごとの送信レーン
///
/// 同じ種別のストリームは直列化される。受信側は種別ごとにバッファが 1 つしかなく、
/// ストリーム ID もないため、並行に流すとチャンクが混ざる。
#[derive(Debug, Default)]
struct Lane {
    streams: VecDeque<OutboundStream>,
    next_due_ms: u64,
}

/// 送信キュー
///
/// `send_media` で積まれたストリームを、`poll_due` のたびに
/// 間隔を守りながらフレーム単位で取り出す。
#[derive(Debug)]
pub struct OutboundQueue {
    config: PacingConfig,
    next_id: u64,
    audio: Lane,
    image: Lane,
}

impl OutboundQueue {
    /// 新しい送信キューを生成する
    pub fn new(config: PacingConfig) -> Self {
        OutboundQueue {
            config,
            next_id: 0,
            audio: Lane::default(),
            image: Lane::default(),
        }
    }

    /// ストリームを積む
    ///
    /// レーンが空いていれば最初のフレームは `now_ms` 時点で送信可能になる。
    /// 同じ種別のストリームが送信中なら、その後ろに並ぶ。
    ///
    /// # 戻り値
    /// このストリームの識別子。結果の `StreamReport::id` と一致する
    pub fn enqueue(&mut self, kind: MediaKind, data: Vec<u8>, now_ms: u64) -> StreamId {
        let id = StreamId(self.next_id);
        self.next_id = self.next_id.wrapping_add(1);

        let chunk_size = self.config.chunk_size;
        let lane = self.lane_mut(kind);
        let ahead = lane.streams.len();
        if ahead == 0 {
            lane.next_due_ms = lane.next_due_ms.max(now_ms);
        }
        let stream = OutboundStream::new(id, kind, data, chunk_size);
        log::debug!(
            "Queued {} stream {}: {} frames, {} ahead",
            kind,
            id,
            stream.frame_count(),
            ahead
        );
        lane.streams.push_back(stream);
        id
    }

    /// 送信時刻になったフレームを 1 つ取り出す
    ///
    /// 各レーンは 1 回の取り出しで 1 フレームだけ進み、次のフレームは
    /// `interval_ms` 後まで待つ。`None` になるまで繰り返し呼ぶ。
    pub fn poll_due(&mut self, now_ms: u64) -> Option<Dispatch> {
        let interval = self.config.interval_ms;
        for kind in MediaKind::ALL {
            let lane = self.lane_mut(kind);
            if lane.streams.is_empty() || lane.next_due_ms > now_ms {
                continue;
            }

            let Some(stream) = lane.streams.front_mut() else {
                continue;
            };
            let Some(frame) = stream.next_frame() else {
                lane.streams.pop_front();
                continue;
            };

            lane.next_due_ms = now_ms.saturating_add(interval);
            let completes = if stream.is_finished() {
                let report = stream.report(true);
                lane.streams.pop_front();
                Some(report)
            } else {
                None
            };

            return Some(Dispatch { frame, completes });
        }
        None
    }

    /// 次にフレームが送信可能になる時刻
    pub fn next_deadline(&self) -> Option<u64> {
        MediaKind::ALL
            .iter()
            .map(|&kind| self.lane(kind))
            .filter(|lane| !lane.streams.is_empty())
            .map(|lane| lane.next_due_ms)
            .min()
    }

    /// 送信中・待機中のストリームをすべて破棄する
    ///
    /// # 戻り値
    /// 破棄したストリームの結果（`completed = false`）
    pub fn abort_all(&mut self) -> Vec<StreamReport> {
        let mut reports = Vec::new();
        for kind in MediaKind::ALL {
            let lane = self.lane_mut(kind);
            for stream in lane.streams.drain(..) {
                reports.push(stream.report(false));
            }
            lane.next_due_ms = 0;
        }
        reports
    }

    /// 指定した種別のレーンに残っているストリーム数（送信中のものを含む）
    pub fn pending_streams(&self, kind: MediaKind) -> usize {
        self.lane(kind).streams.len()
    }

    fn lane(&self, kind: MediaKind) -> &Lane {
        match kind {
            MediaKind::Audio => &self.audio,
            MediaKind::Image => &self.image,
        }
    }

    fn lane_mut(&mut self, kind: MediaKind) -> &mut Lane {
        match kind {
            MediaKind::Audio => &mut self.audio,
            MediaKind::Image => &mut self.image,
        }
    }
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new(PacingConfig::default())
    }
}
