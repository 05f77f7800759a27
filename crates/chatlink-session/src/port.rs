//! セッションが外部とやり取りする境界
//!
//! - `Transport`: WebSocket の生成・送信・クローズ（ブラウザでは `web_sys::WebSocket`）
//! - `Collaborator`: UI 側（メッセージ表示、ピア選択、ステータス表示）
//!
//! どちらもセッション生成時に注入するので、テストでは記録用の実装に差し替えられる。

use alloc::string::String;

use chatlink_frame::MediaObject;
use chatlink_stream::StreamReport;

use crate::error::TransportError;
use crate::state::SessionState;

/// トランスポートのインスタンス識別子
///
/// 再接続のたびに新しい値になる。古いインスタンスからのイベントはこの値で判別して捨てる。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl core::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 順序保証・確実な配送をするメッセージトランスポート
///
/// `connect` は非同期に開く想定で、開いたら呼び出し側が
/// `Session::handle_open(id)` を、閉じたら `handle_close(id)` を呼ぶ。
pub trait Transport {
    /// 新しいトランスポートを生成する（前のインスタンスは置き換える）
    fn connect(&mut self, id: ConnectionId) -> Result<(), TransportError>;

    /// テキストメッセージを送る
    fn send_text(&mut self, id: ConnectionId, text: &str) -> Result<(), TransportError>;

    /// バイナリメッセージを送る
    fn send_binary(&mut self, id: ConnectionId, bytes: &[u8]) -> Result<(), TransportError>;

    /// トランスポートを閉じる（既に閉じていれば何もしない）
    fn close(&mut self, id: ConnectionId);
}

/// セッションから UI 側への呼び出し
///
/// `selected_peer` 以外はデフォルトで何もしない。
pub trait Collaborator {
    /// ピア選択画面で選ばれている接続先
    fn selected_peer(&self) -> Option<String>;

    /// ピア選択画面へ戻す必要がある
    fn on_redirect_required(&mut self) {}

    /// 接続先から許可された
    fn on_authorized(&mut self, _peer: &str) {}

    /// 接続先から拒否された
    fn on_rejected(&mut self, _reason: &str) {}

    /// サーバーが `ERROR:<detail>` を返した
    fn on_server_error(&mut self, _detail: &str) {}

    /// アシスタントのテキストメッセージ
    fn on_text_message(&mut self, _text: &str) {}

    /// 画像・音声の再組み立てが完了した
    fn on_media_ready(&mut self, _media: MediaObject) {}

    /// 送信ストリームが終わった（完了または中断）
    fn on_stream_finished(&mut self, _report: StreamReport) {}

    /// セッションの状態が変わった
    fn on_state_changed(&mut self, _state: SessionState) {}
}
