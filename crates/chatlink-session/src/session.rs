//! セッション状態機械
//!
//! 1 本の論理接続を所有し、トランスポートのイベント（open / message / close / error）と
//! タイマー（再接続・リダイレクト・送信間隔）で状態を進める。
//! イベントハンドラは 1 つずつ最後まで実行される前提（シングルスレッド）。

use alloc::string::String;
use alloc::vec::Vec;

use chatlink_frame::{MediaAssembly, MediaFrame, MediaKind};
use chatlink_stream::{OutboundQueue, StreamId};
use serde::Serialize;

use crate::config::{AccessMode, SessionConfig};
use crate::control::{self, ControlMessage};
use crate::error::{SendError, TransportError};
use crate::port::{Collaborator, ConnectionId, Transport};
use crate::state::SessionState;
use crate::supervisor::ReconnectSupervisor;

/// 現在のトランスポート 1 本分の情報
///
/// 再接続のたびに作り直す（書き換えない）。
#[derive(Debug, Clone)]
struct Connection {
    /// トランスポートの識別子
    id: ConnectionId,
    /// ハンドシェイクで指定する接続先ピア
    peer: Option<String>,
    /// 接続先から許可されたか
    authorized: bool,
}

/// セッション統計情報
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// 現在の状態
    pub state: SessionState,
    /// トランスポートの生成回数
    pub connection_attempts: u64,
    /// 予約した再接続の回数
    pub reconnects_scheduled: u64,
    /// 送信したテキストメッセージ数
    pub texts_sent: u64,
    /// 受信したテキストメッセージ数（UI に渡したもの）
    pub texts_received: u64,
    /// 送信したバイナリフレーム数
    pub frames_sent: u64,
    /// 受信したバイナリフレーム数
    pub frames_received: u64,
    /// 送信したバイナリの総バイト数（タグ込み）
    pub bytes_sent: u64,
    /// 受信したバイナリの総バイト数（タグ込み）
    pub bytes_received: u64,
    /// 破棄したフレーム数（不正・未認可）
    pub frames_dropped: u64,
    /// 受信完了した画像数
    pub images_received: u64,
    /// 受信完了した音声数
    pub audio_received: u64,
    /// 送り切ったストリーム数
    pub streams_completed: u64,
    /// 中断したストリーム数
    pub streams_aborted: u64,
}

/// チャットセッション
///
/// `Transport` と `Collaborator` を注入して生成する。
///
/// ## 使い方
///
/// ```text
/// session.open(now)                    → transport.connect(id)
/// transport open     → session.handle_open(id, now)
/// transport message  → session.handle_text(id, text, now) / handle_binary(id, bytes, now)
/// transport close    → session.handle_close(id, now)
/// timer              → session.tick(now)   （次の期限は next_deadline()）
/// ```
pub struct Session<T: Transport, C: Collaborator> {
    config: SessionConfig,
    transport: T,
    collaborator: C,
    state: SessionState,
    /// 現在のトランスポート（Disconnected なら `None`）
    connection: Option<Connection>,
    /// 最後に振った ConnectionId
    last_connection_id: u64,
    supervisor: ReconnectSupervisor,
    /// ピア選択画面へのリダイレクト予定時刻
    redirect_at: Option<u64>,
    assembly: MediaAssembly,
    outbound: OutboundQueue,
    stats: SessionStats,
}

impl<T: Transport, C: Collaborator> Session<T, C> {
    /// 新しいセッションを生成する（まだ接続しない）
    pub fn new(config: SessionConfig, transport: T, collaborator: C) -> Self {
        Session {
            supervisor: ReconnectSupervisor::new(config.reconnect_delay_ms),
            assembly: MediaAssembly::new(config.max_media_bytes),
            outbound: OutboundQueue::new(config.pacing()),
            config,
            transport,
            collaborator,
            state: SessionState::Disconnected,
            connection: None,
            last_connection_id: 0,
            redirect_at: None,
            stats: SessionStats::default(),
        }
    }

    // ===== 接続 =====

    /// 接続を開始する
    ///
    /// 既に Connecting / AwaitingAuthorization / Active なら何もしない。
    /// 接続先を選ぶ方式でピアが未選択なら、接続せずにリダイレクトを要求する。
    ///
    /// # 戻り値
    /// 新しいトランスポートを生成したか
    pub fn open(&mut self, now_ms: u64) -> bool {
        if self.state != SessionState::Disconnected {
            log::debug!("open() ignored: session is {}", self.state);
            return false;
        }

        let peer = match self.config.access {
            AccessMode::Open => None,
            AccessMode::Negotiated => match self.collaborator.selected_peer() {
                Some(peer) => Some(peer),
                None => {
                    log::warn!("No peer selected, redirecting to peer selection");
                    self.supervisor.cancel();
                    self.redirect_at = None;
                    self.collaborator.on_redirect_required();
                    return false;
                }
            },
        };

        // 新しい接続が前の予約を置き換える
        self.supervisor.cancel();
        self.redirect_at = None;

        self.last_connection_id += 1;
        let id = ConnectionId(self.last_connection_id);
        self.connection = Some(Connection {
            id,
            peer,
            authorized: false,
        });
        self.stats.connection_attempts += 1;
        self.set_state(SessionState::Connecting);

        log::info!("Connecting ({})", id);
        if let Err(e) = self.transport.connect(id) {
            log::error!("Failed to open transport {}: {}", id, e);
            self.enter_disconnected(now_ms);
            return false;
        }
        true
    }

    /// トランスポートが開いた
    ///
    /// ハンドシェイクを送り、Active（Open）または AwaitingAuthorization（Negotiated）へ進む。
    pub fn handle_open(&mut self, id: ConnectionId, now_ms: u64) {
        if !self.is_current(id) || self.state != SessionState::Connecting {
            log::debug!("Ignoring open event from stale transport {}", id);
            return;
        }

        // 再組み立てバッファは接続ごと
        self.assembly.clear();

        let handshake = control::handshake(self.current_peer());
        if let Err(e) = self.transport.send_text(id, &handshake) {
            log::error!("Failed to send handshake on {}: {}", id, e);
            self.fail_connection(id, now_ms);
            return;
        }
        log::info!("Transport {} open, sent {}", id, handshake);

        match self.config.access {
            AccessMode::Open => self.set_state(SessionState::Active),
            AccessMode::Negotiated => self.set_state(SessionState::AwaitingAuthorization),
        }
    }

    /// テキストメッセージを受信した
    pub fn handle_text(&mut self, id: ConnectionId, text: &str, now_ms: u64) {
        if !self.is_current(id) {
            log::debug!("Ignoring text from stale transport {}", id);
            return;
        }

        match (self.state, self.config.access) {
            (SessionState::Active, AccessMode::Open) => self.deliver_text(text),
            (SessionState::Active, AccessMode::Negotiated) => match ControlMessage::parse(text) {
                None => self.deliver_text(text),
                Some(ControlMessage::Rejected(reason)) => self.reject(reason, now_ms),
                Some(ControlMessage::Error(detail)) => self.server_error(detail),
                Some(ControlMessage::Accepted(peer)) => {
                    log::debug!("Ignoring repeated acceptance from {}", peer);
                }
            },
            (SessionState::AwaitingAuthorization, _) => match ControlMessage::parse(text) {
                Some(ControlMessage::Accepted(peer)) => self.authorize(peer),
                Some(ControlMessage::Rejected(reason)) => self.reject(reason, now_ms),
                Some(ControlMessage::Error(detail)) => self.server_error(detail),
                None => {
                    log::debug!("Discarding text received before authorization");
                }
            },
            (state, _) => {
                log::debug!("Discarding text received while {}", state);
            }
        }
    }

    /// バイナリメッセージを受信した
    ///
    /// 空・未知タグのフレームはログに残して捨てる。状態機械は止めない。
    pub fn handle_binary(&mut self, id: ConnectionId, bytes: &[u8], _now_ms: u64) {
        if !self.is_current(id) {
            log::debug!("Ignoring binary frame from stale transport {}", id);
            return;
        }
        if !self.is_ready() {
            log::debug!("Discarding binary frame received while {}", self.state);
            self.stats.frames_dropped += 1;
            return;
        }

        self.stats.frames_received += 1;
        self.stats.bytes_received += bytes.len() as u64;

        let frame = match MediaFrame::from_bytes(bytes) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Dropping binary frame: {}", e);
                self.stats.frames_dropped += 1;
                return;
            }
        };
        log::trace!("Received {} frame ({} bytes)", frame.kind, frame.payload.len());

        if let Some(media) = self.assembly.add_frame(frame) {
            log::info!("{} received: {} bytes", media.kind, media.bytes.len());
            match media.kind {
                MediaKind::Image => self.stats.images_received += 1,
                MediaKind::Audio => self.stats.audio_received += 1,
            }
            self.collaborator.on_media_ready(media);
        }
    }

    /// トランスポートが閉じた
    pub fn handle_close(&mut self, id: ConnectionId, now_ms: u64) {
        if !self.is_current(id) {
            log::debug!("Ignoring close event from stale transport {}", id);
            return;
        }
        log::warn!("Transport {} closed", id);
        self.enter_disconnected(now_ms);
    }

    /// トランスポートでエラーが起きた
    ///
    /// close と同じ扱い。トランスポートは明示的に閉じ、この接続の close 遷移は 1 回だけ起きる。
    pub fn handle_error(&mut self, id: ConnectionId, now_ms: u64) {
        if !self.is_current(id) {
            log::debug!("Ignoring error event from stale transport {}", id);
            return;
        }
        log::error!("Transport {} error", id);
        self.fail_connection(id, now_ms);
    }

    /// セッションを終了する
    ///
    /// トランスポートを閉じ、予約中の再接続・リダイレクトも取り消す。
    pub fn shutdown(&mut self) {
        self.supervisor.cancel();
        self.redirect_at = None;
        if let Some(conn) = self.connection.take() {
            log::info!("Shutting down transport {}", conn.id);
            self.transport.close(conn.id);
        }
        self.abort_streams();
        self.assembly.clear();
        self.set_state(SessionState::Disconnected);
    }

    // ===== タイマー =====

    /// 期限の来たタイマーを処理する
    ///
    /// - リダイレクト予定時刻を過ぎていれば UI にリダイレクトを要求
    /// - 再接続予定時刻を過ぎていれば `open()`（接続中なら何もしない）
    /// - 送信間隔の来たフレームを送る
    pub fn tick(&mut self, now_ms: u64) {
        if let Some(at) = self.redirect_at {
            if now_ms >= at {
                self.redirect_at = None;
                log::info!("Redirecting to peer selection");
                self.collaborator.on_redirect_required();
            }
        }

        if self.supervisor.take_due(now_ms) {
            log::info!("Reconnect timer fired");
            self.open(now_ms);
        }

        self.pump_outbound(now_ms);
    }

    /// 次に `tick` を呼ぶべき時刻
    pub fn next_deadline(&self) -> Option<u64> {
        let outbound = if self.is_ready() {
            self.outbound.next_deadline()
        } else {
            None
        };
        [self.redirect_at, self.supervisor.deadline(), outbound]
            .into_iter()
            .flatten()
            .min()
    }

    // ===== 送信 =====

    /// テキストを送る
    ///
    /// # 戻り値
    /// トランスポートに渡せたか（未接続なら即座に `false`）
    pub fn send_text(&mut self, text: &str) -> bool {
        match self.try_send_text(text) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("Text not sent: {}", e);
                false
            }
        }
    }

    /// テキストを送る（エラー詳細付き）
    pub fn try_send_text(&mut self, text: &str) -> Result<(), SendError> {
        let id = self.ready_connection()?;
        self.transport.send_text(id, text)?;
        self.stats.texts_sent += 1;
        Ok(())
    }

    /// 画像を送る
    pub fn send_image(&mut self, bytes: Vec<u8>, now_ms: u64) -> bool {
        self.send_media(MediaKind::Image, bytes, now_ms)
    }

    /// 音声を送る
    pub fn send_audio(&mut self, bytes: Vec<u8>, now_ms: u64) -> bool {
        self.send_media(MediaKind::Audio, bytes, now_ms)
    }

    /// メディアを分割して送る
    ///
    /// 最初のフレームはこの呼び出し中に送り、残りは `tick` で間隔を空けて送る。
    /// 結果は `Collaborator::on_stream_finished` で通知する。
    ///
    /// # 戻り値
    /// 送信を開始できたか。未接続、または最初のフレームの送信で接続が
    /// 落ちた場合は `false`
    pub fn send_media(&mut self, kind: MediaKind, bytes: Vec<u8>, now_ms: u64) -> bool {
        match self.try_send_media(kind, bytes, now_ms) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("{} not sent: {}", kind, e);
                false
            }
        }
    }

    /// メディアを分割して送る（エラー詳細付き）
    ///
    /// 途中で接続が閉じたストリームは破棄され、`completed = false` の
    /// `StreamReport` が同じ `StreamId` で通知される。
    ///
    /// # 戻り値
    /// 積んだストリームの識別子
    ///
    /// # エラー
    /// - `NotConnected`: 送信可能な状態でない
    /// - `Transport`: この呼び出し中の送信で接続が落ちた（ストリームは破棄済み）
    pub fn try_send_media(
        &mut self,
        kind: MediaKind,
        bytes: Vec<u8>,
        now_ms: u64,
    ) -> Result<StreamId, SendError> {
        self.ready_connection()?;
        let ahead = self.outbound.pending_streams(kind);
        if ahead > 0 {
            log::info!("{} stream queued behind {} in-flight stream(s)", kind, ahead);
        }
        let id = self.outbound.enqueue(kind, bytes, now_ms);
        if let Some(e) = self.pump_outbound(now_ms) {
            return Err(SendError::Transport(e));
        }
        if !self.is_ready() {
            return Err(SendError::NotConnected);
        }
        Ok(id)
    }

    // ===== 状態参照 =====

    /// 現在の状態
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// 送受信可能か（Active かつ、必要なら認可済み）
    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Active
            && match self.config.access {
                AccessMode::Open => true,
                AccessMode::Negotiated => self.connection.as_ref().is_some_and(|c| c.authorized),
            }
    }

    /// 接続先から許可されているか
    pub fn is_authorized(&self) -> bool {
        self.connection.as_ref().is_some_and(|c| c.authorized)
    }

    /// 現在のトランスポートの識別子
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection.as_ref().map(|c| c.id)
    }

    /// 現在の接続先ピア
    pub fn current_peer(&self) -> Option<&str> {
        self.connection.as_ref().and_then(|c| c.peer.as_deref())
    }

    /// 再接続が予約されているか
    pub fn reconnect_pending(&self) -> bool {
        self.supervisor.is_pending()
    }

    /// セッション統計を返す
    pub fn stats(&self) -> SessionStats {
        SessionStats {
            state: self.state,
            reconnects_scheduled: self.supervisor.scheduled_total(),
            ..self.stats.clone()
        }
    }

    /// 注入したトランスポート
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// 注入したトランスポート（可変）
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// 注入した UI 側の実装
    pub fn collaborator(&self) -> &C {
        &self.collaborator
    }

    /// 注入した UI 側の実装（可変）
    pub fn collaborator_mut(&mut self) -> &mut C {
        &mut self.collaborator
    }

    // ===== Private メソッド =====

    fn is_current(&self, id: ConnectionId) -> bool {
        self.connection_id() == Some(id)
    }

    fn ready_connection(&self) -> Result<ConnectionId, SendError> {
        if !self.is_ready() {
            return Err(SendError::NotConnected);
        }
        self.connection_id().ok_or(SendError::NotConnected)
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        log::info!("Session state: {} -> {}", self.state, state);
        self.state = state;
        self.collaborator.on_state_changed(state);
    }

    fn deliver_text(&mut self, text: &str) {
        self.stats.texts_received += 1;
        self.collaborator.on_text_message(text);
    }

    fn authorize(&mut self, peer: &str) {
        let Some(conn) = self.connection.as_mut() else {
            return;
        };
        if conn.peer.as_deref().is_some_and(|selected| selected != peer) {
            log::warn!(
                "Accepted by {} but {} was requested",
                peer,
                conn.peer.as_deref().unwrap_or_default()
            );
        }
        conn.authorized = true;
        log::info!("Connection accepted by {}", peer);
        self.set_state(SessionState::Active);
        self.collaborator.on_authorized(peer);
    }

    /// 拒否: このセッションでは終端。再接続せず、一定時間後にピア選択へリダイレクトする
    fn reject(&mut self, reason: &str, now_ms: u64) {
        log::warn!("Connection rejected: {}", reason);
        if let Some(conn) = self.connection.take() {
            self.transport.close(conn.id);
        }
        self.abort_streams();
        self.assembly.clear();
        self.supervisor.cancel();
        self.set_state(SessionState::Disconnected);
        self.collaborator.on_rejected(reason);
        self.redirect_at = Some(now_ms.saturating_add(self.config.redirect_delay_ms));
    }

    fn server_error(&mut self, detail: &str) {
        log::warn!("Server error: {}", detail);
        self.collaborator.on_server_error(detail);
    }

    /// トランスポートを強制的に閉じてから切断処理をする
    fn fail_connection(&mut self, id: ConnectionId, now_ms: u64) {
        self.transport.close(id);
        self.enter_disconnected(now_ms);
    }

    /// 一時的な切断（close / error）の処理
    fn enter_disconnected(&mut self, now_ms: u64) {
        self.connection = None;
        self.abort_streams();
        self.assembly.clear();
        self.set_state(SessionState::Disconnected);

        match self.config.access {
            AccessMode::Open => {
                let at = self.supervisor.schedule(now_ms);
                log::info!("Reconnecting in {}ms", at.saturating_sub(now_ms));
            }
            AccessMode::Negotiated => {
                // ピアを選び直す必要があるので盲目的には再試行しない
                if self.redirect_at.is_none() {
                    self.redirect_at = Some(now_ms.saturating_add(self.config.redirect_delay_ms));
                }
            }
        }
    }

    fn abort_streams(&mut self) {
        for report in self.outbound.abort_all() {
            log::warn!(
                "{} stream aborted after {} frame(s)",
                report.kind,
                report.frames_sent
            );
            self.stats.streams_aborted += 1;
            self.collaborator.on_stream_finished(report);
        }
    }

    /// 送信時刻の来たフレームをトランスポートに渡す
    ///
    /// フレームごとに接続状態を確認し、閉じたトランスポートには送らない。
    /// 送信に失敗したら接続を落とし、そのエラーを返す。
    fn pump_outbound(&mut self, now_ms: u64) -> Option<TransportError> {
        while self.is_ready() {
            let Some(id) = self.connection_id() else {
                break;
            };
            let Some(dispatch) = self.outbound.poll_due(now_ms) else {
                break;
            };

            let bytes = dispatch.frame.to_bytes();
            if let Err(e) = self.transport.send_binary(id, &bytes) {
                log::error!("Failed to send {} frame: {}", dispatch.frame.kind, e);
                if let Some(mut report) = dispatch.completes {
                    report.completed = false;
                    self.stats.streams_aborted += 1;
                    self.collaborator.on_stream_finished(report);
                }
                self.fail_connection(id, now_ms);
                return Some(e);
            }

            self.stats.frames_sent += 1;
            self.stats.bytes_sent += bytes.len() as u64;

            if let Some(report) = dispatch.completes {
                log::info!("{} sent: {} bytes", report.kind, report.total_bytes);
                self.stats.streams_completed += 1;
                self.collaborator.on_stream_finished(report);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use alloc::vec;
    use chatlink_frame::MediaObject;
    use chatlink_stream::StreamReport;

    /// トランスポートへの呼び出し記録
    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Connect(ConnectionId),
        Text(ConnectionId, String),
        Binary(ConnectionId, Vec<u8>),
        Close(ConnectionId),
    }

    #[derive(Default)]
    struct MockTransport {
        calls: Vec<Call>,
        fail_connect: bool,
        /// 指定回数のバイナリ送信が成功した後は失敗する
        binary_budget: Option<usize>,
    }

    impl MockTransport {
        fn connects(&self) -> usize {
            self.calls
                .iter()
                .filter(|c| matches!(c, Call::Connect(_)))
                .count()
        }

        fn binaries(&self) -> Vec<Vec<u8>> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Binary(_, bytes) => Some(bytes.clone()),
                    _ => None,
                })
                .collect()
        }

        fn texts(&self) -> Vec<String> {
            self.calls
                .iter()
                .filter_map(|c| match c {
                    Call::Text(_, text) => Some(text.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    impl Transport for MockTransport {
        fn connect(&mut self, id: ConnectionId) -> Result<(), TransportError> {
            self.calls.push(Call::Connect(id));
            if self.fail_connect {
                return Err(TransportError::ConnectFailed("invalid url".to_string()));
            }
            Ok(())
        }

        fn send_text(&mut self, id: ConnectionId, text: &str) -> Result<(), TransportError> {
            self.calls.push(Call::Text(id, text.to_string()));
            Ok(())
        }

        fn send_binary(&mut self, id: ConnectionId, bytes: &[u8]) -> Result<(), TransportError> {
            if let Some(budget) = self.binary_budget.as_mut() {
                if *budget == 0 {
                    return Err(TransportError::NotOpen);
                }
                *budget -= 1;
            }
            self.calls.push(Call::Binary(id, bytes.to_vec()));
            Ok(())
        }

        fn close(&mut self, id: ConnectionId) {
            self.calls.push(Call::Close(id));
        }
    }

    /// UI 側への通知記録
    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Note {
        Redirect,
        Authorized(String),
        Rejected(String),
        ServerError(String),
        Text(String),
        Media(MediaObject),
        Stream(StreamReport),
    }

    #[derive(Default)]
    struct Recorder {
        peer: Option<String>,
        notes: Vec<Note>,
        states: Vec<SessionState>,
    }

    impl Recorder {
        fn redirects(&self) -> usize {
            self.notes.iter().filter(|n| **n == Note::Redirect).count()
        }

        fn streams(&self) -> Vec<StreamReport> {
            self.notes
                .iter()
                .filter_map(|n| match n {
                    Note::Stream(report) => Some(report.clone()),
                    _ => None,
                })
                .collect()
        }
    }

    impl Collaborator for Recorder {
        fn selected_peer(&self) -> Option<String> {
            self.peer.clone()
        }
        fn on_redirect_required(&mut self) {
            self.notes.push(Note::Redirect);
        }
        fn on_authorized(&mut self, peer: &str) {
            self.notes.push(Note::Authorized(peer.to_string()));
        }
        fn on_rejected(&mut self, reason: &str) {
            self.notes.push(Note::Rejected(reason.to_string()));
        }
        fn on_server_error(&mut self, detail: &str) {
            self.notes.push(Note::ServerError(detail.to_string()));
        }
        fn on_text_message(&mut self, text: &str) {
            self.notes.push(Note::Text(text.to_string()));
        }
        fn on_media_ready(&mut self, media: MediaObject) {
            self.notes.push(Note::Media(media));
        }
        fn on_stream_finished(&mut self, report: StreamReport) {
            self.notes.push(Note::Stream(report));
        }
        fn on_state_changed(&mut self, state: SessionState) {
            self.states.push(state);
        }
    }

    type TestSession = Session<MockTransport, Recorder>;

    fn open_session() -> TestSession {
        Session::new(
            SessionConfig::default(),
            MockTransport::default(),
            Recorder::default(),
        )
    }

    fn negotiated_session(peer: Option<&str>) -> TestSession {
        Session::new(
            SessionConfig::negotiated(),
            MockTransport::default(),
            Recorder {
                peer: peer.map(|p| p.to_string()),
                ..Recorder::default()
            },
        )
    }

    /// Open 方式で Active まで進める
    fn active_session() -> (TestSession, ConnectionId) {
        let mut session = open_session();
        assert!(session.open(0));
        let id = session.connection_id().unwrap();
        session.handle_open(id, 0);
        assert_eq!(session.state(), SessionState::Active);
        (session, id)
    }

    #[test]
    fn test_open_handshake_without_peer() {
        let (session, id) = active_session();
        assert_eq!(
            session.transport().calls,
            vec![Call::Connect(id), Call::Text(id, "WEB_CONNECT".to_string())]
        );
        assert_eq!(
            session.collaborator().states,
            vec![SessionState::Connecting, SessionState::Active]
        );
        assert!(session.is_ready());
    }

    #[test]
    fn test_open_twice_creates_one_transport() {
        let mut session = open_session();
        assert!(session.open(0));
        assert!(!session.open(1));
        assert_eq!(session.transport().connects(), 1);
        assert_eq!(session.state(), SessionState::Connecting);

        // Active 中も同様
        let id = session.connection_id().unwrap();
        session.handle_open(id, 2);
        assert!(!session.open(3));
        assert_eq!(session.transport().connects(), 1);
    }

    #[test]
    fn test_text_forwarded_verbatim() {
        let (mut session, id) = active_session();
        session.handle_text(id, "Hello from the assistant", 10);
        // Open 方式では ERROR: もアプリケーションのテキスト
        session.handle_text(id, "ERROR: just text", 11);
        assert_eq!(
            session.collaborator().notes,
            vec![
                Note::Text("Hello from the assistant".to_string()),
                Note::Text("ERROR: just text".to_string()),
            ]
        );
        assert_eq!(session.stats().texts_received, 2);
    }

    #[test]
    fn test_binary_frames_reassembled() {
        let (mut session, id) = active_session();
        session.handle_binary(id, &[0x03, 1, 2, 3], 10);
        session.handle_binary(id, &[0x02, 9], 11);
        session.handle_binary(id, &[0x03, 4, 5], 12);
        session.handle_binary(id, &[0x03], 13);

        assert_eq!(
            session.collaborator().notes,
            vec![Note::Media(MediaObject {
                kind: MediaKind::Image,
                bytes: vec![1, 2, 3, 4, 5],
            })]
        );

        session.handle_binary(id, &[0x02], 14);
        let stats = session.stats();
        assert_eq!(stats.images_received, 1);
        assert_eq!(stats.audio_received, 1);
        assert_eq!(stats.frames_received, 5);
    }

    #[test]
    fn test_malformed_frames_are_dropped() {
        let (mut session, id) = active_session();
        session.handle_binary(id, &[], 10);
        session.handle_binary(id, &[0x07, 1, 2], 11);

        assert!(session.collaborator().notes.is_empty());
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.stats().frames_dropped, 2);
    }

    #[test]
    fn test_duplicate_end_marker_emits_once() {
        let (mut session, id) = active_session();
        session.handle_binary(id, &[0x02, 1], 10);
        session.handle_binary(id, &[0x02], 11);
        session.handle_binary(id, &[0x02], 12);
        assert_eq!(session.collaborator().notes.len(), 1);
    }

    #[test]
    fn test_unexpected_close_schedules_one_reconnect() {
        let (mut session, id) = active_session();
        session.handle_close(id, 1000);

        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.reconnect_pending());
        assert_eq!(session.next_deadline(), Some(3000));

        // 期限前は何もしない
        session.tick(2999);
        assert_eq!(session.transport().connects(), 1);

        session.tick(3000);
        assert_eq!(session.transport().connects(), 2);
        assert_eq!(session.state(), SessionState::Connecting);

        // 2 回目の発火はない
        session.tick(10_000);
        assert_eq!(session.transport().connects(), 2);
        assert_eq!(session.stats().reconnects_scheduled, 1);
    }

    #[test]
    fn test_reconnect_skipped_when_already_connecting() {
        let (mut session, id) = active_session();
        session.handle_close(id, 0);

        // タイマー前に手動で接続
        assert!(session.open(500));
        assert!(!session.reconnect_pending());
        session.tick(5000);
        assert_eq!(session.transport().connects(), 2);
    }

    #[test]
    fn test_error_closes_transport_and_fires_once() {
        let (mut session, id) = active_session();
        session.handle_error(id, 100);

        assert!(session.transport().calls.contains(&Call::Close(id)));
        assert_eq!(session.state(), SessionState::Disconnected);

        // その後の close イベントは古い接続のものなので無視
        session.handle_close(id, 101);
        assert_eq!(session.stats().reconnects_scheduled, 1);
        assert_eq!(session.next_deadline(), Some(2100));
    }

    #[test]
    fn test_stale_events_ignored_after_reconnect() {
        let (mut session, old) = active_session();
        session.handle_close(old, 0);
        session.tick(2000);
        let new = session.connection_id().unwrap();
        assert_ne!(old, new);

        session.handle_open(old, 2001);
        assert_eq!(session.state(), SessionState::Connecting);
        session.handle_open(new, 2002);
        session.handle_text(old, "from the past", 2003);
        session.handle_close(old, 2004);

        assert_eq!(session.state(), SessionState::Active);
        assert!(session.collaborator().notes.is_empty());
    }

    #[test]
    fn test_connect_failure_schedules_reconnect() {
        let mut session = open_session();
        session.transport_mut().fail_connect = true;
        assert!(!session.open(0));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.reconnect_pending());
    }

    #[test]
    fn test_send_text_requires_active() {
        let mut session = open_session();
        assert!(!session.send_text("hi"));
        assert_eq!(session.try_send_text("hi"), Err(SendError::NotConnected));

        session.open(0);
        assert!(!session.send_text("hi"));

        let id = session.connection_id().unwrap();
        session.handle_open(id, 0);
        assert!(session.send_text("hi"));
        assert_eq!(session.transport().texts(), vec!["WEB_CONNECT", "hi"]);
    }

    #[test]
    fn test_send_image_while_disconnected_sends_nothing() {
        let mut session = open_session();
        assert!(!session.send_image(vec![0u8; 100], 0));
        assert!(session.transport().calls.is_empty());
        assert!(session.collaborator().streams().is_empty());
    }

    #[test]
    fn test_send_2500_byte_image() {
        let (mut session, _) = active_session();
        let image: Vec<u8> = (0u8..=255).cycle().take(2500).collect();
        let stream = session
            .try_send_media(MediaKind::Image, image.clone(), 100)
            .unwrap();

        // 最初のフレームは即座に送られる
        assert_eq!(session.transport().binaries().len(), 1);

        let mut now = 100;
        while let Some(deadline) = session.next_deadline() {
            now = deadline;
            session.tick(now);
        }
        assert_eq!(now, 130);

        let frames = session.transport().binaries();
        let sizes: Vec<usize> = frames.iter().map(|f| f.len() - 1).collect();
        assert_eq!(sizes, vec![1024, 1024, 452, 0]);
        assert!(frames.iter().all(|f| f[0] == 0x03));

        let payload: Vec<u8> = frames.iter().flat_map(|f| f[1..].to_vec()).collect();
        assert_eq!(payload, image);

        assert_eq!(
            session.collaborator().streams(),
            vec![StreamReport {
                id: stream,
                kind: MediaKind::Image,
                total_bytes: 2500,
                frames_sent: 4,
                completed: true,
            }]
        );
        let stats = session.stats();
        assert_eq!(stats.frames_sent, 4);
        assert_eq!(stats.bytes_sent, 2504);
        assert_eq!(stats.streams_completed, 1);
    }

    #[test]
    fn test_close_mid_stream_aborts() {
        let (mut session, id) = active_session();
        assert!(session.send_audio(vec![0u8; 3000], 0));
        session.tick(10);
        session.handle_close(id, 15);

        // 閉じた後は送らない
        session.tick(20);
        session.tick(30);
        assert_eq!(session.transport().binaries().len(), 2);

        let reports = session.collaborator().streams();
        assert_eq!(reports.len(), 1);
        assert!(!reports[0].completed);
        assert_eq!(session.stats().streams_aborted, 1);
    }

    #[test]
    fn test_send_failure_mid_stream_is_transport_error() {
        let (mut session, id) = active_session();
        session.transport_mut().binary_budget = Some(1);
        assert!(session.send_image(vec![0u8; 2048], 0));
        session.tick(10);

        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.transport().calls.contains(&Call::Close(id)));
        assert!(session.reconnect_pending());
        assert!(!session.collaborator().streams()[0].completed);
    }

    #[test]
    fn test_send_fails_when_first_frame_is_refused() {
        let (mut session, id) = active_session();
        session.transport_mut().binary_budget = Some(0);

        assert!(!session.send_image(vec![0u8; 2500], 0));
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.transport().binaries().is_empty());
        assert!(session.transport().calls.contains(&Call::Close(id)));

        let reports = session.collaborator().streams();
        assert_eq!(reports.len(), 1);
        assert!(!reports[0].completed);
    }

    #[test]
    fn test_try_send_media_reports_transport_error() {
        let (mut session, _) = active_session();
        session.transport_mut().binary_budget = Some(0);

        let result = session.try_send_media(MediaKind::Audio, vec![0u8; 10], 0);
        assert_eq!(result, Err(SendError::Transport(TransportError::NotOpen)));
        assert_eq!(session.stats().streams_aborted, 1);
    }

    #[test]
    fn test_stream_report_matches_returned_id() {
        let (mut session, id) = active_session();
        let first = session
            .try_send_media(MediaKind::Image, vec![1u8; 10], 0)
            .unwrap();
        let second = session
            .try_send_media(MediaKind::Image, vec![2u8; 10], 0)
            .unwrap();
        assert_ne!(first, second);

        session.tick(10);
        session.handle_close(id, 15);

        let reports = session.collaborator().streams();
        assert_eq!(reports.len(), 2);
        assert_eq!((reports[0].id, reports[0].completed), (first, true));
        assert_eq!((reports[1].id, reports[1].completed), (second, false));
    }

    #[test]
    fn test_huge_delays_saturate() {
        let config = SessionConfig {
            reconnect_delay_ms: u64::MAX,
            redirect_delay_ms: u64::MAX,
            ..SessionConfig::default()
        };
        let mut session = Session::new(config, MockTransport::default(), Recorder::default());
        session.open(0);
        let id = session.connection_id().unwrap();
        session.handle_open(id, 0);

        session.handle_close(id, 100);
        assert!(session.reconnect_pending());
        assert_eq!(session.next_deadline(), Some(u64::MAX));

        let config = SessionConfig {
            redirect_delay_ms: u64::MAX,
            ..SessionConfig::negotiated()
        };
        let mut session = Session::new(
            config,
            MockTransport::default(),
            Recorder {
                peer: Some("device-1".to_string()),
                ..Recorder::default()
            },
        );
        session.open(0);
        let id = session.connection_id().unwrap();
        session.handle_open(id, 0);
        session.handle_text(id, "CONNECTION_REJECTED:busy", 100);
        assert_eq!(session.next_deadline(), Some(u64::MAX));
    }

    #[test]
    fn test_same_kind_sends_are_serialized() {
        let (mut session, _) = active_session();
        session.send_audio(vec![1u8; 10], 0);
        session.send_audio(vec![2u8; 10], 0);

        let mut now = 0;
        while let Some(deadline) = session.next_deadline() {
            now = deadline;
            session.tick(now);
        }

        let mut first = vec![0x02];
        first.extend_from_slice(&[1u8; 10]);
        let mut second = vec![0x02];
        second.extend_from_slice(&[2u8; 10]);

        // 2 本目は 1 本目の end マーカーの後
        assert_eq!(
            session.transport().binaries(),
            vec![first, vec![0x02], second, vec![0x02]]
        );
        assert_eq!(now, 30);
        assert_eq!(session.collaborator().streams().len(), 2);
    }

    #[test]
    fn test_negotiated_accept() {
        let mut session = negotiated_session(Some("device-7"));
        assert!(session.open(0));
        let id = session.connection_id().unwrap();
        session.handle_open(id, 0);

        assert_eq!(session.state(), SessionState::AwaitingAuthorization);
        assert_eq!(
            session.transport().texts(),
            vec!["WEB_CONNECT:device-7".to_string()]
        );
        assert!(!session.send_text("too early"));

        // 許可前のテキスト・バイナリは捨てる
        session.handle_text(id, "premature", 1);
        session.handle_binary(id, &[0x03, 1], 1);

        session.handle_text(id, "CONNECTION_ACCEPTED:device-7", 2);
        assert_eq!(session.state(), SessionState::Active);
        assert!(session.is_authorized());
        assert!(session.send_text("now"));

        session.handle_text(id, "answer", 3);
        assert_eq!(
            session.collaborator().notes,
            vec![
                Note::Authorized("device-7".to_string()),
                Note::Text("answer".to_string()),
            ]
        );
        assert_eq!(session.stats().frames_dropped, 1);
    }

    #[test]
    fn test_negotiated_reject_redirects_once() {
        let mut session = negotiated_session(Some("device-7"));
        session.open(0);
        let id = session.connection_id().unwrap();
        session.handle_open(id, 0);

        session.handle_text(id, "CONNECTION_REJECTED:device_busy", 1000);
        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(!session.is_authorized());
        assert_eq!(
            session.collaborator().notes,
            vec![Note::Rejected("device_busy".to_string())]
        );
        assert!(session.transport().calls.contains(&Call::Close(id)));
        assert!(!session.reconnect_pending());

        // サーバー側から閉じられても再接続しない
        session.handle_close(id, 1001);
        assert!(!session.reconnect_pending());

        session.tick(2999);
        assert_eq!(session.collaborator().redirects(), 0);
        session.tick(3000);
        assert_eq!(session.collaborator().redirects(), 1);
        session.tick(10_000);
        assert_eq!(session.collaborator().redirects(), 1);
        assert_eq!(session.transport().connects(), 1);
    }

    #[test]
    fn test_negotiated_close_redirects_instead_of_retrying() {
        let mut session = negotiated_session(Some("device-7"));
        session.open(0);
        let id = session.connection_id().unwrap();
        session.handle_open(id, 0);
        session.handle_text(id, "CONNECTION_ACCEPTED:device-7", 1);

        session.handle_close(id, 500);
        assert!(!session.reconnect_pending());
        assert_eq!(session.next_deadline(), Some(2500));
        session.tick(2500);
        assert_eq!(session.collaborator().redirects(), 1);
        assert_eq!(session.transport().connects(), 1);
    }

    #[test]
    fn test_negotiated_without_peer_redirects_immediately() {
        let mut session = negotiated_session(None);
        assert!(!session.open(0));
        assert_eq!(session.transport().connects(), 0);
        assert_eq!(session.collaborator().redirects(), 1);
    }

    #[test]
    fn test_negotiated_server_error_keeps_state() {
        let mut session = negotiated_session(Some("device-7"));
        session.open(0);
        let id = session.connection_id().unwrap();
        session.handle_open(id, 0);

        session.handle_text(id, "ERROR:device offline", 1);
        assert_eq!(session.state(), SessionState::AwaitingAuthorization);
        assert_eq!(
            session.collaborator().notes,
            vec![Note::ServerError("device offline".to_string())]
        );
    }

    #[test]
    fn test_shutdown_cancels_timers() {
        let (mut session, id) = active_session();
        session.send_image(vec![0u8; 4096], 0);
        session.shutdown();

        assert_eq!(session.state(), SessionState::Disconnected);
        assert!(session.transport().calls.contains(&Call::Close(id)));
        assert_eq!(session.next_deadline(), None);
        assert!(!session.collaborator().streams()[0].completed);
    }

    #[test]
    fn test_stats_serialize() {
        let (session, _) = active_session();
        let json = serde_json::to_string(&session.stats()).unwrap();
        assert!(json.contains(r#""state":"active""#));
        assert!(json.contains(r#""connection_attempts":1"#));
    }
}
