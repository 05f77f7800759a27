//! ChatClient wasm-bindgen エクスポート
//!
//! ダッシュボード（ブラウザ）から呼び出すチャットクライアントの主エントリポイント。
//! セッション状態機械・WebSocket・ブラウザのタイマーを統合する。

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use chatlink_session::{MediaKind, Session};
use js_sys::{Function, Promise, Uint8Array};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::{future_to_promise, JsFuture};
use web_sys::Blob;

use crate::callbacks::{Callbacks, JsCollaborator};
use crate::config::ClientConfig;
use crate::socket::{js_error_text, WsTransport};

/// ブラウザで動くセッション
pub(crate) type ChatSession = Session<WsTransport, JsCollaborator>;

/// 現在時刻（`Date.now()`）
fn now_ms() -> u64 {
    js_sys::Date::now() as u64
}

/// セッションと、次の期限に合わせた `setTimeout` 1 つ
pub(crate) struct Inner {
    session: ChatSession,
    /// タイマー発火時に呼ばれる関数（クライアントと同じ寿命）
    timer_fn: Closure<dyn FnMut()>,
    /// `setTimeout` のハンドル
    timer_handle: Option<i32>,
    /// 現在のタイマーが対象にしている期限
    timer_at: Option<u64>,
}

impl Inner {
    fn new(config: ClientConfig, callbacks: Callbacks, shared: Weak<RefCell<Inner>>) -> Self {
        let transport = WsTransport::new(config.url, shared.clone());
        let collaborator = JsCollaborator::new(callbacks);
        let timer_fn = Closure::<dyn FnMut()>::new(move || on_timer(&shared));
        Inner {
            session: Session::new(config.session, transport, collaborator),
            timer_fn,
            timer_handle: None,
            timer_at: None,
        }
    }

    /// セッションの次の期限にタイマーを合わせる
    fn arm_timer(&mut self, now: u64) {
        let deadline = self.session.next_deadline();
        if deadline.is_some() && deadline == self.timer_at && self.timer_handle.is_some() {
            return;
        }
        self.cancel_timer();

        let Some(at) = deadline else {
            return;
        };
        let Some(window) = web_sys::window() else {
            log::error!("No window object, timers are unavailable");
            return;
        };
        let delay = at.saturating_sub(now).min(i32::MAX as u64) as i32;
        match window.set_timeout_with_callback_and_timeout_and_arguments_0(
            self.timer_fn.as_ref().unchecked_ref(),
            delay,
        ) {
            Ok(handle) => {
                self.timer_handle = Some(handle);
                self.timer_at = Some(at);
            }
            Err(e) => log::error!("setTimeout failed: {}", js_error_text(&e)),
        }
    }

    fn cancel_timer(&mut self) {
        self.timer_at = None;
        if let Some(handle) = self.timer_handle.take() {
            if let Some(window) = web_sys::window() {
                window.clear_timeout_with_handle(handle);
            }
        }
    }
}

/// セッションを操作し、タイマーを合わせ直し、溜まった通知を JS に渡す
///
/// 通知はセッションの借用を手放してから渡す。
/// 借用中に呼ばれた場合（`getSelectedPeer` からの呼び出しなど）は何もせず `None`。
pub(crate) fn with_session<R>(
    shared: &Rc<RefCell<Inner>>,
    f: impl FnOnce(&mut ChatSession, u64) -> R,
) -> Option<R> {
    let now = now_ms();
    let (result, notices, settled, callbacks) = {
        let Ok(mut inner) = shared.try_borrow_mut() else {
            log::error!("ChatClient called re-entrantly, ignoring");
            return None;
        };
        let result = f(&mut inner.session, now);
        inner.arm_timer(now);
        let collaborator = inner.session.collaborator_mut();
        let (notices, settled) = collaborator.take_settled();
        (result, notices, settled, collaborator.callbacks().clone())
    };
    callbacks.dispatch(notices);
    resolve_sends(settled);
    Some(result)
}

/// 送信 Promise を `completed` で解決する
fn resolve_sends(settled: Vec<(Function, bool)>) {
    for (resolve, completed) in settled {
        if let Err(e) = resolve.call1(&JsValue::NULL, &JsValue::from_bool(completed)) {
            log::error!("Failed to resolve send promise: {}", js_error_text(&e));
        }
    }
}

/// メディアを積み、end マーカーまで送り切れたかで解決する Promise を返す
///
/// 積めなかった場合と、この呼び出し中に接続が落ちた場合は即座に `false`。
fn send_media(shared: &Rc<RefCell<Inner>>, kind: MediaKind, bytes: Vec<u8>) -> Promise {
    let mut resolve = None;
    let finished = Promise::new(&mut |res, _rej| resolve = Some(res));
    let Some(resolve) = resolve else {
        return Promise::resolve(&JsValue::FALSE);
    };

    let started = with_session(shared, |session, now| {
        match session.try_send_media(kind, bytes, now) {
            Ok(id) => {
                session.collaborator_mut().wait_for_stream(id, resolve);
                true
            }
            Err(e) => {
                log::warn!("{} not sent: {}", kind, e);
                false
            }
        }
    })
    .unwrap_or(false);

    if started {
        finished
    } else {
        Promise::resolve(&JsValue::FALSE)
    }
}

/// WebSocket のイベントをセッションに渡す
///
/// クライアントが既に解放されていれば何もしない。
pub(crate) fn dispatch_event(
    shared: &Weak<RefCell<Inner>>,
    f: impl FnOnce(&mut ChatSession, u64),
) {
    if let Some(shared) = shared.upgrade() {
        with_session(&shared, f);
    }
}

fn on_timer(shared: &Weak<RefCell<Inner>>) {
    let Some(shared) = shared.upgrade() else {
        return;
    };
    if let Ok(mut inner) = shared.try_borrow_mut() {
        // 発火済みのハンドルは clearTimeout 不要
        inner.timer_handle = None;
        inner.timer_at = None;
    }
    with_session(&shared, |session, now| session.tick(now));
}

/// チャットクライアント
///
/// WebSocket 接続・アクセス交渉・再接続・メディアの分割送信と再組み立てを
/// まとめた wasm-bindgen エクスポートクラス。
///
/// ## 内部アーキテクチャ
///
/// ```text
/// ChatClient
///   └── Rc<RefCell<Inner>>
///         ├── Session          (chatlink-session) - 状態機械・再接続・送信キュー・再組み立て
///         │     ├── WsTransport    - web_sys::WebSocket（イベントは Weak 経由で戻ってくる）
///         │     └── JsCollaborator - 通知を溜めて JS コールバックへ
///         └── setTimeout 1 つ  - Session::next_deadline() に合わせて張り直す
/// ```
///
/// ## スレッド安全性
///
/// WASM はシングルスレッドのため、`Rc<RefCell<_>>` で共有する。
/// イベント・タイマー・JS からの呼び出しは 1 つずつ最後まで実行される。
#[wasm_bindgen]
pub struct ChatClient {
    inner: Rc<RefCell<Inner>>,
}

#[wasm_bindgen]
impl ChatClient {
    /// クライアントを初期化する（まだ接続しない）
    ///
    /// # 引数
    /// - `config_json`: `ClientConfig` の JSON。省略時はデフォルト設定
    /// - `callbacks`: `onTextMessage(text)`, `onImageReady(blob)`, `onAudioReady(blob)`,
    ///   `onAuthorized(peerId)`, `onRejected(reason)`, `onRedirectRequired()`,
    ///   `onServerError(detail)`, `onStreamFinished(report)`, `onStateChanged(state)`,
    ///   `getSelectedPeer()` を持つオブジェクト（どれも省略可）
    ///
    /// # エラー
    /// - 設定 JSON の解析失敗
    ///
    /// # 例（TypeScript）
    /// ```typescript
    /// const client = new ChatClient(null, {
    ///     onTextMessage: (text) => addAssistantMessage(text),
    ///     onImageReady: (blob) => addAssistantImage(URL.createObjectURL(blob)),
    ///     onAudioReady: (blob) => new Audio(URL.createObjectURL(blob)).play(),
    /// });
    /// client.connect();
    /// ```
    #[wasm_bindgen(constructor)]
    pub fn new(config_json: Option<String>, callbacks: JsValue) -> Result<ChatClient, JsError> {
        let config = ClientConfig::from_json(config_json.as_deref())
            .map_err(|e| JsError::new(&format!("Invalid client config: {}", e)))?;
        let callbacks = Callbacks::from_js(&callbacks);

        log::info!("ChatClient for {} ({:?})", config.url, config.session.access);
        let inner =
            Rc::new_cyclic(|weak| RefCell::new(Inner::new(config, callbacks, weak.clone())));
        Ok(ChatClient { inner })
    }

    /// 接続を開始する
    ///
    /// 既に接続中・接続済みなら何もしない。
    ///
    /// # 戻り値
    /// 新しい WebSocket を作ったか
    pub fn connect(&self) -> bool {
        with_session(&self.inner, |session, now| session.open(now)).unwrap_or(false)
    }

    /// 接続を終了する（再接続もしない）
    pub fn disconnect(&self) {
        with_session(&self.inner, |session, _| session.shutdown());
    }

    /// 接続先ピアを設定する（`null` で解除）
    ///
    /// 次の `connect()` から使われる。
    #[wasm_bindgen(js_name = "selectPeer")]
    pub fn select_peer(&self, peer: Option<String>) {
        with_session(&self.inner, |session, _| {
            session.collaborator_mut().set_peer(peer)
        });
    }

    /// テキストを送る
    ///
    /// # 戻り値
    /// 送信できたか（未接続なら `false`）
    #[wasm_bindgen(js_name = "sendText")]
    pub fn send_text(&self, text: &str) -> bool {
        with_session(&self.inner, |session, _| session.send_text(text)).unwrap_or(false)
    }

    /// 画像（JPEG）を送る
    ///
    /// 1024 バイトずつに分割し、10ms 間隔で送る。完了は `onStreamFinished` でも通知する。
    ///
    /// # 戻り値
    /// `Promise<boolean>`: end マーカーまで送り切れたか。
    /// 未接続、または途中で接続が閉じた場合は `false`
    #[wasm_bindgen(js_name = "sendImage")]
    pub fn send_image(&self, bytes: &[u8]) -> Promise {
        send_media(&self.inner, MediaKind::Image, bytes.to_vec())
    }

    /// 音声（WebM）を送る
    #[wasm_bindgen(js_name = "sendAudio")]
    pub fn send_audio(&self, bytes: &[u8]) -> Promise {
        send_media(&self.inner, MediaKind::Audio, bytes.to_vec())
    }

    /// `Blob`（ファイル選択・MediaRecorder の出力）の画像を送る
    ///
    /// # 戻り値
    /// `Promise<boolean>`: `sendImage` と同じ
    #[wasm_bindgen(js_name = "sendImageBlob")]
    pub fn send_image_blob(&self, blob: Blob) -> Promise {
        self.send_blob(MediaKind::Image, blob)
    }

    /// `Blob` の音声を送る
    #[wasm_bindgen(js_name = "sendAudioBlob")]
    pub fn send_audio_blob(&self, blob: Blob) -> Promise {
        self.send_blob(MediaKind::Audio, blob)
    }

    /// 現在の状態（`"disconnected"` / `"connecting"` / `"awaiting_authorization"` / `"active"`）
    #[wasm_bindgen(getter)]
    pub fn state(&self) -> String {
        self.read(|session| session.state())
            .unwrap_or_default()
            .as_str()
            .to_string()
    }

    /// 送受信可能か
    #[wasm_bindgen(js_name = "isReady")]
    pub fn is_ready(&self) -> bool {
        self.read(|session| session.is_ready()).unwrap_or(false)
    }

    /// セッション統計を JSON 文字列で返す
    ///
    /// # 戻り値
    /// JSON 文字列:
    /// ```json
    /// {
    ///   "state": "active",
    ///   "connection_attempts": 2,
    ///   "reconnects_scheduled": 1,
    ///   "frames_sent": 42,
    ///   "bytes_sent": 40960,
    ///   "images_received": 1,
    ///   "streams_completed": 3
    /// }
    /// ```
    #[wasm_bindgen(js_name = "getStats")]
    pub fn get_stats(&self) -> Result<String, JsError> {
        let stats = self
            .read(|session| session.stats())
            .ok_or_else(|| JsError::new("ChatClient is busy"))?;
        serde_json::to_string(&stats)
            .map_err(|e| JsError::new(&format!("Failed to serialize stats: {}", e)))
    }
}

impl ChatClient {
    fn send_blob(&self, kind: MediaKind, blob: Blob) -> Promise {
        let shared = self.inner.clone();
        future_to_promise(async move {
            let buffer = JsFuture::from(blob.array_buffer()).await?;
            let bytes = Uint8Array::new(&buffer).to_vec();
            JsFuture::from(send_media(&shared, kind, bytes)).await
        })
    }

    /// 状態を読むだけの操作（通知もタイマーも動かない）
    fn read<R>(&self, f: impl FnOnce(&ChatSession) -> R) -> Option<R> {
        self.inner.try_borrow().ok().map(|inner| f(&inner.session))
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        let settled = match self.inner.try_borrow_mut() {
            Ok(mut inner) => {
                inner.cancel_timer();
                inner.session.shutdown();
                // 中断したストリームの Promise は false で解決する
                inner.session.collaborator_mut().take_settled().1
            }
            Err(_) => return,
        };
        resolve_sends(settled);
    }
}
