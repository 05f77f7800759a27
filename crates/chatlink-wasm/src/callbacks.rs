//! JS コールバックとの橋渡し
//!
//! セッションからの通知はいったん `Notice` として溜め、セッションの借用を
//! 手放してから JS に渡す。コールバックの中から `ChatClient` を呼び直しても
//! 二重借用にならない。

use std::collections::BTreeMap;

use chatlink_frame::{MediaKind, MediaObject};
use chatlink_session::{Collaborator, SessionState, StreamId, StreamReport};
use js_sys::{Array, Function, Object, Reflect, Uint8Array};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Blob, BlobPropertyBag};

/// セッションから UI への通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    RedirectRequired,
    Authorized(String),
    Rejected(String),
    ServerError(String),
    Text(String),
    Media(MediaObject),
    StreamFinished(StreamReport),
    StateChanged(SessionState),
}

/// コンストラクタに渡されたコールバック群
///
/// どれも省略可能。
#[derive(Debug, Clone, Default)]
pub struct Callbacks {
    on_text_message: Option<Function>,
    on_image_ready: Option<Function>,
    on_audio_ready: Option<Function>,
    on_authorized: Option<Function>,
    on_rejected: Option<Function>,
    on_redirect_required: Option<Function>,
    on_server_error: Option<Function>,
    on_stream_finished: Option<Function>,
    on_state_changed: Option<Function>,
    get_selected_peer: Option<Function>,
}

fn function(obj: &JsValue, name: &str) -> Option<Function> {
    if !obj.is_object() {
        return None;
    }
    Reflect::get(obj, &JsValue::from_str(name))
        .ok()
        .and_then(|value| value.dyn_into::<Function>().ok())
}

fn call(callback: &Option<Function>, name: &str, args: &[&JsValue]) {
    let Some(f) = callback else {
        return;
    };
    let result = match args {
        [] => f.call0(&JsValue::NULL),
        [a] => f.call1(&JsValue::NULL, a),
        [a, b] => f.call2(&JsValue::NULL, a, b),
        _ => {
            let list = Array::new();
            for arg in args {
                list.push(arg);
            }
            f.apply(&JsValue::NULL, &list)
        }
    };
    if let Err(e) = result {
        log::error!("{} callback threw: {:?}", name, e);
    }
}

impl Callbacks {
    /// JS オブジェクトからコールバックを読み取る
    pub fn from_js(obj: &JsValue) -> Self {
        Callbacks {
            on_text_message: function(obj, "onTextMessage"),
            on_image_ready: function(obj, "onImageReady"),
            on_audio_ready: function(obj, "onAudioReady"),
            on_authorized: function(obj, "onAuthorized"),
            on_rejected: function(obj, "onRejected"),
            on_redirect_required: function(obj, "onRedirectRequired"),
            on_server_error: function(obj, "onServerError"),
            on_stream_finished: function(obj, "onStreamFinished"),
            on_state_changed: function(obj, "onStateChanged"),
            get_selected_peer: function(obj, "getSelectedPeer"),
        }
    }

    /// `getSelectedPeer()` の結果（空文字列は未選択扱い）
    ///
    /// セッションの借用中に呼ぶので、この関数から `ChatClient` を呼んではいけない。
    pub fn selected_peer(&self) -> Option<String> {
        let f = self.get_selected_peer.as_ref()?;
        match f.call0(&JsValue::NULL) {
            Ok(value) => value.as_string().filter(|peer| !peer.is_empty()),
            Err(e) => {
                log::error!("getSelectedPeer callback threw: {:?}", e);
                None
            }
        }
    }

    /// 溜まった通知を順にコールバックへ渡す
    pub fn dispatch(&self, notices: Vec<Notice>) {
        for notice in notices {
            self.dispatch_one(notice);
        }
    }

    fn dispatch_one(&self, notice: Notice) {
        match notice {
            Notice::RedirectRequired => {
                call(&self.on_redirect_required, "onRedirectRequired", &[]);
            }
            Notice::Authorized(peer) => {
                call(&self.on_authorized, "onAuthorized", &[&JsValue::from_str(&peer)]);
            }
            Notice::Rejected(reason) => {
                call(&self.on_rejected, "onRejected", &[&JsValue::from_str(&reason)]);
            }
            Notice::ServerError(detail) => {
                call(&self.on_server_error, "onServerError", &[&JsValue::from_str(&detail)]);
            }
            Notice::Text(text) => {
                call(&self.on_text_message, "onTextMessage", &[&JsValue::from_str(&text)]);
            }
            Notice::Media(media) => {
                let (callback, name) = match media.kind {
                    MediaKind::Image => (&self.on_image_ready, "onImageReady"),
                    MediaKind::Audio => (&self.on_audio_ready, "onAudioReady"),
                };
                if callback.is_none() {
                    return;
                }
                match media_blob(&media) {
                    Ok(blob) => call(callback, name, &[&JsValue::from(blob)]),
                    Err(e) => log::error!("Failed to create {} blob: {:?}", media.kind, e),
                }
            }
            Notice::StreamFinished(report) => {
                call(&self.on_stream_finished, "onStreamFinished", &[&report_object(&report)]);
            }
            Notice::StateChanged(state) => {
                call(&self.on_state_changed, "onStateChanged", &[&JsValue::from_str(state.as_str())]);
            }
        }
    }
}

/// 受信したメディアを MIME タイプ付きの Blob にする
fn media_blob(media: &MediaObject) -> Result<Blob, JsValue> {
    let bytes = Uint8Array::from(media.bytes.as_slice());
    let parts = Array::of1(&bytes);
    let options = BlobPropertyBag::new();
    options.set_type(media.mime_type());
    Blob::new_with_u8_array_sequence_and_options(&parts, &options)
}

/// `{ id, kind, totalBytes, framesSent, completed }`
fn report_object(report: &StreamReport) -> JsValue {
    let obj = Object::new();
    let fields: [(&str, JsValue); 5] = [
        ("id", JsValue::from_f64(report.id.0 as f64)),
        ("kind", JsValue::from_str(report.kind.name())),
        ("totalBytes", JsValue::from_f64(report.total_bytes as f64)),
        ("framesSent", JsValue::from_f64(report.frames_sent as f64)),
        ("completed", JsValue::from_bool(report.completed)),
    ];
    for (key, value) in fields {
        if let Err(e) = Reflect::set(&obj, &JsValue::from_str(key), &value) {
            log::warn!("Failed to set stream report field {}: {:?}", key, e);
        }
    }
    obj.into()
}

/// 送信ストリームの完了を待っている呼び出し元
///
/// `send*` の Promise の resolve 関数を `StreamId` ごとに預かり、
/// 同じ ID の `Notice::StreamFinished` が来たら `completed` と一緒に返す。
#[derive(Debug)]
pub struct StreamWaiters<T> {
    pending: BTreeMap<StreamId, T>,
}

impl<T> Default for StreamWaiters<T> {
    fn default() -> Self {
        StreamWaiters {
            pending: BTreeMap::new(),
        }
    }
}

impl<T> StreamWaiters<T> {
    pub fn wait(&mut self, id: StreamId, waiter: T) {
        self.pending.insert(id, waiter);
    }

    /// 通知に含まれる完了・中断に対応する待ち手を取り出す
    pub fn settle(&mut self, notices: &[Notice]) -> Vec<(T, bool)> {
        notices
            .iter()
            .filter_map(|notice| match notice {
                Notice::StreamFinished(report) => self
                    .pending
                    .remove(&report.id)
                    .map(|waiter| (waiter, report.completed)),
                _ => None,
            })
            .collect()
    }
}

/// `Collaborator` の JS 側実装
///
/// 通知は溜めるだけで、`take_settled` で取り出して `Callbacks::dispatch` に渡す。
#[derive(Debug, Default)]
pub struct JsCollaborator {
    callbacks: Callbacks,
    /// `selectPeer` で設定された接続先
    peer: Option<String>,
    notices: Vec<Notice>,
    /// 送信完了待ちの Promise の resolve 関数
    waiters: StreamWaiters<Function>,
}

impl JsCollaborator {
    pub fn new(callbacks: Callbacks) -> Self {
        JsCollaborator {
            callbacks,
            peer: None,
            notices: Vec::new(),
            waiters: StreamWaiters::default(),
        }
    }

    pub fn wait_for_stream(&mut self, id: StreamId, resolve: Function) {
        self.waiters.wait(id, resolve);
    }

    /// 通知を取り出し、完了したストリームの resolve 関数も一緒に返す
    pub fn take_settled(&mut self) -> (Vec<Notice>, Vec<(Function, bool)>) {
        let notices = core::mem::take(&mut self.notices);
        let settled = self.waiters.settle(&notices);
        (notices, settled)
    }

    pub fn callbacks(&self) -> &Callbacks {
        &self.callbacks
    }

    pub fn set_peer(&mut self, peer: Option<String>) {
        self.peer = peer.filter(|peer| !peer.is_empty());
    }

}

impl Collaborator for JsCollaborator {
    fn selected_peer(&self) -> Option<String> {
        self.peer
            .clone()
            .or_else(|| self.callbacks.selected_peer())
    }

    fn on_redirect_required(&mut self) {
        self.notices.push(Notice::RedirectRequired);
    }

    fn on_authorized(&mut self, peer: &str) {
        self.notices.push(Notice::Authorized(String::from(peer)));
    }

    fn on_rejected(&mut self, reason: &str) {
        self.notices.push(Notice::Rejected(String::from(reason)));
    }

    fn on_server_error(&mut self, detail: &str) {
        self.notices.push(Notice::ServerError(String::from(detail)));
    }

    fn on_text_message(&mut self, text: &str) {
        self.notices.push(Notice::Text(String::from(text)));
    }

    fn on_media_ready(&mut self, media: MediaObject) {
        self.notices.push(Notice::Media(media));
    }

    fn on_stream_finished(&mut self, report: StreamReport) {
        self.notices.push(Notice::StreamFinished(report));
    }

    fn on_state_changed(&mut self, state: SessionState) {
        self.notices.push(Notice::StateChanged(state));
    }
}
