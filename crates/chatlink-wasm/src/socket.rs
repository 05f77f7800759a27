//! ブラウザの `WebSocket` を使った `Transport` 実装
//!
//! 接続ごとに `WebSocket` を作り直す。イベントハンドラはその接続の
//! `ConnectionId` を持っていて、セッション側で古い接続のイベントを捨てられる。

use std::cell::RefCell;
use std::rc::Weak;

use chatlink_session::{ConnectionId, Transport, TransportError};
use js_sys::{ArrayBuffer, Uint8Array};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{BinaryType, CloseEvent, Event, MessageEvent, WebSocket};

use crate::client::{self, Inner};

/// 開いている WebSocket とそのイベントハンドラ
///
/// ハンドラの `Closure` はソケットと同じ寿命で保持する。
struct Socket {
    id: ConnectionId,
    ws: WebSocket,
    _on_open: Closure<dyn FnMut(Event)>,
    _on_message: Closure<dyn FnMut(MessageEvent)>,
    _on_close: Closure<dyn FnMut(CloseEvent)>,
    _on_error: Closure<dyn FnMut(Event)>,
}

impl Socket {
    /// ハンドラを外してから閉じる（閉じた後のイベントは届かない）
    fn shutdown(self) {
        self.ws.set_onopen(None);
        self.ws.set_onmessage(None);
        self.ws.set_onclose(None);
        self.ws.set_onerror(None);
        if let Err(e) = self.ws.close() {
            log::warn!("WebSocket {} close failed: {}", self.id, js_error_text(&e));
        }
    }
}

/// `web_sys::WebSocket` によるトランスポート
pub struct WsTransport {
    url: String,
    shared: Weak<RefCell<Inner>>,
    socket: Option<Socket>,
}

impl WsTransport {
    pub(crate) fn new(url: String, shared: Weak<RefCell<Inner>>) -> Self {
        WsTransport {
            url,
            shared,
            socket: None,
        }
    }

    /// 指定の接続が開いていればその WebSocket を返す
    fn open_socket(&self, id: ConnectionId) -> Result<&WebSocket, TransportError> {
        match &self.socket {
            Some(socket) if socket.id == id && socket.ws.ready_state() == WebSocket::OPEN => {
                Ok(&socket.ws)
            }
            _ => Err(TransportError::NotOpen),
        }
    }
}

impl Transport for WsTransport {
    fn connect(&mut self, id: ConnectionId) -> Result<(), TransportError> {
        if let Some(old) = self.socket.take() {
            old.shutdown();
        }

        let ws = WebSocket::new(&self.url)
            .map_err(|e| TransportError::ConnectFailed(js_error_text(&e)))?;
        ws.set_binary_type(BinaryType::Arraybuffer);

        let shared = self.shared.clone();
        let on_open = Closure::<dyn FnMut(Event)>::new(move |_: Event| {
            client::dispatch_event(&shared, |session, now| session.handle_open(id, now));
        });

        let shared = self.shared.clone();
        let on_message = Closure::<dyn FnMut(MessageEvent)>::new(move |event: MessageEvent| {
            let data = event.data();
            if let Some(text) = data.as_string() {
                client::dispatch_event(&shared, |session, now| {
                    session.handle_text(id, &text, now)
                });
            } else if let Ok(buffer) = data.dyn_into::<ArrayBuffer>() {
                let bytes = Uint8Array::new(&buffer).to_vec();
                client::dispatch_event(&shared, |session, now| {
                    session.handle_binary(id, &bytes, now)
                });
            } else {
                log::warn!("WebSocket {} delivered an unsupported message type", id);
            }
        });

        let shared = self.shared.clone();
        let on_close = Closure::<dyn FnMut(CloseEvent)>::new(move |event: CloseEvent| {
            log::info!(
                "WebSocket {} closed (code {}, reason {:?})",
                id,
                event.code(),
                event.reason()
            );
            client::dispatch_event(&shared, |session, now| session.handle_close(id, now));
        });

        let shared = self.shared.clone();
        let on_error = Closure::<dyn FnMut(Event)>::new(move |_: Event| {
            client::dispatch_event(&shared, |session, now| session.handle_error(id, now));
        });

        ws.set_onopen(Some(on_open.as_ref().unchecked_ref()));
        ws.set_onmessage(Some(on_message.as_ref().unchecked_ref()));
        ws.set_onclose(Some(on_close.as_ref().unchecked_ref()));
        ws.set_onerror(Some(on_error.as_ref().unchecked_ref()));

        log::debug!("WebSocket {} connecting to {}", id, self.url);
        self.socket = Some(Socket {
            id,
            ws,
            _on_open: on_open,
            _on_message: on_message,
            _on_close: on_close,
            _on_error: on_error,
        });
        Ok(())
    }

    fn send_text(&mut self, id: ConnectionId, text: &str) -> Result<(), TransportError> {
        self.open_socket(id)?
            .send_with_str(text)
            .map_err(|e| TransportError::SendFailed(js_error_text(&e)))
    }

    fn send_binary(&mut self, id: ConnectionId, bytes: &[u8]) -> Result<(), TransportError> {
        self.open_socket(id)?
            .send_with_u8_array(bytes)
            .map_err(|e| TransportError::SendFailed(js_error_text(&e)))
    }

    fn close(&mut self, id: ConnectionId) {
        if self.socket.as_ref().is_some_and(|socket| socket.id == id) {
            if let Some(socket) = self.socket.take() {
                socket.shutdown();
            }
        }
    }
}

/// JS の例外値をログ用の文字列にする
pub(crate) fn js_error_text(value: &JsValue) -> String {
    if let Some(text) = value.as_string() {
        return text;
    }
    if let Some(error) = value.dyn_ref::<js_sys::Error>() {
        return String::from(error.message());
    }
    format!("{:?}", value)
}
