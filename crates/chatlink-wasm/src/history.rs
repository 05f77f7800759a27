//! 会話履歴
//!
//! ダッシュボードが localStorage の `conversations` キーに保存している JSON と
//! 同じ形で読み書きする。保存先そのものはホスト（JS）側の責任。
//!
//! ```json
//! [{
//!   "id": 1718000000000,
//!   "title": "What is on this pictur...",
//!   "messages": [
//!     { "type": "user", "text": "What is on this picture?", "timestamp": 1718000000100 },
//!     { "type": "user", "imageData": "data:image/jpeg;base64,/9j/...", "timestamp": 1718000000200 },
//!     { "type": "assistant", "text": "A cat.", "timestamp": 1718000001000 }
//!   ],
//!   "timestamp": 1718000001000
//! }]
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chatlink_frame::MediaKind;
use serde::{Deserialize, Serialize};
use wasm_bindgen::prelude::*;

/// 新しい会話のタイトル
pub const NEW_CHAT_TITLE: &str = "New Chat";

/// タイトルに使う最初のメッセージの最大文字数
pub const TITLE_MAX_CHARS: usize = 30;

/// 発言者
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// 履歴の 1 メッセージ
///
/// `text` / `imageData` / `audioData` のうちどれか 1 つを持つ。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    #[serde(rename = "type")]
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_data: Option<String>,
    pub timestamp: u64,
}

impl HistoryEntry {
    fn new(role: Role, timestamp: u64) -> Self {
        HistoryEntry {
            role,
            text: None,
            image_data: None,
            audio_data: None,
            timestamp,
        }
    }

    /// テキストメッセージ
    pub fn text(role: Role, text: &str, timestamp: u64) -> Self {
        HistoryEntry {
            text: Some(String::from(text)),
            ..HistoryEntry::new(role, timestamp)
        }
    }

    /// 画像・音声メッセージ（data URL で保存する）
    ///
    /// `mime` が空なら種別のデフォルト（`image/jpeg` / `audio/webm`）を使う。
    pub fn media(role: Role, kind: MediaKind, mime: &str, bytes: &[u8], timestamp: u64) -> Self {
        let mime = if mime.is_empty() { kind.mime_type() } else { mime };
        let url = data_url(mime, bytes);
        let mut entry = HistoryEntry::new(role, timestamp);
        match kind {
            MediaKind::Image => entry.image_data = Some(url),
            MediaKind::Audio => entry.audio_data = Some(url),
        }
        entry
    }
}

/// `data:<mime>;base64,<payload>` を作る
pub fn data_url(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, STANDARD.encode(bytes))
}

/// 会話 1 つ分
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// 作成時刻（ミリ秒）を ID にする
    pub id: u64,
    pub title: String,
    pub messages: Vec<HistoryEntry>,
    /// 最終更新時刻
    pub timestamp: u64,
}

impl Conversation {
    /// 新しい会話を始める
    pub fn new(now_ms: u64) -> Self {
        Conversation {
            id: now_ms,
            title: String::from(NEW_CHAT_TITLE),
            messages: Vec::new(),
            timestamp: now_ms,
        }
    }

    /// メッセージを追加する
    ///
    /// 最初のメッセージがユーザーのテキストなら、それをタイトルにする。
    pub fn push(&mut self, entry: HistoryEntry) {
        if self.messages.is_empty() && entry.role == Role::User {
            if let Some(text) = entry.text.as_deref() {
                self.title = title_from(text);
            }
        }
        self.timestamp = entry.timestamp;
        self.messages.push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

fn title_from(text: &str) -> String {
    match text.char_indices().nth(TITLE_MAX_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => String::from(text),
    }
}

/// 保存済みの会話一覧（新しいものが先頭）
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationStore {
    conversations: Vec<Conversation>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 保存済み JSON から読み込む（空文字列は空の一覧）
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        if json.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(json)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// 会話を保存する
    ///
    /// 同じ ID があればその位置で置き換え、なければ先頭に追加する。
    pub fn save(&mut self, conversation: &Conversation) {
        match self
            .conversations
            .iter_mut()
            .find(|c| c.id == conversation.id)
        {
            Some(existing) => *existing = conversation.clone(),
            None => self.conversations.insert(0, conversation.clone()),
        }
    }

    pub fn find(&self, id: u64) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id == id)
    }

    pub fn clear(&mut self) {
        self.conversations.clear();
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Conversation> {
        self.conversations.iter()
    }
}

/// 会話履歴の wasm-bindgen エクスポート
///
/// 表示中の会話と保存済み一覧を持つ。記録するたびに一覧へ保存されるので、
/// ホストは `toJson()` の結果を localStorage に書けばよい。
///
/// ```typescript
/// const history = new ChatHistory(localStorage.getItem('conversations'), Date.now());
/// history.recordUserText("hello", Date.now());
/// localStorage.setItem('conversations', history.toJson());
/// ```
#[wasm_bindgen]
pub struct ChatHistory {
    current: Conversation,
    store: ConversationStore,
}

#[wasm_bindgen]
impl ChatHistory {
    /// 保存済み JSON（なければ `null`）から履歴を復元し、新しい会話を始める
    #[wasm_bindgen(constructor)]
    pub fn new(stored_json: Option<String>, now_ms: f64) -> Result<ChatHistory, JsError> {
        let store = ConversationStore::from_json(stored_json.as_deref().unwrap_or(""))
            .map_err(|e| JsError::new(&format!("Invalid conversation history: {}", e)))?;
        Ok(ChatHistory {
            current: Conversation::new(now_ms as u64),
            store,
        })
    }

    #[wasm_bindgen(js_name = "recordUserText")]
    pub fn record_user_text(&mut self, text: &str, now_ms: f64) {
        self.record(HistoryEntry::text(Role::User, text, now_ms as u64));
    }

    #[wasm_bindgen(js_name = "recordAssistantText")]
    pub fn record_assistant_text(&mut self, text: &str, now_ms: f64) {
        self.record(HistoryEntry::text(Role::Assistant, text, now_ms as u64));
    }

    /// 送った画像を記録する
    ///
    /// `mime` にはファイルの `type`（`file.type`）を渡す。省略・空文字列なら `image/jpeg`。
    #[wasm_bindgen(js_name = "recordUserImage")]
    pub fn record_user_image(&mut self, bytes: &[u8], mime: Option<String>, now_ms: f64) {
        self.record_media(MediaKind::Image, bytes, mime, now_ms);
    }

    /// 送った音声を記録する（`mime` 省略時は `audio/webm`）
    #[wasm_bindgen(js_name = "recordUserAudio")]
    pub fn record_user_audio(&mut self, bytes: &[u8], mime: Option<String>, now_ms: f64) {
        self.record_media(MediaKind::Audio, bytes, mime, now_ms);
    }

    /// 新しい会話を始める（前の会話は保存済み）
    #[wasm_bindgen(js_name = "startNewChat")]
    pub fn start_new_chat(&mut self, now_ms: f64) {
        self.current = Conversation::new(now_ms as u64);
    }

    /// 保存済みの会話を表示中にする
    ///
    /// # 戻り値
    /// 会話が見つかったか
    pub fn load(&mut self, id: f64) -> bool {
        match self.store.find(id as u64) {
            Some(conversation) => {
                self.current = conversation.clone();
                true
            }
            None => false,
        }
    }

    /// 全履歴を削除する（表示中の会話はそのまま）
    pub fn clear(&mut self) {
        self.store.clear();
    }

    #[wasm_bindgen(getter)]
    pub fn title(&self) -> String {
        self.current.title.clone()
    }

    #[wasm_bindgen(getter, js_name = "currentId")]
    pub fn current_id(&self) -> f64 {
        self.current.id as f64
    }

    /// 表示中の会話の JSON
    #[wasm_bindgen(js_name = "currentJson")]
    pub fn current_json(&self) -> Result<String, JsError> {
        serde_json::to_string(&self.current)
            .map_err(|e| JsError::new(&format!("Failed to serialize conversation: {}", e)))
    }

    /// 保存用の JSON（localStorage の `conversations` にそのまま書ける）
    #[wasm_bindgen(js_name = "toJson")]
    pub fn to_json(&self) -> Result<String, JsError> {
        self.store
            .to_json()
            .map_err(|e| JsError::new(&format!("Failed to serialize history: {}", e)))
    }
}

impl ChatHistory {
    fn record(&mut self, entry: HistoryEntry) {
        self.current.push(entry);
        self.store.save(&self.current);
    }

    fn record_media(&mut self, kind: MediaKind, bytes: &[u8], mime: Option<String>, now_ms: f64) {
        let mime = mime.unwrap_or_default();
        self.record(HistoryEntry::media(Role::User, kind, &mime, bytes, now_ms as u64));
    }
}
