use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::{
    gateway::{
        ButtonPress, Chat, ChatKind, EventPayload, InboundEvent, Keyboard, OutboundMessage, Sender,
        TextMessage,
    },
    state::session::UserId,
};

const PARSE_MODE_MARKDOWN: &str = "Markdown";

/// Envelope wrapping every Bot API response.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub error_code: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<TgMessage>,
    #[serde(default)]
    pub callback_query: Option<TgCallbackQuery>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgMessage {
    pub message_id: i64,
    #[serde(default)]
    pub from: Option<TgUser>,
    pub chat: TgChat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub language_code: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TgCallbackQuery {
    pub id: String,
    pub from: TgUser,
    #[serde(default)]
    pub message: Option<TgMessage>,
    #[serde(default)]
    pub data: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookInfo {
    pub url: String,
    #[serde(default)]
    pub pending_update_count: u64,
    #[serde(default)]
    pub last_error_date: Option<i64>,
    #[serde(default)]
    pub last_error_message: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GetUpdatesRequest {
    pub offset: i64,
    pub timeout: u64,
    pub allowed_updates: &'static [&'static str],
}

#[derive(Debug, Serialize)]
pub struct SetWebhookRequest<'a> {
    pub url: &'a str,
}

#[derive(Debug, Serialize)]
pub struct DeleteWebhookRequest {
    pub drop_pending_updates: bool,
}

#[derive(Debug, Serialize)]
pub struct SendMessageRequest {
    pub chat_id: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_mode: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply_markup: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct EmptyRequest {}

impl From<OutboundMessage> for SendMessageRequest {
    fn from(message: OutboundMessage) -> Self {
        Self {
            chat_id: message.chat_id,
            text: message.text,
            parse_mode: message.markdown.then_some(PARSE_MODE_MARKDOWN),
            reply_markup: reply_markup(&message.keyboard),
        }
    }
}

fn reply_markup(keyboard: &Keyboard) -> Option<Value> {
    match keyboard {
        Keyboard::None => None,
        Keyboard::Reply(rows) => Some(json!({
            "keyboard": rows
                .iter()
                .map(|row| row.iter().map(|text| json!({ "text": text })).collect::<Vec<_>>())
                .collect::<Vec<_>>(),
            "resize_keyboard": true,
        })),
        Keyboard::Inline(rows) => Some(json!({
            "inline_keyboard": rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|button| json!({ "text": button.text, "callback_data": button.data }))
                        .collect::<Vec<_>>()
                })
                .collect::<Vec<_>>(),
        })),
        Keyboard::Remove => Some(json!({ "remove_keyboard": true })),
    }
}

impl From<TgUser> for Sender {
    fn from(value: TgUser) -> Self {
        Self {
            id: UserId(value.id),
            first_name: value.first_name,
            last_name: value.last_name.unwrap_or_default(),
            username: value.username.unwrap_or_default(),
            language_code: value.language_code.unwrap_or_default(),
        }
    }
}

impl From<TgChat> for Chat {
    fn from(value: TgChat) -> Self {
        let kind = match value.kind.as_str() {
            "private" => ChatKind::Private,
            "group" | "supergroup" => ChatKind::Group,
            _ => ChatKind::Channel,
        };
        Self { id: value.id, kind }
    }
}

impl From<Update> for InboundEvent {
    fn from(update: Update) -> Self {
        let payload = match (update.message, update.callback_query) {
            (Some(message), _) => EventPayload::Message(TextMessage {
                chat: message.chat.into(),
                from: message.from.map(Into::into),
                text: message.text.unwrap_or_default(),
            }),
            (None, Some(query)) => EventPayload::Button(ButtonPress {
                id: query.id,
                from: query.from.into(),
                chat_id: query.message.map(|message| message.chat.id),
                data: query.data.unwrap_or_default(),
            }),
            (None, None) => EventPayload::Unsupported,
        };

        Self {
            update_id: update.update_id,
            payload,
        }
    }
}
