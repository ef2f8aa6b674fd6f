//! Chat gateway seam: inbound event model, outbound messages and the send trait.

pub mod telegram;

use futures::future::BoxFuture;
use thiserror::Error;

use crate::state::session::{ChatId, UserId};

/// Identity of whoever produced an inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    /// Gateway user identifier.
    pub id: UserId,
    /// Given name.
    pub first_name: String,
    /// Family name, empty when unknown.
    pub last_name: String,
    /// Handle, possibly prefixed with `@`, empty when unknown.
    pub username: String,
    /// Client language, empty when unknown.
    pub language_code: String,
}

/// Kind of conversation an event originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    /// One-to-one conversation with the bot.
    Private,
    /// Group or supergroup.
    Group,
    /// Broadcast channel.
    Channel,
}

/// Conversation descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chat {
    /// Gateway chat identifier.
    pub id: ChatId,
    /// Private, group or channel.
    pub kind: ChatKind,
}

/// Plain text message, either a command or a free-text reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextMessage {
    /// Chat the message was posted in.
    pub chat: Chat,
    /// Author of the message.
    pub from: Option<Sender>,
    /// Message text, empty for non-text messages (stickers, photos).
    pub text: String,
}

/// Press on an interactive button rendered by an engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonPress {
    /// Gateway identifier of the callback query.
    pub id: String,
    /// Who pressed the button.
    pub from: Sender,
    /// Chat of the message carrying the button, when still available.
    pub chat_id: Option<ChatId>,
    /// Opaque button payload.
    pub data: String,
}

/// Content of an inbound event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    /// Text message.
    Message(TextMessage),
    /// Interactive-control callback.
    Button(ButtonPress),
    /// Anything the bot does not handle (edits, channel posts, ...).
    Unsupported,
}

/// Single inbound event in gateway order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundEvent {
    /// Monotonic gateway sequence number.
    pub update_id: i64,
    /// Event content.
    pub payload: EventPayload,
}

impl InboundEvent {
    /// Build a text event, mostly useful for tests and engines replaying input.
    pub fn text(update_id: i64, chat: Chat, from: Sender, text: impl Into<String>) -> Self {
        Self {
            update_id,
            payload: EventPayload::Message(TextMessage {
                chat,
                from: Some(from),
                text: text.into(),
            }),
        }
    }

    /// Build a button-press event.
    pub fn button(update_id: i64, chat_id: ChatId, from: Sender, data: impl Into<String>) -> Self {
        Self {
            update_id,
            payload: EventPayload::Button(ButtonPress {
                id: update_id.to_string(),
                from,
                chat_id: Some(chat_id),
                data: data.into(),
            }),
        }
    }

    /// Sender of the event, if the gateway reported one.
    pub fn sender(&self) -> Option<&Sender> {
        match &self.payload {
            EventPayload::Message(message) => message.from.as_ref(),
            EventPayload::Button(press) => Some(&press.from),
            EventPayload::Unsupported => None,
        }
    }

    /// Chat the event belongs to.
    pub fn chat_id(&self) -> Option<ChatId> {
        match &self.payload {
            EventPayload::Message(message) => Some(message.chat.id),
            EventPayload::Button(press) => press.chat_id,
            EventPayload::Unsupported => None,
        }
    }

    /// Message text or button payload.
    pub fn content(&self) -> &str {
        match &self.payload {
            EventPayload::Message(message) => &message.text,
            EventPayload::Button(press) => &press.data,
            EventPayload::Unsupported => "",
        }
    }
}

/// Button rendered under a message; the payload comes back as a [`ButtonPress`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineButton {
    /// Label.
    pub text: String,
    /// Payload sent back when pressed.
    pub data: String,
}

/// Keyboard attached to an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Keyboard {
    /// Leave the current keyboard untouched.
    #[default]
    None,
    /// Persistent reply keyboard; each button sends its label as text.
    Reply(Vec<Vec<String>>),
    /// Buttons attached to the message itself.
    Inline(Vec<Vec<InlineButton>>),
    /// Hide the reply keyboard.
    Remove,
}

/// Message sent through the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Destination chat.
    pub chat_id: ChatId,
    /// Message body.
    pub text: String,
    /// Whether the body uses Markdown markup.
    pub markdown: bool,
    /// Optional keyboard.
    pub keyboard: Keyboard,
}

impl OutboundMessage {
    /// Markdown message without keyboard changes.
    pub fn new(chat_id: ChatId, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            text: text.into(),
            markdown: true,
            keyboard: Keyboard::None,
        }
    }

    /// Attach a keyboard.
    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = keyboard;
        self
    }
}

/// Failures raised while talking to the chat gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Building the HTTP client failed.
    #[error("failed to build gateway client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// The request could not be sent.
    #[error("failed to call gateway method `{method}`")]
    Request {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },
    /// The response body could not be decoded.
    #[error("failed to decode gateway response for `{method}`")]
    Decode {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },
    /// The gateway answered with an error payload.
    #[error("gateway method `{method}` failed with code {code}: {description}")]
    Api {
        method: &'static str,
        code: i32,
        description: String,
    },
    /// The outbound channel is gone (shutdown in progress).
    #[error("gateway closed")]
    Closed,
}

/// Outbound half of the chat gateway.
pub trait ChatGateway: Send + Sync {
    /// Deliver a message. Failures are reported, never retried by the caller.
    fn send(&self, message: OutboundMessage) -> BoxFuture<'static, Result<(), GatewayError>>;
}
