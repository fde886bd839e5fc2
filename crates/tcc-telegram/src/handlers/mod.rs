//! Telegram update handlers.
//!
//! Every message goes through the allow-list first; commands are dispatched
//! by name, anything else gets a short hint.

use std::sync::Arc;

use teloxide::{prelude::*, types::Message};

use tcc_core::domain::{ChatId, MessageId, MessageRef, UserId};
use tcc_core::security::is_authorized;

use crate::router::AppState;

mod clone;
mod commands;
mod login;

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    if !msg.chat.is_private() {
        tracing::debug!(chat_id = msg.chat.id.0, "ignoring non-private chat");
        return Ok(());
    }

    let chat_id = ChatId(msg.chat.id.0);
    let user_id = msg.from().map(|u| UserId(u.id.0 as i64));

    if !is_authorized(user_id, &state.cfg.allowed_users) {
        tracing::warn!(user = ?user_id.map(|u| u.0), "unauthorized access attempt");
        reply(&state, chat_id, "⛔ You are not authorized to use this bot.").await;
        return Ok(());
    }
    let Some(user_id) = user_id else {
        return Ok(());
    };

    match msg.text() {
        Some(text) if text.starts_with('/') => {
            let msg_ref = MessageRef {
                chat_id,
                message_id: MessageId(msg.id.0),
            };
            commands::handle_command(&state, user_id, msg_ref, text).await;
        }
        Some(_) => {
            tracing::info!(user = user_id.0, "non-command message");
            reply(&state, chat_id, "Send /help to see what I can do.").await;
        }
        None => {
            tracing::debug!(user = user_id.0, "non-text message ignored");
        }
    }

    Ok(())
}

/// Send an HTML reply, logging instead of failing.
pub(crate) async fn reply(state: &AppState, chat_id: ChatId, html: &str) -> Option<MessageRef> {
    match state.messenger.send_html(chat_id, html).await {
        Ok(r) => Some(r),
        Err(e) => {
            tracing::warn!(chat_id = chat_id.0, "reply failed: {e}");
            None
        }
    }
}

/// Replace the text of an earlier reply, falling back to a fresh message.
pub(crate) async fn update(state: &AppState, status: Option<MessageRef>, chat_id: ChatId, html: &str) {
    if let Some(msg) = status {
        match state.messenger.edit_html(msg, html).await {
            Ok(()) => return,
            Err(e) => tracing::debug!(chat_id = chat_id.0, "status edit failed: {e}"),
        }
    }
    reply(state, chat_id, html).await;
}
