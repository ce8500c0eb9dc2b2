//! Telegram bot client - simple polling version.

use std::path::Path;
use std::sync::Arc;

use teloxide::prelude::*;
use teloxide::types::BotCommand;
use teloxide::RequestError;

use crate::core::dispatcher::{Dispatcher, InboundEvent};
use crate::core::task::MediaRef;
use crate::error::Error;

const GREETING: &str = "Hi! Send me a message or a voice note and I'll answer. \
Use /reset to start a fresh conversation.";

/// Run the telegram bot until Ctrl-C.
pub async fn run_telegram_daemon(bot: Bot, dispatcher: Arc<Dispatcher>) -> Result<(), Error> {
    tracing::info!("Starting Telegram bot...");

    if let Err(e) = bot
        .set_my_commands(vec![
            BotCommand::new("start", "Show greeting"),
            BotCommand::new("reset", "Start a new conversation"),
        ])
        .await
    {
        tracing::warn!("Failed to set commands: {}", e);
    }

    tracing::info!("Telegram bot commands set");

    // teloxide handles updates of one chat sequentially, so events reach the
    // dispatcher in arrival order per user.
    teloxide::repl(bot, move |bot: Bot, msg: Message| {
        let dispatcher = Arc::clone(&dispatcher);
        async move { handle_message(bot, msg, &dispatcher).await }
    })
    .await;

    tracing::info!("Telegram bot stopped");
    Ok(())
}

/// Handle incoming messages.
async fn handle_message(bot: Bot, msg: Message, dispatcher: &Dispatcher) -> Result<(), RequestError> {
    if let Some(text) = msg.text() {
        if text.starts_with('/') {
            return handle_command(bot, &msg, text, dispatcher).await;
        }
    }

    let event = inbound_event(&msg);
    if event.text.is_none() && event.voice.is_none() {
        tracing::debug!("Ignoring unsupported message {} in chat {}", msg.id.0, msg.chat.id.0);
        return Ok(());
    }

    dispatcher.on_event(event);
    Ok(())
}

async fn handle_command(
    bot: Bot,
    msg: &Message,
    text: &str,
    dispatcher: &Dispatcher,
) -> Result<(), RequestError> {
    let command = command_name(text);
    let chat_id = msg.chat.id;

    match command.as_str() {
        "/start" | "/help" => {
            bot.send_message(chat_id, GREETING).await?;
        }
        "/reset" => {
            // Queued behind the user's pending messages, which still finish
            // on the old thread.
            let mut event = InboundEvent::reset(&chat_id.0.to_string());
            event.sender = msg.from.as_ref().map(|u| u.full_name());
            dispatcher.on_event(event);
        }
        _ => {
            // Unknown commands go to the assistant as plain text.
            dispatcher.on_event(inbound_event(msg));
        }
    }

    Ok(())
}

/// "/reset@my_bot now" -> "/reset"
fn command_name(text: &str) -> String {
    text.split_whitespace()
        .next()
        .and_then(|token| token.split('@').next())
        .unwrap_or("")
        .to_lowercase()
}

/// Build the dispatcher's view of a Telegram message.
fn inbound_event(msg: &Message) -> InboundEvent {
    let sender = msg.from.as_ref().map(|u| u.full_name());

    let text = msg
        .text()
        .or_else(|| msg.caption())
        .map(str::to_string)
        .filter(|t| !t.trim().is_empty());

    let voice = if let Some(voice) = msg.voice() {
        Some(MediaRef {
            file_id: voice.file.id.to_string(),
            extension: "ogg".to_string(),
        })
    } else {
        msg.audio().map(|audio| MediaRef {
            file_id: audio.file.id.to_string(),
            extension: audio
                .file_name
                .as_deref()
                .and_then(extension_of)
                .unwrap_or_else(|| "mp3".to_string()),
        })
    };

    InboundEvent {
        user_key: Some(msg.chat.id.0.to_string()),
        sender,
        text,
        voice,
        reset: false,
    }
}

fn extension_of(file_name: &str) -> Option<String> {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}
