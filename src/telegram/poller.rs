//! Telegram long-poll loop.
//!
//! Follows the background poller pattern: fetch, process, back off on error.

use std::sync::Arc;
use std::time::Duration;

use super::client::TelegramClient;
use super::Update;
use crate::broadcast::deliver_blocks;
use crate::commands::dispatch;
use crate::registry::Recipient;
use crate::state::AppState;

/// Delay before retrying after a failed getUpdates call
const ERROR_BACKOFF_SECS: u64 = 5;

pub async fn run_telegram_poller(state: Arc<AppState>, client: Arc<TelegramClient>) {
    let poll_timeout = state.config.telegram.poll_timeout_secs;
    let mut offset: Option<i64> = None;

    log::info!("Telegram poller: started");

    loop {
        let updates = match client.get_updates(offset, poll_timeout).await {
            Ok(updates) => updates,
            Err(e) => {
                log::warn!("Telegram poller: getUpdates failed: {}", e);
                tokio::time::sleep(Duration::from_secs(ERROR_BACKOFF_SECS)).await;
                continue;
            }
        };

        for update in updates {
            offset = Some(next_offset(offset, &update));

            // Each message gets its own task so a slow report does not stall polling
            let Some((chat, text)) = command_text(&update) else {
                continue;
            };
            let task_state = state.clone();
            tokio::spawn(async move {
                let replies = dispatch(&task_state, &chat, &text).await;
                if replies.is_empty() {
                    return;
                }
                let timeout = Duration::from_secs(task_state.config.telegram.delivery_timeout_secs);
                if let Err(e) =
                    deliver_blocks(task_state.deliverer.as_ref(), &chat, &replies, timeout).await
                {
                    log::warn!("Telegram poller: reply to {} failed: {}", chat, e);
                }
            });
        }
    }
}

fn next_offset(current: Option<i64>, update: &Update) -> i64 {
    current.unwrap_or(0).max(update.update_id + 1)
}

/// Chat and text of a human-sent message, if any.
fn command_text(update: &Update) -> Option<(Recipient, String)> {
    let message = update.message.as_ref()?;
    if message.from.as_ref().map(|u| u.is_bot).unwrap_or(false) {
        return None;
    }
    let text = message.text.as_ref()?.trim();
    if text.is_empty() {
        return None;
    }
    Some((Recipient::new(message.chat.id.to_string()), text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telegram::{Chat, Message, User};

    fn update(id: i64, text: Option<&str>, is_bot: bool) -> Update {
        Update {
            update_id: id,
            message: Some(Message {
                chat: Chat { id: -42 },
                from: Some(User { is_bot }),
                text: text.map(str::to_string),
            }),
        }
    }

    #[test]
    fn test_offset_advances_past_update() {
        assert_eq!(next_offset(None, &update(10, None, false)), 11);
        assert_eq!(next_offset(Some(20), &update(10, None, false)), 20);
    }

    #[test]
    fn test_command_text_filters() {
        let (chat, text) = command_text(&update(1, Some(" /pendientes "), false)).unwrap();
        assert_eq!(chat.as_str(), "-42");
        assert_eq!(text, "/pendientes");

        assert!(command_text(&update(2, Some("/pendientes"), true)).is_none());
        assert!(command_text(&update(3, None, false)).is_none());
        assert!(command_text(&Update { update_id: 4, message: None }).is_none());
    }
}
