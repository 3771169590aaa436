//! Telegram Bot API channel.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::notify::channel::{NotificationChannel, SendOutcome};
use crate::notify::task::NotificationTask;
use crate::rule::NotifyTarget;

/// Sends messages through the Telegram Bot API `sendMessage` endpoint.
pub struct TelegramChannel {
    client: reqwest::Client,
    bot_token: String,
}

impl TelegramChannel {
    /// Create the channel; an empty token makes every send permanent-fail.
    pub fn new(bot_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            bot_token,
        }
    }
}

#[async_trait]
impl NotificationChannel for TelegramChannel {
    fn name(&self) -> &'static str {
        "telegram"
    }

    async fn send(&self, target: &NotifyTarget, task: &NotificationTask) -> SendOutcome {
        let NotifyTarget::Telegram { chat_id } = target else {
            return SendOutcome::Permanent("target is not a telegram target".to_string());
        };
        if self.bot_token.is_empty() {
            return SendOutcome::Permanent("telegram bot token not configured".to_string());
        }
        if chat_id.is_empty() {
            return SendOutcome::Permanent("telegram target missing chat_id".to_string());
        }

        let url = format!("https://api.telegram.org/bot{}/sendMessage", self.bot_token);
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": task.message,
            "parse_mode": "Markdown",
        });

        debug!(chat_id = %chat_id, task_id = %task.task_id, "sending telegram message");

        let response = match self.client.post(&url).json(&body).send().await {
            Ok(response) => response,
            Err(e) => return SendOutcome::Transient(format!("telegram request failed: {e}")),
        };

        let status = response.status();
        let reply: serde_json::Value = match response.json().await {
            Ok(reply) => reply,
            Err(e) => return SendOutcome::Transient(format!("telegram response unreadable: {e}")),
        };

        if reply.get("ok") == Some(&serde_json::Value::Bool(true)) {
            info!(chat_id = %chat_id, task_id = %task.task_id, "telegram message sent");
            return SendOutcome::Delivered;
        }

        let description = reply
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown Telegram API error");

        // 429 and server errors are worth retrying; other API rejections
        // (bad chat, bad token) never recover.
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            SendOutcome::Transient(format!("telegram {status}: {description}"))
        } else {
            SendOutcome::Permanent(format!("telegram {status}: {description}"))
        }
    }
}
