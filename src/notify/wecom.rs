//! WeCom group robot webhook channel.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::notify::channel::{NotificationChannel, SendOutcome};
use crate::notify::task::NotificationTask;
use crate::rule::NotifyTarget;

const WEBHOOK_BASE: &str = "https://qyapi.weixin.qq.com/cgi-bin/webhook/send";

/// Sends markdown messages to a WeCom group robot webhook.
pub struct WecomChannel {
    client: reqwest::Client,
}

impl WecomChannel {
    /// Create the channel.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for WecomChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationChannel for WecomChannel {
    fn name(&self) -> &'static str {
        "wecom"
    }

    async fn send(&self, target: &NotifyTarget, task: &NotificationTask) -> SendOutcome {
        let NotifyTarget::Wecom { webhook_key } = target else {
            return SendOutcome::Permanent("target is not a wecom target".to_string());
        };
        if webhook_key.is_empty() {
            return SendOutcome::Permanent("wecom target missing webhook_key".to_string());
        }

        let url = format!("{WEBHOOK_BASE}?key={webhook_key}");
        let body = serde_json::json!({
            "msgtype": "markdown",
            "markdown": {"content": task.message},
        });

        debug!(task_id = %task.task_id, "sending wecom message");

        let response = match self.client.post(&url).json(&body).send().await {
            Ok(response) => response,
            Err(e) => return SendOutcome::Transient(format!("wecom request failed: {e}")),
        };

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return SendOutcome::Transient(format!("wecom HTTP {status}"));
        }
        if !status.is_success() {
            return SendOutcome::Permanent(format!("wecom HTTP {status}"));
        }

        let reply: serde_json::Value = match response.json().await {
            Ok(reply) => reply,
            Err(e) => return SendOutcome::Transient(format!("wecom response unreadable: {e}")),
        };

        // The webhook reports failures in the body with errcode != 0.
        match reply.get("errcode").and_then(|v| v.as_i64()) {
            Some(0) => {
                info!(task_id = %task.task_id, "wecom message sent");
                SendOutcome::Delivered
            }
            Some(45009) => {
                // API call frequency limit.
                SendOutcome::Transient("wecom rate limited (errcode 45009)".to_string())
            }
            Some(code) => {
                let errmsg = reply
                    .get("errmsg")
                    .and_then(|v| v.as_str())
                    .unwrap_or("unknown");
                SendOutcome::Permanent(format!("wecom errcode {code}: {errmsg}"))
            }
            None => SendOutcome::Transient("wecom response missing errcode".to_string()),
        }
    }
}
