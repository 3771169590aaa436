//! SMTP email channel via `lettre`.

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::{debug, info};

use crate::config::SmtpSettings;
use crate::notify::channel::{NotificationChannel, SendOutcome};
use crate::notify::task::NotificationTask;
use crate::rule::NotifyTarget;

/// Sends notifications as plain-text emails over SMTP.
///
/// Port 465 uses implicit TLS; other ports use STARTTLS when enabled.
pub struct EmailChannel {
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
    from: String,
}

impl EmailChannel {
    /// Build the channel from SMTP settings; an empty host leaves the
    /// channel unconfigured and every send permanent-fails.
    pub fn from_settings(smtp: &SmtpSettings) -> Self {
        if smtp.host.is_empty() {
            return Self {
                transport: None,
                from: smtp.from.clone(),
            };
        }

        let builder = if smtp.port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)
        } else if smtp.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&smtp.host)
        } else {
            Ok(AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(
                &smtp.host,
            ))
        };

        let transport = builder.ok().map(|mut builder| {
            builder = builder.port(smtp.port);
            if !smtp.user.is_empty() {
                builder = builder.credentials(Credentials::new(
                    smtp.user.clone(),
                    smtp.password.clone(),
                ));
            }
            builder.build()
        });

        Self {
            transport,
            from: smtp.from.clone(),
        }
    }
}

#[async_trait]
impl NotificationChannel for EmailChannel {
    fn name(&self) -> &'static str {
        "email"
    }

    async fn send(&self, target: &NotifyTarget, task: &NotificationTask) -> SendOutcome {
        let NotifyTarget::Email { to } = target else {
            return SendOutcome::Permanent("target is not an email target".to_string());
        };
        let Some(transport) = &self.transport else {
            return SendOutcome::Permanent("smtp transport not configured".to_string());
        };
        if to.is_empty() {
            return SendOutcome::Permanent("email target has no recipients".to_string());
        }

        let from: Mailbox = match self.from.parse() {
            Ok(from) => from,
            Err(e) => return SendOutcome::Permanent(format!("invalid sender address: {e}")),
        };

        let mut builder = Message::builder()
            .from(from)
            .subject(format!("[trigger] {}", task.rule_id));
        for recipient in to {
            match recipient.parse::<Mailbox>() {
                Ok(mailbox) => builder = builder.to(mailbox),
                Err(e) => {
                    return SendOutcome::Permanent(format!(
                        "invalid recipient '{recipient}': {e}"
                    ))
                }
            }
        }

        let message = match builder.body(task.message.clone()) {
            Ok(message) => message,
            Err(e) => return SendOutcome::Permanent(format!("failed to build email: {e}")),
        };

        debug!(task_id = %task.task_id, recipients = to.len(), "sending email");

        match transport.send(message).await {
            Ok(_) => {
                info!(task_id = %task.task_id, "email sent");
                SendOutcome::Delivered
            }
            Err(e) if e.is_permanent() => {
                SendOutcome::Permanent(format!("smtp rejected message: {e}"))
            }
            Err(e) => SendOutcome::Transient(format!("smtp delivery failed: {e}")),
        }
    }
}
