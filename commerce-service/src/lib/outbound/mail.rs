use async_trait::async_trait;

use crate::domain::errors::MailError;
use crate::domain::mail::models::EmailMessage;
use crate::domain::mail::ports::Mailer;

/// Mailer that records outgoing mail in the service log instead of talking
/// to a relay. The body, which carries the reset token, is never logged.
pub struct LogMailer {
    from: String,
    host: String,
}

impl LogMailer {
    pub fn new(from: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            host: host.into(),
        }
    }
}

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: EmailMessage) -> Result<(), MailError> {
        if message.subject.trim().is_empty() {
            return Err(MailError::InvalidMessage("subject is empty".to_string()));
        }

        tracing::info!(
            from = %self.from,
            to = %message.to,
            subject = %message.subject,
            relay = %self.host,
            "Email sent"
        );

        Ok(())
    }
}
