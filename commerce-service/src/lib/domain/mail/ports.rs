use async_trait::async_trait;

use crate::domain::errors::MailError;
use crate::domain::mail::models::EmailMessage;

/// Port for outbound email delivery.
#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    /// Deliver a single message.
    ///
    /// # Errors
    /// * `DeliveryFailed` - Transport rejected or could not reach the relay
    async fn send(&self, message: EmailMessage) -> Result<(), MailError>;
}
