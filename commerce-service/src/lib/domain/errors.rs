use thiserror::Error;

/// Error for outbound email delivery.
///
/// Represents failures of the mail transport; the message content is never
/// part of the error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MailError {
    #[error("Failed to build email: {0}")]
    InvalidMessage(String),

    #[error("Failed to deliver email: {0}")]
    DeliveryFailed(String),
}
