use crate::domain::user::models::EmailAddress;

/// Outbound email content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailMessage {
    pub to: EmailAddress,
    pub subject: String,
    pub text: String,
}

impl EmailMessage {
    /// Password reset instructions carrying the one-time reset URL.
    pub fn password_reset(to: EmailAddress, reset_url: &str, ttl_minutes: i64) -> Self {
        Self {
            to,
            subject: format!("Your password reset token (valid for {} min)", ttl_minutes),
            text: format!(
                "Forgot your password? Submit a PATCH request with your new password and \
                 passwordConfirm to: {}\nIf you didn't forget your password, please ignore this email!",
                reset_url
            ),
        }
    }
}
