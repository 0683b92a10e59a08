//! Outbound Notifications
//! Mission: Deliver reset tokens and welcome messages, best-effort

use tracing::info;

/// Best-effort notification sender. Delivery problems must never abort the
/// operation that triggered them, so every method is infallible from the
/// caller's point of view.
///
/// This deployment has no SMTP relay wired up: messages are emitted through
/// the structured log, which is where operators pick up reset tokens in
/// development.
pub struct Notifier {
    from: String,
}

impl Notifier {
    pub fn new(from: impl Into<String>) -> Self {
        Self { from: from.into() }
    }

    pub fn send_reset_token(&self, to_email: &str, token: &str) {
        info!(
            from = %self.from,
            to = %to_email,
            subject = "Password Reset Request",
            "🔑 Password reset token issued: {} (expires in 1 hour)",
            token
        );
    }

    pub fn send_welcome(&self, to_email: &str, username: &str) {
        info!(
            from = %self.from,
            to = %to_email,
            subject = "Welcome!",
            "📧 Welcome message for new account {}",
            username
        );
    }
}
