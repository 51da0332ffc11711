//! Email delivery for invitation and password-setup notifications.
//!
//! Providers:
//! - `console`: logs the message (development)
//! - `sendgrid`: SendGrid v3 mail API
//!
//! Delivery never fails a lifecycle operation. The dispatcher reports
//! `Sent`, `Failed` or `Skipped` and the caller decides what to log.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use domain::services::{
    InvitationNotice, NotificationDispatcher, NotificationResult, PasswordSetupNotice,
};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info};

use crate::config::EmailConfig;

const SENDGRID_ENDPOINT: &str = "https://api.sendgrid.com/v3/mail/send";
const DEFAULT_VALIDITY_HOURS: i64 = 48;

#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Email provider not configured")]
    NotConfigured,

    #[error("Unknown email provider: {0}")]
    UnknownProvider(String),

    #[error("Failed to send email: {0}")]
    SendFailed(String),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Failed to build HTTP client: {0}")]
    Client(String),
}

#[derive(Debug, Clone)]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub body_text: String,
    pub body_html: String,
}

#[derive(Clone)]
pub struct EmailService {
    config: Arc<EmailConfig>,
    http: reqwest::Client,
    sendgrid_endpoint: String,
    invitation_validity_hours: i64,
}

impl EmailService {
    pub fn new(config: EmailConfig) -> Result<Self, NotificationError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| NotificationError::Client(e.to_string()))?;

        Ok(Self {
            config: Arc::new(config),
            http,
            sendgrid_endpoint: SENDGRID_ENDPOINT.to_string(),
            invitation_validity_hours: DEFAULT_VALIDITY_HOURS,
        })
    }

    /// Hours quoted in the invitation email; should match the configured
    /// invitation expiry.
    pub fn with_invitation_validity_hours(mut self, hours: i64) -> Self {
        self.invitation_validity_hours = hours;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub async fn send(&self, message: EmailMessage) -> Result<(), NotificationError> {
        match self.config.provider.as_str() {
            "console" => self.send_console(message),
            "sendgrid" => self.send_sendgrid(message).await,
            provider => {
                error!(provider = %provider, "Unknown email provider");
                Err(NotificationError::UnknownProvider(provider.to_string()))
            }
        }
    }

    pub fn invitation_email(&self, to: &str, notice: &InvitationNotice) -> EmailMessage {
        let subject = "You're invited: confirm your account".to_string();
        let role = notice.role.as_str();
        let hours = self.invitation_validity_hours;

        let body_text = format!(
            "You have been invited to the service with the \"{role}\" role.\n\n\
             Open the link below to accept the invitation:\n\n\
             {url}\n\n\
             This link is valid for {hours} hours.\n\n\
             This mailbox is not monitored. Please do not reply.",
            role = role,
            url = notice.invite_url,
            hours = hours,
        );

        let body_html = format!(
            r#"<div style="font-family: sans-serif; max-width: 600px; margin: 0 auto;">
  <h1 style="color: #333; font-size: 24px;">You're invited</h1>
  <p>You have been invited to the service with the &ldquo;{role}&rdquo; role.</p>
  <p>Click the button below to accept the invitation:</p>
  <div style="margin: 30px 0;">
    <a href="{url}" style="background-color: #4F46E5; color: white; padding: 12px 24px; text-decoration: none; border-radius: 4px; display: inline-block;">Accept invitation</a>
  </div>
  <p>This link is valid for {hours} hours.</p>
  <p style="color: #777; font-size: 14px;">This mailbox is not monitored. Please do not reply.</p>
</div>"#,
            role = role,
            url = escape_html(&notice.invite_url),
            hours = hours,
        );

        EmailMessage {
            to: to.to_string(),
            subject,
            body_text,
            body_html,
        }
    }

    pub fn password_setup_email(&self, to: &str, notice: &PasswordSetupNotice) -> EmailMessage {
        let greeting = notice
            .user_name
            .as_deref()
            .map(|name| format!("Hi {},", name))
            .unwrap_or_else(|| "Hi,".to_string());

        let body_text = format!(
            "{greeting}\n\n\
             Your account is ready. Set your password using the link below:\n\n\
             {url}\n\n\
             If you did not expect this email you can ignore it.",
            greeting = greeting,
            url = notice.reset_url,
        );

        let body_html = format!(
            r#"<div style="font-family: sans-serif; max-width: 600px; margin: 0 auto;">
  <h1 style="color: #333; font-size: 24px;">Set your password</h1>
  <p>{greeting}</p>
  <p>Your account is ready. Click the button below to set your password:</p>
  <div style="margin: 30px 0;">
    <a href="{url}" style="background-color: #4F46E5; color: white; padding: 12px 24px; text-decoration: none; border-radius: 4px; display: inline-block;">Set password</a>
  </div>
  <p style="color: #777; font-size: 14px;">If you did not expect this email you can ignore it.</p>
</div>"#,
            greeting = escape_html(&greeting),
            url = escape_html(&notice.reset_url),
        );

        EmailMessage {
            to: to.to_string(),
            subject: "Set your password".to_string(),
            body_text,
            body_html,
        }
    }

    async fn deliver(&self, message: EmailMessage) -> NotificationResult {
        if !self.config.enabled {
            debug!(to = %message.to, subject = %message.subject, "Email disabled, skipping send");
            return NotificationResult::Skipped;
        }

        match self.send(message).await {
            Ok(()) => NotificationResult::Sent,
            Err(e) => NotificationResult::Failed(e.to_string()),
        }
    }

    fn send_console(&self, message: EmailMessage) -> Result<(), NotificationError> {
        info!(
            to = %message.to,
            subject = %message.subject,
            from = %self.config.sender_email,
            from_name = %self.config.sender_name,
            "Email (console provider)"
        );
        info!(body_text = %message.body_text, "Email body");
        Ok(())
    }

    async fn send_sendgrid(&self, message: EmailMessage) -> Result<(), NotificationError> {
        if self.config.sendgrid_api_key.is_empty() {
            return Err(NotificationError::NotConfigured);
        }

        let body = json!({
            "personalizations": [{ "to": [{ "email": message.to }] }],
            "from": {
                "email": self.config.sender_email,
                "name": self.config.sender_name
            },
            "subject": message.subject,
            "content": [
                { "type": "text/plain", "value": message.body_text },
                { "type": "text/html", "value": message.body_html }
            ]
        });

        let response = self
            .http
            .post(&self.sendgrid_endpoint)
            .bearer_auth(&self.config.sendgrid_api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| NotificationError::SendFailed(format!("SendGrid request failed: {}", e)))?;

        if response.status().is_success() {
            info!(to = %message.to, subject = %message.subject, "Email sent via SendGrid");
            Ok(())
        } else {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            error!(status = %status, error = %error_body, "SendGrid API error");
            Err(NotificationError::ProviderError(format!(
                "SendGrid returned {}: {}",
                status, error_body
            )))
        }
    }
}

#[async_trait]
impl NotificationDispatcher for EmailService {
    async fn send_invitation(&self, to: &str, notice: InvitationNotice) -> NotificationResult {
        let message = self.invitation_email(to, &notice);
        self.deliver(message).await
    }

    async fn send_password_setup(
        &self,
        to: &str,
        notice: PasswordSetupNotice,
    ) -> NotificationResult {
        let message = self.password_setup_email(to, &notice);
        self.deliver(message).await
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
