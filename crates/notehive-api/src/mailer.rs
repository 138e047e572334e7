use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use notehive_crypto::OTP_TTL_MINUTES;

use crate::config::MailConfig;

/// Delivers password-reset codes.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_otp(&self, to: &str, username: &str, otp: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Serialize)]
struct OutgoingMail<'a> {
    from: &'a str,
    to: &'a str,
    subject: &'a str,
    html: String,
}

/// Posts messages as JSON to a transactional mail API with a bearer key.
pub struct HttpMailer {
    client: reqwest::Client,
    config: MailConfig,
}

impl HttpMailer {
    pub fn new(config: MailConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }
}

#[async_trait]
impl Mailer for HttpMailer {
    async fn send_otp(&self, to: &str, username: &str, otp: &str) -> anyhow::Result<()> {
        let mail = OutgoingMail {
            from: &self.config.from,
            to,
            subject: "NoteHive password reset code",
            html: otp_email_html(username, otp),
        };

        let response = self
            .client
            .post(&self.config.api_url)
            .bearer_auth(&self.config.api_key)
            .json(&mail)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "Mail API rejected message");
            anyhow::bail!("mail API returned {}: {}", status, body);
        }

        info!(to, "Password reset code sent");
        Ok(())
    }
}

/// Development stand-in when no mail API is configured; the code only goes to the log.
pub struct TracingMailer;

#[async_trait]
impl Mailer for TracingMailer {
    async fn send_otp(&self, to: &str, username: &str, otp: &str) -> anyhow::Result<()> {
        warn!(to, username, otp, "Mail delivery not configured; logging reset code instead");
        Ok(())
    }
}

pub fn otp_email_html(username: &str, otp: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
    <meta charset="UTF-8">
    <style>
        body {{ font-family: Arial, sans-serif; line-height: 1.6; color: #333; }}
        .container {{ max-width: 600px; margin: 0 auto; padding: 20px; }}
        .header {{ background-color: #4F46E5; color: white; padding: 20px; text-align: center; }}
        .content {{ padding: 20px; background-color: #f9f9f9; }}
        .code {{ font-size: 32px; font-weight: bold; letter-spacing: 8px; text-align: center; padding: 15px; margin: 15px 0; background-color: #EEF2FF; border-left: 4px solid #4F46E5; }}
        .footer {{ padding: 20px; text-align: center; font-size: 12px; color: #666; }}
    </style>
</head>
<body>
    <div class="container">
        <div class="header">
            <h1>Password Reset</h1>
        </div>
        <div class="content">
            <p>Hi {},</p>

            <p>We received a request to reset your NoteHive password. Use the code below to continue:</p>

            <div class="code">{}</div>

            <p>This code expires in {} minutes. If you did not request a reset, you can ignore this email.</p>
        </div>
        <div class="footer">
            <p>This is an automated message. Please do not reply directly to this email.</p>
        </div>
    </div>
</body>
</html>"#,
        html_escape(username),
        otp,
        OTP_TTL_MINUTES,
    )
}

fn html_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
