use std::time::Duration;

use reqwest::Client;
use serde_json::{json, Value};

use crate::templates::{self, Hbs};

/// Transactional email. Sends through SendGrid when a key is configured,
/// otherwise only logs what would have been sent.
#[derive(Clone)]
pub struct EmailService {
    http: Client,
    api_key: String,
    from: String,
    hbs: Hbs,
}

impl EmailService {
    pub fn new(api_key: String, from: String, hbs: Hbs) -> Self {
        Self {
            http: Client::new(),
            api_key,
            from,
            hbs,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.api_key.trim().is_empty()
    }

    pub fn render(&self, template: &str, ctx: &Value) -> Result<(String, String), String> {
        templates::render_email(&self.hbs, template, ctx)
    }

    pub async fn send(&self, to: &str, subject: &str, html: &str) -> Result<(), String> {
        if !self.is_enabled() {
            tracing::info!("email (not sent, no provider) to={} subject={:?}", to, subject);
            return Ok(());
        }

        let payload = json!({
            "personalizations": [{ "to": [{ "email": to }] }],
            "from": { "email": self.from },
            "subject": subject,
            "content": [{ "type": "text/html", "value": html }],
        });

        let res = self
            .http
            .post("https://api.sendgrid.com/v3/mail/send")
            .bearer_auth(&self.api_key)
            .json(&payload)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(format!("SendGrid send failed: {status} {body}"));
        }

        tracing::debug!("email sent to={} subject={:?}", to, subject);
        Ok(())
    }

    pub async fn send_template(&self, to: &str, template: &str, ctx: &Value) -> Result<(), String> {
        let (subject, html) = self.render(template, ctx)?;
        self.send(to, &subject, &html).await
    }

    /// Fire-and-forget from request handlers.
    pub fn spawn_template(&self, to: String, template: &'static str, ctx: Value) {
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.send_template(&to, template, &ctx).await {
                tracing::warn!("email {} to {} failed: {}", template, to, e);
            }
        });
    }
}
