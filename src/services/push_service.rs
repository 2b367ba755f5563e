use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

/// Firebase Cloud Messaging via the legacy HTTP endpoint.
#[derive(Clone)]
pub struct PushService {
    http: Client,
    server_key: String,
}

#[derive(Debug, Deserialize)]
struct FcmResponse {
    #[serde(default)]
    success: i64,
    #[serde(default)]
    failure: i64,
}

impl PushService {
    pub fn new(server_key: String) -> Self {
        Self {
            http: Client::new(),
            server_key,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.server_key.trim().is_empty()
    }

    /// Returns how many devices accepted the message.
    pub async fn send(&self, tokens: &[String], title: &str, body: &str) -> Result<i64, String> {
        if !self.is_enabled() || tokens.is_empty() {
            return Ok(0);
        }

        let payload = json!({
            "registration_ids": tokens,
            "notification": { "title": title, "body": body },
            "priority": "high",
        });

        let res = self
            .http
            .post("https://fcm.googleapis.com/fcm/send")
            .header("Authorization", format!("key={}", self.server_key))
            .json(&payload)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(format!("FCM send failed: {status} {body}"));
        }

        let out = res.json::<FcmResponse>().await.map_err(|e| e.to_string())?;
        if out.failure > 0 {
            tracing::debug!("fcm: {} delivered, {} failed", out.success, out.failure);
        }
        Ok(out.success)
    }
}
