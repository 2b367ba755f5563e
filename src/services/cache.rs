use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use dashmap::DashMap;
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{json, Value};

/// Key/value cache backed by the Upstash Redis REST API, or an in-process
/// TTL map when no Upstash credentials are configured.
#[derive(Clone)]
pub struct CacheService {
    http: Client,
    upstash_url: String,
    upstash_token: String,
    local: Arc<DashMap<String, (Instant, String)>>,
}

#[derive(Debug, Deserialize)]
struct UpstashResponse {
    #[serde(default)]
    result: Value,
    #[serde(default)]
    error: Option<String>,
}

impl CacheService {
    pub fn new(upstash_url: String, upstash_token: String) -> Self {
        Self {
            http: Client::new(),
            upstash_url: upstash_url.trim_end_matches('/').to_string(),
            upstash_token,
            local: Arc::new(DashMap::new()),
        }
    }

    pub fn is_remote(&self) -> bool {
        !self.upstash_url.trim().is_empty() && !self.upstash_token.trim().is_empty()
    }

    async fn command(&self, cmd: Value) -> Result<Value, String> {
        let res = self
            .http
            .post(&self.upstash_url)
            .bearer_auth(&self.upstash_token)
            .json(&cmd)
            .timeout(Duration::from_secs(3))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(format!("upstash failed: {status} {body}"));
        }

        let body = res.json::<UpstashResponse>().await.map_err(|e| e.to_string())?;
        if let Some(err) = body.error {
            return Err(format!("upstash error: {err}"));
        }
        Ok(body.result)
    }

    fn local_get(&self, key: &str) -> Option<String> {
        let hit = self.local.get(key).map(|e| e.value().clone());
        match hit {
            Some((expires, v)) if expires > Instant::now() => Some(v),
            Some(_) => {
                self.local.remove(key);
                None
            }
            None => None,
        }
    }

    fn local_set(&self, key: &str, value: String, ttl: Duration) {
        self.local.insert(key.to_string(), (Instant::now() + ttl, value));
    }

    pub async fn get(&self, key: &str) -> Option<String> {
        if self.is_remote() {
            match self.command(json!(["GET", key])).await {
                Ok(Value::String(s)) => return Some(s),
                Ok(_) => return None,
                Err(e) => tracing::warn!("cache get {} fell back to local: {}", key, e),
            }
        }
        self.local_get(key)
    }

    pub async fn set(&self, key: &str, value: String, ttl: Duration) {
        if self.is_remote() {
            let secs = ttl.as_secs().max(1);
            match self.command(json!(["SET", key, value, "EX", secs])).await {
                Ok(_) => return,
                Err(e) => tracing::warn!("cache set {} fell back to local: {}", key, e),
            }
        }
        self.local_set(key, value, ttl);
    }

    pub async fn delete(&self, key: &str) {
        if self.is_remote() {
            if let Err(e) = self.command(json!(["DEL", key])).await {
                tracing::warn!("cache del {} failed: {}", key, e);
            }
        }
        self.local.remove(key);
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get(key).await?;
        serde_json::from_str(&raw).ok()
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        if let Ok(raw) = serde_json::to_string(value) {
            self.set(key, raw, ttl).await;
        }
    }

    /// Drops expired local entries.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        self.local.retain(|_, (expires, _)| *expires > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn local_cache_respects_ttl() {
        let cache = CacheService::new(String::new(), String::new());
        assert!(!cache.is_remote());

        cache.set("a", "1".into(), Duration::from_secs(60)).await;
        assert_eq!(cache.get("a").await.as_deref(), Some("1"));

        cache.set("b", "2".into(), Duration::from_millis(0)).await;
        assert_eq!(cache.get("b").await, None);

        cache.delete("a").await;
        assert_eq!(cache.get("a").await, None);
    }

    #[tokio::test]
    async fn json_helpers_round_trip() {
        let cache = CacheService::new(String::new(), String::new());
        cache.set_json("k", &vec![1, 2, 3], Duration::from_secs(5)).await;
        let v: Option<Vec<i32>> = cache.get_json("k").await;
        assert_eq!(v, Some(vec![1, 2, 3]));
    }
}
