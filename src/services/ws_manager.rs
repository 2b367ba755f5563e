use std::{
    collections::{BTreeMap, HashSet},
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::price_stream::PriceTick;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    ServerFull,
    TooManyForIp,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub active: usize,
    pub max_connections: usize,
    pub max_per_ip: usize,
    pub total_accepted: u64,
    pub total_rejected: u64,
    pub per_ip: BTreeMap<String, usize>,
}

struct Inner {
    max_total: usize,
    max_per_ip: usize,
    active: AtomicUsize,
    per_ip: DashMap<String, usize>,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

/// Enforces global and per-IP limits on live WebSocket connections.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

/// Held for the lifetime of one socket; releases its slot on drop.
pub struct ConnectionGuard {
    inner: Arc<Inner>,
    ip: String,
}

impl ConnectionManager {
    pub fn new(max_total: usize, max_per_ip: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                max_total: max_total.max(1),
                max_per_ip: max_per_ip.max(1),
                active: AtomicUsize::new(0),
                per_ip: DashMap::new(),
                accepted: AtomicU64::new(0),
                rejected: AtomicU64::new(0),
            }),
        }
    }

    pub fn try_acquire(&self, ip: &str) -> Result<ConnectionGuard, Rejection> {
        let inner = &self.inner;

        let reserved = inner
            .active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < inner.max_total).then_some(n + 1)
            });
        if reserved.is_err() {
            inner.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(Rejection::ServerFull);
        }

        // entry() holds the shard lock, so check-and-increment is atomic per ip
        let mut slot = inner.per_ip.entry(ip.to_string()).or_insert(0);
        if *slot >= inner.max_per_ip {
            drop(slot);
            inner.active.fetch_sub(1, Ordering::AcqRel);
            inner.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(Rejection::TooManyForIp);
        }
        *slot += 1;
        drop(slot);

        inner.accepted.fetch_add(1, Ordering::Relaxed);
        Ok(ConnectionGuard {
            inner: self.inner.clone(),
            ip: ip.to_string(),
        })
    }

    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            active: self.active(),
            max_connections: self.inner.max_total,
            max_per_ip: self.inner.max_per_ip,
            total_accepted: self.inner.accepted.load(Ordering::Relaxed),
            total_rejected: self.inner.rejected.load(Ordering::Relaxed),
            per_ip: self
                .inner
                .per_ip
                .iter()
                .map(|e| (e.key().clone(), *e.value()))
                .collect(),
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.inner.active.fetch_sub(1, Ordering::AcqRel);
        self.inner.per_ip.remove_if_mut(&self.ip, |_, n| {
            *n = n.saturating_sub(1);
            *n == 0
        });
    }
}

/// Client -> server frames on `/ws/prices`.
#[derive(Debug, Deserialize, PartialEq)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ClientMessage {
    Subscribe {
        #[serde(default)]
        symbols: Vec<String>,
    },
    Unsubscribe {
        #[serde(default)]
        symbols: Vec<String>,
    },
    Ping,
}

/// Server -> client frames on `/ws/prices`.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Snapshot { data: Vec<PriceTick> },
    PriceUpdate { data: Vec<PriceTick> },
    Subscribed { symbols: Vec<String> },
    Pong,
    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn to_text(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"type":"error","message":"encode failed"}"#.to_string())
    }
}

/// Per-socket symbol filter. Empty means everything.
#[derive(Debug, Default, Clone)]
pub struct Subscription {
    symbols: HashSet<String>,
}

impl Subscription {
    /// Adds supported symbols and returns the current set, sorted.
    pub fn add(&mut self, symbols: &[String]) -> Vec<String> {
        for s in symbols {
            if let Some(sym) = super::validators::normalize_symbol(s) {
                self.symbols.insert(sym);
            }
        }
        self.current()
    }

    pub fn remove(&mut self, symbols: &[String]) -> Vec<String> {
        for s in symbols {
            self.symbols.remove(&s.trim().to_uppercase());
        }
        self.current()
    }

    pub fn current(&self) -> Vec<String> {
        let mut v: Vec<String> = self.symbols.iter().cloned().collect();
        v.sort();
        v
    }

    pub fn wants(&self, symbol: &str) -> bool {
        self.symbols.is_empty() || self.symbols.contains(symbol)
    }

    pub fn filter(&self, ticks: &[PriceTick]) -> Vec<PriceTick> {
        ticks.iter().filter(|t| self.wants(&t.symbol)).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enforces_per_ip_limit_and_releases_on_drop() {
        let mgr = ConnectionManager::new(10, 2);

        let a = mgr.try_acquire("1.1.1.1").unwrap();
        let _b = mgr.try_acquire("1.1.1.1").unwrap();
        assert_eq!(mgr.try_acquire("1.1.1.1").err(), Some(Rejection::TooManyForIp));
        assert_eq!(mgr.active(), 2);

        drop(a);
        assert_eq!(mgr.active(), 1);
        assert!(mgr.try_acquire("1.1.1.1").is_ok());
    }

    #[test]
    fn enforces_global_limit() {
        let mgr = ConnectionManager::new(2, 5);
        let _a = mgr.try_acquire("a").unwrap();
        let _b = mgr.try_acquire("b").unwrap();
        assert_eq!(mgr.try_acquire("c").err(), Some(Rejection::ServerFull));

        let stats = mgr.stats();
        assert_eq!(stats.active, 2);
        assert_eq!(stats.total_rejected, 1);
        assert_eq!(stats.per_ip.get("a"), Some(&1));
    }

    #[test]
    fn idle_ips_are_forgotten() {
        let mgr = ConnectionManager::new(5, 5);
        let g = mgr.try_acquire("x").unwrap();
        drop(g);
        assert!(mgr.stats().per_ip.is_empty());
    }

    #[test]
    fn client_messages_parse() {
        let m: ClientMessage = serde_json::from_str(r#"{"action":"subscribe","symbols":["btc"]}"#).unwrap();
        assert_eq!(m, ClientMessage::Subscribe { symbols: vec!["btc".into()] });
        let m: ClientMessage = serde_json::from_str(r#"{"action":"ping"}"#).unwrap();
        assert_eq!(m, ClientMessage::Ping);
        assert!(serde_json::from_str::<ClientMessage>(r#"{"action":"dance"}"#).is_err());
    }

    #[test]
    fn server_frames_are_tagged() {
        assert_eq!(ServerMessage::Pong.to_text(), r#"{"type":"pong"}"#);
        assert_eq!(
            ServerMessage::Subscribed { symbols: vec!["BTC".into()] }.to_text(),
            r#"{"type":"subscribed","symbols":["BTC"]}"#
        );
        assert_eq!(
            ServerMessage::error("slow down").to_text(),
            r#"{"type":"error","message":"slow down"}"#
        );
        assert!(ServerMessage::PriceUpdate { data: vec![] }
            .to_text()
            .starts_with(r#"{"type":"price_update""#));
    }

    #[test]
    fn subscription_filters_ticks() {
        let mut sub = Subscription::default();
        let tick = |s: &str| PriceTick {
            symbol: s.into(),
            price: 1.0,
            change_24h: None,
            source: "t".into(),
            ts: 0,
        };
        let ticks = vec![tick("BTC"), tick("ETH")];

        assert_eq!(sub.filter(&ticks).len(), 2);
        assert_eq!(sub.add(&["btc".into(), "nope".into()]), vec!["BTC".to_string()]);
        assert_eq!(sub.filter(&ticks).len(), 1);
        assert!(sub.remove(&["BTC".into()]).is_empty());
        assert_eq!(sub.filter(&ticks).len(), 2);
    }
}
