//! Live price feed.
//!
//! One background task holds a WebSocket to the active upstream (CoinCap,
//! then Binance) and falls back to CoinGecko REST polling when both are
//! unusable. Every tick updates the in-memory price table and is fanned out
//! on a broadcast channel that the `/ws/prices` sockets subscribe to.

use std::{
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use chrono::Utc;
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
    time::{sleep, timeout},
};
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message as TMessage};

use super::{
    assets::{self, ASSETS},
    market_data::{MarketDataService, SOURCE_MOCK},
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const POLL_INTERVAL: Duration = Duration::from_secs(10);
const PRIMARY_RETRY_AFTER: Duration = Duration::from_secs(300);
const MAX_CONNECT_FAILURES: u32 = 3;
const FRESH_FOR_SECS: i64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceTick {
    pub symbol: String,
    pub price: f64,
    pub change_24h: Option<f64>,
    pub source: String,
    pub ts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedSource {
    CoinCap,
    Binance,
    CoinGeckoPoll,
}

impl FeedSource {
    pub fn name(self) -> &'static str {
        match self {
            FeedSource::CoinCap => "coincap",
            FeedSource::Binance => "binance",
            FeedSource::CoinGeckoPoll => "coingecko",
        }
    }
}

/// Exponential reconnect delay: base, 2*base, 4*base ... capped at max.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self { base, max, current: base }
    }

    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub fn reset(&mut self) {
        self.current = self.base;
    }
}

/// Decides which upstream to use. Connect failures accumulate per source;
/// a stale stream switches at once. Fallbacks go back to the primary after
/// `retry_primary_after`.
#[derive(Debug, Clone)]
pub struct FailoverSelector {
    order: Vec<FeedSource>,
    idx: usize,
    failures: u32,
    max_failures: u32,
    switched_at: Option<Instant>,
    retry_primary_after: Duration,
    failovers: u64,
}

impl FailoverSelector {
    pub fn new(order: Vec<FeedSource>, max_failures: u32, retry_primary_after: Duration) -> Self {
        Self {
            order,
            idx: 0,
            failures: 0,
            max_failures: max_failures.max(1),
            switched_at: None,
            retry_primary_after,
            failovers: 0,
        }
    }

    pub fn current(&self) -> FeedSource {
        self.order[self.idx]
    }

    pub fn failovers(&self) -> u64 {
        self.failovers
    }

    fn advance(&mut self, now: Instant) {
        self.idx = (self.idx + 1) % self.order.len();
        self.failures = 0;
        self.failovers += 1;
        self.switched_at = if self.idx == 0 { None } else { Some(now) };
    }

    /// Returns true when the failure moved us to another source.
    pub fn record_connect_failure(&mut self, now: Instant) -> bool {
        self.failures += 1;
        if self.failures >= self.max_failures {
            self.advance(now);
            return true;
        }
        false
    }

    pub fn record_stale(&mut self, now: Instant) {
        self.advance(now);
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
    }

    /// Time left on a fallback before the primary is retried.
    pub fn fallback_remaining(&self, now: Instant) -> Option<Duration> {
        let since = self.switched_at?;
        Some(self.retry_primary_after.saturating_sub(now.saturating_duration_since(since)))
    }

    pub fn maybe_retry_primary(&mut self, now: Instant) -> bool {
        match self.fallback_remaining(now) {
            Some(left) if left.is_zero() => {
                self.idx = 0;
                self.failures = 0;
                self.switched_at = None;
                true
            }
            _ => false,
        }
    }
}

/// CoinCap pushes `{"bitcoin":"67000.12","ethereum":"3100.5"}`.
pub fn parse_coincap_message(text: &str) -> Vec<(String, f64)> {
    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(text) else {
        return Vec::new();
    };

    let mut out: Vec<(String, f64)> = map
        .iter()
        .filter_map(|(id, v)| {
            let asset = assets::by_coincap_id(id)?;
            let price = match v {
                Value::String(s) => s.parse::<f64>().ok()?,
                Value::Number(n) => n.as_f64()?,
                _ => return None,
            };
            (price.is_finite() && price > 0.0).then(|| (asset.symbol.to_string(), price))
        })
        .collect();
    out.sort_by(|a, b| a.0.cmp(&b.0));
    out
}

#[derive(Debug, Deserialize)]
struct BinanceEnvelope {
    data: BinanceMiniTicker,
}

#[derive(Debug, Deserialize)]
struct BinanceMiniTicker {
    #[serde(rename = "s")]
    pair: String,
    #[serde(rename = "c")]
    close: String,
    #[serde(rename = "o")]
    open: String,
}

/// Combined-stream mini ticker: returns (symbol, last price, 24h change %).
pub fn parse_binance_message(text: &str) -> Option<(String, f64, Option<f64>)> {
    let env = serde_json::from_str::<BinanceEnvelope>(text).ok()?;
    let asset = assets::by_binance_pair(&env.data.pair)?;
    let close = env.data.close.parse::<f64>().ok().filter(|p| p.is_finite() && *p > 0.0)?;
    let change = env
        .data
        .open
        .parse::<f64>()
        .ok()
        .filter(|o| *o > 0.0)
        .map(|o| (close - o) / o * 100.0);
    Some((asset.symbol.to_string(), close, change))
}

pub fn coincap_url() -> String {
    let ids = ASSETS.iter().map(|a| a.coincap_id).collect::<Vec<_>>().join(",");
    format!("wss://ws.coincap.io/prices?assets={ids}")
}

pub fn binance_url() -> String {
    let streams = ASSETS
        .iter()
        .map(|a| format!("{}@miniTicker", a.binance_pair.to_lowercase()))
        .collect::<Vec<_>>()
        .join("/");
    format!("wss://stream.binance.com:9443/stream?streams={streams}")
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StreamStatus {
    pub source: String,
    pub connected: bool,
    pub reconnects: u64,
    pub failovers: u64,
    pub last_tick_at: Option<i64>,
    pub tracked_symbols: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum SessionEnd {
    Shutdown,
    ConnectFailed(String),
    Stale,
    Closed { received_any: bool },
    Rotate,
}

/// What the stream loop does once a session has ended.
#[derive(Debug, Clone, Copy, PartialEq)]
enum NextStep {
    Stop,
    Reconnect,
    ReconnectAfter(Duration),
}

fn count_failure(selector: &mut FailoverSelector, backoff: &mut Backoff, now: Instant) -> NextStep {
    let from = selector.current();
    if selector.record_connect_failure(now) {
        tracing::warn!("price stream failing over {} -> {}", from.name(), selector.current().name());
        backoff.reset();
    }
    NextStep::ReconnectAfter(backoff.next_delay())
}

/// Feeds a finished session into the failover selector and the backoff.
/// A session that closed before producing a tick counts as a failed connect.
fn after_session(end: SessionEnd, selector: &mut FailoverSelector, backoff: &mut Backoff, now: Instant) -> NextStep {
    let source = selector.current();
    match end {
        SessionEnd::Shutdown => NextStep::Stop,
        SessionEnd::Rotate => {
            backoff.reset();
            NextStep::Reconnect
        }
        SessionEnd::ConnectFailed(e) => {
            tracing::warn!("price stream {} connect failed: {}", source.name(), e);
            count_failure(selector, backoff, now)
        }
        SessionEnd::Closed { received_any: false } => {
            tracing::warn!("price stream {} closed before any tick", source.name());
            count_failure(selector, backoff, now)
        }
        SessionEnd::Closed { received_any: true } => {
            tracing::info!("price stream {} session closed", source.name());
            selector.record_success();
            backoff.reset();
            NextStep::ReconnectAfter(backoff.next_delay())
        }
        SessionEnd::Stale => {
            selector.record_stale(now);
            tracing::warn!(
                "price stream {} went silent, failing over to {}",
                source.name(),
                selector.current().name()
            );
            backoff.reset();
            NextStep::ReconnectAfter(backoff.next_delay())
        }
    }
}

struct Inner {
    prices: DashMap<String, PriceTick>,
    tx: broadcast::Sender<Vec<PriceTick>>,
    status: Mutex<StreamStatus>,
    stale_after: Duration,
}

#[derive(Clone)]
pub struct PriceStream {
    inner: Arc<Inner>,
}

impl PriceStream {
    pub fn new(stale_after_secs: u64) -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            inner: Arc::new(Inner {
                prices: DashMap::new(),
                tx,
                status: Mutex::new(StreamStatus::default()),
                stale_after: Duration::from_secs(stale_after_secs.max(5)),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Vec<PriceTick>> {
        self.inner.tx.subscribe()
    }

    pub fn snapshot(&self) -> Vec<PriceTick> {
        let mut out: Vec<PriceTick> = self.inner.prices.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        out
    }

    /// Latest streamed price if it is recent enough to trade on.
    pub fn price(&self, symbol: &str) -> Option<f64> {
        let tick = self.inner.prices.get(symbol)?;
        let age = Utc::now().timestamp() - tick.ts;
        (age <= FRESH_FOR_SECS).then_some(tick.price)
    }

    pub fn status(&self) -> StreamStatus {
        let mut s = self
            .inner
            .status
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default();
        s.tracked_symbols = self.inner.prices.len();
        s
    }

    fn update_status(&self, f: impl FnOnce(&mut StreamStatus)) {
        if let Ok(mut g) = self.inner.status.lock() {
            f(&mut g);
        }
    }

    /// Stores ticks and fans them out. Returns how many were accepted.
    pub fn publish(&self, ticks: Vec<PriceTick>) -> usize {
        if ticks.is_empty() {
            return 0;
        }
        for t in &ticks {
            self.inner.prices.insert(t.symbol.clone(), t.clone());
        }
        let n = ticks.len();
        let ts = ticks.iter().map(|t| t.ts).max();
        self.update_status(|s| s.last_tick_at = ts);
        // no receivers is fine
        let _ = self.inner.tx.send(ticks);
        n
    }

    fn ticks_from(&self, source: FeedSource, text: &str) -> Vec<PriceTick> {
        let now = Utc::now().timestamp();
        match source {
            FeedSource::CoinCap => parse_coincap_message(text)
                .into_iter()
                .map(|(symbol, price)| {
                    let change_24h = self.inner.prices.get(&symbol).and_then(|p| p.change_24h);
                    PriceTick {
                        symbol,
                        price,
                        change_24h,
                        source: source.name().to_string(),
                        ts: now,
                    }
                })
                .collect(),
            FeedSource::Binance => parse_binance_message(text)
                .map(|(symbol, price, change_24h)| {
                    vec![PriceTick {
                        symbol,
                        price,
                        change_24h,
                        source: source.name().to_string(),
                        ts: now,
                    }]
                })
                .unwrap_or_default(),
            FeedSource::CoinGeckoPoll => Vec::new(),
        }
    }

    pub fn spawn(&self, market: MarketDataService, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move { this.run(market, shutdown).await })
    }

    async fn run(&self, market: MarketDataService, mut shutdown: watch::Receiver<bool>) {
        let mut selector = FailoverSelector::new(
            vec![FeedSource::CoinCap, FeedSource::Binance, FeedSource::CoinGeckoPoll],
            MAX_CONNECT_FAILURES,
            PRIMARY_RETRY_AFTER,
        );
        let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(60));

        tracing::info!("price stream starting");

        loop {
            if *shutdown.borrow() {
                break;
            }

            if selector.maybe_retry_primary(Instant::now()) {
                tracing::info!("price stream retrying primary source");
            }

            let source = selector.current();
            let budget = selector.fallback_remaining(Instant::now());
            self.update_status(|s| {
                s.source = source.name().to_string();
                s.failovers = selector.failovers();
            });

            let end = match source {
                FeedSource::CoinCap => self.run_ws(source, coincap_url(), budget, &mut shutdown).await,
                FeedSource::Binance => self.run_ws(source, binance_url(), budget, &mut shutdown).await,
                FeedSource::CoinGeckoPoll => self.run_poll(&market, budget, &mut shutdown).await,
            };

            self.update_status(|s| s.connected = false);

            let delay = match after_session(end, &mut selector, &mut backoff, Instant::now()) {
                NextStep::Stop => break,
                NextStep::Reconnect => continue,
                NextStep::ReconnectAfter(d) => d,
            };

            self.update_status(|s| {
                s.reconnects += 1;
                s.failovers = selector.failovers();
            });

            tracing::debug!("price stream reconnecting in {:?}", delay);
            tokio::select! {
                _ = sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        tracing::info!("price stream stopped");
    }

    async fn run_ws(
        &self,
        source: FeedSource,
        url: String,
        budget: Option<Duration>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let connected = tokio::select! {
            r = timeout(CONNECT_TIMEOUT, connect_async(url.as_str())) => r,
            _ = shutdown.changed() => return SessionEnd::Shutdown,
        };

        let ws = match connected {
            Ok(Ok((ws, _))) => ws,
            Ok(Err(e)) => return SessionEnd::ConnectFailed(e.to_string()),
            Err(_) => return SessionEnd::ConnectFailed("connect timed out".to_string()),
        };

        tracing::info!("price stream connected to {}", source.name());
        self.update_status(|s| s.connected = true);

        let (mut write, mut read) = ws.split();
        let deadline = budget.map(|b| tokio::time::Instant::now() + b);
        let mut received_any = false;

        loop {
            if let Some(d) = deadline {
                if tokio::time::Instant::now() >= d {
                    let _ = write.send(TMessage::Close(None)).await;
                    return SessionEnd::Rotate;
                }
            }

            let next = tokio::select! {
                m = timeout(self.inner.stale_after, read.next()) => m,
                _ = shutdown.changed() => {
                    let _ = write.send(TMessage::Close(None)).await;
                    return SessionEnd::Shutdown;
                }
            };

            match next {
                Err(_) => return SessionEnd::Stale,
                Ok(Some(Ok(TMessage::Text(txt)))) => {
                    let ticks = self.ticks_from(source, &txt);
                    if self.publish(ticks) > 0 {
                        received_any = true;
                    }
                }
                Ok(Some(Ok(TMessage::Ping(payload)))) => {
                    let _ = write.send(TMessage::Pong(payload)).await;
                }
                Ok(Some(Ok(TMessage::Close(_)))) | Ok(None) => return SessionEnd::Closed { received_any },
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(e))) => {
                    tracing::warn!("price stream {} read error: {}", source.name(), e);
                    return SessionEnd::Closed { received_any };
                }
            }
        }
    }

    async fn run_poll(
        &self,
        market: &MarketDataService,
        budget: Option<Duration>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let window = budget.unwrap_or(PRIMARY_RETRY_AFTER);
        let deadline = tokio::time::Instant::now() + window;
        let mut received_any = false;

        self.update_status(|s| s.connected = true);

        while tokio::time::Instant::now() < deadline {
            let quotes = market.get_all_prices().await;
            let ticks: Vec<PriceTick> = quotes
                .into_iter()
                .filter(|q| q.source != SOURCE_MOCK)
                .map(|q| PriceTick {
                    symbol: q.symbol,
                    price: q.price,
                    change_24h: q.change_24h,
                    source: FeedSource::CoinGeckoPoll.name().to_string(),
                    ts: Utc::now().timestamp(),
                })
                .collect();

            if self.publish(ticks) > 0 {
                received_any = true;
            }

            tokio::select! {
                _ = sleep(POLL_INTERVAL) => {}
                _ = shutdown.changed() => return SessionEnd::Shutdown,
            }
        }

        if received_any {
            SessionEnd::Rotate
        } else {
            SessionEnd::Closed { received_any }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let mut b = Backoff::new(Duration::from_secs(1), Duration::from_secs(5));
        assert_eq!(b.next_delay(), Duration::from_secs(1));
        assert_eq!(b.next_delay(), Duration::from_secs(2));
        assert_eq!(b.next_delay(), Duration::from_secs(4));
        assert_eq!(b.next_delay(), Duration::from_secs(5));
        assert_eq!(b.next_delay(), Duration::from_secs(5));
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_secs(1));
    }

    fn selector() -> FailoverSelector {
        FailoverSelector::new(
            vec![FeedSource::CoinCap, FeedSource::Binance, FeedSource::CoinGeckoPoll],
            3,
            Duration::from_secs(300),
        )
    }

    #[test]
    fn fails_over_after_repeated_connect_failures() {
        let now = Instant::now();
        let mut s = selector();

        assert!(!s.record_connect_failure(now));
        assert!(!s.record_connect_failure(now));
        assert!(s.record_connect_failure(now));
        assert_eq!(s.current(), FeedSource::Binance);
        assert_eq!(s.failovers(), 1);
    }

    #[test]
    fn success_resets_failure_count() {
        let now = Instant::now();
        let mut s = selector();

        s.record_connect_failure(now);
        s.record_connect_failure(now);
        s.record_success();
        assert!(!s.record_connect_failure(now));
        assert_eq!(s.current(), FeedSource::CoinCap);
    }

    #[test]
    fn stale_switches_immediately_and_wraps() {
        let now = Instant::now();
        let mut s = selector();

        s.record_stale(now);
        assert_eq!(s.current(), FeedSource::Binance);
        s.record_stale(now);
        assert_eq!(s.current(), FeedSource::CoinGeckoPoll);
        s.record_stale(now);
        assert_eq!(s.current(), FeedSource::CoinCap);
        assert_eq!(s.fallback_remaining(now), None);
    }

    #[test]
    fn fallback_returns_to_primary() {
        let now = Instant::now();
        let mut s = selector();
        s.record_stale(now);

        assert_eq!(s.fallback_remaining(now), Some(Duration::from_secs(300)));
        assert!(!s.maybe_retry_primary(now + Duration::from_secs(100)));
        assert!(s.maybe_retry_primary(now + Duration::from_secs(300)));
        assert_eq!(s.current(), FeedSource::CoinCap);
    }

    fn stream_loop_state() -> (FailoverSelector, Backoff) {
        (selector(), Backoff::new(Duration::from_secs(1), Duration::from_secs(60)))
    }

    #[test]
    fn silent_close_counts_as_connect_failure() {
        let now = Instant::now();
        let (mut sel, mut backoff) = stream_loop_state();
        let closed = || SessionEnd::Closed { received_any: false };

        assert_eq!(
            after_session(closed(), &mut sel, &mut backoff, now),
            NextStep::ReconnectAfter(Duration::from_secs(1))
        );
        assert_eq!(
            after_session(closed(), &mut sel, &mut backoff, now),
            NextStep::ReconnectAfter(Duration::from_secs(2))
        );
        assert_eq!(sel.current(), FeedSource::CoinCap);

        // third strike moves on and starts the backoff over
        assert_eq!(
            after_session(closed(), &mut sel, &mut backoff, now),
            NextStep::ReconnectAfter(Duration::from_secs(1))
        );
        assert_eq!(sel.current(), FeedSource::Binance);
    }

    #[test]
    fn connect_errors_and_silent_closes_share_the_count() {
        let now = Instant::now();
        let (mut sel, mut backoff) = stream_loop_state();

        after_session(SessionEnd::ConnectFailed("refused".into()), &mut sel, &mut backoff, now);
        after_session(SessionEnd::Closed { received_any: false }, &mut sel, &mut backoff, now);
        after_session(SessionEnd::ConnectFailed("refused".into()), &mut sel, &mut backoff, now);
        assert_eq!(sel.current(), FeedSource::Binance);
    }

    #[test]
    fn productive_session_resets_failures_and_backoff() {
        let now = Instant::now();
        let (mut sel, mut backoff) = stream_loop_state();

        after_session(SessionEnd::ConnectFailed("x".into()), &mut sel, &mut backoff, now);
        after_session(SessionEnd::ConnectFailed("x".into()), &mut sel, &mut backoff, now);
        assert_eq!(
            after_session(SessionEnd::Closed { received_any: true }, &mut sel, &mut backoff, now),
            NextStep::ReconnectAfter(Duration::from_secs(1))
        );

        after_session(SessionEnd::ConnectFailed("x".into()), &mut sel, &mut backoff, now);
        after_session(SessionEnd::ConnectFailed("x".into()), &mut sel, &mut backoff, now);
        assert_eq!(sel.current(), FeedSource::CoinCap);
    }

    #[test]
    fn stale_then_rotate_then_shutdown() {
        let now = Instant::now();
        let (mut sel, mut backoff) = stream_loop_state();
        backoff.next_delay();
        backoff.next_delay();

        assert_eq!(
            after_session(SessionEnd::Stale, &mut sel, &mut backoff, now),
            NextStep::ReconnectAfter(Duration::from_secs(1))
        );
        assert_eq!(sel.current(), FeedSource::Binance);
        assert_eq!(sel.failovers(), 1);

        assert_eq!(after_session(SessionEnd::Rotate, &mut sel, &mut backoff, now), NextStep::Reconnect);
        assert_eq!(after_session(SessionEnd::Shutdown, &mut sel, &mut backoff, now), NextStep::Stop);
    }

    #[test]
    fn parses_coincap_prices() {
        let ticks = parse_coincap_message(r#"{"bitcoin":"67000.12","ethereum":"3100.5","unknown":"1","solana":"bad"}"#);
        assert_eq!(
            ticks,
            vec![("BTC".to_string(), 67000.12), ("ETH".to_string(), 3100.5)]
        );
        assert!(parse_coincap_message("not json").is_empty());
    }

    #[test]
    fn parses_binance_mini_ticker() {
        let msg = r#"{"stream":"btcusdt@miniTicker","data":{"e":"24hrMiniTicker","s":"BTCUSDT","c":"110.0","o":"100.0","h":"1","l":"1","v":"1","q":"1"}}"#;
        let (sym, price, change) = parse_binance_message(msg).unwrap();
        assert_eq!(sym, "BTC");
        assert_eq!(price, 110.0);
        assert!((change.unwrap() - 10.0).abs() < 1e-9);

        assert!(parse_binance_message(r#"{"data":{"s":"FOOUSDT","c":"1","o":"1"}}"#).is_none());
    }

    #[tokio::test]
    async fn publish_updates_snapshot_and_fans_out() {
        let stream = PriceStream::new(30);
        let mut rx = stream.subscribe();

        let n = stream.publish(vec![PriceTick {
            symbol: "BTC".into(),
            price: 100.0,
            change_24h: None,
            source: "test".into(),
            ts: Utc::now().timestamp(),
        }]);

        assert_eq!(n, 1);
        assert_eq!(stream.price("BTC"), Some(100.0));
        assert_eq!(stream.snapshot().len(), 1);
        assert_eq!(rx.recv().await.unwrap()[0].symbol, "BTC");
        assert!(stream.status().last_tick_at.is_some());
    }

    #[test]
    fn old_ticks_are_not_tradeable() {
        let stream = PriceStream::new(30);
        stream.publish(vec![PriceTick {
            symbol: "ETH".into(),
            price: 1.0,
            change_24h: None,
            source: "test".into(),
            ts: Utc::now().timestamp() - 3600,
        }]);
        assert_eq!(stream.price("ETH"), None);
    }

    #[test]
    fn urls_cover_all_assets() {
        assert!(coincap_url().contains("bitcoin,ethereum"));
        assert!(binance_url().contains("btcusdt@miniTicker/ethusdt@miniTicker"));
    }
}
