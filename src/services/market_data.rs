use std::{collections::HashMap, time::Duration};

use chrono::Utc;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::{
    assets::{self, Asset},
    cache::CacheService,
};

pub const SOURCE_MOCK: &str = "mock";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarketQuote {
    pub symbol: String,
    pub name: String,
    pub price: f64,
    pub change_24h: Option<f64>,
    pub market_cap: Option<f64>,
    pub volume_24h: Option<f64>,
    pub source: String,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryPoint {
    pub ts: i64,
    pub price: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    CoinGecko,
    CoinCap,
    CoinPaprika,
    CoinMarketCap,
}

impl Source {
    pub fn name(self) -> &'static str {
        match self {
            Source::CoinGecko => "coingecko",
            Source::CoinCap => "coincap",
            Source::CoinPaprika => "coinpaprika",
            Source::CoinMarketCap => "coinmarketcap",
        }
    }
}

/// REST market data with ordered provider fallback, shared caching and mock
/// data as the last resort.
#[derive(Clone)]
pub struct MarketDataService {
    http: Client,
    cache: CacheService,
    coingecko_key: String,
    cmc_key: String,
    cache_ttl: Duration,
}

impl MarketDataService {
    pub fn new(cache: CacheService, coingecko_key: String, cmc_key: String, cache_ttl_secs: u64) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(8))
            .user_agent("coinmarket/0.1")
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            http,
            cache,
            coingecko_key,
            cmc_key,
            cache_ttl: Duration::from_secs(cache_ttl_secs.max(1)),
        }
    }

    pub fn sources(&self) -> Vec<Source> {
        let mut out = vec![Source::CoinGecko, Source::CoinCap, Source::CoinPaprika];
        if !self.cmc_key.trim().is_empty() {
            out.push(Source::CoinMarketCap);
        }
        out
    }

    /// Quotes for the given symbols. Unknown symbols are dropped; never fails,
    /// falling back to mock prices when every provider is down.
    pub async fn get_prices(&self, symbols: &[String]) -> Vec<MarketQuote> {
        let mut wanted: Vec<&'static Asset> = symbols.iter().filter_map(|s| assets::by_symbol(s)).collect();
        wanted.sort_by_key(|a| a.symbol);
        wanted.dedup();

        if wanted.is_empty() {
            return Vec::new();
        }

        let key = format!(
            "prices:{}",
            wanted.iter().map(|a| a.symbol).collect::<Vec<_>>().join(",")
        );

        if let Some(hit) = self.cache.get_json::<Vec<MarketQuote>>(&key).await {
            return hit;
        }

        for source in self.sources() {
            match self.fetch_from(source, &wanted).await {
                Ok(quotes) if !quotes.is_empty() => {
                    self.cache.set_json(&key, &quotes, self.cache_ttl).await;
                    return quotes;
                }
                Ok(_) => tracing::warn!("{} returned no quotes", source.name()),
                Err(e) => tracing::warn!("{} price fetch failed: {}", source.name(), e),
            }
        }

        tracing::warn!("all market data sources failed, serving mock prices");
        mock_quotes(&wanted)
    }

    pub async fn get_all_prices(&self) -> Vec<MarketQuote> {
        let all: Vec<String> = assets::symbols().into_iter().map(String::from).collect();
        self.get_prices(&all).await
    }

    /// Supported assets ordered by market cap: CoinGecko `/coins/markets`,
    /// then CoinCap, then mock data.
    pub async fn get_markets(&self, limit: usize) -> Vec<MarketQuote> {
        let limit = limit.clamp(1, assets::ASSETS.len());
        let key = format!("markets:{limit}");

        if let Some(hit) = self.cache.get_json::<Vec<MarketQuote>>(&key).await {
            return hit;
        }

        let all: Vec<&'static Asset> = assets::ASSETS.iter().collect();
        let fetched = match self.fetch_coingecko_markets(&all).await {
            Ok(q) if !q.is_empty() => Some(q),
            Ok(_) => None,
            Err(e) => {
                tracing::warn!("coingecko markets failed: {}", e);
                None
            }
        };
        let fetched = match fetched {
            Some(q) => Some(q),
            None => match self.fetch_coincap(&all).await {
                Ok(q) if !q.is_empty() => Some(q),
                Ok(_) => None,
                Err(e) => {
                    tracing::warn!("coincap markets failed: {}", e);
                    None
                }
            },
        };

        match fetched {
            Some(quotes) => {
                let quotes = rank_by_market_cap(quotes, limit);
                self.cache.set_json(&key, &quotes, self.cache_ttl).await;
                quotes
            }
            None => {
                tracing::warn!("market overview serving mock data");
                rank_by_market_cap(mock_quotes(&all), limit)
            }
        }
    }

    pub async fn get_history(&self, symbol: &str, days: u32) -> Result<Vec<HistoryPoint>, String> {
        let asset = assets::by_symbol(symbol).ok_or_else(|| format!("unsupported symbol {symbol}"))?;
        let days = days.clamp(1, 365);
        let key = format!("history:{}:{}", asset.symbol, days);

        if let Some(hit) = self.cache.get_json::<Vec<HistoryPoint>>(&key).await {
            return Ok(hit);
        }

        let url = format!(
            "https://api.coingecko.com/api/v3/coins/{}/market_chart",
            asset.coingecko_id
        );
        let days_s = days.to_string();
        let res = self
            .coingecko(self.http.get(url))
            .query(&[("vs_currency", "usd"), ("days", days_s.as_str())])
            .send()
            .await;

        let fetched = match res {
            Ok(r) if r.status().is_success() => r
                .json::<CoinGeckoChart>()
                .await
                .map(|c| parse_coingecko_chart(&c))
                .map_err(|e| e.to_string()),
            Ok(r) => Err(format!("coingecko chart failed: {}", r.status())),
            Err(e) => Err(e.to_string()),
        };

        match fetched {
            Ok(points) if !points.is_empty() => {
                self.cache.set_json(&key, &points, Duration::from_secs(300)).await;
                Ok(points)
            }
            Ok(_) => Ok(mock_history(asset, days)),
            Err(e) => {
                tracing::warn!("history for {} fell back to mock: {}", asset.symbol, e);
                Ok(mock_history(asset, days))
            }
        }
    }

    fn coingecko(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.coingecko_key.trim().is_empty() {
            req
        } else {
            req.header("x-cg-demo-api-key", &self.coingecko_key)
        }
    }

    async fn fetch_from(&self, source: Source, wanted: &[&'static Asset]) -> Result<Vec<MarketQuote>, String> {
        match source {
            Source::CoinGecko => self.fetch_coingecko(wanted).await,
            Source::CoinCap => self.fetch_coincap(wanted).await,
            Source::CoinPaprika => self.fetch_paprika(wanted).await,
            Source::CoinMarketCap => self.fetch_cmc(wanted).await,
        }
    }

    async fn fetch_coingecko(&self, wanted: &[&'static Asset]) -> Result<Vec<MarketQuote>, String> {
        let ids = wanted.iter().map(|a| a.coingecko_id).collect::<Vec<_>>().join(",");
        let res = self
            .coingecko(self.http.get("https://api.coingecko.com/api/v3/simple/price"))
            .query(&[
                ("ids", ids.as_str()),
                ("vs_currencies", "usd"),
                ("include_24hr_change", "true"),
                ("include_market_cap", "true"),
                ("include_24hr_vol", "true"),
            ])
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !res.status().is_success() {
            return Err(format!("coingecko status {}", res.status()));
        }

        let body = res
            .json::<HashMap<String, CoinGeckoSimple>>()
            .await
            .map_err(|e| e.to_string())?;
        Ok(parse_coingecko_simple(&body))
    }

    async fn fetch_coingecko_markets(&self, wanted: &[&'static Asset]) -> Result<Vec<MarketQuote>, String> {
        let ids = wanted.iter().map(|a| a.coingecko_id).collect::<Vec<_>>().join(",");
        let per_page = wanted.len().to_string();
        let res = self
            .coingecko(self.http.get("https://api.coingecko.com/api/v3/coins/markets"))
            .query(&[
                ("vs_currency", "usd"),
                ("ids", ids.as_str()),
                ("order", "market_cap_desc"),
                ("per_page", per_page.as_str()),
                ("page", "1"),
            ])
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !res.status().is_success() {
            return Err(format!("coingecko markets status {}", res.status()));
        }

        let body = res
            .json::<Vec<CoinGeckoMarket>>()
            .await
            .map_err(|e| e.to_string())?;
        Ok(parse_coingecko_markets(&body))
    }

    async fn fetch_coincap(&self, wanted: &[&'static Asset]) -> Result<Vec<MarketQuote>, String> {
        let ids = wanted.iter().map(|a| a.coincap_id).collect::<Vec<_>>().join(",");
        let res = self
            .http
            .get("https://api.coincap.io/v2/assets")
            .query(&[("ids", ids.as_str())])
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !res.status().is_success() {
            return Err(format!("coincap status {}", res.status()));
        }

        let body = res.json::<CoinCapAssets>().await.map_err(|e| e.to_string())?;
        Ok(parse_coincap_assets(&body))
    }

    async fn fetch_paprika(&self, wanted: &[&'static Asset]) -> Result<Vec<MarketQuote>, String> {
        let mut out = Vec::with_capacity(wanted.len());
        for asset in wanted {
            let url = format!("https://api.coinpaprika.com/v1/tickers/{}", asset.paprika_id);
            let res = self.http.get(url).send().await.map_err(|e| e.to_string())?;
            if !res.status().is_success() {
                return Err(format!("coinpaprika status {}", res.status()));
            }
            let t = res.json::<PaprikaTicker>().await.map_err(|e| e.to_string())?;
            if let Some(q) = t.quotes.get("USD") {
                out.push(MarketQuote {
                    symbol: asset.symbol.to_string(),
                    name: asset.name.to_string(),
                    price: q.price,
                    change_24h: q.percent_change_24h,
                    market_cap: q.market_cap,
                    volume_24h: q.volume_24h,
                    source: Source::CoinPaprika.name().to_string(),
                    updated_at: Utc::now().timestamp(),
                });
            }
        }
        Ok(out)
    }

    async fn fetch_cmc(&self, wanted: &[&'static Asset]) -> Result<Vec<MarketQuote>, String> {
        let syms = wanted.iter().map(|a| a.symbol).collect::<Vec<_>>().join(",");
        let res = self
            .http
            .get("https://pro-api.coinmarketcap.com/v1/cryptocurrency/quotes/latest")
            .header("X-CMC_PRO_API_KEY", &self.cmc_key)
            .query(&[("symbol", syms.as_str()), ("convert", "USD")])
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !res.status().is_success() {
            return Err(format!("coinmarketcap status {}", res.status()));
        }

        let body = res.json::<CmcQuotes>().await.map_err(|e| e.to_string())?;
        let now = Utc::now().timestamp();
        Ok(body
            .data
            .iter()
            .filter_map(|(sym, entry)| {
                let asset = assets::by_symbol(sym)?;
                let q = entry.quote.get("USD")?;
                Some(MarketQuote {
                    symbol: asset.symbol.to_string(),
                    name: asset.name.to_string(),
                    price: q.price,
                    change_24h: q.percent_change_24h,
                    market_cap: q.market_cap,
                    volume_24h: q.volume_24h,
                    source: Source::CoinMarketCap.name().to_string(),
                    updated_at: now,
                })
            })
            .collect())
    }
}

#[derive(Debug, Deserialize)]
pub struct CoinGeckoSimple {
    pub usd: Option<f64>,
    pub usd_24h_change: Option<f64>,
    pub usd_market_cap: Option<f64>,
    pub usd_24h_vol: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct CoinGeckoMarket {
    pub id: String,
    pub current_price: Option<f64>,
    pub price_change_percentage_24h: Option<f64>,
    pub market_cap: Option<f64>,
    pub total_volume: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct CoinGeckoChart {
    #[serde(default)]
    pub prices: Vec<(f64, f64)>,
}

#[derive(Debug, Deserialize)]
pub struct CoinCapAssets {
    pub data: Vec<CoinCapAsset>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoinCapAsset {
    pub id: String,
    pub price_usd: Option<String>,
    pub change_percent24_hr: Option<String>,
    pub market_cap_usd: Option<String>,
    pub volume_usd24_hr: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PaprikaTicker {
    quotes: HashMap<String, UsdQuote>,
}

#[derive(Debug, Deserialize)]
struct CmcQuotes {
    data: HashMap<String, CmcEntry>,
}

#[derive(Debug, Deserialize)]
struct CmcEntry {
    quote: HashMap<String, UsdQuote>,
}

#[derive(Debug, Deserialize)]
struct UsdQuote {
    price: f64,
    #[serde(default)]
    percent_change_24h: Option<f64>,
    #[serde(default)]
    market_cap: Option<f64>,
    #[serde(default)]
    volume_24h: Option<f64>,
}

fn num(s: &Option<String>) -> Option<f64> {
    s.as_deref().and_then(|v| v.parse::<f64>().ok()).filter(|v| v.is_finite())
}

pub fn parse_coingecko_simple(body: &HashMap<String, CoinGeckoSimple>) -> Vec<MarketQuote> {
    let now = Utc::now().timestamp();
    let mut out: Vec<MarketQuote> = body
        .iter()
        .filter_map(|(id, q)| {
            let asset = assets::by_coingecko_id(id)?;
            let price = q.usd.filter(|p| p.is_finite() && *p > 0.0)?;
            Some(MarketQuote {
                symbol: asset.symbol.to_string(),
                name: asset.name.to_string(),
                price,
                change_24h: q.usd_24h_change,
                market_cap: q.usd_market_cap,
                volume_24h: q.usd_24h_vol,
                source: Source::CoinGecko.name().to_string(),
                updated_at: now,
            })
        })
        .collect();
    out.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    out
}

pub fn parse_coingecko_markets(rows: &[CoinGeckoMarket]) -> Vec<MarketQuote> {
    let now = Utc::now().timestamp();
    rows.iter()
        .filter_map(|r| {
            let asset = assets::by_coingecko_id(&r.id)?;
            let price = r.current_price.filter(|p| p.is_finite() && *p > 0.0)?;
            Some(MarketQuote {
                symbol: asset.symbol.to_string(),
                name: asset.name.to_string(),
                price,
                change_24h: r.price_change_percentage_24h,
                market_cap: r.market_cap,
                volume_24h: r.total_volume,
                source: Source::CoinGecko.name().to_string(),
                updated_at: now,
            })
        })
        .collect()
}

pub fn rank_by_market_cap(mut quotes: Vec<MarketQuote>, limit: usize) -> Vec<MarketQuote> {
    quotes.sort_by(|a, b| {
        b.market_cap
            .unwrap_or(0.0)
            .partial_cmp(&a.market_cap.unwrap_or(0.0))
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    quotes.truncate(limit.max(1));
    quotes
}

pub fn parse_coincap_assets(body: &CoinCapAssets) -> Vec<MarketQuote> {
    let now = Utc::now().timestamp();
    body.data
        .iter()
        .filter_map(|a| {
            let asset = assets::by_coincap_id(&a.id)?;
            let price = num(&a.price_usd).filter(|p| *p > 0.0)?;
            Some(MarketQuote {
                symbol: asset.symbol.to_string(),
                name: asset.name.to_string(),
                price,
                change_24h: num(&a.change_percent24_hr),
                market_cap: num(&a.market_cap_usd),
                volume_24h: num(&a.volume_usd24_hr),
                source: Source::CoinCap.name().to_string(),
                updated_at: now,
            })
        })
        .collect()
}

pub fn parse_coingecko_chart(chart: &CoinGeckoChart) -> Vec<HistoryPoint> {
    chart
        .prices
        .iter()
        .filter(|(_, p)| p.is_finite())
        .map(|(ms, p)| HistoryPoint {
            ts: (*ms / 1000.0) as i64,
            price: *p,
        })
        .collect()
}

pub fn mock_price(symbol: &str) -> f64 {
    match symbol {
        "BTC" => 65_000.0,
        "ETH" => 3_200.0,
        "SOL" => 150.0,
        "BNB" => 580.0,
        "XRP" => 0.55,
        "ADA" => 0.45,
        "DOGE" => 0.12,
        "DOT" => 6.5,
        "LTC" => 80.0,
        "MATIC" => 0.7,
        _ => 1.0,
    }
}

pub fn mock_quotes(wanted: &[&'static Asset]) -> Vec<MarketQuote> {
    let now = Utc::now().timestamp();
    wanted
        .iter()
        .map(|a| {
            let price = mock_price(a.symbol);
            MarketQuote {
                symbol: a.symbol.to_string(),
                name: a.name.to_string(),
                price,
                change_24h: Some(0.0),
                market_cap: Some(price * 1_000_000.0),
                volume_24h: Some(price * 10_000.0),
                source: SOURCE_MOCK.to_string(),
                updated_at: now,
            }
        })
        .collect()
}

/// Hourly points of a gentle sine wave around the mock price.
pub fn mock_history(asset: &Asset, days: u32) -> Vec<HistoryPoint> {
    let base = mock_price(asset.symbol);
    let now = Utc::now().timestamp();
    let points = (days as i64 * 24).max(2);
    (0..points)
        .map(|i| {
            let wave = ((i as f64) / 12.0).sin() * 0.02;
            HistoryPoint {
                ts: now - (points - i) * 3600,
                price: base * (1.0 + wave),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coingecko_simple_is_mapped_to_symbols() {
        let raw = r#"{"bitcoin":{"usd":67000.5,"usd_24h_change":1.2,"usd_market_cap":1.3e12,"usd_24h_vol":2.0e10},
                      "ethereum":{"usd":3100.0},
                      "unknown-coin":{"usd":1.0}}"#;
        let body: HashMap<String, CoinGeckoSimple> = serde_json::from_str(raw).unwrap();
        let quotes = parse_coingecko_simple(&body);

        assert_eq!(quotes.len(), 2);
        assert_eq!(quotes[0].symbol, "BTC");
        assert_eq!(quotes[0].price, 67000.5);
        assert_eq!(quotes[0].change_24h, Some(1.2));
        assert_eq!(quotes[1].symbol, "ETH");
        assert_eq!(quotes[1].market_cap, None);
    }

    #[test]
    fn coins_markets_rows_rank_by_market_cap() {
        let raw = r#"[{"id":"ethereum","current_price":3100.0,"price_change_percentage_24h":-1.5,"market_cap":3.7e11,"total_volume":1.5e10},
                     {"id":"bitcoin","current_price":67000.0,"price_change_percentage_24h":0.8,"market_cap":1.3e12,"total_volume":2.8e10},
                     {"id":"shiba-inu","current_price":0.00002,"market_cap":1.0e10,"total_volume":1.0},
                     {"id":"solana","current_price":null,"market_cap":7.0e10}]"#;
        let rows: Vec<CoinGeckoMarket> = serde_json::from_str(raw).unwrap();
        let quotes = parse_coingecko_markets(&rows);
        assert_eq!(quotes.len(), 2);

        let top = rank_by_market_cap(quotes, 1);
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].symbol, "BTC");
        assert_eq!(top[0].change_24h, Some(0.8));
        assert_eq!(top[0].volume_24h, Some(2.8e10));
        assert_eq!(top[0].source, "coingecko");
    }

    #[test]
    fn coincap_strings_are_parsed() {
        let raw = r#"{"data":[{"id":"solana","priceUsd":"151.25","changePercent24Hr":"-2.5","marketCapUsd":null,"volumeUsd24Hr":"1000"},
                              {"id":"bitcoin","priceUsd":"garbage"}]}"#;
        let body: CoinCapAssets = serde_json::from_str(raw).unwrap();
        let quotes = parse_coincap_assets(&body);

        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].symbol, "SOL");
        assert_eq!(quotes[0].price, 151.25);
        assert_eq!(quotes[0].change_24h, Some(-2.5));
        assert_eq!(quotes[0].source, "coincap");
    }

    #[test]
    fn chart_timestamps_are_seconds() {
        let chart = CoinGeckoChart {
            prices: vec![(1_700_000_000_000.0, 10.0), (1_700_000_360_000.0, 11.0)],
        };
        let pts = parse_coingecko_chart(&chart);
        assert_eq!(pts[0].ts, 1_700_000_000);
        assert_eq!(pts[1].price, 11.0);
    }

    #[test]
    fn mock_data_is_flagged() {
        let btc = assets::by_symbol("BTC").unwrap();
        let q = mock_quotes(&[btc]);
        assert_eq!(q[0].source, SOURCE_MOCK);
        assert_eq!(mock_history(btc, 1).len(), 24);
    }
}
