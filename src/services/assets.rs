/// Static metadata for a tradable asset and its ids at each upstream provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Asset {
    pub symbol: &'static str,
    pub name: &'static str,
    pub coingecko_id: &'static str,
    pub coincap_id: &'static str,
    pub binance_pair: &'static str,
    pub paprika_id: &'static str,
}

pub const ASSETS: &[Asset] = &[
    Asset { symbol: "BTC", name: "Bitcoin", coingecko_id: "bitcoin", coincap_id: "bitcoin", binance_pair: "BTCUSDT", paprika_id: "btc-bitcoin" },
    Asset { symbol: "ETH", name: "Ethereum", coingecko_id: "ethereum", coincap_id: "ethereum", binance_pair: "ETHUSDT", paprika_id: "eth-ethereum" },
    Asset { symbol: "SOL", name: "Solana", coingecko_id: "solana", coincap_id: "solana", binance_pair: "SOLUSDT", paprika_id: "sol-solana" },
    Asset { symbol: "BNB", name: "BNB", coingecko_id: "binancecoin", coincap_id: "binance-coin", binance_pair: "BNBUSDT", paprika_id: "bnb-binance-coin" },
    Asset { symbol: "XRP", name: "XRP", coingecko_id: "ripple", coincap_id: "xrp", binance_pair: "XRPUSDT", paprika_id: "xrp-xrp" },
    Asset { symbol: "ADA", name: "Cardano", coingecko_id: "cardano", coincap_id: "cardano", binance_pair: "ADAUSDT", paprika_id: "ada-cardano" },
    Asset { symbol: "DOGE", name: "Dogecoin", coingecko_id: "dogecoin", coincap_id: "dogecoin", binance_pair: "DOGEUSDT", paprika_id: "doge-dogecoin" },
    Asset { symbol: "DOT", name: "Polkadot", coingecko_id: "polkadot", coincap_id: "polkadot", binance_pair: "DOTUSDT", paprika_id: "dot-polkadot" },
    Asset { symbol: "LTC", name: "Litecoin", coingecko_id: "litecoin", coincap_id: "litecoin", binance_pair: "LTCUSDT", paprika_id: "ltc-litecoin" },
    Asset { symbol: "MATIC", name: "Polygon", coingecko_id: "matic-network", coincap_id: "polygon", binance_pair: "MATICUSDT", paprika_id: "matic-polygon" },
];

pub fn by_symbol(symbol: &str) -> Option<&'static Asset> {
    ASSETS.iter().find(|a| a.symbol.eq_ignore_ascii_case(symbol))
}

pub fn by_coincap_id(id: &str) -> Option<&'static Asset> {
    ASSETS.iter().find(|a| a.coincap_id == id)
}

pub fn by_coingecko_id(id: &str) -> Option<&'static Asset> {
    ASSETS.iter().find(|a| a.coingecko_id == id)
}

pub fn by_binance_pair(pair: &str) -> Option<&'static Asset> {
    ASSETS.iter().find(|a| a.binance_pair.eq_ignore_ascii_case(pair))
}

pub fn symbols() -> Vec<&'static str> {
    ASSETS.iter().map(|a| a.symbol).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookups_agree_across_providers() {
        let btc = by_symbol("btc").unwrap();
        assert_eq!(by_coincap_id("bitcoin"), Some(btc));
        assert_eq!(by_coingecko_id("bitcoin"), Some(btc));
        assert_eq!(by_binance_pair("btcusdt"), Some(btc));
        assert!(by_symbol("NOPE").is_none());
    }
}
