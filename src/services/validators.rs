use std::sync::OnceLock;

use regex::Regex;

use super::assets;

fn email_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex"))
}

fn username_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_]{3,32}$").expect("username regex"))
}

const BASE58: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

fn is_base58(s: &str) -> bool {
    s.chars().all(|c| BASE58.contains(c))
}

fn is_bech32_body(s: &str) -> bool {
    s.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

pub fn is_valid_email(email: &str) -> bool {
    email_re().is_match(email)
}

pub fn validate_username(username: &str) -> Result<(), String> {
    if username.is_empty() {
        return Err("Username is required.".into());
    }
    if !username_re().is_match(username) {
        return Err("Username must be 3-32 characters of letters, digits or underscore.".into());
    }
    Ok(())
}

pub fn validate_password(password: &str) -> Result<(), String> {
    if password.is_empty() {
        return Err("Password is required.".into());
    }
    if password.chars().count() < 8 {
        return Err("Password must be at least 8 characters.".into());
    }
    let has_letter = password.chars().any(|c| c.is_alphabetic());
    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    if !has_letter || !has_digit {
        return Err("Password must contain a letter and a digit.".into());
    }
    Ok(())
}

/// Uppercases and checks the symbol against the supported asset list.
pub fn normalize_symbol(symbol: &str) -> Option<String> {
    let sym = symbol.trim().to_uppercase();
    assets::by_symbol(&sym).map(|a| a.symbol.to_string())
}

pub fn is_valid_amount(amount: f64) -> bool {
    amount.is_finite() && amount > 0.0
}

pub fn parse_amount(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| is_valid_amount(*v))
}

pub fn is_valid_address(currency: &str, address: &str) -> bool {
    let addr = address.trim();
    if addr.is_empty() || addr.chars().any(char::is_whitespace) {
        return false;
    }

    match currency.to_uppercase().as_str() {
        "BTC" => {
            if let Some(rest) = addr.strip_prefix("bc1") {
                (26..=62).contains(&addr.len()) && is_bech32_body(rest)
            } else {
                (addr.starts_with('1') || addr.starts_with('3'))
                    && (26..=35).contains(&addr.len())
                    && is_base58(addr)
            }
        }
        "ETH" | "BNB" | "MATIC" | "USDT" | "USDC" => {
            addr.len() == 42
                && addr.starts_with("0x")
                && addr[2..].chars().all(|c| c.is_ascii_hexdigit())
        }
        "SOL" => (32..=44).contains(&addr.len()) && is_base58(addr),
        "XRP" => addr.starts_with('r') && (25..=35).contains(&addr.len()) && is_base58(addr),
        "DOGE" => addr.starts_with('D') && (33..=34).contains(&addr.len()) && is_base58(addr),
        "LTC" => {
            if let Some(rest) = addr.strip_prefix("ltc1") {
                (11..=59).contains(&rest.len()) && is_bech32_body(rest)
            } else {
                (addr.starts_with('L') || addr.starts_with('M'))
                    && (26..=34).contains(&addr.len())
                    && is_base58(addr)
            }
        }
        "ADA" => addr
            .strip_prefix("addr1")
            .map(|rest| rest.len() >= 50 && is_bech32_body(rest))
            .unwrap_or(false),
        _ => (20..=128).contains(&addr.len()) && addr.chars().all(|c| c.is_ascii_graphic()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emails() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("not-an-email"));
        assert!(!is_valid_email("a b@c.de"));
    }

    #[test]
    fn passwords_need_letters_and_digits() {
        assert!(validate_password("abcdefg1").is_ok());
        assert!(validate_password("abcdefgh").is_err());
        assert!(validate_password("12345678").is_err());
        assert!(validate_password("ab1").is_err());
    }

    #[test]
    fn usernames() {
        assert!(validate_username("trader_01").is_ok());
        assert!(validate_username("ab").is_err());
        assert!(validate_username("has space").is_err());
    }

    #[test]
    fn symbols_are_normalized() {
        assert_eq!(normalize_symbol(" eth "), Some("ETH".to_string()));
        assert_eq!(normalize_symbol("FOO"), None);
    }

    #[test]
    fn addresses_per_chain() {
        assert!(is_valid_address("BTC", "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq"));
        assert!(is_valid_address("BTC", "1BvBMSEYstWetqTFn5Au4m4GFg7xJaNVN2"));
        assert!(!is_valid_address("BTC", "0x52908400098527886E0F7030069857D2E4169EE7"));
        assert!(is_valid_address("ETH", "0x52908400098527886E0F7030069857D2E4169EE7"));
        assert!(!is_valid_address("ETH", "0x5290"));
        assert!(is_valid_address("DOGE", "DH5yaieqoZN36fDVciNyRueRGvGLR3mr7L"));
        assert!(!is_valid_address("SOL", "0OIl0OIl0OIl0OIl0OIl0OIl0OIl0OIl"));
    }

    #[test]
    fn bech32_btc_length_counts_the_prefix() {
        assert!(!is_valid_address("BTC", "bc1qqqqqqqqqqqq"));
        assert!(is_valid_address("BTC", &format!("bc1{}", "q".repeat(23))));
        assert!(is_valid_address("BTC", &format!("bc1{}", "q".repeat(59))));
        assert!(!is_valid_address("BTC", &format!("bc1{}", "q".repeat(60))));
    }

    #[test]
    fn amounts() {
        assert_eq!(parse_amount("1.5"), Some(1.5));
        assert_eq!(parse_amount("0"), None);
        assert_eq!(parse_amount("-2"), None);
        assert_eq!(parse_amount("NaN"), None);
        assert_eq!(parse_amount("abc"), None);
    }
}
