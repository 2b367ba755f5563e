use handlebars::Handlebars;
use serde_json::Value;
use std::sync::Arc;

pub type Hbs = Arc<Handlebars<'static>>;

/// Email templates: (name, subject template, body template).
const EMAILS: &[(&str, &str, &str)] = &[
    ("welcome", "Welcome to CoinMarket, {{username}}", include_str!("../../templates/emails/welcome.hbs")),
    ("password_reset", "Reset your CoinMarket password", include_str!("../../templates/emails/password_reset.hbs")),
    ("deposit_confirmed", "Deposit of ${{amount}} confirmed", include_str!("../../templates/emails/deposit_confirmed.hbs")),
    ("withdrawal_status", "Withdrawal {{status}}: {{amount}} {{currency}}", include_str!("../../templates/emails/withdrawal_status.hbs")),
    ("price_alert", "{{symbol}} price alert", include_str!("../../templates/emails/price_alert.hbs")),
];

pub fn build_handlebars() -> Result<Hbs, String> {
    let mut hb = Handlebars::new();
    hb.set_strict_mode(false);

    hb.register_partial("layout", include_str!("../../templates/emails/layout.hbs"))
        .map_err(|e| format!("email layout: {e}"))?;

    for (name, subject, body) in EMAILS {
        hb.register_template_string(&format!("{name}.subject"), *subject)
            .map_err(|e| format!("email {name} subject: {e}"))?;
        hb.register_template_string(&format!("{name}.html"), *body)
            .map_err(|e| format!("email {name} body: {e}"))?;
    }

    Ok(Arc::new(hb))
}

/// Renders `(subject, html)` for a named email.
pub fn render_email(hbs: &Hbs, name: &str, ctx: &Value) -> Result<(String, String), String> {
    let subject = hbs
        .render(&format!("{name}.subject"), ctx)
        .map_err(|e| e.to_string())?;
    let html = hbs.render(&format!("{name}.html"), ctx).map_err(|e| e.to_string())?;
    Ok((subject, html))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn every_email_renders() {
        let hbs = build_handlebars().unwrap();
        let ctx = json!({
            "username": "alice", "referral_code": "ABCD1234", "reset_url": "http://x/reset?token=t",
            "amount": "100.00", "pay_currency": "btc", "payment_id": "42", "currency": "BTC",
            "address": "bc1q", "status": "approved", "note": "", "symbol": "BTC",
            "condition": "above", "target_price": "1", "price": "2"
        });
        for (name, _, _) in EMAILS {
            let (subject, html) = render_email(&hbs, name, &ctx).unwrap();
            assert!(!subject.is_empty());
            assert!(html.contains("CoinMarket"));
        }
    }

    #[test]
    fn values_are_escaped() {
        let hbs = build_handlebars().unwrap();
        let (_, html) = render_email(&hbs, "welcome", &json!({"username": "<b>x</b>", "referral_code": "C"})).unwrap();
        assert!(html.contains("&lt;b&gt;x&lt;/b&gt;"));
    }
}
