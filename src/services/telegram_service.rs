use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::watch;

use crate::AppState;

use super::{admin_service, trading_service, validators, withdrawal_service};

const API: &str = "https://api.telegram.org";
const LONG_POLL_SECS: u64 = 30;

pub const HELP_TEXT: &str = "<b>CoinMarket admin bot</b>\n\
/stats - platform numbers\n\
/pending - pending withdrawals\n\
/price SYMBOL - live price\n\
/help - this message";

/// Escapes text for messages sent with `parse_mode: HTML`.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(c),
        }
    }
    out
}

/// Telegram Bot API client for admin alerts and the admin command bot.
#[derive(Clone)]
pub struct TelegramService {
    http: Client,
    token: String,
    admin_chat_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start,
    Help,
    Stats,
    Pending,
    Price(Option<String>),
    Unknown,
}

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
}

#[derive(Debug, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<Message>,
}

#[derive(Debug, Deserialize)]
pub struct Message {
    pub chat: Chat,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Chat {
    pub id: i64,
}

/// Parses `/cmd@BotName args`. Returns None for plain text.
pub fn parse_command(text: &str) -> Option<Command> {
    let text = text.trim();
    let rest = text.strip_prefix('/')?;
    let mut parts = rest.split_whitespace();
    let head = parts.next()?;
    let name = head.split('@').next().unwrap_or(head).to_lowercase();

    Some(match name.as_str() {
        "start" => Command::Start,
        "help" => Command::Help,
        "stats" => Command::Stats,
        "pending" => Command::Pending,
        "price" => Command::Price(parts.next().map(|s| s.to_uppercase())),
        _ => Command::Unknown,
    })
}

impl TelegramService {
    pub fn new(token: String, admin_chat_id: String) -> Self {
        let http = Client::builder()
            .timeout(Duration::from_secs(LONG_POLL_SECS + 10))
            .build()
            .unwrap_or_default();
        Self {
            http,
            token,
            admin_chat_id,
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.token.is_empty() && !self.admin_chat_id.is_empty()
    }

    pub fn is_admin_chat(&self, chat_id: i64) -> bool {
        self.admin_chat_id == chat_id.to_string()
    }

    fn url(&self, method: &str) -> String {
        format!("{API}/bot{}/{method}", self.token)
    }

    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), String> {
        let res = self
            .http
            .post(self.url("sendMessage"))
            .json(&json!({
                "chat_id": chat_id,
                "text": text,
                "parse_mode": "HTML",
                "disable_web_page_preview": true,
            }))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        if !res.status().is_success() {
            return Err(format!("telegram sendMessage {}", res.status()));
        }
        Ok(())
    }

    pub async fn send_admin(&self, text: &str) -> Result<(), String> {
        if !self.is_enabled() {
            tracing::debug!("telegram disabled, admin message dropped: {}", text);
            return Ok(());
        }
        self.send_message(&self.admin_chat_id, text).await
    }

    /// Fire-and-forget admin message.
    pub fn spawn_admin(&self, text: String) {
        if !self.is_enabled() {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            if let Err(e) = this.send_admin(&text).await {
                tracing::warn!("telegram admin message failed: {}", e);
            }
        });
    }

    async fn get_updates(&self, offset: i64) -> Result<Vec<Update>, String> {
        let res = self
            .http
            .get(self.url("getUpdates"))
            .query(&[
                ("offset", offset.to_string()),
                ("timeout", LONG_POLL_SECS.to_string()),
                ("allowed_updates", r#"["message"]"#.to_string()),
            ])
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let body: UpdatesResponse = res.json().await.map_err(|e| e.to_string())?;
        if !body.ok {
            return Err("telegram getUpdates returned ok=false".to_string());
        }
        Ok(body.result)
    }
}

async fn reply_for(state: &AppState, cmd: Command) -> String {
    match cmd {
        Command::Start | Command::Help | Command::Unknown => HELP_TEXT.to_string(),
        Command::Stats => match admin_service::dashboard(state).await {
            Ok(d) => format!(
                "<b>Stats</b>\nUsers: {} ({} active, {} suspended)\nNew 24h: {}\nOrders 24h: {} (${:.2})\nPending withdrawals: {}\nDeposits: {} (${:.2})\nPrice feed: {} {}\nWebSockets: {}",
                d.users_total,
                d.users_active,
                d.users_suspended,
                d.new_users_24h,
                d.orders_24h,
                d.volume_24h,
                d.pending_withdrawals,
                d.deposits_finished,
                d.deposits_finished_usd,
                d.price_stream.source,
                if d.price_stream.connected { "up" } else { "down" },
                d.websockets.active,
            ),
            Err(e) => format!("Stats unavailable: {e}"),
        },
        Command::Pending => match withdrawal_service::list(state, None, Some("pending"), 10).await {
            Ok(list) if list.is_empty() => "No pending withdrawals.".to_string(),
            Ok(list) => {
                let mut out = String::from("<b>Pending withdrawals</b>");
                for w in list {
                    out.push_str(&format!("\n{} {} → <code>{}</code>", w.amount, w.currency, w.id.to_hex()));
                }
                out
            }
            Err(e) => format!("Lookup failed: {e}"),
        },
        Command::Price(None) => "Usage: /price BTC".to_string(),
        Command::Price(Some(sym)) => match validators::normalize_symbol(&sym) {
            None => format!("Unknown symbol {}.", escape_html(&sym)),
            Some(sym) => match trading_service::current_price(state, &sym).await {
                Ok(p) => format!("{sym}: ${p:.2}"),
                Err(_) => format!("{sym}: price unavailable"),
            },
        },
    }
}

/// Long-polls `getUpdates` and answers admin commands until shutdown.
pub fn spawn_poller(state: AppState, mut shutdown: watch::Receiver<bool>) {
    if !state.telegram.is_enabled() {
        tracing::info!("telegram bot disabled");
        return;
    }

    tokio::spawn(async move {
        let tg = state.telegram.clone();
        let mut offset = 0i64;
        tracing::info!("telegram bot polling");

        loop {
            let updates = tokio::select! {
                _ = shutdown.changed() => break,
                r = tg.get_updates(offset) => r,
            };

            let updates = match updates {
                Ok(u) => u,
                Err(e) => {
                    tracing::warn!("telegram poll failed: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    continue;
                }
            };

            for u in updates {
                offset = offset.max(u.update_id + 1);

                let Some(msg) = u.message else { continue };
                let Some(cmd) = msg.text.as_deref().and_then(parse_command) else {
                    continue;
                };
                if !tg.is_admin_chat(msg.chat.id) {
                    tracing::warn!("telegram command from non-admin chat {}", msg.chat.id);
                    continue;
                }

                let reply = reply_for(&state, cmd).await;
                if let Err(e) = tg.send_message(&msg.chat.id.to_string(), &reply).await {
                    tracing::warn!("telegram reply failed: {}", e);
                }
            }
        }

        tracing::info!("telegram bot stopped");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(parse_command("/start"), Some(Command::Start));
        assert_eq!(parse_command(" /STATS "), Some(Command::Stats));
        assert_eq!(parse_command("/pending@CoinMarketBot"), Some(Command::Pending));
        assert_eq!(parse_command("/price btc"), Some(Command::Price(Some("BTC".into()))));
        assert_eq!(parse_command("/price"), Some(Command::Price(None)));
        assert_eq!(parse_command("/dance"), Some(Command::Unknown));
        assert_eq!(parse_command("hello"), None);
    }

    #[test]
    fn html_special_chars_are_escaped() {
        assert_eq!(escape_html("a<b>&c"), "a&lt;b&gt;&amp;c");
        assert_eq!(escape_html("plain_user"), "plain_user");
        assert_eq!(
            format!("New user <b>{}</b> ({})", escape_html("bob"), escape_html("x<y@a&b.io")),
            "New user <b>bob</b> (x&lt;y@a&amp;b.io)"
        );
    }

    #[test]
    fn admin_chat_check() {
        let tg = TelegramService::new("t".into(), "-100123".into());
        assert!(tg.is_enabled());
        assert!(tg.is_admin_chat(-100123));
        assert!(!tg.is_admin_chat(42));
        assert!(!TelegramService::new(String::new(), "1".into()).is_enabled());
    }

    #[test]
    fn update_payload_parses() {
        let body = r#"{"ok":true,"result":[{"update_id":7,"message":{"chat":{"id":5},"text":"/help"}}]}"#;
        let r: UpdatesResponse = serde_json::from_str(body).unwrap();
        assert_eq!(r.result[0].update_id, 7);
        assert_eq!(r.result[0].message.as_ref().unwrap().chat.id, 5);
    }
}
