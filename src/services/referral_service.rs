use chrono::Utc;
use futures_util::StreamExt;
use mongodb::bson::{doc, oid::ObjectId};
use serde::Serialize;

use crate::{
    models::{
        referral::{STATUS_PENDING, STATUS_REWARDED},
        wallet::USD,
        Referral, User,
    },
    AppState,
};

use super::{account_service, notification_service};

#[derive(Debug, Clone, Serialize)]
pub struct ReferralStats {
    pub code: String,
    pub link: String,
    pub referred: u64,
    pub rewarded: u64,
    pub total_earned: f64,
}

/// Bonus for a referred deposit, rounded to cents.
pub fn reward_amount(deposit_usd: f64, pct: f64) -> f64 {
    if !(deposit_usd.is_finite() && pct.is_finite()) || deposit_usd <= 0.0 || pct <= 0.0 {
        return 0.0;
    }
    (deposit_usd * pct / 100.0 * 100.0).round() / 100.0
}

pub fn share_link(base_url: &str, code: &str) -> String {
    format!("{}/register?ref={}", base_url.trim_end_matches('/'), code)
}

fn referrals(state: &AppState) -> mongodb::Collection<Referral> {
    state.db.collection::<Referral>("referrals")
}

pub async fn record_signup(state: &AppState, referrer_id: ObjectId, referred_id: ObjectId) -> Result<(), String> {
    let r = Referral {
        id: ObjectId::new(),
        referrer_id,
        referred_id,
        status: STATUS_PENDING.to_string(),
        reward_usd: 0.0,
        created_at: Utc::now().timestamp(),
        rewarded_at: None,
    };
    referrals(state).insert_one(&r, None).await.map_err(|e| e.to_string())?;
    Ok(())
}

/// Pays the referrer once, on the referred user's first credited deposit.
/// Returns the bonus paid, if any.
pub async fn reward_first_deposit(state: &AppState, referred_id: ObjectId, deposit_usd: f64) -> Result<Option<f64>, String> {
    let reward = reward_amount(deposit_usd, state.settings.referral_bonus_pct);
    if reward <= 0.0 {
        return Ok(None);
    }

    let Some(r) = referrals(state)
        .find_one(doc! { "referred_id": referred_id, "status": STATUS_PENDING }, None)
        .await
        .map_err(|e| e.to_string())?
    else {
        return Ok(None);
    };

    let claimed = referrals(state)
        .update_one(
            doc! { "_id": r.id, "status": STATUS_PENDING },
            doc! { "$set": {
                "status": STATUS_REWARDED,
                "reward_usd": reward,
                "rewarded_at": Utc::now().timestamp(),
            } },
            None,
        )
        .await
        .map_err(|e| e.to_string())?;
    if claimed.matched_count == 0 {
        return Ok(None);
    }

    account_service::credit(state, r.referrer_id, USD, reward).await?;
    account_service::record_transaction_logged(
        state,
        r.referrer_id,
        "referral_bonus",
        USD,
        reward,
        Some(referred_id.to_hex()),
    )
    .await;
    notification_service::notify_logged(
        state,
        r.referrer_id,
        "Referral bonus",
        &format!("You earned ${reward:.2} from a referred friend's deposit."),
        "referral",
    )
    .await;

    tracing::info!("referral bonus {} paid to {}", reward, r.referrer_id);
    Ok(Some(reward))
}

pub async fn stats(state: &AppState, user: &User) -> Result<ReferralStats, String> {
    let mut cursor = referrals(state)
        .find(doc! { "referrer_id": user.id }, None)
        .await
        .map_err(|e| e.to_string())?;

    let mut referred = 0;
    let mut rewarded = 0;
    let mut total_earned = 0.0;
    while let Some(item) = cursor.next().await {
        let r = item.map_err(|e| e.to_string())?;
        referred += 1;
        if r.status == STATUS_REWARDED {
            rewarded += 1;
            total_earned += r.reward_usd;
        }
    }

    Ok(ReferralStats {
        code: user.referral_code.clone(),
        link: share_link(&state.settings.public_base_url, &user.referral_code),
        referred,
        rewarded,
        total_earned,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reward_is_percentage_in_cents() {
        assert_eq!(reward_amount(100.0, 5.0), 5.0);
        assert_eq!(reward_amount(250.0, 2.5), 6.25);
        assert_eq!(reward_amount(100.0, 0.0), 0.0);
        assert_eq!(reward_amount(-5.0, 5.0), 0.0);
    }

    #[test]
    fn link_has_no_double_slash() {
        assert_eq!(
            share_link("https://coin.example/", "ABCD1234"),
            "https://coin.example/register?ref=ABCD1234"
        );
    }
}
