//! Native token price movement alerts.

use anyhow::Result;
use chrono::Utc;
use tracing::{debug, info};

use crate::cache::keys;
use crate::context::AppContext;
use crate::detect;
use crate::monitors::balance::native_usd_price;
use crate::monitors::{dispatch, subscriber_addresses};
use crate::notifier::Notification;
use crate::types::ChainId;

pub const JOB: &str = "token-price-check";

pub async fn run(ctx: &AppContext, chain: ChainId) -> Result<()> {
    check(ctx, chain, Utc::now().timestamp()).await
}

pub async fn check(ctx: &AppContext, chain: ChainId, now: i64) -> Result<()> {
    let token = chain.native_token();
    let current = native_usd_price(ctx, chain).await?;

    let price_key = keys::price(token, chain);
    let stamp_key = keys::timestamp(JOB, token, chain);
    let cached = ctx.cache.get::<f64>(&price_key).await;
    let last_notified = ctx.cache.get::<i64>(&stamp_key).await;

    let decision = detect::price_movement(current, cached, last_notified, now)?;
    debug!(%chain, token, current, ?cached, change_pct = decision.change_pct, "price evaluated");

    let mut stamp = decision.stamp;
    if decision.notify {
        info!(%chain, token, change_pct = decision.change_pct, "price moved up");
        let recipients = subscriber_addresses(ctx).await;
        let notification = Notification::PriceMovement {
            token: token.to_string(),
            change_pct: decision.change_pct,
            price: current,
            previous: cached.unwrap_or(current),
        };
        // Cooldown starts only on delivery.
        stamp = matches!(dispatch(ctx, &notification, &recipients).await, Some(n) if n > 0);
    }
    ctx.cache.set(&price_key, &decision.price, None).await;
    if stamp {
        ctx.cache.set_timestamps(&[stamp_key], now).await;
    }
    Ok(())
}
