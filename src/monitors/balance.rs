//! Low native balance alerts.

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::cache::keys;
use crate::context::AppContext;
use crate::detect::{self, CacheUpdate};
use crate::monitors::{dispatch, subscriber_addresses};
use crate::notifier::Notification;
use crate::types::ChainId;

pub const JOB: &str = "balance-check";

/// USD price of the chain's native token, from the cached map when present.
pub(crate) async fn native_usd_price(ctx: &AppContext, chain: ChainId) -> Result<f64> {
    let token = chain.native_token();
    if let Some(price) = ctx
        .cache
        .token_prices()
        .await
        .and_then(|prices| prices.get(token).copied())
    {
        return Ok(price);
    }
    let prices = ctx
        .sources
        .prices
        .usd_prices(&[token.to_string()])
        .await
        .with_context(|| format!("failed to fetch {token} price"))?;
    prices
        .get(token)
        .copied()
        .with_context(|| format!("no USD price for {token}"))
}

pub async fn run(ctx: &AppContext, chain: ChainId) -> Result<()> {
    let addresses = subscriber_addresses(ctx).await;
    if addresses.is_empty() {
        debug!(%chain, "no subscribers, skipping balance check");
        return Ok(());
    }
    let usd_price = native_usd_price(ctx, chain).await?;
    let balances = ctx
        .sources
        .balances
        .native_balances(chain, &addresses)
        .await
        .context("failed to fetch balances")?;

    let mut recipients = Vec::new();
    for account in &balances {
        let key = keys::balance(&account.address, chain);
        let cached = ctx.cache.get::<f64>(&key).await;
        let decision = detect::balance_drop(account.balance, cached, usd_price);
        if decision.notify {
            recipients.push(account.address.clone());
        }
        match decision.update {
            CacheUpdate::Set(balance) | CacheUpdate::SetOnDispatch(balance) => {
                ctx.cache.set(&key, &balance, None).await
            }
            CacheUpdate::Keep => {}
        }
    }

    if recipients.is_empty() {
        debug!(%chain, checked = balances.len(), "no low balances");
        return Ok(());
    }
    info!(%chain, count = recipients.len(), "balances fell below threshold");
    dispatch(ctx, &Notification::LowBalance { chain }, &recipients).await;
    Ok(())
}
