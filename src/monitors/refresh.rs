//! Jobs that only keep shared inputs fresh for the monitors.

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{info, warn};

use crate::cache::WhitelistedFarms;
use crate::context::AppContext;

pub const TOKEN_PRICES_JOB: &str = "token-prices";
pub const SUBSCRIBERS_JOB: &str = "subscribers";
pub const WHITELIST_FARMS_JOB: &str = "whitelist-farms";

/// Replace the cached subscriber list with the notify API's current one.
pub async fn subscribers(ctx: &AppContext) -> Result<()> {
    let subscribers = ctx
        .sources
        .subscribers
        .active_subscribers()
        .await
        .context("failed to fetch subscribers")?;
    ctx.cache.set_subscribers(&subscribers).await;
    info!(count = subscribers.len(), "subscribers refreshed");
    Ok(())
}

pub async fn token_prices(ctx: &AppContext) -> Result<()> {
    let prices = ctx
        .sources
        .prices
        .usd_prices(&ctx.config.sources.tokens)
        .await
        .context("failed to fetch token prices")?;
    ctx.cache.set_token_prices(&prices).await;
    info!(tokens = prices.len(), "token prices refreshed");
    Ok(())
}

/// Cache the whitelisted farm pools of every chain the position monitor
/// covers. A failing chain keeps its previous list.
pub async fn whitelisted_farms(ctx: &AppContext) -> Result<()> {
    let now = Utc::now().timestamp();
    for &chain in &ctx.config.jobs.positions.chains {
        match ctx.sources.farms.whitelisted_pools(chain).await {
            Ok(pools) => {
                info!(%chain, pools = pools.len(), "whitelisted farms refreshed");
                ctx.cache
                    .set_whitelisted_farms(chain, &WhitelistedFarms { pools, updated_at: now })
                    .await;
            }
            Err(e) => warn!(%chain, "failed to fetch whitelisted farms: {e:#}"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::Harness;
    use crate::types::ChainId;
    use std::sync::atomic::Ordering;

    #[tokio::test]
    async fn subscribers_replaced_each_cycle() {
        let h = Harness::new();
        *h.sources.subscribers.lock() = vec!["eip155:1:0xa".parse().unwrap()];
        subscribers(&h.ctx).await.unwrap();
        *h.sources.subscribers.lock() = vec!["eip155:1:0xb".parse().unwrap()];
        subscribers(&h.ctx).await.unwrap();

        let cached = h.ctx.cache.subscribers().await;
        assert_eq!(cached.len(), 1);
        assert_eq!(cached[0].address, "0xb");
    }

    #[tokio::test]
    async fn failed_fetch_keeps_previous_list() {
        let h = Harness::new();
        h.subscribe(&["eip155:1:0xa"]).await;
        h.sources.failing.store(true, Ordering::SeqCst);
        assert!(subscribers(&h.ctx).await.is_err());
        assert_eq!(h.ctx.cache.subscribers().await.len(), 1);
    }

    #[tokio::test]
    async fn prices_cached_as_map() {
        let h = Harness::new();
        h.sources.prices.lock().extend([
            ("ethereum".to_string(), 2000.0),
            ("binancecoin".to_string(), 300.0),
            ("pancakeswap-token".to_string(), 2.5),
        ]);
        token_prices(&h.ctx).await.unwrap();
        let prices = h.ctx.cache.token_prices().await.unwrap();
        assert_eq!(prices.get("binancecoin"), Some(&300.0));
    }

    #[tokio::test]
    async fn whitelist_stored_per_chain() {
        let h = Harness::new();
        *h.sources.pools.lock() = vec!["0xpool".to_string()];
        whitelisted_farms(&h.ctx).await.unwrap();
        for chain in [ChainId::Ethereum, ChainId::Bsc] {
            let farms = h.ctx.cache.whitelisted_farms(chain).await.unwrap();
            assert_eq!(farms.pools, vec!["0xpool".to_string()]);
        }
        assert!(h.ctx.cache.whitelisted_farms(ChainId::Base).await.is_none());
    }
}
