//! Liquidity positions that drifted out of their tick range.

use std::collections::HashSet;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::api::{POSITION_PAGE_SIZE, collect_pages};
use crate::cache::keys;
use crate::context::AppContext;
use crate::detect;
use crate::monitors::{dispatch, subscriber_addresses};
use crate::notifier::Notification;
use crate::types::{ChainId, PoolTick, TickSide};

pub const JOB: &str = "user-positions";

pub async fn run(ctx: &AppContext, chain: ChainId) -> Result<()> {
    let Some(farms) = ctx.cache.whitelisted_farms(chain).await else {
        warn!(%chain, "no whitelisted farms cached, skipping position check");
        return Ok(());
    };
    let ticks = ctx
        .sources
        .positions
        .pool_ticks(chain, &farms.pools)
        .await
        .context("failed to fetch pool ticks")?;
    let subscribed: HashSet<String> = subscriber_addresses(ctx).await.into_iter().collect();
    let ttl = Duration::from_secs(ctx.config.cache.position_flag_ttl_secs);

    for side in [TickSide::Lower, TickSide::Upper] {
        for pool in &ticks {
            check_pool(ctx, chain, pool, side, &subscribed, ttl).await?;
        }
    }
    Ok(())
}

async fn check_pool(
    ctx: &AppContext,
    chain: ChainId,
    pool: &PoolTick,
    side: TickSide,
    subscribed: &HashSet<String>,
    ttl: Duration,
) -> Result<()> {
    let source = &ctx.sources.positions;
    let positions = collect_pages(POSITION_PAGE_SIZE, |offset, limit| {
        source.out_of_range_positions(chain, pool, side, offset, limit)
    })
    .await
    .with_context(|| format!("failed to fetch positions of pool {}", pool.pool))?;

    let mut owners: Vec<String> = Vec::new();
    for position in &positions {
        let key = keys::position_flag(chain, &position.id, &position.pool, &position.owner);
        let flagged = ctx.cache.exists(&key).await;
        let decision =
            detect::position_out_of_range(flagged, subscribed.contains(&position.owner));
        if decision.store_flag {
            ctx.cache.set(&key, &true, Some(ttl)).await;
        }
        if decision.notify_owner && !owners.contains(&position.owner) {
            owners.push(position.owner.clone());
        }
    }
    info!(
        %chain,
        pool = %pool.pool,
        tick = pool.tick,
        ?side,
        positions = positions.len(),
        notify = owners.len(),
        "out-of-range positions checked"
    );
    dispatch(ctx, &Notification::LpOutOfRange, &owners).await;
    Ok(())
}
