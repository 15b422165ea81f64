//! Farm APR spike alerts.

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::cache::keys;
use crate::context::AppContext;
use crate::detect::{self, CacheUpdate};
use crate::monitors::{dispatch, subscriber_addresses};
use crate::notifier::Notification;
use crate::types::ChainId;

pub const JOB: &str = "farms-apr";

pub async fn run(ctx: &AppContext, chain: ChainId) -> Result<()> {
    let farms = ctx
        .sources
        .farms
        .farm_aprs(chain)
        .await
        .context("failed to fetch farm APRs")?;
    let recipients = subscriber_addresses(ctx).await;

    for farm in &farms {
        let key = keys::farm_apr(farm.pid, chain);
        let cached = ctx.cache.get::<f64>(&key).await;
        let decision = detect::apr_jump(farm.apr, cached)?;

        match decision.update {
            CacheUpdate::Set(apr) => ctx.cache.set(&key, &apr, None).await,
            CacheUpdate::SetOnDispatch(apr) => {
                let notification = Notification::FarmApr {
                    lp_symbol: farm.lp_symbol.clone(),
                    chain,
                    apr,
                    previous: cached.unwrap_or_default(),
                };
                info!(%chain, pid = farm.pid, apr, previous = ?cached, "farm APR jumped");
                if recipients.is_empty() {
                    debug!(%chain, pid = farm.pid, "no subscribers, baseline kept");
                    continue;
                }
                if dispatch(ctx, &notification, &recipients).await.is_some() {
                    ctx.cache.set(&key, &apr, None).await;
                }
            }
            CacheUpdate::Keep => {}
        }
    }
    debug!(%chain, farms = farms.len(), "farm APRs checked");
    Ok(())
}
