//! Prediction market reminders.

use std::collections::HashSet;

use anyhow::Result;
use chrono::Utc;
use tracing::{info, warn};

use crate::cache::keys;
use crate::context::AppContext;
use crate::detect::{self, PREDICTION_COOLDOWN};
use crate::monitors::{dispatch, subscriber_addresses};
use crate::notifier::Notification;
use crate::types::{ChainId, PredictionMarket};

pub const WINNERS_JOB: &str = "prediction-winners";
pub const REMINDER_JOB: &str = "prediction-reminder";

const PREDICTION_CHAIN: ChainId = ChainId::Bsc;

pub async fn run_winners(ctx: &AppContext) -> Result<()> {
    winners(ctx, Utc::now().timestamp()).await
}

pub async fn run_reminder(ctx: &AppContext) -> Result<()> {
    reminder(ctx, Utc::now().timestamp()).await
}

/// Remind subscribers holding unclaimed bets in recent rounds of either
/// market. A failing market is logged and the other is still checked.
pub async fn winners(ctx: &AppContext, now: i64) -> Result<()> {
    let subscribed: HashSet<String> = subscriber_addresses(ctx).await.into_iter().collect();
    if subscribed.is_empty() {
        return Ok(());
    }

    let mut unclaimed: Vec<String> = Vec::new();
    for market in PredictionMarket::ALL {
        let rounds = match ctx.sources.predictions.recent_rounds(market).await {
            Ok(rounds) => rounds,
            Err(e) => {
                warn!(%market, "failed to fetch prediction rounds: {e:#}");
                continue;
            }
        };
        for bet in rounds.iter().flat_map(|r| &r.bets) {
            if !bet.claimed && subscribed.contains(&bet.user) && !unclaimed.contains(&bet.user) {
                unclaimed.push(bet.user.clone());
            }
        }
    }
    notify_with_cooldown(ctx, WINNERS_JOB, unclaimed, Notification::PredictionWinnings, now).await;
    Ok(())
}

pub async fn reminder(ctx: &AppContext, now: i64) -> Result<()> {
    let addresses = subscriber_addresses(ctx).await;
    notify_with_cooldown(ctx, REMINDER_JOB, addresses, Notification::PredictionWelcome, now).await;
    Ok(())
}

async fn notify_with_cooldown(
    ctx: &AppContext,
    job: &str,
    candidates: Vec<String>,
    notification: Notification,
    now: i64,
) {
    let mut recipients = Vec::new();
    let mut stamps = Vec::new();
    for user in candidates {
        let key = keys::timestamp(job, &user, PREDICTION_CHAIN);
        let last = ctx.cache.get::<i64>(&key).await;
        if detect::cooldown_elapsed(last, now, PREDICTION_COOLDOWN) {
            recipients.push(user);
            stamps.push(key);
        }
    }
    if recipients.is_empty() {
        return;
    }
    info!(job, count = recipients.len(), "prediction reminders due");
    if dispatch(ctx, &notification, &recipients).await.is_some() {
        ctx.cache.set_timestamps(&stamps, now).await;
    }
}
