//! Lottery jobs.
//!
//! The update job promotes the open round to subscribers and reminds entered
//! players shortly before the draw. The result job tells winners once a
//! round is drawn and nudges players sitting on unclaimed prizes.

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::api::{TICKET_PAGE_SIZE, collect_pages};
use crate::cache::keys;
use crate::context::AppContext;
use crate::detect::{self, MINUTE, NEW_ROUND_COOLDOWN, UNCLAIMED_LOTTERY_COOLDOWN};
use crate::monitors::{dispatch, subscriber_addresses};
use crate::notifier::Notification;
use crate::types::{CAKE_TOKEN, ChainId, LotteryPlayer, LotteryRound};

pub const UPDATE_JOB: &str = "lottery-update";
pub const RESULT_JOB: &str = "lottery-result";

/// The lottery only runs on BSC; cooldown keys are partitioned under it.
const LOTTERY_CHAIN: ChainId = ChainId::Bsc;

pub async fn run_update(ctx: &AppContext) -> Result<()> {
    update(ctx, Utc::now().timestamp()).await
}

pub async fn run_result(ctx: &AppContext) -> Result<()> {
    result(ctx, Utc::now().timestamp()).await
}

pub async fn update(ctx: &AppContext, now: i64) -> Result<()> {
    let rounds = ctx
        .sources
        .lottery
        .rounds(1)
        .await
        .context("failed to fetch current lottery round")?;
    let Some(round) = rounds.first() else {
        warn!("lottery subgraph returned no rounds");
        return Ok(());
    };
    announce_new_round(ctx, round, now).await;
    remind_players(ctx, round, now).await
}

pub async fn result(ctx: &AppContext, now: i64) -> Result<()> {
    let addresses = subscriber_addresses(ctx).await;
    let players = ctx
        .sources
        .lottery
        .players(&addresses)
        .await
        .context("failed to fetch lottery players")?;
    remind_unclaimed(ctx, &players, now).await;

    let rounds = ctx
        .sources
        .lottery
        .rounds(2)
        .await
        .context("failed to fetch lottery rounds")?;
    match rounds.iter().find(|r| r.final_number.is_some()) {
        Some(round) => announce_winners(ctx, round, &players, now).await,
        None => {
            debug!("no drawn round yet");
            Ok(())
        }
    }
}

async fn announce_new_round(ctx: &AppContext, round: &LotteryRound, now: i64) {
    if round.end_time <= now {
        debug!(round = %round.id, "round closed, nothing to promote");
        return;
    }
    let mut recipients = Vec::new();
    let mut stamps = Vec::new();
    for address in subscriber_addresses(ctx).await {
        let key = keys::timestamp(UPDATE_JOB, &address, LOTTERY_CHAIN);
        let last = ctx.cache.get::<i64>(&key).await;
        if detect::cooldown_elapsed(last, now, NEW_ROUND_COOLDOWN) {
            recipients.push(address);
            stamps.push(key);
        }
    }
    if recipients.is_empty() {
        return;
    }
    let cake_price = ctx
        .cache
        .token_prices()
        .await
        .and_then(|prices| prices.get(CAKE_TOKEN).copied())
        .unwrap_or_default();
    let notification = Notification::LotteryNewRound {
        minutes_to_draw: (round.end_time - now) / MINUTE,
        ticket_price: round.ticket_price,
        players: round.total_users,
        prize_cake: round.prize_cake,
        prize_usd: round.prize_cake * cake_price,
    };
    if dispatch(ctx, &notification, &recipients).await.is_some() {
        ctx.cache.set_timestamps(&stamps, now).await;
    }
}

async fn remind_players(ctx: &AppContext, round: &LotteryRound, now: i64) -> Result<()> {
    let flag = keys::lottery_reminder(&round.id);
    let reminded = ctx.cache.exists(&flag).await;
    if !detect::draw_reminder_due(reminded, round.end_time, now) {
        return Ok(());
    }
    let addresses = subscriber_addresses(ctx).await;
    let players = ctx
        .sources
        .lottery
        .players(&addresses)
        .await
        .context("failed to fetch lottery players")?;
    let entered: Vec<String> = players
        .into_iter()
        .filter(|p| p.entered(&round.id))
        .map(|p| p.account)
        .collect();
    if entered.is_empty() {
        return Ok(());
    }
    let notification = Notification::LotteryDrawReminder {
        minutes_to_draw: (round.end_time - now) / MINUTE,
    };
    if dispatch(ctx, &notification, &entered).await.is_some() {
        ctx.cache.set(&flag, &true, None).await;
    }
    Ok(())
}

async fn announce_winners(
    ctx: &AppContext,
    round: &LotteryRound,
    players: &[LotteryPlayer],
    now: i64,
) -> Result<()> {
    let flag = keys::lottery_round(&round.id);
    let announced = ctx.cache.exists(&flag).await;
    if !detect::announce_round(announced, round.end_time, now) {
        return Ok(());
    }
    let Some(final_number) = round.final_number.as_deref() else {
        return Ok(());
    };

    let source = &ctx.sources.lottery;
    let mut winners = Vec::new();
    for player in players.iter().filter(|p| p.entered(&round.id)) {
        let tickets = collect_pages(TICKET_PAGE_SIZE, |offset, limit| {
            source.tickets(&player.account, &round.id, offset, limit)
        })
        .await
        .with_context(|| format!("failed to fetch tickets of {}", player.account))?;
        if tickets
            .iter()
            .any(|t| detect::reward_bracket(&t.number, final_number).is_some())
        {
            winners.push(player.account.clone());
        }
    }
    info!(round = %round.id, winners = winners.len(), "lottery round drawn");
    // No winners dispatches nothing and still marks the round.
    if dispatch(ctx, &Notification::LotteryWinner, &winners).await.is_some() {
        ctx.cache.set(&flag, &true, None).await;
    }
    Ok(())
}

async fn remind_unclaimed(ctx: &AppContext, players: &[LotteryPlayer], now: i64) {
    let mut recipients = Vec::new();
    let mut stamps = Vec::new();
    for player in players {
        if !player.rounds.iter().any(|r| r.claimable) {
            continue;
        }
        let key = keys::timestamp(RESULT_JOB, &player.account, LOTTERY_CHAIN);
        let last = ctx.cache.get::<i64>(&key).await;
        if detect::cooldown_elapsed(last, now, UNCLAIMED_LOTTERY_COOLDOWN) {
            recipients.push(player.account.clone());
            stamps.push(key);
        }
    }
    if recipients.is_empty() {
        return;
    }
    if dispatch(ctx, &Notification::LotteryUnclaimed, &recipients)
        .await
        .is_some()
    {
        ctx.cache.set_timestamps(&stamps, now).await;
    }
}
