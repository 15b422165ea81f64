//! One module per job: fetch, compare against the cache, notify, write back.

pub mod balance;
pub mod farm_apr;
pub mod lottery;
pub mod positions;
pub mod predictions;
pub mod price;
pub mod refresh;

use std::future::Future;
use std::sync::Arc;

use anyhow::Result;
use futures_util::FutureExt;
use tracing::{error, info};

use crate::config::JobConfig;
use crate::context::AppContext;
use crate::error::ConfigError;
use crate::notifier::Notification;
use crate::scheduler::{JobBody, ScheduledJob, Scheduler};
use crate::types::ChainId;

/// Register every enabled job. Chain-partitioned jobs get one timer per
/// configured chain, all sharing the context's queue.
pub fn build_scheduler(ctx: &AppContext) -> Result<Scheduler, ConfigError> {
    let jobs = &ctx.config.jobs;
    let mut scheduler = Scheduler::new();

    guarded(&mut scheduler, ctx, refresh::TOKEN_PRICES_JOB, &jobs.token_prices, |ctx| async move {
        refresh::token_prices(&ctx).await
    })?;
    guarded(&mut scheduler, ctx, refresh::SUBSCRIBERS_JOB, &jobs.subscribers, |ctx| async move {
        refresh::subscribers(&ctx).await
    })?;
    guarded(
        &mut scheduler,
        ctx,
        refresh::WHITELIST_FARMS_JOB,
        &jobs.whitelist_farms,
        |ctx| async move { refresh::whitelisted_farms(&ctx).await },
    )?;

    queued(&mut scheduler, ctx, balance::JOB, &jobs.balance, |ctx, chain| async move {
        balance::run(&ctx, chain).await
    })?;
    queued(&mut scheduler, ctx, price::JOB, &jobs.price, |ctx, chain| async move {
        price::run(&ctx, chain).await
    })?;
    queued(&mut scheduler, ctx, farm_apr::JOB, &jobs.farm_apr, |ctx, chain| async move {
        farm_apr::run(&ctx, chain).await
    })?;
    queued(&mut scheduler, ctx, positions::JOB, &jobs.positions, |ctx, chain| async move {
        positions::run(&ctx, chain).await
    })?;

    guarded(&mut scheduler, ctx, lottery::UPDATE_JOB, &jobs.lottery_update, |ctx| async move {
        lottery::run_update(&ctx).await
    })?;
    guarded(&mut scheduler, ctx, lottery::RESULT_JOB, &jobs.lottery_result, |ctx| async move {
        lottery::run_result(&ctx).await
    })?;
    guarded(
        &mut scheduler,
        ctx,
        predictions::WINNERS_JOB,
        &jobs.prediction_winners,
        |ctx| async move { predictions::run_winners(&ctx).await },
    )?;
    guarded(
        &mut scheduler,
        ctx,
        predictions::REMINDER_JOB,
        &jobs.prediction_reminder,
        |ctx| async move { predictions::run_reminder(&ctx).await },
    )?;

    info!(jobs = scheduler.jobs().len(), "scheduler built");
    Ok(scheduler)
}

/// Addresses of every cached subscriber.
pub(crate) async fn subscriber_addresses(ctx: &AppContext) -> Vec<String> {
    ctx.cache
        .subscribers()
        .await
        .into_iter()
        .map(|s| s.address)
        .collect()
}

/// Send one notification. Returns the accepted count, or `None` if the
/// dispatch itself failed.
pub(crate) async fn dispatch(
    ctx: &AppContext,
    notification: &Notification,
    recipients: &[String],
) -> Option<usize> {
    if recipients.is_empty() {
        return Some(0);
    }
    match ctx.notifier.dispatch(notification, recipients).await {
        Ok(accepted) => {
            info!(
                kind = notification.kind(),
                recipients = recipients.len(),
                accepted,
                "notification sent"
            );
            Some(accepted)
        }
        Err(e) => {
            error!(kind = notification.kind(), "dispatch failed: {e:#}");
            None
        }
    }
}

fn guarded<F, Fut>(
    scheduler: &mut Scheduler,
    ctx: &AppContext,
    name: &'static str,
    job: &JobConfig,
    run: F,
) -> Result<(), ConfigError>
where
    F: Fn(AppContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    if !job.enabled {
        info!(job = name, "disabled");
        return Ok(());
    }
    let schedule = job.parsed_schedule(name)?;
    let timeout = ctx.config.settings.job_timeout();
    let ctx = ctx.clone();
    let body: JobBody = Arc::new(move || run(ctx.clone()).boxed());
    scheduler.add(ScheduledJob::guarded(name, schedule, timeout, body));
    Ok(())
}

fn queued<F, Fut>(
    scheduler: &mut Scheduler,
    ctx: &AppContext,
    name: &'static str,
    job: &JobConfig,
    run: F,
) -> Result<(), ConfigError>
where
    F: Fn(AppContext, ChainId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    if !job.enabled {
        info!(job = name, "disabled");
        return Ok(());
    }
    let schedule = job.parsed_schedule(name)?;
    let run = Arc::new(run);
    for &chain in &job.chains {
        let (ctx_for_job, run) = (ctx.clone(), run.clone());
        let body: JobBody = Arc::new(move || run(ctx_for_job.clone(), chain).boxed());
        scheduler.add(ScheduledJob::queued(
            name,
            chain,
            schedule.clone(),
            ctx.queue.clone(),
            body,
        ));
    }
    Ok(())
}
