//! In-memory fixtures for monitor tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{Result, bail};
use async_trait::async_trait;
use parking_lot::Mutex;

use crate::cache::Cache;
use crate::config::AppConfig;
use crate::context::AppContext;
use crate::notifier::{Notification, Notifier};
use crate::sources::{
    BalanceSource, FarmSource, LotterySource, PositionSource, PredictionSource, PriceSource,
    Sources, SubscriberSource,
};
use crate::types::{
    AccountBalance, ChainId, FarmApr, LotteryPlayer, LotteryRound, LotteryTicket, PoolTick,
    PredictionMarket, PredictionRound, Subscriber, TickSide, UserPosition,
};

/// Canned answers for every source trait. Setting `failing` makes every
/// call return an error.
#[derive(Default)]
pub struct StubSources {
    pub subscribers: Mutex<Vec<Subscriber>>,
    pub prices: Mutex<BTreeMap<String, f64>>,
    pub balances: Mutex<HashMap<String, f64>>,
    pub pools: Mutex<Vec<String>>,
    pub aprs: Mutex<Vec<FarmApr>>,
    pub ticks: Mutex<Vec<PoolTick>>,
    pub positions: Mutex<HashMap<(String, TickSide), Vec<UserPosition>>>,
    pub rounds: Mutex<Vec<LotteryRound>>,
    pub players: Mutex<Vec<LotteryPlayer>>,
    pub tickets: Mutex<HashMap<String, Vec<LotteryTicket>>>,
    pub predictions: Mutex<HashMap<PredictionMarket, Vec<PredictionRound>>>,
    pub failing: AtomicBool,
    pub page_fetches: AtomicUsize,
}

impl StubSources {
    pub fn sources(self: &Arc<Self>) -> Sources {
        Sources {
            subscribers: self.clone(),
            prices: self.clone(),
            balances: self.clone(),
            farms: self.clone(),
            positions: self.clone(),
            lottery: self.clone(),
            predictions: self.clone(),
        }
    }

    fn check(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("source unavailable");
        }
        Ok(())
    }
}

fn page<T: Clone>(all: &[T], offset: usize, limit: usize) -> Vec<T> {
    all.iter().skip(offset).take(limit).cloned().collect()
}

#[async_trait]
impl SubscriberSource for StubSources {
    async fn active_subscribers(&self) -> Result<Vec<Subscriber>> {
        self.check()?;
        Ok(self.subscribers.lock().clone())
    }
}

#[async_trait]
impl PriceSource for StubSources {
    async fn usd_prices(&self, tokens: &[String]) -> Result<BTreeMap<String, f64>> {
        self.check()?;
        let prices = self.prices.lock();
        tokens
            .iter()
            .map(|t| match prices.get(t) {
                Some(p) => Ok((t.clone(), *p)),
                None => bail!("no quote for {t}"),
            })
            .collect()
    }
}

#[async_trait]
impl BalanceSource for StubSources {
    async fn native_balances(
        &self,
        _chain: ChainId,
        addresses: &[String],
    ) -> Result<Vec<AccountBalance>> {
        self.check()?;
        let balances = self.balances.lock();
        Ok(addresses
            .iter()
            .map(|a| AccountBalance {
                address: a.clone(),
                balance: balances.get(a).copied().unwrap_or(0.0),
            })
            .collect())
    }
}

#[async_trait]
impl FarmSource for StubSources {
    async fn whitelisted_pools(&self, _chain: ChainId) -> Result<Vec<String>> {
        self.check()?;
        Ok(self.pools.lock().clone())
    }

    async fn farm_aprs(&self, _chain: ChainId) -> Result<Vec<FarmApr>> {
        self.check()?;
        Ok(self.aprs.lock().clone())
    }
}

#[async_trait]
impl PositionSource for StubSources {
    async fn pool_ticks(&self, _chain: ChainId, pools: &[String]) -> Result<Vec<PoolTick>> {
        self.check()?;
        Ok(self
            .ticks
            .lock()
            .iter()
            .filter(|t| pools.contains(&t.pool))
            .cloned()
            .collect())
    }

    async fn out_of_range_positions(
        &self,
        _chain: ChainId,
        pool: &PoolTick,
        side: TickSide,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<UserPosition>> {
        self.check()?;
        self.page_fetches.fetch_add(1, Ordering::SeqCst);
        let positions = self.positions.lock();
        Ok(positions
            .get(&(pool.pool.clone(), side))
            .map(|all| page(all, offset, limit))
            .unwrap_or_default())
    }
}

#[async_trait]
impl LotterySource for StubSources {
    async fn rounds(&self, count: usize) -> Result<Vec<LotteryRound>> {
        self.check()?;
        Ok(self.rounds.lock().iter().take(count).cloned().collect())
    }

    async fn players(&self, accounts: &[String]) -> Result<Vec<LotteryPlayer>> {
        self.check()?;
        Ok(self
            .players
            .lock()
            .iter()
            .filter(|p| accounts.contains(&p.account))
            .cloned()
            .collect())
    }

    async fn tickets(
        &self,
        account: &str,
        _round_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<LotteryTicket>> {
        self.check()?;
        self.page_fetches.fetch_add(1, Ordering::SeqCst);
        let tickets = self.tickets.lock();
        Ok(tickets
            .get(account)
            .map(|all| page(all, offset, limit))
            .unwrap_or_default())
    }
}

#[async_trait]
impl PredictionSource for StubSources {
    async fn recent_rounds(&self, market: PredictionMarket) -> Result<Vec<PredictionRound>> {
        self.check()?;
        Ok(self
            .predictions
            .lock()
            .get(&market)
            .cloned()
            .unwrap_or_default())
    }
}

/// Records every dispatch; accepts all recipients unless told to fail.
#[derive(Default)]
pub struct RecordingNotifier {
    pub sent: Mutex<Vec<(Notification, Vec<String>)>>,
    pub failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }

    pub fn last(&self) -> Option<(Notification, Vec<String>)> {
        self.sent.lock().last().cloned()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn dispatch(&self, notification: &Notification, recipients: &[String]) -> Result<usize> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("notify API unavailable");
        }
        self.sent
            .lock()
            .push((notification.clone(), recipients.to_vec()));
        Ok(recipients.len())
    }
}

pub struct Harness {
    pub ctx: AppContext,
    pub sources: Arc<StubSources>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new() -> Self {
        let sources = Arc::new(StubSources::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let ctx = AppContext::new(
            AppConfig::default(),
            Cache::in_memory(),
            notifier.clone(),
            sources.sources(),
        );
        Self {
            ctx,
            sources,
            notifier,
        }
    }

    /// Cache these addresses as the current subscribers.
    pub async fn subscribe(&self, addresses: &[&str]) {
        let subscribers: Vec<Subscriber> = addresses
            .iter()
            .filter_map(|a| a.parse().ok())
            .collect();
        self.ctx.cache.set_subscribers(&subscribers).await;
    }
}
