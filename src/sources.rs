//! Data source seams. Monitors only see these traits; the HTTP
//! implementations live in [`crate::api`].

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{
    AccountBalance, ChainId, FarmApr, LotteryPlayer, LotteryRound, LotteryTicket, PoolTick,
    PredictionMarket, PredictionRound, Subscriber, TickSide, UserPosition,
};

#[async_trait]
pub trait SubscriberSource: Send + Sync {
    async fn active_subscribers(&self) -> Result<Vec<Subscriber>>;
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    /// USD price per CoinGecko token id. Every requested token must be present.
    async fn usd_prices(&self, tokens: &[String]) -> Result<BTreeMap<String, f64>>;
}

#[async_trait]
pub trait BalanceSource: Send + Sync {
    /// Native balances in whole tokens, in the order of `addresses`.
    async fn native_balances(
        &self,
        chain: ChainId,
        addresses: &[String],
    ) -> Result<Vec<AccountBalance>>;
}

#[async_trait]
pub trait FarmSource: Send + Sync {
    /// Lowercased pool addresses of the chain's whitelisted farms.
    async fn whitelisted_pools(&self, chain: ChainId) -> Result<Vec<String>>;
    async fn farm_aprs(&self, chain: ChainId) -> Result<Vec<FarmApr>>;
}

#[async_trait]
pub trait PositionSource: Send + Sync {
    /// Current tick per pool. Pools the index does not know are omitted.
    async fn pool_ticks(&self, chain: ChainId, pools: &[String]) -> Result<Vec<PoolTick>>;

    /// One page of live positions in `pool` whose range lies entirely on
    /// `side` of the current tick, oldest first.
    async fn out_of_range_positions(
        &self,
        chain: ChainId,
        pool: &PoolTick,
        side: TickSide,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<UserPosition>>;
}

#[async_trait]
pub trait LotterySource: Send + Sync {
    /// Most recent rounds, newest first.
    async fn rounds(&self, count: usize) -> Result<Vec<LotteryRound>>;

    /// Lottery history of the given accounts. Accounts that never played are
    /// absent.
    async fn players(&self, accounts: &[String]) -> Result<Vec<LotteryPlayer>>;

    /// One page of an account's tickets for a round.
    async fn tickets(
        &self,
        account: &str,
        round_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<LotteryTicket>>;
}

#[async_trait]
pub trait PredictionSource: Send + Sync {
    /// Latest finished rounds of a market with their bets.
    async fn recent_rounds(&self, market: PredictionMarket) -> Result<Vec<PredictionRound>>;
}

/// Every source a monitor may reach for.
#[derive(Clone)]
pub struct Sources {
    pub subscribers: Arc<dyn SubscriberSource>,
    pub prices: Arc<dyn PriceSource>,
    pub balances: Arc<dyn BalanceSource>,
    pub farms: Arc<dyn FarmSource>,
    pub positions: Arc<dyn PositionSource>,
    pub lottery: Arc<dyn LotterySource>,
    pub predictions: Arc<dyn PredictionSource>,
}
