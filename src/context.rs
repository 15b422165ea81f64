//! Everything a job needs, built once at startup and passed by handle.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::Client;
use tracing::{info, warn};

use crate::api::{
    CoinGecko, LotterySubgraph, PancakeFarms, PositionSubgraph, PredictionSubgraph, RpcBalances,
    WalletConnectSubscribers,
};
use crate::cache::{Cache, MemoryCache};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::monitors::refresh;
use crate::notifier::{DryRunNotifier, Notifier, WalletConnectNotifier};
use crate::queue::JobQueue;
use crate::redis_store::RedisStore;
use crate::sources::Sources;
use crate::types::ChainId;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Startup switches that pick alternative backends.
#[derive(Debug, Clone, Copy, Default)]
pub struct InitOptions {
    /// Keep state in process memory instead of Redis.
    pub memory_cache: bool,
    /// Print notifications instead of delivering them.
    pub dry_run: bool,
}

#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<AppConfig>,
    pub cache: Cache,
    pub notifier: Arc<dyn Notifier>,
    pub sources: Sources,
    pub queue: JobQueue,
}

impl AppContext {
    pub fn new(
        config: AppConfig,
        cache: Cache,
        notifier: Arc<dyn Notifier>,
        sources: Sources,
    ) -> Self {
        let queue = JobQueue::new(config.settings.job_timeout());
        Self {
            config: Arc::new(config),
            cache,
            notifier,
            sources,
            queue,
        }
    }

    /// Connect the cache and build the HTTP-backed sources and notifier.
    pub async fn init(config: AppConfig, options: InitOptions) -> Result<Self, AppError> {
        let cache = if options.memory_cache {
            warn!("using in-memory cache, state is lost on exit");
            Cache::new(Arc::new(MemoryCache::default()), &config.cache.prefix)
        } else {
            let store = RedisStore::connect(&config.cache.url)
                .await
                .map_err(AppError::Cache)?;
            Cache::new(Arc::new(store), &config.cache.prefix)
        };

        let http = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .context("failed to build HTTP client")?;

        let notifier: Arc<dyn Notifier> = if options.dry_run {
            info!("dry run, notifications are printed to stdout");
            Arc::new(DryRunNotifier)
        } else {
            Arc::new(WalletConnectNotifier::new(http.clone(), config.notify.clone()))
        };

        let sources = Sources {
            subscribers: Arc::new(WalletConnectSubscribers::new(
                http.clone(),
                config.notify.clone(),
            )),
            prices: Arc::new(CoinGecko::new(http.clone(), &config.sources.coingecko_url)),
            balances: Arc::new(RpcBalances::new(http.clone(), &config.sources)),
            farms: Arc::new(PancakeFarms::new(http.clone(), &config.sources)),
            positions: Arc::new(PositionSubgraph::new(http.clone(), &config.sources)),
            lottery: Arc::new(LotterySubgraph::new(
                http.clone(),
                &config.sources.lottery_subgraph,
            )),
            predictions: Arc::new(PredictionSubgraph::new(http, &config.sources)),
        };

        Ok(Self::new(config, cache, notifier, sources))
    }

    /// Fill the subscriber list and price map before the first tick so the
    /// monitors do not start against an empty cache.
    pub async fn seed(&self) {
        if let Err(e) = refresh::subscribers(self).await {
            warn!("initial subscriber fetch failed: {e:#}");
        }
        if let Err(e) = refresh::token_prices(self).await {
            warn!("initial price fetch failed: {e:#}");
        }
    }

    pub fn shutdown(&self) {
        for chain in ChainId::ALL {
            let pending = self.queue.pending(chain);
            if pending > 0 || self.queue.is_executing(chain) {
                warn!(%chain, pending, "shutting down with queued jobs");
            }
        }
        info!("shutdown complete");
    }
}
