use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::ChainId;

/// Default config file path.
pub const CONFIG_PATH: &str = "config.toml";

/// Top-level application config deserialized from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
}

/// Runtime settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsConfig {
    /// Upper bound on a single queued job body, in seconds.
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Redis connection URL; `REDIS_URL` overrides it.
    #[serde(default = "default_redis_url")]
    pub url: String,
    /// Optional namespace prepended to every key as `{prefix}:`.
    #[serde(default)]
    pub prefix: String,
    /// How long a position out-of-range flag suppresses repeat alerts.
    #[serde(default = "default_position_flag_ttl")]
    pub position_flag_ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_notify_url")]
    pub api_url: String,
    /// WalletConnect project API key; `WALLET_CONNECT_API_KEY` overrides it.
    #[serde(default)]
    pub api_key: String,
    /// Bearer secret; `WALLET_CONNECT_SECRET_KEY` overrides it.
    #[serde(default)]
    pub secret_key: String,
    /// Browser broadcast endpoint hit after a successful dispatch.
    #[serde(default = "default_broadcast_url")]
    pub broadcast_url: String,
    /// `SECURE_TOKEN` overrides it.
    #[serde(default)]
    pub secure_token: String,
    /// Print notifications instead of sending them; `--dry-run` sets it.
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcesConfig {
    #[serde(default = "default_coingecko_url")]
    pub coingecko_url: String,
    /// CoinGecko ids refreshed into the shared price map.
    #[serde(default = "default_tokens")]
    pub tokens: Vec<String>,
    /// JSON-RPC endpoints keyed by numeric chain id.
    #[serde(default = "default_rpc_urls")]
    pub rpc_urls: BTreeMap<String, String>,
    #[serde(default = "default_farms_url")]
    pub farms_url: String,
    #[serde(default = "default_farm_apr_url")]
    pub farm_apr_url: String,
    /// v3 position subgraphs keyed by numeric chain id.
    #[serde(default = "default_position_subgraphs")]
    pub position_subgraphs: BTreeMap<String, String>,
    #[serde(default = "default_lottery_subgraph")]
    pub lottery_subgraph: String,
    #[serde(default = "default_prediction_cake_subgraph")]
    pub prediction_cake_subgraph: String,
    #[serde(default = "default_prediction_bnb_subgraph")]
    pub prediction_bnb_subgraph: String,
}

/// Cadence and partitioning for one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Six-field cron expression, seconds first.
    pub schedule: String,
    /// Chains the job is partitioned across; empty for global jobs.
    #[serde(default)]
    pub chains: Vec<ChainId>,
}

impl JobConfig {
    fn new(schedule: &str, chains: &[ChainId]) -> Self {
        Self {
            enabled: true,
            schedule: schedule.to_string(),
            chains: chains.to_vec(),
        }
    }

    pub fn parsed_schedule(&self, job: &str) -> Result<cron::Schedule, ConfigError> {
        cron::Schedule::from_str(&self.schedule).map_err(|e| ConfigError::Schedule {
            job: job.to_string(),
            reason: e.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    #[serde(default = "default_token_prices_job")]
    pub token_prices: JobConfig,
    #[serde(default = "default_subscribers_job")]
    pub subscribers: JobConfig,
    #[serde(default = "default_whitelist_farms_job")]
    pub whitelist_farms: JobConfig,
    #[serde(default = "default_balance_job")]
    pub balance: JobConfig,
    #[serde(default = "default_price_job")]
    pub price: JobConfig,
    #[serde(default = "default_farm_apr_job")]
    pub farm_apr: JobConfig,
    #[serde(default = "default_positions_job")]
    pub positions: JobConfig,
    #[serde(default = "default_lottery_update_job")]
    pub lottery_update: JobConfig,
    #[serde(default = "default_lottery_result_job")]
    pub lottery_result: JobConfig,
    #[serde(default = "default_prediction_winners_job")]
    pub prediction_winners: JobConfig,
    #[serde(default = "default_prediction_reminder_job")]
    pub prediction_reminder: JobConfig,
}

impl JobsConfig {
    /// All job configs with their names, in startup order.
    pub fn entries(&self) -> Vec<(&'static str, &JobConfig)> {
        vec![
            ("token-prices", &self.token_prices),
            ("subscribers", &self.subscribers),
            ("whitelist-farms", &self.whitelist_farms),
            ("balance-check", &self.balance),
            ("token-price-check", &self.price),
            ("farms-apr", &self.farm_apr),
            ("user-positions", &self.positions),
            ("lottery-update", &self.lottery_update),
            ("lottery-result", &self.lottery_result),
            ("prediction-winners", &self.prediction_winners),
            ("prediction-reminder", &self.prediction_reminder),
        ]
    }
}

fn default_job_timeout() -> u64 {
    300
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_position_flag_ttl() -> u64 {
    3600
}
fn default_notify_url() -> String {
    "https://notify.walletconnect.com".to_string()
}
fn default_broadcast_url() -> String {
    "http://localhost:8000/broadcast-notifications".to_string()
}
fn default_coingecko_url() -> String {
    "https://api.coingecko.com/api/v3".to_string()
}
fn default_tokens() -> Vec<String> {
    vec![
        "ethereum".to_string(),
        "binancecoin".to_string(),
        "pancakeswap-token".to_string(),
    ]
}
fn default_rpc_urls() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("1".to_string(), "https://ethereum.publicnode.com".to_string()),
        ("56".to_string(), "https://bsc-dataseed.binance.org".to_string()),
    ])
}
fn default_farms_url() -> String {
    "https://pancakeswap.finance/api/v3".to_string()
}
fn default_farm_apr_url() -> String {
    "https://farms-api.pancakeswap.com/v3".to_string()
}
fn default_position_subgraphs() -> BTreeMap<String, String> {
    BTreeMap::from([
        (
            "1".to_string(),
            "https://api.thegraph.com/subgraphs/name/pancakeswap/exchange-v3-eth".to_string(),
        ),
        (
            "56".to_string(),
            "https://api.thegraph.com/subgraphs/name/pancakeswap/exchange-v3-bsc".to_string(),
        ),
    ])
}
fn default_lottery_subgraph() -> String {
    "https://api.thegraph.com/subgraphs/name/pancakeswap/lottery".to_string()
}
fn default_prediction_cake_subgraph() -> String {
    "https://api.thegraph.com/subgraphs/name/pancakeswap/prediction-cake".to_string()
}
fn default_prediction_bnb_subgraph() -> String {
    "https://api.thegraph.com/subgraphs/name/pancakeswap/prediction-v2".to_string()
}
fn default_true() -> bool {
    true
}

const MAINNETS: [ChainId; 2] = [ChainId::Ethereum, ChainId::Bsc];

fn default_token_prices_job() -> JobConfig {
    JobConfig::new("*/30 * * * * *", &[])
}
fn default_subscribers_job() -> JobConfig {
    JobConfig::new("0 */2 * * * *", &[])
}
fn default_whitelist_farms_job() -> JobConfig {
    JobConfig::new("0 0 * * * *", &[])
}
fn default_balance_job() -> JobConfig {
    JobConfig::new("0 */2 * * * *", &MAINNETS)
}
fn default_price_job() -> JobConfig {
    JobConfig::new("0 */3 * * * *", &MAINNETS)
}
fn default_farm_apr_job() -> JobConfig {
    JobConfig::new("0 */30 * * * *", &MAINNETS)
}
fn default_positions_job() -> JobConfig {
    JobConfig::new("0 0 * * * *", &MAINNETS)
}
fn default_lottery_update_job() -> JobConfig {
    JobConfig::new("0 */30 * * * *", &[])
}
fn default_lottery_result_job() -> JobConfig {
    JobConfig::new("0 0 * * * *", &[])
}
fn default_prediction_winners_job() -> JobConfig {
    JobConfig::new("0 0 * * * *", &[])
}
fn default_prediction_reminder_job() -> JobConfig {
    JobConfig::new("0 0 * * * *", &[])
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            job_timeout_secs: default_job_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            prefix: String::new(),
            position_flag_ttl_secs: default_position_flag_ttl(),
        }
    }
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            api_url: default_notify_url(),
            api_key: String::new(),
            secret_key: String::new(),
            broadcast_url: default_broadcast_url(),
            secure_token: String::new(),
            dry_run: false,
        }
    }
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            coingecko_url: default_coingecko_url(),
            tokens: default_tokens(),
            rpc_urls: default_rpc_urls(),
            farms_url: default_farms_url(),
            farm_apr_url: default_farm_apr_url(),
            position_subgraphs: default_position_subgraphs(),
            lottery_subgraph: default_lottery_subgraph(),
            prediction_cake_subgraph: default_prediction_cake_subgraph(),
            prediction_bnb_subgraph: default_prediction_bnb_subgraph(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            token_prices: default_token_prices_job(),
            subscribers: default_subscribers_job(),
            whitelist_farms: default_whitelist_farms_job(),
            balance: default_balance_job(),
            price: default_price_job(),
            farm_apr: default_farm_apr_job(),
            positions: default_positions_job(),
            lottery_update: default_lottery_update_job(),
            lottery_result: default_lottery_result_job(),
            prediction_winners: default_prediction_winners_job(),
            prediction_reminder: default_prediction_reminder_job(),
        }
    }
}

impl SourcesConfig {
    pub fn rpc_url(&self, chain: ChainId) -> Option<&str> {
        self.rpc_urls.get(&chain.id().to_string()).map(String::as_str)
    }

    pub fn position_subgraph(&self, chain: ChainId) -> Option<&str> {
        self.position_subgraphs
            .get(&chain.id().to_string())
            .map(String::as_str)
    }
}

impl SettingsConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }
}

impl AppConfig {
    /// Load config from the given TOML file path, falling back to defaults
    /// when the file is absent, then apply environment overrides.
    pub fn load(path: &Path, dry_run: bool) -> Result<Self, ConfigError> {
        let mut config = if path.exists() {
            Self::parse(&std::fs::read_to_string(path)?)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.notify.dry_run |= dry_run;
        config.validate()?;
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Overlay secrets and connection strings from the environment.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("REDIS_URL") {
            self.cache.url = url;
        }
        if let Some(key) = lookup("WALLET_CONNECT_API_KEY") {
            self.notify.api_key = key;
        }
        if let Some(secret) = lookup("WALLET_CONNECT_SECRET_KEY") {
            self.notify.secret_key = secret;
        }
        if let Some(token) = lookup("SECURE_TOKEN") {
            self.notify.secure_token = token;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, job) in self.jobs.entries() {
            job.parsed_schedule(name)?;
        }
        if self.notify.dry_run {
            return Ok(());
        }
        if self.notify.api_key.is_empty() {
            return Err(ConfigError::Missing("notify.api_key / WALLET_CONNECT_API_KEY"));
        }
        if self.notify.secret_key.is_empty() {
            return Err(ConfigError::Missing(
                "notify.secret_key / WALLET_CONNECT_SECRET_KEY",
            ));
        }
        Ok(())
    }
}
