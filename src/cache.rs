//! Last-seen values for every monitor: balances, prices, APRs, notification
//! flags and timestamps.
//!
//! Backends implement the raw string [`CacheStore`]; monitors go through the
//! typed [`Cache`] handle, which JSON-encodes values and fails open: a read
//! error is logged and reported as "absent", a write error is logged and
//! swallowed.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::types::{ChainId, Subscriber};

/// Raw key-value backend.
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;
    async fn exists(&self, key: &str) -> Result<bool>;
    /// Batched write, no expiry.
    async fn set_many(&self, entries: &[(String, String)]) -> Result<()>;
}

/// Deterministic key layout, `<purpose>-<job>-<subject>-<chain>`.
pub mod keys {
    use crate::types::ChainId;

    pub const SUBSCRIBERS: &str = "subscribers";
    pub const TOKEN_PRICES: &str = "multiple-prices";

    pub fn balance(user: &str, chain: ChainId) -> String {
        format!("balance-{user}-{chain}")
    }

    pub fn price(token: &str, chain: ChainId) -> String {
        format!("latestPrice-{token}-{chain}")
    }

    pub fn timestamp(job: &str, subject: &str, chain: ChainId) -> String {
        format!("timestamp-{job}-{subject}-{chain}")
    }

    pub fn farm_apr(pid: u64, chain: ChainId) -> String {
        format!("farm-{pid}-{chain}")
    }

    pub fn position_flag(chain: ChainId, position: &str, pool: &str, owner: &str) -> String {
        format!("userPosition-{chain}-{position}-{pool}-{owner}")
    }

    pub fn lottery_round(round: &str) -> String {
        format!("lotteryRound-{round}")
    }

    pub fn lottery_reminder(round: &str) -> String {
        format!("lotteryReminder-{round}")
    }

    pub fn whitelisted_farms(chain: ChainId) -> String {
        format!("whitelistedFarms-{chain}")
    }
}

/// Pool addresses of currently whitelisted farms on one chain.
#[derive(Debug, Clone, PartialEq, Serialize, serde::Deserialize)]
pub struct WhitelistedFarms {
    pub pools: Vec<String>,
    pub updated_at: i64,
}

/// Typed, fail-open handle shared by every component.
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn CacheStore>,
    prefix: String,
}

impl Cache {
    pub fn new(store: Arc<dyn CacheStore>, prefix: &str) -> Self {
        Self {
            store,
            prefix: prefix.to_string(),
        }
    }

    /// Unprefixed in-memory cache.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCache::default()), "")
    }

    fn key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.prefix, key)
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(&self.key(key)).await {
            Ok(raw) => raw?,
            Err(e) => {
                warn!(key, "cache read failed, treating as absent: {e:#}");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(key, "cache value is not valid JSON, treating as absent: {e}");
                None
            }
        }
    }

    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let json = match serde_json::to_string(value) {
            Ok(json) => json,
            Err(e) => {
                warn!(key, "failed to encode cache value: {e}");
                return;
            }
        };
        if let Err(e) = self.store.set(&self.key(key), &json, ttl).await {
            warn!(key, "cache write failed: {e:#}");
        } else {
            debug!(key, "cache updated");
        }
    }

    pub async fn exists(&self, key: &str) -> bool {
        match self.store.exists(&self.key(key)).await {
            Ok(found) => found,
            Err(e) => {
                warn!(key, "cache exists check failed, treating as absent: {e:#}");
                false
            }
        }
    }

    /// Stamp every key with the same unix timestamp in one round trip.
    pub async fn set_timestamps(&self, keys: &[String], now: i64) {
        if keys.is_empty() {
            return;
        }
        let entries: Vec<(String, String)> = keys
            .iter()
            .map(|k| (self.key(k), now.to_string()))
            .collect();
        if let Err(e) = self.store.set_many(&entries).await {
            warn!(count = keys.len(), "batched timestamp write failed: {e:#}");
        }
    }

    pub async fn subscribers(&self) -> Vec<Subscriber> {
        let accounts: Vec<String> = self.get(keys::SUBSCRIBERS).await.unwrap_or_default();
        accounts
            .iter()
            .filter_map(|a| a.parse().ok())
            .collect()
    }

    /// Replace the whole subscriber snapshot.
    pub async fn set_subscribers(&self, subscribers: &[Subscriber]) {
        let accounts: Vec<String> = subscribers.iter().map(Subscriber::account).collect();
        self.set(keys::SUBSCRIBERS, &accounts, None).await;
    }

    pub async fn token_prices(&self) -> Option<BTreeMap<String, f64>> {
        self.get(keys::TOKEN_PRICES).await
    }

    pub async fn set_token_prices(&self, prices: &BTreeMap<String, f64>) {
        self.set(keys::TOKEN_PRICES, prices, None).await;
    }

    pub async fn whitelisted_farms(&self, chain: ChainId) -> Option<WhitelistedFarms> {
        self.get(&keys::whitelisted_farms(chain)).await
    }

    pub async fn set_whitelisted_farms(&self, chain: ChainId, farms: &WhitelistedFarms) {
        self.set(&keys::whitelisted_farms(chain), farms, None).await;
    }
}

/// Process-local backend with TTL support, used by tests and `--memory-cache`.
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, (String, Option<Instant>)>>,
}

impl MemoryCache {
    fn live_value(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((_, Some(expires_at))) if *expires_at <= Instant::now() => {
                entries.remove(key);
                None
            }
            Some((value, _)) => Some(value.clone()),
            None => None,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl CacheStore for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.live_value(key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .lock()
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        Ok(self.live_value(key).is_some())
    }

    async fn set_many(&self, entries: &[(String, String)]) -> Result<()> {
        let mut map = self.entries.lock();
        for (key, value) in entries {
            map.insert(key.clone(), (value.clone(), None));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            anyhow::bail!("connection reset")
        }
        async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> Result<()> {
            anyhow::bail!("connection reset")
        }
        async fn exists(&self, _key: &str) -> Result<bool> {
            anyhow::bail!("connection reset")
        }
        async fn set_many(&self, _entries: &[(String, String)]) -> Result<()> {
            anyhow::bail!("connection reset")
        }
    }

    #[test]
    fn key_layout() {
        assert_eq!(keys::balance("0xabc", ChainId::Bsc), "balance-0xabc-56");
        assert_eq!(
            keys::timestamp("lottery-update", "0xabc", ChainId::BscTestnet),
            "timestamp-lottery-update-0xabc-97"
        );
        assert_eq!(
            keys::position_flag(ChainId::Ethereum, "12", "0xpool", "0xowner"),
            "userPosition-1-12-0xpool-0xowner"
        );
    }

    #[tokio::test]
    async fn typed_roundtrip() {
        let cache = Cache::in_memory();
        cache.set("apr", &12.5_f64, None).await;
        assert_eq!(cache.get::<f64>("apr").await, Some(12.5));
        assert_eq!(cache.get::<f64>("missing").await, None);
    }

    #[tokio::test]
    async fn prefix_namespaces_keys() {
        let store = Arc::new(MemoryCache::default());
        let a = Cache::new(store.clone(), "paper");
        let b = Cache::new(store.clone(), "live");
        a.set("k", &1, None).await;
        assert_eq!(a.get::<i32>("k").await, Some(1));
        assert_eq!(b.get::<i32>("k").await, None);
        assert!(store.get("paper:k").await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn ttl_expires_entries() {
        let cache = Cache::in_memory();
        cache
            .set("flag", &true, Some(Duration::from_secs(3600)))
            .await;
        assert!(cache.exists("flag").await);
        tokio::time::advance(Duration::from_secs(3599)).await;
        assert!(cache.exists("flag").await);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(!cache.exists("flag").await);
    }

    #[tokio::test]
    async fn read_errors_fail_open() {
        let cache = Cache::new(Arc::new(BrokenStore), "");
        assert_eq!(cache.get::<f64>("balance").await, None);
        assert!(!cache.exists("flag").await);
        // Writes are logged, never propagated.
        cache.set("balance", &1.0, None).await;
        cache.set_timestamps(&["t".to_string()], 1).await;
    }

    #[tokio::test]
    async fn garbage_value_is_absent() {
        let store = Arc::new(MemoryCache::default());
        store.set("k", "not json", None).await.unwrap();
        let cache = Cache::new(store, "");
        assert_eq!(cache.get::<f64>("k").await, None);
    }

    #[tokio::test]
    async fn timestamps_are_batched() {
        let cache = Cache::in_memory();
        let keys = vec!["t1".to_string(), "t2".to_string()];
        cache.set_timestamps(&keys, 1_700_000_000).await;
        assert_eq!(cache.get::<i64>("t1").await, Some(1_700_000_000));
        assert_eq!(cache.get::<i64>("t2").await, Some(1_700_000_000));
    }

    #[tokio::test]
    async fn subscribers_replace_wholesale() {
        let cache = Cache::in_memory();
        let first: Vec<Subscriber> = ["eip155:1:0xa", "eip155:1:0xb"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        cache.set_subscribers(&first).await;
        let second: Vec<Subscriber> = vec!["eip155:1:0xc".parse().unwrap()];
        cache.set_subscribers(&second).await;
        assert_eq!(cache.subscribers().await, second);
    }
}
