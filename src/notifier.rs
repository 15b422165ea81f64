//! Push notification sink.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::NotifyConfig;
use crate::types::{ACCOUNT_PREFIX, ChainId};

/// One variant per notification kind, carrying exactly what its text needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    LowBalance {
        chain: ChainId,
    },
    PriceMovement {
        token: String,
        change_pct: f64,
        price: f64,
        previous: f64,
    },
    FarmApr {
        lp_symbol: String,
        chain: ChainId,
        apr: f64,
        previous: f64,
    },
    LpOutOfRange,
    LotteryNewRound {
        minutes_to_draw: i64,
        ticket_price: f64,
        players: u64,
        prize_cake: f64,
        prize_usd: f64,
    },
    LotteryDrawReminder {
        minutes_to_draw: i64,
    },
    LotteryWinner,
    LotteryUnclaimed,
    PredictionWinnings,
    PredictionWelcome,
}

/// Category tag understood by the notify API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Topic {
    Lottery,
    Prediction,
    Liquidity,
    Farms,
    PriceUpdates,
    #[serde(rename = "alerts")]
    Alerts,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushMessage {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub url: String,
    #[serde(rename = "type")]
    pub topic: Topic,
}

#[derive(Debug, Serialize)]
struct NotifyRequest<'a> {
    accounts: Vec<String>,
    notification: &'a PushMessage,
}

#[derive(Debug, Default, Deserialize)]
struct NotifyResponse {
    #[serde(default)]
    sent: Vec<String>,
    #[serde(default)]
    failed: Vec<serde_json::Value>,
    #[serde(default)]
    not_found: Vec<String>,
}

fn token_display(token: &str) -> &str {
    match token {
        "ethereum" => "Ethereum",
        "binancecoin" => "BNB",
        other => other,
    }
}

impl Notification {
    pub fn kind(&self) -> &'static str {
        match self {
            Notification::LowBalance { .. } => "low-balance",
            Notification::PriceMovement { .. } => "token-price-movement",
            Notification::FarmApr { .. } => "farm-apr",
            Notification::LpOutOfRange => "lp-out-of-range",
            Notification::LotteryNewRound { .. }
            | Notification::LotteryDrawReminder { .. }
            | Notification::LotteryWinner
            | Notification::LotteryUnclaimed => "lottery",
            Notification::PredictionWinnings => "prediction-winner",
            Notification::PredictionWelcome => "prediction-notify",
        }
    }

    pub fn message(&self) -> PushMessage {
        let (title, body, icon, url, topic) = match self {
            Notification::LowBalance { chain } => (
                "Your Balance is Low".to_string(),
                format!(
                    "Your {} balance has fallen below $15 USD.",
                    chain.display_name()
                ),
                format!("https://assets.pancakeswap.finance/web/native/{}.png", chain.id()),
                "https://pancakeswap.finance/buy-crypto".to_string(),
                Topic::Alerts,
            ),
            Notification::PriceMovement {
                token,
                change_pct,
                price,
                previous,
            } => (
                format!("{} Price Movement", token_display(token)),
                format!(
                    "The price of {} has increased by {change_pct:.4}%. Old price: ${previous}. Current price: ${price}",
                    token_display(token)
                ),
                "https://pancakeswap.finance/logo.png".to_string(),
                format!("https://www.coingecko.com/en/coins/{token}"),
                Topic::PriceUpdates,
            ),
            Notification::FarmApr {
                lp_symbol,
                chain,
                apr,
                previous,
            } => (
                "Farms APR Update".to_string(),
                format!(
                    "{lp_symbol} on {}: APR has risen by over 20%. Old APR: {previous:.2}%. Current APR: {apr:.2}%",
                    chain.display_name()
                ),
                "https://pancakeswap.finance/logo.png".to_string(),
                "https://pancakeswap.finance/farms".to_string(),
                Topic::Farms,
            ),
            Notification::LpOutOfRange => (
                "LP position out of range".to_string(),
                "Your liquidity position is no longer in range and is not earning fees."
                    .to_string(),
                "https://pancakeswap.finance/logo.png".to_string(),
                "https://pancakeswap.finance/liquidity".to_string(),
                Topic::Liquidity,
            ),
            Notification::LotteryNewRound {
                minutes_to_draw,
                ticket_price,
                players,
                prize_cake,
                prize_usd,
            } => (
                "PancakeSwap Lottery".to_string(),
                format!(
                    "{}h {}m until the next draw. Tickets cost {ticket_price} CAKE for a chance to win {prize_cake:.0} CAKE worth over ${prize_usd:.0}. Current players: {players}",
                    minutes_to_draw / 60,
                    minutes_to_draw % 60
                ),
                "https://pancakeswap.finance/images/lottery/ticket-r.png".to_string(),
                "https://pancakeswap.finance/lottery".to_string(),
                Topic::Lottery,
            ),
            Notification::LotteryDrawReminder { minutes_to_draw } => (
                "PancakeSwap Lottery".to_string(),
                format!("Just under {minutes_to_draw} minutes until the draw. Good luck!"),
                "https://pancakeswap.finance/images/lottery/ticket-r.png".to_string(),
                "https://pancakeswap.finance/lottery".to_string(),
                Topic::Lottery,
            ),
            Notification::LotteryWinner => (
                "PancakeSwap Lottery".to_string(),
                "You have a winning ticket in today's draw. Your CAKE is ready to claim."
                    .to_string(),
                "https://pancakeswap.finance/images/lottery/ticket-r.png".to_string(),
                "https://pancakeswap.finance/lottery".to_string(),
                Topic::Lottery,
            ),
            Notification::LotteryUnclaimed => (
                "PancakeSwap Lottery".to_string(),
                "You have unclaimed lottery prizes.".to_string(),
                "https://pancakeswap.finance/images/lottery/ticket-r.png".to_string(),
                "https://pancakeswap.finance/lottery".to_string(),
                Topic::Lottery,
            ),
            Notification::PredictionWinnings => (
                "PancakeSwap Predictions Winner".to_string(),
                "You won a predictions round and have unclaimed prizes.".to_string(),
                "https://pancakeswap.finance/images/decorations/prediction.png".to_string(),
                "https://pancakeswap.finance/predictions".to_string(),
                Topic::Prediction,
            ),
            Notification::PredictionWelcome => (
                "PancakeSwap Predictions".to_string(),
                "Predict the price of CAKE and BNB for a chance to win.".to_string(),
                "https://pancakeswap.finance/images/decorations/prediction.png".to_string(),
                "https://pancakeswap.finance/predictions".to_string(),
                Topic::Prediction,
            ),
        };
        PushMessage {
            title,
            body,
            icon,
            url,
            topic,
        }
    }
}

/// Delivery boundary. Returns how many recipients the backend accepted.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn dispatch(&self, notification: &Notification, recipients: &[String]) -> Result<usize>;
}

/// WalletConnect Notify API client with the browser broadcast side-channel.
pub struct WalletConnectNotifier {
    http: Client,
    config: NotifyConfig,
}

impl WalletConnectNotifier {
    pub fn new(http: Client, config: NotifyConfig) -> Self {
        Self { http, config }
    }

    async fn broadcast(&self, recipients: &[String]) -> Result<()> {
        let body = serde_json::json!({
            "notification": {
                "title": "PancakeSwap Alert",
                "body": "You have new updates from PancakeSwap DEX.",
            },
            "users": recipients,
        });
        self.http
            .post(&self.config.broadcast_url)
            .header("x-secure-token", &self.config.secure_token)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for WalletConnectNotifier {
    async fn dispatch(&self, notification: &Notification, recipients: &[String]) -> Result<usize> {
        if recipients.is_empty() {
            return Ok(0);
        }
        let message = notification.message();
        let request = NotifyRequest {
            accounts: recipients
                .iter()
                .map(|r| format!("{ACCOUNT_PREFIX}{r}"))
                .collect(),
            notification: &message,
        };
        let url = format!("{}/{}/notify", self.config.api_url, self.config.api_key);
        let response: NotifyResponse = self
            .http
            .post(&url)
            .bearer_auth(&self.config.secret_key)
            .json(&request)
            .send()
            .await
            .context("notify request failed")?
            .error_for_status()
            .context("notify API rejected request")?
            .json()
            .await
            .context("failed to decode notify response")?;

        info!(
            kind = notification.kind(),
            sent = response.sent.len(),
            failed = response.failed.len(),
            not_found = response.not_found.len(),
            "notification dispatched"
        );
        if !response.sent.is_empty() {
            if let Err(e) = self.broadcast(recipients).await {
                warn!("browser broadcast failed: {e:#}");
            }
        }
        Ok(response.sent.len())
    }
}

/// Writes each dispatch as a JSON line to stdout instead of delivering it.
#[derive(Default)]
pub struct DryRunNotifier;

#[async_trait]
impl Notifier for DryRunNotifier {
    async fn dispatch(&self, notification: &Notification, recipients: &[String]) -> Result<usize> {
        let line = serde_json::json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "kind": notification.kind(),
            "recipients": recipients,
            "notification": notification.message(),
        });
        println!("{line}");
        debug!(kind = notification.kind(), count = recipients.len(), "dry-run dispatch");
        Ok(recipients.len())
    }
}
