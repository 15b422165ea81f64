use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Prefix WalletConnect puts in front of every subscriber account.
pub const ACCOUNT_PREFIX: &str = "eip155:1:";

/// CoinGecko id of CAKE, used to price lottery prizes.
pub const CAKE_TOKEN: &str = "pancakeswap-token";

/// Networks the monitors know how to partition work by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub enum ChainId {
    Ethereum,
    Goerli,
    Bsc,
    BscTestnet,
    OpBnb,
    ZkSync,
    PolygonZkEvm,
    Base,
    Arbitrum,
    Linea,
}

impl ChainId {
    pub const ALL: [ChainId; 10] = [
        ChainId::Ethereum,
        ChainId::Goerli,
        ChainId::Bsc,
        ChainId::BscTestnet,
        ChainId::OpBnb,
        ChainId::ZkSync,
        ChainId::PolygonZkEvm,
        ChainId::Base,
        ChainId::Arbitrum,
        ChainId::Linea,
    ];

    pub fn id(self) -> u64 {
        match self {
            ChainId::Ethereum => 1,
            ChainId::Goerli => 5,
            ChainId::Bsc => 56,
            ChainId::BscTestnet => 97,
            ChainId::OpBnb => 204,
            ChainId::ZkSync => 324,
            ChainId::PolygonZkEvm => 1101,
            ChainId::Base => 8453,
            ChainId::Arbitrum => 42161,
            ChainId::Linea => 59144,
        }
    }

    /// CoinGecko id of the chain's native gas token.
    pub fn native_token(self) -> &'static str {
        match self {
            ChainId::Bsc | ChainId::BscTestnet | ChainId::OpBnb => "binancecoin",
            _ => "ethereum",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ChainId::Ethereum | ChainId::Goerli => "ethereum",
            ChainId::Bsc | ChainId::BscTestnet => "bsc",
            ChainId::OpBnb => "opbnb",
            ChainId::ZkSync => "era",
            ChainId::PolygonZkEvm => "polygon_zkevm",
            ChainId::Base => "base",
            ChainId::Arbitrum => "arbitrum",
            ChainId::Linea => "linea",
        }
    }
}

impl TryFrom<u64> for ChainId {
    type Error = ConfigError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        ChainId::ALL
            .into_iter()
            .find(|c| c.id() == value)
            .ok_or(ConfigError::UnknownChain(value))
    }
}

impl From<ChainId> for u64 {
    fn from(chain: ChainId) -> Self {
        chain.id()
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id())
    }
}

/// An active push subscriber, e.g. `eip155:1:0xabc…`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Subscriber {
    pub address: String,
    pub chain_prefix: String,
}

impl Subscriber {
    /// Full account string as the notify API expects it.
    pub fn account(&self) -> String {
        format!("{}{}", self.chain_prefix, self.address)
    }
}

impl FromStr for Subscriber {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // "eip155:<chain>:<address>"; anything else is a bare address.
        let parts: Vec<&str> = s.splitn(3, ':').collect();
        if parts.len() == 3 {
            Ok(Subscriber {
                address: parts[2].to_lowercase(),
                chain_prefix: format!("{}:{}:", parts[0], parts[1]),
            })
        } else {
            Ok(Subscriber {
                address: s.to_lowercase(),
                chain_prefix: ACCOUNT_PREFIX.to_string(),
            })
        }
    }
}

/// Native token balance of one account, in whole tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct AccountBalance {
    pub address: String,
    pub balance: f64,
}

/// Current CAKE reward APR of a v3 farm.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FarmApr {
    pub pid: u64,
    #[serde(rename = "lpSymbol")]
    pub lp_symbol: String,
    pub apr: f64,
}

/// Which side of a position's range the pool tick has crossed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickSide {
    /// Pool tick is below the position's lower bound.
    Lower,
    /// Pool tick is above the position's upper bound.
    Upper,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolTick {
    pub pool: String,
    pub tick: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserPosition {
    pub id: String,
    pub pool: String,
    pub owner: String,
    pub created_at: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LotteryRound {
    pub id: String,
    /// Draw time, unix seconds.
    pub end_time: i64,
    /// Seven digit winning number including the leading marker digit.
    pub final_number: Option<String>,
    /// CAKE per ticket.
    pub ticket_price: f64,
    pub total_users: u64,
    /// Ticket sales so far, in CAKE.
    pub prize_cake: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRound {
    pub lottery_id: String,
    pub claimable: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LotteryPlayer {
    pub account: String,
    pub rounds: Vec<PlayerRound>,
}

impl LotteryPlayer {
    pub fn entered(&self, round_id: &str) -> bool {
        self.rounds.iter().any(|r| r.lottery_id == round_id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LotteryTicket {
    pub id: String,
    pub number: String,
    pub claimed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionBet {
    pub user: String,
    pub claimed: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionRound {
    pub id: String,
    pub bets: Vec<PredictionBet>,
}

/// Which prediction market a round belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PredictionMarket {
    Cake,
    Bnb,
}

impl PredictionMarket {
    pub const ALL: [PredictionMarket; 2] = [PredictionMarket::Cake, PredictionMarket::Bnb];
}

impl fmt::Display for PredictionMarket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PredictionMarket::Cake => write!(f, "cake"),
            PredictionMarket::Bnb => write!(f, "bnb"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_roundtrips_through_numeric_id() {
        for chain in ChainId::ALL {
            assert_eq!(ChainId::try_from(chain.id()).unwrap(), chain);
        }
        assert!(ChainId::try_from(12345).is_err());
    }

    #[test]
    fn chain_deserializes_from_number() {
        let chains: Vec<ChainId> = serde_json::from_str("[1, 56]").unwrap();
        assert_eq!(chains, vec![ChainId::Ethereum, ChainId::Bsc]);
        assert!(serde_json::from_str::<ChainId>("7").is_err());
    }

    #[test]
    fn subscriber_parses_prefixed_account() {
        let s: Subscriber = "eip155:1:0xABCdef".parse().unwrap();
        assert_eq!(s.address, "0xabcdef");
        assert_eq!(s.chain_prefix, "eip155:1:");
        assert_eq!(s.account(), "eip155:1:0xabcdef");
    }

    #[test]
    fn subscriber_parses_bare_address() {
        let s: Subscriber = "0xabc".parse().unwrap();
        assert_eq!(s.account(), "eip155:1:0xabc");
    }

    #[test]
    fn player_entered_round() {
        let p = LotteryPlayer {
            account: "0x1".into(),
            rounds: vec![PlayerRound {
                lottery_id: "7".into(),
                claimable: false,
            }],
        };
        assert!(p.entered("7"));
        assert!(!p.entered("8"));
    }
}
