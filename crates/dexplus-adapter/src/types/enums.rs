/*
[INPUT]:  Exchange side markers and configured channel kinds
[OUTPUT]: Side and ChannelKind enums with serde support
[POS]:    Data layer - shared enums
[UPDATE]: When adding payload kinds
*/

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// Parse the spellings exchanges use for a taker side.
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "buy" | "b" | "bid" => Some(Side::Buy),
            "sell" | "s" | "ask" => Some(Side::Sell),
            _ => None,
        }
    }
}

/// Payload kind a subscription delivers. Selects the typed decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Trades,
    Book,
    Ticker,
    Candles,
    /// Account channels below need a logged-in connection.
    Orders,
    Fills,
    Positions,
    BalanceAndPosition,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Trades => "trades",
            ChannelKind::Book => "book",
            ChannelKind::Ticker => "ticker",
            ChannelKind::Candles => "candles",
            ChannelKind::Orders => "orders",
            ChannelKind::Fills => "fills",
            ChannelKind::Positions => "positions",
            ChannelKind::BalanceAndPosition => "balance_and_position",
        }
    }

    /// Account data, only served after login.
    pub fn is_private(&self) -> bool {
        matches!(
            self,
            ChannelKind::Orders
                | ChannelKind::Fills
                | ChannelKind::Positions
                | ChannelKind::BalanceAndPosition
        )
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
