//! Shared types for WAGERCHAT.
//!
//! Wallet addresses, oracle feed identifiers, prices, bets and escrow
//! events. Every other module depends on these; nothing here depends on
//! the escrow, oracle or messaging modules.

use anyhow::{bail, Context};
use rust_decimal::prelude::*;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Amounts
// ---------------------------------------------------------------------------

/// Native-token amount in the smallest unit (1 ether = 10^18 wei).
pub type Wei = u128;

pub const WEI_PER_ETHER: Wei = 1_000_000_000_000_000_000;

/// Parse a human-entered ether amount ("0.001") into wei.
pub fn parse_ether(input: &str) -> anyhow::Result<Wei> {
    let trimmed = input.trim();
    let value = Decimal::from_str(trimmed)
        .with_context(|| format!("Not a valid ether amount: {trimmed:?}"))?;
    if value.is_sign_negative() {
        bail!("Ether amount cannot be negative: {trimmed}");
    }

    let wei = value
        .checked_mul(Decimal::from(WEI_PER_ETHER as u64))
        .with_context(|| format!("Ether amount too large: {trimmed}"))?;
    if !wei.fract().is_zero() {
        bail!("Ether amount has more than 18 decimal places: {trimmed}");
    }

    wei.to_u128()
        .with_context(|| format!("Ether amount out of range: {trimmed}"))
}

/// Wei as a decimal ether value. `None` only for amounts beyond `Decimal` range.
pub fn ether_decimal(wei: Wei) -> Option<Decimal> {
    let signed = i128::try_from(wei).ok()?;
    Decimal::try_from_i128_with_scale(signed, 18)
        .ok()
        .map(|d| d.normalize())
}

/// Render wei as an ether string ("0.002").
pub fn format_ether(wei: Wei) -> String {
    ether_decimal(wei)
        .map(|d| d.to_string())
        .unwrap_or_else(|| format!("{wei} wei"))
}

// ---------------------------------------------------------------------------
// Address
// ---------------------------------------------------------------------------

/// A 20-byte wallet or contract address.
///
/// Parsed case-insensitively from `0x` + 40 hex characters, always
/// displayed lowercase.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Address([u8; 20]);

impl Address {
    pub const ZERO: Address = Address([0u8; 20]);

    pub const fn from_bytes(bytes: [u8; 20]) -> Self {
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Whether `input` is a well-formed address (no surrounding whitespace).
    pub fn is_valid(input: &str) -> bool {
        input.parse::<Address>().is_ok()
    }

    /// Short label for lists: `0x1234...abcd`.
    pub fn short(&self) -> String {
        let full = self.to_string();
        format!("{}...{}", &full[..6], &full[full.len() - 4..])
    }
}

impl FromStr for Address {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(body) = s.strip_prefix("0x") else {
            bail!("Address must start with 0x: {s:?}");
        };
        if body.len() != 40 || !body.chars().all(|c| c.is_ascii_hexdigit()) {
            bail!("Address must be 40 hex characters after 0x: {s:?}");
        }
        let mut bytes = [0u8; 20];
        hex::decode_to_slice(body, &mut bytes)
            .with_context(|| format!("Invalid address hex: {s:?}"))?;
        Ok(Address(bytes))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Feed id
// ---------------------------------------------------------------------------

/// 32-byte oracle price feed identifier (e.g. ETH/USD).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FeedId([u8; 32]);

/// ETH/USD feed id, identical across networks.
pub const ETH_USD_FEED: &str =
    "0xff61491a931112ddf1bd8147cd1b641375f79f5825126d665480874634fd0ace";

impl FeedId {
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        FeedId(bytes)
    }

    /// Hex without the `0x` prefix, the form the push service expects.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl FromStr for FeedId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let body = s.strip_prefix("0x").unwrap_or(s);
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(body, &mut bytes)
            .with_context(|| format!("Feed id must be 32 bytes of hex: {s:?}"))?;
        Ok(FeedId(bytes))
    }
}

impl fmt::Display for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.to_hex())
    }
}

impl fmt::Debug for FeedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FeedId({self})")
    }
}

impl Serialize for FeedId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for FeedId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Price
// ---------------------------------------------------------------------------

/// An oracle price: `price × 10^expo`, with confidence interval and
/// publish time (unix seconds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Price {
    pub price: i64,
    pub conf: u64,
    pub expo: i32,
    pub publish_time: u64,
}

impl Price {
    /// The price as a decimal (e.g. 205000000000 × 10^-8 → 2050.00).
    pub fn to_decimal(&self) -> Option<Decimal> {
        scale_price(self.price, self.expo)
    }

    /// Seconds between publication and `now`, in either direction.
    pub fn age(&self, now: u64) -> u64 {
        now.abs_diff(self.publish_time)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_decimal() {
            Some(d) => write!(f, "${:.2} (t={})", d, self.publish_time),
            None => write!(f, "{}e{} (t={})", self.price, self.expo, self.publish_time),
        }
    }
}

/// Apply an oracle exponent to an integer mantissa.
pub fn scale_price(mantissa: i64, expo: i32) -> Option<Decimal> {
    if expo <= 0 {
        Decimal::try_new(mantissa, expo.unsigned_abs()).ok()
    } else {
        let factor = 10i64.checked_pow(expo as u32)?;
        Decimal::from(mantissa).checked_mul(Decimal::from(factor))
    }
}

// ---------------------------------------------------------------------------
// Bet
// ---------------------------------------------------------------------------

/// A single up/down wager recorded by the escrow.
///
/// Everything except `resolved` and `won` is fixed at placement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bet {
    pub bettor: Address,
    /// `true` = price goes up.
    pub prediction: bool,
    pub amount: Wei,
    /// Block time at placement.
    pub timestamp: u64,
    /// Oracle mantissa recorded at placement.
    pub target_price: u64,
    pub resolved: bool,
    /// Only meaningful once `resolved`.
    pub won: bool,
}

impl Bet {
    pub fn status(&self) -> BetStatus {
        match (self.resolved, self.won) {
            (false, _) => BetStatus::Pending,
            (true, true) => BetStatus::Won,
            (true, false) => BetStatus::Lost,
        }
    }

    /// Earliest block time at which the bet may be resolved.
    pub fn resolvable_at(&self, bet_duration: u64) -> u64 {
        self.timestamp.saturating_add(bet_duration)
    }

    /// Amount paid to the bettor on a win.
    pub fn winning_payout(&self) -> Option<Wei> {
        self.amount.checked_mul(2)
    }

    pub fn direction_label(&self) -> &'static str {
        if self.prediction {
            "UP"
        } else {
            "DOWN"
        }
    }
}

impl fmt::Display for Bet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ETH by {} @ {} [{}]",
            self.direction_label(),
            format_ether(self.amount),
            self.bettor.short(),
            self.target_price,
            self.status(),
        )
    }
}

/// Derived view of a bet's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BetStatus {
    Pending,
    Won,
    Lost,
}

impl fmt::Display for BetStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BetStatus::Pending => write!(f, "⏳ Pending"),
            BetStatus::Won => write!(f, "✅ Won"),
            BetStatus::Lost => write!(f, "❌ Lost"),
        }
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Events emitted by the escrow, queryable by bet id and by bettor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscrowEvent {
    BetPlaced {
        bet_id: u64,
        bettor: Address,
        prediction: bool,
        amount: Wei,
        target_price: u64,
    },
    BetResolved {
        bet_id: u64,
        bettor: Address,
        won: bool,
        payout: Wei,
    },
}

impl EscrowEvent {
    pub fn bet_id(&self) -> u64 {
        match self {
            EscrowEvent::BetPlaced { bet_id, .. } | EscrowEvent::BetResolved { bet_id, .. } => {
                *bet_id
            }
        }
    }

    pub fn bettor(&self) -> Address {
        match self {
            EscrowEvent::BetPlaced { bettor, .. } | EscrowEvent::BetResolved { bettor, .. } => {
                *bettor
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// How a failed call should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Fix the input or wait, then retry.
    InputValidation,
    /// Terminal for the bet in question.
    StateConflict,
    /// Oracle or transfer problem; the whole call was rolled back.
    ExternalDependency,
}

/// Reasons an escrow or oracle call reverts. A reverted call leaves no
/// state behind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EscrowError {
    #[error("Bet too small: {amount} wei is below the minimum of {minimum} wei")]
    InsufficientBet { amount: Wei, minimum: Wei },

    #[error("Bet {bet_id} cannot be resolved before {resolvable_at} (block time {now})")]
    TooEarly {
        bet_id: u64,
        resolvable_at: u64,
        now: u64,
    },

    #[error("Bet {0} is already resolved")]
    AlreadyResolved(u64),

    #[error("Bet {0} does not exist")]
    BetNotFound(u64),

    #[error("Oracle price is stale: published at {publish_time}, block time {now}, max age {max_age}s")]
    OracleStale {
        publish_time: u64,
        now: u64,
        max_age: u64,
    },

    #[error("Oracle has no price for feed {0}")]
    PriceNotFound(FeedId),

    #[error("Oracle returned a non-positive price: {0}")]
    InvalidPrice(i64),

    #[error("Invalid price update: {0}")]
    InvalidUpdate(String),

    #[error("Update fee not covered: need {required} wei, got {provided} wei")]
    InsufficientFee { required: Wei, provided: Wei },

    #[error("Insufficient funds: {account} has {available} wei, needs {needed} wei")]
    InsufficientFunds {
        account: Address,
        available: Wei,
        needed: Wei,
    },

    #[error("Transfer of {amount} wei to {to} failed")]
    TransferFailed { to: Address, amount: Wei },
}

impl EscrowError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            EscrowError::InsufficientBet { .. }
            | EscrowError::TooEarly { .. }
            | EscrowError::InsufficientFee { .. }
            | EscrowError::InsufficientFunds { .. } => ErrorCategory::InputValidation,
            EscrowError::AlreadyResolved(_) | EscrowError::BetNotFound(_) => {
                ErrorCategory::StateConflict
            }
            EscrowError::OracleStale { .. }
            | EscrowError::PriceNotFound(_)
            | EscrowError::InvalidPrice(_)
            | EscrowError::InvalidUpdate(_)
            | EscrowError::TransferFailed { .. } => ErrorCategory::ExternalDependency,
        }
    }

    /// Whether the same call may succeed later (new input, later block,
    /// fresher oracle data).
    pub fn is_retryable(&self) -> bool {
        self.category() != ErrorCategory::StateConflict
    }
}

/// Messaging and chat-glue failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChatError {
    #[error("Not a valid wallet address: {0:?}")]
    InvalidAddress(String),

    #[error("Enter at least one valid wallet address")]
    NoValidAddresses,

    #[error("Message is empty")]
    EmptyMessage,

    #[error("Not reachable on the messaging network: {}", format_addresses(.0))]
    NotReachable(Vec<Address>),

    #[error("This messaging client cannot create group conversations")]
    GroupsUnsupported,

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("No wallet session is connected")]
    NotConnected,

    #[error("Messaging client has been closed")]
    Closed,

    #[error("Messaging transport error: {0}")]
    Transport(String),
}

fn format_addresses(addresses: &[Address]) -> String {
    addresses
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
