//! Betting service.
//!
//! Drives the escrow on behalf of a wallet: validates orders, keeps the
//! oracle fed from the push service, places bets, and settles matured ones.
//! The chain sits behind a `tokio::sync::Mutex`; the lock is never held
//! across a network call.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::escrow::{Chain, Resolution, MIN_BET};
use crate::oracle::{PriceOracle, PriceUpdateBundle, PriceUpdateSource};
use crate::types::{
    format_ether, parse_ether, Address, Bet, BetStatus, FeedId, Price, Wei, WEI_PER_ETHER,
};

/// Upper bound on a single stake accepted from the bet form.
pub const MAX_BET: Wei = WEI_PER_ETHER;

pub type SharedChain<O> = Arc<Mutex<Chain<O>>>;

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BetOrder {
    /// `true` = UP.
    pub prediction: bool,
    pub amount: Wei,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    #[error("Choose UP or DOWN before placing a bet")]
    MissingPrediction,

    #[error("Enter a bet amount in ETH (got {0:?})")]
    InvalidAmount(String),

    #[error("Minimum bet is {min_eth} ETH")]
    BelowMinimum { min_eth: String },

    #[error("Maximum bet is {max_eth} ETH")]
    AboveMaximum { max_eth: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BetLimits {
    pub min: Wei,
    pub max: Wei,
}

impl Default for BetLimits {
    fn default() -> Self {
        Self {
            min: MIN_BET,
            max: MAX_BET,
        }
    }
}

impl BetLimits {
    pub fn check(&self, amount: Wei) -> Result<(), OrderError> {
        if amount < self.min {
            return Err(OrderError::BelowMinimum {
                min_eth: format_ether(self.min),
            });
        }
        if amount > self.max {
            return Err(OrderError::AboveMaximum {
                max_eth: format_ether(self.max),
            });
        }
        Ok(())
    }

    /// Build an order from form input. `false` is a valid prediction.
    pub fn order(&self, prediction: Option<bool>, amount_text: &str) -> Result<BetOrder, OrderError> {
        let prediction = prediction.ok_or(OrderError::MissingPrediction)?;
        let amount = parse_ether(amount_text)
            .map_err(|_| OrderError::InvalidAmount(amount_text.trim().to_string()))?;
        self.check(amount)?;
        Ok(BetOrder { prediction, amount })
    }
}

// ---------------------------------------------------------------------------
// Views and reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BetView {
    pub id: u64,
    pub bet: Bet,
    pub status: BetStatus,
    pub resolvable_at: u64,
    /// Window elapsed and still unresolved.
    pub claimable: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedResolution {
    pub bet_id: u64,
    pub reason: String,
    pub retryable: bool,
}

/// Outcome of settling every matured bet in one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolutionReport {
    pub resolved: Vec<Resolution>,
    pub failed: Vec<FailedResolution>,
}

impl ResolutionReport {
    pub fn total_paid(&self) -> Wei {
        self.resolved.iter().map(|r| r.payout).sum()
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct BettingService<O> {
    chain: SharedChain<O>,
    source: Arc<dyn PriceUpdateSource>,
    limits: BetLimits,
    follow_wall_clock: bool,
}

impl<O: PriceOracle> BettingService<O> {
    pub fn new(chain: SharedChain<O>, source: Arc<dyn PriceUpdateSource>, limits: BetLimits) -> Self {
        Self {
            chain,
            source,
            limits,
            follow_wall_clock: false,
        }
    }

    /// Advance block time from the system clock before every call.
    pub fn following_wall_clock(mut self) -> Self {
        self.follow_wall_clock = true;
        self
    }

    pub fn chain(&self) -> SharedChain<O> {
        self.chain.clone()
    }

    pub fn limits(&self) -> BetLimits {
        self.limits
    }

    /// Block time tracks the wall clock and never trails `floor`.
    fn sync_clock(&self, chain: &mut Chain<O>, floor: u64) {
        if self.follow_wall_clock {
            let now = u64::try_from(Utc::now().timestamp()).unwrap_or(0);
            chain.set_block_time(now.max(floor));
        }
    }

    async fn fetch_update(&self, feed: &FeedId) -> Result<PriceUpdateBundle> {
        self.source
            .latest_update(feed)
            .await
            .with_context(|| format!("Failed to fetch price update from {}", self.source.name()))
    }

    /// Latest price stored in the oracle, whatever its age.
    pub async fn current_price(&self) -> Result<Price> {
        let chain = self.chain.lock().await;
        let price = chain.oracle().price_unsafe(&chain.price_feed_id())?;
        Ok(price)
    }

    /// Pull the latest update from the push service into the oracle.
    /// `payer` covers the update fee.
    pub async fn refresh_price(&self, payer: Address) -> Result<Price> {
        let feed = self.chain.lock().await.price_feed_id();
        let bundle = self.fetch_update(&feed).await?;
        let price = bundle
            .price_for(&feed)
            .with_context(|| format!("Update from {} has no price for {feed}", self.source.name()))?;

        let mut chain = self.chain.lock().await;
        self.sync_clock(&mut chain, price.publish_time);
        let data = chain.oracle().payload_from(&bundle);
        let fee = chain.oracle().update_fee(&data);
        chain
            .update_price_feeds(payer, fee, &data)
            .context("Oracle rejected price update")?;

        debug!(price = %price, fee = %fee, "Oracle price refreshed");
        Ok(price)
    }

    /// Place `order` for `bettor`. The oracle is refreshed first; if that
    /// fails the contract's own staleness check decides.
    pub async fn place_bet(&self, bettor: Address, order: &BetOrder) -> Result<u64> {
        self.limits.check(order.amount)?;

        if let Err(e) = self.refresh_price(bettor).await {
            warn!(error = %e, "Price refresh before bet failed, using stored oracle price");
        }

        let mut chain = self.chain.lock().await;
        self.sync_clock(&mut chain, 0);
        let bet_id = chain.place_bet(bettor, order.amount, order.prediction)?;

        info!(
            bet_id,
            bettor = %bettor,
            direction = if order.prediction { "UP" } else { "DOWN" },
            amount = %format_ether(order.amount),
            "Bet submitted"
        );
        Ok(bet_id)
    }

    /// Settle one bet with fresh update data. `caller` pays the fee.
    pub async fn resolve_bet(&self, caller: Address, bet_id: u64) -> Result<Resolution> {
        let feed = self.chain.lock().await.price_feed_id();
        let bundle = self.fetch_update(&feed).await?;
        let floor = bundle.price_for(&feed).map(|p| p.publish_time).unwrap_or(0);

        let mut chain = self.chain.lock().await;
        self.sync_clock(&mut chain, floor);
        let data = chain.oracle().payload_from(&bundle);
        let fee = chain.oracle().update_fee(&data);
        let resolution = chain.resolve_bet(caller, fee, bet_id, &data)?;
        Ok(resolution)
    }

    /// Bets placed by `user`, in placement order.
    pub async fn bets_for(&self, user: &Address) -> Vec<BetView> {
        let mut chain = self.chain.lock().await;
        self.sync_clock(&mut chain, 0);
        let now = chain.block_time();
        let duration = chain.escrow().params().bet_duration;

        chain
            .get_user_bets(user)
            .into_iter()
            .filter_map(|id| chain.get_bet(id).ok().map(|bet| (id, bet)))
            .map(|(id, bet)| {
                let resolvable_at = bet.resolvable_at(duration);
                BetView {
                    id,
                    status: bet.status(),
                    claimable: !bet.resolved && now >= resolvable_at,
                    resolvable_at,
                    bet,
                }
            })
            .collect()
    }

    /// Unresolved bets whose window has elapsed.
    pub async fn matured_pending(&self) -> Vec<u64> {
        let mut chain = self.chain.lock().await;
        self.sync_clock(&mut chain, 0);
        chain.escrow().matured_pending(chain.block_time())
    }

    /// Settle every matured bet using one fetched update. Failures are
    /// reported, not retried.
    pub async fn resolve_matured(&self, caller: Address) -> Result<ResolutionReport> {
        let pending = self.matured_pending().await;
        if pending.is_empty() {
            return Ok(ResolutionReport::default());
        }

        let feed = self.chain.lock().await.price_feed_id();
        let bundle = self.fetch_update(&feed).await?;
        let floor = bundle.price_for(&feed).map(|p| p.publish_time).unwrap_or(0);

        let mut chain = self.chain.lock().await;
        self.sync_clock(&mut chain, floor);
        let data = chain.oracle().payload_from(&bundle);
        let fee = chain.oracle().update_fee(&data);

        let mut report = ResolutionReport::default();
        for bet_id in pending {
            match chain.resolve_bet(caller, fee, bet_id, &data) {
                Ok(resolution) => report.resolved.push(resolution),
                Err(e) => {
                    warn!(bet_id, error = %e, retryable = e.is_retryable(), "Bet resolution failed");
                    report.failed.push(FailedResolution {
                        bet_id,
                        reason: e.to_string(),
                        retryable: e.is_retryable(),
                    });
                }
            }
        }

        info!(
            resolved = report.resolved.len(),
            failed = report.failed.len(),
            paid = %format_ether(report.total_paid()),
            "Matured bets processed"
        );
        Ok(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
