//! Keeper: the periodic maintenance pass.
//!
//! Each tick pushes the latest oracle price and, when enabled, settles
//! every matured bet on behalf of the keeper account, which pays the
//! oracle fees. Failures are recorded in the tick report; the next tick
//! retries naturally.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::engine::betting::{BettingService, ResolutionReport};
use crate::oracle::PriceOracle;
use crate::types::{Address, Price, Wei};

#[derive(Debug, Clone, Copy)]
pub struct KeeperConfig {
    /// Account that pays oracle fees and submits resolutions.
    pub account: Address,
    pub auto_resolve: bool,
}

/// Summary of one keeper tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub tick_number: u64,
    pub price: Option<Price>,
    pub price_error: Option<String>,
    pub resolution: ResolutionReport,
    pub resolution_error: Option<String>,
    pub keeper_balance: Wei,
    pub contract_balance: Wei,
    pub timestamp: DateTime<Utc>,
}

impl TickReport {
    pub fn is_clean(&self) -> bool {
        self.price_error.is_none() && self.resolution_error.is_none() && self.resolution.failed.is_empty()
    }
}

pub struct Keeper<O> {
    betting: Arc<BettingService<O>>,
    config: KeeperConfig,
    ticks: u64,
}

impl<O: PriceOracle> Keeper<O> {
    pub fn new(betting: Arc<BettingService<O>>, config: KeeperConfig) -> Self {
        Self {
            betting,
            config,
            ticks: 0,
        }
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub async fn tick(&mut self) -> TickReport {
        self.ticks += 1;
        let account = self.config.account;

        let (price, price_error) = match self.betting.refresh_price(account).await {
            Ok(p) => (Some(p), None),
            Err(e) => {
                warn!(error = %format!("{e:#}"), "Keeper price refresh failed");
                (None, Some(format!("{e:#}")))
            }
        };

        let (resolution, resolution_error) = if self.config.auto_resolve {
            match self.betting.resolve_matured(account).await {
                Ok(r) => (r, None),
                Err(e) => {
                    warn!(error = %format!("{e:#}"), "Keeper resolution pass failed");
                    (ResolutionReport::default(), Some(format!("{e:#}")))
                }
            }
        } else {
            (ResolutionReport::default(), None)
        };

        let (keeper_balance, contract_balance) = {
            let chain = self.betting.chain();
            let chain = chain.lock().await;
            (chain.balance_of(&account), chain.contract_balance())
        };

        if keeper_balance == 0 {
            warn!(account = %account, "Keeper account is empty; oracle fees cannot be paid");
        }

        let report = TickReport {
            tick_number: self.ticks,
            price,
            price_error,
            resolution,
            resolution_error,
            keeper_balance,
            contract_balance,
            timestamp: Utc::now(),
        };
        info!(tick = report.tick_number, clean = report.is_clean(), "Keeper tick complete");
        report
    }
}
