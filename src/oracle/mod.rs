//! Oracle integrations.
//!
//! Defines the `PriceOracle` trait (the on-chain price contract the escrow
//! reads) and the `PriceUpdateSource` trait (the off-chain push service that
//! produces signed update payloads). Implementations:
//! - `LocalPriceFeed`: in-process on-chain oracle
//! - `HermesClient`: HTTP client for the oracle network's push service

pub mod feed;
pub mod hermes;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{Address, EscrowError, FeedId, Price, Wei};

pub use feed::{LocalPriceFeed, PriceUpdate};
pub use hermes::HermesClient;

/// The on-chain oracle interface the escrow is written against.
///
/// Implementations are cloned to snapshot state for transaction rollback,
/// so they must be cheap, self-contained values.
pub trait PriceOracle: Clone + Send + Sync {
    /// Account that receives update fees.
    fn address(&self) -> Address;

    /// Fee required to apply `update_data`.
    fn update_fee(&self, update_data: &[Vec<u8>]) -> Wei;

    /// Apply signed price updates. `fee_paid` has already been transferred
    /// to `address()` by the caller.
    fn update_price_feeds(
        &mut self,
        update_data: &[Vec<u8>],
        fee_paid: Wei,
        now: u64,
    ) -> Result<(), EscrowError>;

    /// Latest stored price regardless of age.
    fn price_unsafe(&self, feed: &FeedId) -> Result<Price, EscrowError>;

    /// Latest stored price, rejected if published more than `max_age`
    /// seconds away from `now`.
    fn price_no_older_than(
        &self,
        feed: &FeedId,
        max_age: u64,
        now: u64,
    ) -> Result<Price, EscrowError> {
        let price = self.price_unsafe(feed)?;
        if price.age(now) > max_age {
            return Err(EscrowError::OracleStale {
                publish_time: price.publish_time,
                now,
                max_age,
            });
        }
        Ok(price)
    }

    /// Turn a push-service bundle into the payload this oracle accepts.
    fn payload_from(&self, bundle: &PriceUpdateBundle) -> Vec<Vec<u8>> {
        bundle.binary.clone()
    }
}

/// Signed update data as returned by the push service, plus the prices it
/// encodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PriceUpdateBundle {
    /// Opaque payloads for `update_price_feeds`.
    pub binary: Vec<Vec<u8>>,
    /// Decoded view of the same update.
    pub parsed: Vec<(FeedId, Price)>,
}

impl PriceUpdateBundle {
    pub fn price_for(&self, feed: &FeedId) -> Option<Price> {
        self.parsed
            .iter()
            .find(|(id, _)| id == feed)
            .map(|(_, p)| *p)
    }
}

/// Abstraction over the off-chain source of price update payloads.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PriceUpdateSource: Send + Sync {
    /// Fetch the latest signed update for `feed`.
    async fn latest_update(&self, feed: &FeedId) -> Result<PriceUpdateBundle>;

    /// Source name for logging.
    fn name(&self) -> &'static str;
}
