//! In-process on-chain oracle.
//!
//! Stores the latest price per registered feed. Update payloads are
//! JSON-encoded `PriceUpdate` records; each payload costs a fixed fee.
//! Updates older than the stored publish time are ignored, matching the
//! push-oracle contract behaviour.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use super::{PriceOracle, PriceUpdateBundle};
use crate::types::{Address, EscrowError, FeedId, Price, Wei};

/// One signed price observation for one feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceUpdate {
    pub feed_id: FeedId,
    pub price: Price,
}

impl PriceUpdate {
    pub fn encode(&self) -> Vec<u8> {
        // Plain struct of integers and strings; serialisation cannot fail.
        serde_json::to_vec(self).unwrap_or_default()
    }

    pub fn decode(raw: &[u8]) -> Result<Self, EscrowError> {
        serde_json::from_slice(raw)
            .map_err(|e| EscrowError::InvalidUpdate(format!("malformed payload: {e}")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalPriceFeed {
    address: Address,
    fee_per_update: Wei,
    prices: HashMap<FeedId, Option<Price>>,
}

impl LocalPriceFeed {
    /// Create an oracle that accepts updates for `feeds` only.
    pub fn new(address: Address, fee_per_update: Wei, feeds: impl IntoIterator<Item = FeedId>) -> Self {
        Self {
            address,
            fee_per_update,
            prices: feeds.into_iter().map(|f| (f, None)).collect(),
        }
    }

    /// Set a price directly (genesis state or tests).
    pub fn seed(&mut self, feed: FeedId, price: Price) {
        self.prices.insert(feed, Some(price));
    }

    pub fn fee_per_update(&self) -> Wei {
        self.fee_per_update
    }

    fn apply(&mut self, update: PriceUpdate, now: u64) -> Result<(), EscrowError> {
        let slot = self.prices.get_mut(&update.feed_id).ok_or_else(|| {
            EscrowError::InvalidUpdate(format!("unknown feed {}", update.feed_id))
        })?;

        if update.price.publish_time > now {
            return Err(EscrowError::InvalidUpdate(format!(
                "publish time {} is after block time {now}",
                update.price.publish_time
            )));
        }

        match slot {
            Some(current) if current.publish_time >= update.price.publish_time => {
                debug!(
                    feed = %update.feed_id,
                    stored = current.publish_time,
                    offered = update.price.publish_time,
                    "Ignoring update that is not newer than stored price"
                );
            }
            _ => *slot = Some(update.price),
        }
        Ok(())
    }
}

impl PriceOracle for LocalPriceFeed {
    fn address(&self) -> Address {
        self.address
    }

    fn update_fee(&self, update_data: &[Vec<u8>]) -> Wei {
        self.fee_per_update.saturating_mul(update_data.len() as Wei)
    }

    fn update_price_feeds(
        &mut self,
        update_data: &[Vec<u8>],
        fee_paid: Wei,
        now: u64,
    ) -> Result<(), EscrowError> {
        let required = self.update_fee(update_data);
        if fee_paid < required {
            return Err(EscrowError::InsufficientFee {
                required,
                provided: fee_paid,
            });
        }

        let updates = update_data
            .iter()
            .map(|raw| PriceUpdate::decode(raw))
            .collect::<Result<Vec<_>, _>>()?;

        for update in updates {
            self.apply(update, now)?;
        }
        Ok(())
    }

    fn price_unsafe(&self, feed: &FeedId) -> Result<Price, EscrowError> {
        self.prices
            .get(feed)
            .copied()
            .flatten()
            .ok_or(EscrowError::PriceNotFound(*feed))
    }

    fn payload_from(&self, bundle: &PriceUpdateBundle) -> Vec<Vec<u8>> {
        bundle
            .parsed
            .iter()
            .map(|(feed_id, price)| {
                PriceUpdate {
                    feed_id: *feed_id,
                    price: *price,
                }
                .encode()
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
